use crate::order::Cmp;
use crate::sort::SortStrategy;

/// Baseline strategy: buffer everything, delegate to the standard library's
/// stable sort on drain.
pub struct StandardSort<T> {
    items: Vec<T>,
    capacity: usize,
    cmp: Cmp<T>,
}

impl<T> StandardSort<T> {
    pub fn new(capacity: usize, cmp: Cmp<T>) -> Self {
        Self {
            items: Vec::with_capacity(capacity),
            capacity,
            cmp,
        }
    }
}

impl<T: 'static> SortStrategy<T> for StandardSort<T> {
    fn push(&mut self, item: T) {
        if self.items.len() < self.capacity {
            self.items.push(item);
        }
    }

    fn len(&self) -> usize {
        self.items.len()
    }

    fn capacity(&self) -> usize {
        self.capacity
    }

    fn drain(self: Box<Self>) -> Box<dyn Iterator<Item = T>> {
        let mut items = self.items;
        let cmp = self.cmp;
        items.sort_by(|a, b| cmp(a, b));
        Box::new(items.into_iter())
    }
}
