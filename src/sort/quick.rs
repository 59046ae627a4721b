use std::cmp::Ordering;

use crate::config::DEFAULT_SORT_CUTOFF;
use crate::order::Cmp;
use crate::sort::{insertion_sort, SortStrategy};

/// In-place quicksort with median-of-three pivot selection and Hoare-style
/// partitioning.
///
/// The elements at `lo`, mid, and `hi` are pre-sorted so the median ends up
/// at `hi` and serves as the pivot. Ranges at or below the cutoff are
/// insertion-sorted instead of recursing, which bounds recursion depth and
/// sidesteps quicksort's bad behavior on tiny partitions.
pub struct QuickSort<T> {
    items: Vec<T>,
    capacity: usize,
    cmp: Cmp<T>,
    cutoff: usize,
}

impl<T> QuickSort<T> {
    pub fn new(capacity: usize, cmp: Cmp<T>) -> Self {
        Self::with_cutoff(capacity, cmp, DEFAULT_SORT_CUTOFF)
    }

    pub fn with_cutoff(capacity: usize, cmp: Cmp<T>, cutoff: usize) -> Self {
        Self {
            items: Vec::with_capacity(capacity),
            capacity,
            cmp,
            // A cutoff below 3 would break median-of-three selection.
            cutoff: cutoff.max(3),
        }
    }
}

impl<T: 'static> SortStrategy<T> for QuickSort<T> {
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
        if !items.is_empty() {
            let hi = items.len() - 1;
            quicksort(&mut items, 0, hi, &*self.cmp, self.cutoff);
        }
        Box::new(items.into_iter())
    }
}

fn quicksort<T>(v: &mut [T], lo: usize, hi: usize, cmp: &dyn Fn(&T, &T) -> Ordering, cutoff: usize) {
    if hi - lo + 1 <= cutoff {
        insertion_sort(&mut v[lo..=hi], cmp);
        return;
    }

    let p = partition(v, lo, hi, cmp);
    if p > lo {
        quicksort(v, lo, p - 1, cmp, cutoff);
    }
    if p < hi {
        quicksort(v, p + 1, hi, cmp, cutoff);
    }
}

/// Hoare-style partition around the median of `v[lo]`, `v[mid]`, `v[hi]`.
/// Returns the pivot's final index.
fn partition<T>(v: &mut [T], lo: usize, hi: usize, cmp: &dyn Fn(&T, &T) -> Ordering) -> usize {
    let mid = lo + (hi - lo) / 2;

    // Pre-sort lo/mid/hi, then park the median at hi as the pivot.
    if cmp(&v[mid], &v[lo]) == Ordering::Less {
        v.swap(mid, lo);
    }
    if cmp(&v[hi], &v[lo]) == Ordering::Less {
        v.swap(hi, lo);
    }
    if cmp(&v[hi], &v[mid]) == Ordering::Less {
        v.swap(hi, mid);
    }
    v.swap(mid, hi);

    let mut i = lo;
    let mut j = hi - 1;
    loop {
        // v[hi] is the pivot, so the left scan cannot run past hi.
        while cmp(&v[i], &v[hi]) == Ordering::Less {
            i += 1;
        }
        while j > lo && cmp(&v[hi], &v[j]) == Ordering::Less {
            j -= 1;
        }
        if i >= j {
            break;
        }
        v.swap(i, j);
        i += 1;
        if j > 0 {
            j -= 1;
        }
    }
    v.swap(i, hi);
    i
}
