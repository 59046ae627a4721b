use std::cmp::Ordering;
use std::thread;

use crossbeam_channel::{bounded, Receiver, Sender};

use crate::order::Cmp;
use crate::sort::{insertion_sort, SortOptions, SortStrategy};

/// Merge sort with a bounded worker pool.
///
/// The buffer is split at the midpoint; ranges at or below the cutoff are
/// insertion-sorted. At each split the calling thread tries to take a permit
/// from the pool: with a permit, the left half goes to a scoped worker while
/// the caller sorts the right half itself; without one, both halves run
/// inline. Joining the worker before the merge is the only synchronization
/// point, and the merge is order-preserving and driven by the comparison
/// function alone, so output is identical to the sequential variant for any
/// pool size.
pub struct ParallelMergeSort<T> {
    items: Vec<T>,
    capacity: usize,
    cmp: Cmp<T>,
    cutoff: usize,
    pool: PermitPool,
}

impl<T> ParallelMergeSort<T> {
    pub fn new(capacity: usize, cmp: Cmp<T>) -> Self {
        Self::with_options(capacity, cmp, SortOptions::default())
    }

    pub fn with_options(capacity: usize, cmp: Cmp<T>, opts: SortOptions) -> Self {
        Self {
            items: Vec::with_capacity(capacity),
            capacity,
            cmp,
            cutoff: opts.cutoff.max(1),
            pool: PermitPool::new(opts.pool_size),
        }
    }
}

impl<T: Send + 'static> SortStrategy<T> for ParallelMergeSort<T> {
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
        let this = *self;
        let (items, cmp, cutoff, pool) = (this.items, this.cmp, this.cutoff, this.pool);
        let sorted = thread::scope(|scope| msort(scope, items, &*cmp, cutoff, &pool));
        Box::new(sorted.into_iter())
    }
}

fn msort<'scope, T: Send + 'static>(
    scope: &'scope thread::Scope<'scope, '_>,
    mut v: Vec<T>,
    cmp: &'scope (dyn Fn(&T, &T) -> Ordering + Send + Sync),
    cutoff: usize,
    pool: &'scope PermitPool,
) -> Vec<T> {
    if v.len() <= cutoff {
        insertion_sort(&mut v, cmp);
        return v;
    }

    let mid = v.len() / 2;
    let right = v.split_off(mid);
    let left = v;

    let (left_sorted, right_sorted) = match pool.try_acquire() {
        Some(permit) => {
            let handle = scope.spawn(move || {
                let sorted = msort(scope, left, cmp, cutoff, pool);
                drop(permit);
                sorted
            });
            let right_sorted = msort(scope, right, cmp, cutoff, pool);
            let left_sorted = handle
                .join()
                .unwrap_or_else(|payload| std::panic::resume_unwind(payload));
            (left_sorted, right_sorted)
        }
        // No worker slot free: degrade to sequential execution.
        None => (
            msort(scope, left, cmp, cutoff, pool),
            msort(scope, right, cmp, cutoff, pool),
        ),
    };

    merge(left_sorted, right_sorted, cmp)
}

/// Linear merge, taking from the left half on ties so the sort stays stable.
fn merge<T>(left: Vec<T>, right: Vec<T>, cmp: &dyn Fn(&T, &T) -> Ordering) -> Vec<T> {
    let mut out = Vec::with_capacity(left.len() + right.len());
    let mut l = left.into_iter().peekable();
    let mut r = right.into_iter().peekable();

    loop {
        match (l.peek(), r.peek()) {
            (Some(a), Some(b)) => {
                if cmp(a, b) == Ordering::Greater {
                    out.extend(r.next());
                } else {
                    out.extend(l.next());
                }
            }
            (Some(_), None) => out.extend(l.next()),
            (None, Some(_)) => out.extend(r.next()),
            (None, None) => break,
        }
    }

    out
}

/// Counting semaphore over a bounded channel: the channel holds one token
/// per free worker slot.
struct PermitPool {
    tx: Sender<()>,
    rx: Receiver<()>,
}

impl PermitPool {
    fn new(permits: usize) -> Self {
        let (tx, rx) = bounded(permits.max(1));
        for _ in 0..permits {
            tx.send(()).expect("filling a fresh permit channel cannot fail");
        }
        Self { tx, rx }
    }

    fn try_acquire(&self) -> Option<Permit<'_>> {
        self.rx.try_recv().ok().map(|()| Permit { tx: &self.tx })
    }
}

struct Permit<'a> {
    tx: &'a Sender<()>,
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        let _ = self.tx.try_send(());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sort::tests::{check_contract, natural};
    use crate::sort::SortKind;
    use std::sync::Arc;

    #[test]
    fn contract() {
        check_contract(SortKind::Parallel);
    }

    #[test]
    fn identical_to_sequential_for_every_pool_size() {
        let input: Vec<(u32, u32)> = (0..500u32).map(|i| ((i * 7919) % 100, i)).collect();
        let cmp: Cmp<(u32, u32)> = Arc::new(|a, b| a.0.cmp(&b.0));

        // Pool size 0 is fully sequential and serves as the reference.
        let reference = run_sort(input.clone(), Cmp::clone(&cmp), 0);

        for pool_size in 1..=8 {
            let result = run_sort(input.clone(), Cmp::clone(&cmp), pool_size);
            assert_eq!(result, reference, "pool_size = {}", pool_size);
        }

        // Stability: equal first components keep insertion order, visible
        // through the untouched second component.
        for window in reference.windows(2) {
            if window[0].0 == window[1].0 {
                assert!(window[0].1 < window[1].1);
            }
        }
    }

    fn run_sort(input: Vec<(u32, u32)>, cmp: Cmp<(u32, u32)>, pool_size: usize) -> Vec<(u32, u32)> {
        let opts = SortOptions {
            cutoff: 25,
            pool_size,
        };
        let mut s = ParallelMergeSort::with_options(input.len(), cmp, opts);
        for x in input {
            s.push(x);
        }
        Box::new(s).drain().collect()
    }

    #[test]
    fn cutoff_boundary() {
        for n in [24usize, 25, 26, 51] {
            let input: Vec<(u32, u32)> = (0..n as u32).rev().map(|i| (i, i)).collect();
            let mut expected = input.clone();
            expected.sort();
            let cmp: Cmp<(u32, u32)> = Arc::new(|a, b| a.cmp(b));
            assert_eq!(run_sort(input, cmp, 8), expected, "n = {}", n);
        }
    }
}
