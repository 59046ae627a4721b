use crate::sort::SortStrategy;

/// LSD radix sort for string payloads.
///
/// Runs one stable counting-sort pass per byte position, from the last
/// position of the longest string down to position 0. A string shorter than
/// the current position falls into a sentinel bucket below every real byte
/// value, so a strict prefix always sorts before the strings it prefixes.
/// Total work is O(total bytes), not O(n log n).
///
/// The resulting order is byte-lexicographic, which for UTF-8 strings
/// coincides with `str`'s `Ord`. Because the order is fixed, this strategy
/// takes no comparison function and is not a [`SortKind`](crate::sort::SortKind)
/// variant.
pub struct RadixSort {
    items: Vec<String>,
    capacity: usize,
}

impl RadixSort {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: Vec::with_capacity(capacity),
            capacity,
        }
    }
}

impl SortStrategy<String> for RadixSort {
    fn push(&mut self, item: String) {
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

    fn drain(self: Box<Self>) -> Box<dyn Iterator<Item = String>> {
        Box::new(lsd_sort(self.items).into_iter())
    }
}

// Bucket 0 is the sentinel for "string ends before this position".
const BUCKETS: usize = 257;

fn bucket(s: &str, pos: usize) -> usize {
    match s.as_bytes().get(pos) {
        Some(&b) => b as usize + 1,
        None => 0,
    }
}

fn lsd_sort(mut items: Vec<String>) -> Vec<String> {
    let max_len = items.iter().map(|s| s.len()).max().unwrap_or(0);

    for pos in (0..max_len).rev() {
        let mut buckets: Vec<Vec<String>> = (0..BUCKETS).map(|_| Vec::new()).collect();
        for s in items {
            let b = bucket(&s, pos);
            buckets[b].push(s);
        }
        // Stable: buckets preserve arrival order, so earlier passes keep
        // their relative ordering among equal bytes at this position.
        items = buckets.into_iter().flatten().collect();
    }

    items
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sort::SortStrategy;

    fn sort(input: &[&str]) -> Vec<String> {
        let mut s = RadixSort::new(input.len());
        for &x in input {
            s.push(x.to_string());
        }
        Box::new(s).drain().collect()
    }

    #[test]
    fn prefix_sorts_before_extension() {
        assert_eq!(sort(&["bb", "b", "bbb", "b"]), vec!["b", "b", "bb", "bbb"]);
    }

    #[test]
    fn matches_lexicographic_order() {
        let input = [
            "ripple", "run", "", "level", "merge", "compaction", "run", "lever", "l", "zz", "a",
        ];
        let mut expected: Vec<String> = input.iter().map(|s| s.to_string()).collect();
        expected.sort();
        assert_eq!(sort(&input), expected);
    }

    #[test]
    fn empty_and_single() {
        assert_eq!(sort(&[]), Vec::<String>::new());
        assert_eq!(sort(&["only"]), vec!["only"]);
    }

    #[test]
    fn overflow_is_noop() {
        let mut s = RadixSort::new(1);
        s.push("a".to_string());
        assert!(s.is_full());
        s.push("b".to_string());
        assert_eq!(s.len(), 1);
        assert_eq!(Box::new(s).drain().collect::<Vec<_>>(), vec!["a"]);
    }

    #[test]
    fn all_same_length() {
        assert_eq!(sort(&["cab", "abc", "bca"]), vec!["abc", "bca", "cab"]);
    }
}
