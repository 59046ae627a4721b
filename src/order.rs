use std::cmp::Ordering;
use std::sync::Arc;

use crate::entry::Entry;

/// Shared comparison function over sortable elements.
pub type Cmp<T> = Arc<dyn Fn(&T, &T) -> Ordering + Send + Sync>;

/// The ordering a factory imposes on keys.
///
/// `Natural` uses the key type's `Ord`. `Custom` carries a comparison
/// function together with the name it was registered under; the name is what
/// gets persisted in a disk factory's configuration record, and reopening
/// resolves it back through the registry.
#[derive(Clone)]
pub enum KeyOrdering<K> {
    Natural,
    Custom { name: String, cmp: Cmp<K> },
}

impl<K> KeyOrdering<K> {
    pub fn custom(name: impl Into<String>, cmp: Cmp<K>) -> Self {
        Self::Custom {
            name: name.into(),
            cmp,
        }
    }

    /// The registered name for custom orderings, `None` for natural.
    pub fn name(&self) -> Option<&str> {
        match self {
            Self::Natural => None,
            Self::Custom { name, .. } => Some(name),
        }
    }
}

impl<K: Ord> KeyOrdering<K> {
    pub fn compare(&self, a: &K, b: &K) -> Ordering {
        match self {
            Self::Natural => a.cmp(b),
            Self::Custom { cmp, .. } => cmp(a, b),
        }
    }

    /// A comparison function over bare keys.
    pub fn key_cmp(&self) -> Cmp<K>
    where
        K: Send + Sync + 'static,
    {
        match self {
            Self::Natural => Arc::new(|a: &K, b: &K| a.cmp(b)),
            Self::Custom { cmp, .. } => Arc::clone(cmp),
        }
    }

    /// A comparison function over entries that looks only at the key, so a
    /// sort strategy over entries orders by key alone and ties fall to the
    /// layer above.
    pub fn entry_cmp<V>(&self) -> Cmp<Entry<K, V>>
    where
        K: Send + Sync + 'static,
        V: Send + Sync + 'static,
    {
        match self {
            Self::Natural => Arc::new(|a: &Entry<K, V>, b: &Entry<K, V>| a.key.cmp(&b.key)),
            Self::Custom { cmp, .. } => {
                let cmp = Arc::clone(cmp);
                Arc::new(move |a: &Entry<K, V>, b: &Entry<K, V>| cmp(&a.key, &b.key))
            }
        }
    }
}

impl<K> std::fmt::Debug for KeyOrdering<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Natural => write!(f, "KeyOrdering::Natural"),
            Self::Custom { name, .. } => write!(f, "KeyOrdering::Custom({})", name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn natural_follows_ord() {
        let ord: KeyOrdering<u32> = KeyOrdering::Natural;
        assert_eq!(ord.compare(&1, &2), Ordering::Less);
        assert_eq!(ord.compare(&2, &2), Ordering::Equal);
    }

    #[test]
    fn custom_overrides_ord() {
        let ord = KeyOrdering::custom("reverse", Arc::new(|a: &u32, b: &u32| b.cmp(a)) as Cmp<u32>);
        assert_eq!(ord.compare(&1, &2), Ordering::Greater);
        assert_eq!(ord.name(), Some("reverse"));
    }

    #[test]
    fn entry_cmp_ignores_container() {
        let ord: KeyOrdering<u32> = KeyOrdering::Natural;
        let cmp = ord.entry_cmp::<u64>();
        let a = Entry::occupied(1u32, 10u64);
        let b = Entry::tombstone(1u32);
        assert_eq!(cmp(&a, &b), Ordering::Equal);
    }
}
