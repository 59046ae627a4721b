use serde::{Deserialize, Serialize};

/// A value slot carrying liveness and multiplicity metadata.
///
/// A container whose value is absent is a tombstone: it keeps the key's sort
/// position in a run while marking the key deleted. The multiplicity count
/// supports multiset semantics (the same key/value pair inserted N times is
/// stored once with a count of N).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Container<V> {
    value: Option<V>,
    multiplicity: u32,
}

impl<V> Container<V> {
    /// A live container holding `value` once.
    pub fn occupied(value: V) -> Self {
        Self::with_multiplicity(value, 1)
    }

    /// A live container holding `value` with an explicit multiplicity.
    pub fn with_multiplicity(value: V, multiplicity: u32) -> Self {
        Self {
            value: Some(value),
            multiplicity,
        }
    }

    /// A deletion marker. Keeps the key's sort position, carries no value.
    pub fn tombstone() -> Self {
        Self {
            value: None,
            multiplicity: 0,
        }
    }

    pub fn is_tombstone(&self) -> bool {
        self.value.is_none()
    }

    pub fn value(&self) -> Option<&V> {
        self.value.as_ref()
    }

    pub fn into_value(self) -> Option<V> {
        self.value
    }

    pub fn multiplicity(&self) -> u32 {
        self.multiplicity
    }
}

/// One key together with its value container. The unit every level, run,
/// and sort strategy operates on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry<K, V> {
    pub key: K,
    pub container: Container<V>,
}

impl<K, V> Entry<K, V> {
    pub fn new(key: K, container: Container<V>) -> Self {
        Self { key, container }
    }

    /// A live entry mapping `key` to `value`.
    pub fn occupied(key: K, value: V) -> Self {
        Self::new(key, Container::occupied(value))
    }

    /// A tombstone entry for `key`.
    pub fn tombstone(key: K) -> Self {
        Self::new(key, Container::tombstone())
    }
}
