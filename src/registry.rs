use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Error, Result};
use crate::order::{Cmp, KeyOrdering};
use crate::run::codec::{BincodeCodec, KvCodec, TripleCodec};

/// Builds a codec back from its persisted id and state bytes.
pub type CodecConstructor<K, V> =
    Box<dyn Fn(&[u8]) -> Result<Arc<dyn KvCodec<K, V>>> + Send + Sync>;

/// Process-owned table of named orderings and codec constructors, plus the
/// monotonic counter that hands out factory instance ids.
///
/// The embedding process creates one registry, registers whatever custom
/// orderings and codecs it uses, and passes it to every factory it
/// constructs. Reopening a persisted factory resolves the identifiers in
/// its configuration record through the same registry; an identifier the
/// registry does not know is fatal at open time. Teardown follows the
/// registry's lifetime; there is no global static state.
pub struct Registry<K, V> {
    orderings: HashMap<String, Cmp<K>>,
    codecs: HashMap<String, CodecConstructor<K, V>>,
    next_instance: AtomicU64,
}

impl<K, V> Registry<K, V> {
    pub fn new() -> Self {
        Self {
            orderings: HashMap::new(),
            codecs: HashMap::new(),
            next_instance: AtomicU64::new(0),
        }
    }

    /// Register a custom ordering under `name`.
    pub fn register_ordering(&mut self, name: impl Into<String>, cmp: Cmp<K>) {
        self.orderings.insert(name.into(), cmp);
    }

    /// Register a codec constructor under its stable id.
    pub fn register_codec(&mut self, id: impl Into<String>, constructor: CodecConstructor<K, V>) {
        self.codecs.insert(id.into(), constructor);
    }

    /// Resolve a persisted custom-ordering name.
    pub fn resolve_ordering(&self, name: &str) -> Result<KeyOrdering<K>> {
        let cmp = self
            .orderings
            .get(name)
            .ok_or_else(|| Error::UnknownOrdering(name.to_string()))?;
        Ok(KeyOrdering::custom(name, Cmp::clone(cmp)))
    }

    /// Resolve a persisted codec id and state blob.
    pub fn resolve_codec(&self, id: &str, state: &[u8]) -> Result<Arc<dyn KvCodec<K, V>>> {
        let constructor = self
            .codecs
            .get(id)
            .ok_or_else(|| Error::UnknownCodec(id.to_string()))?;
        constructor(state)
    }

    /// Next factory instance id. Never reused within this registry's life.
    pub fn next_instance(&self) -> u64 {
        self.next_instance.fetch_add(1, Ordering::SeqCst)
    }
}

impl<K, V> Registry<K, V>
where
    K: Serialize + DeserializeOwned + Send + Sync + 'static,
    V: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// A registry with the generic bincode codec pre-registered.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register_codec(
            BincodeCodec::<K, V>::ID,
            Box::new(|state| {
                Ok(Arc::new(BincodeCodec::<K, V>::from_state(state)?) as Arc<dyn KvCodec<K, V>>)
            }),
        );
        registry
    }
}

impl Registry<[u64; 3], u64> {
    /// A registry for integer-triple engines: bincode plus the compact
    /// triple codec.
    pub fn for_triples() -> Self {
        let mut registry = Self::with_defaults();
        registry.register_codec(
            TripleCodec::ID,
            Box::new(|state| Ok(Arc::new(TripleCodec::from_state(state)?) as Arc<dyn KvCodec<_, _>>)),
        );
        registry
    }
}

impl<K, V> Default for Registry<K, V> {
    fn default() -> Self {
        Self::new()
    }
}
