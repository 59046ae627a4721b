//! Pluggable key/value encodings for run pages.
//!
//! A codec encodes one entry at a time into a page buffer and decodes it
//! back from a cursor. The `prev` parameter carries the previous entry of
//! the *same page* (pages must stay independently decodable, so any
//! entry-to-entry state resets at page boundaries); codecs that don't
//! delta-encode simply ignore it.
//!
//! Codecs are identified by a stable string id plus an opaque state blob,
//! both persisted in the factory's configuration record and resolved back
//! through the [`Registry`](crate::registry::Registry) on reopen.

use std::io::Cursor;
use std::marker::PhantomData;

use byteorder::ReadBytesExt;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::entry::{Container, Entry};
use crate::error::{Error, Result};

pub trait KvCodec<K, V>: Send + Sync {
    /// Stable identifier persisted in the configuration record.
    fn id(&self) -> &'static str;

    /// Opaque codec state persisted alongside the id.
    fn state(&self) -> Vec<u8>;

    /// Append one encoded entry to `buf`. `prev` is the previous entry in
    /// the same page, `None` at a page start.
    fn encode_entry(
        &self,
        entry: &Entry<K, V>,
        prev: Option<&Entry<K, V>>,
        buf: &mut Vec<u8>,
    ) -> Result<()>;

    /// Decode one entry from `cursor`, mirroring `encode_entry`.
    fn decode_entry(
        &self,
        cursor: &mut Cursor<&[u8]>,
        prev: Option<&Entry<K, V>>,
    ) -> Result<Entry<K, V>>;
}

/// Generic serde-backed codec: every entry is one bincode record.
pub struct BincodeCodec<K, V> {
    _marker: PhantomData<fn() -> (K, V)>,
}

impl<K, V> BincodeCodec<K, V> {
    pub const ID: &'static str = "bincode";

    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }

    pub fn from_state(state: &[u8]) -> Result<Self> {
        if !state.is_empty() {
            return Err(Error::InvalidConfig(format!(
                "bincode codec carries no state, got {} bytes",
                state.len()
            )));
        }
        Ok(Self::new())
    }
}

impl<K, V> Default for BincodeCodec<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> KvCodec<K, V> for BincodeCodec<K, V>
where
    K: Serialize + DeserializeOwned + Send + Sync,
    V: Serialize + DeserializeOwned + Send + Sync,
{
    fn id(&self) -> &'static str {
        Self::ID
    }

    fn state(&self) -> Vec<u8> {
        Vec::new()
    }

    fn encode_entry(
        &self,
        entry: &Entry<K, V>,
        _prev: Option<&Entry<K, V>>,
        buf: &mut Vec<u8>,
    ) -> Result<()> {
        bincode::serialize_into(&mut *buf, entry)
            .map_err(|e| Error::Corrupt(format!("entry serialization failed: {}", e)))
    }

    fn decode_entry(
        &self,
        cursor: &mut Cursor<&[u8]>,
        _prev: Option<&Entry<K, V>>,
    ) -> Result<Entry<K, V>> {
        bincode::deserialize_from(&mut *cursor)
            .map_err(|e| Error::Corrupt(format!("entry deserialization failed: {}", e)))
    }
}

/// Compact codec for fixed-shape numeric triples.
///
/// Keys are `[u64; 3]`, values `u64`, everything varint-encoded. In delta
/// mode each key component is zigzag-encoded against the previous entry's
/// component, which collapses the sorted, slowly-changing triples an index
/// build produces to a byte or two each.
pub struct TripleCodec {
    delta: bool,
}

impl TripleCodec {
    pub const ID: &'static str = "triple";

    pub fn plain() -> Self {
        Self { delta: false }
    }

    pub fn delta() -> Self {
        Self { delta: true }
    }

    pub fn from_state(state: &[u8]) -> Result<Self> {
        match state {
            [0] => Ok(Self::plain()),
            [1] => Ok(Self::delta()),
            _ => Err(Error::InvalidConfig(format!(
                "triple codec state must be one mode byte, got {:?}",
                state
            ))),
        }
    }
}

const OCCUPIED_FLAG: u8 = 0x01;

impl KvCodec<[u64; 3], u64> for TripleCodec {
    fn id(&self) -> &'static str {
        Self::ID
    }

    fn state(&self) -> Vec<u8> {
        vec![self.delta as u8]
    }

    fn encode_entry(
        &self,
        entry: &Entry<[u64; 3], u64>,
        prev: Option<&Entry<[u64; 3], u64>>,
        buf: &mut Vec<u8>,
    ) -> Result<()> {
        match prev.filter(|_| self.delta) {
            Some(prev) => {
                for (component, base) in entry.key.iter().zip(prev.key.iter()) {
                    // Wrapping arithmetic is exact mod 2^64, so the
                    // roundtrip holds for any pair of components.
                    write_uvarint(buf, zigzag(component.wrapping_sub(*base) as i64));
                }
            }
            None => {
                for component in &entry.key {
                    write_uvarint(buf, *component);
                }
            }
        }

        match entry.container.value() {
            Some(value) => {
                buf.push(OCCUPIED_FLAG);
                write_uvarint(buf, entry.container.multiplicity() as u64);
                write_uvarint(buf, *value);
            }
            None => buf.push(0),
        }
        Ok(())
    }

    fn decode_entry(
        &self,
        cursor: &mut Cursor<&[u8]>,
        prev: Option<&Entry<[u64; 3], u64>>,
    ) -> Result<Entry<[u64; 3], u64>> {
        let mut key = [0u64; 3];
        match prev.filter(|_| self.delta) {
            Some(prev) => {
                for (component, base) in key.iter_mut().zip(prev.key.iter()) {
                    let delta = unzigzag(read_uvarint(cursor)?);
                    *component = base.wrapping_add(delta as u64);
                }
            }
            None => {
                for component in key.iter_mut() {
                    *component = read_uvarint(cursor)?;
                }
            }
        }

        let flags = cursor.read_u8().map_err(truncated)?;
        let container = if flags & OCCUPIED_FLAG != 0 {
            let multiplicity = read_uvarint(cursor)? as u32;
            let value = read_uvarint(cursor)?;
            Container::with_multiplicity(value, multiplicity)
        } else {
            Container::tombstone()
        };

        Ok(Entry::new(key, container))
    }
}

fn truncated(err: std::io::Error) -> Error {
    Error::Corrupt(format!("truncated entry record: {}", err))
}

fn zigzag(v: i64) -> u64 {
    ((v << 1) ^ (v >> 63)) as u64
}

fn unzigzag(v: u64) -> i64 {
    ((v >> 1) as i64) ^ -((v & 1) as i64)
}

/// LEB128 unsigned varint.
pub(crate) fn write_uvarint(buf: &mut Vec<u8>, mut v: u64) {
    while v >= 0x80 {
        buf.push((v as u8) | 0x80);
        v >>= 7;
    }
    buf.push(v as u8);
}

pub(crate) fn read_uvarint(cursor: &mut Cursor<&[u8]>) -> Result<u64> {
    let mut value = 0u64;
    let mut shift = 0u32;
    loop {
        let byte = cursor.read_u8().map_err(truncated)?;
        if shift == 63 && byte > 1 {
            return Err(Error::Corrupt("varint overflows u64".to_string()));
        }
        value |= u64::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
        shift += 7;
        if shift > 63 {
            return Err(Error::Corrupt("varint overflows u64".to_string()));
        }
    }
}
