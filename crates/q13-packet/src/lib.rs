#![forbid(unsafe_code)]

use std::time::{SystemTime, UNIX_EPOCH};

use q13_core::FIXED_HEADER_OVERHEAD;
use rand::RngCore;

pub mod fragment;
pub use fragment::{fragment, reassemble, try_reassemble, FragmentBuffer, ReassemblyError};

/// Header carrying an explicit size, used by fragments.
pub const SIZE_BYTES: &str = "size_bytes";

/// Opaque packet identity. Never changes once assigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PacketId(u64);

impl PacketId {
    pub fn random() -> Self {
        Self(rand::thread_rng().next_u64())
    }

    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for PacketId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderValue {
    Flag(bool),
    Int(u64),
    Text(String),
}

impl HeaderValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            HeaderValue::Flag(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            HeaderValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            HeaderValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl From<bool> for HeaderValue {
    fn from(v: bool) -> Self { HeaderValue::Flag(v) }
}
impl From<u64> for HeaderValue {
    fn from(v: u64) -> Self { HeaderValue::Int(v) }
}
impl From<usize> for HeaderValue {
    fn from(v: usize) -> Self { HeaderValue::Int(v as u64) }
}
impl From<&str> for HeaderValue {
    fn from(v: &str) -> Self { HeaderValue::Text(v.to_string()) }
}
impl From<String> for HeaderValue {
    fn from(v: String) -> Self { HeaderValue::Text(v) }
}

/// Multi-valued header bag. Names keep insertion order, values keep append order.
/// A name with no values left is dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, Vec<HeaderValue>)>,
}

impl Headers {
    fn slot(&self, name: &str) -> Option<usize> {
        self.entries.iter().position(|(n, _)| n == name)
    }

    pub fn append(&mut self, name: &str, value: HeaderValue) {
        match self.slot(name) {
            Some(i) => self.entries[i].1.push(value),
            None => self.entries.push((name.to_string(), vec![value])),
        }
    }

    pub fn first(&self, name: &str) -> Option<&HeaderValue> {
        self.slot(name).and_then(|i| self.entries[i].1.first())
    }

    pub fn all(&self, name: &str) -> &[HeaderValue] {
        match self.slot(name) {
            Some(i) => &self.entries[i].1,
            None => &[],
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<Vec<HeaderValue>> {
        let i = self.slot(name)?;
        Some(self.entries.remove(i).1)
    }

    pub fn remove_value(&mut self, name: &str, value: &HeaderValue) -> bool {
        let Some(i) = self.slot(name) else { return false };
        let values = &mut self.entries[i].1;
        let Some(pos) = values.iter().position(|v| v == value) else { return false };
        values.remove(pos);
        if values.is_empty() {
            self.entries.remove(i);
        }
        true
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(n, _)| n.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A classical network message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    id: PacketId,
    pub source: String,
    pub destination: String,
    pub destination_address: Option<String>,
    pub next_hop: String,
    pub payload: Vec<u8>,
    pub protocol: String,
    pub creation_time_us: u64,
    hop_history: Vec<String>,
    headers: Headers,
}

fn now_us() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}

impl Packet {
    pub fn create(
        payload: Vec<u8>,
        source: &str,
        destination: &str,
        protocol: &str,
        destination_address: Option<&str>,
    ) -> Self {
        Self {
            id: PacketId::random(),
            source: source.to_string(),
            destination: destination.to_string(),
            destination_address: destination_address.map(str::to_string),
            next_hop: destination.to_string(),
            payload,
            protocol: protocol.to_string(),
            creation_time_us: now_us(),
            hop_history: vec![source.to_string()],
            headers: Headers::default(),
        }
    }

    /// Copy of this packet (same id, hops and headers) carrying another payload.
    pub(crate) fn with_payload(&self, payload: Vec<u8>) -> Self {
        Self {
            id: self.id,
            source: self.source.clone(),
            destination: self.destination.clone(),
            destination_address: self.destination_address.clone(),
            next_hop: self.next_hop.clone(),
            payload,
            protocol: self.protocol.clone(),
            creation_time_us: self.creation_time_us,
            hop_history: self.hop_history.clone(),
            headers: self.headers.clone(),
        }
    }

    pub fn id(&self) -> PacketId {
        self.id
    }

    pub fn hop_history(&self) -> &[String] {
        &self.hop_history
    }

    /// Revisits are recorded, not rejected.
    pub fn append_hop(&mut self, node: &str) {
        self.hop_history.push(node.to_string());
    }

    pub fn set_next_hop(&mut self, node: &str) {
        self.next_hop = node.to_string();
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn append_header(&mut self, name: &str, value: impl Into<HeaderValue>) {
        self.headers.append(name, value.into());
    }

    /// Replaces every value under `name` with `value`.
    pub fn set_header(&mut self, name: &str, value: impl Into<HeaderValue>) {
        self.headers.remove(name);
        self.headers.append(name, value.into());
    }

    pub fn get_header(&self, name: &str) -> Option<&HeaderValue> {
        self.headers.first(name)
    }

    pub fn get_header_all(&self, name: &str) -> &[HeaderValue] {
        self.headers.all(name)
    }

    pub fn has_header(&self, name: &str) -> bool {
        self.headers.first(name).is_some()
    }

    /// Clears `name`. Returns the removed values, or `None` if it was absent.
    pub fn remove_header(&mut self, name: &str) -> Option<Vec<HeaderValue>> {
        self.headers.remove(name)
    }

    /// Removes the first value under `name` equal to `value`.
    pub fn remove_header_value(&mut self, name: &str, value: &HeaderValue) -> bool {
        self.headers.remove_value(name, value)
    }

    pub fn size_bytes(&self) -> usize {
        match self.get_header(SIZE_BYTES).and_then(HeaderValue::as_u64) {
            Some(size) => size as usize,
            None => self.payload.len() + FIXED_HEADER_OVERHEAD,
        }
    }

    pub fn size_bits(&self) -> usize {
        self.size_bytes() * 8
    }
}
