use std::collections::{BTreeMap, VecDeque};

use log::{debug, warn};
use q13_core::{Q13Error, Q13Result, FIXED_HEADER_OVERHEAD};

use crate::{HeaderValue, Packet, PacketId, SIZE_BYTES};

pub const FRAGMENT_ID: &str = "fragment_id";
pub const FRAGMENT_OFFSET: &str = "fragment_offset";
pub const MORE_FRAGMENTS: &str = "more_fragments";
pub const REASSEMBLY_COMPLETE: &str = "reassembly_complete";

/// Upper bound on fragment groups a buffer will track at once.
/// A new group past this evicts the oldest partial one.
pub const MAX_PENDING_GROUPS: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReassemblyError {
    Empty,
    /// Gap, duplicate or overlap. `found` is `None` when a fragment lacks its offset.
    IncompleteReassembly { expected: usize, found: Option<usize> },
    MissingFinalFragment,
}

impl std::fmt::Display for ReassemblyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReassemblyError::Empty => write!(f, "no fragments"),
            ReassemblyError::IncompleteReassembly { expected, found: Some(off) } => {
                write!(f, "expected offset {}, found {}", expected, off)
            }
            ReassemblyError::IncompleteReassembly { expected, found: None } => {
                write!(f, "expected offset {}, found fragment without offset", expected)
            }
            ReassemblyError::MissingFinalFragment => write!(f, "final fragment missing"),
        }
    }
}

impl std::error::Error for ReassemblyError {}

fn offset_of(p: &Packet) -> Option<usize> {
    p.get_header(FRAGMENT_OFFSET).and_then(HeaderValue::as_u64).map(|o| o as usize)
}

fn fragment_id_of(p: &Packet) -> Option<u64> {
    p.get_header(FRAGMENT_ID).and_then(HeaderValue::as_u64)
}

/// Splits `packet` into MTU-bounded fragments.
/// A packet that already fits is returned as the only element, untouched.
pub fn fragment(packet: &Packet, mtu: usize, original_id: Option<PacketId>) -> Q13Result<Vec<Packet>> {
    if packet.size_bytes() <= mtu {
        return Ok(vec![packet.clone()]);
    }
    if mtu <= FIXED_HEADER_OVERHEAD {
        return Err(Q13Error::InvalidMtu(mtu));
    }

    let capacity = mtu - FIXED_HEADER_OVERHEAD;
    let total_len = packet.payload.len();
    let frag_id = original_id.unwrap_or(packet.id()).raw();

    let mut out = Vec::with_capacity(total_len.div_ceil(capacity));
    let mut offset = 0;
    for window in packet.payload.chunks(capacity) {
        let mut frag = packet.with_payload(window.to_vec());
        frag.set_header(FRAGMENT_ID, frag_id);
        frag.set_header(FRAGMENT_OFFSET, offset);
        frag.set_header(MORE_FRAGMENTS, offset + window.len() < total_len);
        frag.set_header(SIZE_BYTES, window.len() + FIXED_HEADER_OVERHEAD);
        out.push(frag);
        offset += window.len();
    }

    debug!("fragmented {} ({} bytes) into {} at mtu {}", packet.id(), total_len, out.len(), mtu);
    Ok(out)
}

/// Rebuilds the original packet from a complete fragment set, in any order.
pub fn try_reassemble(fragments: &[Packet]) -> Result<Packet, ReassemblyError> {
    if fragments.is_empty() {
        return Err(ReassemblyError::Empty);
    }

    let mut ordered = Vec::with_capacity(fragments.len());
    for frag in fragments {
        match offset_of(frag) {
            Some(off) => ordered.push((off, frag)),
            None => {
                return Err(ReassemblyError::IncompleteReassembly { expected: 0, found: None })
            }
        }
    }
    ordered.sort_by_key(|(off, _)| *off);

    let mut expected = 0;
    let mut payload = Vec::new();
    for (off, frag) in &ordered {
        if *off != expected {
            return Err(ReassemblyError::IncompleteReassembly { expected, found: Some(*off) });
        }
        payload.extend_from_slice(&frag.payload);
        expected += frag.payload.len();
    }

    let last = ordered[ordered.len() - 1].1;
    if last.get_header(MORE_FRAGMENTS).and_then(HeaderValue::as_bool) != Some(false) {
        return Err(ReassemblyError::MissingFinalFragment);
    }

    let mut packet = ordered[0].1.with_payload(payload);
    for name in [FRAGMENT_ID, FRAGMENT_OFFSET, MORE_FRAGMENTS, SIZE_BYTES] {
        packet.remove_header(name);
    }
    packet.set_header(REASSEMBLY_COMPLETE, true);
    Ok(packet)
}

pub fn reassemble(fragments: &[Packet]) -> Option<Packet> {
    try_reassemble(fragments).ok()
}

/// Receive-side holding area for fragments still waiting on their siblings.
/// Every completeness decision is delegated to [`try_reassemble`].
#[derive(Debug, Default)]
pub struct FragmentBuffer {
    pending: BTreeMap<u64, Vec<Packet>>,
    // Group ids, oldest first.
    arrival: VecDeque<u64>,
}

impl FragmentBuffer {
    pub fn new() -> Self {
        Self { pending: BTreeMap::new(), arrival: VecDeque::new() }
    }

    /// Returns a whole packet once one is available. Unfragmented packets pass through.
    pub fn ingest(&mut self, packet: Packet) -> Option<Packet> {
        let Some(frag_id) = fragment_id_of(&packet) else {
            return Some(packet);
        };

        if !self.pending.contains_key(&frag_id) {
            if self.pending.len() >= MAX_PENDING_GROUPS {
                if let Some(oldest) = self.arrival.pop_front() {
                    let dropped = self.pending.remove(&oldest).map_or(0, |g| g.len());
                    warn!("fragment buffer full, evicted {:016x} ({} fragments)", oldest, dropped);
                }
            }
            self.arrival.push_back(frag_id);
        }

        let group = self.pending.entry(frag_id).or_default();
        let offset = offset_of(&packet);
        if group.iter().any(|p| offset_of(p) == offset) {
            debug!("duplicate fragment {:016x} @ {:?} ignored", frag_id, offset);
            return None;
        }
        group.push(packet);

        match try_reassemble(group) {
            Ok(whole) => {
                self.forget(frag_id);
                Some(whole)
            }
            Err(_) => None,
        }
    }

    pub fn pending_groups(&self) -> usize {
        self.pending.len()
    }

    /// Ids of the partial groups, oldest first.
    pub fn pending_ids(&self) -> impl Iterator<Item = u64> + '_ {
        self.arrival.iter().copied()
    }

    /// Drops a partial group, returning how many fragments it held.
    pub fn discard(&mut self, fragment_id: u64) -> usize {
        let dropped = self.forget(fragment_id);
        if dropped > 0 {
            warn!("discarded incomplete fragment set {:016x} ({} fragments)", fragment_id, dropped);
        }
        dropped
    }

    fn forget(&mut self, fragment_id: u64) -> usize {
        self.arrival.retain(|&id| id != fragment_id);
        self.pending.remove(&fragment_id).map_or(0, |g| g.len())
    }
}
