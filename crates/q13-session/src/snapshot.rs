use q13_core::{Basis, Bit};

use crate::{Phase, Role};

/// Plain-data copy of a session, for whatever layer persists or displays it.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SessionSnapshot {
    pub local_node: String,
    pub peer_node: String,
    pub phase: Phase,
    pub role: Option<Role>,
    pub sent_bits: Vec<Bit>,
    pub sent_bases: Vec<Basis>,
    pub received_bases: Vec<Basis>,
    pub measurement_outcomes: Vec<Bit>,
    pub shared_indices: Vec<usize>,
    pub sampled_error_indices: Vec<usize>,
    pub error_rate: Option<f64>,
    pub error_history: Vec<f64>,
    /// Present once the session is complete.
    pub final_key: Option<Vec<Bit>>,
}

impl SessionSnapshot {
    pub fn is_complete(&self) -> bool {
        self.phase == Phase::Complete
    }

    pub fn key_len(&self) -> usize {
        self.final_key.as_ref().map_or(0, Vec::len)
    }
}
