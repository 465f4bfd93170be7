#![forbid(unsafe_code)]

pub mod control;
pub mod keys;
pub mod session;
pub mod snapshot;

pub use control::ControlMessage;
pub use keys::{keys_match, mismatch_count};
pub use session::{ControlOutcome, Session};
pub use snapshot::SessionSnapshot;

/// BB84 session phases. Ordered; a session only ever moves to a later phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Phase {
    Idle,
    Sending,
    Receiving,
    ReadyForReconciliation,
    Reconciling,
    ErrorChecking,
    Complete,
}

impl Phase {
    pub fn name(&self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::Sending => "sending",
            Phase::Receiving => "receiving",
            Phase::ReadyForReconciliation => "ready_for_reconciliation",
            Phase::Reconciling => "reconciling",
            Phase::ErrorChecking => "error_checking",
            Phase::Complete => "complete",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Role {
    /// Prepares and sends qubits.
    Initiator,
    /// Measures inbound qubits.
    Responder,
}

#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    /// Qubits a responder waits for before it is ready to reconcile.
    pub expected_qubits: Option<usize>,
    /// Fixed seed for basis and bit draws. `None` seeds from the thread RNG.
    pub rng_seed: Option<u64>,
    pub local_node: String,
    pub peer_node: String,
}

impl SessionConfig {
    pub fn new(local_node: &str, peer_node: &str) -> Self {
        Self {
            local_node: local_node.to_string(),
            peer_node: peer_node.to_string(),
            ..Default::default()
        }
    }

    pub fn with_expected_qubits(mut self, n: usize) -> Self {
        self.expected_qubits = Some(n);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng_seed = Some(seed);
        self
    }
}
