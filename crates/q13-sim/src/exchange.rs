use log::info;

use q13_core::{Bit, Q13Error, Q13Result};
use q13_hal::QubitProvider;
use q13_session::{keys_match, mismatch_count, ControlOutcome, Session};

use crate::link::MemoryLink;

#[derive(Debug, Clone)]
pub struct ExchangeReport {
    pub qubits: usize,
    pub shared: usize,
    pub sampled: usize,
    pub efficiency: f64,
    pub error_rate: f64,
    pub initiator_key: Vec<Bit>,
    pub responder_key: Vec<Bit>,
    pub fragments_sent: usize,
}

impl ExchangeReport {
    pub fn keys_match(&self) -> bool {
        keys_match(&self.initiator_key, &self.responder_key)
    }

    pub fn mismatches(&self) -> usize {
        mismatch_count(&self.initiator_key, &self.responder_key)
    }
}

fn next_control<P: QubitProvider>(
    session: &mut Session<P, MemoryLink<P::Qubit>>,
) -> Q13Result<ControlOutcome> {
    session.poll_control()?.ok_or(Q13Error::NoChannel)
}

/// Runs one full BB84 exchange over a `MemoryLink` pair, calling both sides
/// in causal order. Both sides are told the same qubit count.
pub fn run_exchange<A, B>(
    alice: &mut Session<A, MemoryLink<A::Qubit>>,
    bob: &mut Session<B, MemoryLink<A::Qubit>>,
    qubits: usize,
    sample_size: usize,
) -> Q13Result<ExchangeReport>
where
    A: QubitProvider,
    B: QubitProvider<Qubit = A::Qubit>,
{
    bob.expect_qubits(qubits)?;
    alice.send_qubits(qubits)?;

    let inbound = bob.transport_mut().ok_or(Q13Error::NoChannel)?.take_qubits();
    for qubit in inbound {
        bob.receive_qubit(qubit)?;
    }

    alice.announce_bases()?;
    next_control(bob)?;
    next_control(alice)?;

    alice.sample_for_error_check(sample_size)?;
    let error_rate = match next_control(bob)? {
        ControlOutcome::ErrorEstimated(rate) => rate,
        _ => return Err(Q13Error::WireFormat),
    };
    next_control(alice)?;

    let fragments_sent = alice.transport_mut().map_or(0, |l| l.fragments_sent())
        + bob.transport_mut().map_or(0, |l| l.fragments_sent());

    let report = ExchangeReport {
        qubits,
        shared: bob.shared_indices().len(),
        sampled: bob.sampled_error_indices().len(),
        efficiency: bob.reconciliation_efficiency().unwrap_or(0.0),
        error_rate,
        initiator_key: alice.final_key()?,
        responder_key: bob.final_key()?,
        fragments_sent,
    };
    info!(
        "exchange done: {} qubits, {} shared, qber {:.3}, key {} bits",
        qubits,
        report.shared,
        error_rate,
        report.responder_key.len()
    );
    Ok(report)
}
