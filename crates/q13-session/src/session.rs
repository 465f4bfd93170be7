use log::{debug, info, warn};
use rand::seq::index;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;

use q13_core::{Basis, Bit, Q13Error, Q13Result};
use q13_hal::{QubitProvider, Transport};
use q13_packet::Packet;

use crate::control::ControlMessage;
use crate::keys::sift;
use crate::snapshot::SessionSnapshot;
use crate::{Phase, Role, SessionConfig};

/// What a dispatched control packet did to the session.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlOutcome {
    /// Responder matched the peer's bases.
    Reconciled { shared: usize },
    /// Initiator learned which positions matched.
    SharedIndicesAccepted { shared: usize },
    /// Responder compared the peer's sample.
    ErrorEstimated(f64),
    Completed,
}

/// One BB84 run between this node and a single peer.
///
/// Not re-entrant: every mutating call takes `&mut self`, so concurrent use of
/// one session has to be serialized by the owner (e.g. one lock per session).
pub struct Session<P: QubitProvider, T> {
    provider: P,
    transport: Option<T>,
    config: SessionConfig,
    rng: ChaCha20Rng,

    phase: Phase,
    role: Option<Role>,

    sent_bits: Vec<Bit>,
    sent_bases: Vec<Basis>,
    received_bases: Vec<Basis>,
    measurement_outcomes: Vec<Bit>,

    shared_indices: Vec<usize>,
    sampled_error_indices: Vec<usize>,
    efficiency: Option<f64>,
    error_rate: Option<f64>,
    error_history: Vec<f64>,
}

impl<P, T> Session<P, T>
where
    P: QubitProvider,
    T: Transport<P::Qubit>,
{
    pub fn new(provider: P, transport: T, config: SessionConfig) -> Self {
        let mut s = Self::detached(provider, config);
        s.transport = Some(transport);
        s
    }

    /// A session with no link yet. Sending fails with `NoChannel` until [`attach`](Self::attach).
    pub fn detached(provider: P, config: SessionConfig) -> Self {
        let rng = match config.rng_seed {
            Some(seed) => ChaCha20Rng::seed_from_u64(seed),
            None => ChaCha20Rng::from_seed(rand::thread_rng().gen()),
        };

        Self {
            provider,
            transport: None,
            config,
            rng,
            phase: Phase::Idle,
            role: None,
            sent_bits: Vec::new(),
            sent_bases: Vec::new(),
            received_bases: Vec::new(),
            measurement_outcomes: Vec::new(),
            shared_indices: Vec::new(),
            sampled_error_indices: Vec::new(),
            efficiency: None,
            error_rate: None,
            error_history: Vec::new(),
        }
    }

    pub fn attach(&mut self, transport: T) -> Option<T> {
        self.transport.replace(transport)
    }

    pub fn detach(&mut self) -> Option<T> {
        self.transport.take()
    }

    /// Starts over on the same link: all sequences cleared, back to `Idle`.
    /// The error-rate history survives, it spans sessions.
    pub fn reset(&mut self) {
        info!("[{}] session reset (was {})", self.config.local_node, self.phase.name());
        self.phase = Phase::Idle;
        self.role = None;
        self.sent_bits.clear();
        self.sent_bases.clear();
        self.received_bases.clear();
        self.measurement_outcomes.clear();
        self.shared_indices.clear();
        self.sampled_error_indices.clear();
        self.efficiency = None;
        self.error_rate = None;
    }

    // --- phase bookkeeping ---

    fn require(&self, allowed: &[Phase], expected: &'static str) -> Q13Result<()> {
        if allowed.contains(&self.phase) {
            Ok(())
        } else {
            Err(Q13Error::InvalidPhase { expected, actual: self.phase.name() })
        }
    }

    fn advance(&mut self, next: Phase) {
        debug_assert!(next > self.phase, "{:?} -> {:?}", self.phase, next);
        if next != self.phase {
            info!("[{}] {} -> {}", self.config.local_node, self.phase.name(), next.name());
            self.phase = next;
        }
    }

    fn link(&mut self) -> Q13Result<&mut T> {
        self.transport.as_mut().ok_or(Q13Error::NoChannel)
    }

    /// Delivers one control message. Callers commit their state only after
    /// this succeeds, so a failed delivery can be retried from the same phase.
    fn emit(&mut self, msg: ControlMessage) -> Q13Result<()> {
        let packet = msg.to_packet(&self.config.local_node, &self.config.peer_node)?;
        let local = self.config.local_node.clone();
        let link = self.link()?;
        debug!(
            "[{}] control '{}' -> {} ({} bytes, mtu {})",
            local,
            msg.kind(),
            packet.destination,
            packet.size_bytes(),
            link.properties().mtu
        );
        link.deliver_classical(packet).map_err(|e| {
            warn!("[{}] control '{}' not delivered: {}", local, msg.kind(), e);
            e
        })
    }

    // --- initiator ---

    /// Prepares `count` random bit/basis pairs and sends one qubit per pair.
    ///
    /// Without a usable link this fails with `NoChannel` and the phase stays at
    /// `Sending`. A retry is accepted as long as no qubit has left yet.
    pub fn send_qubits(&mut self, count: usize) -> Q13Result<()> {
        self.check_can_send()?;
        let pairs: Vec<(Bit, Basis)> = (0..count)
            .map(|_| (self.rng.gen::<bool>(), Basis::from_coin(self.rng.gen())))
            .collect();
        self.transmit(pairs)
    }

    /// Same as [`send_qubits`](Self::send_qubits) with caller-chosen bits and bases.
    pub fn send_chosen(&mut self, bits: &[Bit], bases: &[Basis]) -> Q13Result<()> {
        if bits.len() != bases.len() {
            return Err(Q13Error::LengthMismatch { left: bits.len(), right: bases.len() });
        }
        self.check_can_send()?;
        self.transmit(bits.iter().copied().zip(bases.iter().copied()).collect())
    }

    fn check_can_send(&self) -> Q13Result<()> {
        match self.phase {
            Phase::Idle => Ok(()),
            Phase::Sending if self.sent_bits.is_empty() => Ok(()),
            _ => Err(Q13Error::InvalidPhase { expected: "idle", actual: self.phase.name() }),
        }
    }

    fn transmit(&mut self, pairs: Vec<(Bit, Basis)>) -> Q13Result<()> {
        if self.phase == Phase::Idle {
            self.advance(Phase::Sending);
        }
        self.role = Some(Role::Initiator);

        let count = pairs.len();
        let local = self.config.local_node.clone();
        for (bit, basis) in pairs {
            let qubit = self.provider.prepare(bit, basis)?;
            self.link()?.send_qubit(qubit).map_err(|e| {
                warn!("[{}] qubit send failed: {}", local, e);
                e
            })?;
            self.sent_bits.push(bit);
            self.sent_bases.push(basis);
        }
        debug_assert_eq!(self.sent_bits.len(), self.sent_bases.len());

        info!("[{}] sent {} qubits to {}", self.config.local_node, count, self.config.peer_node);
        Ok(())
    }

    /// Publishes the preparation bases so the responder can reconcile.
    pub fn announce_bases(&mut self) -> Q13Result<()> {
        self.require(&[Phase::Sending], "sending")?;
        if self.sent_bases.is_empty() {
            return Err(Q13Error::NothingSent);
        }
        self.emit(ControlMessage::Bases(self.sent_bases.clone()))
    }

    pub fn accept_shared_indices(&mut self, indices: Vec<usize>) -> Q13Result<()> {
        self.require(&[Phase::Sending], "sending")?;
        if self.sent_bases.is_empty() {
            return Err(Q13Error::NothingSent);
        }
        let len = self.sent_bases.len();
        if let Some(&index) = indices.iter().find(|&&i| i >= len) {
            return Err(Q13Error::IndexOutOfRange { index, len });
        }

        self.advance(Phase::Reconciling);
        self.efficiency = Some(indices.len() as f64 / len as f64);
        self.shared_indices = indices;
        Ok(())
    }

    /// Draws up to `sample_size` shared positions, publishes their bits and
    /// removes them from the key.
    pub fn sample_for_error_check(&mut self, sample_size: usize) -> Q13Result<Vec<(Bit, usize)>> {
        self.require(&[Phase::Reconciling], "reconciling")?;
        if self.role != Some(Role::Initiator) {
            return Err(Q13Error::InvalidPhase { expected: "reconciling (initiator)", actual: self.phase.name() });
        }
        if self.transport.is_none() {
            return Err(Q13Error::NoChannel);
        }

        let k = sample_size.min(self.shared_indices.len());
        let mut picks = index::sample(&mut self.rng, self.shared_indices.len(), k).into_vec();
        picks.sort_unstable();
        let sampled: Vec<usize> = picks.into_iter().map(|p| self.shared_indices[p]).collect();
        let sample: Vec<(Bit, usize)> = sampled.iter().map(|&i| (self.sent_bits[i], i)).collect();

        self.emit(ControlMessage::ErrorSample(sample.clone()))?;
        self.advance(Phase::ErrorChecking);
        self.sampled_error_indices = sampled;
        Ok(sample)
    }

    pub fn accept_complete(&mut self) -> Q13Result<()> {
        self.require(&[Phase::ErrorChecking], "error_checking")?;
        self.advance(Phase::Complete);
        info!("[{}] key exchange with {} complete", self.config.local_node, self.config.peer_node);
        Ok(())
    }

    // --- responder ---

    pub fn expect_qubits(&mut self, n: usize) -> Q13Result<()> {
        self.require(&[Phase::Idle, Phase::Receiving], "idle|receiving")?;
        self.config.expected_qubits = Some(n);
        if self.phase == Phase::Receiving && self.measurement_outcomes.len() >= n {
            self.advance(Phase::ReadyForReconciliation);
        }
        Ok(())
    }

    /// Measures an inbound qubit in a uniformly random basis.
    pub fn receive_qubit(&mut self, qubit: P::Qubit) -> Q13Result<Bit> {
        let basis = Basis::from_coin(self.rng.gen());
        self.receive_qubit_in(qubit, basis)
    }

    /// Measures an inbound qubit in the given basis.
    pub fn receive_qubit_in(&mut self, qubit: P::Qubit, basis: Basis) -> Q13Result<Bit> {
        self.require(&[Phase::Idle, Phase::Receiving], "idle|receiving")?;
        let expected = self.config.expected_qubits.ok_or(Q13Error::ExpectedCountUnset)?;

        let bit = self.provider.measure(qubit, basis)?;
        if self.phase == Phase::Idle {
            self.advance(Phase::Receiving);
            self.role = Some(Role::Responder);
        }
        self.received_bases.push(basis);
        self.measurement_outcomes.push(bit);
        debug_assert_eq!(self.received_bases.len(), self.measurement_outcomes.len());

        if self.measurement_outcomes.len() >= expected {
            self.advance(Phase::ReadyForReconciliation);
        }
        Ok(bit)
    }

    /// Compares the peer's bases with ours position by position, over the
    /// overlap of both lists, and sends the matching positions back.
    /// Returns the matching positions and our bits at those positions.
    pub fn reconcile_bases(&mut self, peer_bases: &[Basis]) -> Q13Result<(Vec<usize>, Vec<Bit>)> {
        if self.received_bases.is_empty() {
            return Err(Q13Error::NothingReceived);
        }
        self.require(
            &[Phase::Receiving, Phase::ReadyForReconciliation],
            "receiving|ready_for_reconciliation",
        )?;
        if self.transport.is_none() {
            return Err(Q13Error::NoChannel);
        }

        let overlap = peer_bases.len().min(self.received_bases.len());
        let shared: Vec<usize> = (0..overlap)
            .filter(|&i| peer_bases[i] == self.received_bases[i])
            .collect();
        let bits: Vec<Bit> = shared
            .iter()
            .filter_map(|&i| self.measurement_outcomes.get(i).copied())
            .collect();

        self.emit(ControlMessage::SharedBasesIndices(shared.clone()))?;

        self.advance(Phase::Reconciling);
        self.efficiency = Some(if peer_bases.is_empty() {
            0.0
        } else {
            shared.len() as f64 / peer_bases.len() as f64
        });
        self.shared_indices = shared.clone();
        info!(
            "[{}] reconciled {} of {} positions",
            self.config.local_node,
            shared.len(),
            peer_bases.len()
        );
        Ok((shared, bits))
    }

    /// Compares the peer's published `(bit, index)` pairs against our outcomes.
    /// Out-of-range indices are not counted. Zero comparisons give `0.0`.
    /// Only shared positions are withheld from the key.
    pub fn estimate_error_rate(&mut self, sample: &[(Bit, usize)]) -> Q13Result<f64> {
        self.require(&[Phase::Reconciling], "reconciling")?;
        if self.transport.is_none() {
            return Err(Q13Error::NoChannel);
        }

        let mut comparisons = 0usize;
        let mut errors = 0usize;
        let mut sampled = Vec::with_capacity(sample.len());
        for &(bit, i) in sample {
            if let Some(&ours) = self.measurement_outcomes.get(i) {
                comparisons += 1;
                if ours != bit {
                    errors += 1;
                }
                if self.shared_indices.contains(&i) && !sampled.contains(&i) {
                    sampled.push(i);
                }
            }
        }

        let rate = if comparisons == 0 { 0.0 } else { errors as f64 / comparisons as f64 };
        self.emit(ControlMessage::Complete(rate))?;

        self.advance(Phase::ErrorChecking);
        self.sampled_error_indices = sampled;
        self.record_rate(rate);
        info!(
            "[{}] error rate {:.4} ({} / {})",
            self.config.local_node, rate, errors, comparisons
        );
        self.advance(Phase::Complete);
        Ok(rate)
    }

    fn record_rate(&mut self, rate: f64) {
        self.error_rate = Some(rate);
        self.error_history.push(rate);
    }

    // --- control plane ---

    /// Routes one control packet to the operation it asks for.
    pub fn handle_control(&mut self, packet: &Packet) -> Q13Result<ControlOutcome> {
        let msg = ControlMessage::from_packet(packet)?;
        debug!("[{}] control '{}' <- {}", self.config.local_node, msg.kind(), packet.source);

        match msg {
            ControlMessage::Bases(bases) => {
                let (shared, _) = self.reconcile_bases(&bases)?;
                Ok(ControlOutcome::Reconciled { shared: shared.len() })
            }
            ControlMessage::SharedBasesIndices(indices) => {
                let shared = indices.len();
                self.accept_shared_indices(indices)?;
                Ok(ControlOutcome::SharedIndicesAccepted { shared })
            }
            ControlMessage::ErrorSample(sample) => {
                let rate = self.estimate_error_rate(&sample)?;
                Ok(ControlOutcome::ErrorEstimated(rate))
            }
            ControlMessage::Complete(rate) => {
                self.accept_complete()?;
                self.record_rate(rate);
                Ok(ControlOutcome::Completed)
            }
        }
    }

    /// Takes one waiting classical packet off the link and dispatches it.
    /// `Ok(None)` when nothing is waiting.
    pub fn poll_control(&mut self) -> Q13Result<Option<ControlOutcome>> {
        let packet = match self.link()?.receive_classical() {
            Ok(p) => p,
            Err(nb::Error::WouldBlock) => return Ok(None),
            Err(nb::Error::Other(e)) => return Err(e),
        };
        self.handle_control(&packet).map(Some)
    }

    // --- results ---

    /// Shared positions minus sampled ones, read from our own bits
    /// (`sent_bits` for the initiator, outcomes for the responder).
    pub fn final_key(&self) -> Q13Result<Vec<Bit>> {
        self.require(&[Phase::Complete], "complete")?;
        let bits = match self.role {
            Some(Role::Initiator) => &self.sent_bits,
            _ => &self.measurement_outcomes,
        };
        Ok(sift(bits, &self.shared_indices, &self.sampled_error_indices))
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            local_node: self.config.local_node.clone(),
            peer_node: self.config.peer_node.clone(),
            phase: self.phase,
            role: self.role,
            sent_bits: self.sent_bits.clone(),
            sent_bases: self.sent_bases.clone(),
            received_bases: self.received_bases.clone(),
            measurement_outcomes: self.measurement_outcomes.clone(),
            shared_indices: self.shared_indices.clone(),
            sampled_error_indices: self.sampled_error_indices.clone(),
            error_rate: self.error_rate,
            error_history: self.error_history.clone(),
            final_key: self.final_key().ok(),
        }
    }

    pub fn phase(&self) -> Phase { self.phase }
    pub fn role(&self) -> Option<Role> { self.role }
    pub fn config(&self) -> &SessionConfig { &self.config }
    pub fn sent_bits(&self) -> &[Bit] { &self.sent_bits }
    pub fn sent_bases(&self) -> &[Basis] { &self.sent_bases }
    pub fn received_bases(&self) -> &[Basis] { &self.received_bases }
    pub fn measurement_outcomes(&self) -> &[Bit] { &self.measurement_outcomes }
    pub fn shared_indices(&self) -> &[usize] { &self.shared_indices }
    pub fn sampled_error_indices(&self) -> &[usize] { &self.sampled_error_indices }
    pub fn error_rate(&self) -> Option<f64> { self.error_rate }
    pub fn error_history(&self) -> &[f64] { &self.error_history }

    /// Fraction of positions whose bases matched in the last reconciliation.
    pub fn reconciliation_efficiency(&self) -> Option<f64> { self.efficiency }

    pub fn provider_mut(&mut self) -> &mut P { &mut self.provider }
    pub fn transport_mut(&mut self) -> Option<&mut T> { self.transport.as_mut() }
}
