use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;

use q13_core::{Basis, Bit, Q13Error, Q13Result};
use q13_hal::QubitProvider;

fn seeded(seed: Option<u64>) -> ChaCha20Rng {
    match seed {
        Some(s) => ChaCha20Rng::seed_from_u64(s),
        None => ChaCha20Rng::from_seed(rand::thread_rng().gen()),
    }
}

/// A single polarized photon: the bit it encodes and the basis it was prepared in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Photon {
    bit: Bit,
    basis: Basis,
}

/// Noiseless BB84 physics. Measuring in the preparation basis returns the
/// prepared bit; the conjugate basis gives a fair coin.
pub struct IdealPhotons {
    rng: ChaCha20Rng,
}

impl IdealPhotons {
    pub fn new() -> Self {
        Self { rng: seeded(None) }
    }

    pub fn seeded(seed: u64) -> Self {
        Self { rng: seeded(Some(seed)) }
    }
}

impl Default for IdealPhotons {
    fn default() -> Self {
        Self::new()
    }
}

impl QubitProvider for IdealPhotons {
    type Qubit = Photon;

    fn prepare(&mut self, bit: Bit, basis: Basis) -> Q13Result<Photon> {
        Ok(Photon { bit, basis })
    }

    fn measure(&mut self, photon: Photon, basis: Basis) -> Q13Result<Bit> {
        if photon.basis == basis {
            Ok(photon.bit)
        } else {
            Ok(self.rng.gen())
        }
    }
}

/// Bit-flip channel: each measured bit is inverted with probability `p`.
pub struct NoisyPhotons<P> {
    inner: P,
    flip_probability: f64,
    rng: ChaCha20Rng,
    flips: usize,
}

impl<P: QubitProvider> NoisyPhotons<P> {
    pub fn new(inner: P, flip_probability: f64, seed: Option<u64>) -> Q13Result<Self> {
        if !(0.0..=1.0).contains(&flip_probability) {
            return Err(Q13Error::ProviderFailure);
        }
        Ok(Self { inner, flip_probability, rng: seeded(seed), flips: 0 })
    }

    pub fn flips(&self) -> usize {
        self.flips
    }
}

impl<P: QubitProvider> QubitProvider for NoisyPhotons<P> {
    type Qubit = P::Qubit;

    fn prepare(&mut self, bit: Bit, basis: Basis) -> Q13Result<P::Qubit> {
        self.inner.prepare(bit, basis)
    }

    fn measure(&mut self, qubit: P::Qubit, basis: Basis) -> Q13Result<Bit> {
        let bit = self.inner.measure(qubit, basis)?;
        if self.flip_probability > 0.0 && self.rng.gen_bool(self.flip_probability) {
            self.flips += 1;
            return Ok(!bit);
        }
        Ok(bit)
    }
}

/// Intercept-resend eavesdropper in front of a receiver's provider.
/// A fraction `ratio` of qubits is measured in a random basis and re-prepared
/// from the result before the receiver sees it.
pub struct Interceptor<P> {
    inner: P,
    ratio: f64,
    rng: ChaCha20Rng,
    intercepted: usize,
}

impl<P: QubitProvider> Interceptor<P> {
    pub fn new(inner: P, ratio: f64, seed: Option<u64>) -> Q13Result<Self> {
        if !(0.0..=1.0).contains(&ratio) {
            return Err(Q13Error::ProviderFailure);
        }
        Ok(Self { inner, ratio, rng: seeded(seed), intercepted: 0 })
    }

    pub fn intercepted(&self) -> usize {
        self.intercepted
    }
}

impl<P: QubitProvider> QubitProvider for Interceptor<P> {
    type Qubit = P::Qubit;

    fn prepare(&mut self, bit: Bit, basis: Basis) -> Q13Result<P::Qubit> {
        self.inner.prepare(bit, basis)
    }

    fn measure(&mut self, qubit: P::Qubit, basis: Basis) -> Q13Result<Bit> {
        let qubit = if self.ratio > 0.0 && self.rng.gen_bool(self.ratio) {
            self.intercepted += 1;
            let eve_basis = Basis::from_coin(self.rng.gen());
            let seen = self.inner.measure(qubit, eve_basis)?;
            self.inner.prepare(seen, eve_basis)?
        } else {
            qubit
        };
        self.inner.measure(qubit, basis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_basis_is_deterministic() {
        let mut p = IdealPhotons::seeded(3);
        for &(bit, basis) in &[(true, Basis::Z), (false, Basis::X), (true, Basis::X)] {
            let q = p.prepare(bit, basis).unwrap();
            assert_eq!(p.measure(q, basis).unwrap(), bit);
        }
    }

    #[test]
    fn test_conjugate_basis_is_a_coin() {
        let mut p = IdealPhotons::seeded(9);
        let ones = (0..2000)
            .filter(|_| {
                let q = p.prepare(true, Basis::Z).unwrap();
                p.measure(q, Basis::X).unwrap()
            })
            .count();
        assert!((800..1200).contains(&ones), "{} ones", ones);
    }

    #[test]
    fn test_full_noise_always_flips() {
        let mut p = NoisyPhotons::new(IdealPhotons::seeded(1), 1.0, Some(1)).unwrap();
        let q = p.prepare(true, Basis::Z).unwrap();
        assert!(!p.measure(q, Basis::Z).unwrap());
        assert_eq!(p.flips(), 1);
        assert!(NoisyPhotons::new(IdealPhotons::seeded(1), 1.5, None).is_err());
    }

    #[test]
    fn test_interceptor_counts() {
        let mut p = Interceptor::new(IdealPhotons::seeded(5), 1.0, Some(5)).unwrap();
        for _ in 0..10 {
            let q = p.prepare(false, Basis::Z).unwrap();
            p.measure(q, Basis::Z).unwrap();
        }
        assert_eq!(p.intercepted(), 10);
    }
}
