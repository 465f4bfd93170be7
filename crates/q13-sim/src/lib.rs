//! In-memory stand-ins for the physical layer: photon sources, channel
//! noise, an intercept-resend eavesdropper and an MTU-limited link.

pub mod exchange;
pub mod link;
pub mod photon;

pub use exchange::{run_exchange, ExchangeReport};
pub use link::MemoryLink;
pub use photon::{IdealPhotons, Interceptor, NoisyPhotons, Photon};
