#![no_std]
#[cfg(feature = "std")]
extern crate std;
extern crate alloc;

use alloc::string::String;

/// Fixed per-packet overhead, modelled on an IPv4 header.
pub const FIXED_HEADER_OVERHEAD: usize = 20;

/// Qubit count used by the CLI on both ends of a link when none is given.
pub const DEFAULT_QUBIT_COUNT: usize = 50;

/// Protocol tag carried by every BB84 control packet.
pub const QKD_PROTOCOL: &str = "qkd";

/// A classical bit. `true` is 1.
pub type Bit = bool;

/// BB84 encoding/measurement basis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum Basis {
    /// Rectilinear (computational) basis.
    Z = 0x00,
    /// Diagonal (Hadamard) basis.
    X = 0x01,
}

impl Basis {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0x00 => Some(Basis::Z),
            0x01 => Some(Basis::X),
            _ => None,
        }
    }

    /// Maps a uniform coin flip onto a basis.
    pub fn from_coin(coin: bool) -> Self {
        if coin { Basis::X } else { Basis::Z }
    }
}

impl core::fmt::Display for Basis {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Basis::Z => f.write_str("Z"),
            Basis::X => f.write_str("X"),
        }
    }
}

pub type Q13Result<T> = Result<T, Q13Error>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Q13Error {
    /// Transport missing or link down.
    NoChannel,
    InvalidPhase { expected: &'static str, actual: &'static str },
    ExpectedCountUnset,
    NothingReceived,
    NothingSent,
    IndexOutOfRange { index: usize, len: usize },
    LengthMismatch { left: usize, right: usize },
    InvalidMtu(usize),
    WireFormat,
    UnknownControl(String),
    KeyTooShort { needed: usize, got: usize },
    CryptoFailure,
    ProviderFailure,
}

impl core::fmt::Display for Q13Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Q13Error::NoChannel => write!(f, "no channel to peer"),
            Q13Error::InvalidPhase { expected, actual } => {
                write!(f, "session in phase {} (expected {})", actual, expected)
            }
            Q13Error::ExpectedCountUnset => write!(f, "expected qubit count not set"),
            Q13Error::NothingReceived => write!(f, "no qubits received yet"),
            Q13Error::NothingSent => write!(f, "no qubits sent yet"),
            Q13Error::IndexOutOfRange { index, len } => {
                write!(f, "index {} out of range for {} qubits", index, len)
            }
            Q13Error::LengthMismatch { left, right } => {
                write!(f, "aligned sequences differ in length ({} vs {})", left, right)
            }
            Q13Error::InvalidMtu(mtu) => {
                write!(f, "mtu {} leaves no room past the {}-byte header", mtu, FIXED_HEADER_OVERHEAD)
            }
            Q13Error::WireFormat => write!(f, "malformed control payload"),
            Q13Error::UnknownControl(kind) => write!(f, "unknown control type '{}'", kind),
            Q13Error::KeyTooShort { needed, got } => {
                write!(f, "key has {} bits, {} required", got, needed)
            }
            Q13Error::CryptoFailure => write!(f, "{:?}", self),
            Q13Error::ProviderFailure => write!(f, "{:?}", self),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Q13Error {}
