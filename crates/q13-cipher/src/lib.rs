#![no_std]
#![forbid(unsafe_code)]

extern crate alloc;
use alloc::vec::Vec;
use q13_core::{Bit, Q13Error, Q13Result};
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Key, Nonce,
};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Bits needed to fill a 256-bit AEAD key.
pub const SESSION_KEY_BITS: usize = 256;

/// A sifted QKD key. Wiped on drop; `Debug` shows only its length.
#[derive(Clone, Default, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct KeyBits(Vec<Bit>);

impl core::fmt::Debug for KeyBits {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "KeyBits(<{} bits>)", self.0.len())
    }
}

impl KeyBits {
    pub fn new(bits: Vec<Bit>) -> Self {
        Self(bits)
    }

    pub fn bits(&self) -> &[Bit] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Key byte for message position `i`: eight bits taken cyclically from
    /// `i * 8`, most significant first. Zero for an empty key.
    fn stream_byte(&self, i: usize) -> u8 {
        if self.0.is_empty() {
            return 0;
        }
        let n = self.0.len();
        (0..8).fold(0u8, |acc, j| (acc << 1) | self.0[(i * 8 + j) % n] as u8)
    }

    /// Packs bits MSB-first into bytes; a trailing partial byte is zero-padded.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.0
            .chunks(8)
            .map(|c| c.iter().enumerate().fold(0u8, |acc, (j, &b)| acc | ((b as u8) << (7 - j))))
            .collect()
    }
}

impl From<Vec<Bit>> for KeyBits {
    fn from(bits: Vec<Bit>) -> Self {
        Self(bits)
    }
}

/// XOR stream transform keyed by the QKD bits. Its own inverse.
pub fn xor_stream(message: &[u8], key: &KeyBits) -> Vec<u8> {
    message
        .iter()
        .enumerate()
        .map(|(i, m)| m ^ key.stream_byte(i))
        .collect()
}

pub fn encrypt(message: &[u8], key: &KeyBits) -> Vec<u8> {
    xor_stream(message, key)
}

pub fn decrypt(ciphertext: &[u8], key: &KeyBits) -> Vec<u8> {
    xor_stream(ciphertext, key)
}

#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SessionKey(pub [u8; 32]);

impl SessionKey {
    /// First 256 QKD bits as an AEAD key.
    pub fn from_bits(key: &KeyBits) -> Q13Result<Self> {
        if key.len() < SESSION_KEY_BITS {
            return Err(Q13Error::KeyTooShort { needed: SESSION_KEY_BITS, got: key.len() });
        }
        let mut bytes = KeyBits::new(key.bits()[..SESSION_KEY_BITS].to_vec()).to_bytes();
        let mut out = [0u8; 32];
        out.copy_from_slice(&bytes);
        bytes.zeroize();
        Ok(Self(out))
    }
}

/// Seals payloads under a QKD-derived key. Nonces are the caller's to manage.
pub struct KeySealer {
    cipher: ChaCha20Poly1305,
}

impl KeySealer {
    pub fn new(key: &SessionKey) -> Self {
        let key_generic = Key::from_slice(&key.0);
        Self { cipher: ChaCha20Poly1305::new(key_generic) }
    }

    pub fn seal(&self, nonce: &[u8; 12], plaintext: &[u8]) -> Q13Result<Vec<u8>> {
        self.cipher
            .encrypt(Nonce::from_slice(nonce), plaintext)
            .map_err(|_| Q13Error::CryptoFailure)
    }

    pub fn open(&self, nonce: &[u8; 12], ciphertext: &[u8]) -> Q13Result<Vec<u8>> {
        self.cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| Q13Error::CryptoFailure)
    }
}
