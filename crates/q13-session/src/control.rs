//! BB84 control messages and their packet form.
//!
//! Each message rides in a packet tagged `qkd` with a `type` header naming the
//! message and a binary `data` payload: a big-endian `u32` entry count followed
//! by the entries (bases: 1 byte, indices: `u32`, samples: 1 byte bit + `u32` index).
//! `complete` carries only the measured error rate as a big-endian `f64`.

use q13_core::{Basis, Bit, Q13Error, Q13Result, QKD_PROTOCOL};
use q13_packet::{HeaderValue, Packet};

pub const CONTROL_TYPE: &str = "type";

#[derive(Debug, Clone, PartialEq)]
pub enum ControlMessage {
    Bases(Vec<Basis>),
    SharedBasesIndices(Vec<usize>),
    ErrorSample(Vec<(Bit, usize)>),
    /// Sent by the responder with the error rate it measured.
    Complete(f64),
}

struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Q13Result<&'a [u8]> {
        if self.buf.len() < n {
            return Err(Q13Error::WireFormat);
        }
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    fn u8(&mut self) -> Q13Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> Q13Result<u32> {
        let bytes: [u8; 4] = self.take(4)?.try_into().map_err(|_| Q13Error::WireFormat)?;
        Ok(u32::from_be_bytes(bytes))
    }

    fn f64(&mut self) -> Q13Result<f64> {
        let bytes: [u8; 8] = self.take(8)?.try_into().map_err(|_| Q13Error::WireFormat)?;
        Ok(f64::from_be_bytes(bytes))
    }

    fn bit(&mut self) -> Q13Result<Bit> {
        match self.u8()? {
            0 => Ok(false),
            1 => Ok(true),
            _ => Err(Q13Error::WireFormat),
        }
    }

    fn finish(self) -> Q13Result<()> {
        if self.buf.is_empty() { Ok(()) } else { Err(Q13Error::WireFormat) }
    }
}

fn put_index(out: &mut Vec<u8>, index: usize) -> Q13Result<()> {
    let index = u32::try_from(index).map_err(|_| Q13Error::WireFormat)?;
    out.extend_from_slice(&index.to_be_bytes());
    Ok(())
}

impl ControlMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            ControlMessage::Bases(_) => "bases",
            ControlMessage::SharedBasesIndices(_) => "shared_bases_indices",
            ControlMessage::ErrorSample(_) => "error_sample",
            ControlMessage::Complete(_) => "complete",
        }
    }

    /// Fails with `WireFormat` when a count or index does not fit in a `u32`.
    pub fn encode(&self) -> Q13Result<Vec<u8>> {
        let mut out = Vec::new();
        match self {
            ControlMessage::Bases(bases) => {
                put_index(&mut out, bases.len())?;
                out.extend(bases.iter().map(|b| *b as u8));
            }
            ControlMessage::SharedBasesIndices(indices) => {
                put_index(&mut out, indices.len())?;
                for &i in indices {
                    put_index(&mut out, i)?;
                }
            }
            ControlMessage::ErrorSample(sample) => {
                put_index(&mut out, sample.len())?;
                for &(bit, i) in sample {
                    out.push(bit as u8);
                    put_index(&mut out, i)?;
                }
            }
            ControlMessage::Complete(rate) => out.extend_from_slice(&rate.to_be_bytes()),
        }
        Ok(out)
    }

    pub fn decode(kind: &str, data: &[u8]) -> Q13Result<Self> {
        let mut r = Reader { buf: data };
        let msg = match kind {
            "bases" => {
                let n = r.u32()? as usize;
                let mut bases = Vec::with_capacity(n.min(data.len()));
                for _ in 0..n {
                    bases.push(Basis::from_u8(r.u8()?).ok_or(Q13Error::WireFormat)?);
                }
                ControlMessage::Bases(bases)
            }
            "shared_bases_indices" => {
                let n = r.u32()? as usize;
                let mut indices = Vec::with_capacity(n.min(data.len()));
                for _ in 0..n {
                    indices.push(r.u32()? as usize);
                }
                ControlMessage::SharedBasesIndices(indices)
            }
            "error_sample" => {
                let n = r.u32()? as usize;
                let mut sample = Vec::with_capacity(n.min(data.len()));
                for _ in 0..n {
                    let bit = r.bit()?;
                    sample.push((bit, r.u32()? as usize));
                }
                ControlMessage::ErrorSample(sample)
            }
            "complete" => {
                let rate = r.f64()?;
                if !(0.0..=1.0).contains(&rate) {
                    return Err(Q13Error::WireFormat);
                }
                ControlMessage::Complete(rate)
            }
            other => return Err(Q13Error::UnknownControl(other.to_string())),
        };
        r.finish()?;
        Ok(msg)
    }

    pub fn to_packet(&self, source: &str, destination: &str) -> Q13Result<Packet> {
        let mut packet = Packet::create(self.encode()?, source, destination, QKD_PROTOCOL, None);
        packet.append_header(CONTROL_TYPE, self.kind());
        Ok(packet)
    }

    pub fn from_packet(packet: &Packet) -> Q13Result<Self> {
        if packet.protocol != QKD_PROTOCOL {
            return Err(Q13Error::UnknownControl(packet.protocol.clone()));
        }
        let kind = packet
            .get_header(CONTROL_TYPE)
            .and_then(HeaderValue::as_str)
            .ok_or(Q13Error::WireFormat)?;
        Self::decode(kind, &packet.payload)
    }
}
