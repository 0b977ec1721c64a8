//! Typed payloads carried inside [`CognitiveMessage`](cogmesh_core::CognitiveMessage)s
//!
//! Each payload has a fixed field order and big-endian integers, like the
//! envelope. Strings are length-prefixed UTF-8 (`u16` for names, `u32` for
//! free text); floats are IEEE-754 `f32` bit patterns.
//!
//! | Message kind | Payload |
//! |---|---|
//! | discovery, heartbeat | [`AnnouncePayload`] |
//! | attention-sync | [`AttentionPayload`] |
//! | pattern-share | [`PatternSharePayload`] |
//! | cognitive-state | [`CognitiveStatePayload`] |
//! | command-request, inference-query | [`RequestPayload`] |
//! | membrane-sync | [`MembraneSyncPayload`] |
//! | memory-sync | opaque |

use std::collections::BTreeMap;

use bytes::{BufMut, Bytes, BytesMut};

use cogmesh_core::{
    AgentAddress, AgentId, AttentionState, Capabilities, ECANValues, MalformedMessage, TruthValue,
};

use crate::wire::{WireReader, put_str16, put_str32};

/// Discovery and heartbeat payload: who the sender is and how loaded it is
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnouncePayload {
    pub agent_id: AgentId,
    pub address: AgentAddress,
    pub capabilities: Capabilities,
    pub load_factor: u32,
}

impl AnnouncePayload {
    pub fn encode(&self) -> Result<Bytes, MalformedMessage> {
        let mut buf = BytesMut::with_capacity(16 + self.address.host.len());
        buf.put_u32(self.agent_id.as_u32());
        put_str16(&mut buf, &self.address.host, "hostname")?;
        buf.put_u16(self.address.port);
        buf.put_u32(self.capabilities.bits());
        buf.put_u32(self.load_factor);
        Ok(buf.freeze())
    }

    pub fn decode(data: &[u8]) -> Result<Self, MalformedMessage> {
        let mut reader = WireReader::new(data);
        let agent_id = AgentId::new(reader.u32("agent_id")?);
        let host = reader.str16("hostname")?;
        let port = reader.u16("port")?;
        let capabilities = Capabilities::new(reader.u32("capabilities")?);
        let load_factor = reader.u32("load_factor")?;
        reader.finish("announce payload")?;

        if agent_id.is_broadcast() {
            return Err(MalformedMessage::InvalidPayload(
                "agent id 0 is reserved for broadcast".into(),
            ));
        }

        Ok(Self {
            agent_id,
            address: AgentAddress::new(host, port),
            capabilities,
            load_factor,
        })
    }
}

/// Membrane-sync candidate as carried on the wire
///
/// Structural checks (prime factors, element count) belong to the membrane
/// store; this type only guarantees the bytes were well formed.
#[derive(Debug, Clone, PartialEq)]
pub struct MembraneSyncPayload {
    pub membrane_id: u32,
    pub version: u64,
    pub derived_from: u64,
    pub checksum: u32,
    pub factors: Vec<u32>,
    pub data: Vec<f32>,
}

impl MembraneSyncPayload {
    pub fn encode(&self) -> Result<Bytes, MalformedMessage> {
        let count = u8::try_from(self.factors.len()).map_err(|_| {
            MalformedMessage::InvalidPayload(format!("{} shape factors", self.factors.len()))
        })?;

        let mut buf = BytesMut::with_capacity(25 + 4 * (self.factors.len() + self.data.len()));
        buf.put_u32(self.membrane_id);
        buf.put_u64(self.version);
        buf.put_u64(self.derived_from);
        buf.put_u32(self.checksum);
        buf.put_u8(count);
        for factor in &self.factors {
            buf.put_u32(*factor);
        }
        for value in &self.data {
            buf.put_f32(*value);
        }
        Ok(buf.freeze())
    }

    pub fn decode(data: &[u8]) -> Result<Self, MalformedMessage> {
        let mut reader = WireReader::new(data);
        let membrane_id = reader.u32("membrane_id")?;
        let version = reader.u64("version")?;
        let derived_from = reader.u64("derived_from")?;
        let checksum = reader.u32("checksum")?;
        let count = reader.u8("factor_count")?;
        let factors = (0..count)
            .map(|_| reader.u32("shape factor"))
            .collect::<Result<Vec<_>, _>>()?;

        let rest = reader.rest();
        if rest.len() % 4 != 0 {
            return Err(MalformedMessage::InvalidPayload(format!(
                "membrane data length {} is not a multiple of 4",
                rest.len()
            )));
        }
        let data = rest
            .chunks_exact(4)
            .map(|chunk| f32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect();

        Ok(Self {
            membrane_id,
            version,
            derived_from,
            checksum,
            factors,
            data,
        })
    }
}

/// Attention snapshot exchanged in attention-sync rounds
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AttentionPayload {
    pub timestamp: u32,
    pub patterns: BTreeMap<String, ECANValues>,
}

impl AttentionPayload {
    pub fn encode(&self) -> Result<Bytes, MalformedMessage> {
        let mut buf = BytesMut::with_capacity(8 + self.patterns.len() * 24);
        buf.put_u32(self.timestamp);
        buf.put_u32(self.patterns.len() as u32);
        for (key, values) in &self.patterns {
            put_str16(&mut buf, key, "pattern key")?;
            buf.put_f32(values.sti);
            buf.put_f32(values.lti);
            buf.put_f32(values.vlti);
            buf.put_f32(values.stimulation);
        }
        Ok(buf.freeze())
    }

    pub fn decode(data: &[u8]) -> Result<Self, MalformedMessage> {
        let mut reader = WireReader::new(data);
        let timestamp = reader.u32("timestamp")?;
        let count = reader.u32("pattern count")?;

        let mut patterns = BTreeMap::new();
        for _ in 0..count {
            let key = reader.str16("pattern key")?;
            let values = ECANValues::new(
                reader.finite_f32("sti")?,
                reader.finite_f32("lti")?,
                reader.finite_f32("vlti")?,
                reader.finite_f32("stimulation")?,
            );
            patterns.insert(key, values);
        }
        reader.finish("attention payload")?;

        Ok(Self {
            timestamp,
            patterns,
        })
    }

    /// Rebuild an [`AttentionState`]; totals are recomputed from the patterns
    pub fn into_state(self) -> AttentionState {
        let total_attention = self.patterns.values().map(|v| v.sti).sum();
        let active_patterns = self.patterns.values().filter(|v| v.sti > 0.0).count() as u32;
        AttentionState {
            total_attention,
            active_patterns,
            timestamp: self.timestamp,
            patterns: self.patterns,
        }
    }
}

impl From<&AttentionState> for AttentionPayload {
    fn from(state: &AttentionState) -> Self {
        Self {
            timestamp: state.timestamp,
            patterns: state.patterns.clone(),
        }
    }
}

/// An encoded pattern shared with peers, optionally with its truth value
#[derive(Debug, Clone, PartialEq)]
pub struct PatternSharePayload {
    pub key: String,
    pub encoded: String,
    pub truth: Option<TruthValue>,
}

impl PatternSharePayload {
    pub fn encode(&self) -> Result<Bytes, MalformedMessage> {
        let mut buf = BytesMut::with_capacity(16 + self.key.len() + self.encoded.len());
        put_str16(&mut buf, &self.key, "pattern key")?;
        put_str32(&mut buf, &self.encoded, "encoded pattern")?;
        put_truth(&mut buf, self.truth);
        Ok(buf.freeze())
    }

    pub fn decode(data: &[u8]) -> Result<Self, MalformedMessage> {
        let mut reader = WireReader::new(data);
        let key = reader.str16("pattern key")?;
        let encoded = reader.str32("encoded pattern")?;
        let has_truth = reader.u8("truth flag")? != 0;
        let truth = if has_truth {
            Some(read_truth(&mut reader)?)
        } else {
            None
        };
        reader.finish("pattern-share payload")?;
        Ok(Self {
            key,
            encoded,
            truth,
        })
    }
}

/// Load and attention summary broadcast as cognitive-state
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CognitiveStatePayload {
    pub load_factor: u32,
    pub active_patterns: u32,
    pub total_attention: f32,
    pub membrane_count: u32,
}

impl CognitiveStatePayload {
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(16);
        buf.put_u32(self.load_factor);
        buf.put_u32(self.active_patterns);
        buf.put_f32(self.total_attention);
        buf.put_u32(self.membrane_count);
        buf.freeze()
    }

    pub fn decode(data: &[u8]) -> Result<Self, MalformedMessage> {
        let mut reader = WireReader::new(data);
        let payload = Self {
            load_factor: reader.u32("load_factor")?,
            active_patterns: reader.u32("active_patterns")?,
            total_attention: reader.f32("total_attention")?,
            membrane_count: reader.u32("membrane_count")?,
        };
        reader.finish("cognitive-state payload")?;
        Ok(payload)
    }
}

const FLAG_REPLY: u8 = 0b001;
const FLAG_ERROR: u8 = 0b010;
const FLAG_TRUTH: u8 = 0b100;

/// Request or reply for remote command execution and inference queries
#[derive(Debug, Clone, PartialEq)]
pub struct RequestPayload {
    pub request_id: u32,
    pub is_reply: bool,
    pub is_error: bool,
    /// Capabilities the requester selected the target by
    pub capabilities: Capabilities,
    pub body: String,
    pub truth: Option<TruthValue>,
}

impl RequestPayload {
    pub fn request(request_id: u32, capabilities: Capabilities, body: impl Into<String>) -> Self {
        Self {
            request_id,
            is_reply: false,
            is_error: false,
            capabilities,
            body: body.into(),
            truth: None,
        }
    }

    pub fn reply(request_id: u32, body: impl Into<String>, truth: Option<TruthValue>) -> Self {
        Self {
            request_id,
            is_reply: true,
            is_error: false,
            capabilities: Capabilities::NONE,
            body: body.into(),
            truth,
        }
    }

    pub fn failure(request_id: u32, reason: impl Into<String>) -> Self {
        Self {
            request_id,
            is_reply: true,
            is_error: true,
            capabilities: Capabilities::NONE,
            body: reason.into(),
            truth: None,
        }
    }

    pub fn encode(&self) -> Result<Bytes, MalformedMessage> {
        let mut flags = 0u8;
        if self.is_reply {
            flags |= FLAG_REPLY;
        }
        if self.is_error {
            flags |= FLAG_ERROR;
        }
        if self.truth.is_some() {
            flags |= FLAG_TRUTH;
        }

        let mut buf = BytesMut::with_capacity(21 + self.body.len());
        buf.put_u32(self.request_id);
        buf.put_u8(flags);
        buf.put_u32(self.capabilities.bits());
        put_str32(&mut buf, &self.body, "request body")?;
        if let Some(truth) = self.truth {
            buf.put_f32(truth.strength);
            buf.put_f32(truth.confidence);
        }
        Ok(buf.freeze())
    }

    pub fn decode(data: &[u8]) -> Result<Self, MalformedMessage> {
        let mut reader = WireReader::new(data);
        let request_id = reader.u32("request_id")?;
        let flags = reader.u8("flags")?;
        if flags & !(FLAG_REPLY | FLAG_ERROR | FLAG_TRUTH) != 0 {
            return Err(MalformedMessage::InvalidPayload(format!(
                "unknown request flags {:#04x}",
                flags
            )));
        }
        let capabilities = Capabilities::new(reader.u32("capabilities")?);
        let body = reader.str32("request body")?;
        let truth = if flags & FLAG_TRUTH != 0 {
            Some(TruthValue::new(
                reader.f32("strength")?,
                reader.f32("confidence")?,
            ))
        } else {
            None
        };
        reader.finish("request payload")?;

        Ok(Self {
            request_id,
            is_reply: flags & FLAG_REPLY != 0,
            is_error: flags & FLAG_ERROR != 0,
            capabilities,
            body,
            truth,
        })
    }
}

fn put_truth(buf: &mut BytesMut, truth: Option<TruthValue>) {
    match truth {
        Some(truth) => {
            buf.put_u8(1);
            buf.put_f32(truth.strength);
            buf.put_f32(truth.confidence);
        }
        None => buf.put_u8(0),
    }
}

fn read_truth(reader: &mut WireReader<'_>) -> Result<TruthValue, MalformedMessage> {
    Ok(TruthValue::new(
        reader.f32("strength")?,
        reader.f32("confidence")?,
    ))
}
