//! Bounds-checked primitives shared by the envelope and payload codecs

use bytes::{Buf, BufMut, BytesMut};

use cogmesh_core::MalformedMessage;

/// Cursor over a received buffer; every read checks the remaining length
pub(crate) struct WireReader<'a> {
    buf: &'a [u8],
}

impl<'a> WireReader<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    pub(crate) fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    fn need(&self, n: usize, what: &str) -> Result<(), MalformedMessage> {
        if self.buf.remaining() < n {
            return Err(MalformedMessage::InvalidPayload(format!(
                "truncated {}: need {} bytes, have {}",
                what,
                n,
                self.buf.remaining()
            )));
        }
        Ok(())
    }

    pub(crate) fn u8(&mut self, what: &str) -> Result<u8, MalformedMessage> {
        self.need(1, what)?;
        Ok(self.buf.get_u8())
    }

    pub(crate) fn u16(&mut self, what: &str) -> Result<u16, MalformedMessage> {
        self.need(2, what)?;
        Ok(self.buf.get_u16())
    }

    pub(crate) fn u32(&mut self, what: &str) -> Result<u32, MalformedMessage> {
        self.need(4, what)?;
        Ok(self.buf.get_u32())
    }

    pub(crate) fn u64(&mut self, what: &str) -> Result<u64, MalformedMessage> {
        self.need(8, what)?;
        Ok(self.buf.get_u64())
    }

    pub(crate) fn f32(&mut self, what: &str) -> Result<f32, MalformedMessage> {
        self.need(4, what)?;
        Ok(self.buf.get_f32())
    }

    /// Like [`f32`](Self::f32) but rejects NaN and infinities
    pub(crate) fn finite_f32(&mut self, what: &str) -> Result<f32, MalformedMessage> {
        let value = self.f32(what)?;
        if !value.is_finite() {
            return Err(MalformedMessage::InvalidPayload(format!(
                "{} is not finite",
                what
            )));
        }
        Ok(value)
    }

    fn utf8(&mut self, len: usize, what: &str) -> Result<String, MalformedMessage> {
        self.need(len, what)?;
        let (text, rest) = self.buf.split_at(len);
        self.buf = rest;
        String::from_utf8(text.to_vec())
            .map_err(|_| MalformedMessage::InvalidPayload(format!("{} is not UTF-8", what)))
    }

    /// `u16` length followed by UTF-8 bytes
    pub(crate) fn str16(&mut self, what: &str) -> Result<String, MalformedMessage> {
        let len = self.u16(what)? as usize;
        self.utf8(len, what)
    }

    /// `u32` length followed by UTF-8 bytes
    pub(crate) fn str32(&mut self, what: &str) -> Result<String, MalformedMessage> {
        let len = self.u32(what)? as usize;
        self.utf8(len, what)
    }

    /// Everything not yet consumed
    pub(crate) fn rest(&mut self) -> &'a [u8] {
        let rest = self.buf;
        self.buf = &[];
        rest
    }

    /// Fail if bytes are left over
    pub(crate) fn finish(self, what: &str) -> Result<(), MalformedMessage> {
        if self.buf.has_remaining() {
            return Err(MalformedMessage::InvalidPayload(format!(
                "{} has {} trailing bytes",
                what,
                self.buf.remaining()
            )));
        }
        Ok(())
    }
}

pub(crate) fn put_str16(buf: &mut BytesMut, value: &str, what: &str) -> Result<(), MalformedMessage> {
    let len = u16::try_from(value.len()).map_err(|_| {
        MalformedMessage::InvalidPayload(format!("{} longer than {} bytes", what, u16::MAX))
    })?;
    buf.put_u16(len);
    buf.put_slice(value.as_bytes());
    Ok(())
}

pub(crate) fn put_str32(buf: &mut BytesMut, value: &str, what: &str) -> Result<(), MalformedMessage> {
    let len = u32::try_from(value.len()).map_err(|_| {
        MalformedMessage::InvalidPayload(format!("{} longer than {} bytes", what, u32::MAX))
    })?;
    buf.put_u32(len);
    buf.put_slice(value.as_bytes());
    Ok(())
}
