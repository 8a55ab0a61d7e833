use byteorder::{BigEndian, ByteOrder as _};

use st_types::{Error, Result};

/// A bounds-checked read cursor over an encoded record.
///
/// Each accessor fails with `Corrupt` instead of reading past the end, so a
/// decoder can be written as straight-line code.
pub(crate) struct Cursor<'a> {
    buf: &'a [u8],
}

impl<'a> Cursor<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len()
    }

    fn take(&mut self, n: usize, what: &str) -> Result<&'a [u8]> {
        if self.buf.len() < n {
            return Err(Error::corrupt(format!(
                "truncated record: needed {n} bytes for {what}, had {}",
                self.buf.len()
            )));
        }
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    pub fn u8(&mut self, what: &str) -> Result<u8> {
        Ok(self.take(1, what)?[0])
    }

    pub fn u32(&mut self, what: &str) -> Result<u32> {
        Ok(BigEndian::read_u32(self.take(4, what)?))
    }

    pub fn u64(&mut self, what: &str) -> Result<u64> {
        Ok(BigEndian::read_u64(self.take(8, what)?))
    }

    pub fn i64(&mut self, what: &str) -> Result<i64> {
        Ok(BigEndian::read_i64(self.take(8, what)?))
    }

    /// A `u32` length followed by that many raw bytes.
    pub fn bytes(&mut self, what: &str) -> Result<&'a [u8]> {
        let len = self.u32(what)? as usize;
        self.take(len, what)
    }

    /// A length-prefixed UTF-8 string field.
    pub fn string(&mut self, what: &str) -> Result<String> {
        let raw = self.bytes(what)?;
        std::str::from_utf8(raw)
            .map(str::to_owned)
            .map_err(|_| Error::corrupt(format!("{what} is not valid utf-8")))
    }

    /// Decoding must consume the whole buffer; trailing garbage means the
    /// record was written by something we don't understand.
    pub fn finish(self, what: &str) -> Result<()> {
        if self.buf.is_empty() {
            Ok(())
        } else {
            Err(Error::corrupt(format!(
                "{} trailing bytes after {what}",
                self.buf.len()
            )))
        }
    }
}

/// Append a length-prefixed byte field.
pub(crate) fn put_bytes(out: &mut Vec<u8>, raw: &[u8]) {
    let mut len = [0_u8; 4];
    BigEndian::write_u32(&mut len, raw.len() as u32);
    out.extend_from_slice(&len);
    out.extend_from_slice(raw);
}

pub(crate) fn put_u32(out: &mut Vec<u8>, v: u32) {
    let mut buf = [0_u8; 4];
    BigEndian::write_u32(&mut buf, v);
    out.extend_from_slice(&buf);
}

pub(crate) fn put_u64(out: &mut Vec<u8>, v: u64) {
    let mut buf = [0_u8; 8];
    BigEndian::write_u64(&mut buf, v);
    out.extend_from_slice(&buf);
}

pub(crate) fn put_i64(out: &mut Vec<u8>, v: i64) {
    let mut buf = [0_u8; 8];
    BigEndian::write_i64(&mut buf, v);
    out.extend_from_slice(&buf);
}
