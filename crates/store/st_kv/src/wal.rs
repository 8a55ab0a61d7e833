//! The write-ahead log.
//!
//! Frame format, all integers big-endian:
//!
//! ```text
//! u32 payload_len || payload
//! payload := u32 op_count || op_count × op
//! op      := u8 tag (0 put, 1 delete) || u32 klen || key || [u32 vlen || value]
//! ```
//!
//! Replay stops at the first incomplete or malformed frame and truncates
//! the file there: a crash mid-append loses only the batch that never
//! committed.

use std::fs::{File, OpenOptions};
use std::io::{Read as _, Seek as _, SeekFrom, Write as _};
use std::path::{Path, PathBuf};

use byteorder::{BigEndian, ByteOrder as _};

use st_types::Result;

use crate::Op;

const TAG_PUT: u8 = 0;
const TAG_DELETE: u8 = 1;

pub(crate) struct Wal {
    file: File,
    path: PathBuf,
}

impl Wal {
    /// Opens (creating if needed) the log at `path` and replays every
    /// complete frame into `apply`.
    pub fn open(path: &Path, mut apply: impl FnMut(Op)) -> Result<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(path)?;

        let mut raw = Vec::new();
        file.read_to_end(&mut raw)?;

        let replayed = replay(&raw, &mut apply);
        if replayed < raw.len() {
            st_log::warn!(
                "discarding {} trailing bytes of incomplete write-ahead log at {}",
                raw.len() - replayed,
                path.display()
            );
            file.set_len(replayed as u64)?;
            file.seek(SeekFrom::End(0))?;
        }

        Ok(Self {
            file,
            path: path.to_owned(),
        })
    }

    /// Appends one batch as a single frame and forces it to stable storage.
    pub fn append(&mut self, ops: &[Op]) -> Result<()> {
        let mut payload = Vec::with_capacity(8 + ops.len() * 32);
        put_u32(&mut payload, ops.len() as u32);
        for op in ops {
            match op {
                Op::Put { key, value } => {
                    payload.push(TAG_PUT);
                    put_u32(&mut payload, key.len() as u32);
                    payload.extend_from_slice(key);
                    put_u32(&mut payload, value.len() as u32);
                    payload.extend_from_slice(value);
                }
                Op::Delete { key } => {
                    payload.push(TAG_DELETE);
                    put_u32(&mut payload, key.len() as u32);
                    payload.extend_from_slice(key);
                }
            }
        }

        let mut frame = Vec::with_capacity(4 + payload.len());
        put_u32(&mut frame, payload.len() as u32);
        frame.extend_from_slice(&payload);

        self.file.write_all(&frame)?;
        self.file.sync_data()?;
        Ok(())
    }

    /// Atomically replaces the log with a snapshot of `ops`, dropping all
    /// history. Used after the memtable has been folded.
    pub fn rewrite(&mut self, ops: &[Op]) -> Result<()> {
        let tmp_path = self.path.with_extension("tmp");
        {
            let file = File::create(&tmp_path)?;
            let mut fresh = Self {
                file,
                path: tmp_path.clone(),
            };
            if !ops.is_empty() {
                fresh.append(ops)?;
            }
        }
        std::fs::rename(&tmp_path, &self.path)?;

        self.file = OpenOptions::new().append(true).open(&self.path)?;
        Ok(())
    }

    pub fn size_on_disk(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }
}

fn put_u32(out: &mut Vec<u8>, v: u32) {
    let mut buf = [0_u8; 4];
    BigEndian::write_u32(&mut buf, v);
    out.extend_from_slice(&buf);
}

/// Replays complete frames from `raw`, returning the byte offset of the
/// first incomplete frame (== `raw.len()` for a clean log).
fn replay(raw: &[u8], apply: &mut impl FnMut(Op)) -> usize {
    let mut offset = 0;
    loop {
        match decode_frame(&raw[offset..]) {
            Some((ops, consumed)) => {
                for op in ops {
                    apply(op);
                }
                offset += consumed;
            }
            None => return offset,
        }
    }
}

/// Decodes one frame, returning the ops and the bytes consumed, or `None`
/// if the buffer does not hold a complete well-formed frame.
fn decode_frame(buf: &[u8]) -> Option<(Vec<Op>, usize)> {
    if buf.len() < 4 {
        return None;
    }
    let payload_len = BigEndian::read_u32(&buf[..4]) as usize;
    let payload = buf.get(4..4 + payload_len)?;

    let mut ops = Vec::new();
    let mut at = 0;

    let read_u32 = |payload: &[u8], at: usize| -> Option<(usize, usize)> {
        let raw = payload.get(at..at + 4)?;
        Some((BigEndian::read_u32(raw) as usize, at + 4))
    };

    let (op_count, next) = read_u32(payload, at)?;
    at = next;

    for _ in 0..op_count {
        let tag = *payload.get(at)?;
        at += 1;
        let (klen, next) = read_u32(payload, at)?;
        at = next;
        let key = payload.get(at..at + klen)?.to_vec();
        at += klen;
        match tag {
            TAG_PUT => {
                let (vlen, next) = read_u32(payload, at)?;
                at = next;
                let value = payload.get(at..at + vlen)?.to_vec();
                at += vlen;
                ops.push(Op::Put { key, value });
            }
            TAG_DELETE => ops.push(Op::Delete { key }),
            _ => return None,
        }
    }

    if at != payload_len {
        return None;
    }
    Some((ops, 4 + payload_len))
}
