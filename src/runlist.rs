//! Mapping-pairs ("run-list") codec used by non-resident attributes.
//!
//! Each run starts with a header byte: the low nibble is the byte width of a
//! signed length field, the high nibble the byte width of a signed offset
//! field relative to the previous run's starting cluster. A zero offset width
//! marks a sparse run. A zero header byte terminates the list.

use crate::error::{NtfsError, Result};

/// One decoded run, still relative to its predecessor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawRun {
    /// Signed delta from the previous run's absolute start (0 when sparse).
    pub offset: i64,
    /// Length in clusters.
    pub length: u64,
    pub sparse: bool,
}

/// Lazy decoder over a mapping-pairs byte array.
///
/// Cloning the decoder (or calling [`RunListDecoder::new`] again) restarts
/// the sequence. After the first error the decoder yields nothing more.
#[derive(Debug, Clone)]
pub struct RunListDecoder<'a> {
    raw: &'a [u8],
    pos: usize,
    done: bool,
}

impl<'a> RunListDecoder<'a> {
    pub fn new(raw: &'a [u8]) -> Self {
        Self {
            raw,
            pos: 0,
            done: false,
        }
    }

    fn fail(&mut self, detail: String) -> Option<Result<RawRun>> {
        self.done = true;
        Some(Err(NtfsError::corrupt(0, format!("run-list: {detail}"))))
    }
}

impl Iterator for RunListDecoder<'_> {
    type Item = Result<RawRun>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        // A list that runs off the end of the attribute without a terminator
        // is treated as terminated there.
        let Some(&header) = self.raw.get(self.pos) else {
            self.done = true;
            return None;
        };
        if header == 0 {
            self.done = true;
            return None;
        }

        let len_width = (header & 0x0F) as usize;
        let ofs_width = (header >> 4) as usize;
        if len_width == 0 || len_width > 8 || ofs_width > 8 {
            return self.fail(format!("bad header byte 0x{header:02X} at {}", self.pos));
        }
        let start = self.pos + 1;
        let end = start + len_width + ofs_width;
        if end > self.raw.len() {
            return self.fail(format!("run at {} truncated", self.pos));
        }

        let length = read_signed(&self.raw[start..start + len_width]);
        if length <= 0 {
            return self.fail(format!("non-positive run length {length} at {}", self.pos));
        }
        let sparse = ofs_width == 0;
        let offset = if sparse {
            0
        } else {
            read_signed(&self.raw[start + len_width..end])
        };
        self.pos = end;

        Some(Ok(RawRun {
            offset,
            length: length as u64,
            sparse,
        }))
    }
}

/// Little-endian, sign-extended integer of 1..=8 bytes.
fn read_signed(bytes: &[u8]) -> i64 {
    let mut value: i64 = 0;
    for (i, b) in bytes.iter().enumerate() {
        value |= (*b as i64) << (8 * i);
    }
    let width = bytes.len();
    if width < 8 && bytes[width - 1] & 0x80 != 0 {
        value |= -1i64 << (8 * width);
    }
    value
}

/// Minimal byte width that round-trips `value` as a signed field.
fn signed_width(value: i64) -> usize {
    (1..=8)
        .find(|w| {
            let shift = 64 - 8 * w;
            if shift == 0 {
                return true;
            }
            (value << shift) >> shift == value
        })
        .unwrap_or(8)
}

/// Encode runs back into mapping pairs, terminator included.
pub fn encode(runs: &[RawRun]) -> Vec<u8> {
    let mut out = Vec::new();
    for run in runs {
        let length = run.length as i64;
        let len_width = signed_width(length);
        let ofs_width = if run.sparse {
            0
        } else {
            signed_width(run.offset)
        };
        out.push(((ofs_width as u8) << 4) | len_width as u8);
        out.extend_from_slice(&length.to_le_bytes()[..len_width]);
        if !run.sparse {
            out.extend_from_slice(&run.offset.to_le_bytes()[..ofs_width]);
        }
    }
    out.push(0);
    out
}

/// Decode a whole run-list into absolute `(start cluster, length)` pairs,
/// `None` marking sparse runs.
pub fn decode_absolute(raw: &[u8]) -> Result<Vec<(Option<u64>, u64)>> {
    let mut out = Vec::new();
    let mut current: i64 = 0;
    for run in RunListDecoder::new(raw) {
        let run = run?;
        if run.sparse {
            out.push((None, run.length));
            continue;
        }
        current = current
            .checked_add(run.offset)
            .filter(|lcn| *lcn >= 0)
            .ok_or_else(|| NtfsError::corrupt(0, "run-list points before cluster 0"))?;
        out.push((Some(current as u64), run.length));
    }
    Ok(out)
}
