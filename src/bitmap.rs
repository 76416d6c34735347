//! Cluster allocation bitmap (`$Bitmap`, also used for `$MFT:$BITMAP` and
//! index allocation bitmaps).
//!
//! Bits are read through a small cache window that is refilled on a miss.
//! Run queries scan whole bytes where they can.

use log::{debug, warn};
use parking_lot::Mutex;

use crate::error::Result;
use crate::stream::ReadStream;

pub const DEFAULT_CACHE_SIZE: usize = 512;

#[derive(Debug, Default)]
struct Window {
    start: u64,
    data: Vec<u8>,
}

pub struct AllocationBitmap {
    stream: Box<dyn ReadStream>,
    bit_count: u64,
    cache_size: usize,
    window: Mutex<Window>,
}

impl std::fmt::Debug for AllocationBitmap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AllocationBitmap")
            .field("bit_count", &self.bit_count)
            .field("cache_size", &self.cache_size)
            .finish()
    }
}

impl AllocationBitmap {
    /// Bitmap of `bit_count` bits over `stream`. A stream too short for the
    /// requested bit count is clamped to what it holds.
    pub fn new(stream: Box<dyn ReadStream>, bit_count: u64, cache_size: usize) -> Self {
        let available = stream.len().saturating_mul(8);
        let bit_count = if bit_count > available {
            warn!(
                "Bitmap stream holds {} bits, {} requested; clamping.",
                available, bit_count
            );
            available
        } else {
            bit_count
        };
        Self {
            stream,
            bit_count,
            cache_size: cache_size.max(1),
            window: Mutex::new(Window::default()),
        }
    }

    pub fn bit_count(&self) -> u64 {
        self.bit_count
    }

    /// Bytes held by the read-ahead window.
    pub fn cache_size(&self) -> usize {
        self.cache_size
    }

    // Byte `index` of the bitmap, refilling the window on a miss.
    fn byte(&self, window: &mut Window, index: u64) -> Result<u8> {
        let end = window.start + window.data.len() as u64;
        if index < window.start || index >= end {
            let size = self.cache_size as u64;
            let start = index / size * size;
            let len = size.min(self.stream.len().saturating_sub(start)) as usize;
            let mut data = vec![0u8; len];
            let n = self.stream.read_at(&mut data, start)?;
            data.truncate(n);
            debug!("Bitmap window refilled at byte 0x{:X} ({} bytes).", start, n);
            window.start = start;
            window.data = data;
        }
        Ok(window
            .data
            .get((index - window.start) as usize)
            .copied()
            .unwrap_or(0))
    }

    fn bit(&self, window: &mut Window, index: u64) -> Result<bool> {
        let byte = self.byte(window, index / 8)?;
        Ok(byte & (1 << (index % 8)) != 0)
    }

    /// Whether bit `index` is set; false past the end.
    pub fn get_bit(&self, index: u64) -> Result<bool> {
        if index >= self.bit_count {
            return Ok(false);
        }
        let mut window = self.window.lock();
        self.bit(&mut window, index)
    }

    /// Length of the run of equal bits starting at `start`, at most
    /// `max_run`, together with the value of those bits. A length of 0 means
    /// `start` is past the end.
    pub fn get_run(&self, start: u64, max_run: u64) -> Result<(u64, bool)> {
        if start >= self.bit_count || max_run == 0 {
            return Ok((0, false));
        }
        let limit = self.bit_count.min(start.saturating_add(max_run));
        let mut window = self.window.lock();
        let value = self.bit(&mut window, start)?;
        let full = if value { 0xFF } else { 0x00 };

        let mut pos = start + 1;
        while pos < limit {
            if pos % 8 == 0 && pos + 8 <= limit && self.byte(&mut window, pos / 8)? == full {
                pos += 8;
                continue;
            }
            if self.bit(&mut window, pos)? != value {
                break;
            }
            pos += 1;
        }
        Ok((pos - start, value))
    }

    /// `(bits set, bits clear)` over the whole bitmap.
    pub fn summary(&self) -> Result<(u64, u64)> {
        let mut set = 0;
        let mut unset = 0;
        let mut pos = 0;
        while pos < self.bit_count {
            let (len, value) = self.get_run(pos, self.bit_count - pos)?;
            if len == 0 {
                break;
            }
            if value {
                set += len;
            } else {
                unset += len;
            }
            pos += len;
        }
        Ok((set, unset))
    }

    /// First position at or after `start` whose bit equals `value`.
    pub fn get_next(&self, value: bool, start: u64) -> Result<Option<u64>> {
        let mut pos = start;
        while pos < self.bit_count {
            let (len, found) = self.get_run(pos, self.bit_count - pos)?;
            if len == 0 {
                break;
            }
            if found == value {
                return Ok(Some(pos));
            }
            pos += len;
        }
        Ok(None)
    }

    /// Every run of clear bits as `(start, length)`.
    pub fn clear_runs(&self) -> Result<Vec<(u64, u64)>> {
        let mut out = Vec::new();
        let mut pos = 0;
        while pos < self.bit_count {
            let (len, value) = self.get_run(pos, self.bit_count - pos)?;
            if len == 0 {
                break;
            }
            if !value {
                out.push((pos, len));
            }
            pos += len;
        }
        Ok(out)
    }
}
