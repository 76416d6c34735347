//! Random-access byte streams over attribute content.
//!
//! A [`LogicalStream`] maps a logical byte range onto cluster runs of the
//! volume. Runs are kept sorted by logical start so translation is a binary
//! search. Sparse runs read back as zeros without touching the device.

use std::io::{self, Read, Seek, SeekFrom};

use log::debug;

use crate::device::ClusterDevice;
use crate::error::{NtfsError, Result};

/// Readable, length-bounded byte stream.
///
/// Reads fail soft: a request reaching past `len()` returns fewer bytes
/// instead of an error. Device failures still propagate.
pub trait ReadStream: Send + Sync {
    fn len(&self) -> u64;

    fn read_at(&self, dest: &mut [u8], offset: u64) -> Result<usize>;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whole content; a short read is reported as a device error.
    fn read_all(&self) -> Result<Vec<u8>> {
        let len = usize::try_from(self.len())
            .map_err(|_| NtfsError::InvalidArgument("stream too large for memory".into()))?;
        let mut out = vec![0u8; len];
        let n = self.read_at(&mut out, 0)?;
        if n != len {
            return Err(NtfsError::DeviceIo(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("stream read returned {n} of {len} bytes"),
            )));
        }
        Ok(out)
    }
}

/// `Read + Seek` view of a [`ReadStream`], for `byteorder` decoding.
pub struct StreamReader<'a, S: ReadStream + ?Sized> {
    stream: &'a S,
    pos: u64,
}

impl<'a, S: ReadStream + ?Sized> StreamReader<'a, S> {
    pub fn new(stream: &'a S) -> Self {
        Self { stream, pos: 0 }
    }
}

impl<S: ReadStream + ?Sized> Read for StreamReader<'_, S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self
            .stream
            .read_at(buf, self.pos)
            .map_err(|e| io::Error::other(e.to_string()))?;
        self.pos += n as u64;
        Ok(n)
    }
}

impl<S: ReadStream + ?Sized> Seek for StreamReader<'_, S> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(p) => Some(p),
            SeekFrom::Current(d) => self.pos.checked_add_signed(d),
            SeekFrom::End(d) => self.stream.len().checked_add_signed(d),
        };
        let Some(target) = target else {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek before start of stream",
            ));
        };
        self.pos = target;
        Ok(target)
    }
}

/// One run of a logical stream, in cluster units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Run {
    pub logical_start: u64,
    /// `None` for a sparse run.
    pub physical_start: Option<u64>,
    pub count: u64,
}

impl Run {
    fn logical_end(&self) -> u64 {
        self.logical_start.saturating_add(self.count)
    }
}

/// Where a logical byte lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockMapping {
    Sparse,
    /// Absolute byte offset on the device.
    Mapped(u64),
}

// Device byte offset of `in_block` inside cluster `lcn + delta`.
fn physical_offset(lcn: u64, delta: u64, cs: u64, in_block: u64) -> Option<u64> {
    lcn.checked_add(delta)?.checked_mul(cs)?.checked_add(in_block)
}

fn overflow(offset: u64) -> NtfsError {
    NtfsError::InvalidArgument(format!("stream offset 0x{offset:X} maps past the addressable device"))
}

/// Logical stream assembled from cluster runs.
#[derive(Debug, Clone)]
pub struct LogicalStream {
    device: ClusterDevice,
    runs: Vec<Run>,
    block_count: u64,
    length: u64,
    // Byte offset of logical 0 inside the first run; non-zero for sub-streams.
    initial_offset: u64,
}

impl LogicalStream {
    pub fn new(device: ClusterDevice) -> Self {
        Self {
            device,
            runs: Vec::new(),
            block_count: 0,
            length: 0,
            initial_offset: 0,
        }
    }

    /// Append `count` clusters at `physical_start` (`None` = sparse).
    pub fn add_run(&mut self, physical_start: Option<u64>, count: u64) {
        if count == 0 {
            return;
        }
        self.runs.push(Run {
            logical_start: self.block_count,
            physical_start,
            count,
        });
        self.block_count = self.block_count.saturating_add(count);
    }

    pub fn add_sparse(&mut self, count: u64) {
        self.add_run(None, count);
    }

    /// Declared byte length; may be less than `block_count * cluster_size`.
    pub fn set_length(&mut self, length: u64) {
        self.length = length;
    }

    pub fn block_count(&self) -> u64 {
        self.block_count
    }

    pub fn runs(&self) -> &[Run] {
        &self.runs
    }

    pub fn cluster_size(&self) -> u64 {
        u64::from(self.device.cluster_size())
    }

    pub fn device(&self) -> &ClusterDevice {
        &self.device
    }

    /// Allocated bytes covered by the runs, from logical 0 of this stream.
    pub fn allocated_length(&self) -> u64 {
        self.block_count
            .saturating_mul(self.cluster_size())
            .saturating_sub(self.initial_offset)
    }

    fn find_run(&self, block: u64) -> Option<&Run> {
        let idx = self.runs.partition_point(|r| r.logical_start <= block);
        let run = self.runs.get(idx.checked_sub(1)?)?;
        (block < run.logical_end()).then_some(run)
    }

    /// Physical location of logical byte `offset`, without reading.
    pub fn translate_to_physical(&self, offset: u64) -> Option<BlockMapping> {
        if offset >= self.length {
            return None;
        }
        let cs = self.cluster_size();
        let pos = self.initial_offset.checked_add(offset)?;
        let block = pos / cs;
        let run = self.find_run(block)?;
        Some(match run.physical_start {
            None => BlockMapping::Sparse,
            Some(lcn) => {
                BlockMapping::Mapped(physical_offset(lcn, block - run.logical_start, cs, pos % cs)?)
            }
        })
    }

    /// New stream covering `[offset, offset + count)` of this one, addressed
    /// from 0. The range is clipped to this stream's length.
    pub fn sub_stream(&self, offset: u64, count: u64) -> LogicalStream {
        let cs = self.cluster_size();
        let mut sub = LogicalStream::new(self.device.clone());
        if offset >= self.length || count == 0 {
            return sub;
        }
        let count = count.min(self.length - offset);
        let start = self.initial_offset.saturating_add(offset);
        let first_block = start / cs;
        let end_block = start.saturating_add(count).div_ceil(cs);

        for run in &self.runs {
            if run.logical_end() <= first_block || run.logical_start >= end_block {
                continue;
            }
            let from = run.logical_start.max(first_block);
            let to = run.logical_end().min(end_block);
            sub.add_run(
                run.physical_start.map(|p| p.saturating_add(from - run.logical_start)),
                to - from,
            );
        }
        sub.initial_offset = start % cs;
        sub.length = count;
        sub
    }
}

impl ReadStream for LogicalStream {
    fn len(&self) -> u64 {
        self.length
    }

    fn read_at(&self, dest: &mut [u8], offset: u64) -> Result<usize> {
        if offset >= self.length {
            return Ok(0);
        }
        let wanted = (dest.len() as u64).min(self.length - offset) as usize;
        let cs = self.cluster_size();
        let mut done = 0usize;

        while done < wanted {
            let pos = self
                .initial_offset
                .checked_add(offset + done as u64)
                .ok_or_else(|| overflow(offset))?;
            let block = pos / cs;
            let in_block = pos % cs;
            let Some(run) = self.find_run(block) else {
                debug!(
                    "Logical block {} lies past the mapped runs ({} blocks).",
                    block, self.block_count
                );
                break;
            };
            let run_bytes_left = (run.logical_end() - block).saturating_mul(cs) - in_block;
            let chunk = usize::try_from(run_bytes_left)
                .map_or(wanted - done, |n| n.min(wanted - done));
            let target = &mut dest[done..done + chunk];

            match run.physical_start {
                None => target.fill(0),
                Some(lcn) => {
                    let phys = physical_offset(lcn, block - run.logical_start, cs, in_block)
                        .ok_or_else(|| overflow(offset))?;
                    let n = self.device.read_at(target, phys)?;
                    if n != chunk {
                        return Err(NtfsError::DeviceIo(io::Error::new(
                            io::ErrorKind::UnexpectedEof,
                            format!("short device read at 0x{phys:X}: {n} of {chunk} bytes"),
                        )));
                    }
                }
            }
            done += chunk;
        }
        Ok(done)
    }
}

/// Content of a resident attribute, copied out of its MFT record.
#[derive(Debug, Clone)]
pub struct ResidentStream {
    data: Vec<u8>,
    // Device byte offset of the value inside the on-disk record, if known.
    physical: Option<u64>,
}

impl ResidentStream {
    pub fn new(data: Vec<u8>, physical: Option<u64>) -> Self {
        Self { data, physical }
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn translate_to_physical(&self, offset: u64) -> Option<BlockMapping> {
        if offset >= self.data.len() as u64 {
            return None;
        }
        self.physical.map(|p| BlockMapping::Mapped(p + offset))
    }
}

impl ReadStream for ResidentStream {
    fn len(&self) -> u64 {
        self.data.len() as u64
    }

    fn read_at(&self, dest: &mut [u8], offset: u64) -> Result<usize> {
        let Ok(start) = usize::try_from(offset) else {
            return Ok(0);
        };
        if start >= self.data.len() {
            return Ok(0);
        }
        let n = dest.len().min(self.data.len() - start);
        dest[..n].copy_from_slice(&self.data[start..start + n]);
        Ok(n)
    }
}

/// Opened attribute content.
#[derive(Debug, Clone)]
pub enum AttributeStream {
    Resident(ResidentStream),
    NonResident(LogicalStream),
}

impl AttributeStream {
    pub fn translate_to_physical(&self, offset: u64) -> Option<BlockMapping> {
        match self {
            AttributeStream::Resident(s) => s.translate_to_physical(offset),
            AttributeStream::NonResident(s) => s.translate_to_physical(offset),
        }
    }

    pub fn is_resident(&self) -> bool {
        matches!(self, AttributeStream::Resident(_))
    }
}

impl ReadStream for AttributeStream {
    fn len(&self) -> u64 {
        match self {
            AttributeStream::Resident(s) => s.len(),
            AttributeStream::NonResident(s) => s.len(),
        }
    }

    fn read_at(&self, dest: &mut [u8], offset: u64) -> Result<usize> {
        match self {
            AttributeStream::Resident(s) => s.read_at(dest, offset),
            AttributeStream::NonResident(s) => s.read_at(dest, offset),
        }
    }
}
