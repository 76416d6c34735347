//! Block sources the decoder reads from.
//!
//! Everything above this module addresses the volume through `Arc<dyn BlockDevice>`
//! with positional reads, so one image can back the MFT store, the bitmap and
//! any number of open streams at once.

use std::io::{self, Read, Seek, SeekFrom};
use std::sync::Arc;

use log::debug;
use parking_lot::Mutex;

use crate::error::{NtfsError, Result};

/// Byte-addressable device with a fixed physical block size.
pub trait BlockDevice: Send + Sync {
    /// Read up to `dest.len()` bytes at `offset`. Returns the number of bytes
    /// read, which is short only at the end of the device.
    fn read_at(&self, dest: &mut [u8], offset: u64) -> io::Result<usize>;

    /// Physical block (sector) size in bytes.
    fn block_size(&self) -> u32;

    /// Total number of blocks.
    fn block_count(&self) -> u64;

    fn len_bytes(&self) -> u64 {
        self.block_count() * u64::from(self.block_size())
    }
}

/// Adapts any `Read + Seek` source (a raw image `File`, an in-memory
/// `Cursor`) into a [`BlockDevice`], optionally restricted to a window
/// starting at `base` (a partition inside a disk image).
#[derive(Debug)]
pub struct SeekDevice<T> {
    inner: Mutex<T>,
    base: u64,
    len: u64,
    block_size: u32,
}

impl<T: Read + Seek + Send> SeekDevice<T> {
    /// Whole source as the device.
    pub fn new(inner: T, block_size: u32) -> io::Result<Self> {
        Self::with_window(inner, block_size, 0, None)
    }

    /// Device starting at `base`; `len` defaults to the rest of the source.
    pub fn with_window(
        mut inner: T,
        block_size: u32,
        base: u64,
        len: Option<u64>,
    ) -> io::Result<Self> {
        if block_size == 0 || !block_size.is_power_of_two() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid block size {block_size}"),
            ));
        }
        let total = inner.seek(SeekFrom::End(0))?;
        if base > total {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("window start 0x{base:X} is past the end of the source (0x{total:X})"),
            ));
        }
        let available = total - base;
        let len = len.map_or(available, |l| l.min(available));
        debug!(
            "Opened device window 0x{:X}+0x{:X} ({} byte blocks).",
            base, len, block_size
        );
        Ok(Self {
            inner: Mutex::new(inner),
            base,
            len,
            block_size,
        })
    }

    pub fn into_inner(self) -> T {
        self.inner.into_inner()
    }
}

impl<T: Read + Seek + Send> BlockDevice for SeekDevice<T> {
    fn read_at(&self, dest: &mut [u8], offset: u64) -> io::Result<usize> {
        if offset >= self.len {
            return Ok(0);
        }
        let wanted = dest.len().min((self.len - offset) as usize);
        let mut inner = self.inner.lock();
        inner.seek(SeekFrom::Start(self.base + offset))?;
        let mut done = 0;
        while done < wanted {
            match inner.read(&mut dest[done..wanted]) {
                Ok(0) => break,
                Ok(n) => done += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(done)
    }

    fn block_size(&self) -> u32 {
        self.block_size
    }

    fn block_count(&self) -> u64 {
        self.len / u64::from(self.block_size)
    }
}

/// Cluster geometry of an NTFS volume layered over its block device.
#[derive(Clone)]
pub struct ClusterDevice {
    device: Arc<dyn BlockDevice>,
    cluster_size: u32,
    sectors_per_cluster: u32,
    cluster_count: u64,
}

impl std::fmt::Debug for ClusterDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterDevice")
            .field("cluster_size", &self.cluster_size)
            .field("sectors_per_cluster", &self.sectors_per_cluster)
            .field("cluster_count", &self.cluster_count)
            .finish()
    }
}

impl ClusterDevice {
    /// `sectors_per_cluster` is in device blocks; it must be a power of two.
    pub fn new(
        device: Arc<dyn BlockDevice>,
        sectors_per_cluster: u32,
        cluster_count: u64,
    ) -> Result<Self> {
        if sectors_per_cluster == 0 || !sectors_per_cluster.is_power_of_two() {
            return Err(NtfsError::InvalidArgument(format!(
                "sectors per cluster {sectors_per_cluster} is not a power of two"
            )));
        }
        let cluster_size = device
            .block_size()
            .checked_mul(sectors_per_cluster)
            .ok_or_else(|| NtfsError::InvalidArgument("cluster size overflows".into()))?;
        Ok(Self {
            device,
            cluster_size,
            sectors_per_cluster,
            cluster_count,
        })
    }

    pub fn device(&self) -> &Arc<dyn BlockDevice> {
        &self.device
    }

    pub fn cluster_size(&self) -> u32 {
        self.cluster_size
    }

    pub fn sector_size(&self) -> u32 {
        self.device.block_size()
    }

    pub fn sectors_per_cluster(&self) -> u32 {
        self.sectors_per_cluster
    }

    pub fn cluster_count(&self) -> u64 {
        self.cluster_count
    }

    /// First device block of `cluster`.
    pub fn cluster_to_block(&self, cluster: u64) -> u64 {
        cluster * u64::from(self.sectors_per_cluster)
    }

    pub fn cluster_offset(&self, cluster: u64) -> u64 {
        cluster * u64::from(self.cluster_size)
    }

    pub fn read_at(&self, dest: &mut [u8], offset: u64) -> Result<usize> {
        Ok(self.device.read_at(dest, offset)?)
    }

    /// Read one whole cluster; a short read is a device error.
    pub fn read_cluster(&self, cluster: u64, dest: &mut [u8]) -> Result<()> {
        if cluster >= self.cluster_count {
            return Err(NtfsError::InvalidArgument(format!(
                "cluster {cluster} beyond volume end ({} clusters)",
                self.cluster_count
            )));
        }
        let size = self.cluster_size as usize;
        if dest.len() < size {
            return Err(NtfsError::InvalidArgument(format!(
                "buffer of {} bytes cannot hold a {size} byte cluster",
                dest.len()
            )));
        }
        let n = self.read_at(&mut dest[..size], self.cluster_offset(cluster))?;
        if n != size {
            return Err(NtfsError::DeviceIo(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("short read of cluster {cluster}: {n} of {size} bytes"),
            )));
        }
        Ok(())
    }
}
