//! The `$MFT` stream and fixed-size record reads.

use log::{debug, info};

use crate::device::ClusterDevice;
use crate::error::{NtfsError, Result};
use crate::mft::{AttributeType, FileRecord, RecordRef};
use crate::pbs::PartitionBootSector;
use crate::resolver::RecordResolver;
use crate::stream::{AttributeStream, BlockMapping, LogicalStream, ReadStream};

/// Records the bootstrap view must cover before the real `$DATA` is known.
pub const BOOTSTRAP_RECORDS: u64 = 16;
const MIN_RECORD_SIZE: u32 = 512;

#[derive(Debug)]
pub struct MftStore {
    stream: LogicalStream,
    record_size: u32,
    record_count: u64,
    sector_size: u32,
    record_overhead: u32,
}

impl MftStore {
    /// Store over an already-built `$MFT` stream.
    pub fn open(stream: LogicalStream, record_size: u32, sector_size: u32) -> Result<Self> {
        if record_size < MIN_RECORD_SIZE || !record_size.is_power_of_two() {
            return Err(NtfsError::InvalidArgument(format!(
                "MFT record size {record_size} is not a power of two of at least {MIN_RECORD_SIZE}"
            )));
        }
        if sector_size == 0 || record_size % sector_size != 0 {
            return Err(NtfsError::InvalidArgument(format!(
                "MFT record size {record_size} is not a multiple of the sector size {sector_size}"
            )));
        }
        let record_count = stream.len() / u64::from(record_size);
        if record_count < BOOTSTRAP_RECORDS {
            return Err(NtfsError::InvalidArgument(format!(
                "MFT holds {record_count} records, at least {BOOTSTRAP_RECORDS} required"
            )));
        }
        Ok(Self {
            stream,
            record_size,
            record_count,
            sector_size,
            record_overhead: 0,
        })
    }

    /// Locate `$MFT` from the boot sector: read record 0 through a
    /// hand-built view of the first records, then switch to the stream its
    /// own unnamed `$DATA` describes.
    pub fn bootstrap(device: ClusterDevice, pbs: &PartitionBootSector) -> Result<Self> {
        let record_size = pbs.file_record_size();
        let sector_size = device.sector_size();
        let cluster_size = u64::from(device.cluster_size());

        let bytes = BOOTSTRAP_RECORDS * u64::from(record_size);
        let mut minimal = LogicalStream::new(device.clone());
        minimal.add_run(Some(pbs.mft_cluster), bytes.div_ceil(cluster_size));
        minimal.set_length(bytes);
        let seed = MftStore::open(minimal, record_size, sector_size)?;

        let (stream, overhead) = {
            let record = RecordResolver::new(&seed, None).open(RecordRef::any(0))?;
            let index = record
                .find_attribute(Some(AttributeType::Data), Some(""), None, None)
                .ok_or_else(|| NtfsError::AttributeNotFound("$MFT unnamed $DATA".into()))?;
            match record.open_attribute(index, false)? {
                AttributeStream::NonResident(stream) => (stream, record.base_record().overhead()),
                AttributeStream::Resident(_) => {
                    return Err(NtfsError::corrupt(0, "$MFT $DATA is resident"));
                }
            }
        };

        let mut store = MftStore::open(stream, record_size, sector_size)?;
        store.record_overhead = overhead;
        info!(
            "MFT bootstrapped at cluster 0x{:X}: {} records of {} bytes in {} runs.",
            pbs.mft_cluster,
            store.record_count,
            record_size,
            store.stream.runs().len()
        );
        Ok(store)
    }

    pub fn record_size(&self) -> u32 {
        self.record_size
    }

    pub fn record_count(&self) -> u64 {
        self.record_count
    }

    pub fn sector_size(&self) -> u32 {
        self.sector_size
    }

    /// First-attribute offset plus end marker of record 0.
    pub fn record_overhead(&self) -> u32 {
        self.record_overhead
    }

    pub fn stream(&self) -> &LogicalStream {
        &self.stream
    }

    pub fn device(&self) -> &ClusterDevice {
        self.stream.device()
    }

    /// Device byte offset of record `number`, if it is mapped.
    pub fn record_location(&self, number: u64) -> Option<u64> {
        match self
            .stream
            .translate_to_physical(number.checked_mul(u64::from(self.record_size))?)?
        {
            BlockMapping::Mapped(offset) => Some(offset),
            BlockMapping::Sparse => None,
        }
    }

    /// On-disk bytes of record `number`, fixups not applied.
    pub fn read_record_bytes(&self, number: u64) -> Result<Vec<u8>> {
        if number >= self.record_count {
            return Err(NtfsError::InvalidArgument(format!(
                "record {number} beyond MFT end ({} records)",
                self.record_count
            )));
        }
        let size = self.record_size as usize;
        let mut buf = vec![0u8; size];
        let n = self
            .stream
            .read_at(&mut buf, number * u64::from(self.record_size))?;
        if n != size {
            return Err(NtfsError::DeviceIo(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("record {number}: read {n} of {size} bytes"),
            )));
        }
        Ok(buf)
    }

    /// Read, fixup and decode a record; a non-wildcard reference must match
    /// the stored sequence number.
    pub fn read_raw_record(&self, reference: RecordRef) -> Result<FileRecord> {
        let number = reference.number();
        let mut buf = self.read_record_bytes(number)?;
        let record = FileRecord::decode(&mut buf, number, self.sector_size as usize)?;
        if !reference.is_wildcard() && record.sequence_number() != reference.sequence() {
            return Err(NtfsError::corrupt(
                number,
                format!(
                    "sequence {} does not match reference {}",
                    record.sequence_number(),
                    reference
                ),
            ));
        }
        debug!("MFT record {} read.", reference);
        Ok(record)
    }
}
