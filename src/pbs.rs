// Sources:
// - https://en.wikipedia.org/wiki/NTFS

//! Parse an NTFS Partition-Boot-Sector with std::io::Cursor

use byteorder::{LittleEndian, ReadBytesExt};
use prettytable::{Table, row};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::io::{self, Cursor, Read};

use crate::error::{NtfsError, Result};

pub const BOOT_SECTOR_SIZE: usize = 512;
const MIN_RECORD_SIZE: u32 = 512;
const MAX_RECORD_SIZE: u32 = 64 * 1024;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PartitionBootSector {
    /* -- 0x00-0x0A ------------------------------------------ */
    pub jump_instruction: Vec<u8>, // x86 JMP + NOP
    pub oem_id: [u8; 8],           // "NTFS    "

    /* -- BIOS Parameter Block (BPB) – 0x0B-0x23 ------------- */
    pub bytes_per_sector: u16,   // 0x0B
    pub sectors_per_cluster: u8, // 0x0D
    pub reserved_sectors: u16,   // 0x0E
    pub unused1: [u8; 3],        // 0x10
    pub unused2: u16,            // 0x13
    pub media_descriptor: u8,    // 0x15 (0xF8 = hard disk)
    pub unused3: u16,            // 0x16
    pub sectors_per_track: u16,  // 0x18
    pub number_of_heads: u16,    // 0x1A
    pub hidden_sectors: u32,     // 0x1C
    pub unused4: u32,            // 0x20
    pub unused5: u32,            // 0x24

    /* -- Extended BPB – 0x28-0x53 ---------------------------- */
    pub total_sectors: u64,           // 0x28
    pub mft_cluster: u64,             // 0x30
    pub mft_mirror_cluster: u64,      // 0x38
    pub clusters_per_file_record: i8, // 0x40  (may be negative)
    pub unused6: [u8; 3],
    pub clusters_per_index_buffer: i8, // 0x44
    pub unused7: [u8; 3],
    pub volume_serial_number: u64, // 0x48
    pub checksum: u32,             // 0x50

    /* -- Bootstrap code & signature – 0x54-0x1FF ------------ */
    pub bootstrap_code: Vec<u8>,   // 0x54-0x1FD
    pub end_of_sector_marker: u16, // 0x1FE (0xAA55)
}

impl PartitionBootSector {
    pub const NTFS_OEM_ID: [u8; 8] = *b"NTFS    ";

    /// Parse the 512-byte sector into `PartitionBootSector`
    pub fn from_bytes(buf: &[u8]) -> io::Result<Self> {
        if buf.len() < BOOT_SECTOR_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "Boot sector must be exactly 512 bytes",
            ));
        }
        let mut c = Cursor::new(buf);

        /* helper macros to reduce boilerplate */
        macro_rules! read_array {
            ($len:expr) => {{
                let mut tmp = [0u8; $len];
                c.read_exact(&mut tmp)?;
                tmp
            }};
        }
        macro_rules! read_u16 {
            () => {
                c.read_u16::<LittleEndian>()?
            };
        }
        macro_rules! read_u32 {
            () => {
                c.read_u32::<LittleEndian>()?
            };
        }
        macro_rules! read_u64 {
            () => {
                c.read_u64::<LittleEndian>()?
            };
        }

        Ok(Self {
            jump_instruction: read_array!(3).to_vec(),
            oem_id: read_array!(8),
            bytes_per_sector: read_u16!(),
            sectors_per_cluster: c.read_u8()?,
            reserved_sectors: read_u16!(),
            unused1: read_array!(3),
            unused2: read_u16!(),
            media_descriptor: c.read_u8()?,
            unused3: read_u16!(),
            sectors_per_track: read_u16!(),
            number_of_heads: read_u16!(),
            hidden_sectors: read_u32!(),
            unused4: read_u32!(),
            unused5: read_u32!(),
            total_sectors: read_u64!(),
            mft_cluster: read_u64!(),
            mft_mirror_cluster: read_u64!(),
            clusters_per_file_record: c.read_i8()?,
            unused6: read_array!(3),
            clusters_per_index_buffer: c.read_i8()?,
            unused7: read_array!(3),
            volume_serial_number: read_u64!(),
            checksum: read_u32!(),
            bootstrap_code: read_array!(426).to_vec(),
            end_of_sector_marker: read_u16!(),
        })
    }

    /// Check if the oem_id is valid
    pub fn oem_id_is_valid(&self) -> bool {
        self.oem_id == Self::NTFS_OEM_ID
    }

    /// Reject boot sectors the decoder cannot mount on a device with
    /// `block_size` byte sectors.
    pub fn validate(&self, block_size: u32) -> Result<()> {
        if !self.oem_id_is_valid() {
            return Err(NtfsError::BootSector(format!(
                "OEM identifier is {:?}",
                String::from_utf8_lossy(&self.oem_id)
            )));
        }
        if self.sectors_per_cluster == 0 || !self.sectors_per_cluster.is_power_of_two() {
            return Err(NtfsError::BootSector(format!(
                "sectors per cluster is {}",
                self.sectors_per_cluster
            )));
        }
        if u32::from(self.bytes_per_sector) != block_size {
            return Err(NtfsError::BootSector(format!(
                "sector size {} differs from the device block size {}",
                self.bytes_per_sector, block_size
            )));
        }
        if self.total_sectors == 0 {
            return Err(NtfsError::BootSector("total sector count is zero".into()));
        }
        let record_size = self.file_record_size();
        if !(MIN_RECORD_SIZE..=MAX_RECORD_SIZE).contains(&record_size) {
            return Err(NtfsError::BootSector(format!(
                "file record size field 0x{:02X} decodes to {} bytes",
                self.clusters_per_file_record as u8, record_size
            )));
        }
        Ok(())
    }

    pub fn cluster_size(&self) -> u32 {
        u32::from(self.sectors_per_cluster) * u32::from(self.bytes_per_sector)
    }

    /// Clusters covered by the volume.
    pub fn cluster_count(&self) -> u64 {
        match self.sectors_per_cluster {
            0 => 0,
            spc => self.total_sectors / u64::from(spc),
        }
    }

    /// Byte offset of the first MFT cluster.
    pub fn mft_address(&self) -> u64 {
        self.mft_cluster * u64::from(self.cluster_size())
    }

    // Raw byte above 0x80 encodes 2^(256 - raw) bytes, otherwise a cluster count.
    // None when the size does not fit in 32 bits.
    fn decode_size(&self, raw: i8) -> Option<u32> {
        let raw = raw as u8;
        if raw > 0x80 {
            1u32.checked_shl(256 - u32::from(raw))
        } else {
            u32::from(raw).checked_mul(self.cluster_size())
        }
    }

    /// Compute actual bytes per file-record segment, 0 if the field is
    /// out of range.
    pub fn file_record_size(&self) -> u32 {
        self.decode_size(self.clusters_per_file_record).unwrap_or(0)
    }

    /// Bytes per index allocation node, 0 if the field is out of range.
    pub fn index_record_size(&self) -> u32 {
        self.decode_size(self.clusters_per_index_buffer).unwrap_or(0)
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| json!({}))
    }

    pub fn to_string(&self) -> String {
        let mut t = Table::new();
        t.add_row(row!["Partition Boot Sector"]);
        t.add_row(row![b -> "OEM ID", String::from_utf8_lossy(&self.oem_id)]);
        t.add_row(row![b -> "Bytes per Sector", self.bytes_per_sector]);
        t.add_row(row![b -> "Sectors per Cluster", self.sectors_per_cluster]);
        t.add_row(row![b -> "Cluster Size", self.cluster_size()]);
        t.add_row(row![b -> "Media Descriptor", format!("0x{:02X}", self.media_descriptor)]);
        t.add_row(row![b -> "Total Sectors", self.total_sectors]);
        t.add_row(row![b -> "Cluster Count", self.cluster_count()]);
        t.add_row(row![b -> "$MFT Cluster", format!("0x{:X}", self.mft_cluster)]);
        t.add_row(row![b -> "$MFTMirr Cluster", format!("0x{:X}", self.mft_mirror_cluster)]);
        t.add_row(row![b -> "File Record Size", self.file_record_size()]);
        t.add_row(row![b -> "Index Record Size", self.index_record_size()]);
        t.add_row(row![b -> "Serial Number", format!("0x{:016X}", self.volume_serial_number)]);
        t.add_row(row![b -> "Signature", format!("0x{:04X}", self.end_of_sector_marker)]);
        t.to_string()
    }
}
