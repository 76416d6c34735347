// Sources:
// - https://dubeyko.com/development/FileSystems/NTFS/ntfsdoc.pdf
// - https://en.wikipedia.org/wiki/NTFS

use byteorder::{LittleEndian, ReadBytesExt};
use chrono::{TimeZone, Utc};
use log::{debug, error};
use prettytable::{Table, row};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::fmt;
use std::io::{self, Cursor, Read};

use crate::error::{NtfsError, Result};
use crate::fixup;

pub const FILE_SIGNATURE: &[u8; 4] = b"FILE";
pub const RECORD_IN_USE: u16 = 0x0001;
pub const RECORD_IS_DIRECTORY: u16 = 0x0002;
const HEADER_LEN: usize = 0x30;
const END_MARKER: u32 = 0xFFFF_FFFF;

/// 48-bit record number + 16-bit sequence number. Sequence 0 matches any
/// sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize, Serialize)]
pub struct RecordRef(u64);

impl RecordRef {
    pub const NUMBER_MASK: u64 = 0x0000_FFFF_FFFF_FFFF;

    pub fn new(number: u64, sequence: u16) -> Self {
        Self((number & Self::NUMBER_MASK) | (u64::from(sequence) << 48))
    }

    /// Reference that matches `number` whatever its sequence.
    pub fn any(number: u64) -> Self {
        Self::new(number, 0)
    }

    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u64 {
        self.0
    }

    pub fn number(self) -> u64 {
        self.0 & Self::NUMBER_MASK
    }

    pub fn sequence(self) -> u16 {
        (self.0 >> 48) as u16
    }

    pub fn is_wildcard(self) -> bool {
        self.sequence() == 0
    }
}

impl fmt::Display for RecordRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.number(), self.sequence())
    }
}

/// Header found at the very beginning of every **FILE** record (offset 0).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FileRecordHeader {
    pub signature: [u8; 4],
    pub usa_offset: u16,
    pub usa_count: u16,
    pub lsn: u64,
    pub sequence_number: u16,
    pub hard_link_count: u16,
    pub attrs_offset: u16,
    pub flags: u16,
    pub bytes_in_use: u32,
    pub bytes_allocated: u32,
    pub base_file_record: u64,
    pub next_attr_id: u16,
}

impl FileRecordHeader {
    fn parse(buf: &[u8]) -> io::Result<Self> {
        let mut cursor = Cursor::new(buf);
        let mut signature = [0u8; 4];
        cursor.read_exact(&mut signature)?;
        Ok(Self {
            signature,
            usa_offset: cursor.read_u16::<LittleEndian>()?,
            usa_count: cursor.read_u16::<LittleEndian>()?,
            lsn: cursor.read_u64::<LittleEndian>()?,
            sequence_number: cursor.read_u16::<LittleEndian>()?,
            hard_link_count: cursor.read_u16::<LittleEndian>()?,
            attrs_offset: cursor.read_u16::<LittleEndian>()?,
            flags: cursor.read_u16::<LittleEndian>()?,
            bytes_in_use: cursor.read_u32::<LittleEndian>()?,
            bytes_allocated: cursor.read_u32::<LittleEndian>()?,
            base_file_record: cursor.read_u64::<LittleEndian>()?,
            next_attr_id: cursor.read_u16::<LittleEndian>()?,
        })
    }

    pub fn base_reference(&self) -> RecordRef {
        RecordRef::from_raw(self.base_file_record)
    }
}

/// Common header part for resident & non‑resident attributes.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AttributeHeaderCommon {
    pub attr_type: AttributeType,
    /// Offset of the attribute inside its record.
    pub offset: u32,
    pub length: u32,
    pub non_resident: bool,
    pub name_length: u8,
    pub name_offset: u16,
    pub flags: u16,
    pub id: u16,
    pub name: Option<String>,
}

/// Additional 8‑byte header present only when the attribute is resident
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ResidentHeader {
    pub value_length: u32,
    pub value_offset: u16,
    pub resident_flags: u8, // 1 = indexed
}

/// Additional header present only when the attribute is non‑resident
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NonResidentHeader {
    pub lowest_vcn: u64,
    pub highest_vcn: u64,
    pub mapping_pairs_offset: u16,
    pub compression_unit: u16,
    pub allocated_size: u64,
    pub real_size: u64,
    pub initialized_size: u64,
}

/// A single attribute (header + raw value bytes or run-list).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub enum Attribute {
    Resident {
        header: AttributeHeaderCommon,
        resident: ResidentHeader,
        value: Vec<u8>,
    },
    NonResident {
        header: AttributeHeaderCommon,
        non_resident: NonResidentHeader,
        run_list: Vec<u8>,
    },
}

impl Attribute {
    pub const FLAG_COMPRESSION_MASK: u16 = 0x00FF;
    pub const FLAG_ENCRYPTED: u16 = 0x4000;
    pub const FLAG_SPARSE: u16 = 0x8000;

    pub fn header(&self) -> &AttributeHeaderCommon {
        match self {
            Attribute::Resident { header, .. } | Attribute::NonResident { header, .. } => header,
        }
    }

    pub fn attr_type(&self) -> AttributeType {
        self.header().attr_type
    }

    pub fn name(&self) -> &str {
        self.header().name.as_deref().unwrap_or("")
    }

    pub fn id(&self) -> u16 {
        self.header().id
    }

    pub fn is_resident(&self) -> bool {
        matches!(self, Attribute::Resident { .. })
    }

    pub fn is_compressed(&self) -> bool {
        !self.is_resident() && self.header().flags & Self::FLAG_COMPRESSION_MASK != 0
    }

    pub fn is_encrypted(&self) -> bool {
        self.header().flags & Self::FLAG_ENCRYPTED != 0
    }

    /// Logical size of the content.
    pub fn data_size(&self) -> u64 {
        match self {
            Attribute::Resident { resident, .. } => u64::from(resident.value_length),
            Attribute::NonResident { non_resident, .. } => non_resident.real_size,
        }
    }

    pub fn matches(&self, attr_type: AttributeType, name: &str, id: u16) -> bool {
        self.attr_type() == attr_type && self.name() == name && self.id() == id
    }
}

/// Represents an Alternate Data Stream (named $DATA attribute).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DataStream {
    pub name: String,
    pub size: u64,
    pub resident: bool,
}

/// A decoded MFT record, fixups applied.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FileRecord {
    pub number: u64,
    pub header: FileRecordHeader,
    pub attributes: Vec<Attribute>,
}

impl FileRecord {
    /// Decode record `number` from its on-disk bytes. `buf` is the whole
    /// record (its allocated size); fixups are applied in place.
    pub fn decode(buf: &mut [u8], number: u64, sector_size: usize) -> Result<Self> {
        if buf.len() < HEADER_LEN {
            return Err(NtfsError::corrupt(number, "record shorter than its header"));
        }
        let header =
            FileRecordHeader::parse(buf).map_err(|e| NtfsError::corrupt(number, e.to_string()))?;
        if &header.signature != FILE_SIGNATURE {
            error!(
                "Record {} signature is not 'FILE', found: {}",
                number,
                String::from_utf8_lossy(&header.signature)
            );
            return Err(NtfsError::corrupt(number, "record signature is not 'FILE'"));
        }

        fixup::apply(
            buf,
            sector_size,
            header.usa_offset as usize,
            header.usa_count as usize,
        )
        .map_err(|e| NtfsError::corrupt(number, e.to_string()))?;

        let used = header.bytes_in_use as usize;
        let start = header.attrs_offset as usize;
        if used > buf.len() || start < HEADER_LEN || start >= used {
            return Err(NtfsError::corrupt(
                number,
                format!(
                    "attributes at 0x{:X} do not fit {} used bytes of {}",
                    start,
                    used,
                    buf.len()
                ),
            ));
        }

        let mut attributes = Vec::new();
        let mut pos = start;
        loop {
            if pos + 4 > used {
                break;
            }
            let code = u32::from_le_bytes([buf[pos], buf[pos + 1], buf[pos + 2], buf[pos + 3]]);
            if code == END_MARKER {
                break;
            }
            let attr = parse_attribute(&buf[..used], pos)
                .map_err(|e| NtfsError::corrupt(number, format!("attribute at 0x{pos:X}: {e}")))?;
            pos += attr.header().length as usize;
            attributes.push(attr);
        }
        debug!(
            "Decoded record {} ({} attributes, seq {}).",
            number,
            attributes.len(),
            header.sequence_number
        );

        Ok(FileRecord {
            number,
            header,
            attributes,
        })
    }

    pub fn sequence_number(&self) -> u16 {
        self.header.sequence_number
    }

    pub fn reference(&self) -> RecordRef {
        RecordRef::new(self.number, self.header.sequence_number)
    }

    pub fn base_reference(&self) -> RecordRef {
        self.header.base_reference()
    }

    pub fn is_in_use(&self) -> bool {
        self.header.flags & RECORD_IN_USE != 0
    }

    pub fn is_dir(&self) -> bool {
        self.header.flags & RECORD_IS_DIRECTORY != 0
    }

    /// Offset of the first attribute plus the end marker.
    pub fn overhead(&self) -> u32 {
        u32::from(self.header.attrs_offset) + 8
    }

    pub fn find(&self, attr_type: AttributeType, name: &str, id: u16) -> Option<(usize, &Attribute)> {
        self.attributes
            .iter()
            .enumerate()
            .find(|(_, a)| a.matches(attr_type, name, id))
    }

    /// List every $FILE_NAME attribute found in this record.
    pub fn file_names(&self) -> Vec<FileNameAttr> {
        self.attributes
            .iter()
            .filter_map(|a| {
                if let Attribute::Resident { value, header, .. } = a {
                    (header.attr_type == AttributeType::FileName)
                        .then(|| FileNameAttr::parse(value))
                } else {
                    None
                }
            })
            .flatten()
            .collect()
    }

    pub fn standard_information(&self) -> Option<StandardInformation> {
        self.attributes.iter().find_map(|a| {
            if let Attribute::Resident { value, header, .. } = a {
                if header.attr_type == AttributeType::StandardInformation {
                    return StandardInformation::from_bytes(value);
                }
            }
            None
        })
    }

    /// Header overview table.
    pub fn header_table(&self) -> String {
        let mut hdr = Table::new();
        hdr.add_row(row!["MFT Entry Header Values"]);
        hdr.add_row(row![b -> "Record", self.number]);
        hdr.add_row(row![b -> "Sequence", self.header.sequence_number]);
        hdr.add_row(row![b -> "$LogFile Sequence Number", self.header.lsn]);
        hdr.add_row(row![b -> "Flags", record_flags_to_string(self.header.flags)]);
        hdr.add_row(row![b -> "Links", self.header.hard_link_count]);
        hdr.add_row(row![b -> "Base Record", self.base_reference()]);
        hdr.to_string()
    }
}

/// Named `$DATA` streams table.
pub fn ads_table(streams: &[DataStream]) -> String {
    let mut t = Table::new();
    t.add_row(row!["Alternate Data Streams"]);
    t.add_row(row![b -> "Name", "Size", "Resident"]);
    for s in streams {
        t.add_row(row![s.name, s.size, if s.resident { "Yes" } else { "No" }]);
    }
    t.to_string()
}

/// Attribute overview table; rows carry the record each attribute lives in.
pub fn attributes_table<'a>(attrs: impl Iterator<Item = (u64, &'a Attribute)>) -> String {
    let mut t = Table::new();
    t.add_row(row!["Attributes", "Name", "Status", "Size", "Record"]);
    for (record, a) in attrs {
        let status = match (a.is_resident(), a.is_compressed(), a.is_encrypted()) {
            (true, _, _) => "Resident",
            (false, true, _) => "Non‑resident (compressed)",
            (false, false, true) => "Non‑resident (encrypted)",
            (false, false, false) => "Non‑resident",
        };
        let name = if a.name().is_empty() { "N/A" } else { a.name() };
        t.add_row(row![
            format!("{:?} (0x{:X}‑#{})", a.attr_type(), a.attr_type().code(), a.id()),
            name,
            status,
            a.data_size(),
            record
        ]);
    }
    t.to_string()
}

pub fn file_names_table(names: &[FileNameAttr]) -> String {
    let mut t = Table::new();
    t.add_row(row!["$FILE_NAME Attributes"]);
    for fname in names {
        t.add_row(row![b -> "Name", fname.name.clone()]);
        t.add_row(row![b -> "Namespace", namespace_to_string(fname.namespace)]);
        t.add_row(row![b -> "Parent MFT", format!("{} (seq {})", fname.parent_ref, fname.parent_seq)]);
        t.add_row(row![b -> "Allocated", fname.allocated_size]);
        t.add_row(row![b -> "Actual", fname.real_size]);
        t.add_row(row!["Flags", si_flags_to_string(fname.flags)]);
        t.add_row(row![b -> "Timestamps", ""]);
        t.add_row(row!["‑ Created", fname.created]);
        t.add_row(row!["‑ Modified", fname.modified]);
        t.add_row(row!["‑ MFT Mod", fname.mft_modified]);
        t.add_row(row!["‑ Accessed", fname.accessed]);
        t.add_row(row!["", ""]);
    }
    t.to_string()
}

fn invalid(msg: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.into())
}

fn utf16_name(raw: &[u8]) -> Option<String> {
    String::from_utf16(
        &raw.chunks_exact(2)
            .map(|b| u16::from_le_bytes([b[0], b[1]]))
            .collect::<Vec<_>>(),
    )
    .ok()
}

// `buf` ends at the record's used size; `start` is the attribute offset.
fn parse_attribute(buf: &[u8], start: usize) -> io::Result<Attribute> {
    if start + 0x10 > buf.len() {
        return Err(invalid("header truncated"));
    }
    let mut cursor = Cursor::new(&buf[start..]);
    let attr_type = AttributeType::from_code(cursor.read_u32::<LittleEndian>()?);
    let length = cursor.read_u32::<LittleEndian>()?;
    let non_resident = cursor.read_u8()? != 0;
    let name_length = cursor.read_u8()?;
    let name_offset = cursor.read_u16::<LittleEndian>()?;
    let flags = cursor.read_u16::<LittleEndian>()?;
    let id = cursor.read_u16::<LittleEndian>()?;

    let min_len = if non_resident { 0x40 } else { 0x18 };
    if (length as usize) < min_len || start + length as usize > buf.len() {
        return Err(invalid(format!("length {length} out of bounds")));
    }
    let attr = &buf[start..start + length as usize];

    let name = if name_length > 0 {
        let from = name_offset as usize;
        let to = from + name_length as usize * 2;
        let raw = attr
            .get(from..to)
            .ok_or_else(|| invalid("name outside attribute"))?;
        Some(utf16_name(raw).ok_or_else(|| invalid("name is not UTF-16"))?)
    } else {
        None
    };

    let common = AttributeHeaderCommon {
        attr_type,
        offset: start as u32,
        length,
        non_resident,
        name_length,
        name_offset,
        flags,
        id,
        name,
    };

    if !non_resident {
        let value_length = cursor.read_u32::<LittleEndian>()?;
        let value_offset = cursor.read_u16::<LittleEndian>()?;
        let resident_flags = cursor.read_u8()?;
        let from = value_offset as usize;
        let value = attr
            .get(from..from + value_length as usize)
            .ok_or_else(|| invalid("resident value outside attribute"))?
            .to_vec();
        Ok(Attribute::Resident {
            header: common,
            resident: ResidentHeader {
                value_length,
                value_offset,
                resident_flags,
            },
            value,
        })
    } else {
        let lowest_vcn = cursor.read_u64::<LittleEndian>()?;
        let highest_vcn = cursor.read_u64::<LittleEndian>()?;
        let mapping_pairs_offset = cursor.read_u16::<LittleEndian>()?;
        let compression_unit = cursor.read_u16::<LittleEndian>()?;
        cursor.read_u32::<LittleEndian>()?;
        let allocated_size = cursor.read_u64::<LittleEndian>()?;
        let real_size = cursor.read_u64::<LittleEndian>()?;
        let initialized_size = cursor.read_u64::<LittleEndian>()?;
        let run_list = attr
            .get(mapping_pairs_offset as usize..)
            .ok_or_else(|| invalid("run-list outside attribute"))?
            .to_vec();
        Ok(Attribute::NonResident {
            header: common,
            non_resident: NonResidentHeader {
                lowest_vcn,
                highest_vcn,
                mapping_pairs_offset,
                compression_unit,
                allocated_size,
                real_size,
                initialized_size,
            },
            run_list,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum AttributeType {
    StandardInformation,
    AttributeList,
    FileName,
    ObjectId,
    SecurityDescriptor,
    VolumeName,
    VolumeInformation,
    Data,
    IndexRoot,
    IndexAllocation,
    Bitmap,
    ReparsePoint,
    EaInformation,
    Ea,
    PropertySet,
    LoggedUtilityStream,
    Other(u32),
}

impl AttributeType {
    pub fn from_code(value: u32) -> Self {
        use AttributeType::*;
        match value {
            0x10 => StandardInformation,
            0x20 => AttributeList,
            0x30 => FileName,
            0x40 => ObjectId,
            0x50 => SecurityDescriptor,
            0x60 => VolumeName,
            0x70 => VolumeInformation,
            0x80 => Data,
            0x90 => IndexRoot,
            0xA0 => IndexAllocation,
            0xB0 => Bitmap,
            0xC0 => ReparsePoint,
            0xD0 => EaInformation,
            0xE0 => Ea,
            0xF0 => PropertySet,
            0x100 => LoggedUtilityStream,
            other => Other(other),
        }
    }

    pub fn code(self) -> u32 {
        use AttributeType::*;
        match self {
            StandardInformation => 0x10,
            AttributeList => 0x20,
            FileName => 0x30,
            ObjectId => 0x40,
            SecurityDescriptor => 0x50,
            VolumeName => 0x60,
            VolumeInformation => 0x70,
            Data => 0x80,
            IndexRoot => 0x90,
            IndexAllocation => 0xA0,
            Bitmap => 0xB0,
            ReparsePoint => 0xC0,
            EaInformation => 0xD0,
            Ea => 0xE0,
            PropertySet => 0xF0,
            LoggedUtilityStream => 0x100,
            Other(code) => code,
        }
    }
}

/// NTFS FILETIME (100ns ticks since 1601) as an RFC 3339 string.
pub fn filetime_to_rfc3339(ft: u64) -> String {
    let micros_since_1601 = (ft / 10) as i64;
    const DELTA_MICROS: i64 = 11_644_473_600_000_000;
    let unix_micros = micros_since_1601 - DELTA_MICROS;
    let secs = unix_micros.div_euclid(1_000_000);
    let nanos = unix_micros.rem_euclid(1_000_000) * 1_000;
    Utc.timestamp_opt(secs, nanos as u32)
        .single()
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_default()
}

/// Parsed $STANDARD_INFORMATION (covers v0 & v1, optionally v2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StandardInformation {
    pub created: String,
    pub modified: String,
    pub mft_modified: String,
    pub accessed: String,
    pub file_attrs: u32,
    pub max_versions: u32,
    pub version_number: u32,
    pub class_id: u32,
    pub owner_id: Option<u32>,
    pub security_id: Option<u32>,
    pub quota_charged: Option<u64>,
    pub usn: Option<u64>,
}

impl StandardInformation {
    pub fn from_bytes(raw: &[u8]) -> Option<Self> {
        if raw.len() < 0x30 {
            return None;
        }
        let mut cur = Cursor::new(raw);
        let created = filetime_to_rfc3339(cur.read_u64::<LittleEndian>().ok()?);
        let modified = filetime_to_rfc3339(cur.read_u64::<LittleEndian>().ok()?);
        let mft_modified = filetime_to_rfc3339(cur.read_u64::<LittleEndian>().ok()?);
        let accessed = filetime_to_rfc3339(cur.read_u64::<LittleEndian>().ok()?);
        let file_attrs = cur.read_u32::<LittleEndian>().ok()?;
        let max_versions = cur.read_u32::<LittleEndian>().ok()?;
        let version_number = cur.read_u32::<LittleEndian>().ok()?;
        let class_id = cur.read_u32::<LittleEndian>().ok()?;
        let owner_id = (raw.len() >= 0x34).then(|| cur.read_u32::<LittleEndian>().ok()).flatten();
        let security_id = (raw.len() >= 0x38).then(|| cur.read_u32::<LittleEndian>().ok()).flatten();
        let quota_charged = (raw.len() >= 0x40).then(|| cur.read_u64::<LittleEndian>().ok()).flatten();
        let usn = (raw.len() >= 0x48).then(|| cur.read_u64::<LittleEndian>().ok()).flatten();
        Some(Self {
            created,
            modified,
            mft_modified,
            accessed,
            file_attrs,
            max_versions,
            version_number,
            class_id,
            owner_id,
            security_id,
            quota_charged,
            usn,
        })
    }

    pub fn to_string(&self) -> String {
        let mut t = Table::new();
        t.add_row(row!["$STANDARD_INFORMATION"]);
        t.add_row(row![b -> "Created", self.created]);
        t.add_row(row![b -> "File Modified", self.modified]);
        t.add_row(row![b -> "MFT Modified", self.mft_modified]);
        t.add_row(row![b -> "Accessed", self.accessed]);
        t.add_row(row![b -> "Flags", si_flags_to_string(self.file_attrs)]);
        t.add_row(row![b -> "Owner ID", self.owner_id.map_or("‑".into(), |v| v.to_string())]);
        t.add_row(row![b -> "Security ID", self.security_id.map_or("‑".into(), |v| v.to_string())]);
        if let Some(q) = self.quota_charged {
            t.add_row(row![b -> "Quota Charged", q]);
        }
        if let Some(u) = self.usn {
            t.add_row(row![b -> "Last USN", u]);
        }
        t.to_string()
    }
}

pub const NAMESPACE_POSIX: u8 = 0;
pub const NAMESPACE_WIN32: u8 = 1;
pub const NAMESPACE_DOS: u8 = 2;
pub const NAMESPACE_WIN32_AND_DOS: u8 = 3;

/// Parsed $FILE_NAME attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileNameAttr {
    pub parent_ref: u64,
    pub parent_seq: u16,
    pub allocated_size: u64,
    pub real_size: u64,
    pub name: String,
    pub namespace: u8,
    pub flags: u32,
    pub created: String,
    pub modified: String,
    pub mft_modified: String,
    pub accessed: String,
}

impl FileNameAttr {
    pub const NAME_OFFSET: usize = 0x42;

    pub fn parse(raw: &[u8]) -> Option<Self> {
        if raw.len() < Self::NAME_OFFSET {
            return None;
        }
        let mut cur = Cursor::new(raw);
        let parent = RecordRef::from_raw(cur.read_u64::<LittleEndian>().ok()?);
        let created = filetime_to_rfc3339(cur.read_u64::<LittleEndian>().ok()?);
        let modified = filetime_to_rfc3339(cur.read_u64::<LittleEndian>().ok()?);
        let mft_modified = filetime_to_rfc3339(cur.read_u64::<LittleEndian>().ok()?);
        let accessed = filetime_to_rfc3339(cur.read_u64::<LittleEndian>().ok()?);
        let allocated_size = cur.read_u64::<LittleEndian>().ok()?;
        let real_size = cur.read_u64::<LittleEndian>().ok()?;
        let flags = cur.read_u32::<LittleEndian>().ok()?;
        cur.read_u32::<LittleEndian>().ok()?; // reparse value
        let name_len = cur.read_u8().ok()? as usize;
        let namespace = cur.read_u8().ok()?;
        let name_raw = raw.get(Self::NAME_OFFSET..Self::NAME_OFFSET + name_len * 2)?;
        let name = utf16_name(name_raw)?;
        Some(Self {
            parent_ref: parent.number(),
            parent_seq: parent.sequence(),
            allocated_size,
            real_size,
            name,
            namespace,
            flags,
            created,
            modified,
            mft_modified,
            accessed,
        })
    }

    pub fn parent(&self) -> RecordRef {
        RecordRef::new(self.parent_ref, self.parent_seq)
    }

    pub fn is_dos_only(&self) -> bool {
        self.namespace == NAMESPACE_DOS
    }

    /// Preference when picking a primary name: POSIX, Win32, Win32+DOS,
    /// then DOS.
    pub fn desirability(&self) -> u8 {
        match self.namespace {
            NAMESPACE_POSIX => 3,
            NAMESPACE_WIN32 => 2,
            NAMESPACE_WIN32_AND_DOS => 1,
            _ => 0,
        }
    }

    pub fn to_json(&self) -> Value {
        json!({
            "name": self.name,
            "namespace": self.namespace,
            "parent": self.parent_ref,
            "parent_seq": self.parent_seq,
            "allocated": self.allocated_size,
            "size": self.real_size,
            "created": self.created,
            "modified": self.modified,
            "mft_modified": self.mft_modified,
            "accessed": self.accessed,
            "flags": self.flags,
        })
    }
}

fn namespace_to_string(namespace: u8) -> &'static str {
    match namespace {
        NAMESPACE_POSIX => "POSIX",
        NAMESPACE_WIN32 => "Win32",
        NAMESPACE_DOS => "DOS",
        NAMESPACE_WIN32_AND_DOS => "Win32 & DOS",
        _ => "Unknown",
    }
}

/// Decode MFT record flags.
fn record_flags_to_string(flags: u16) -> String {
    let mut v = Vec::new();
    if flags & 0x0001 != 0 {
        v.push("Allocated")
    }
    if flags & 0x0002 != 0 {
        v.push("Directory")
    }
    if flags & 0x0004 != 0 {
        v.push("System")
    }
    if flags & 0x0008 != 0 {
        v.push("Bad")
    }
    if v.is_empty() {
        "None".into()
    } else {
        v.join(" | ")
    }
}

/// Decode FILE attribute flags ($STANDARD_INFORMATION, $FILE_NAME).
fn si_flags_to_string(flags: u32) -> String {
    const NAMES: [(u32, &str); 13] = [
        (0x0001, "READONLY"),
        (0x0002, "HIDDEN"),
        (0x0004, "SYSTEM"),
        (0x0020, "ARCHIVE"),
        (0x0100, "TEMPORARY"),
        (0x0200, "SPARSE_FILE"),
        (0x0400, "REPARSE_POINT"),
        (0x0800, "COMPRESSED"),
        (0x1000, "OFFLINE"),
        (0x2000, "NOT_CONTENT_INDEXED"),
        (0x4000, "ENCRYPTED"),
        (0x1000_0000, "DIRECTORY"),
        (0x2000_0000, "INDEX_VIEW"),
    ];
    let v: Vec<&str> = NAMES
        .iter()
        .filter(|(bit, _)| flags & bit != 0)
        .map(|(_, name)| *name)
        .collect();
    if v.is_empty() {
        "None".to_string()
    } else {
        v.join(" | ")
    }
}
