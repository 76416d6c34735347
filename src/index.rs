//! `$I30` directory index: the resident root node plus fixup-protected
//! `INDX` nodes in the index allocation stream.

use byteorder::{LittleEndian, ReadBytesExt};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::cmp::Ordering;
use std::collections::HashSet;
use std::io::Cursor;

use crate::VolumeOptions;
use crate::bitmap::AllocationBitmap;
use crate::error::{NtfsError, Result};
use crate::fixup;
use crate::mft::{AttributeType, FileNameAttr, RecordRef};
use crate::resolver::ResolvedRecord;
use crate::stream::{AttributeStream, ReadStream};

pub const INDEX_NAME: &str = "$I30";
pub const INDX_SIGNATURE: &[u8; 4] = b"INDX";
pub const ENTRY_HAS_SUBNODE: u8 = 0x01;
pub const ENTRY_IS_LAST: u8 = 0x02;
pub const ROOT_LARGE_INDEX: u32 = 0x01;
const ROOT_HEADER_OFFSET: usize = 0x10;
const NODE_HEADER_OFFSET: usize = 0x18;
/// Bytes of an `INDX` node that can never hold entries.
pub const NODE_OVERHEAD: u64 = 0x58;
const BAD_CLUSTER_RECORD: u64 = 8;
const MAX_ROOT_SIZE: usize = 10_000;
const SMALL_NODE_UNIT: u64 = 512;

/// One directory index entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexEntry {
    pub file_ref: RecordRef,
    pub flags: u8,
    pub subnode: Option<u64>,
    pub file_name: Option<FileNameAttr>,
}

impl IndexEntry {
    pub fn is_last(&self) -> bool {
        self.flags & ENTRY_IS_LAST != 0
    }

    pub fn name(&self) -> Option<&str> {
        self.file_name.as_ref().map(|f| f.name.as_str())
    }

    pub fn to_json(&self) -> Value {
        json!({
            "file_id": self.file_ref.number(),
            "sequence": self.file_ref.sequence(),
            "name": self.name(),
            "namespace": self.file_name.as_ref().map(|f| f.namespace),
            "flags": self.flags,
        })
    }
}

/// Decoded entry list of one node.
#[derive(Debug, Clone, Default)]
pub struct IndexNode {
    pub entries: Vec<IndexEntry>,
    pub list_end: u32,
    pub list_size: u32,
    pub flags: u32,
}

impl IndexNode {
    /// Unused bytes at the end of the node's entry area.
    pub fn slack(&self) -> u64 {
        u64::from(self.list_size.saturating_sub(self.list_end))
    }
}

fn corrupt(msg: impl Into<String>) -> NtfsError {
    NtfsError::IndexCorrupt(msg.into())
}

fn io_corrupt(e: std::io::Error) -> NtfsError {
    NtfsError::IndexCorrupt(e.to_string())
}

/// Decode one entry at `pos`. Returns the entry and its record length.
pub fn parse_entry(buf: &[u8], pos: usize, end: usize) -> Result<(IndexEntry, usize)> {
    if pos + 0x10 > end {
        return Err(corrupt(format!("entry at 0x{pos:X} truncated")));
    }
    let mut cur = Cursor::new(&buf[pos..end]);
    let file_ref = RecordRef::from_raw(cur.read_u64::<LittleEndian>().map_err(io_corrupt)?);
    let rec_len = cur.read_u16::<LittleEndian>().map_err(io_corrupt)? as usize;
    let data_len = cur.read_u16::<LittleEndian>().map_err(io_corrupt)? as usize;
    let flags = cur.read_u8().map_err(io_corrupt)?;

    if rec_len < 0x10 || pos + rec_len > end || data_len >= rec_len {
        return Err(corrupt(format!(
            "entry at 0x{pos:X}: length {rec_len}, data {data_len}"
        )));
    }
    let entry = &buf[pos..pos + rec_len];

    let subnode = if flags & ENTRY_HAS_SUBNODE != 0 {
        if rec_len < 0x18 {
            return Err(corrupt(format!("entry at 0x{pos:X} too short for a subnode")));
        }
        let mut tail = Cursor::new(&entry[rec_len - 8..]);
        Some(tail.read_u64::<LittleEndian>().map_err(io_corrupt)?)
    } else {
        None
    };

    let file_name = if flags & ENTRY_IS_LAST == 0 {
        let key = entry
            .get(0x10..0x10 + data_len)
            .ok_or_else(|| corrupt(format!("entry at 0x{pos:X}: key outside entry")))?;
        Some(
            FileNameAttr::parse(key)
                .ok_or_else(|| corrupt(format!("entry at 0x{pos:X}: bad $FILE_NAME key")))?,
        )
    } else {
        None
    };

    Ok((
        IndexEntry {
            file_ref,
            flags,
            subnode,
            file_name,
        },
        rec_len,
    ))
}

/// Decode the entry list whose header sits at `header` inside `buf`.
pub fn parse_entry_list(buf: &[u8], header: usize) -> Result<IndexNode> {
    let mut cur = Cursor::new(
        buf.get(header..header + 0x10)
            .ok_or_else(|| corrupt("entry list header truncated"))?,
    );
    let list_start = cur.read_u32::<LittleEndian>().map_err(io_corrupt)? as usize;
    let list_end = cur.read_u32::<LittleEndian>().map_err(io_corrupt)?;
    let list_size = cur.read_u32::<LittleEndian>().map_err(io_corrupt)?;
    let flags = cur.read_u32::<LittleEndian>().map_err(io_corrupt)?;

    let end = (header + list_end as usize).min(buf.len());
    let mut pos = header + list_start;
    let mut entries = Vec::new();
    loop {
        if pos >= end {
            warn!("Index entry list ends at 0x{:X} without a terminal entry.", end);
            break;
        }
        let (entry, len) = parse_entry(buf, pos, end)?;
        let last = entry.is_last();
        entries.push(entry);
        if last {
            break;
        }
        pos += len;
    }
    Ok(IndexNode {
        entries,
        list_end,
        list_size,
        flags,
    })
}

// Upper-case one UTF-16 unit on its own. Units without a single-unit
// uppercase (surrogates, `ß`, ligatures) are left unchanged.
fn upcase_unit(unit: u16) -> u16 {
    let Some(c) = char::from_u32(u32::from(unit)) else {
        return unit;
    };
    let mut upper = c.to_uppercase();
    match (upper.next(), upper.next()) {
        (Some(u), None) => u16::try_from(u32::from(u)).unwrap_or(unit),
        _ => unit,
    }
}

/// `$I30` collation: UTF-16 units compared in order after upper-casing
/// each unit one to one.
pub fn compare_names(a: &str, b: &str) -> Ordering {
    a.encode_utf16()
        .map(upcase_unit)
        .cmp(b.encode_utf16().map(upcase_unit))
}

/// Directory index of one record.
pub struct DirectoryIndex {
    record: u64,
    root: IndexNode,
    node_size: u32,
    cluster_size: u32,
    sector_size: u32,
    allocation: Option<AttributeStream>,
    bitmap: Option<AllocationBitmap>,
    max_depth: usize,
}

impl DirectoryIndex {
    /// Open the `$I30` index of a resolved directory record.
    pub fn open(record: &ResolvedRecord<'_>, options: &VolumeOptions) -> Result<Self> {
        let number = record.record_number();
        let store = record.resolver().store();
        let root_index = record
            .find_attribute(Some(AttributeType::IndexRoot), Some(INDEX_NAME), None, None)
            .ok_or_else(|| {
                NtfsError::AttributeNotFound(format!("record {number} has no $I30 index root"))
            })?;
        let raw = match record.open_attribute(root_index, false)? {
            AttributeStream::Resident(s) => s.as_slice().to_vec(),
            AttributeStream::NonResident(_) => {
                return Err(corrupt(format!("record {number}: index root is non-resident")));
            }
        };
        let raw = &raw[..raw.len().min(MAX_ROOT_SIZE)];

        let mut cur = Cursor::new(raw);
        let indexed_type = cur.read_u32::<LittleEndian>().map_err(io_corrupt)?;
        let _collation = cur.read_u32::<LittleEndian>().map_err(io_corrupt)?;
        let node_size = cur.read_u32::<LittleEndian>().map_err(io_corrupt)?;
        if AttributeType::from_code(indexed_type) != AttributeType::FileName {
            return Err(corrupt(format!(
                "record {number}: index root indexes type 0x{indexed_type:X}"
            )));
        }
        let root = parse_entry_list(raw, ROOT_HEADER_OFFSET)?;

        let mut allocation = None;
        let mut bitmap = None;
        if root.flags & ROOT_LARGE_INDEX != 0 {
            if node_size < 512 || !node_size.is_power_of_two() {
                return Err(corrupt(format!("record {number}: node size {node_size}")));
            }
            let alloc_index = record
                .find_attribute(Some(AttributeType::IndexAllocation), Some(INDEX_NAME), None, None)
                .ok_or_else(|| {
                    corrupt(format!("record {number}: large index without $INDEX_ALLOCATION"))
                })?;
            let stream = record.open_attribute(alloc_index, false)?;
            info!(
                "Directory {} uses a large index ({} bytes of {} byte nodes).",
                number,
                stream.len(),
                node_size
            );
            allocation = Some(stream);

            match record.find_attribute(Some(AttributeType::Bitmap), Some(INDEX_NAME), None, None) {
                Some(i) => {
                    let stream = record.open_attribute(i, false)?;
                    let bits = stream.len() * 8;
                    bitmap = Some(AllocationBitmap::new(
                        Box::new(stream),
                        bits,
                        options.bitmap_cache_size,
                    ));
                }
                None => warn!("Directory {} has no $I30 bitmap.", number),
            }
        }

        Ok(Self {
            record: number,
            root,
            node_size,
            cluster_size: store.device().cluster_size(),
            sector_size: store.sector_size(),
            allocation,
            bitmap,
            max_depth: options.max_index_depth,
        })
    }

    pub fn root(&self) -> &IndexNode {
        &self.root
    }

    pub fn node_size(&self) -> u32 {
        self.node_size
    }

    pub fn is_large(&self) -> bool {
        self.allocation.is_some()
    }

    /// In-use map of the allocation nodes, when the directory has one.
    pub fn node_bitmap(&self) -> Option<&AllocationBitmap> {
        self.bitmap.as_ref()
    }

    /// Number of node slots in the allocation stream.
    pub fn node_count(&self) -> u64 {
        self.allocation
            .as_ref()
            .map_or(0, |a| a.len() / u64::from(self.node_size))
    }

    fn vcn_to_offset(&self, vcn: u64) -> Option<u64> {
        if self.node_size >= self.cluster_size {
            vcn.checked_mul(u64::from(self.cluster_size))
        } else {
            vcn.checked_mul(SMALL_NODE_UNIT)
        }
    }

    /// Whether node `number` is marked in use; nodes are assumed in use
    /// when the directory has no index bitmap.
    pub fn node_in_use(&self, number: u64) -> Result<bool> {
        match &self.bitmap {
            Some(bm) => bm.get_bit(number),
            None => Ok(true),
        }
    }

    /// Read and decode the node at byte `offset` of the allocation stream.
    pub fn read_node_at(&self, offset: u64) -> Result<IndexNode> {
        let allocation = self.allocation.as_ref().ok_or_else(|| {
            corrupt(format!("directory {} has no index allocation", self.record))
        })?;
        let size = self.node_size as usize;
        let mut buf = vec![0u8; size];
        let n = allocation.read_at(&mut buf, offset)?;
        if n != size {
            return Err(corrupt(format!(
                "directory {}: node at 0x{offset:X} truncated ({n} of {size} bytes)",
                self.record
            )));
        }
        if &buf[0..4] != INDX_SIGNATURE {
            return Err(corrupt(format!(
                "directory {}: no INDX signature at 0x{offset:X}",
                self.record
            )));
        }
        let usa_offset = u16::from_le_bytes([buf[4], buf[5]]) as usize;
        let usa_count = u16::from_le_bytes([buf[6], buf[7]]) as usize;
        fixup::apply(&mut buf, self.sector_size as usize, usa_offset, usa_count).map_err(|e| {
            corrupt(format!(
                "directory {}: node at 0x{offset:X}: {e}",
                self.record
            ))
        })?;
        parse_entry_list(&buf, NODE_HEADER_OFFSET)
    }

    fn read_subnode(&self, vcn: u64) -> Result<IndexNode> {
        let offset = self.vcn_to_offset(vcn).ok_or_else(|| {
            corrupt(format!("directory {}: subnode VCN 0x{vcn:X} out of range", self.record))
        })?;
        let number = offset / u64::from(self.node_size);
        if !self.node_in_use(number)? {
            warn!(
                "Directory {}: node {} (VCN {}) is not marked in use.",
                self.record, number, vcn
            );
        }
        debug!("Directory {}: reading node VCN {}.", self.record, vcn);
        self.read_node_at(offset)
    }

    fn keep(&self, entry: &IndexEntry) -> bool {
        let Some(name) = &entry.file_name else {
            return false;
        };
        let number = entry.file_ref.number();
        number != self.record && number != BAD_CLUSTER_RECORD && !name.is_dos_only()
    }

    /// Entries matching `name` (case-insensitively), or every entry in key
    /// order when `name` is empty.
    pub fn find(&self, name: &str) -> Result<Vec<IndexEntry>> {
        self.walk((!name.is_empty()).then_some(name))
    }

    /// Every entry, in key order.
    pub fn enumerate(&self) -> Result<Vec<IndexEntry>> {
        self.walk(None)
    }

    // In-order walk with an explicit stack. With a query, subtrees that can
    // only hold smaller keys are skipped and a node is left at the first
    // larger key. Case variants collate equal and may sit on either side
    // of each other, so equal entries are descended too.
    fn walk(&self, query: Option<&str>) -> Result<Vec<IndexEntry>> {
        struct Frame {
            node: IndexNode,
            next: usize,
            descended: bool,
        }
        let mut out = Vec::new();
        let mut visited = HashSet::new();
        let mut stack = vec![Frame {
            node: self.root.clone(),
            next: 0,
            descended: false,
        }];

        while let Some(frame) = stack.last_mut() {
            let Some(entry) = frame.node.entries.get(frame.next) else {
                stack.pop();
                continue;
            };
            let order = match (query, entry.name()) {
                (_, None) => Ordering::Less,
                (None, Some(_)) => Ordering::Equal,
                (Some(q), Some(key)) => compare_names(q, key),
            };
            if order == Ordering::Greater {
                frame.next += 1;
                continue;
            }
            if let (Some(vcn), false) = (entry.subnode, frame.descended) {
                frame.descended = true;
                if stack.len() > self.max_depth {
                    return Err(corrupt(format!(
                        "directory {}: index deeper than {} levels",
                        self.record, self.max_depth
                    )));
                }
                if !visited.insert(vcn) {
                    return Err(corrupt(format!(
                        "directory {}: node VCN {} visited twice",
                        self.record, vcn
                    )));
                }
                let node = self.read_subnode(vcn)?;
                stack.push(Frame {
                    node,
                    next: 0,
                    descended: false,
                });
                continue;
            }
            if order == Ordering::Less {
                stack.pop();
                continue;
            }
            if self.keep(entry) {
                out.push(entry.clone());
            }
            frame.next += 1;
            frame.descended = false;
        }
        Ok(out)
    }

    /// Unused bytes across every node of the allocation: the tail of in-use
    /// nodes and all but the header of unused ones.
    pub fn slack_space(&self) -> Result<u64> {
        let mut total = 0;
        let node_size = u64::from(self.node_size);
        for number in 0..self.node_count() {
            if self.node_in_use(number)? {
                match self.read_node_at(number * node_size) {
                    Ok(node) => total += node.slack(),
                    Err(e) => warn!("Directory {}: node {} skipped: {}", self.record, number, e),
                }
            } else {
                total += node_size - NODE_OVERHEAD;
            }
        }
        Ok(total)
    }
}
