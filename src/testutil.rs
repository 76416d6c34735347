//! Builders for synthetic records, index nodes and whole volume images.

use byteorder::{ByteOrder, LittleEndian};
use std::io::Cursor;
use std::sync::Arc;

use crate::bitmap::{AllocationBitmap, DEFAULT_CACHE_SIZE};
use crate::device::{BlockDevice, ClusterDevice, SeekDevice};
use crate::fixup;
use crate::index::{ENTRY_HAS_SUBNODE, ENTRY_IS_LAST, INDX_SIGNATURE, ROOT_LARGE_INDEX};
use crate::mft::{
    AttributeType, FILE_SIGNATURE, NAMESPACE_DOS, NAMESPACE_WIN32, NAMESPACE_WIN32_AND_DOS,
    RECORD_IN_USE, RECORD_IS_DIRECTORY, RecordRef,
};
use crate::pbs::PartitionBootSector;
use crate::resolver::RecordResolver;
use crate::runlist::{self, RawRun};
use crate::store::MftStore;
use crate::stream::ReadStream;

const FIXUP_MAGIC: u16 = 0x0003;
// 2019-04-22, any stable value will do.
const FILETIME: u64 = 132_000_000_000_000_000;

fn align8(n: usize) -> usize {
    n.div_ceil(8) * 8
}

fn utf16(name: &str) -> Vec<u8> {
    name.encode_utf16().flat_map(u16::to_le_bytes).collect()
}

/// `$FILE_NAME` value for `name` under directory `parent_num`.
pub(crate) fn file_name_value(parent_num: u64, parent_seq: u16, name: &str, namespace: u8) -> Vec<u8> {
    let units = utf16(name);
    let mut out = vec![0u8; 0x42 + units.len()];
    LittleEndian::write_u64(&mut out[0x00..], RecordRef::new(parent_num, parent_seq).raw());
    for slot in 0..4 {
        LittleEndian::write_u64(&mut out[0x08 + slot * 8..], FILETIME);
    }
    out[0x40] = (units.len() / 2) as u8;
    out[0x41] = namespace;
    out[0x42..].copy_from_slice(&units);
    out
}

/// One attribute list entry.
pub(crate) fn attribute_list_entry(
    attr_type: AttributeType,
    name: &str,
    starting_vcn: u64,
    record: RecordRef,
    identifier: u16,
) -> Vec<u8> {
    let units = utf16(name);
    let len = align8(0x1A + units.len());
    let mut out = vec![0u8; len];
    LittleEndian::write_u32(&mut out[0x00..], attr_type.code());
    LittleEndian::write_u16(&mut out[0x04..], len as u16);
    out[0x06] = (units.len() / 2) as u8;
    out[0x07] = 0x1A;
    LittleEndian::write_u64(&mut out[0x08..], starting_vcn);
    LittleEndian::write_u64(&mut out[0x10..], record.raw());
    LittleEndian::write_u16(&mut out[0x18..], identifier);
    out[0x1A..0x1A + units.len()].copy_from_slice(&units);
    out
}

/// A 512-byte NTFS boot sector.
pub(crate) fn boot_sector(
    bytes_per_sector: u16,
    sectors_per_cluster: u8,
    total_sectors: u64,
    mft_cluster: u64,
    clusters_per_record: u8,
    clusters_per_index: u8,
    serial: u64,
) -> Vec<u8> {
    let mut out = vec![0u8; 512];
    out[0..3].copy_from_slice(&[0xEB, 0x52, 0x90]);
    out[3..11].copy_from_slice(&PartitionBootSector::NTFS_OEM_ID);
    LittleEndian::write_u16(&mut out[0x0B..], bytes_per_sector);
    out[0x0D] = sectors_per_cluster;
    out[0x15] = 0xF8;
    LittleEndian::write_u64(&mut out[0x28..], total_sectors);
    LittleEndian::write_u64(&mut out[0x30..], mft_cluster);
    LittleEndian::write_u64(&mut out[0x38..], 2);
    out[0x40] = clusters_per_record;
    out[0x44] = clusters_per_index;
    LittleEndian::write_u64(&mut out[0x48..], serial);
    LittleEndian::write_u16(&mut out[0x1FE..], 0xAA55);
    out
}

enum Body {
    Resident(Vec<u8>),
    NonResident {
        start_vcn: u64,
        runs: Vec<(Option<u64>, u64)>,
        real_size: u64,
        allocated_size: u64,
    },
}

struct PendingAttribute {
    attr_type: AttributeType,
    name: String,
    id: u16,
    flags: u16,
    body: Body,
}

impl PendingAttribute {
    fn encode(&self) -> Vec<u8> {
        let name = utf16(&self.name);
        let (header_len, body_at) = match self.body {
            Body::Resident(_) => (0x18, align8(0x18 + name.len())),
            Body::NonResident { .. } => (0x40, align8(0x40 + name.len())),
        };
        let tail = match &self.body {
            Body::Resident(value) => value.clone(),
            Body::NonResident { runs, .. } => encode_runs(runs),
        };
        let len = align8(body_at + tail.len());
        let mut out = vec![0u8; len];
        LittleEndian::write_u32(&mut out[0x00..], self.attr_type.code());
        LittleEndian::write_u32(&mut out[0x04..], len as u32);
        out[0x09] = (name.len() / 2) as u8;
        LittleEndian::write_u16(&mut out[0x0A..], header_len as u16);
        LittleEndian::write_u16(&mut out[0x0C..], self.flags);
        LittleEndian::write_u16(&mut out[0x0E..], self.id);
        out[header_len..header_len + name.len()].copy_from_slice(&name);
        match &self.body {
            Body::Resident(value) => {
                LittleEndian::write_u32(&mut out[0x10..], value.len() as u32);
                LittleEndian::write_u16(&mut out[0x14..], body_at as u16);
            }
            Body::NonResident {
                start_vcn,
                runs,
                real_size,
                allocated_size,
            } => {
                let clusters: u64 = runs.iter().map(|(_, n)| n).sum();
                out[0x08] = 1;
                LittleEndian::write_u64(&mut out[0x10..], *start_vcn);
                LittleEndian::write_u64(&mut out[0x18..], (start_vcn + clusters).saturating_sub(1));
                LittleEndian::write_u16(&mut out[0x20..], body_at as u16);
                LittleEndian::write_u64(&mut out[0x28..], *allocated_size);
                LittleEndian::write_u64(&mut out[0x30..], *real_size);
                LittleEndian::write_u64(&mut out[0x38..], *real_size);
            }
        }
        out[body_at..body_at + tail.len()].copy_from_slice(&tail);
        out
    }
}

// Absolute runs to relative mapping pairs.
fn encode_runs(runs: &[(Option<u64>, u64)]) -> Vec<u8> {
    let mut previous = 0i64;
    let raw: Vec<RawRun> = runs
        .iter()
        .map(|(lcn, length)| match lcn {
            Some(lcn) => {
                let offset = *lcn as i64 - previous;
                previous = *lcn as i64;
                RawRun {
                    offset,
                    length: *length,
                    sparse: false,
                }
            }
            None => RawRun {
                offset: 0,
                length: *length,
                sparse: true,
            },
        })
        .collect();
    runlist::encode(&raw)
}

/// Assembles a FILE record with fixups applied.
pub(crate) struct RecordBuilder {
    number: u64,
    sequence: u16,
    flags: u16,
    base: RecordRef,
    attributes: Vec<PendingAttribute>,
}

impl RecordBuilder {
    pub(crate) fn new(number: u64, sequence: u16) -> Self {
        Self {
            number,
            sequence,
            flags: 0,
            base: RecordRef::from_raw(0),
            attributes: Vec::new(),
        }
    }

    fn flag(mut self, bit: u16, on: bool) -> Self {
        if on {
            self.flags |= bit;
        } else {
            self.flags &= !bit;
        }
        self
    }

    pub(crate) fn in_use(self, on: bool) -> Self {
        self.flag(RECORD_IN_USE, on)
    }

    pub(crate) fn directory(self, on: bool) -> Self {
        self.flag(RECORD_IS_DIRECTORY, on)
    }

    pub(crate) fn base(mut self, base: RecordRef) -> Self {
        self.base = base;
        self
    }

    pub(crate) fn resident(mut self, attr_type: AttributeType, name: &str, id: u16, value: &[u8]) -> Self {
        self.attributes.push(PendingAttribute {
            attr_type,
            name: name.to_string(),
            id,
            flags: 0,
            body: Body::Resident(value.to_vec()),
        });
        self
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn non_resident(
        mut self,
        attr_type: AttributeType,
        name: &str,
        id: u16,
        start_vcn: u64,
        runs: &[(Option<u64>, u64)],
        real_size: u64,
        allocated_size: u64,
    ) -> Self {
        self.attributes.push(PendingAttribute {
            attr_type,
            name: name.to_string(),
            id,
            flags: 0,
            body: Body::NonResident {
                start_vcn,
                runs: runs.to_vec(),
                real_size,
                allocated_size,
            },
        });
        self
    }

    /// Flags of the most recently added attribute.
    pub(crate) fn attribute_flags(mut self, flags: u16) -> Self {
        if let Some(last) = self.attributes.last_mut() {
            last.flags = flags;
        }
        self
    }

    pub(crate) fn build(&self, record_size: usize, sector_size: usize) -> Vec<u8> {
        let usa_count = record_size / sector_size + 1;
        let attrs_offset = align8(0x30 + 2 * usa_count);
        let mut buf = vec![0u8; record_size];
        buf[0..4].copy_from_slice(FILE_SIGNATURE);
        LittleEndian::write_u16(&mut buf[0x04..], 0x30);
        LittleEndian::write_u16(&mut buf[0x06..], usa_count as u16);
        LittleEndian::write_u16(&mut buf[0x10..], self.sequence);
        LittleEndian::write_u16(&mut buf[0x12..], 1);
        LittleEndian::write_u16(&mut buf[0x14..], attrs_offset as u16);
        LittleEndian::write_u16(&mut buf[0x16..], self.flags);
        LittleEndian::write_u32(&mut buf[0x1C..], record_size as u32);
        LittleEndian::write_u64(&mut buf[0x20..], self.base.raw());
        let next_id = self.attributes.iter().map(|a| a.id + 1).max().unwrap_or(0);
        LittleEndian::write_u16(&mut buf[0x28..], next_id);
        LittleEndian::write_u32(&mut buf[0x2C..], self.number as u32);

        let mut pos = attrs_offset;
        for attr in &self.attributes {
            let raw = attr.encode();
            buf[pos..pos + raw.len()].copy_from_slice(&raw);
            pos += raw.len();
        }
        LittleEndian::write_u32(&mut buf[pos..], 0xFFFF_FFFF);
        pos += 8;
        LittleEndian::write_u32(&mut buf[0x18..], pos as u32);

        fixup::protect(&mut buf, sector_size, 0x30, usa_count, FIXUP_MAGIC).unwrap();
        buf
    }
}

/// Key of one `$I30` index entry.
#[derive(Clone)]
pub(crate) struct EntryTemplate {
    reference: RecordRef,
    parent: RecordRef,
    name: String,
    namespace: u8,
    subnode: Option<u64>,
}

impl EntryTemplate {
    /// Entry for record `number` (sequence 1) in the root directory.
    pub(crate) fn file(number: u64, name: &str, namespace: u8, subnode: Option<u64>) -> Self {
        Self {
            reference: RecordRef::new(number, 1),
            parent: RecordRef::new(5, 5),
            name: name.to_string(),
            namespace,
            subnode,
        }
    }

    pub(crate) fn sequence(mut self, sequence: u16) -> Self {
        self.reference = RecordRef::new(self.reference.number(), sequence);
        self
    }

    pub(crate) fn parent(mut self, parent: RecordRef) -> Self {
        self.parent = parent;
        self
    }

    fn encode(&self) -> Vec<u8> {
        let key = file_name_value(
            self.parent.number(),
            self.parent.sequence(),
            &self.name,
            self.namespace,
        );
        let key_end = align8(0x10 + key.len());
        let len = key_end + if self.subnode.is_some() { 8 } else { 0 };
        let mut out = vec![0u8; len];
        LittleEndian::write_u64(&mut out[0x00..], self.reference.raw());
        LittleEndian::write_u16(&mut out[0x08..], len as u16);
        LittleEndian::write_u16(&mut out[0x0A..], key.len() as u16);
        out[0x10..0x10 + key.len()].copy_from_slice(&key);
        if let Some(vcn) = self.subnode {
            out[0x0C] = ENTRY_HAS_SUBNODE;
            LittleEndian::write_u64(&mut out[len - 8..], vcn);
        }
        out
    }
}

fn encode_entries(entries: &[EntryTemplate], subnode_of_last: Option<u64>) -> Vec<u8> {
    let mut out: Vec<u8> = entries.iter().flat_map(EntryTemplate::encode).collect();
    let mut last = vec![0u8; if subnode_of_last.is_some() { 0x18 } else { 0x10 }];
    let len = last.len();
    LittleEndian::write_u16(&mut last[0x08..], len as u16);
    last[0x0C] = ENTRY_IS_LAST;
    if let Some(vcn) = subnode_of_last {
        last[0x0C] |= ENTRY_HAS_SUBNODE;
        LittleEndian::write_u64(&mut last[0x10..], vcn);
    }
    out.extend(last);
    out
}

fn entry_list_with_flags(entries: &[EntryTemplate], subnode_of_last: Option<u64>, flags: u32) -> Vec<u8> {
    let body = encode_entries(entries, subnode_of_last);
    let mut out = vec![0u8; 0x10];
    let end = (0x10 + body.len()) as u32;
    LittleEndian::write_u32(&mut out[0x00..], 0x10);
    LittleEndian::write_u32(&mut out[0x04..], end);
    LittleEndian::write_u32(&mut out[0x08..], end);
    LittleEndian::write_u32(&mut out[0x0C..], flags);
    out.extend(body);
    out
}

/// Entry list with its 16-byte header at offset 0.
pub(crate) fn entry_list(entries: &[EntryTemplate], subnode_of_last: Option<u64>) -> Vec<u8> {
    entry_list_with_flags(entries, subnode_of_last, 0)
}

/// `$INDEX_ROOT` value of a filename index.
pub(crate) fn index_root_value(
    node_size: u32,
    entries: &[EntryTemplate],
    subnode_of_last: Option<u64>,
) -> Vec<u8> {
    let large = entries.iter().any(|e| e.subnode.is_some()) || subnode_of_last.is_some();
    let flags = if large { ROOT_LARGE_INDEX } else { 0 };
    let mut out = vec![0u8; 0x10];
    LittleEndian::write_u32(&mut out[0x00..], AttributeType::FileName.code());
    LittleEndian::write_u32(&mut out[0x04..], 1);
    LittleEndian::write_u32(&mut out[0x08..], node_size);
    out[0x0C] = 1;
    out.extend(entry_list_with_flags(entries, subnode_of_last, flags));
    out
}

/// A fixup-protected `INDX` node and its unused byte count.
pub(crate) fn index_node(
    vcn: u64,
    entries: &[EntryTemplate],
    subnode_of_last: Option<u64>,
    node_size: usize,
    sector_size: usize,
) -> (Vec<u8>, u64) {
    let usa_count = node_size / sector_size + 1;
    let entries_at = align8(0x28 + 2 * usa_count);
    let body = encode_entries(entries, subnode_of_last);
    let list_start = entries_at - 0x18;
    let list_end = list_start + body.len();
    let list_size = node_size - 0x18;

    let mut buf = vec![0u8; node_size];
    buf[0..4].copy_from_slice(INDX_SIGNATURE);
    LittleEndian::write_u16(&mut buf[0x04..], 0x28);
    LittleEndian::write_u16(&mut buf[0x06..], usa_count as u16);
    LittleEndian::write_u64(&mut buf[0x10..], vcn);
    LittleEndian::write_u32(&mut buf[0x18..], list_start as u32);
    LittleEndian::write_u32(&mut buf[0x1C..], list_end as u32);
    LittleEndian::write_u32(&mut buf[0x20..], list_size as u32);
    buf[entries_at..entries_at + body.len()].copy_from_slice(&body);
    fixup::protect(&mut buf, sector_size, 0x28, usa_count, FIXUP_MAGIC).unwrap();
    (buf, (list_size - list_end) as u64)
}

// In-use record `number` with a Win32 name under `parent`.
fn named(number: u64, sequence: u16, parent: RecordRef, name: &str) -> RecordBuilder {
    RecordBuilder::new(number, sequence).resident(
        AttributeType::FileName,
        "",
        1,
        &file_name_value(parent.number(), parent.sequence(), name, NAMESPACE_WIN32),
    )
}

const SECTOR: usize = 512;
const SECTORS_PER_CLUSTER: u8 = 2;
const CLUSTER: usize = 1024;
const CLUSTERS: u64 = 256;
const RECORD: usize = 1024;
const MFT_RECORDS: u64 = 48;
// (first cluster, clusters); one record per cluster.
const MFT_EXTENTS: [(u64, u64); 2] = [(16, 16), (120, 32)];
const BITMAP_CLUSTER: u64 = 10;
const FILE_CLUSTER: u64 = 40;
const LISTED_EXTENTS: [(u64, u64); 2] = [(50, 2), (60, 2)];
const DELETED_CLUSTER: u64 = 70;
const REUSED_CLUSTER: u64 = 71;
const ROOT_NODES_CLUSTER: u64 = 80;
const ROOT_NODES: u64 = 3;

#[derive(Default, Clone, Copy)]
struct Variant {
    deleted_extension: bool,
    cyclic_index: bool,
    deep_index: bool,
}

/// In-memory NTFS image with a fixed set of records.
pub(crate) struct TestVolume {
    pub(crate) image: Vec<u8>,
    pub(crate) cluster_size: u32,
    pub(crate) cluster_count: u64,
    pub(crate) mft_records: u64,
    pub(crate) file_content: Vec<u8>,
    pub(crate) listed_content: Vec<u8>,
    pub(crate) root_index_slack: u64,
    allocated: Vec<bool>,
    in_use: Vec<bool>,
}

impl TestVolume {
    pub(crate) const SERIAL: u64 = 0x1234_5678_9ABC_DEF0;
    pub(crate) const LABEL: &'static str = "TESTVOL";
    pub(crate) const SLACK_FILL: u8 = 0xA5;
    pub(crate) const DELETED_FILL: u8 = 0xDE;

    /// `hello.txt`: one non-resident cluster with slack.
    pub(crate) const FILE_RECORD: u64 = 17;
    /// `big.bin`: `$DATA` split over two extension records.
    pub(crate) const LISTED_RECORD: u64 = 18;
    pub(crate) const EXTENSION_RECORD: u64 = 19;
    const SECOND_EXTENSION_RECORD: u64 = 20;
    /// `tiny.txt`: resident `$DATA`.
    pub(crate) const SMALL_RECORD: u64 = 21;
    /// `gone.bin`: deleted, first cluster free, second reallocated.
    pub(crate) const DELETED_RECORD: u64 = 22;
    /// `olddir`: deleted directory that held `gone.bin`.
    pub(crate) const DELETED_DIR_RECORD: u64 = 23;
    /// `small`: directory with a resident index only.
    pub(crate) const SMALL_DIR_RECORD: u64 = 24;
    /// `lost.txt`: its parent record was reused.
    pub(crate) const ORPHAN_RECORD: u64 = 25;
    const REUSED_PARENT_RECORD: u64 = 26;
    const REUSED_CLUSTER_RECORD: u64 = 27;
    /// `small\alpha`.
    pub(crate) const NESTED_RECORD: u64 = 40;

    /// Root directory listing in key order.
    pub(crate) const ROOT_LISTING: &'static [&'static str] = &[
        "$MFT",
        "$Volume",
        "big.bin",
        "hello.txt",
        "other.txt",
        "reused.dat",
        "small",
        "tiny.txt",
    ];

    pub(crate) fn standard() -> Self {
        Self::build(Variant::default())
    }

    /// Second extension of `big.bin` no longer in use.
    pub(crate) fn with_deleted_extension() -> Self {
        Self::build(Variant {
            deleted_extension: true,
            ..Default::default()
        })
    }

    /// A root index leaf whose end entry points back at itself.
    pub(crate) fn with_cyclic_index() -> Self {
        Self::build(Variant {
            cyclic_index: true,
            ..Default::default()
        })
    }

    /// Root index three levels deep: node B's end entry leads to an empty
    /// node at VCN 2.
    pub(crate) fn with_deep_index() -> Self {
        Self::build(Variant {
            deep_index: true,
            ..Default::default()
        })
    }

    /// Standard volume with record `number` replaced by `raw`.
    pub(crate) fn standard_with_record(number: u64, raw: &[u8]) -> Self {
        let mut vol = Self::standard();
        let at = vol.record_offset(number) as usize;
        vol.image[at..at + raw.len()].copy_from_slice(raw);
        vol
    }

    pub(crate) fn device(&self) -> Arc<dyn BlockDevice> {
        self.device_with_block_size(SECTOR as u32)
    }

    pub(crate) fn device_with_block_size(&self, block_size: u32) -> Arc<dyn BlockDevice> {
        Arc::new(SeekDevice::new(Cursor::new(self.image.clone()), block_size).unwrap())
    }

    pub(crate) fn clusters(&self) -> ClusterDevice {
        ClusterDevice::new(self.device(), u32::from(SECTORS_PER_CLUSTER), self.cluster_count).unwrap()
    }

    pub(crate) fn pbs(&self) -> PartitionBootSector {
        PartitionBootSector::from_bytes(&self.image[..512]).unwrap()
    }

    pub(crate) fn store(&self) -> MftStore {
        MftStore::bootstrap(self.clusters(), &self.pbs()).unwrap()
    }

    /// The volume bitmap read back from `$Bitmap`.
    pub(crate) fn bitmap(&self, store: &MftStore) -> AllocationBitmap {
        let rec = RecordResolver::new(store, None)
            .open(RecordRef::any(6))
            .unwrap();
        let data = rec.data_attributes()[0];
        let stream = rec.open_attribute(data, false).unwrap();
        assert!(stream.len() * 8 >= self.cluster_count);
        AllocationBitmap::new(Box::new(stream), self.cluster_count, DEFAULT_CACHE_SIZE)
    }

    /// Device byte offset of MFT record `number`.
    pub(crate) fn record_offset(&self, number: u64) -> u64 {
        let mut first = 0;
        for (cluster, count) in MFT_EXTENTS {
            if number < first + count {
                return cluster * CLUSTER as u64 + (number - first) * RECORD as u64;
            }
            first += count;
        }
        panic!("record {number} outside the test MFT");
    }

    pub(crate) fn allocated_clusters(&self) -> u64 {
        self.allocated.iter().filter(|b| **b).count() as u64
    }

    pub(crate) fn records_in_use(&self) -> u64 {
        self.in_use.iter().filter(|b| **b).count() as u64
    }

    fn write_cluster(&mut self, cluster: u64, data: &[u8]) {
        let at = cluster as usize * CLUSTER;
        self.image[at..at + data.len()].copy_from_slice(data);
    }

    fn allocate(&mut self, first: u64, count: u64) {
        for c in first..first + count {
            self.allocated[c as usize] = true;
        }
    }

    fn put_record(&mut self, number: u64, record: RecordBuilder, in_use: bool) {
        let raw = record.in_use(in_use).build(RECORD, SECTOR);
        let at = self.record_offset(number) as usize;
        self.image[at..at + RECORD].copy_from_slice(&raw);
        self.in_use[number as usize] = in_use;
    }

    fn build(variant: Variant) -> Self {
        let mut vol = TestVolume {
            // One sector past the last cluster: file-system slack.
            image: vec![0u8; CLUSTERS as usize * CLUSTER + SECTOR],
            cluster_size: CLUSTER as u32,
            cluster_count: CLUSTERS,
            mft_records: MFT_RECORDS,
            file_content: (0..600).map(|i| (i % 251) as u8).collect(),
            listed_content: (0..3172).map(|i| (i * 7 % 256) as u8).collect(),
            root_index_slack: 0,
            allocated: vec![false; CLUSTERS as usize],
            in_use: vec![false; MFT_RECORDS as usize],
        };
        let sectors = CLUSTERS * u64::from(SECTORS_PER_CLUSTER);
        let boot = boot_sector(
            SECTOR as u16,
            SECTORS_PER_CLUSTER,
            sectors,
            MFT_EXTENTS[0].0,
            0xF6,
            0x01,
            Self::SERIAL,
        );
        vol.image[..512].copy_from_slice(&boot);
        vol.allocate(0, BITMAP_CLUSTER + 1);
        for (cluster, count) in MFT_EXTENTS {
            vol.allocate(cluster, count);
        }

        let root = RecordRef::new(5, 5);

        // Contents.
        let mut cluster = vol.file_content.clone();
        cluster.resize(CLUSTER, Self::SLACK_FILL);
        vol.write_cluster(FILE_CLUSTER, &cluster);
        vol.allocate(FILE_CLUSTER, 1);

        let mut listed = vol.listed_content.clone();
        listed.resize(4 * CLUSTER, 0);
        let mut chunks = listed.chunks(CLUSTER);
        for (first, count) in LISTED_EXTENTS {
            for c in first..first + count {
                let chunk = chunks.next().unwrap_or(&[]);
                vol.write_cluster(c, chunk);
            }
            vol.allocate(first, count);
        }

        vol.write_cluster(DELETED_CLUSTER, &[Self::DELETED_FILL; CLUSTER]);
        vol.write_cluster(REUSED_CLUSTER, &[0x71; CLUSTER]);
        vol.allocate(REUSED_CLUSTER, 1);

        // Root index nodes: VCN 0 and 1 in use, VCN 2 free.
        let (node_a, slack_a) = index_node(
            0,
            &[
                EntryTemplate::file(0, "$MFT", NAMESPACE_WIN32_AND_DOS, None),
                EntryTemplate::file(3, "$Volume", NAMESPACE_WIN32_AND_DOS, None),
                EntryTemplate::file(5, ".", NAMESPACE_WIN32_AND_DOS, None).sequence(5),
                EntryTemplate::file(Self::LISTED_RECORD, "big.bin", NAMESPACE_WIN32_AND_DOS, None),
            ],
            None,
            CLUSTER,
            SECTOR,
        );
        let (node_b, slack_b) = index_node(
            1,
            &[
                EntryTemplate::file(Self::FILE_RECORD, "HELLO~1.TXT", NAMESPACE_DOS, None),
                EntryTemplate::file(Self::REUSED_PARENT_RECORD, "other.txt", NAMESPACE_WIN32, None)
                    .sequence(2),
                EntryTemplate::file(Self::REUSED_CLUSTER_RECORD, "reused.dat", NAMESPACE_WIN32, None),
                EntryTemplate::file(Self::SMALL_DIR_RECORD, "small", NAMESPACE_WIN32_AND_DOS, None),
                EntryTemplate::file(Self::SMALL_RECORD, "tiny.txt", NAMESPACE_WIN32_AND_DOS, None),
            ],
            match (variant.cyclic_index, variant.deep_index) {
                (true, _) => Some(1),
                (false, true) => Some(2),
                _ => None,
            },
            CLUSTER,
            SECTOR,
        );
        vol.write_cluster(ROOT_NODES_CLUSTER, &node_a);
        vol.write_cluster(ROOT_NODES_CLUSTER + 1, &node_b);
        if variant.deep_index {
            let (node_c, _) = index_node(2, &[], None, CLUSTER, SECTOR);
            vol.write_cluster(ROOT_NODES_CLUSTER + 2, &node_c);
        }
        vol.allocate(ROOT_NODES_CLUSTER, ROOT_NODES);
        vol.root_index_slack = slack_a + slack_b + CLUSTER as u64 - crate::index::NODE_OVERHEAD;

        // System records.
        let mft_runs: Vec<_> = MFT_EXTENTS.iter().map(|(c, n)| (Some(*c), *n)).collect();
        let mft_bytes = MFT_RECORDS * RECORD as u64;
        let volume = named(3, 1, root, "$Volume").resident(
            AttributeType::VolumeName,
            "",
            2,
            &utf16(Self::LABEL),
        );
        let root_record = RecordBuilder::new(5, 5)
            .directory(true)
            .resident(
                AttributeType::FileName,
                "",
                1,
                &file_name_value(5, 5, ".", NAMESPACE_WIN32_AND_DOS),
            )
            .resident(
                AttributeType::IndexRoot,
                "$I30",
                2,
                &index_root_value(
                    CLUSTER as u32,
                    &[EntryTemplate::file(Self::FILE_RECORD, "hello.txt", NAMESPACE_WIN32, Some(0))],
                    Some(1),
                ),
            )
            .non_resident(
                AttributeType::IndexAllocation,
                "$I30",
                3,
                0,
                &[(Some(ROOT_NODES_CLUSTER), ROOT_NODES)],
                ROOT_NODES * CLUSTER as u64,
                ROOT_NODES * CLUSTER as u64,
            )
            .resident(AttributeType::Bitmap, "$I30", 4, &[0x03, 0, 0, 0, 0, 0, 0, 0]);
        let bad_clusters = named(8, 1, root, "$BadClus").resident(AttributeType::Data, "$Bad", 2, &[]);

        // User records.
        let hello = named(Self::FILE_RECORD, 1, root, "hello.txt")
            .resident(
                AttributeType::FileName,
                "",
                2,
                &file_name_value(5, 5, "HELLO~1.TXT", NAMESPACE_DOS),
            )
            .non_resident(
                AttributeType::Data,
                "",
                3,
                0,
                &[(Some(FILE_CLUSTER), 1)],
                vol.file_content.len() as u64,
                CLUSTER as u64,
            );

        let base = RecordRef::new(Self::LISTED_RECORD, 1);
        let mut list = attribute_list_entry(AttributeType::FileName, "", 0, base, 1);
        list.extend(attribute_list_entry(
            AttributeType::Data,
            "",
            0,
            RecordRef::new(Self::EXTENSION_RECORD, 1),
            0,
        ));
        list.extend(attribute_list_entry(
            AttributeType::Data,
            "",
            LISTED_EXTENTS[0].1,
            RecordRef::new(Self::SECOND_EXTENSION_RECORD, 1),
            0,
        ));
        let listed = named(Self::LISTED_RECORD, 1, root, "big.bin").resident(
            AttributeType::AttributeList,
            "",
            0,
            &list,
        );
        let listed_len = vol.listed_content.len() as u64;
        let first_extension = RecordBuilder::new(Self::EXTENSION_RECORD, 1)
            .base(base)
            .non_resident(
                AttributeType::Data,
                "",
                0,
                0,
                &[(Some(LISTED_EXTENTS[0].0), LISTED_EXTENTS[0].1)],
                listed_len,
                4 * CLUSTER as u64,
            );
        let second_extension = RecordBuilder::new(Self::SECOND_EXTENSION_RECORD, 1)
            .base(base)
            .non_resident(
                AttributeType::Data,
                "",
                0,
                LISTED_EXTENTS[0].1,
                &[(Some(LISTED_EXTENTS[1].0), LISTED_EXTENTS[1].1)],
                0,
                0,
            );

        let tiny = named(Self::SMALL_RECORD, 1, root, "tiny.txt").resident(
            AttributeType::Data,
            "",
            2,
            b"tiny",
        );

        let old_dir = RecordRef::new(Self::DELETED_DIR_RECORD, 3);
        let gone = named(Self::DELETED_RECORD, 2, old_dir, "gone.bin").non_resident(
            AttributeType::Data,
            "",
            2,
            0,
            &[(Some(DELETED_CLUSTER), 2)],
            2 * CLUSTER as u64,
            2 * CLUSTER as u64,
        );
        // Deleting a record bumps its sequence.
        let deleted_dir = named(Self::DELETED_DIR_RECORD, 4, root, "olddir")
            .directory(true)
            .resident(
                AttributeType::IndexRoot,
                "$I30",
                2,
                &index_root_value(CLUSTER as u32, &[], None),
            );

        let small = RecordRef::new(Self::SMALL_DIR_RECORD, 1);
        let small_entries: Vec<_> = ["alpha", "beta", "gamma"]
            .iter()
            .enumerate()
            .map(|(i, name)| {
                EntryTemplate::file(Self::NESTED_RECORD + i as u64, name, NAMESPACE_WIN32, None)
                    .parent(small)
            })
            .collect();
        let small_dir = named(Self::SMALL_DIR_RECORD, 1, root, "small")
            .directory(true)
            .resident(
                AttributeType::IndexRoot,
                "$I30",
                2,
                &index_root_value(CLUSTER as u32, &small_entries, None),
            );

        let lost = named(Self::ORPHAN_RECORD, 1, RecordRef::new(Self::REUSED_PARENT_RECORD, 1), "lost.txt")
            .resident(AttributeType::Data, "", 2, b"lost");
        let other = named(Self::REUSED_PARENT_RECORD, 2, root, "other.txt").resident(
            AttributeType::Data,
            "",
            2,
            b"other",
        );
        let reused = named(Self::REUSED_CLUSTER_RECORD, 1, root, "reused.dat").non_resident(
            AttributeType::Data,
            "",
            2,
            0,
            &[(Some(REUSED_CLUSTER), 1)],
            CLUSTER as u64,
            CLUSTER as u64,
        );

        vol.put_record(3, volume, true);
        vol.put_record(5, root_record, true);
        vol.put_record(8, bad_clusters, true);
        vol.put_record(Self::FILE_RECORD, hello, true);
        vol.put_record(Self::LISTED_RECORD, listed, true);
        vol.put_record(Self::EXTENSION_RECORD, first_extension, true);
        vol.put_record(Self::SECOND_EXTENSION_RECORD, second_extension, !variant.deleted_extension);
        vol.put_record(Self::SMALL_RECORD, tiny, true);
        vol.put_record(Self::DELETED_RECORD, gone, false);
        vol.put_record(Self::DELETED_DIR_RECORD, deleted_dir, false);
        vol.put_record(Self::SMALL_DIR_RECORD, small_dir, true);
        vol.put_record(Self::ORPHAN_RECORD, lost, true);
        vol.put_record(Self::REUSED_PARENT_RECORD, other, true);
        vol.put_record(Self::REUSED_CLUSTER_RECORD, reused, true);
        for (i, name) in ["alpha", "beta", "gamma"].iter().enumerate() {
            let number = Self::NESTED_RECORD + i as u64;
            let rec = named(number, 1, small, name).resident(AttributeType::Data, "", 2, name.as_bytes());
            vol.put_record(number, rec, true);
        }

        // $Bitmap is written last so it sees every allocation; record 0
        // gets its $BITMAP the same way.
        let mut bits = vec![0u8; CLUSTERS.div_ceil(8) as usize];
        for (c, _) in vol.allocated.iter().enumerate().filter(|(_, a)| **a) {
            bits[c / 8] |= 1 << (c % 8);
        }
        vol.write_cluster(BITMAP_CLUSTER, &bits);
        let bitmap = named(6, 1, root, "$Bitmap").non_resident(
            AttributeType::Data,
            "",
            2,
            0,
            &[(Some(BITMAP_CLUSTER), 1)],
            bits.len() as u64,
            CLUSTER as u64,
        );
        vol.put_record(6, bitmap, true);

        vol.in_use[0] = true;
        let mut mft_bits = vec![0u8; MFT_RECORDS.div_ceil(8) as usize];
        for (r, _) in vol.in_use.iter().enumerate().filter(|(_, u)| **u) {
            mft_bits[r / 8] |= 1 << (r % 8);
        }
        let mft = named(0, 1, root, "$MFT")
            .non_resident(AttributeType::Data, "", 2, 0, &mft_runs, mft_bytes, mft_bytes)
            .resident(AttributeType::Bitmap, "", 3, &mft_bits);
        vol.put_record(0, mft, true);
        vol
    }
}
