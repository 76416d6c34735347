// Sources:
// - https://dubeyko.com/development/FileSystems/NTFS/ntfsdoc.pdf
// - https://en.wikipedia.org/wiki/NTFS

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

use log::{debug, error, info};

pub mod bitmap;
pub mod device;
pub mod error;
pub mod fixup;
pub mod index;
pub mod mft;
pub mod pbs;
pub mod reconcile;
pub mod resolver;
pub mod runlist;
pub mod store;
pub mod stream;
pub mod ufid;

#[cfg(test)]
mod testutil;

use bitmap::AllocationBitmap;
use device::{BlockDevice, ClusterDevice};
use error::{NtfsError, Result};
use index::{DirectoryIndex, INDEX_NAME, IndexEntry};
use mft::{AttributeType, RecordRef};
use pbs::{BOOT_SECTOR_SIZE, PartitionBootSector};
use resolver::{RecordResolver, ResolvedRecord};
use store::MftStore;
use stream::{AttributeStream, LogicalStream, ReadStream};
use ufid::{Ufid, UfidKind};

pub const MFT_RECORD: u64 = 0;
pub const VOLUME_RECORD: u64 = 3;
pub const ROOT_RECORD: u64 = 5;
pub const BITMAP_RECORD: u64 = 6;
pub const BAD_CLUSTER_RECORD: u64 = 8;

/// Tunables of a mounted volume.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct VolumeOptions {
    /// Bytes of the volume bitmap kept in memory.
    pub bitmap_cache_size: usize,
    /// Deepest directory B-tree accepted.
    pub max_index_depth: usize,
    /// Largest attribute list that will be loaded.
    pub max_attribute_list_size: u64,
}

impl Default for VolumeOptions {
    fn default() -> Self {
        Self {
            bitmap_cache_size: bitmap::DEFAULT_CACHE_SIZE,
            max_index_depth: 32,
            max_attribute_list_size: resolver::DEFAULT_MAX_ATTRIBUTE_LIST_SIZE,
        }
    }
}

/// Which attributes a directory or volume query reports.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Selection {
    pub files: bool,
    pub directories: bool,
    /// Slack variants of data attributes (volume queries only).
    pub slack: bool,
    /// Unallocated space, file-system slack and orphan ids (volume queries only).
    pub special: bool,
}

/// A mounted NTFS volume.
pub struct Ntfs {
    pub pbs: PartitionBootSector,
    device: ClusterDevice,
    mft: MftStore,
    bitmap: AllocationBitmap,
    used_clusters: u64,
    root_ufid: Ufid,
    options: VolumeOptions,
}

impl Ntfs {
    /// Mount the volume on `device`: validate the boot sector, bootstrap
    /// the MFT, load the cluster bitmap and locate the root directory.
    pub fn mount(device: Arc<dyn BlockDevice>, options: VolumeOptions) -> Result<Self> {
        let mut raw = vec![0u8; BOOT_SECTOR_SIZE];
        let n = device.read_at(&mut raw, 0)?;
        if n != raw.len() {
            error!("Volume too small for a boot sector ({} bytes).", n);
            return Err(NtfsError::BootSector(format!("read {n} bytes")));
        }
        let pbs = PartitionBootSector::from_bytes(&raw)
            .map_err(|e| NtfsError::BootSector(e.to_string()))?;
        if let Err(e) = pbs.validate(device.block_size()) {
            error!("Couldn't mount NTFS: {}", e);
            return Err(e);
        }

        let clusters = ClusterDevice::new(
            device,
            u32::from(pbs.sectors_per_cluster),
            pbs.cluster_count(),
        )?;
        let mft = MftStore::bootstrap(clusters.clone(), &pbs)?;

        let bitmap = {
            let resolver = RecordResolver::new(&mft, None)
                .with_max_list_size(options.max_attribute_list_size);
            let record = resolver.open(RecordRef::any(BITMAP_RECORD))?;
            let data = record
                .find_attribute(Some(AttributeType::Data), Some(""), None, None)
                .ok_or_else(|| NtfsError::BitmapUnavailable("$Bitmap has no $DATA".into()))?;
            let stream = record.open_attribute(data, false)?;
            AllocationBitmap::new(
                Box::new(stream),
                pbs.cluster_count(),
                options.bitmap_cache_size,
            )
        };
        if bitmap.bit_count() < pbs.cluster_count() {
            return Err(NtfsError::BitmapUnavailable(format!(
                "$Bitmap covers {} of {} clusters",
                bitmap.bit_count(),
                pbs.cluster_count()
            )));
        }
        let used_clusters = count_allocated(&bitmap)?;

        let root_ufid = {
            let resolver = RecordResolver::new(&mft, Some(&bitmap));
            let root = resolver.open(RecordRef::any(ROOT_RECORD))?;
            let index = root
                .find_attribute(Some(AttributeType::IndexRoot), Some(INDEX_NAME), None, None)
                .ok_or_else(|| {
                    NtfsError::AttributeNotFound("root directory has no $I30 index root".into())
                })?;
            Ufid::new(ROOT_RECORD as u32, index as u16, false)
        };

        info!(
            "Mounted NTFS volume {:016X}: {} clusters of {} bytes, {} in use, {} MFT records.",
            pbs.volume_serial_number,
            pbs.cluster_count(),
            pbs.cluster_size(),
            used_clusters,
            mft.record_count()
        );

        Ok(Self {
            pbs,
            device: clusters,
            mft,
            bitmap,
            used_clusters,
            root_ufid,
            options,
        })
    }

    pub fn options(&self) -> &VolumeOptions {
        &self.options
    }

    pub fn serial_number(&self) -> u64 {
        self.pbs.volume_serial_number
    }

    pub fn cluster_size(&self) -> u32 {
        self.device.cluster_size()
    }

    pub fn cluster_count(&self) -> u64 {
        self.device.cluster_count()
    }

    pub fn used_clusters(&self) -> u64 {
        self.used_clusters
    }

    pub fn free_clusters(&self) -> u64 {
        self.cluster_count() - self.used_clusters
    }

    pub fn is_cluster_allocated(&self, cluster: u64) -> Result<bool> {
        self.bitmap.get_bit(cluster)
    }

    pub fn bitmap(&self) -> &AllocationBitmap {
        &self.bitmap
    }

    pub fn mft(&self) -> &MftStore {
        &self.mft
    }

    pub fn root_ufid(&self) -> Ufid {
        self.root_ufid
    }

    pub fn resolver(&self) -> RecordResolver<'_> {
        RecordResolver::new(&self.mft, Some(&self.bitmap))
            .with_max_list_size(self.options.max_attribute_list_size)
    }

    /// Resolve base record `reference` (sequence 0 matches any sequence).
    pub fn open_record(&self, reference: RecordRef) -> Result<ResolvedRecord<'_>> {
        self.resolver().open(reference)
    }

    /// Label stored in `$Volume`.
    pub fn volume_name(&self) -> Result<String> {
        let record = self.open_record(RecordRef::any(VOLUME_RECORD))?;
        let index = record
            .find_attribute(Some(AttributeType::VolumeName), None, None, None)
            .ok_or_else(|| NtfsError::AttributeNotFound("$VOLUME_NAME".into()))?;
        let raw = record
            .resident_attribute(index)
            .ok_or_else(|| NtfsError::corrupt(VOLUME_RECORD, "$VOLUME_NAME is not resident"))?;
        let units: Vec<u16> = raw
            .chunks_exact(2)
            .map(|b| u16::from_le_bytes([b[0], b[1]]))
            .collect();
        String::from_utf16(&units).map_err(|e| NtfsError::corrupt(VOLUME_RECORD, e.to_string()))
    }

    /// Allocation bitmap of the MFT itself (`$MFT:$BITMAP`).
    pub fn mft_bitmap(&self) -> Result<AllocationBitmap> {
        let record = self.open_record(RecordRef::any(MFT_RECORD))?;
        let index = record
            .find_attribute(Some(AttributeType::Bitmap), Some(""), None, None)
            .ok_or_else(|| NtfsError::AttributeNotFound("$MFT:$BITMAP".into()))?;
        let stream = record.open_attribute(index, false)?;
        Ok(AllocationBitmap::new(
            Box::new(stream),
            self.mft.record_count(),
            self.options.bitmap_cache_size,
        ))
    }

    pub fn mft_allocated_records(&self) -> Result<u64> {
        Ok(self.mft_bitmap()?.summary()?.0)
    }

    pub fn mft_free_records(&self) -> Result<u64> {
        Ok(self.mft_bitmap()?.summary()?.1)
    }

    /// One stream over every unallocated cluster, in volume order.
    pub fn unallocated_stream(&self) -> Result<LogicalStream> {
        let mut stream = LogicalStream::new(self.device.clone());
        for (start, len) in self.bitmap.clear_runs()? {
            stream.add_run(Some(start), len);
        }
        stream.set_length(stream.block_count() * u64::from(self.cluster_size()));
        debug!(
            "Unallocated space: {} clusters in {} runs.",
            stream.block_count(),
            stream.runs().len()
        );
        Ok(stream)
    }

    /// Content behind `ufid`.
    pub fn open_ufid(&self, ufid: Ufid) -> Result<AttributeStream> {
        match ufid.kind() {
            UfidKind::Unallocated => Ok(AttributeStream::NonResident(self.unallocated_stream()?)),
            UfidKind::FileSystemSlack | UfidKind::Orphan => Err(NtfsError::InvalidArgument(
                format!("{ufid} does not designate a stream"),
            )),
            UfidKind::Attribute {
                record,
                attribute,
                slack,
            } => self
                .open_record(RecordRef::any(u64::from(record)))?
                .open_attribute(usize::from(attribute), slack),
        }
    }

    // Parent record of `record` if its filename's parent reference still
    // points at the directory that held it.
    fn verified_parent(&self, record: &ResolvedRecord<'_>) -> Option<ResolvedRecord<'_>> {
        let names = match record.get_filename() {
            Ok(n) => n,
            Err(e) => {
                debug!("Record {} has no usable name: {}", record.record_number(), e);
                return None;
            }
        };
        let parent_number = names.parent.number();
        if parent_number == record.record_number() {
            return None;
        }
        let parent = match self.open_record(RecordRef::any(parent_number)) {
            Ok(p) => p,
            Err(e) => {
                debug!("Parent {} of record {} unavailable: {}", parent_number, record.record_number(), e);
                return None;
            }
        };
        let want = names.parent.sequence();
        let matches = parent.sequence_number() == want
            || (record.is_deleted()
                && parent.is_deleted()
                && parent.is_directory()
                && parent.sequence_number() == want.wrapping_add(1));
        matches.then_some(parent)
    }

    /// UFID of the directory holding `reference`; `None` for the root.
    /// Records whose parent cannot be verified belong to the orphan
    /// directory.
    pub fn parent_ufid(&self, reference: RecordRef) -> Result<Option<Ufid>> {
        let record = self.open_record(reference)?;
        if record.record_number() == ROOT_RECORD {
            return Ok(None);
        }
        let Some(parent) = self.verified_parent(&record) else {
            return Ok(Some(Ufid::orphan()));
        };
        let index = parent
            .find_attribute(Some(AttributeType::IndexRoot), Some(INDEX_NAME), None, None)
            .or_else(|| parent.find_attribute(Some(AttributeType::Data), Some(""), None, None));
        Ok(Some(match index {
            Some(i) => Ufid::new(parent.record_number() as u32, i as u16, false),
            None => Ufid::orphan(),
        }))
    }

    /// Full `\`-separated path of `reference`.
    pub fn record_path(&self, reference: RecordRef) -> Result<String> {
        let record = self.open_record(reference)?;
        if record.record_number() == ROOT_RECORD {
            return Ok("\\".to_string());
        }
        let mut components = vec![record.get_filename()?.primary.name];
        let mut current = record;
        let mut rooted = false;

        for _ in 0..self.mft.record_count() {
            let Some(parent) = self.verified_parent(&current) else {
                break;
            };
            if parent.record_number() == ROOT_RECORD {
                rooted = true;
                break;
            }
            match parent.get_filename() {
                Ok(names) => components.push(names.primary.name),
                Err(_) => break,
            }
            current = parent;
        }

        components.reverse();
        let prefix = if rooted { "" } else { "\\<orphan>" };
        Ok(format!("{}\\{}", prefix, components.join("\\")))
    }

    /// Decoded entries of directory `dir` matching `name` (all when empty).
    pub fn list_directory(&self, dir: RecordRef, name: &str) -> Result<Vec<IndexEntry>> {
        let record = self.open_record(dir)?;
        DirectoryIndex::open(&record, &self.options)?.find(name)
    }

    /// UFIDs of the entries of `dir` matching `name`.
    pub fn find_in_directory(&self, dir: RecordRef, name: &str, select: Selection) -> Result<Vec<Ufid>> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for entry in self.list_directory(dir, name)? {
            let record = match self.open_record(entry.file_ref) {
                Ok(r) => r,
                Err(e) => {
                    debug!("Skipping entry {} of {}: {}", entry.file_ref, dir, e);
                    continue;
                }
            };
            let number = record.record_number() as u32;
            let mut wanted = Vec::new();
            if select.files {
                wanted.extend(record.data_attributes());
            }
            if select.directories {
                wanted.extend(record.directory_attributes());
            }
            for index in wanted {
                let ufid = Ufid::new(number, index as u16, false);
                if seen.insert(ufid) {
                    out.push(ufid);
                }
            }
        }
        Ok(out)
    }

    /// Bytes unused by the index nodes of directory `dir`.
    pub fn directory_slack_space(&self, dir: RecordRef) -> Result<u64> {
        let record = self.open_record(dir)?;
        DirectoryIndex::open(&record, &self.options)?.slack_space()
    }

    /// Every UFID of the volume selected by `select`.
    pub fn query_ufids(&self, select: Selection) -> Result<Vec<Ufid>> {
        let mut out = Vec::new();
        if select.files || select.directories {
            for number in 0..self.mft.record_count() {
                if number == BAD_CLUSTER_RECORD {
                    continue;
                }
                let record = match self.open_record(RecordRef::any(number)) {
                    Ok(r) => r,
                    Err(e) => {
                        debug!("Record {} skipped: {}", number, e);
                        continue;
                    }
                };
                let id = number as u32;
                let roots = record.directory_attributes();
                if select.files {
                    for index in record.data_attributes() {
                        out.push(Ufid::new(id, index as u16, false));
                        if select.slack && record.has_slack(index) {
                            out.push(Ufid::new(id, index as u16, true));
                        }
                    }
                    if !roots.is_empty() {
                        if let Some(index) = record.find_attribute(
                            Some(AttributeType::IndexAllocation),
                            Some(INDEX_NAME),
                            None,
                            None,
                        ) {
                            out.push(Ufid::new(id, index as u16, false));
                        }
                    }
                }
                if select.directories {
                    out.extend(roots.iter().map(|i| Ufid::new(id, *i as u16, false)));
                }
            }
        }
        if select.special {
            out.push(Ufid::unallocated());
            if self.device.cluster_to_block(self.cluster_count()) < self.device.device().block_count() {
                out.push(Ufid::file_system_slack());
            }
        }
        if select.directories {
            out.push(Ufid::orphan());
        }
        Ok(out)
    }
}

// Allocated clusters of the whole bitmap; a scan stopping early means the
// bitmap cannot be read.
fn count_allocated(bitmap: &AllocationBitmap) -> Result<u64> {
    let mut used = 0;
    let mut pos = 0;
    while pos < bitmap.bit_count() {
        let (len, set) = bitmap.get_run(pos, bitmap.bit_count() - pos)?;
        if len == 0 {
            return Err(NtfsError::BitmapUnavailable(format!(
                "run scan stopped at cluster {pos}"
            )));
        }
        if set {
            used += len;
        }
        pos += len;
    }
    Ok(used)
}
