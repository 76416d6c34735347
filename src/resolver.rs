//! Resolution of a base record's complete attribute set, following the
//! attribute list into extension records when one is present, and stream
//! construction for resolved attributes.

use byteorder::{LittleEndian, ReadBytesExt};
use log::{debug, warn};
use prettytable::{Table, row};
use std::io::{Cursor, Read};

use crate::bitmap::AllocationBitmap;
use crate::error::{NtfsError, Result};
use crate::mft::{
    Attribute, AttributeType, DataStream, FileNameAttr, FileRecord, RecordRef, ads_table,
    attributes_table, file_names_table,
};
use crate::reconcile;
use crate::runlist;
use crate::store::MftStore;
use crate::stream::{AttributeStream, LogicalStream, ResidentStream, StreamReader};

pub const DEFAULT_MAX_ATTRIBUTE_LIST_SIZE: u64 = 256 * 1024;
const LIST_ENTRY_MIN: u16 = 0x1A;
// Header plus a 255-unit name, rounded up to 8 bytes.
const LIST_ENTRY_MAX: u16 = 0x220;

/// Where one piece of a logical attribute lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fragment {
    /// Index into the resolved record's loaded records (0 = base).
    pub record_slot: usize,
    /// Index into that record's attributes.
    pub attribute_slot: usize,
}

/// One logical attribute and its fragments in VCN order.
#[derive(Debug, Clone)]
pub struct AttributeInfo {
    pub attr_type: AttributeType,
    pub name: String,
    pub identifier: u16,
    pub fragments: Vec<Fragment>,
}

/// Primary name and aliases of a record.
#[derive(Debug, Clone)]
pub struct FileNames {
    pub primary: FileNameAttr,
    pub aliases: Vec<FileNameAttr>,
    pub parent: RecordRef,
}

/// Opens base records against a store. Deleted records need the volume
/// bitmap to materialize non-resident content.
#[derive(Clone, Copy)]
pub struct RecordResolver<'a> {
    store: &'a MftStore,
    bitmap: Option<&'a AllocationBitmap>,
    max_list_size: u64,
}

impl<'a> RecordResolver<'a> {
    pub fn new(store: &'a MftStore, bitmap: Option<&'a AllocationBitmap>) -> Self {
        Self {
            store,
            bitmap,
            max_list_size: DEFAULT_MAX_ATTRIBUTE_LIST_SIZE,
        }
    }

    pub fn with_max_list_size(mut self, max: u64) -> Self {
        self.max_list_size = max;
        self
    }

    pub fn store(&self) -> &'a MftStore {
        self.store
    }

    /// Load base record `reference` and resolve its attributes. Either the
    /// whole resolution succeeds or nothing is returned.
    pub fn open(self, reference: RecordRef) -> Result<ResolvedRecord<'a>> {
        let base = self.store.read_raw_record(reference)?;
        if base.base_reference().raw() != 0 {
            return Err(NtfsError::InvalidArgument(format!(
                "record {} is an extension of record {}",
                base.number,
                base.base_reference()
            )));
        }

        let list_slot = base
            .attributes
            .iter()
            .position(|a| a.attr_type() == AttributeType::AttributeList);

        let mut resolved = ResolvedRecord {
            resolver: self,
            records: vec![base],
            attributes: Vec::new(),
        };

        match list_slot {
            None => {
                resolved.attributes = resolved.records[0]
                    .attributes
                    .iter()
                    .enumerate()
                    .map(|(slot, a)| AttributeInfo {
                        attr_type: a.attr_type(),
                        name: a.name().to_string(),
                        identifier: a.id(),
                        fragments: vec![Fragment {
                            record_slot: 0,
                            attribute_slot: slot,
                        }],
                    })
                    .collect();
            }
            Some(slot) => {
                let content = resolved.read_attribute_list(slot)?;
                let entries = parse_attribute_list(&content, resolved.record_number())?;
                resolved.attributes = resolved.resolve_list(&entries)?;
            }
        }
        debug!(
            "Record {} resolved: {} attributes over {} records.",
            resolved.record_number(),
            resolved.attributes.len(),
            resolved.records.len()
        );
        Ok(resolved)
    }
}

/// One decoded attribute list entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeListEntry {
    pub attr_type: AttributeType,
    pub name: String,
    pub starting_vcn: u64,
    pub record: RecordRef,
    pub identifier: u16,
}

/// Decode attribute list content. Zero padding after the last entry ends
/// the list.
pub fn parse_attribute_list(content: &[u8], record: u64) -> Result<Vec<AttributeListEntry>> {
    let mut out = Vec::new();
    let mut pos = 0usize;
    while pos + LIST_ENTRY_MIN as usize <= content.len() {
        let mut cur = Cursor::new(&content[pos..]);
        let read_err = |e: std::io::Error| NtfsError::list_corrupt(record, e.to_string());
        let code = cur.read_u32::<LittleEndian>().map_err(read_err)?;
        let rec_len = cur.read_u16::<LittleEndian>().map_err(read_err)?;
        if code == 0 && rec_len == 0 {
            break;
        }
        if !(LIST_ENTRY_MIN..=LIST_ENTRY_MAX).contains(&rec_len)
            || pos + rec_len as usize > content.len()
        {
            return Err(NtfsError::list_corrupt(
                record,
                format!("entry at 0x{pos:X} has length {rec_len}"),
            ));
        }
        let name_len = cur.read_u8().map_err(read_err)? as usize;
        let name_off = cur.read_u8().map_err(read_err)? as usize;
        let starting_vcn = cur.read_u64::<LittleEndian>().map_err(read_err)?;
        let reference = RecordRef::from_raw(cur.read_u64::<LittleEndian>().map_err(read_err)?);
        let identifier = cur.read_u16::<LittleEndian>().map_err(read_err)?;

        let name = if name_len > 0 {
            let entry = &content[pos..pos + rec_len as usize];
            let raw = entry
                .get(name_off..name_off + name_len * 2)
                .ok_or_else(|| {
                    NtfsError::list_corrupt(record, format!("entry at 0x{pos:X}: name out of bounds"))
                })?;
            let mut units = Vec::with_capacity(name_len);
            let mut nc = Cursor::new(raw);
            for _ in 0..name_len {
                units.push(nc.read_u16::<LittleEndian>().map_err(read_err)?);
            }
            String::from_utf16(&units).map_err(|e| NtfsError::list_corrupt(record, e.to_string()))?
        } else {
            String::new()
        };

        out.push(AttributeListEntry {
            attr_type: AttributeType::from_code(code),
            name,
            starting_vcn,
            record: reference,
            identifier,
        });
        pos += rec_len as usize;
    }
    Ok(out)
}

// Appending `count` clusters must keep the stream's byte size addressable.
fn check_span(stream: &LogicalStream, record: u64, count: u64) -> Result<()> {
    stream
        .block_count()
        .checked_add(count)
        .and_then(|blocks| blocks.checked_mul(stream.cluster_size()))
        .map(|_| ())
        .ok_or_else(|| {
            NtfsError::corrupt(
                record,
                format!("{count} more clusters overflow a stream of {} clusters", stream.block_count()),
            )
        })
}

/// A base record with its attribute set resolved across extension records.
pub struct ResolvedRecord<'a> {
    resolver: RecordResolver<'a>,
    records: Vec<FileRecord>,
    attributes: Vec<AttributeInfo>,
}

impl<'a> ResolvedRecord<'a> {
    pub fn resolver(&self) -> RecordResolver<'a> {
        self.resolver
    }

    pub fn base_record(&self) -> &FileRecord {
        &self.records[0]
    }

    pub fn record_number(&self) -> u64 {
        self.records[0].number
    }

    pub fn reference(&self) -> RecordRef {
        self.records[0].reference()
    }

    pub fn sequence_number(&self) -> u16 {
        self.records[0].sequence_number()
    }

    pub fn is_deleted(&self) -> bool {
        !self.records[0].is_in_use()
    }

    /// A directory is a record with an `$I30` index root.
    pub fn is_directory(&self) -> bool {
        !self.directory_attributes().is_empty()
    }

    pub fn attributes(&self) -> &[AttributeInfo] {
        &self.attributes
    }

    pub fn attribute_count(&self) -> usize {
        self.attributes.len()
    }

    pub fn attribute_type(&self, index: usize) -> Option<AttributeType> {
        self.attributes.get(index).map(|a| a.attr_type)
    }

    pub fn attribute_name(&self, index: usize) -> Option<&str> {
        self.attributes.get(index).map(|a| a.name.as_str())
    }

    pub fn attribute_identifier(&self, index: usize) -> Option<u16> {
        self.attributes.get(index).map(|a| a.identifier)
    }

    fn fragment(&self, fragment: Fragment) -> (&FileRecord, &Attribute) {
        let record = &self.records[fragment.record_slot];
        (record, &record.attributes[fragment.attribute_slot])
    }

    /// Concrete attributes of logical attribute `index`, in order.
    pub fn fragments(&self, index: usize) -> impl Iterator<Item = (&FileRecord, &Attribute)> {
        self.attributes
            .get(index)
            .into_iter()
            .flat_map(|info| info.fragments.iter())
            .map(|f| self.fragment(*f))
    }

    /// First fragment of logical attribute `index`.
    pub fn attribute(&self, index: usize) -> Option<&Attribute> {
        self.fragments(index).next().map(|(_, a)| a)
    }

    /// Next attribute after `after` matching every given criterion.
    pub fn find_attribute(
        &self,
        attr_type: Option<AttributeType>,
        name: Option<&str>,
        identifier: Option<u16>,
        after: Option<usize>,
    ) -> Option<usize> {
        let start = after.map_or(0, |a| a + 1);
        self.attributes
            .iter()
            .enumerate()
            .skip(start)
            .find(|(_, a)| {
                attr_type.is_none_or(|t| a.attr_type == t)
                    && name.is_none_or(|n| a.name == n)
                    && identifier.is_none_or(|i| a.identifier == i)
            })
            .map(|(i, _)| i)
    }

    /// Bytes of a resident attribute held in a single fragment.
    pub fn resident_attribute(&self, index: usize) -> Option<&[u8]> {
        let info = self.attributes.get(index)?;
        if info.fragments.len() != 1 {
            return None;
        }
        match self.fragment(info.fragments[0]).1 {
            Attribute::Resident { value, .. } => Some(value),
            Attribute::NonResident { .. } => None,
        }
    }

    /// Every `$DATA` attribute.
    pub fn data_attributes(&self) -> Vec<usize> {
        self.indexes_of(AttributeType::Data, None)
    }

    /// Every `$I30` index root.
    pub fn directory_attributes(&self) -> Vec<usize> {
        self.indexes_of(AttributeType::IndexRoot, Some("$I30"))
    }

    fn indexes_of(&self, attr_type: AttributeType, name: Option<&str>) -> Vec<usize> {
        let mut out = Vec::new();
        let mut after = None;
        while let Some(i) = self.find_attribute(Some(attr_type), name, None, after) {
            out.push(i);
            after = Some(i);
        }
        out
    }

    /// Named `$DATA` attributes.
    pub fn alternate_data_streams(&self) -> Vec<DataStream> {
        self.data_attributes()
            .into_iter()
            .filter(|i| !self.attributes[*i].name.is_empty())
            .filter_map(|i| {
                let attr = self.attribute(i)?;
                Some(DataStream {
                    name: self.attributes[i].name.clone(),
                    size: attr.data_size(),
                    resident: attr.is_resident(),
                })
            })
            .collect()
    }

    /// Whether a non-resident attribute has bytes between its logical and
    /// allocated length.
    pub fn has_slack(&self, index: usize) -> bool {
        match self.attribute(index) {
            Some(Attribute::NonResident { non_resident, .. }) => {
                non_resident.allocated_size > non_resident.real_size
            }
            _ => false,
        }
    }

    /// Primary name (highest-ranked non-DOS name) plus every other name.
    pub fn get_filename(&self) -> Result<FileNames> {
        let mut names: Vec<FileNameAttr> = Vec::new();
        for index in self.indexes_of(AttributeType::FileName, None) {
            if let Some(Attribute::Resident { value, .. }) = self.attribute(index) {
                match FileNameAttr::parse(value) {
                    Some(name) => names.push(name),
                    None => debug!(
                        "Record {}: undecodable $FILE_NAME #{}.",
                        self.record_number(),
                        index
                    ),
                }
            }
        }

        let best = names
            .iter()
            .enumerate()
            .filter(|(_, n)| !n.is_dos_only())
            .fold(None::<(usize, u8)>, |best, (i, n)| match best {
                Some((_, rank)) if rank >= n.desirability() => best,
                _ => Some((i, n.desirability())),
            })
            .map(|(i, _)| i)
            .ok_or_else(|| {
                NtfsError::AttributeNotFound(format!(
                    "record {} has no primary $FILE_NAME",
                    self.record_number()
                ))
            })?;

        let primary = names.remove(best);
        Ok(FileNames {
            parent: primary.parent(),
            primary,
            aliases: names,
        })
    }

    /// Content stream of attribute `index`, or its slack (the bytes between
    /// logical and allocated length) when `slack` is set.
    pub fn open_attribute(&self, index: usize, slack: bool) -> Result<AttributeStream> {
        let info = self.attributes.get(index).ok_or_else(|| {
            NtfsError::InvalidArgument(format!(
                "record {} has no attribute #{index}",
                self.record_number()
            ))
        })?;
        let Some(first) = info.fragments.first() else {
            return Err(NtfsError::list_corrupt(
                self.record_number(),
                format!("attribute #{index} has no fragments"),
            ));
        };

        if let (
            record,
            Attribute::Resident {
                header,
                resident,
                value,
            },
        ) = self.fragment(*first)
        {
            if info.fragments.len() != 1 {
                return Err(NtfsError::list_corrupt(
                    self.record_number(),
                    format!("resident attribute #{index} has {} fragments", info.fragments.len()),
                ));
            }
            if slack {
                return Err(NtfsError::InvalidArgument(format!(
                    "resident attribute #{index} has no slack"
                )));
            }
            let physical = self
                .resolver
                .store
                .record_location(record.number)
                .map(|p| p + u64::from(header.offset) + u64::from(resident.value_offset));
            return Ok(AttributeStream::Resident(ResidentStream::new(
                value.clone(),
                physical,
            )));
        }

        let stream = self.build_stream(index, info)?;
        if !slack {
            return Ok(AttributeStream::NonResident(stream));
        }
        let Some(Attribute::NonResident { non_resident, .. }) = self.attribute(index) else {
            return Err(NtfsError::InvalidArgument(format!(
                "attribute #{index} has no slack"
            )));
        };
        let mut whole = stream;
        let allocated = non_resident.allocated_size.min(whole.allocated_length());
        let real = non_resident.real_size.min(allocated);
        whole.set_length(allocated);
        Ok(AttributeStream::NonResident(
            whole.sub_stream(real, allocated - real),
        ))
    }

    fn build_stream(&self, index: usize, info: &AttributeInfo) -> Result<LogicalStream> {
        let number = self.record_number();
        let device = self.resolver.store.device();
        let mut stream = LogicalStream::new(device.clone());
        let mut length = None;

        for fragment in &info.fragments {
            let (record, attr) = self.fragment(*fragment);
            let Attribute::NonResident {
                non_resident,
                run_list,
                ..
            } = attr
            else {
                return Err(NtfsError::list_corrupt(
                    number,
                    format!("attribute #{index} mixes resident and non-resident fragments"),
                ));
            };
            if attr.is_compressed() {
                return Err(NtfsError::UnsupportedAttribute(format!(
                    "record {number} attribute #{index} ({:?} '{}') is compressed",
                    info.attr_type, info.name
                )));
            }
            // Logical and allocated sizes are only meaningful in the first fragment.
            if length.is_none() {
                length = Some(non_resident.real_size);
            }

            if non_resident.lowest_vcn != stream.block_count() {
                warn!(
                    "Record {} attribute #{}: fragment starts at VCN {} but {} clusters are mapped.",
                    number,
                    index,
                    non_resident.lowest_vcn,
                    stream.block_count()
                );
                if non_resident.lowest_vcn > stream.block_count() {
                    let gap = non_resident.lowest_vcn - stream.block_count();
                    check_span(&stream, record.number, gap)?;
                    stream.add_sparse(gap);
                }
            }

            let deleted = !record.is_in_use();
            for (lcn, count) in runlist::decode_absolute(run_list)
                .map_err(|e| NtfsError::corrupt(record.number, e.to_string()))?
            {
                check_span(&stream, record.number, count)?;
                if let Some(lcn) = lcn {
                    if lcn.checked_add(count).is_none_or(|end| end > device.cluster_count()) {
                        return Err(NtfsError::corrupt(
                            record.number,
                            format!(
                                "attribute #{index}: run of {count} clusters at LCN 0x{lcn:X} \
                                 lies outside the volume ({} clusters)",
                                device.cluster_count()
                            ),
                        ));
                    }
                }
                match lcn {
                    None => stream.add_sparse(count),
                    Some(lcn) if deleted => {
                        let bitmap = self.resolver.bitmap.ok_or_else(|| {
                            NtfsError::BitmapUnavailable(format!(
                                "record {number} is deleted and no volume bitmap is loaded"
                            ))
                        })?;
                        reconcile::add_reconciled_run(&mut stream, bitmap, lcn, count)?;
                    }
                    Some(lcn) => stream.add_run(Some(lcn), count),
                }
            }
        }
        stream.set_length(length.unwrap_or(0));
        Ok(stream)
    }

    fn read_attribute_list(&self, slot: usize) -> Result<Vec<u8>> {
        let number = self.record_number();
        let attr = &self.records[0].attributes[slot];
        let size = attr.data_size();
        if size > self.resolver.max_list_size {
            return Err(NtfsError::list_corrupt(
                number,
                format!("attribute list of {size} bytes exceeds the configured limit"),
            ));
        }
        let content = match attr {
            Attribute::Resident { value, .. } => value.clone(),
            Attribute::NonResident { .. } => {
                let info = AttributeInfo {
                    attr_type: AttributeType::AttributeList,
                    name: attr.name().to_string(),
                    identifier: attr.id(),
                    fragments: vec![Fragment {
                        record_slot: 0,
                        attribute_slot: slot,
                    }],
                };
                let stream = self.build_stream(slot, &info)?;
                let mut buf = Vec::new();
                StreamReader::new(&stream)
                    .read_to_end(&mut buf)
                    .map_err(NtfsError::DeviceIo)?;
                buf
            }
        };
        Ok(content)
    }

    // Index of the loaded record `reference`, reading it on first use.
    fn load(&mut self, reference: RecordRef) -> Result<usize> {
        let base = &self.records[0];
        let number = base.number;
        if reference.number() == number {
            return Ok(0);
        }
        if let Some(slot) = self
            .records
            .iter()
            .position(|r| r.number == reference.number())
        {
            return Ok(slot);
        }
        let ext = self.resolver.store.read_raw_record(reference)?;
        if ext.base_reference().number() != number {
            return Err(NtfsError::list_corrupt(
                number,
                format!(
                    "record {} belongs to base {}",
                    ext.number,
                    ext.base_reference()
                ),
            ));
        }
        if ext.is_in_use() != self.records[0].is_in_use() {
            return Err(NtfsError::list_corrupt(
                number,
                format!("record {} has a different in-use state", ext.number),
            ));
        }
        self.records.push(ext);
        Ok(self.records.len() - 1)
    }

    fn resolve_list(&mut self, entries: &[AttributeListEntry]) -> Result<Vec<AttributeInfo>> {
        let number = self.record_number();
        let mut out: Vec<AttributeInfo> = Vec::new();

        for entry in entries {
            let slot = self.load(entry.record)?;
            let record = &self.records[slot];
            let (attribute_slot, _) = record
                .find(entry.attr_type, &entry.name, entry.identifier)
                .ok_or_else(|| {
                    NtfsError::list_corrupt(
                        number,
                        format!(
                            "{:?} '{}' #{} not found in record {}",
                            entry.attr_type, entry.name, entry.identifier, record.number
                        ),
                    )
                })?;
            let fragment = Fragment {
                record_slot: slot,
                attribute_slot,
            };
            match out.last_mut() {
                Some(last)
                    if last.attr_type == entry.attr_type
                        && last.identifier == entry.identifier
                        && last.name == entry.name =>
                {
                    last.fragments.push(fragment)
                }
                _ => out.push(AttributeInfo {
                    attr_type: entry.attr_type,
                    name: entry.name.clone(),
                    identifier: entry.identifier,
                    fragments: vec![fragment],
                }),
            }
        }

        if out.is_empty() {
            return Err(NtfsError::list_corrupt(number, "attribute list decoded to nothing"));
        }
        Ok(out)
    }

    pub fn to_string(&self) -> String {
        let mut out = String::new();
        let base = self.base_record();
        out.push_str(&base.header_table());
        out.push('\n');
        let mut hdr = Table::new();
        hdr.add_row(row!["Resolved Record"]);
        hdr.add_row(row![b -> "Reference", self.reference()]);
        hdr.add_row(row![b -> "Deleted", self.is_deleted()]);
        hdr.add_row(row![b -> "Directory", self.is_directory()]);
        hdr.add_row(row![b -> "Records", self.records.len()]);
        out.push_str(&hdr.to_string());
        out.push('\n');
        out.push_str(&attributes_table(
            self.attributes
                .iter()
                .filter_map(|info| info.fragments.first())
                .map(|f| {
                    let (record, attr) = self.fragment(*f);
                    (record.number, attr)
                }),
        ));
        if let Some(std) = base.standard_information() {
            out.push('\n');
            out.push_str(&std.to_string());
        }
        let names: Vec<FileNameAttr> = match self.get_filename() {
            Ok(n) => std::iter::once(n.primary).chain(n.aliases).collect(),
            Err(_) => base.file_names(),
        };
        if !names.is_empty() {
            out.push('\n');
            out.push_str(&file_names_table(&names));
        }
        let ads = self.alternate_data_streams();
        if !ads.is_empty() {
            out.push('\n');
            out.push_str(&ads_table(&ads));
        }
        out
    }

    pub fn to_json(&self) -> serde_json::Value {
        let attrs: Vec<serde_json::Value> = self
            .attributes
            .iter()
            .enumerate()
            .map(|(i, info)| {
                serde_json::json!({
                    "index": i,
                    "type": info.attr_type,
                    "name": info.name,
                    "id": info.identifier,
                    "records": info.fragments.iter()
                        .map(|f| self.records[f.record_slot].number)
                        .collect::<Vec<_>>(),
                    "size": self.attribute(i).map(|a| a.data_size()),
                    "resident": self.attribute(i).map(|a| a.is_resident()),
                })
            })
            .collect();
        let names = self.get_filename().ok();
        serde_json::json!({
            "record": self.record_number(),
            "sequence": self.sequence_number(),
            "deleted": self.is_deleted(),
            "directory": self.is_directory(),
            "header": &self.base_record().header,
            "standard_information": self.base_record().standard_information(),
            "primary_name": names.as_ref().map(|n| n.primary.to_json()),
            "ads": self.alternate_data_streams(),
            "aliases": names
                .as_ref()
                .map(|n| n.aliases.iter().map(|a| a.to_json()).collect::<Vec<_>>())
                .unwrap_or_default(),
            "attributes": attrs,
        })
    }
}
