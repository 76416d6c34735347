//! Opaque 64-bit file identifiers handed to callers.
//!
//! Layout, least significant byte first: flags (bit 0 = slack), a reserved
//! byte, the 16-bit attribute index and the 32-bit record number. The
//! record's sequence number is not kept.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
pub struct Ufid(u64);

/// What a UFID designates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UfidKind {
    /// Attribute `attribute` of MFT record `record`.
    Attribute { record: u32, attribute: u16, slack: bool },
    /// Every unallocated cluster of the volume.
    Unallocated,
    /// Space past the last cluster of the file system.
    FileSystemSlack,
    /// Virtual directory holding records whose parent cannot be resolved.
    Orphan,
}

impl Ufid {
    pub const FLAG_SLACK: u8 = 0x01;
    pub const UNALLOCATED_RECORD: u32 = 0xFFFF_FFFE;
    pub const FS_SLACK_RECORD: u32 = 0xFFFF_FFFD;
    pub const ORPHAN_RECORD: u32 = 0xFFFF_FFFC;

    pub fn new(record: u32, attribute: u16, slack: bool) -> Self {
        let flags = if slack { Self::FLAG_SLACK } else { 0 };
        Self(u64::from(flags) | (u64::from(attribute) << 16) | (u64::from(record) << 32))
    }

    pub fn unallocated() -> Self {
        Self::new(Self::UNALLOCATED_RECORD, 0, false)
    }

    pub fn file_system_slack() -> Self {
        Self::new(Self::FS_SLACK_RECORD, 0, false)
    }

    pub fn orphan() -> Self {
        Self::new(Self::ORPHAN_RECORD, 0, false)
    }

    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u64 {
        self.0
    }

    pub fn record(self) -> u32 {
        (self.0 >> 32) as u32
    }

    pub fn attribute_index(self) -> u16 {
        (self.0 >> 16) as u16
    }

    pub fn flags(self) -> u8 {
        self.0 as u8
    }

    pub fn is_slack(self) -> bool {
        self.flags() & Self::FLAG_SLACK != 0
    }

    pub fn kind(self) -> UfidKind {
        match self.record() {
            Self::UNALLOCATED_RECORD => UfidKind::Unallocated,
            Self::FS_SLACK_RECORD => UfidKind::FileSystemSlack,
            Self::ORPHAN_RECORD => UfidKind::Orphan,
            record => UfidKind::Attribute {
                record,
                attribute: self.attribute_index(),
                slack: self.is_slack(),
            },
        }
    }
}

impl fmt::Display for Ufid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016X}", self.0)
    }
}
