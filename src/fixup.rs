//! Update-sequence ("fixup") codec.
//!
//! NTFS stamps the last two bytes of every physical sector of a multi-sector
//! structure (FILE records, INDX nodes) with a magic value and saves the
//! displaced bytes in an array near the start of the structure. A torn write
//! leaves a sector without the magic, which is how corruption is detected.

use byteorder::{ByteOrder, LittleEndian};
use log::{debug, warn};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FixupError {
    #[error("fixup array at {offset}+{count}x2 lies outside the {len}-byte buffer")]
    ArrayOutOfBounds { offset: usize, count: usize, len: usize },

    #[error("{sectors} sectors need {} fixup entries, header declares {count}", .sectors + 1)]
    CountMismatch { sectors: usize, count: usize },

    #[error("sector {sector} does not end with the update sequence magic")]
    MagicMismatch { sector: usize },

    #[error("invalid sector size {0}")]
    SectorSize(usize),
}

/// Verify and undo the fixups of `buf` in place.
///
/// `buf.len()` is the allocated size of the structure; it must be a whole
/// number of `sector_size` sectors and `usa_count` must be that number + 1
/// (the magic followed by one saved value per sector). On error the buffer may
/// be partially restored and must be discarded.
pub fn apply(
    buf: &mut [u8],
    sector_size: usize,
    usa_offset: usize,
    usa_count: usize,
) -> Result<(), FixupError> {
    if sector_size < 2 {
        return Err(FixupError::SectorSize(sector_size));
    }
    let array = read_array(buf, usa_offset, usa_count)?;

    let sectors = buf.len() / sector_size;
    if usa_count != sectors + 1 {
        warn!(
            "Fixup count {} does not cover {} sectors of {} bytes.",
            usa_count, sectors, sector_size
        );
        return Err(FixupError::CountMismatch {
            sectors,
            count: usa_count,
        });
    }

    let magic = array[0];
    for (sector, saved) in array[1..].iter().enumerate() {
        let tail = (sector + 1) * sector_size - 2;
        if LittleEndian::read_u16(&buf[tail..tail + 2]) != magic {
            debug!("Fixup magic 0x{:04X} missing in sector {}.", magic, sector);
            return Err(FixupError::MagicMismatch { sector });
        }
        LittleEndian::write_u16(&mut buf[tail..tail + 2], *saved);
    }
    Ok(())
}

/// Inverse of [`apply`]: save each sector's trailing bytes into the fixup
/// array and stamp `magic` in their place.
pub fn protect(
    buf: &mut [u8],
    sector_size: usize,
    usa_offset: usize,
    usa_count: usize,
    magic: u16,
) -> Result<(), FixupError> {
    if sector_size < 2 {
        return Err(FixupError::SectorSize(sector_size));
    }
    read_array(buf, usa_offset, usa_count)?;

    let sectors = buf.len() / sector_size;
    if usa_count != sectors + 1 {
        return Err(FixupError::CountMismatch {
            sectors,
            count: usa_count,
        });
    }

    LittleEndian::write_u16(&mut buf[usa_offset..usa_offset + 2], magic);
    for sector in 0..sectors {
        let tail = (sector + 1) * sector_size - 2;
        let original = LittleEndian::read_u16(&buf[tail..tail + 2]);
        let slot = usa_offset + 2 * (sector + 1);
        LittleEndian::write_u16(&mut buf[slot..slot + 2], original);
        LittleEndian::write_u16(&mut buf[tail..tail + 2], magic);
    }
    Ok(())
}

fn read_array(buf: &[u8], offset: usize, count: usize) -> Result<Vec<u16>, FixupError> {
    let end = count
        .checked_mul(2)
        .and_then(|n| n.checked_add(offset))
        .filter(|end| *end <= buf.len() && count > 0);
    let Some(end) = end else {
        return Err(FixupError::ArrayOutOfBounds {
            offset,
            count,
            len: buf.len(),
        });
    };
    Ok(buf[offset..end]
        .chunks_exact(2)
        .map(LittleEndian::read_u16)
        .collect())
}
