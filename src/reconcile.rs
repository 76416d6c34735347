//! Deleted-run reconciliation.
//!
//! A deleted record still lists the clusters it used to own, but some of them
//! may since have been handed to a live file. Clusters the volume bitmap marks
//! allocated are replaced with sparse runs so the deleted file never exposes
//! another file's content.

use log::{debug, warn};

use crate::bitmap::AllocationBitmap;
use crate::error::Result;
use crate::stream::LogicalStream;

/// Split the claimed run `(start, length)` into `(Some(cluster), n)` pieces
/// for clusters currently free and `(None, n)` for clusters currently in
/// use. Piece lengths always sum to `length`.
pub fn reconcile_run(
    bitmap: &AllocationBitmap,
    start: u64,
    length: u64,
) -> Result<Vec<(Option<u64>, u64)>> {
    let mut pieces = Vec::new();
    let mut pos = start;
    let mut remaining = length;

    while remaining > 0 {
        let (n, allocated) = bitmap.get_run(pos, remaining)?;
        if n == 0 {
            warn!(
                "Deleted run 0x{:X}+{} reaches past the bitmap end; {} clusters kept sparse.",
                start, length, remaining
            );
            pieces.push((None, remaining));
            break;
        }
        if allocated {
            debug!("Clusters 0x{:X}+{} reallocated, masking.", pos, n);
            pieces.push((None, n));
        } else {
            pieces.push((Some(pos), n));
        }
        pos += n;
        remaining -= n;
    }
    Ok(pieces)
}

/// Append the reconciled pieces of a claimed run to `stream`.
pub fn add_reconciled_run(
    stream: &mut LogicalStream,
    bitmap: &AllocationBitmap,
    start: u64,
    length: u64,
) -> Result<()> {
    for (physical, count) in reconcile_run(bitmap, start, length)? {
        stream.add_run(physical, count);
    }
    Ok(())
}
