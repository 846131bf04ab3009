use std::io;
use std::path::Path;

use noodles::bam::bai;
use noodles::csi::binning_index::ReferenceSequence as _;
use noodles::csi::BinningIndex as _;

use crate::backend::{find_index, Backend};
use crate::err::{BamSieveError, Result};

/// Total number of reads (mapped and unmapped) in `input`.
///
/// The counts stored in the BAM index are used when available. Without an index, or
/// when it cannot be read, the backend counts the records of the whole file. The two
/// can disagree for files whose index statistics leave some records out.
pub fn count_reads(input: &Path, backend: &dyn Backend) -> Result<u64> {
    if !input.is_file() {
        return Err(BamSieveError::Input {
            path: input.to_path_buf(),
            reason: "file does not exist".to_string(),
        });
    }

    match find_index(input) {
        Some(index) => match count_from_index(&index) {
            Ok(Some(total)) => return Ok(total),
            Ok(None) => log::warn!(
                "Index {} has no read counts, counting records instead",
                index.display()
            ),
            Err(e) => log::warn!(
                "Could not read index {} ({e}), counting records instead",
                index.display()
            ),
        },
        None => log::warn!(
            "No index found for {}, counting records instead",
            input.display()
        ),
    }

    backend
        .count_records(input)
        .map_err(|e| BamSieveError::Input {
            path: input.to_path_buf(),
            reason: format!("could not count records: {e}"),
        })
}

/// Sums the mapped and unmapped counts of a BAM index. `None` when a reference with
/// data carries no counts.
fn count_from_index(index: &Path) -> io::Result<Option<u64>> {
    let index = bai::read(index)?;

    let mut total = index.unplaced_unmapped_record_count().unwrap_or(0);
    for reference_sequence in index.reference_sequences() {
        match reference_sequence.metadata() {
            Some(metadata) => {
                total += metadata.mapped_record_count() + metadata.unmapped_record_count();
            }
            None if reference_sequence.bins().is_empty() => {}
            None => return Ok(None),
        }
    }

    Ok(Some(total))
}
