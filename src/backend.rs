use std::path::Path;

use crate::err::Result;
use crate::filter::{FilterStats, RecordFilter};
use crate::subsample::SubsampleParam;

/// The record-stream operations the commands need from an alignment toolkit.
///
/// Implementations decode a BAM file into a record stream, transform the stream and
/// encode it back. The decisions themselves come from [`RecordFilter`] and
/// [`SubsampleParam`], so every implementation shares them.
pub trait Backend {
    /// Counts every record of `input` by reading it in full.
    fn count_records(&self, input: &Path) -> Result<u64>;

    /// Writes to `output` the records of `input` that `filter` keeps, in input order,
    /// with the header unchanged.
    fn filter(&self, input: &Path, output: &Path, filter: &RecordFilter) -> Result<FilterStats>;

    /// Writes to `output` the templates of `input` selected by `param`.
    fn subsample(&self, input: &Path, output: &Path, param: &SubsampleParam) -> Result<()>;
}

/// Builds the index of a published BAM file.
pub trait Indexer {
    fn index(&self, bam: &Path) -> Result<()>;
}

/// `<bam>.bai`, where `samtools index` writes the index.
pub fn index_path(bam: &Path) -> std::path::PathBuf {
    let mut path = bam.as_os_str().to_owned();
    path.push(".bai");
    path.into()
}

/// Existing index of `bam`: `<bam>.bai` or, failing that, `<bam stem>.bai`.
pub fn find_index(bam: &Path) -> Option<std::path::PathBuf> {
    let candidates = [index_path(bam), bam.with_extension("bai")];
    candidates.into_iter().find(|path| path.is_file())
}
