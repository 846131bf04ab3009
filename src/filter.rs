use std::fmt;
use std::path::Path;

use crate::commons::{AlignmentRecord, Entry, FilterThresholds};
use crate::err::Result;

/// Why a record was discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Rejection {
    Chromosome,
    MappingQuality,
    Flag,
    TemplateLength,
    Clipping,
}

impl Rejection {
    pub fn name(&self) -> &'static str {
        match self {
            Rejection::Chromosome => "chromosome",
            Rejection::MappingQuality => "mapping_quality",
            Rejection::Flag => "flag",
            Rejection::TemplateLength => "template_length",
            Rejection::Clipping => "clipping",
        }
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Keep/discard decision for single alignment records.
///
/// The filter holds no state besides its thresholds, so the same instance can be
/// shared between threads and applied to records in any order.
#[derive(Debug, Clone, Default)]
pub struct RecordFilter {
    thresholds: FilterThresholds,
}

impl RecordFilter {
    pub fn new(thresholds: FilterThresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &FilterThresholds {
        &self.thresholds
    }

    /// Header lines are always kept. Records are kept when [`RecordFilter::check`] passes.
    pub fn keep(&self, entry: &Entry) -> bool {
        match entry {
            Entry::Header => true,
            Entry::Record(record) => self.check(record).is_ok(),
        }
    }

    /// Runs the record checks in order and returns the first one that fails.
    pub fn check(&self, record: &AlignmentRecord) -> std::result::Result<(), Rejection> {
        // Also applied by the decoding stage, but not assumed here.
        if record.mapq < self.thresholds.mapq_min() {
            return Err(Rejection::MappingQuality);
        }

        if !self.thresholds.allowed_flags().contains(&record.flag) {
            return Err(Rejection::Flag);
        }

        if record.tlen.unsigned_abs() >= self.thresholds.tlen_abs_max() {
            return Err(Rejection::TemplateLength);
        }

        // Reverse strand records must not end with a clip, forward strand records must
        // not start with one.
        let clipped = if record.is_reverse_strand() {
            record.ends_with_clip()
        } else {
            record.starts_with_clip()
        };
        if clipped {
            return Err(Rejection::Clipping);
        }

        Ok(())
    }

    /// Whether records aligned to `name` reach the predicate at all.
    pub fn allows_reference(&self, name: &[u8]) -> bool {
        self.thresholds
            .chromosomes()
            .iter()
            .any(|chromosome| chromosome.as_bytes() == name)
    }
}

/// Record counts of one filtering run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterStats {
    pub records: u64,
    pub kept: u64,
    pub chromosome: u64,
    pub mapping_quality: u64,
    pub flag: u64,
    pub template_length: u64,
    pub clipping: u64,
}

#[derive(Debug, serde::Serialize)]
struct MetricRow {
    metric: &'static str,
    count: u64,
}

impl FilterStats {
    pub fn add(&mut self, outcome: std::result::Result<(), Rejection>) {
        self.records += 1;
        match outcome {
            Ok(()) => self.kept += 1,
            Err(Rejection::Chromosome) => self.chromosome += 1,
            Err(Rejection::MappingQuality) => self.mapping_quality += 1,
            Err(Rejection::Flag) => self.flag += 1,
            Err(Rejection::TemplateLength) => self.template_length += 1,
            Err(Rejection::Clipping) => self.clipping += 1,
        }
    }

    pub fn rejected(&self) -> u64 {
        self.records - self.kept
    }

    fn rows(&self) -> Vec<MetricRow> {
        vec![
            MetricRow { metric: "records", count: self.records },
            MetricRow { metric: "kept", count: self.kept },
            MetricRow { metric: Rejection::Chromosome.name(), count: self.chromosome },
            MetricRow { metric: Rejection::MappingQuality.name(), count: self.mapping_quality },
            MetricRow { metric: Rejection::Flag.name(), count: self.flag },
            MetricRow { metric: Rejection::TemplateLength.name(), count: self.template_length },
            MetricRow { metric: Rejection::Clipping.name(), count: self.clipping },
        ]
    }

    pub fn log(&self) {
        log::info!(
            "{} of {} records kept ({} rejected)",
            self.kept,
            self.records,
            self.rejected()
        );
        for row in self.rows().iter().skip(2).filter(|row| row.count > 0) {
            log::info!("  rejected by {}: {}", row.metric, row.count);
        }
    }

    /// Writes the counts as a tab separated `metric`/`count` table.
    pub fn write_tsv(&self, path: &Path) -> Result<()> {
        let mut writer = csv::WriterBuilder::new()
            .delimiter(b'\t')
            .from_path(path)?;
        for row in self.rows() {
            writer.serialize(row)?;
        }
        writer.flush()?;
        Ok(())
    }
}
