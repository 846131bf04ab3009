use std::fs::File;
use std::io;
use std::path::Path;

use noodles::bam;
use noodles::sam;
use noodles::sam::alignment::io::Write as AlignmentWrite;
use rayon::prelude::*;

use crate::backend::Backend;
use crate::commons::{AlignmentRecord, MISSING_MAPPING_QUALITY};
use crate::err::{BamSieveError, Result, StageFailure};
use crate::filter::{FilterStats, Rejection, RecordFilter};
use crate::subsample::{PairSampler, SubsampleParam};

/// Records evaluated together by the thread pool. Bounds memory use.
const CHUNK_SIZE: usize = 4096;

/// Decodes and encodes BAM in this process with `noodles`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Native;

fn stage_error(stage: &'static str) -> impl Fn(io::Error) -> BamSieveError {
    move |e| BamSieveError::Pipeline(vec![StageFailure::new(stage, e.to_string())])
}

/// The fields of `record` the filter looks at.
pub fn alignment_record(record: &bam::Record) -> io::Result<AlignmentRecord> {
    let cigar = record.cigar().iter().collect::<io::Result<Vec<_>>>()?;
    let mapq = record
        .mapping_quality()
        .map(|mapping_quality| mapping_quality.get())
        .unwrap_or(MISSING_MAPPING_QUALITY);
    Ok(AlignmentRecord::new(
        u16::from(record.flags()),
        mapq,
        cigar,
        record.template_length(),
    ))
}

/// Which reference sequences of `header` the filter accepts, by index.
fn allowed_references(header: &sam::Header, filter: &RecordFilter) -> Vec<bool> {
    header
        .reference_sequences()
        .keys()
        .map(|name| {
            let name: &[u8] = name.as_ref();
            filter.allows_reference(name)
        })
        .collect()
}

fn classify(
    record: &bam::Record,
    allowed: &[bool],
    filter: &RecordFilter,
) -> io::Result<std::result::Result<(), Rejection>> {
    let on_allowed_reference = match record.reference_sequence_id().transpose()? {
        Some(id) => allowed.get(id).copied().unwrap_or(false),
        None => false,
    };
    if !on_allowed_reference {
        return Ok(Err(Rejection::Chromosome));
    }

    Ok(filter.check(&alignment_record(record)?))
}

impl Backend for Native {
    fn count_records(&self, input: &Path) -> Result<u64> {
        let decode = stage_error("decode (noodles)");
        let mut reader = bam::io::reader::Builder::default()
            .build_from_path(input)
            .map_err(&decode)?;
        reader.read_header().map_err(&decode)?;

        let mut n = 0;
        for result in reader.records() {
            result.map_err(&decode)?;
            n += 1;
        }
        Ok(n)
    }

    fn filter(&self, input: &Path, output: &Path, filter: &RecordFilter) -> Result<FilterStats> {
        let decode = stage_error("decode (noodles)");
        let check = stage_error("filter");
        let encode = stage_error("encode (noodles)");

        let mut reader = bam::io::reader::Builder::default()
            .build_from_path(input)
            .map_err(&decode)?;
        let header = reader.read_header().map_err(&decode)?;
        let mut writer = bam::io::Writer::new(File::create(output).map_err(&encode)?);
        writer.write_header(&header).map_err(&encode)?;
        let allowed = allowed_references(&header, filter);

        let mut stats = FilterStats::default();
        let mut records = reader.records();
        loop {
            let chunk = records
                .by_ref()
                .take(CHUNK_SIZE)
                .collect::<io::Result<Vec<bam::Record>>>()
                .map_err(&decode)?;
            if chunk.is_empty() {
                break;
            }

            let outcomes = chunk
                .par_iter()
                .map(|record| classify(record, &allowed, filter))
                .collect::<io::Result<Vec<_>>>()
                .map_err(&check)?;

            for (record, outcome) in chunk.iter().zip(outcomes) {
                if outcome.is_ok() {
                    writer
                        .write_alignment_record(&header, record)
                        .map_err(&encode)?;
                }
                stats.add(outcome);
            }
        }

        writer.finish(&header).map_err(&encode)?;
        Ok(stats)
    }

    fn subsample(&self, input: &Path, output: &Path, param: &SubsampleParam) -> Result<()> {
        let decode = stage_error("decode (noodles)");
        let encode = stage_error("encode (noodles)");

        let mut reader = bam::io::reader::Builder::default()
            .build_from_path(input)
            .map_err(&decode)?;
        let header = reader.read_header().map_err(&decode)?;
        let mut writer = bam::io::Writer::new(File::create(output).map_err(&encode)?);
        writer.write_header(&header).map_err(&encode)?;
        let sampler = PairSampler::new(param);

        let mut kept: u64 = 0;
        let mut total: u64 = 0;
        for result in reader.records() {
            let record = result.map_err(&decode)?;
            total += 1;
            let keep = match record.name() {
                Some(name) => sampler.keep(AsRef::<[u8]>::as_ref(&name)),
                None => sampler.keep(b""),
            };
            if keep {
                writer
                    .write_alignment_record(&header, &record)
                    .map_err(&encode)?;
                kept += 1;
            }
        }

        writer.finish(&header).map_err(&encode)?;
        log::info!("Kept {kept} of {total} records");
        Ok(())
    }
}
