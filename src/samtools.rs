use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::backend::{Backend, Indexer};
use crate::commons::{parse_sam_line, Entry};
use crate::err::{BamSieveError, Result};
use crate::filter::{FilterStats, RecordFilter};
use crate::pipeline::{run_chain, Stage};
use crate::subsample::SubsampleParam;

/// `samtools` decodes, encodes, samples, counts and indexes; only the record filter runs
/// in this process.
#[derive(Debug, Clone)]
pub struct Samtools {
    executable: PathBuf,
    threads: usize,
}

impl Samtools {
    pub fn new(executable: impl Into<PathBuf>, threads: usize) -> Self {
        Self {
            executable: executable.into(),
            threads: threads.max(1),
        }
    }

    fn command(&self, subcommand: &str) -> Command {
        let mut command = Command::new(&self.executable);
        command.arg(subcommand);
        command
    }

    /// SAM text with header, restricted to the filter's chromosomes and mapping quality.
    fn decode_stage(&self, input: &Path, filter: &RecordFilter) -> Stage {
        let thresholds = filter.thresholds();
        let mut command = self.command("view");
        command
            .arg("-h")
            .arg("-q")
            .arg(thresholds.mapq_min().to_string())
            .arg(input)
            .args(thresholds.chromosomes());
        Stage::new("decode (samtools view -h)", command)
    }

    fn encode_stage(&self, output: &Path) -> Stage {
        // One thread reads the pipe, the others compress.
        let threads = self.threads.saturating_sub(1).max(1);
        let mut command = self.command("view");
        command
            .arg("-b")
            .arg("-@")
            .arg(threads.to_string())
            .arg("-o")
            .arg(output);
        Stage::new("encode (samtools view -b)", command)
    }
}

/// Copies the SAM lines of `reader` that `filter` keeps to `writer`.
///
/// Lines are handled as bytes, so read names and optional fields need not be UTF-8.
pub fn filter_sam_stream(
    reader: &mut dyn BufRead,
    writer: &mut dyn Write,
    filter: &RecordFilter,
) -> Result<FilterStats> {
    let mut stats = FilterStats::default();
    let mut line = Vec::new();
    let mut line_number = 0;

    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line)? == 0 {
            break;
        }
        line_number += 1;

        let mut end = line.len();
        while end > 0 && matches!(line[end - 1], b'\n' | b'\r') {
            end -= 1;
        }
        let text = &line[..end];
        if text.is_empty() {
            continue;
        }

        let keep = match parse_sam_line(text, line_number)? {
            Entry::Header => true,
            Entry::Record(record) => {
                let outcome = filter.check(&record);
                stats.add(outcome);
                outcome.is_ok()
            }
        };
        if keep {
            writer.write_all(text)?;
            writer.write_all(b"\n")?;
        }
    }

    Ok(stats)
}

impl Backend for Samtools {
    fn count_records(&self, input: &Path) -> Result<u64> {
        let mut command = self.command("view");
        command
            .arg("-c")
            .arg("-@")
            .arg(self.threads.to_string())
            .arg(input);
        let stdout = Stage::new("count (samtools view -c)", command).output()?;
        let text = String::from_utf8_lossy(&stdout);
        text.trim().parse::<u64>().map_err(|e| BamSieveError::Input {
            path: input.to_path_buf(),
            reason: format!("unexpected record count {:?}: {e}", text.trim()),
        })
    }

    fn filter(&self, input: &Path, output: &Path, filter: &RecordFilter) -> Result<FilterStats> {
        run_chain(
            self.decode_stage(input, filter),
            "filter",
            self.encode_stage(output),
            |reader, writer| filter_sam_stream(reader, writer, filter),
        )
    }

    fn subsample(&self, input: &Path, output: &Path, param: &SubsampleParam) -> Result<()> {
        let mut command = self.command("view");
        command
            .arg("-@")
            .arg(self.threads.to_string())
            .arg("-b")
            .arg("-s")
            .arg(param.encode())
            .arg("-o")
            .arg(output)
            .arg(input);
        Stage::new("subsample (samtools view -s)", command).run()
    }
}

impl Indexer for Samtools {
    fn index(&self, bam: &Path) -> Result<()> {
        let mut command = self.command("index");
        command.arg("-@").arg(self.threads.to_string()).arg(bam);
        Stage::new("index (samtools index)", command)
            .run()
            .map_err(|e| BamSieveError::Index {
                path: bam.to_path_buf(),
                reason: e.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::OsStr;
    use std::io::Cursor;

    use crate::commons::FilterThresholds;

    const SAM: &str = "@HD\tVN:1.6\tSO:coordinate\n\
@SQ\tSN:chr1\tLN:1000\n\
keep1\t99\tchr1\t100\t60\t90M10S\t=\t300\t350\t*\t*\n\
clip\t99\tchr1\t110\t60\t10S90M\t=\t300\t350\t*\t*\n\
flag\t97\tchr1\t120\t60\t100M\t=\t300\t350\t*\t*\n\
keep2\t147\tchr1\t300\t60\t10S90M\t=\t100\t-350\t*\t*\n\
tlen\t83\tchr1\t400\t60\t100M\t=\t100\t-700\t*\t*\n\
mapq\t163\tchr1\t500\t20\t100M\t=\t100\t350\t*\t*\n";

    #[test]
    fn sam_stream_keeps_header_and_passing_records() {
        let mut reader = Cursor::new(SAM.as_bytes());
        let mut out = Vec::new();
        let stats = filter_sam_stream(&mut reader, &mut out, &RecordFilter::default()).unwrap();

        let text = String::from_utf8(out).unwrap();
        let names: Vec<&str> = text
            .lines()
            .map(|line| line.split('\t').next().unwrap())
            .collect();
        assert_eq!(names, vec!["@HD", "@SQ", "keep1", "keep2"]);

        assert_eq!(stats.records, 6);
        assert_eq!(stats.kept, 2);
        assert_eq!(stats.clipping, 1);
        assert_eq!(stats.flag, 1);
        assert_eq!(stats.template_length, 1);
        assert_eq!(stats.mapping_quality, 1);
    }

    #[test]
    fn sam_stream_passes_non_utf8_bytes_through() {
        let input = b"@CO\tsample caf\xe9\n\
read\xe9\t99\tchr1\t100\t60\t100M\t=\t300\t350\tACGT\tII\xffI\r\n\
drop\xff\t97\tchr1\t100\t60\t100M\t=\t300\t350\tACGT\tIIII\n";
        let mut reader = Cursor::new(input.as_slice());
        let mut out = Vec::new();
        let stats = filter_sam_stream(&mut reader, &mut out, &RecordFilter::default()).unwrap();

        assert_eq!(
            out,
            b"@CO\tsample caf\xe9\nread\xe9\t99\tchr1\t100\t60\t100M\t=\t300\t350\tACGT\tII\xffI\n"
        );
        assert_eq!(stats.kept, 1);
        assert_eq!(stats.flag, 1);
    }

    #[test]
    fn sam_stream_rejects_malformed_records() {
        let mut reader = Cursor::new(b"@HD\tVN:1.6\nread\tnot-a-flag\tchr1\n".as_slice());
        let mut out = Vec::new();
        let err = filter_sam_stream(&mut reader, &mut out, &RecordFilter::default()).unwrap_err();
        assert!(matches!(err, BamSieveError::MalformedRecord { line: 2, .. }));
    }

    #[test]
    fn decode_command_restricts_quality_and_chromosomes() {
        let samtools = Samtools::new("samtools", 4);
        let stage = samtools.decode_stage(Path::new("in.bam"), &RecordFilter::default());
        assert!(stage.name().contains("decode"));

        let filter = RecordFilter::new(FilterThresholds::new(
            30,
            700,
            vec![99],
            vec!["chr1".to_string(), "chr2".to_string()],
        ));
        let stage = samtools.decode_stage(Path::new("in.bam"), &filter);
        let args: Vec<&OsStr> = stage_args(&stage);
        assert_eq!(args, ["view", "-h", "-q", "30", "in.bam", "chr1", "chr2"]);
    }

    #[test]
    fn encode_command_leaves_a_thread_for_reading() {
        let stage = Samtools::new("samtools", 4).encode_stage(Path::new("out.bam"));
        assert_eq!(stage_args(&stage), ["view", "-b", "-@", "3", "-o", "out.bam"]);

        let stage = Samtools::new("samtools", 1).encode_stage(Path::new("out.bam"));
        assert_eq!(stage_args(&stage), ["view", "-b", "-@", "1", "-o", "out.bam"]);
    }

    fn stage_args(stage: &Stage) -> Vec<&OsStr> {
        stage.command().get_args().collect()
    }
}
