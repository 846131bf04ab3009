use std::sync::LazyLock;

use noodles::sam::alignment::record::cigar::{op::Kind, Op};
use noodles::sam::alignment::record::Flags;
use regex::Regex;

use crate::err::{BamSieveError, Result};

/// Where BAM decoding and encoding happen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// External `samtools` processes.
    Samtools,
    /// In this process, with `noodles`.
    Native,
}

/// Mapping quality written by aligners when it is not available.
pub const MISSING_MAPPING_QUALITY: u8 = 255;

/// Paired, mapped, proper pair, in the four forward/reverse combinations.
pub const PROPER_PAIR_FLAGS: [u16; 4] = [83, 99, 147, 163];

pub fn standard_chromosomes() -> Vec<String> {
    (1..=22)
        .map(|i| format!("chr{i}"))
        .chain(["chrX".to_string(), "chrY".to_string()])
        .collect()
}

/// Quality thresholds of the record filter.
///
/// A value of this type is immutable once built. The defaults are the fixed
/// thresholds of the `filter` command; other combinations are only built in
/// code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterThresholds {
    mapq_min: u8,
    tlen_abs_max: u32,
    allowed_flags: Vec<u16>,
    chromosomes: Vec<String>,
}

impl Default for FilterThresholds {
    fn default() -> Self {
        Self {
            mapq_min: 21,
            tlen_abs_max: 700,
            allowed_flags: PROPER_PAIR_FLAGS.to_vec(),
            chromosomes: standard_chromosomes(),
        }
    }
}

impl FilterThresholds {
    pub fn new(
        mapq_min: u8,
        tlen_abs_max: u32,
        allowed_flags: Vec<u16>,
        chromosomes: Vec<String>,
    ) -> Self {
        Self {
            mapq_min,
            tlen_abs_max,
            allowed_flags,
            chromosomes,
        }
    }

    /// Records are kept only when their mapping quality is at least this value.
    pub fn mapq_min(&self) -> u8 {
        self.mapq_min
    }

    /// Records are kept only when the absolute template length is strictly below this value.
    pub fn tlen_abs_max(&self) -> u32 {
        self.tlen_abs_max
    }

    pub fn allowed_flags(&self) -> &[u16] {
        &self.allowed_flags
    }

    pub fn chromosomes(&self) -> &[String] {
        &self.chromosomes
    }
}

/// The fields of an alignment record the filter looks at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlignmentRecord {
    pub flag: u16,
    pub mapq: u8,
    pub cigar: Vec<Op>,
    pub tlen: i32,
}

impl AlignmentRecord {
    pub fn new(flag: u16, mapq: u8, cigar: Vec<Op>, tlen: i32) -> Self {
        Self {
            flag,
            mapq,
            cigar,
            tlen,
        }
    }

    pub fn is_reverse_strand(&self) -> bool {
        Flags::from(self.flag).is_reverse_complemented()
    }

    pub fn starts_with_clip(&self) -> bool {
        self.cigar.first().is_some_and(is_clip)
    }

    pub fn ends_with_clip(&self) -> bool {
        self.cigar.last().is_some_and(is_clip)
    }
}

fn is_clip(op: &Op) -> bool {
    matches!(op.kind(), Kind::SoftClip | Kind::HardClip) && op.len() > 0
}

/// One item of a SAM stream: header lines are kept apart from records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entry {
    Header,
    Record(AlignmentRecord),
}

static CIGAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:\*|(?:[0-9]+[MIDNSHP=X])+)$").unwrap());
static CIGAR_OP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([0-9]+)([MIDNSHP=X])").unwrap());

/// Parses a SAM CIGAR string. `*` is an empty CIGAR.
pub fn parse_cigar(cigar: &str) -> Option<Vec<Op>> {
    if !CIGAR.is_match(cigar) {
        return None;
    }

    CIGAR_OP
        .captures_iter(cigar)
        .map(|caps| {
            let len: usize = caps[1].parse().ok()?;
            let kind = match &caps[2] {
                "M" => Kind::Match,
                "I" => Kind::Insertion,
                "D" => Kind::Deletion,
                "N" => Kind::Skip,
                "S" => Kind::SoftClip,
                "H" => Kind::HardClip,
                "P" => Kind::Pad,
                "=" => Kind::SequenceMatch,
                _ => Kind::SequenceMismatch,
            };
            Some(Op::new(kind, len))
        })
        .collect()
}

/// Parses one line of SAM text into an [`Entry`]. `line_number` is only used in errors.
///
/// Only FLAG, MAPQ, CIGAR and TLEN need to be text; the other fields may hold any bytes.
pub fn parse_sam_line(line: &[u8], line_number: u64) -> Result<Entry> {
    if line.starts_with(b"@") {
        return Ok(Entry::Header);
    }

    let malformed = |reason: String| BamSieveError::MalformedRecord {
        line: line_number,
        reason,
    };

    let fields: Vec<&[u8]> = line.splitn(10, |&b| b == b'\t').collect();
    if fields.len() < 9 {
        return Err(malformed(format!("too few fields ({})", fields.len())));
    }
    let field = |index: usize, name: &str| {
        std::str::from_utf8(fields[index])
            .map_err(|_| malformed(format!("{name} is not valid UTF-8")))
    };

    let text = field(1, "FLAG")?;
    let flag = text
        .parse::<u16>()
        .map_err(|e| malformed(format!("invalid FLAG {text:?}: {e}")))?;
    let text = field(4, "MAPQ")?;
    let mapq = text
        .parse::<u8>()
        .map_err(|e| malformed(format!("invalid MAPQ {text:?}: {e}")))?;
    let text = field(5, "CIGAR")?;
    let cigar = parse_cigar(text).ok_or_else(|| malformed(format!("invalid CIGAR {text:?}")))?;
    let text = field(8, "TLEN")?;
    let tlen = text
        .parse::<i32>()
        .map_err(|e| malformed(format!("invalid TLEN {text:?}: {e}")))?;

    Ok(Entry::Record(AlignmentRecord::new(flag, mapq, cigar, tlen)))
}
