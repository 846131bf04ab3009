//! Turns a target read count into a reproducible sampling parameter.
//!
//! The parameter is `seed + fraction` written with six decimals (`42.300000` keeps
//! about 30% of the templates with seed 42), the form `samtools view -s` expects. The
//! integer part selects the seed and the fractional part the keep probability, so a
//! fraction close to one is held below the next integer instead of carrying into it.

use std::fmt;
use std::str::FromStr;

use crate::err::{BamSieveError, Result};

const MICROS_PER_UNIT: u32 = 1_000_000;

/// What to do with an input of `total_reads` reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubsamplePlan {
    /// The input is already small enough: copy it as is.
    PassThrough,
    Subsample(SubsampleParam),
}

/// Seed and keep probability, at six decimal precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubsampleParam {
    seed: u32,
    micros: u32,
}

impl SubsampleParam {
    /// Rounds `seed + fraction` to six decimals. A fraction that would round up to
    /// the next seed is kept at `.999999`.
    pub fn new(seed: u32, fraction: f64) -> Self {
        let fraction = fraction.max(0.0).min(1.0);
        let seed_text = seed.to_string();
        let rounded = format!("{:.6}", f64::from(seed) + fraction);
        let micros = match rounded.split_once('.') {
            Some((integer, decimals)) if integer == seed_text => {
                decimals.parse().unwrap_or(MICROS_PER_UNIT - 1)
            }
            _ => MICROS_PER_UNIT - 1,
        };
        Self { seed, micros }
    }

    pub fn seed(&self) -> u32 {
        self.seed
    }

    pub fn fraction(&self) -> f64 {
        f64::from(self.micros) / f64::from(MICROS_PER_UNIT)
    }

    pub fn encode(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for SubsampleParam {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:06}", self.seed, self.micros)
    }
}

impl FromStr for SubsampleParam {
    type Err = BamSieveError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || BamSieveError::InvalidRequest(format!("invalid subsample parameter {s:?}"));

        let (seed, fraction) = s.split_once('.').ok_or_else(invalid)?;
        if fraction.len() != 6 || !fraction.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        let seed = seed.parse::<u32>().map_err(|_| invalid())?;
        let micros = fraction.parse::<u32>().map_err(|_| invalid())?;

        Ok(Self { seed, micros })
    }
}

/// Checks the seed of a subsampling request.
///
/// The sampler reads the seed as a C `int`, and a negative seed would turn `seed +
/// fraction` into a different seed.
pub fn validate_seed(seed: i64) -> Result<u32> {
    if seed < 0 || seed > i64::from(i32::MAX) {
        return Err(BamSieveError::InvalidRequest(format!(
            "seed must be between 0 and {}, got {seed}",
            i32::MAX
        )));
    }
    Ok(seed as u32)
}

/// Chooses between copying the input and subsampling it to roughly `threshold` reads.
pub fn plan(total_reads: u64, threshold: u64, seed: i64) -> Result<SubsamplePlan> {
    let seed = validate_seed(seed)?;

    // Also covers an empty input, so the division below never sees zero.
    if total_reads <= threshold {
        return Ok(SubsamplePlan::PassThrough);
    }

    let fraction = threshold as f64 / total_reads as f64;
    Ok(SubsamplePlan::Subsample(SubsampleParam::new(seed, fraction)))
}

/// Per-template keep decision keyed on the read name.
///
/// Both mates of a pair share a name and therefore a decision, and the same seed
/// always selects the same templates.
#[derive(Debug, Clone, Copy)]
pub struct PairSampler {
    seed: u32,
    fraction: f64,
}

impl PairSampler {
    pub fn new(param: &SubsampleParam) -> Self {
        Self {
            seed: wang_hash(param.seed()),
            fraction: param.fraction(),
        }
    }

    pub fn keep(&self, name: &[u8]) -> bool {
        let hash = wang_hash(x31_hash(name) ^ self.seed);
        f64::from(hash & 0x00ff_ffff) / f64::from(0x0100_0000u32) < self.fraction
    }
}

fn x31_hash(s: &[u8]) -> u32 {
    let Some((&first, rest)) = s.split_first() else {
        return 0;
    };
    rest.iter().fold(u32::from(first), |h, &c| {
        (h << 5).wrapping_sub(h).wrapping_add(u32::from(c))
    })
}

fn wang_hash(key: u32) -> u32 {
    let mut key = key;
    key = key.wrapping_add(!(key << 15));
    key ^= key >> 10;
    key = key.wrapping_add(key << 3);
    key ^= key >> 6;
    key = key.wrapping_add(!(key << 11));
    key ^= key >> 16;
    key
}
