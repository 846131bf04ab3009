use bamsieve::commons;

#[derive(clap::ValueEnum, std::fmt::Debug, Clone, Copy)]
pub enum Backend {
    /// Decode and encode with samtools processes
    Samtools,
    /// Decode and encode in process
    Native,
}

#[derive(clap::Parser, std::fmt::Debug)]
pub struct Common {
    /// Input BAM file
    #[clap(long = "input_bam")]
    input_bam: std::path::PathBuf,

    /// Output BAM file
    #[clap(long = "output_bam")]
    output_bam: std::path::PathBuf,

    /// Number of threads
    #[clap(long = "threads", default_value = "4")]
    threads: usize,

    /// Path to samtools executable
    #[clap(long = "samtools", default_value = "samtools")]
    samtools: std::path::PathBuf,

    /// Where BAM records are decoded and encoded. Outputs are always indexed with
    /// `samtools index`, so the native backend still needs --samtools
    #[clap(long = "backend", value_enum, default_value = "samtools")]
    backend: Backend,
}

#[derive(clap::Parser, std::fmt::Debug)]
pub struct Downsample {
    #[command(flatten)]
    common: Common,

    /// Target number of reads. Inputs with no more reads are copied unchanged
    #[clap(long = "n_reads_threshold")]
    n_reads_threshold: u64,

    /// Random seed of the subsampling
    #[clap(long = "seed", default_value = "42", allow_negative_numbers = true)]
    seed: i64,
}

#[derive(clap::Parser, std::fmt::Debug)]
pub struct Filter {
    #[command(flatten)]
    common: Common,

    /// Write filtering counts to this TSV file
    #[clap(long = "metrics")]
    metrics: Option<std::path::PathBuf>,
}

#[derive(clap::Subcommand, std::fmt::Debug)]
pub enum Action {
    /// Subsample a BAM file to about a target read count
    Downsample(Downsample),
    /// Keep proper pairs with good mapping quality, short inserts and unclipped 3' ends
    Filter(Filter),
}

#[derive(clap::Parser, std::fmt::Debug)]
#[command(
    name = "bamsieve",
    version,
    about = "Subsample and quality-filter BAM files, publishing outputs atomically"
)]
pub struct Command {
    #[command(subcommand)]
    action: Action,
}

impl Command {
    pub fn parse() -> Self {
        <Self as clap::Parser>::parse()
    }

    pub fn action(&self) -> &Action {
        &self.action
    }
}

impl Action {
    pub fn common(&self) -> &Common {
        match self {
            Action::Downsample(downsample) => &downsample.common,
            Action::Filter(filter) => &filter.common,
        }
    }
}

impl Common {
    pub fn input_bam(&self) -> &std::path::Path {
        &self.input_bam
    }

    pub fn output_bam(&self) -> &std::path::Path {
        &self.output_bam
    }

    pub fn threads(&self) -> usize {
        self.threads.max(1)
    }

    pub fn samtools(&self) -> &std::path::Path {
        &self.samtools
    }

    pub fn backend(&self) -> commons::BackendKind {
        match self.backend {
            Backend::Samtools => commons::BackendKind::Samtools,
            Backend::Native => commons::BackendKind::Native,
        }
    }
}

impl Downsample {
    pub fn n_reads_threshold(&self) -> u64 {
        self.n_reads_threshold
    }

    pub fn seed(&self) -> i64 {
        self.seed
    }
}

impl Filter {
    pub fn metrics(&self) -> Option<&std::path::Path> {
        self.metrics.as_deref()
    }
}
