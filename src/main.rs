mod cli;

use bamsieve as lib;
use env_logger::Env;
use lib::err::BamSieveError;
use lib::filter::RecordFilter;

fn run(command: &cli::Command) -> Result<(), BamSieveError> {
    let common = command.action().common();
    if let Err(e) = rayon::ThreadPoolBuilder::new()
        .num_threads(common.threads())
        .build_global()
    {
        log::warn!("Could not configure the thread pool: {e}");
    }

    let samtools = lib::samtools::Samtools::new(common.samtools(), common.threads());
    let backend = lib::backend(common.backend(), &samtools);

    match command.action() {
        cli::Action::Downsample(downsample) => {
            lib::downsample(
                common.input_bam(),
                common.output_bam(),
                downsample.n_reads_threshold(),
                downsample.seed(),
                backend.as_ref(),
                &samtools,
            )?;
        }
        cli::Action::Filter(filter) => {
            let stats = lib::filter_bam(
                common.input_bam(),
                common.output_bam(),
                &RecordFilter::default(),
                backend.as_ref(),
                &samtools,
            )?;
            if let Some(metrics) = filter.metrics() {
                stats.write_tsv(metrics)?;
            }
        }
    }
    Ok(())
}

fn main() {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    let command = cli::Command::parse();
    if let Err(e) = run(&command) {
        log::error!("{e}");
        std::process::exit(1);
    }
}
