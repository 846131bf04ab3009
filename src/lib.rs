use std::fs;
use std::path::Path;

pub mod err;
use err::{BamSieveError, Result};

pub mod commons;
use commons::BackendKind;

pub mod filter;
use filter::{FilterStats, RecordFilter};

pub mod subsample;
use subsample::SubsamplePlan;

pub mod atomic;
use atomic::AtomicFileWriter;

pub mod backend;
use backend::{find_index, index_path, Backend, Indexer};

pub mod count;
pub mod native;
pub mod pipeline;
pub mod samtools;

pub fn backend(kind: BackendKind, samtools: &samtools::Samtools) -> Box<dyn Backend> {
    match kind {
        BackendKind::Samtools => Box::new(samtools.clone()),
        BackendKind::Native => Box::new(native::Native),
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Removes a published output and its index, keeping the error that caused it.
fn discard(output: &Path) {
    for path in [output.to_path_buf(), index_path(output)] {
        if let Err(e) = fs::remove_file(&path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                log::warn!("could not remove {}: {e}", path.display());
            }
        }
    }
}

fn index_published(output: &Path, indexer: &dyn Indexer) -> Result<()> {
    log::info!("Indexing...");
    if let Err(e) = indexer.index(output) {
        discard(output);
        return Err(e);
    }
    Ok(())
}

/// Subsamples `input` to about `threshold` reads, keeping mates together.
///
/// Inputs with no more than `threshold` reads are copied unchanged, along with their
/// index when there is one.
pub fn downsample(
    input: &Path,
    output: &Path,
    threshold: u64,
    seed: i64,
    backend: &dyn Backend,
    indexer: &dyn Indexer,
) -> Result<SubsamplePlan> {
    subsample::validate_seed(seed)?;

    log::info!("Processing: {}", file_name(input));
    let total_reads = count::count_reads(input, backend)?;
    log::info!("Total reads: {total_reads}");

    let plan = subsample::plan(total_reads, threshold, seed)?;
    match &plan {
        SubsamplePlan::PassThrough => {
            log::info!("Threshold not reached. Copying original file.");
            AtomicFileWriter::new(output).write(|temp| {
                fs::copy(input, temp)?;
                Ok(())
            })?;

            match find_index(input) {
                Some(source_index) => {
                    let copied = AtomicFileWriter::new(index_path(output)).write(|temp| {
                        fs::copy(&source_index, temp)?;
                        Ok(())
                    });
                    if let Err(e) = copied {
                        discard(output);
                        return Err(e);
                    }
                }
                None => index_published(output, indexer)?,
            }
        }
        SubsamplePlan::Subsample(param) => {
            log::info!(
                "Subsampling with fraction {:.6} (param: {param})",
                param.fraction()
            );
            AtomicFileWriter::new(output).write(|temp| backend.subsample(input, temp, param))?;
            index_published(output, indexer)?;
        }
    }

    log::info!("Done.");
    Ok(plan)
}

/// Writes to `output` the records of `input` that `filter` keeps, then indexes it.
pub fn filter_bam(
    input: &Path,
    output: &Path,
    filter: &RecordFilter,
    backend: &dyn Backend,
    indexer: &dyn Indexer,
) -> Result<FilterStats> {
    if !input.is_file() {
        return Err(BamSieveError::Input {
            path: input.to_path_buf(),
            reason: "file does not exist".to_string(),
        });
    }

    log::info!("Starting pipeline for: {}", file_name(input));
    let stats = AtomicFileWriter::new(output).write(|temp| backend.filter(input, temp, filter))?;
    log::info!("Filtering done. Published {}", output.display());
    stats.log();

    index_published(output, indexer)?;
    log::info!("Success! Output at: {}", output.display());
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};
    use std::path::PathBuf;

    use crate::filter::Rejection;
    use crate::subsample::SubsampleParam;

    #[derive(Default)]
    struct MockBackend {
        total: Option<u64>,
        fail: bool,
        calls: RefCell<Vec<String>>,
    }

    impl Backend for MockBackend {
        fn count_records(&self, _input: &Path) -> Result<u64> {
            self.calls.borrow_mut().push("count".to_string());
            self.total
                .ok_or_else(|| BamSieveError::InvalidRequest("no count".to_string()))
        }

        fn filter(&self, _input: &Path, output: &Path, _filter: &RecordFilter) -> Result<FilterStats> {
            self.calls.borrow_mut().push("filter".to_string());
            fs::write(output, b"partial")?;
            if self.fail {
                return Err(BamSieveError::Pipeline(vec![err::StageFailure::new(
                    "encode",
                    "exit status: 1",
                )]));
            }
            let mut stats = FilterStats::default();
            stats.add(Ok(()));
            stats.add(Err(Rejection::Flag));
            Ok(stats)
        }

        fn subsample(&self, _input: &Path, output: &Path, param: &SubsampleParam) -> Result<()> {
            self.calls.borrow_mut().push(format!("subsample {param}"));
            fs::write(output, b"subsampled")?;
            if self.fail {
                return Err(BamSieveError::Pipeline(vec![err::StageFailure::new(
                    "subsample",
                    "exit status: 1",
                )]));
            }
            Ok(())
        }
    }

    #[derive(Default)]
    struct MockIndexer {
        fail: bool,
        calls: Cell<usize>,
    }

    impl Indexer for MockIndexer {
        fn index(&self, bam: &Path) -> Result<()> {
            self.calls.set(self.calls.get() + 1);
            fs::write(index_path(bam), b"index")?;
            if self.fail {
                return Err(BamSieveError::Index {
                    path: bam.to_path_buf(),
                    reason: "exit status: 1".to_string(),
                });
            }
            Ok(())
        }
    }

    fn setup() -> (tempfile::TempDir, PathBuf, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("input.bam");
        fs::write(&input, b"original bam bytes").unwrap();
        let output = dir.path().join("out").join("output.bam");
        (dir, input, output)
    }

    #[test]
    fn subsamples_large_inputs() {
        let (_dir, input, output) = setup();
        let backend = MockBackend {
            total: Some(1_000_000),
            ..Default::default()
        };
        let indexer = MockIndexer::default();

        let plan = downsample(&input, &output, 100_000, 7, &backend, &indexer).unwrap();

        let SubsamplePlan::Subsample(param) = plan else {
            panic!("expected a subsample plan");
        };
        assert_eq!(param.encode(), "7.100000");
        assert_eq!(*backend.calls.borrow(), vec!["count", "subsample 7.100000"]);
        assert_eq!(fs::read(&output).unwrap(), b"subsampled");
        assert_eq!(indexer.calls.get(), 1);
        assert!(index_path(&output).exists());
    }

    #[test]
    fn pass_through_copies_input_and_index() {
        let (_dir, input, output) = setup();
        fs::write(index_path(&input), b"source index").unwrap();
        let backend = MockBackend {
            total: Some(10),
            ..Default::default()
        };
        let indexer = MockIndexer::default();

        let plan = downsample(&input, &output, 10, 42, &backend, &indexer).unwrap();

        assert_eq!(plan, SubsamplePlan::PassThrough);
        assert_eq!(fs::read(&output).unwrap(), fs::read(&input).unwrap());
        assert_eq!(fs::read(index_path(&output)).unwrap(), b"source index");
        assert_eq!(indexer.calls.get(), 0);
    }

    #[test]
    fn pass_through_without_index_builds_one() {
        let (_dir, input, output) = setup();
        let backend = MockBackend {
            total: Some(0),
            ..Default::default()
        };
        let indexer = MockIndexer::default();

        let plan = downsample(&input, &output, 0, 42, &backend, &indexer).unwrap();

        assert_eq!(plan, SubsamplePlan::PassThrough);
        assert_eq!(fs::read(&output).unwrap(), b"original bam bytes");
        assert_eq!(indexer.calls.get(), 1);
    }

    #[test]
    fn invalid_seed_fails_before_anything_runs() {
        let (_dir, input, output) = setup();
        let backend = MockBackend {
            total: Some(1_000),
            ..Default::default()
        };
        let indexer = MockIndexer::default();

        let err = downsample(&input, &output, 10, -3, &backend, &indexer).unwrap_err();

        assert!(matches!(err, BamSieveError::InvalidRequest(_)));
        assert!(backend.calls.borrow().is_empty());
        assert!(!output.exists());
    }

    #[test]
    fn failed_subsample_publishes_nothing() {
        let (dir, input, output) = setup();
        let backend = MockBackend {
            total: Some(1_000),
            fail: true,
            ..Default::default()
        };
        let indexer = MockIndexer::default();

        assert!(downsample(&input, &output, 10, 42, &backend, &indexer).is_err());
        assert!(!output.exists());
        assert!(!index_path(&output).exists());
        assert_eq!(indexer.calls.get(), 0);
        assert_eq!(fs::read_dir(dir.path().join("out")).unwrap().count(), 0);
    }

    #[test]
    fn filters_and_indexes() {
        let (_dir, input, output) = setup();
        let backend = MockBackend::default();
        let indexer = MockIndexer::default();

        let stats = filter_bam(&input, &output, &RecordFilter::default(), &backend, &indexer).unwrap();

        assert_eq!(stats.kept, 1);
        assert_eq!(stats.flag, 1);
        assert_eq!(fs::read(&output).unwrap(), b"partial");
        assert_eq!(indexer.calls.get(), 1);
    }

    #[test]
    fn failed_filter_publishes_nothing() {
        let (dir, input, output) = setup();
        let backend = MockBackend {
            fail: true,
            ..Default::default()
        };
        let indexer = MockIndexer::default();

        let err = filter_bam(&input, &output, &RecordFilter::default(), &backend, &indexer)
            .unwrap_err();

        assert!(err.to_string().contains("encode"));
        assert!(!output.exists());
        assert!(!index_path(&output).exists());
        assert_eq!(indexer.calls.get(), 0);
        assert_eq!(fs::read_dir(dir.path().join("out")).unwrap().count(), 0);
    }

    #[test]
    fn failed_indexing_removes_the_output() {
        let (_dir, input, output) = setup();
        let backend = MockBackend::default();
        let indexer = MockIndexer {
            fail: true,
            ..Default::default()
        };

        let err = filter_bam(&input, &output, &RecordFilter::default(), &backend, &indexer)
            .unwrap_err();

        assert!(matches!(err, BamSieveError::Index { .. }));
        assert!(!output.exists());
        assert!(!index_path(&output).exists());
    }

    #[test]
    fn missing_input_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let backend = MockBackend::default();
        let indexer = MockIndexer::default();
        let err = filter_bam(
            &dir.path().join("missing.bam"),
            &dir.path().join("out.bam"),
            &RecordFilter::default(),
            &backend,
            &indexer,
        )
        .unwrap_err();
        assert!(matches!(err, BamSieveError::Input { .. }));
        assert!(backend.calls.borrow().is_empty());
    }
}
