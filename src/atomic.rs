use std::path::{Path, PathBuf};

use crate::err::{BamSieveError, Result};

/// Publishes a file only once it has been written completely.
///
/// The producer writes to a temporary file in the same directory as the final
/// path, which is then renamed into place. If the producer fails, the temporary
/// file is removed and the final path is left untouched.
#[derive(Debug, Clone)]
pub struct AtomicFileWriter {
    final_path: PathBuf,
}

impl AtomicFileWriter {
    pub fn new(final_path: impl Into<PathBuf>) -> Self {
        Self {
            final_path: final_path.into(),
        }
    }

    pub fn final_path(&self) -> &Path {
        &self.final_path
    }

    fn directory(&self) -> &Path {
        match self.final_path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        }
    }

    pub fn write<T, F>(&self, producer: F) -> Result<T>
    where
        F: FnOnce(&Path) -> Result<T>,
    {
        let directory = self.directory();
        std::fs::create_dir_all(directory)?;

        let stem = self
            .final_path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default();
        let suffix = match self.final_path.extension() {
            Some(extension) => format!(".tmp.{}", extension.to_string_lossy()),
            None => ".tmp".to_string(),
        };
        let prefix = format!("{stem}.");
        let mut builder = tempfile::Builder::new();
        builder.prefix(&prefix).suffix(&suffix);
        // Same mode as a file created directly: 0666 minus the umask.
        #[cfg(unix)]
        builder.permissions(std::os::unix::fs::PermissionsExt::from_mode(0o666));
        let temp = builder.tempfile_in(directory)?;

        let value = match producer(temp.path()) {
            Ok(value) => value,
            Err(e) => {
                if let Err(close_error) = temp.close() {
                    log::warn!("could not remove temporary file: {close_error}");
                }
                return Err(e);
            }
        };

        // A failed persist hands the file back; dropping it removes it.
        temp.persist(&self.final_path)
            .map_err(|e| BamSieveError::Publish {
                path: self.final_path.clone(),
                source: e.error,
            })?;
        Ok(value)
    }
}
