//! Selects request body files from the input directory.
//!
//! Every sample begins by picking one file at random from the configured input
//! directory. The directory is listed again for each selection, so files can be added
//! or removed while a load test runs. When the queue is enabled (the default) a
//! [`FileSelector`] also guarantees that no two in-flight samples share the same file:
//! the index of each selected file is claimed in a set shared by all clones of the
//! selector, and is released when the sample completes.
//!
//! A missing or empty input directory is a fatal configuration error. It is returned as
//! [`SamplerError::FatalConfiguration`](../enum.SamplerError.html#variant.FatalConfiguration)
//! so the embedding application decides whether to exit the process (as the
//! [`PostSampler`](../sampler/struct.PostSampler.html) does by default) or to refuse
//! to start.

use rand::Rng;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::SamplerError;

/// A file selected from the input directory, together with its position in the sorted
/// directory listing it was selected from.
///
/// The index is only meaningful relative to that one listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestBodyFile {
    /// Absolute path to the file.
    path: PathBuf,
    /// Position of the file in the listing snapshot.
    index: usize,
}
impl RequestBodyFile {
    pub fn new(path: PathBuf, index: usize) -> Self {
        RequestBodyFile { path, index }
    }

    /// Absolute path to the selected file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Index of the selected file in its directory listing.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Base name of the selected file, used to label samples.
    pub fn file_name(&self) -> String {
        match self.path.file_name() {
            Some(name) => name.to_string_lossy().to_string(),
            None => self.path.display().to_string(),
        }
    }
}

/// Picks files from an input directory, optionally refusing to hand out a file that is
/// still in use by another in-flight sample.
///
/// Cloning a `FileSelector` is cheap, and all clones share one in-flight set.
#[derive(Debug, Clone, Default)]
pub struct FileSelector {
    /// Indexes currently claimed by in-flight samples.
    in_flight: Arc<Mutex<HashSet<usize>>>,
    /// How many random draws to attempt before giving up, `None` never gives up.
    max_attempts: Option<usize>,
}

impl FileSelector {
    /// Create a selector with an empty in-flight set that retries forever.
    pub fn new() -> Self {
        FileSelector::default()
    }

    /// Bound the number of random draws made while looking for an unused file. A value of
    /// `0` restores the default of retrying until a file frees up.
    pub fn set_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = if max_attempts == 0 {
            None
        } else {
            Some(max_attempts)
        };
        self
    }

    /// List the regular files in `directory`, sorted by name so that each index is
    /// stable within one listing.
    ///
    /// A directory that doesn't exist, can't be read, or contains no files is a fatal
    /// configuration error.
    pub fn list_files(directory: &Path) -> Result<Vec<PathBuf>, SamplerError> {
        let base_dir = fs::canonicalize(directory).map_err(|e| SamplerError::FatalConfiguration {
            directory: directory.display().to_string(),
            detail: format!("input directory does not exist: {}", e),
        })?;

        let entries = fs::read_dir(&base_dir).map_err(|e| SamplerError::FatalConfiguration {
            directory: directory.display().to_string(),
            detail: format!("failed to list input directory: {}", e),
        })?;

        let mut files: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            // Follows symlinks, a link to a regular file is a valid request body.
            .filter(|path| path.is_file())
            .collect();

        if files.is_empty() {
            return Err(SamplerError::FatalConfiguration {
                directory: directory.display().to_string(),
                detail: "input directory contains no files".to_string(),
            });
        }

        files.sort();
        trace!("listed {} files in {}", files.len(), base_dir.display());
        Ok(files)
    }

    /// Confirm `directory` can be used as an input directory, returning how many files it
    /// currently contains. Useful to validate configuration before starting any workers.
    pub fn validate_directory(directory: &Path) -> Result<usize, SamplerError> {
        Ok(FileSelector::list_files(directory)?.len())
    }

    /// Select a random file from `directory`.
    ///
    /// If `enforce_uniqueness` is set, only a file whose index isn't already claimed is
    /// returned, and its index is claimed. The caller must [`release`](#method.release)
    /// it when done. If every file is in use this blocks the calling thread, yielding
    /// between attempts, until another caller releases a file or `max_attempts` is
    /// exceeded.
    pub fn select_file(
        &self,
        directory: &Path,
        enforce_uniqueness: bool,
    ) -> Result<RequestBodyFile, SamplerError> {
        let files = FileSelector::list_files(directory)?;

        let mut attempts: usize = 0;
        loop {
            attempts += 1;
            if let Some(file) = self.try_select(&files, enforce_uniqueness) {
                return Ok(file);
            }
            self.check_attempts(attempts, files.len())?;
            std::thread::yield_now();
        }
    }

    /// Asynchronous equivalent of [`select_file`](#method.select_file) that returns a
    /// guard releasing the claimed index when dropped.
    ///
    /// While every file is in use the task yields to the runtime between attempts, so
    /// the samples holding those files keep making progress even on a single-threaded
    /// runtime.
    pub async fn claim(
        &self,
        directory: &Path,
        enforce_uniqueness: bool,
    ) -> Result<InFlightFile, SamplerError> {
        let files = FileSelector::list_files(directory)?;

        let mut attempts: usize = 0;
        loop {
            attempts += 1;
            if let Some(file) = self.try_select(&files, enforce_uniqueness) {
                return Ok(InFlightFile {
                    file,
                    selector: if enforce_uniqueness {
                        Some(self.clone())
                    } else {
                        None
                    },
                });
            }
            self.check_attempts(attempts, files.len())?;
            tokio::task::yield_now().await;
        }
    }

    /// Remove `index` from the in-flight set. Releasing an index that isn't claimed does
    /// nothing, so this is always safe to call during cleanup.
    pub fn release(&self, index: usize) {
        if self.lock().remove(&index) {
            trace!("released file index {}", index);
        }
    }

    /// Returns `true` if `index` is currently claimed by an in-flight sample.
    pub fn is_in_flight(&self, index: usize) -> bool {
        self.lock().contains(&index)
    }

    /// A sorted copy of all indexes currently claimed.
    pub fn in_flight(&self) -> Vec<usize> {
        let mut indexes: Vec<usize> = self.lock().iter().copied().collect();
        indexes.sort_unstable();
        indexes
    }

    // Draw one random index and, if required, try to claim it.
    fn try_select(&self, files: &[PathBuf], enforce_uniqueness: bool) -> Option<RequestBodyFile> {
        let index = rand::rng().random_range(0..files.len());
        // Insert is the atomic check-and-claim: it fails if another sample holds the index.
        if enforce_uniqueness && !self.lock().insert(index) {
            trace!("file index {} is in flight, drawing again", index);
            return None;
        }
        Some(RequestBodyFile::new(files[index].clone(), index))
    }

    fn check_attempts(&self, attempts: usize, file_count: usize) -> Result<(), SamplerError> {
        match self.max_attempts {
            Some(max_attempts) if attempts >= max_attempts => Err(SamplerError::NoFileAvailable {
                attempts,
                detail: format!(
                    "all {} input files remained in flight after {} attempts",
                    file_count, attempts
                ),
            }),
            _ => Ok(()),
        }
    }

    // A panic while holding the lock can't leave the set half-updated, so a poisoned
    // lock is still safe to use.
    fn lock(&self) -> MutexGuard<'_, HashSet<usize>> {
        self.in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// A [`RequestBodyFile`] claimed for the duration of one sample.
///
/// Dropping the guard releases the claimed index exactly once, whichever way the sample
/// ends.
#[derive(Debug)]
pub struct InFlightFile {
    file: RequestBodyFile,
    /// Set only if the index was claimed in the selector's in-flight set.
    selector: Option<FileSelector>,
}
impl InFlightFile {
    /// The claimed file.
    pub fn file(&self) -> &RequestBodyFile {
        &self.file
    }
}
impl Drop for InFlightFile {
    fn drop(&mut self) {
        if let Some(selector) = self.selector.take() {
            selector.release(self.file.index);
        }
    }
}
