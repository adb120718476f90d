//! Archive reading: single-entry lookup and full extraction

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::thread;
use tracing::debug;
use zip::result::ZipError;
use zip::ZipArchive;

use super::ArchiveError;

/// Read one entry from an archive without extracting the rest
///
/// Returns `Ok(None)` when the archive is readable but has no such entry.
///
/// # Errors
/// Returns an error if the archive cannot be opened or the entry read
pub fn read_entry(archive_path: &Path, name: &str) -> Result<Option<Vec<u8>>, ArchiveError> {
    let file = File::open(archive_path)?;
    let mut archive = ZipArchive::new(file)?;

    let mut entry = match archive.by_name(name) {
        Ok(entry) => entry,
        Err(ZipError::FileNotFound) => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let mut buffer = Vec::with_capacity(usize::try_from(entry.size()).unwrap_or(0));
    entry.read_to_end(&mut buffer)?;
    Ok(Some(buffer))
}

/// Extract every entry of an archive into `dest`
///
/// Entry names escaping `dest` are rejected by the zip reader. Archives
/// larger than `offload_threshold` bytes are inflated on a dedicated
/// worker thread which the caller joins.
///
/// # Errors
/// Returns an error if the archive is unreadable or extraction fails
pub fn extract_all(
    archive_path: &Path,
    dest: &Path,
    offload_threshold: u64,
) -> Result<(), ArchiveError> {
    let size = std::fs::metadata(archive_path)?.len();

    if size <= offload_threshold {
        return extract_inline(archive_path, dest);
    }

    debug!(size, archive = %archive_path.display(), "Offloading extraction");
    let archive_path: PathBuf = archive_path.to_path_buf();
    let dest: PathBuf = dest.to_path_buf();
    let worker = thread::Builder::new()
        .name("snapkeep-extract".to_string())
        .spawn(move || extract_inline(&archive_path, &dest))?;

    worker
        .join()
        .map_err(|_| ArchiveError::Worker("extraction thread panicked".to_string()))?
}

fn extract_inline(archive_path: &Path, dest: &Path) -> Result<(), ArchiveError> {
    let file = File::open(archive_path)?;
    let mut archive = ZipArchive::new(file)?;
    archive.extract(dest)?;
    Ok(())
}
