//! Zip archive packing, naming, and reading

pub mod naming;
pub mod pack;
pub mod read;

use thiserror::Error;

pub use naming::{archive_filename, is_archive_name, parse_archive_timestamp};
pub use pack::create_archive;
pub use read::{extract_all, read_entry};

/// Name of the manifest entry at the archive root
pub const MANIFEST_ENTRY: &str = "manifest.json";

/// Errors during archive handling
#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("ZIP error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("Walk error: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("Extraction worker failed: {0}")]
    Worker(String),
}
