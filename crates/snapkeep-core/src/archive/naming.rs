//! Archive naming convention: `<prefix>-backup-YYYY-MM-DDTHH-MM-SS.zip`

use chrono::{DateTime, NaiveDateTime, Utc};

/// `strftime` layout of the timestamp embedded in archive names
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H-%M-%S";

const TIMESTAMP_LEN: usize = 19;

/// Build the archive filename for a creation time
#[must_use]
pub fn archive_filename(prefix: &str, created: DateTime<Utc>) -> String {
    format!("{prefix}-backup-{}.zip", created.format(TIMESTAMP_FORMAT))
}

/// Check a filename against the naming convention
///
/// Pure string inspection: no filesystem access happens here, so callers
/// can reject bad names before touching disk.
#[must_use]
pub fn is_archive_name(prefix: &str, filename: &str) -> bool {
    timestamp_part(prefix, filename).is_some()
}

/// Parse the embedded timestamp, if the name is valid and the date real
#[must_use]
pub fn parse_archive_timestamp(prefix: &str, filename: &str) -> Option<NaiveDateTime> {
    let stamp = timestamp_part(prefix, filename)?;
    NaiveDateTime::parse_from_str(stamp, TIMESTAMP_FORMAT).ok()
}

fn timestamp_part<'a>(prefix: &str, filename: &'a str) -> Option<&'a str> {
    let rest = filename.strip_prefix(prefix)?.strip_prefix("-backup-")?;
    let stamp = rest.strip_suffix(".zip")?;
    if stamp.len() != TIMESTAMP_LEN {
        return None;
    }

    // YYYY-MM-DDTHH-MM-SS
    let shape_ok = stamp.bytes().enumerate().all(|(i, b)| match i {
        4 | 7 | 13 | 16 => b == b'-',
        10 => b == b'T',
        _ => b.is_ascii_digit(),
    });

    shape_ok.then_some(stamp)
}
