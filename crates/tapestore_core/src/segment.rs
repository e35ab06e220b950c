//! Segment naming and ordering.
//!
//! Segments are named `{store_version:08}-{yyyy-MM-dd-HHmmss}.dat` from the
//! store version at creation time and a UTC timestamp, so a directory listing
//! already shows which part of the log each file holds.

use chrono::{DateTime, Utc};
use tapestore_storage::{SegmentInfo, SEGMENT_EXTENSION};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d-%H%M%S";

/// Builds the id of a segment created at `store_version`.
#[must_use]
pub fn segment_name(store_version: u64, created: DateTime<Utc>) -> String {
    format!(
        "{store_version:08}-{}.{SEGMENT_EXTENSION}",
        created.format(TIMESTAMP_FORMAT)
    )
}

/// Parses the store version prefix of a segment id.
///
/// Returns `None` for ids that do not start with a decimal number.
#[must_use]
pub fn version_prefix(id: &str) -> Option<u64> {
    let digits = id
        .split(|c: char| !c.is_ascii_digit())
        .next()
        .filter(|d| !d.is_empty())?;
    digits.parse().ok()
}

/// Sorts segments into log order: by version prefix, then by name.
///
/// Ids without a numeric prefix sort first, by name.
pub fn sort_segments(segments: &mut [SegmentInfo]) {
    segments.sort_by(|a, b| {
        version_prefix(&a.id)
            .cmp(&version_prefix(&b.id))
            .then_with(|| a.id.cmp(&b.id))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn info(id: &str) -> SegmentInfo {
        SegmentInfo {
            id: id.to_string(),
            len: 0,
        }
    }

    #[test]
    fn name_format() {
        let created = Utc.with_ymd_and_hms(2024, 3, 9, 7, 5, 1).unwrap();
        assert_eq!(segment_name(42, created), "00000042-2024-03-09-070501.dat");
        assert_eq!(segment_name(0, created), "00000000-2024-03-09-070501.dat");
    }

    #[test]
    fn wide_versions_are_not_truncated() {
        let created = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let name = segment_name(123_456_789_012, created);
        assert!(name.starts_with("123456789012-"));
        assert_eq!(version_prefix(&name), Some(123_456_789_012));
    }

    #[test]
    fn prefix_parsing() {
        assert_eq!(version_prefix("00000042-2024-03-09-070501.dat"), Some(42));
        assert_eq!(version_prefix("7.dat"), Some(7));
        assert_eq!(version_prefix("legacy.dat"), None);
        assert_eq!(version_prefix(""), None);
    }

    #[test]
    fn ordering_is_numeric_then_by_name() {
        let mut segments = vec![
            info("100000000-2024-01-01-000000.dat"),
            info("00000010-2024-01-02-000000.dat"),
            info("00000010-2024-01-01-000000.dat"),
            info("legacy.dat"),
            info("99999999-2024-01-01-000000.dat"),
        ];
        sort_segments(&mut segments);

        let ids: Vec<_> = segments.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(
            ids,
            vec![
                "legacy.dat",
                "00000010-2024-01-01-000000.dat",
                "00000010-2024-01-02-000000.dat",
                "99999999-2024-01-01-000000.dat",
                "100000000-2024-01-01-000000.dat",
            ]
        );
    }
}
