//! Output-log rotation and ISO-8601 timestamp formatting, ported from the original
//! `RotateLogsIfNeeded` / `FormatIsoUtc` (`examples/original_source/src/logger.cpp`).

use std::path::Path;

use chrono::{TimeZone, Utc};

/// Render `timestamp_ms` as `YYYY-MM-DDTHH:MM:SSZ`.
pub fn format_iso_utc(timestamp_ms: u64) -> String {
    let secs = (timestamp_ms / 1000) as i64;
    let dt = Utc.timestamp_opt(secs, 0).single().unwrap_or_else(Utc::now);
    dt.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

/// If `path` exists and is at least `max_bytes`, shift `<name>.<i>` -> `<name>.<i+1>`
/// for `i` from `max_files-1` down to 1 (dropping `<name>.<max_files>` if present),
/// then rename `<name>` -> `<name>.1`. A no-op if the file is absent or under size.
pub fn rotate_if_needed(path: &Path, max_bytes: u64, max_files: u64) -> std::io::Result<()> {
    let size = match std::fs::metadata(path) {
        Ok(meta) => meta.len(),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };
    if size < max_bytes {
        return Ok(());
    }

    let dir = path.parent().unwrap_or_else(|| Path::new(""));
    let filename = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or_default();

    let oldest = dir.join(format!("{filename}.{max_files}"));
    if oldest.exists() {
        std::fs::remove_file(&oldest)?;
    }

    for i in (1..max_files).rev() {
        let from = dir.join(format!("{filename}.{i}"));
        let to = dir.join(format!("{filename}.{}", i + 1));
        if from.exists() {
            std::fs::rename(&from, &to)?;
        }
    }

    std::fs::rename(path, dir.join(format!("{filename}.1")))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn iso_format_matches_expected_shape() {
        assert_eq!(format_iso_utc(0), "1970-01-01T00:00:00Z");
        assert_eq!(format_iso_utc(1_000), "1970-01-01T00:00:01Z");
    }

    #[test]
    fn no_rotation_when_under_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.log");
        std::fs::write(&path, b"small").unwrap();

        rotate_if_needed(&path, 1_000_000, 3).unwrap();
        assert!(path.exists());
        assert!(!dir.path().join("out.log.1").exists());
    }

    #[test]
    fn missing_file_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.log");
        assert!(rotate_if_needed(&path, 1, 3).is_ok());
    }

    #[test]
    fn rotates_current_into_dot_one() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.log");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(b"0123456789").unwrap();
        drop(f);

        rotate_if_needed(&path, 5, 3).unwrap();
        assert!(!path.exists());
        assert!(dir.path().join("out.log.1").exists());
    }

    #[test]
    fn shifts_existing_backups_and_drops_oldest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.log");
        std::fs::write(dir.path().join("out.log.1"), b"gen1").unwrap();
        std::fs::write(dir.path().join("out.log.2"), b"gen2").unwrap();
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(b"0123456789").unwrap();
        drop(f);

        rotate_if_needed(&path, 5, 2).unwrap();

        assert!(!path.exists());
        assert_eq!(std::fs::read(dir.path().join("out.log.1")).unwrap(), b"0123456789");
        assert_eq!(std::fs::read(dir.path().join("out.log.2")).unwrap(), b"gen1");
        assert!(!dir.path().join("out.log.3").exists());
    }
}
