// SPDX-License-Identifier: MPL-2.0

//! Storage utilities for recording segments

use crate::errors::{PipelineError, PipelineResult};
use crate::media::formats::ContainerKind;
use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Default directory for recordings: `~/Videos/wamera`
pub fn default_recording_dir() -> PathBuf {
    dirs::video_dir()
        .or_else(|| dirs::home_dir().map(|h| h.join("Videos")))
        .unwrap_or_else(|| PathBuf::from("."))
        .join("wamera")
}

/// Create the recording directory if it does not exist yet
pub fn ensure_dir(dir: &Path) -> PipelineResult<()> {
    std::fs::create_dir_all(dir).map_err(|e| {
        PipelineError::Io(format!("Failed to create {}: {}", dir.display(), e))
    })
}

/// Builds wall-clock file names for recording segments
///
/// Names look like `out_20240101_120000.mp4`. When a name is already taken
/// (two segments within one second, or a leftover file) a `_N` suffix is
/// appended.
#[derive(Debug, Clone)]
pub struct SegmentNamer {
    directory: PathBuf,
    prefix: String,
    container: ContainerKind,
    time_format: String,
}

impl SegmentNamer {
    pub fn new(directory: impl Into<PathBuf>, prefix: impl Into<String>, container: ContainerKind) -> Self {
        Self {
            directory: directory.into(),
            prefix: prefix.into(),
            container,
            time_format: crate::constants::stream::SEGMENT_TIME_FORMAT.to_string(),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn container(&self) -> ContainerKind {
        self.container
    }

    /// Path for a segment starting now
    pub fn next_path(&self) -> PipelineResult<PathBuf> {
        self.path_at(Local::now())
    }

    /// Path for a segment starting at `when`
    pub fn path_at(&self, when: DateTime<Local>) -> PipelineResult<PathBuf> {
        ensure_dir(&self.directory)?;

        let stamp = when.format(&self.time_format).to_string();
        let ext = self.container.extension();
        let base = if self.prefix.is_empty() {
            stamp
        } else {
            format!("{}_{}", self.prefix, stamp)
        };

        let mut path = self.directory.join(format!("{}.{}", base, ext));
        let mut n = 1u32;
        while path.exists() {
            path = self.directory.join(format!("{}_{}.{}", base, n, ext));
            n += 1;
        }

        debug!(path = %path.display(), "Next segment path");
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_name_from_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        let namer = SegmentNamer::new(dir.path(), "out", ContainerKind::Mp4);
        let when = Local.with_ymd_and_hms(2024, 3, 5, 7, 8, 9).unwrap();
        let path = namer.path_at(when).unwrap();
        assert_eq!(path, dir.path().join("out_20240305_070809.mp4"));
    }

    #[test]
    fn test_collisions_get_suffix() {
        let dir = tempfile::tempdir().unwrap();
        let namer = SegmentNamer::new(dir.path(), "out", ContainerKind::Matroska);
        let when = Local.with_ymd_and_hms(2024, 3, 5, 7, 8, 9).unwrap();

        let first = namer.path_at(when).unwrap();
        std::fs::write(&first, b"").unwrap();
        let second = namer.path_at(when).unwrap();
        std::fs::write(&second, b"").unwrap();
        let third = namer.path_at(when).unwrap();

        assert_eq!(second, dir.path().join("out_20240305_070809_1.mkv"));
        assert_eq!(third, dir.path().join("out_20240305_070809_2.mkv"));
    }

    #[test]
    fn test_directory_created_on_demand() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("b");
        let namer = SegmentNamer::new(&nested, "", ContainerKind::Mp4);
        let path = namer.next_path().unwrap();
        assert!(nested.is_dir());
        assert_eq!(path.parent(), Some(nested.as_path()));
    }
}
