//! Backup artifacts: timestamped whole-file copies of the live database.
//!
//! Artifacts land in a `bak/` directory next to the database file (unless configured
//! otherwise) and are named `<stem>.<unix-epoch-millis>.db`.
//!
//! The stem is the file name minus its last extension, so `data.db` backs up to
//! `bak/data.1700000000000.db` rather than `bak/data.db.1700000000000.db`. Every artifact
//! therefore ends in `.db` whatever the live file is called, and `app.sqlite` yields
//! `app.<millis>.db`. Stems are not unique across extensions: `data.db` and `data.sqlite`
//! sharing one backup directory would interleave, so give such databases separate
//! directories.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::error::SqlQueueError;

/// Directory that holds artifacts for `db_path` when none is configured.
#[must_use]
pub fn default_backup_dir(db_path: &Path) -> PathBuf {
    db_path
        .parent()
        .map_or_else(|| PathBuf::from("bak"), |parent| parent.join("bak"))
}

/// Hands out artifact paths with strictly increasing millisecond suffixes.
#[derive(Debug)]
pub(crate) struct BackupNamer {
    dir: PathBuf,
    stem: String,
    last_millis: Option<i64>,
}

impl BackupNamer {
    pub(crate) fn new(db_path: &Path, dir: Option<PathBuf>) -> Result<Self, SqlQueueError> {
        let stem = db_path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| {
                SqlQueueError::ConfigError(format!(
                    "database path {} has no usable file name",
                    db_path.display()
                ))
            })?
            .to_owned();
        Ok(Self {
            dir: dir.unwrap_or_else(|| default_backup_dir(db_path)),
            stem,
            last_millis: None,
        })
    }

    pub(crate) fn dir(&self) -> &Path {
        &self.dir
    }

    /// Next artifact path, stamped with `now_millis` or one past the previous stamp,
    /// whichever is later.
    pub(crate) fn next_path(&mut self, now_millis: i64) -> PathBuf {
        let millis = match self.last_millis {
            Some(last) if now_millis <= last => last + 1,
            _ => now_millis,
        };
        self.last_millis = Some(millis);
        self.dir.join(format!("{}.{millis}.db", self.stem))
    }
}

/// Copy the database file at `live` to a fresh artifact.
///
/// The caller must have released its lock on `live` before calling.
pub(crate) fn write_artifact(
    namer: &mut BackupNamer,
    live: &Path,
) -> Result<PathBuf, SqlQueueError> {
    fs::create_dir_all(namer.dir()).map_err(|err| {
        SqlQueueError::Backup(format!(
            "cannot create backup directory {}: {err}",
            namer.dir().display()
        ))
    })?;
    let dest = namer.next_path(chrono::Utc::now().timestamp_millis());
    let bytes = fs::copy(live, &dest).map_err(|err| {
        SqlQueueError::Backup(format!(
            "copy {} -> {} failed: {err}",
            live.display(),
            dest.display()
        ))
    })?;
    info!(path = %dest.display(), bytes, "wrote database backup");
    Ok(dest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_use_stem_and_sibling_bak_dir() {
        let mut namer = BackupNamer::new(Path::new("/data/app.db"), None).unwrap();
        assert_eq!(
            namer.next_path(1_700_000_000_000),
            PathBuf::from("/data/bak/app.1700000000000.db")
        );
    }

    #[test]
    fn only_the_last_extension_is_replaced() {
        let mut namer = BackupNamer::new(Path::new("/srv/app.sqlite"), None).unwrap();
        assert_eq!(namer.next_path(9), PathBuf::from("/srv/bak/app.9.db"));
        let mut namer = BackupNamer::new(Path::new("/srv/app.v2.db"), None).unwrap();
        assert_eq!(namer.next_path(9), PathBuf::from("/srv/bak/app.v2.9.db"));
    }

    #[test]
    fn stamps_strictly_increase_within_one_millisecond() {
        let mut namer = BackupNamer::new(Path::new("app.db"), Some("b".into())).unwrap();
        let a = namer.next_path(5);
        let b = namer.next_path(5);
        let c = namer.next_path(3);
        let d = namer.next_path(100);
        assert_eq!(a, PathBuf::from("b/app.5.db"));
        assert_eq!(b, PathBuf::from("b/app.6.db"));
        assert_eq!(c, PathBuf::from("b/app.7.db"));
        assert_eq!(d, PathBuf::from("b/app.100.db"));
    }
}
