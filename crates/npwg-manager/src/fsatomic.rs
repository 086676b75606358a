//! Atomic file writes with timestamped backups.
//!
//! Write order: back up the existing file, write a sibling temporary file
//! with the target's permissions (0600 for new files), fsync, rename into
//! place. Readers therefore always see either the old file or the
//! complete new one.

use std::fs;
use std::io::{self, Write as _};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::debug;

/// The backup path for `path` at `stamp` time:
/// `<path>.bak.<YYYYMMDD-HHMMSS>`.
#[must_use]
pub fn backup_path(path: &Path, stamp: &chrono::DateTime<Utc>) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(format!(".bak.{}", stamp.format("%Y%m%d-%H%M%S")));
    PathBuf::from(name)
}

/// Atomically replaces `path` with `contents`.
///
/// # Errors
///
/// Returns any underlying I/O error; on error the target file is
/// untouched.
pub fn atomic_write(path: &Path, contents: &[u8]) -> io::Result<()> {
    let mode = match fs::metadata(path) {
        Ok(meta) => {
            let backup = backup_path(path, &Utc::now());
            fs::copy(path, &backup)?;
            debug!(path = %path.display(), backup = %backup.display(), "backed up config");
            meta.permissions().mode()
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => 0o600,
        Err(e) => return Err(e),
    };

    let tmp = sibling_tmp_path(path);
    let result = write_and_rename(path, &tmp, contents, mode);
    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}

fn sibling_tmp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(format!(".tmp.{}", std::process::id()));
    PathBuf::from(name)
}

fn write_and_rename(path: &Path, tmp: &Path, contents: &[u8], mode: u32) -> io::Result<()> {
    let mut file = fs::File::create(tmp)?;
    file.set_permissions(fs::Permissions::from_mode(mode))?;
    file.write_all(contents)?;
    file.sync_all()?;
    drop(file);
    fs::rename(tmp, path)?;
    Ok(())
}
