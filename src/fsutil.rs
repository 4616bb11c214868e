//! Shared filesystem primitives: atomic write, and collision-safe moves.
//!
//! Every durable write in this crate (counters, config store, export
//! targets) follows the same write-temp / fsync / rename protocol so a
//! crash never leaves a half-written file in place of a good one.

use std::io;
use std::path::{Path, PathBuf};

/// Write `contents` to `path` atomically: write to a sibling temp file in
/// the same directory, `sync_all`, then rename over `path`.
///
/// Using a sibling temp file (not a system temp dir) keeps the rename on
/// the same filesystem, which is required for POSIX rename atomicity.
pub fn atomic_write(path: &Path, contents: &[u8]) -> io::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)?;

    let tmp_path = sibling_tmp_path(path);
    {
        let mut f = std::fs::File::create(&tmp_path)?;
        use std::io::Write;
        f.write_all(contents)?;
        f.sync_all()?;
    }
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

fn sibling_tmp_path(path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "tmp".to_string());
    path.with_file_name(format!(".{file_name}.tmp-{}", std::process::id()))
}

/// Move `src` to `dst`, falling back to copy+remove if `rename` fails
/// because the paths are on different filesystems (`EXDEV`).
pub fn move_file(src: &Path, dst: &Path) -> io::Result<()> {
    if let Some(parent) = dst.parent() {
        std::fs::create_dir_all(parent)?;
    }
    match std::fs::rename(src, dst) {
        Ok(()) => Ok(()),
        Err(e) if e.raw_os_error() == Some(libc_exdev()) => {
            std::fs::copy(src, dst)?;
            std::fs::remove_file(src)?;
            Ok(())
        }
        Err(e) => Err(e),
    }
}

#[cfg(unix)]
fn libc_exdev() -> i32 {
    18 // EXDEV on Linux/macOS
}

#[cfg(not(unix))]
fn libc_exdev() -> i32 {
    17 // ERROR_NOT_SAME_DEVICE-equivalent placeholder; rename already covers same-volume moves on Windows
}

/// Compute a destination path inside `dest_dir` for `file_name`, inserting a
/// `_YYYYMMDD_HHMMSS` suffix before the extension if a file of that name
/// already exists.
pub fn collision_safe_destination(
    dest_dir: &Path,
    file_name: &str,
    now: chrono::DateTime<chrono::Local>,
) -> PathBuf {
    let candidate = dest_dir.join(file_name);
    if !candidate.exists() {
        return candidate;
    }

    let path = Path::new(file_name);
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| file_name.to_string());
    let ext = path.extension().map(|e| e.to_string_lossy().into_owned());

    let suffix = now.format("%Y%m%d_%H%M%S");
    let new_name = match ext {
        Some(ext) => format!("{stem}_{suffix}.{ext}"),
        None => format!("{stem}_{suffix}"),
    };
    dest_dir.join(new_name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn atomic_write_creates_file_with_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.json");
        atomic_write(&path, b"{\"a\":1}").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "{\"a\":1}");
    }

    #[test]
    fn atomic_write_overwrites_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.json");
        atomic_write(&path, b"first").unwrap();
        atomic_write(&path, b"second").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "second");
    }

    #[test]
    fn collision_safe_destination_no_clash() {
        let dir = tempfile::tempdir().unwrap();
        let now = chrono::Local::now();
        let dest = collision_safe_destination(dir.path(), "invoice.pdf", now);
        assert_eq!(dest, dir.path().join("invoice.pdf"));
    }

    #[test]
    fn collision_safe_destination_inserts_timestamp_on_clash() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("invoice.pdf"), b"x").unwrap();
        let now = chrono::Local::now();
        let dest = collision_safe_destination(dir.path(), "invoice.pdf", now);
        assert_ne!(dest, dir.path().join("invoice.pdf"));
        assert!(dest
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("invoice_"));
        assert!(dest.extension().unwrap() == "pdf");
    }
}
