/// Owner-only file persistence for key material.
///
/// Writes go to a temporary file in the destination directory and are
/// renamed into place once flushed to disk. If anything fails before the
/// rename the temporary file is removed when it drops, so a crash never
/// leaves a truncated key behind.

use std::io::{self, Write};
use std::path::Path;
use tempfile::NamedTempFile;

/// Create `dir` (and parents) restricted to the owner
pub fn ensure_private_dir(dir: &Path) -> io::Result<()> {
    std::fs::create_dir_all(dir)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700))?;
    }

    Ok(())
}

/// Atomically replace `path` with `contents`, readable by the owner only
pub fn write_private_file(path: &Path, contents: &[u8]) -> io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;

    // NamedTempFile is created 0600 on unix
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(contents)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;

    Ok(())
}
