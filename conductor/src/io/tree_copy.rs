//! Recursive directory copies for agent projects.

use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use anyhow::{Context, Result, bail};
use walkdir::WalkDir;

/// Copy every file under `src` into `dst`, creating directories as needed.
///
/// Symlinks are followed; the copy holds plain files only.
pub fn copy_tree(src: &Path, dst: &Path) -> Result<()> {
    if !src.is_dir() {
        bail!("source directory {} does not exist", src.display());
    }
    fs::create_dir_all(dst).with_context(|| format!("create directory {}", dst.display()))?;
    for entry in WalkDir::new(src).follow_links(true) {
        let entry = entry.with_context(|| format!("walk {}", src.display()))?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .with_context(|| format!("relativize {}", entry.path().display()))?;
        if rel.as_os_str().is_empty() {
            continue;
        }
        let target = dst.join(rel);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)
                .with_context(|| format!("create directory {}", target.display()))?;
        } else {
            fs::copy(entry.path(), &target).with_context(|| {
                format!("copy {} to {}", entry.path().display(), target.display())
            })?;
        }
    }
    Ok(())
}

/// Remove `path` recursively; a missing directory is not an error.
pub fn remove_tree(path: &Path) -> Result<()> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err).with_context(|| format!("remove {}", path.display())),
    }
}

/// Replace `dst` with a fresh copy of `src`.
pub fn replace_tree(src: &Path, dst: &Path) -> Result<()> {
    remove_tree(dst)?;
    copy_tree(src, dst)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replace_drops_stale_files() {
        let temp = tempfile::tempdir().expect("tempdir");
        let src = temp.path().join("src");
        let dst = temp.path().join("dst");
        fs::create_dir_all(src.join("nested")).expect("src");
        fs::write(src.join("nested/a.txt"), "a").expect("a");
        fs::create_dir_all(&dst).expect("dst");
        fs::write(dst.join("stale.txt"), "old").expect("stale");

        replace_tree(&src, &dst).expect("replace");
        assert_eq!(fs::read_to_string(dst.join("nested/a.txt")).expect("read"), "a");
        assert!(!dst.join("stale.txt").exists());
    }

    #[test]
    fn missing_source_is_an_error_and_missing_target_is_not() {
        let temp = tempfile::tempdir().expect("tempdir");
        assert!(copy_tree(&temp.path().join("nope"), &temp.path().join("out")).is_err());
        remove_tree(&temp.path().join("nope")).expect("remove missing");
    }
}
