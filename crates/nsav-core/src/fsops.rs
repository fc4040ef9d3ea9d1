//! Directory tree operations used by the slot manager.
//!
//! Copies follow symlinks and copy file contents, so a backup never points
//! back into the live save. Nothing here verifies the copy afterwards (no
//! sizes, no checksums).

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local, NaiveDateTime};
use log::{debug, warn};
use walkdir::WalkDir;

/// Recursively copy `src` into `dest`, creating `dest`. Fails if `dest`
/// already exists.
pub fn copy_tree(src: &Path, dest: &Path) -> io::Result<()> {
    if !src.is_dir() {
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("not a directory: {}", src.display()),
        ));
    }
    if dest.exists() {
        return Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("destination exists: {}", dest.display()),
        ));
    }
    fs::create_dir_all(dest)?;
    for entry in WalkDir::new(src).min_depth(1).follow_links(true) {
        let entry = entry.map_err(io::Error::from)?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| io::Error::other(e.to_string()))?;
        let target = dest.join(rel);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

/// Copy `src` to a new `dest`, removing whatever was partially written on
/// failure.
pub fn copy_tree_clean(src: &Path, dest: &Path) -> io::Result<()> {
    if dest.exists() {
        return Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("destination exists: {}", dest.display()),
        ));
    }
    copy_tree(src, dest).inspect_err(|_| {
        if let Err(e) = remove_tree_if_exists(dest) {
            warn!("could not clean up partial copy {}: {}", dest.display(), e);
        }
    })
}

/// Remove a directory tree; a missing path is not an error. Returns whether
/// anything was removed.
pub fn remove_tree_if_exists(path: &Path) -> io::Result<bool> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

fn sibling(dest: &Path, tag: &str) -> io::Result<PathBuf> {
    let name = dest.file_name().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("no directory name: {}", dest.display()),
        )
    })?;
    Ok(dest.with_file_name(format!(".{}.nsav-{}", name.to_string_lossy(), tag)))
}

/// Replace the tree at `dest` with a copy of `src`.
///
/// The copy is staged next to `dest`, the old tree is moved aside and the
/// staged tree renamed into place, so `dest` is only missing for the span of
/// two renames. When a rename is refused the old delete-then-copy sequence is
/// used instead, which leaves `dest` absent or partial if interrupted.
pub fn replace_tree(src: &Path, dest: &Path) -> io::Result<()> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    let staging = sibling(dest, "staging")?;
    let old = sibling(dest, "old")?;
    remove_tree_if_exists(&staging)?;
    copy_tree_clean(src, &staging)?;

    match swap_into_place(&staging, dest, &old) {
        Ok(()) => {
            if let Err(e) = remove_tree_if_exists(&old) {
                warn!("could not remove replaced tree {}: {}", old.display(), e);
            }
            Ok(())
        }
        Err(e) => {
            debug!("rename into {} refused ({}), copying in place", dest.display(), e);
            remove_tree_if_exists(&staging)?;
            remove_tree_if_exists(dest)?;
            copy_tree(src, dest)
        }
    }
}

fn swap_into_place(staging: &Path, dest: &Path, old: &Path) -> io::Result<()> {
    let had_dest = dest.exists();
    if had_dest {
        remove_tree_if_exists(old)?;
        fs::rename(dest, old)?;
    }
    if let Err(e) = fs::rename(staging, dest) {
        if had_dest {
            fs::rename(old, dest)?;
        }
        return Err(e);
    }
    Ok(())
}

/// Creation time of a path as local wall-clock time, falling back to the
/// modification time where the filesystem does not record creation.
pub fn created_at(path: &Path) -> Option<NaiveDateTime> {
    let meta = fs::metadata(path).ok()?;
    let time = meta.created().or_else(|_| meta.modified()).ok()?;
    Some(DateTime::<Local>::from(time).naive_local())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(p: &Path, s: &str) {
        fs::create_dir_all(p.parent().unwrap()).unwrap();
        fs::write(p, s).unwrap();
    }

    #[test]
    fn copy_tree_copies_nested_files_and_empty_dirs() {
        let d = tempfile::tempdir().unwrap();
        let src = d.path().join("src");
        write(&src.join("world/chunk_0.bin"), "abc");
        write(&src.join("player.xml"), "<p/>");
        fs::create_dir_all(src.join("empty")).unwrap();
        let dest = d.path().join("dest");
        copy_tree(&src, &dest).unwrap();
        assert_eq!(fs::read_to_string(dest.join("world/chunk_0.bin")).unwrap(), "abc");
        assert_eq!(fs::read_to_string(dest.join("player.xml")).unwrap(), "<p/>");
        assert!(dest.join("empty").is_dir());
    }

    #[test]
    fn copy_tree_refuses_existing_destination() {
        let d = tempfile::tempdir().unwrap();
        let src = d.path().join("src");
        fs::create_dir_all(&src).unwrap();
        let dest = d.path().join("dest");
        fs::create_dir_all(&dest).unwrap();
        let err = copy_tree(&src, &dest).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::AlreadyExists);
    }

    #[test]
    fn replace_tree_swaps_contents_and_leaves_no_siblings() {
        let d = tempfile::tempdir().unwrap();
        let src = d.path().join("src");
        write(&src.join("new.txt"), "new");
        let dest = d.path().join("dest");
        write(&dest.join("stale.txt"), "old");
        replace_tree(&src, &dest).unwrap();
        assert!(dest.join("new.txt").exists());
        assert!(!dest.join("stale.txt").exists());
        let names: Vec<_> = fs::read_dir(d.path())
            .unwrap()
            .flatten()
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names.len(), 2, "unexpected leftovers: {:?}", names);
    }

    #[test]
    fn replace_tree_creates_missing_destination() {
        let d = tempfile::tempdir().unwrap();
        let src = d.path().join("src");
        write(&src.join("a.txt"), "a");
        let dest = d.path().join("deep/dest");
        replace_tree(&src, &dest).unwrap();
        assert!(dest.join("a.txt").exists());
    }

    #[test]
    fn replace_tree_keeps_destination_when_source_missing() {
        let d = tempfile::tempdir().unwrap();
        let dest = d.path().join("dest");
        write(&dest.join("keep.txt"), "keep");
        assert!(replace_tree(&d.path().join("nope"), &dest).is_err());
        assert!(dest.join("keep.txt").exists());
    }

    #[test]
    fn remove_missing_tree_is_ok() {
        let d = tempfile::tempdir().unwrap();
        assert!(!remove_tree_if_exists(&d.path().join("nope")).unwrap());
    }

    #[test]
    fn created_at_reports_a_time_for_new_dirs() {
        let d = tempfile::tempdir().unwrap();
        assert!(created_at(d.path()).is_some());
        assert!(created_at(&d.path().join("nope")).is_none());
    }
}
