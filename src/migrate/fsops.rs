//! Attribute-preserving filesystem primitives shared by backup, sync, and
//! rollback.

use std::fs;
use std::io;
use std::path::Path;

use filetime::FileTime;

/// Recursively copy `src` to `dst` (which must not exist).
///
/// Regular files keep permissions and modification time, directories keep
/// permissions and modification time (applied after their children), and
/// symlinks are recreated verbatim rather than followed.
pub fn copy_tree(src: &Path, dst: &Path) -> io::Result<u64> {
    let meta = fs::symlink_metadata(src)?;
    let file_type = meta.file_type();

    if file_type.is_symlink() {
        copy_symlink(src, dst)?;
        return Ok(0);
    }
    if file_type.is_file() {
        return copy_file(src, dst, &meta);
    }

    fs::create_dir(dst)?;
    let mut bytes = 0;
    for child in fs::read_dir(src)? {
        let child = child?;
        bytes += copy_tree(&child.path(), &dst.join(child.file_name()))?;
    }
    fs::set_permissions(dst, meta.permissions())?;
    set_mtime(dst, &meta)?;
    Ok(bytes)
}

/// Copy one regular file, overwriting `dst`, keeping permissions and mtime.
pub fn copy_file(src: &Path, dst: &Path, meta: &fs::Metadata) -> io::Result<u64> {
    let bytes = fs::copy(src, dst)?;
    fs::set_permissions(dst, meta.permissions())?;
    set_mtime(dst, meta)?;
    Ok(bytes)
}

/// Recreate the symlink at `src` as `dst`.
pub fn copy_symlink(src: &Path, dst: &Path) -> io::Result<()> {
    let target = fs::read_link(src)?;
    make_symlink(&target, dst)
}

/// Create a symlink at `link` pointing to `target`.
#[cfg(unix)]
pub fn make_symlink(target: &Path, link: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(not(unix))]
pub fn make_symlink(_target: &Path, link: &Path) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        format!("symlinks unsupported on this platform: {}", link.display()),
    ))
}

/// Remove whatever is at `path` without following symlinks. Missing is fine.
pub fn remove_path(path: &Path) -> io::Result<()> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
        Ok(_) => fs::remove_file(path),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Whether `a` and `b` are regular files likely to hold the same bytes
/// (same size and same mtime).
pub fn same_file_shape(a: &fs::Metadata, b: &fs::Metadata) -> bool {
    a.is_file()
        && b.is_file()
        && a.len() == b.len()
        && FileTime::from_last_modification_time(a) == FileTime::from_last_modification_time(b)
}

fn set_mtime(path: &Path, meta: &fs::Metadata) -> io::Result<()> {
    let mtime = FileTime::from_last_modification_time(meta);
    let atime = FileTime::from_last_access_time(meta);
    filetime::set_file_times(path, atime, mtime)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copy_tree_preserves_structure_and_mtime() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("src");
        fs::create_dir_all(src.join("nested/deeper")).unwrap();
        fs::write(src.join("a.txt"), b"alpha").unwrap();
        fs::write(src.join("nested/deeper/b.bin"), vec![7u8; 300]).unwrap();
        let old = FileTime::from_unix_time(1_600_000_000, 0);
        filetime::set_file_mtime(src.join("a.txt"), old).unwrap();

        let dst = tmp.path().join("dst");
        let bytes = copy_tree(&src, &dst).unwrap();

        assert_eq!(bytes, 305);
        assert_eq!(fs::read(dst.join("a.txt")).unwrap(), b"alpha");
        assert_eq!(fs::read(dst.join("nested/deeper/b.bin")).unwrap().len(), 300);
        let copied = fs::metadata(dst.join("a.txt")).unwrap();
        assert_eq!(FileTime::from_last_modification_time(&copied), old);
    }

    #[test]
    fn copy_tree_refuses_existing_destination_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("src");
        let dst = tmp.path().join("dst");
        fs::create_dir_all(&src).unwrap();
        fs::create_dir_all(&dst).unwrap();
        assert!(copy_tree(&src, &dst).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn copy_tree_recreates_symlinks_and_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("src");
        fs::create_dir_all(&src).unwrap();
        fs::write(src.join("script.sh"), b"#!/bin/sh\n").unwrap();
        fs::set_permissions(src.join("script.sh"), fs::Permissions::from_mode(0o750)).unwrap();
        make_symlink(Path::new("script.sh"), &src.join("alias")).unwrap();

        let dst = tmp.path().join("dst");
        copy_tree(&src, &dst).unwrap();

        let mode = fs::metadata(dst.join("script.sh")).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o750);
        assert_eq!(
            fs::read_link(dst.join("alias")).unwrap(),
            Path::new("script.sh")
        );
    }

    #[test]
    fn remove_path_handles_all_kinds() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("d");
        fs::create_dir_all(dir.join("x")).unwrap();
        let file = tmp.path().join("f");
        fs::write(&file, b"1").unwrap();

        remove_path(&dir).unwrap();
        remove_path(&file).unwrap();
        remove_path(&tmp.path().join("missing")).unwrap();
        assert!(!dir.exists());
        assert!(!file.exists());
    }

    #[cfg(unix)]
    #[test]
    fn remove_path_does_not_follow_symlinks() {
        let tmp = tempfile::tempdir().unwrap();
        let target = tmp.path().join("target");
        fs::create_dir_all(&target).unwrap();
        fs::write(target.join("keep"), b"1").unwrap();
        let link = tmp.path().join("link");
        make_symlink(&target, &link).unwrap();

        remove_path(&link).unwrap();
        assert!(target.join("keep").exists());
        assert!(fs::symlink_metadata(&link).is_err());
    }
}
