//! Cross-platform filesystem helpers.
//!
//! On Unix archive paths are stored as raw `OsStr` bytes and ownership/mode
//! bits are taken from `MetadataExt`. Elsewhere paths are stored as UTF-8
//! (lossy) and metadata falls back to what `std::fs::Permissions` exposes.

use std::fs::Metadata;
use std::io;
use std::path::{Component, Path, PathBuf};

use crate::block::EntryMeta;

/// Metadata recorded on StartOfFile / Directory blocks.
pub fn entry_meta(meta: &Metadata) -> EntryMeta {
    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        EntryMeta { uid: meta.uid(), gid: meta.gid(), mode: meta.mode() & 0o7777 }
    }
    #[cfg(not(unix))]
    {
        let mode = if meta.permissions().readonly() { 0o444 } else { 0o644 };
        let mode = if meta.is_dir() { mode | 0o111 } else { mode };
        EntryMeta { uid: 0, gid: 0, mode }
    }
}

#[cfg(unix)]
/// Set POSIX permission bits on Unix.
pub fn set_unix_permissions(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
/// Only the read-only bit survives off Unix.
pub fn set_unix_permissions(path: &Path, mode: u32) -> io::Result<()> {
    let mut perms = std::fs::metadata(path)?.permissions();
    perms.set_readonly(mode & 0o222 == 0);
    std::fs::set_permissions(path, perms)
}

#[cfg(unix)]
pub fn set_owner(path: &Path, uid: u32, gid: u32) -> io::Result<()> {
    std::os::unix::fs::chown(path, Some(uid), Some(gid))
}

#[cfg(not(unix))]
/// No-op: Windows has no numeric owners.
pub fn set_owner(_path: &Path, _uid: u32, _gid: u32) -> io::Result<()> {
    Ok(())
}

/// Identity of an on-disk file, used to keep the output archive out of itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileIdentity {
    dev: u64,
    ino: u64,
}

impl FileIdentity {
    #[cfg(unix)]
    pub fn of(meta: &Metadata) -> Option<Self> {
        use std::os::unix::fs::MetadataExt;
        Some(FileIdentity { dev: meta.dev(), ino: meta.ino() })
    }

    #[cfg(not(unix))]
    pub fn of(_meta: &Metadata) -> Option<Self> {
        None
    }

    /// Identity of whatever standard output is redirected to, if it is a
    /// regular file.
    #[cfg(unix)]
    pub fn of_stdout() -> Option<Self> {
        let meta = std::fs::metadata("/dev/stdout").ok()?;
        if meta.is_file() {
            Self::of(&meta)
        } else {
            None
        }
    }

    #[cfg(not(unix))]
    pub fn of_stdout() -> Option<Self> {
        None
    }
}

/// Path under which a filesystem path is recorded in the archive.
///
/// The path is normalised lexically: root, drive prefix and `.` are dropped
/// and `..` removes the component before it, so `/srv/./data/../x` becomes
/// `srv/x`. A `..` with nothing left to remove is dropped.
pub fn archive_path(path: &Path) -> PathBuf {
    let mut parts: Vec<&std::ffi::OsStr> = Vec::new();
    for c in path.components() {
        match c {
            Component::Normal(part) => parts.push(part),
            Component::ParentDir => {
                parts.pop();
            }
            Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
        }
    }
    parts.into_iter().collect()
}

/// Validates an archive path before it is joined onto the extraction target.
/// Returns `None` for empty, absolute or parent-escaping paths.
pub fn safe_relative(path: &Path) -> Option<&Path> {
    let mut normal = 0usize;
    for c in path.components() {
        match c {
            Component::Normal(_) => normal += 1,
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    (normal > 0).then_some(path)
}

#[cfg(unix)]
pub fn path_to_bytes(path: &Path) -> std::borrow::Cow<'_, [u8]> {
    use std::os::unix::ffi::OsStrExt;
    std::borrow::Cow::Borrowed(path.as_os_str().as_bytes())
}

#[cfg(not(unix))]
pub fn path_to_bytes(path: &Path) -> std::borrow::Cow<'_, [u8]> {
    // Archive paths always use '/' so archives move between platforms.
    let s = path.to_string_lossy().replace('\\', "/");
    std::borrow::Cow::Owned(s.into_bytes())
}

#[cfg(unix)]
pub fn path_from_bytes(bytes: Vec<u8>) -> PathBuf {
    use std::os::unix::ffi::OsStringExt;
    PathBuf::from(std::ffi::OsString::from_vec(bytes))
}

#[cfg(not(unix))]
pub fn path_from_bytes(bytes: Vec<u8>) -> PathBuf {
    PathBuf::from(String::from_utf8_lossy(&bytes).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn archive_path_strips_root_and_dots() {
        assert_eq!(archive_path(Path::new("/srv/./data/../x")), PathBuf::from("srv/x"));
        assert_eq!(archive_path(Path::new("root/a.txt")), PathBuf::from("root/a.txt"));
        assert_eq!(archive_path(Path::new("./root")), PathBuf::from("root"));
        assert_eq!(archive_path(Path::new("a/../b")), PathBuf::from("b"));
        assert_eq!(archive_path(Path::new("a/b/../../c/d")), PathBuf::from("c/d"));
        assert_eq!(archive_path(Path::new("../../x")), PathBuf::from("x"));
        assert_eq!(archive_path(Path::new("a/..")), PathBuf::new());
        assert_eq!(archive_path(Path::new("/")), PathBuf::new());
    }

    #[test]
    fn safe_relative_rejects_escapes() {
        assert!(safe_relative(Path::new("a/b")).is_some());
        assert!(safe_relative(Path::new("./a")).is_some());
        assert!(safe_relative(Path::new("../a")).is_none());
        assert!(safe_relative(Path::new("a/../../b")).is_none());
        assert!(safe_relative(Path::new("/etc/passwd")).is_none());
        assert!(safe_relative(Path::new("")).is_none());
        assert!(safe_relative(Path::new(".")).is_none());
    }

    #[cfg(unix)]
    #[test]
    fn non_utf8_paths_survive_bytes() {
        use std::os::unix::ffi::OsStrExt;
        let raw = std::ffi::OsStr::from_bytes(b"dir/\xff\xfe.bin");
        let path = Path::new(raw);
        let bytes = path_to_bytes(path).into_owned();
        assert_eq!(path_from_bytes(bytes), path);
    }
}
