/// Scratch directories for sandbox slots and build artifacts
use crate::config::types::{GradeError, Result};
use std::fs;
use std::os::unix::fs::{symlink, PermissionsExt};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Path substituted for scratch directories in learner-visible diagnostics
pub const DISPLAY_WORKDIR: &str = "/sandbox";

/// Owner applied to scratch directories when payloads run as an unprivileged uid
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScratchOwner {
    pub uid: u32,
    pub gid: u32,
}

pub(crate) fn io_error(action: &str, path: &Path, err: std::io::Error) -> GradeError {
    GradeError::Sandbox(format!("{} {}: {}", action, path.display(), err))
}

/// Artifacts of a successful build, kept for the lifetime of one grade.
///
/// Private to the grading process (mode 0700); removed when the value drops.
#[derive(Debug)]
pub struct BuildDir {
    id: String,
    path: PathBuf,
}

impl BuildDir {
    pub fn create(base_dir: &Path) -> Result<Self> {
        let id = Uuid::new_v4().to_string();
        let path = base_dir.join(&id);
        fs::create_dir_all(&path).map_err(|e| io_error("create build dir", &path, e))?;
        fs::set_permissions(&path, fs::Permissions::from_mode(0o700))
            .map_err(|e| io_error("chmod build dir", &path, e))?;
        Ok(Self { id, path })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for BuildDir {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_dir_all(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                log::warn!("Failed to remove build dir {}: {}", self.path.display(), e);
            }
        }
    }
}

/// Recreate `path` as an empty directory
pub fn reset_dir(path: &Path, owner: Option<ScratchOwner>) -> Result<()> {
    match fs::remove_dir_all(path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(io_error("remove", path, e)),
    }
    fs::create_dir_all(path).map_err(|e| io_error("create", path, e))?;
    fs::set_permissions(path, fs::Permissions::from_mode(0o700))
        .map_err(|e| io_error("chmod", path, e))?;
    if let Some(owner) = owner {
        std::os::unix::fs::chown(path, Some(owner.uid), Some(owner.gid))
            .map_err(|e| io_error("chown", path, e))?;
    }
    Ok(())
}

pub fn is_empty_dir(path: &Path) -> bool {
    match fs::read_dir(path) {
        Ok(mut entries) => entries.next().is_none(),
        Err(_) => false,
    }
}

/// Copy every entry under `src` into `dst`, preserving permission bits.
pub fn copy_tree(src: &Path, dst: &Path) -> Result<()> {
    let entries = fs::read_dir(src).map_err(|e| io_error("read", src, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| io_error("read", src, e))?;
        let from = entry.path();
        let to = dst.join(entry.file_name());
        let file_type = entry
            .file_type()
            .map_err(|e| io_error("stat", &from, e))?;

        if file_type.is_dir() {
            fs::create_dir_all(&to).map_err(|e| io_error("create", &to, e))?;
            copy_tree(&from, &to)?;
        } else if file_type.is_symlink() {
            let target = fs::read_link(&from).map_err(|e| io_error("readlink", &from, e))?;
            symlink(&target, &to).map_err(|e| io_error("symlink", &to, e))?;
        } else {
            fs::copy(&from, &to).map_err(|e| io_error("copy", &from, e))?;
        }
    }
    Ok(())
}

/// Replace host scratch paths in compiler or runtime diagnostics
pub fn sanitize_diagnostics(text: &str, scratch_dirs: &[&Path]) -> String {
    let mut out = text.to_string();
    for dir in scratch_dirs {
        let raw = dir.to_string_lossy();
        if !raw.is_empty() {
            out = out.replace(raw.as_ref(), DISPLAY_WORKDIR);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_root() -> PathBuf {
        let root = std::env::temp_dir().join(format!("gradebox-ws-{}", Uuid::new_v4()));
        fs::create_dir_all(&root).unwrap();
        root
    }

    #[test]
    fn test_build_dir_removed_on_drop() {
        let root = scratch_root();
        let path = {
            let build = BuildDir::create(&root).unwrap();
            fs::write(build.path().join("a.out"), b"bin").unwrap();
            assert!(!build.id().is_empty());
            build.path().to_path_buf()
        };
        assert!(!path.exists());
        fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn test_scratch_dirs_are_private() {
        let root = scratch_root();
        let build = BuildDir::create(&root).unwrap();
        let mode = fs::metadata(build.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o700);

        let slot = root.join("slot-0");
        reset_dir(&slot, None).unwrap();
        let mode = fs::metadata(&slot).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o700);
        drop(build);
        fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn test_reset_dir_clears_contents() {
        let root = scratch_root();
        let slot = root.join("slot-0");
        reset_dir(&slot, None).unwrap();
        fs::write(slot.join("leftover.txt"), b"x").unwrap();
        fs::create_dir_all(slot.join("nested/deeper")).unwrap();
        assert!(!is_empty_dir(&slot));

        reset_dir(&slot, None).unwrap();
        assert!(is_empty_dir(&slot));
        fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn test_copy_tree_preserves_layout_and_mode() {
        let root = scratch_root();
        let src = root.join("src");
        let dst = root.join("dst");
        fs::create_dir_all(src.join("pkg")).unwrap();
        fs::create_dir_all(&dst).unwrap();
        fs::write(src.join("main"), b"#!/bin/sh\n").unwrap();
        fs::set_permissions(src.join("main"), fs::Permissions::from_mode(0o755)).unwrap();
        fs::write(src.join("pkg/Main.class"), b"cafe").unwrap();

        copy_tree(&src, &dst).unwrap();

        let mode = fs::metadata(dst.join("main")).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
        assert_eq!(fs::read(dst.join("pkg/Main.class")).unwrap(), b"cafe");
        fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn test_sanitize_diagnostics_hides_host_paths() {
        let slot = Path::new("/var/tmp/gradebox/slots/slot-3");
        let text = "/var/tmp/gradebox/slots/slot-3/solution.cpp:4:1: error: expected ';'";
        assert_eq!(
            sanitize_diagnostics(text, &[slot]),
            "/sandbox/solution.cpp:4:1: error: expected ';'"
        );
    }
}
