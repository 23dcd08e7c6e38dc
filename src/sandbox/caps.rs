// src/sandbox/caps.rs

//! Capability handlers for sandboxed recipe execution.
//!
//! Every filesystem operation a recipe can reach (open, stat, readdir,
//! cd) resolves its path against the sandbox root after following
//! symlinks; anything outside the root is a permission error. Command
//! execution is a no-op that reports success.

use crate::error::{Error, Result};
use std::fs::{self, File, Metadata};
use std::io;
use std::path::{Component, Path, PathBuf};

pub struct Capabilities {
    root: PathBuf,
}

impl Capabilities {
    /// Create a capability set jailed to `root`
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        Ok(Self {
            root: fs::canonicalize(root.as_ref())?,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Open a file read-only, regardless of the mode the recipe asked for
    pub fn open(&self, cwd: &Path, path: &str) -> Result<File> {
        let resolved = self.jail(cwd, path)?;
        Ok(File::open(resolved)?)
    }

    /// Stat a path inside the jail
    pub fn stat(&self, cwd: &Path, path: &str) -> Result<Metadata> {
        let resolved = self.jail(cwd, path)?;
        Ok(fs::metadata(resolved)?)
    }

    /// List directory entry names inside the jail
    pub fn read_dir(&self, cwd: &Path, path: &str) -> Result<Vec<String>> {
        let resolved = self.jail(cwd, path)?;
        let mut names = Vec::new();
        for entry in fs::read_dir(resolved)? {
            let entry = entry?;
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    /// Resolve a directory change target; the target must exist, be a
    /// directory, and sit inside the jail
    pub fn change_dir(&self, cwd: &Path, path: &str) -> Result<PathBuf> {
        let resolved = self.jail(cwd, path)?;
        if !resolved.is_dir() {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::NotFound,
                format!("not a directory: {path}"),
            )));
        }
        Ok(resolved)
    }

    /// External command execution: succeed without spawning anything
    pub fn exec(&self, _argv: &[String]) -> i32 {
        0
    }

    /// Resolve `path` relative to `cwd`, follow symlinks, and require the
    /// result to stay under the root
    fn jail(&self, cwd: &Path, path: &str) -> Result<PathBuf> {
        let joined = if Path::new(path).is_absolute() {
            PathBuf::from(path)
        } else {
            cwd.join(path)
        };

        let resolved = resolve_lexical(&joined)?;
        if resolved.starts_with(&self.root) {
            Ok(resolved)
        } else {
            Err(Error::SandboxEscape { path: resolved })
        }
    }
}

/// Canonicalize the deepest existing prefix of `path` (following
/// symlinks), then append the remaining components lexically.
///
/// `..` in the non-existent suffix pops a component, so escapes through
/// dangling paths are still caught by the prefix check.
fn resolve_lexical(path: &Path) -> Result<PathBuf> {
    let mut suffix: Vec<std::ffi::OsString> = Vec::new();
    let mut prefix = path.to_path_buf();

    let resolved = loop {
        match fs::canonicalize(&prefix) {
            Ok(resolved) => break resolved,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                match (prefix.file_name(), prefix.parent()) {
                    (Some(name), Some(parent)) => {
                        suffix.push(name.to_os_string());
                        prefix = parent.to_path_buf();
                    }
                    _ => return Err(Error::Io(e)),
                }
            }
            Err(e) => return Err(Error::Io(e)),
        }
    };

    let mut out = resolved;
    for component in suffix.iter().rev() {
        match Path::new(component).components().next() {
            Some(Component::ParentDir) => {
                out.pop();
            }
            Some(Component::CurDir) | None => {}
            _ => out.push(component),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn test_open_inside_root() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("file"), b"contents").unwrap();

        let caps = Capabilities::new(dir.path()).unwrap();
        let mut file = caps.open(caps.root(), "file").unwrap();
        let mut buf = String::new();
        file.read_to_string(&mut buf).unwrap();
        assert_eq!(buf, "contents");
    }

    #[test]
    fn test_escape_via_dotdot_denied() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();

        let caps = Capabilities::new(dir.path().join("sub")).unwrap();
        let err = caps.open(caps.root(), "../outside").unwrap_err();
        assert!(matches!(err, Error::SandboxEscape { .. }));
    }

    #[test]
    fn test_absolute_path_outside_denied() {
        let dir = tempfile::tempdir().unwrap();
        let caps = Capabilities::new(dir.path()).unwrap();
        let err = caps.stat(caps.root(), "/etc/passwd").unwrap_err();
        assert!(matches!(err, Error::SandboxEscape { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_escape_denied() {
        let dir = tempfile::tempdir().unwrap();
        let jail = dir.path().join("jail");
        std::fs::create_dir(&jail).unwrap();
        std::fs::write(dir.path().join("secret"), b"x").unwrap();
        std::os::unix::fs::symlink(dir.path().join("secret"), jail.join("link")).unwrap();

        let caps = Capabilities::new(&jail).unwrap();
        let err = caps.open(caps.root(), "link").unwrap_err();
        assert!(matches!(err, Error::SandboxEscape { .. }));
    }

    #[test]
    fn test_read_dir_lists_names() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b"), b"").unwrap();
        std::fs::write(dir.path().join("a"), b"").unwrap();

        let caps = Capabilities::new(dir.path()).unwrap();
        assert_eq!(caps.read_dir(caps.root(), ".").unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn test_exec_is_noop_success() {
        let dir = tempfile::tempdir().unwrap();
        let caps = Capabilities::new(dir.path()).unwrap();
        assert_eq!(caps.exec(&["rm".to_string(), "-rf".to_string(), "/".to_string()]), 0);
    }
}
