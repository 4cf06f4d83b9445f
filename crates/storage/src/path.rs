//! Artifact name validation.
//!
//! Artifact directories are flat, so a valid name is exactly one normal path
//! component. Anything that could address a file outside the directory (or a
//! subdirectory inside it) is rejected outright rather than normalised.

use std::path::{Component, Path, PathBuf};

use crate::error::{ErrorKind, Result};

/// Validates an artifact name.
///
/// # Returns
/// Returns the name as a [`PathBuf`] if valid, or
/// [`InvalidPath`](crate::error::ErrorKind::InvalidPath) if not.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use komerge_storage::validate_name;
/// assert!(validate_name("0b5c0c3e.sqlite3").is_ok());
/// assert_eq!(validate_name("./0b5c0c3e.sqlite3").unwrap(), Path::new("0b5c0c3e.sqlite3"));
/// assert!(validate_name("../etc/passwd").is_err());
/// assert!(validate_name("nested/file.sqlite3").is_err());
/// assert!(validate_name("a\0b").is_err());
/// ```
pub fn validate(path: impl AsRef<Path>) -> Result<PathBuf> {
    let path = path.as_ref();
    let mut name = None;
    for component in path.components() {
        match component {
            Component::CurDir => {},
            Component::Normal(s) if name.is_none() => {
                // Null bytes pass through Path::components() on Unix but cause
                // truncation in C-based syscalls.
                if s.as_encoded_bytes().contains(&0) {
                    exn::bail!(ErrorKind::InvalidPath(path.to_path_buf()));
                }
                name = Some(s);
            },
            _ => exn::bail!(ErrorKind::InvalidPath(path.to_path_buf())),
        }
    }
    match name {
        Some(name) => Ok(PathBuf::from(name)),
        None => exn::bail!(ErrorKind::InvalidPath(path.to_path_buf())),
    }
}
