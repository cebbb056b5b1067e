//! Guard for operator-supplied media paths.
//!
//! Outbound media is read from the local filesystem, so the path comes
//! straight from an API caller. Traversal sequences are rejected outright,
//! and the absolute path must stay inside one of the allow-listed roots
//! unless the deployment opted out via `DISABLE_PATH_CHECK`.

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Directories from which outbound media may be read.
pub const ALLOWED_MEDIA_ROOTS: &[&str] = &["/app/media", "/app/store", "/tmp"];

#[derive(Error, Debug)]
pub enum MediaPathError {
    #[error("path traversal not allowed")]
    Traversal,

    #[error("media path outside allowed directories")]
    OutsideAllowed,

    #[error("invalid media path: {0}")]
    Invalid(#[from] std::io::Error),
}

/// Validate an outbound media path.
///
/// `allow_outside_roots` skips the allow-list only; traversal sequences
/// are rejected even then.
pub fn validate_media_path(path: &str, allow_outside_roots: bool) -> Result<PathBuf, MediaPathError> {
    if path.contains("..") {
        return Err(MediaPathError::Traversal);
    }

    let absolute = std::path::absolute(Path::new(path))?;

    if allow_outside_roots {
        return Ok(absolute);
    }

    for root in ALLOWED_MEDIA_ROOTS {
        if absolute.starts_with(root) {
            return Ok(absolute);
        }
    }

    Err(MediaPathError::OutsideAllowed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allowed_roots_pass() {
        for path in ["/app/media/file.jpg", "/app/store/data.db", "/tmp/upload.png"] {
            assert!(validate_media_path(path, false).is_ok(), "{path}");
        }
    }

    #[test]
    fn traversal_is_rejected() {
        for path in [
            "/app/media/../etc/passwd",
            "/app/media/../../etc/passwd",
            "/app/../../../etc/passwd",
        ] {
            assert!(
                matches!(validate_media_path(path, false), Err(MediaPathError::Traversal)),
                "{path}"
            );
        }
    }

    #[test]
    fn outside_roots_is_rejected() {
        for path in ["/etc/passwd", "/home/user/file.txt", "/var/log/syslog"] {
            assert!(
                matches!(
                    validate_media_path(path, false),
                    Err(MediaPathError::OutsideAllowed)
                ),
                "{path}"
            );
        }
    }

    #[test]
    fn bypass_allows_external_paths_but_not_traversal() {
        assert!(validate_media_path("/home/user/file.txt", true).is_ok());
        assert!(matches!(
            validate_media_path("/app/media/../../../etc/passwd", true),
            Err(MediaPathError::Traversal)
        ));
    }

    #[test]
    fn prefix_match_is_per_component() {
        // "/tmpfoo" shares the string prefix with "/tmp" but is a
        // different directory.
        assert!(matches!(
            validate_media_path("/tmpfoo/x.jpg", false),
            Err(MediaPathError::OutsideAllowed)
        ));
    }
}
