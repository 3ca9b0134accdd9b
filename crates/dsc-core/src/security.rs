use std::path::{Component, Path};

use dsc_types::{DiscoveryError, Result};

/// Check for path traversal attempts.
///
/// Only whole `..` segments count; `notes..txt` is an ordinary file name.
pub fn check_path_traversal(path: &str) -> bool {
    path.contains('\0')
        || Path::new(path)
            .components()
            .any(|c| matches!(c, Component::ParentDir))
}

/// Validate a path that must stay inside a workspace or storage root.
///
/// Rejects traversal, NUL bytes, absolute paths and empty paths.
pub fn validate_relative_path(path: &str) -> Result<()> {
    if path.trim().is_empty() {
        return Err(DiscoveryError::Security("Empty path".to_string()));
    }
    if check_path_traversal(path) {
        return Err(DiscoveryError::Security(format!(
            "Path traversal detected: {path}"
        )));
    }
    let escapes = Path::new(path)
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if escapes {
        return Err(DiscoveryError::Security(format!(
            "Path must be relative: {path}"
        )));
    }
    Ok(())
}
