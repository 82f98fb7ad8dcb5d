//! Sandboxed resolution of asset names against the sound root.

use std::path::{Component, Path, PathBuf};

use crate::error::PlayError;

/// Fixed root directory that every play request is resolved against.
#[derive(Debug, Clone)]
pub struct SoundLibrary {
    root: PathBuf,
}

impl SoundLibrary {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve `name` to a file under the root.
    ///
    /// The name is checked lexically before any filesystem access; only then is the joined
    /// path required to be an existing regular file.
    pub fn resolve(&self, name: &str) -> Result<PathBuf, PlayError> {
        let relative = validate_name(name)?;
        let path = self.root.join(relative);
        match std::fs::metadata(&path) {
            Ok(meta) if meta.is_file() => Ok(path),
            Ok(_) => Err(PlayError::SourceUnavailable {
                path,
                source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "not a regular file"),
            }),
            Err(source) => Err(PlayError::SourceUnavailable { path, source }),
        }
    }
}

/// Accept only plain relative names made of normal components.
fn validate_name(name: &str) -> Result<&Path, PlayError> {
    let rejected = || PlayError::PathRejected(name.to_string());
    let trimmed = name.trim();
    if trimmed.is_empty() || trimmed != name || name.contains('\\') || name.contains('\0') {
        return Err(rejected());
    }
    let path = Path::new(name);
    if path.is_absolute() || path.has_root() {
        return Err(rejected());
    }
    for component in path.components() {
        match component {
            Component::Normal(_) => {}
            Component::ParentDir | Component::CurDir | Component::RootDir | Component::Prefix(_) => {
                return Err(rejected());
            }
        }
    }
    // `Path::components` folds "a/./b"; refuse any literal ".." segment regardless.
    if name.split('/').any(|seg| seg == ".." || seg == "." || seg.is_empty()) {
        return Err(rejected());
    }
    Ok(path)
}
