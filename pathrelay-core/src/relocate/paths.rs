use std::path::{Component, Path, PathBuf};

use crate::error::{RelayError, Result};

/// Maps staging paths onto the library tree by relativisation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PathMapping {
    staging_root: PathBuf,
    library_root: PathBuf,
}

impl PathMapping {
    pub fn new(staging_root: impl AsRef<Path>, library_root: impl AsRef<Path>) -> Self {
        Self {
            staging_root: normalize_lexically(staging_root.as_ref())
                .unwrap_or_else(|| staging_root.as_ref().to_path_buf()),
            library_root: normalize_lexically(library_root.as_ref())
                .unwrap_or_else(|| library_root.as_ref().to_path_buf()),
        }
    }

    pub fn staging_root(&self) -> &Path {
        &self.staging_root
    }

    pub fn library_root(&self) -> &Path {
        &self.library_root
    }

    /// `library_root + relative(source, staging_root)`.
    ///
    /// The staging root itself and anything outside it are rejected.
    pub fn target_for(&self, source: &Path) -> Result<PathBuf> {
        let outside = || RelayError::Path {
            path: source.to_path_buf(),
            root: self.staging_root.clone(),
        };

        let normalized = normalize_lexically(source).ok_or_else(outside)?;
        let relative = normalized
            .strip_prefix(&self.staging_root)
            .map_err(|_| outside())?;
        if relative.as_os_str().is_empty() {
            return Err(outside());
        }

        Ok(self.library_root.join(relative))
    }
}

/// Resolve `.` and `..` without touching the filesystem. Returns `None` when
/// `..` climbs above the first component.
fn normalize_lexically(path: &Path) -> Option<PathBuf> {
    let mut clean = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(prefix) => clean.push(prefix.as_os_str()),
            Component::RootDir => clean.push(component.as_os_str()),
            Component::CurDir => {}
            Component::Normal(segment) => clean.push(segment),
            Component::ParentDir => {
                let popped = matches!(
                    clean.components().next_back(),
                    Some(Component::Normal(_))
                ) && clean.pop();
                if !popped {
                    return None;
                }
            }
        }
    }
    Some(clean)
}
