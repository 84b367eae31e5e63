//! Project context discovery.
//!
//! A project is marked by `.gobby/project.json` at its root. Events carry
//! only a `cwd`; resolution walks up from there to the nearest marker,
//! and auto-initializes one when none exists so that a session is never
//! left without a project.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{CoreError, CoreResult};
use crate::ids::ProjectId;

/// Contents of `.gobby/project.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectContext {
    /// The project's store id.
    pub id: ProjectId,
    /// Display name, defaulting to the directory name.
    pub name: String,
    /// Absolute path of the project root.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

impl ProjectContext {
    /// Locate the nearest project marker at or above `start`.
    ///
    /// Returns `None` when no ancestor carries `.gobby/project.json` or
    /// when the marker file is unreadable/corrupt (corruption is treated
    /// as absence; initialization will rewrite it).
    #[must_use]
    pub fn discover(start: &Path) -> Option<Self> {
        let mut dir = Some(start);
        while let Some(current) = dir {
            let marker = current.join(".gobby").join("project.json");
            if marker.is_file() {
                if let Ok(raw) = std::fs::read_to_string(&marker) {
                    if let Ok(mut ctx) = serde_json::from_str::<Self>(&raw) {
                        ctx.path.get_or_insert_with(|| current.to_path_buf());
                        return Some(ctx);
                    }
                }
                return None;
            }
            dir = current.parent();
        }
        None
    }

    /// Write `.gobby/project.json` for a fresh project rooted at `root`.
    ///
    /// # Errors
    ///
    /// Returns an error if the marker directory or file cannot be written.
    pub fn initialize(root: &Path, id: ProjectId) -> CoreResult<Self> {
        let name = root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "project".to_string());

        let ctx = Self {
            id,
            name,
            path: Some(root.to_path_buf()),
        };

        let marker_dir = root.join(".gobby");
        std::fs::create_dir_all(&marker_dir).map_err(|e| CoreError::Io {
            path: marker_dir.display().to_string(),
            source: e,
        })?;

        let marker = marker_dir.join("project.json");
        let body = serde_json::to_string_pretty(&ctx)?;
        std::fs::write(&marker, body).map_err(|e| CoreError::Io {
            path: marker.display().to_string(),
            source: e,
        })?;

        Ok(ctx)
    }

    /// Copy this project's marker file into another directory (used when
    /// seeding agent worktrees).
    ///
    /// # Errors
    ///
    /// Returns an error if the source marker is missing or the copy fails.
    pub fn copy_marker(source_root: &Path, dest_root: &Path) -> CoreResult<()> {
        let src = source_root.join(".gobby").join("project.json");
        if !src.is_file() {
            return Err(CoreError::ProjectMarkerMissing {
                root: source_root.display().to_string(),
            });
        }
        let dest_dir = dest_root.join(".gobby");
        std::fs::create_dir_all(&dest_dir).map_err(|e| CoreError::Io {
            path: dest_dir.display().to_string(),
            source: e,
        })?;
        let dest = dest_dir.join("project.json");
        std::fs::copy(&src, &dest).map_err(|e| CoreError::Io {
            path: dest.display().to_string(),
            source: e,
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_discover_missing() {
        let dir = TempDir::new().unwrap();
        assert!(ProjectContext::discover(dir.path()).is_none());
    }

    #[test]
    fn test_initialize_then_discover() {
        let dir = TempDir::new().unwrap();
        let id = ProjectId::new();
        let ctx = ProjectContext::initialize(dir.path(), id).unwrap();
        assert_eq!(ctx.id, id);

        let found = ProjectContext::discover(dir.path()).unwrap();
        assert_eq!(found.id, id);
        assert_eq!(found.path.as_deref(), Some(dir.path()));
    }

    #[test]
    fn test_discover_walks_up() {
        let dir = TempDir::new().unwrap();
        let id = ProjectId::new();
        ProjectContext::initialize(dir.path(), id).unwrap();

        let nested = dir.path().join("src").join("deep");
        std::fs::create_dir_all(&nested).unwrap();
        let found = ProjectContext::discover(&nested).unwrap();
        assert_eq!(found.id, id);
    }

    #[test]
    fn test_copy_marker() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        ProjectContext::initialize(src.path(), ProjectId::new()).unwrap();
        ProjectContext::copy_marker(src.path(), dst.path()).unwrap();
        assert!(ProjectContext::discover(dst.path()).is_some());
    }

    #[test]
    fn test_copy_marker_missing_source() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        assert!(ProjectContext::copy_marker(src.path(), dst.path()).is_err());
    }
}
