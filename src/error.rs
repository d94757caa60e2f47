//! Error taxonomy for discovery, resolution and plugin lifecycle.

use std::path::PathBuf;
use thiserror::Error;
use uuid::Uuid;

/// Result alias used across the library
pub type Result<T> = std::result::Result<T, RegistryError>;

/// Everything that can go wrong while discovering, resolving or registering plugins.
///
/// Resolution-phase variants (`MissingPlugin`, `MissingDependency`, `DependencyCycle`)
/// fail a whole `load` call. The remaining variants are reported per candidate and
/// never stop the rest of the batch.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("plugin {0} was requested but not found")]
    MissingPlugin(Uuid),

    #[error("dependency {dependency} required by plugin {required_by} was not found")]
    MissingDependency { dependency: Uuid, required_by: Uuid },

    #[error("dependency cycle detected: {}", format_path(.path))]
    DependencyCycle { path: Vec<Uuid> },

    #[error("plugin '{name}' ({identity}) is already loaded")]
    DuplicatePlugin { name: String, identity: Uuid },

    #[error("unreadable plugin candidate {}: {reason}", .path.display())]
    UnreadableCandidate { path: PathBuf, reason: String },

    #[error("plugin '{name}' failed to register: {source:#}")]
    Callback {
        name: String,
        #[source]
        source: anyhow::Error,
    },
}

impl RegistryError {
    /// Whether this error aborts the whole load call
    #[must_use]
    pub fn is_resolution_failure(&self) -> bool {
        matches!(
            self,
            Self::MissingPlugin(_) | Self::MissingDependency { .. } | Self::DependencyCycle { .. }
        )
    }

    pub(crate) fn unreadable(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::UnreadableCandidate {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

fn format_path(path: &[Uuid]) -> String {
    path.iter()
        .map(Uuid::to_string)
        .collect::<Vec<_>>()
        .join(" -> ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_message_lists_path() {
        let a = Uuid::from_u128(1);
        let b = Uuid::from_u128(2);
        let err = RegistryError::DependencyCycle {
            path: vec![a, b, a],
        };
        let message = err.to_string();
        assert!(message.contains(&format!("{a} -> {b} -> {a}")));
        assert!(err.is_resolution_failure());
    }

    #[test]
    fn test_registration_errors_are_not_resolution_failures() {
        let err = RegistryError::unreadable("/tmp/libfoo.so", "no symbol");
        assert!(!err.is_resolution_failure());
        assert!(err.to_string().contains("libfoo.so"));

        let err = RegistryError::Callback {
            name: "ImgPng".to_string(),
            source: anyhow::anyhow!("boom"),
        };
        assert!(!err.is_resolution_failure());
        assert!(err.to_string().contains("ImgPng"));
    }
}
