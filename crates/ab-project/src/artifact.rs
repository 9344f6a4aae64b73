//! The error artifact: `<root>/_log_/error.html`.
//!
//! The artifact directory exists exactly when the most recent build of the
//! project failed. It is created with the rendered error page on failure and
//! removed as a whole on the next success.

use std::sync::Arc;

use ab_core::{BuildStrategy, ProjectLayout};
use camino::{Utf8Path, Utf8PathBuf};

use crate::error::BuildError;
use crate::template::{ErrorPageContext, Templates};

/// Writes and clears one project's error artifact.
#[derive(Debug, Clone)]
pub struct ErrorArtifact {
    name: String,
    strategy: BuildStrategy,
    sentinel: String,
    dir: Utf8PathBuf,
    file: Utf8PathBuf,
    templates: Arc<Templates>,
}

impl ErrorArtifact {
    /// Creates the artifact writer for a project.
    #[must_use]
    pub fn new(
        name: &str,
        strategy: BuildStrategy,
        layout: &ProjectLayout,
        sentinel: &str,
        templates: Arc<Templates>,
    ) -> Self {
        Self {
            name: name.to_owned(),
            strategy,
            sentinel: sentinel.to_owned(),
            dir: layout.error_dir.clone(),
            file: layout.error_file.clone(),
            templates,
        }
    }

    /// Returns the rendered error document path.
    #[must_use]
    pub fn path(&self) -> &Utf8Path {
        &self.file
    }

    /// Returns `true` if the last recorded build failed.
    #[must_use]
    pub fn exists(&self) -> bool {
        self.dir.is_dir()
    }

    /// Renders `raw` build output into the artifact.
    ///
    /// Every occurrence of the success sentinel is removed first. Returns the
    /// written document path.
    ///
    /// # Errors
    ///
    /// Returns [`BuildError::Render`] if the page does not render and
    /// [`BuildError::Artifact`] if it cannot be written.
    pub fn record(&self, raw: &str, reason: &str) -> Result<Utf8PathBuf, BuildError> {
        let output = strip_sentinel(raw, &self.sentinel);
        let page = self.templates.render_error_page(&ErrorPageContext {
            name: &self.name,
            strategy: self.strategy.label(),
            reason,
            output: &output,
        })?;

        std::fs::create_dir_all(&self.dir).map_err(|source| BuildError::Artifact {
            path: self.dir.clone(),
            source,
        })?;
        std::fs::write(&self.file, page).map_err(|source| BuildError::Artifact {
            path: self.file.clone(),
            source,
        })?;

        tracing::debug!(project = %self.name, path = %self.file, "Error artifact written");
        Ok(self.file.clone())
    }

    /// Removes the artifact directory, if present.
    ///
    /// # Errors
    ///
    /// Returns [`BuildError::Artifact`] if the directory cannot be removed.
    pub fn clear(&self) -> Result<(), BuildError> {
        match std::fs::remove_dir_all(&self.dir) {
            Ok(()) => {
                tracing::debug!(project = %self.name, "Error artifact cleared");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(BuildError::Artifact {
                path: self.dir.clone(),
                source,
            }),
        }
    }
}

/// Removes every occurrence of `sentinel` from `raw` and trims the result.
#[must_use]
pub fn strip_sentinel(raw: &str, sentinel: &str) -> String {
    if sentinel.is_empty() {
        return raw.trim().to_owned();
    }
    raw.replace(sentinel, "").trim().to_owned()
}
