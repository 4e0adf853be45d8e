// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration template rendering.
//!
//! Templates live under a base directory and are addressed by relative path
//! (`gcp/node.tf.j2`). Rendering is strict: a variable missing from the data
//! fails the render instead of producing an empty string.

use std::path::{Path, PathBuf};

use minijinja::{Environment, UndefinedBehavior};
use serde::Serialize;
use tracing::debug;

use crate::error::TemplateError;

/// Renders templates from a base directory.
#[derive(Debug, Clone)]
pub struct TemplateRenderer {
    base_dir: PathBuf,
}

impl TemplateRenderer {
    /// Create a renderer rooted at `base_dir`.
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Template base directory.
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Render the template at `template` (relative to the base directory).
    pub fn render<S: Serialize>(&self, template: &str, data: &S) -> Result<String, TemplateError> {
        let path = self.base_dir.join(template);
        if !path.is_file() {
            return Err(TemplateError::NotFound(path));
        }
        let source = std::fs::read_to_string(&path)?;

        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        // Generated files keep their trailing newline.
        env.set_keep_trailing_newline(true);
        env.add_template(template, &source)
            .map_err(|source| TemplateError::Render {
                template: template.to_string(),
                source,
            })?;
        let rendered = env
            .get_template(template)
            .and_then(|tmpl| tmpl.render(data))
            .map_err(|source| TemplateError::Render {
                template: template.to_string(),
                source,
            })?;

        debug!(template = template, bytes = rendered.len(), "Rendered template");
        Ok(rendered)
    }

    /// Render `template` and write the result to `output`, creating parent directories.
    pub fn render_to_file<S: Serialize>(
        &self,
        template: &str,
        data: &S,
        output: &Path,
    ) -> Result<(), TemplateError> {
        let rendered = self.render(template, data)?;
        if let Some(parent) = output.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(output, rendered)?;
        Ok(())
    }
}
