// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Rendered working directory paired with an engine.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;

use crate::engine::Engine;
use crate::error::TemplateError;
use crate::template::TemplateRenderer;

/// A working directory, the renderer that fills it and the engine that runs in it.
#[derive(Clone)]
pub struct Workspace {
    dir: PathBuf,
    renderer: TemplateRenderer,
    engine: Arc<dyn Engine>,
}

impl Workspace {
    /// Bind a renderer and an engine to `dir`.
    pub fn new(
        dir: impl Into<PathBuf>,
        renderer: TemplateRenderer,
        engine: Arc<dyn Engine>,
    ) -> Self {
        Self {
            dir: dir.into(),
            renderer,
            engine,
        }
    }

    /// Working directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Engine running in this directory.
    pub fn engine(&self) -> &Arc<dyn Engine> {
        &self.engine
    }

    /// Template renderer.
    pub fn renderer(&self) -> &TemplateRenderer {
        &self.renderer
    }

    /// Render `template` into `file_name` inside the working directory.
    pub fn render_template_to_file<S: Serialize>(
        &self,
        template: &str,
        data: &S,
        file_name: &str,
    ) -> Result<PathBuf, TemplateError> {
        let output = self.dir.join(file_name);
        self.renderer.render_to_file(template, data, &output)?;
        Ok(output)
    }

    /// Write raw content into the working directory.
    pub fn write_file(&self, file_name: &str, content: &[u8]) -> std::io::Result<PathBuf> {
        let output = self.dir.join(file_name);
        if let Some(parent) = output.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&output, content)?;
        Ok(output)
    }
}

impl std::fmt::Debug for Workspace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workspace")
            .field("dir", &self.dir)
            .field("renderer", &self.renderer)
            .finish_non_exhaustive()
    }
}
