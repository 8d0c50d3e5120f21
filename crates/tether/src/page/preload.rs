//! Scripts evaluated in every freshly loaded page, before its document.

use std::path::Path;
use std::sync::Arc;

use crate::error::Result;

#[derive(Debug, Clone)]
pub struct PreloadScript {
    name: String,
    source: Arc<str>,
}

impl PreloadScript {
    pub fn inline(name: impl Into<String>, source: impl Into<Arc<str>>) -> Self {
        Self { name: name.into(), source: source.into() }
    }

    /// Reads the script once; later loads reuse the text.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)?;
        Ok(Self::inline(path.display().to_string(), source))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self) -> &str {
        &self.source
    }
}

/// The glue every page runs, in order: the object registry, the headless document, the
/// namespace client and the application helpers.
pub(crate) fn builtins() -> [PreloadScript; 4] {
    [
        PreloadScript::inline("object_registry.js", include_str!("../../js/object_registry.js")),
        PreloadScript::inline("document.js", include_str!("../../js/document.js")),
        PreloadScript::inline("host_scope.js", include_str!("../../js/host_scope.js")),
        PreloadScript::inline("app.js", include_str!("../../js/app.js")),
    ]
}
