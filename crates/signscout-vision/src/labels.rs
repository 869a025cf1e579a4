use std::path::Path;

use tracing::info;

use crate::error::{Result, VisionError};

/// Class names indexed by the recognition model's output position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelTable {
    names: Vec<String>,
}

impl LabelTable {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| VisionError::Labels(format!("read {}: {}", path.display(), e)))?;
        let table = Self::parse(&text)?;
        info!("vision: loaded {} labels from {}", table.len(), path.display());
        Ok(table)
    }

    /// One name per line. A single trailing blank line is ignored; any other
    /// line, blank or not, is a class.
    pub fn parse(text: &str) -> Result<Self> {
        let mut names: Vec<String> = text
            .split('\n')
            .map(|l| l.strip_suffix('\r').unwrap_or(l).to_string())
            .collect();
        if names.last().is_some_and(|l| l.is_empty()) {
            names.pop();
        }
        if names.is_empty() {
            return Err(VisionError::Labels("no labels".into()));
        }
        Ok(Self { names })
    }

    pub fn from_names(names: Vec<String>) -> Result<Self> {
        if names.is_empty() {
            return Err(VisionError::Labels("no labels".into()));
        }
        Ok(Self { names })
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.names.get(index).map(String::as_str)
    }

    /// Name for display, falling back to `class <i>` for indices the table
    /// does not cover.
    pub fn display_name(&self, index: usize) -> String {
        match self.get(index) {
            Some(name) => name.to_string(),
            None => format!("class {}", index),
        }
    }
}
