//! Corpus directory loading

use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::types::Document;

use super::parser::{FileInfo, ParserRegistry};

/// Loads every supported file in a corpus directory into documents
#[derive(Debug, Clone)]
pub struct DocumentLoader {
    registry: ParserRegistry,
}

impl Default for DocumentLoader {
    fn default() -> Self {
        Self::new(ParserRegistry::with_defaults())
    }
}

impl DocumentLoader {
    /// Create a loader with a custom parser registry
    pub fn new(registry: ParserRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &ParserRegistry {
        &self.registry
    }

    /// Load documents from the top level of `dir`.
    ///
    /// Files are visited in file-name order. Unsupported extensions are
    /// skipped, files that fail to parse are logged and skipped, and blank
    /// documents are dropped.
    pub fn load_directory(&self, dir: &Path) -> Result<Vec<Document>> {
        if !dir.is_dir() {
            return Err(Error::Config(format!(
                "The provided path '{}' is not a valid directory",
                dir.display()
            )));
        }

        let paths: Vec<PathBuf> = walkdir::WalkDir::new(dir)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    tracing::warn!("Could not read directory entry in {}: {}", dir.display(), e);
                    None
                }
            })
            .filter(|entry| entry.file_type().is_file())
            .map(walkdir::DirEntry::into_path)
            .collect();

        let mut documents = Vec::new();
        for path in &paths {
            match self.load_file(path) {
                Ok(docs) => {
                    tracing::info!("Loaded {} ({} documents)", path.display(), docs.len());
                    documents.extend(docs);
                }
                Err(Error::UnsupportedFileType(_)) => {
                    tracing::debug!("Skipping unsupported file {}", path.display());
                }
                Err(e) => {
                    tracing::warn!("Error loading {}: {}", path.display(), e);
                }
            }
        }

        if documents.is_empty() {
            return Err(Error::EmptyCorpus(dir.display().to_string()));
        }

        tracing::info!(
            "Loaded {} documents from {} files in {}",
            documents.len(),
            paths.len(),
            dir.display()
        );
        Ok(documents)
    }

    /// Load one file. Fails with `Error::UnsupportedFileType` when no parser
    /// is registered for its extension.
    pub fn load_file(&self, path: &Path) -> Result<Vec<Document>> {
        let Some(parser) = self.registry.parser_for(path) else {
            let ext = path
                .extension()
                .map(|e| e.to_string_lossy().into_owned())
                .unwrap_or_default();
            return Err(Error::UnsupportedFileType(ext));
        };

        let info = FileInfo::from_path(path, parser.file_type())?;
        let documents: Vec<Document> = parser
            .load(&info.path, &info)?
            .into_iter()
            .filter(|doc| !doc.text.trim().is_empty())
            .collect();

        if documents.is_empty() {
            return Err(Error::file_parse(&info.filename, "no text content could be extracted"));
        }
        Ok(documents)
    }
}
