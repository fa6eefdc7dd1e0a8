//! kgraph Parser - Document loading and chunking
//!
//! Loads plain text and markdown files into [`Document`]s and splits
//! documents into bounded-size [`Chunk`]s for triplet extraction.

use std::path::Path;

use kgraph_core::Document;
use thiserror::Error;

pub mod chunker;

pub use chunker::{merge_chunks, Chunker};

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur during document loading
#[derive(Error, Debug)]
pub enum ParserError {
    /// File format is not supported
    #[error("Unsupported file format: {0}")]
    UnsupportedFormat(String),

    /// IO error while reading the file
    #[error("IO error reading file: {path}")]
    IoError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// File is not valid UTF-8 text
    #[error("Text encoding error: {0}")]
    EncodingError(String),
}

pub type Result<T> = std::result::Result<T, ParserError>;

// ============================================================================
// File Types
// ============================================================================

/// Supported file types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    Markdown,
    PlainText,
    Unknown,
}

impl FileType {
    /// Detect file type from extension
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_lowercase().as_str() {
            "md" | "markdown" => Self::Markdown,
            "txt" | "text" => Self::PlainText,
            _ => Self::Unknown,
        }
    }

    /// Detect file type from path
    pub fn from_path(path: &Path) -> Self {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(Self::from_extension)
            .unwrap_or(Self::Unknown)
    }
}

impl std::fmt::Display for FileType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Markdown => write!(f, "markdown"),
            Self::PlainText => write!(f, "text"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

// ============================================================================
// Parser Trait
// ============================================================================

/// Trait for document parsers
pub trait DocumentParser: Send + Sync {
    /// Parse a document from a file path
    fn parse(&self, path: &Path) -> Result<Document>;

    /// Get supported file types
    fn supported_types(&self) -> &[FileType];

    /// Check if this parser can handle a file type
    fn can_parse(&self, file_type: FileType) -> bool {
        self.supported_types().contains(&file_type)
    }
}

/// Plain text / markdown parser
pub struct PlainTextParser;

impl DocumentParser for PlainTextParser {
    fn parse(&self, path: &Path) -> Result<Document> {
        let bytes = std::fs::read(path).map_err(|e| ParserError::IoError {
            path: path.display().to_string(),
            source: e,
        })?;

        let content = String::from_utf8(bytes)
            .map_err(|e| ParserError::EncodingError(format!("{}: {e}", path.display())))?;

        tracing::debug!(path = %path.display(), bytes = content.len(), "Loaded document");

        Ok(Document::new(content)
            .with_source(path.display().to_string())
            .with_extra("file_type", FileType::from_path(path).to_string()))
    }

    fn supported_types(&self) -> &[FileType] {
        &[FileType::PlainText, FileType::Markdown]
    }
}

/// Load a document from disk, choosing the parser by extension.
///
/// Files without an extension are read as plain text; any other
/// extension the parser does not handle is rejected before reading.
pub fn load_document(path: &Path) -> Result<Document> {
    let parser = PlainTextParser;

    if let Some(ext) = path.extension() {
        let ext = ext.to_string_lossy();
        if !parser.can_parse(FileType::from_extension(&ext)) {
            return Err(ParserError::UnsupportedFormat(ext.into_owned()));
        }
    }

    parser.parse(path)
}

// ============================================================================
// Tests
// ============================================================================
