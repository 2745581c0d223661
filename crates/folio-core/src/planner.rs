//! Chunk sizing and page windows.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::catalog::{DocumentCatalog, DocumentType};

/// Chunking parameters for one document type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkConfig {
    /// Always at least 1.
    pub pages_per_chunk: u32,
    pub max_output_tokens: u32,
}

impl ChunkConfig {
    pub fn new(pages_per_chunk: u32, max_output_tokens: u32) -> Self {
        Self {
            pages_per_chunk: pages_per_chunk.max(1),
            max_output_tokens: max_output_tokens.max(1),
        }
    }

    /// Number of chunks needed to cover `total_pages`.
    pub fn total_chunks(&self, total_pages: u32) -> u32 {
        total_pages.max(1).div_ceil(self.pages_per_chunk)
    }

    /// Page window starting at `start_page`, clamped into `[1, total_pages]`.
    pub fn window(&self, start_page: u32, total_pages: u32) -> PageWindow {
        let total = total_pages.max(1);
        let start = start_page.clamp(1, total);
        let end = start
            .saturating_add(self.pages_per_chunk - 1)
            .min(total);
        PageWindow { start, end }
    }

    /// True when the chunk starting at `start_page` is the last one.
    pub fn is_last_chunk(&self, start_page: u32, total_pages: u32) -> bool {
        start_page.saturating_add(self.pages_per_chunk) > total_pages
    }
}

/// Inclusive, 1-indexed page range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageWindow {
    pub start: u32,
    pub end: u32,
}

impl PageWindow {
    pub fn len(&self) -> u32 {
        self.end - self.start + 1
    }

    pub fn is_empty(&self) -> bool {
        self.end < self.start
    }

    /// 1-based ordinal of this window's chunk.
    pub fn chunk_number(&self, pages_per_chunk: u32) -> u32 {
        (self.start - 1) / pages_per_chunk.max(1) + 1
    }
}

/// Resolves chunking parameters from the document catalog.
#[derive(Debug, Clone)]
pub struct PagePlanner {
    catalog: Arc<DocumentCatalog>,
}

impl PagePlanner {
    pub fn new(catalog: Arc<DocumentCatalog>) -> Self {
        Self { catalog }
    }

    /// Chunk config for a type; unknown types get the catalog default.
    pub fn resolve(&self, document_type: &DocumentType) -> ChunkConfig {
        let profile = self.catalog.profile(document_type);
        ChunkConfig::new(profile.pages_per_chunk, profile.max_output_tokens)
    }
}
