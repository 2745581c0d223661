//! Page counting and page-range slicing for PDF bytes.
//!
//! Both operations fail soft: a document lopdf cannot parse counts as one page,
//! and a slice that cannot be built returns the original bytes. The pipeline then
//! extracts from the whole document instead of aborting the job.

use anyhow::{Context, Result};
use lopdf::Document;

/// Number of pages in a PDF, or 1 when the bytes cannot be parsed.
pub fn count_pages(pdf_bytes: &[u8]) -> u32 {
    match Document::load_mem(pdf_bytes) {
        Ok(doc) => (doc.get_pages().len() as u32).max(1),
        Err(e) => {
            tracing::warn!("Failed to parse PDF for page count, assuming 1 page: {}", e);
            1
        }
    }
}

/// Build a standalone PDF holding pages `start_page..=end_page` (1-indexed).
///
/// The range is clamped into `[1, total_pages]`. On any failure the original
/// bytes are returned unchanged.
pub fn extract_range(pdf_bytes: &[u8], start_page: u32, end_page: u32) -> Vec<u8> {
    match try_extract_range(pdf_bytes, start_page, end_page) {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!(
                start_page,
                end_page,
                "Page range extraction failed, using whole document: {:#}",
                e
            );
            pdf_bytes.to_vec()
        }
    }
}

fn try_extract_range(pdf_bytes: &[u8], start_page: u32, end_page: u32) -> Result<Vec<u8>> {
    let mut doc = Document::load_mem(pdf_bytes).context("Failed to parse PDF")?;

    let pages = doc.get_pages();
    let total = pages.len() as u32;
    if total == 0 {
        anyhow::bail!("PDF has no pages");
    }

    let start = start_page.clamp(1, total);
    let end = end_page.clamp(start, total);

    let to_delete: Vec<u32> = pages
        .keys()
        .copied()
        .filter(|n| *n < start || *n > end)
        .collect();

    if !to_delete.is_empty() {
        doc.delete_pages(&to_delete);
        doc.prune_objects();
    }

    let kept = doc.get_pages().len() as u32;
    if kept != end - start + 1 {
        anyhow::bail!(
            "expected {} pages after slicing, found {}",
            end - start + 1,
            kept
        );
    }

    let mut buffer = Vec::new();
    doc.save_to(&mut buffer)
        .context("Failed to serialize sliced PDF")?;

    tracing::debug!(
        start,
        end,
        total,
        bytes = buffer.len(),
        "Extracted page range"
    );

    Ok(buffer)
}

/// Re-serialize a PDF without its encryption dictionary.
///
/// Owner-password restrictions (no copy, no extract) block page slicing in some
/// readers. Documents that open with an empty user password are decrypted and
/// written back in the clear.
pub fn strip_restrictions(pdf_bytes: &[u8]) -> Result<Vec<u8>> {
    let mut doc = Document::load_mem(pdf_bytes).context("Failed to parse PDF")?;

    if doc.is_encrypted() {
        // lopdf may already have decrypted on load; only the dictionary remains.
        if let Err(e) = doc.decrypt("") {
            tracing::debug!("Empty-password decrypt skipped: {}", e);
        }
    }
    doc.trailer.remove(b"Encrypt");

    let mut buffer = Vec::new();
    doc.save_to(&mut buffer)
        .context("Failed to re-serialize PDF")?;
    Ok(buffer)
}
