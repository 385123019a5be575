use std::path::Path;

use anyhow::{Context, Result};
use tracing::debug;

use crate::base::ExtractError;

/// Reads the text of every page of a PDF, split into lines.
///
/// Whitespace-only lines are dropped: the text extractor emits them between
/// layout blocks, and the trade line merger expects the date line and the
/// trade detail line to be adjacent.
pub(crate) fn page_lines(path: &Path) -> Result<Vec<Vec<String>>> {
    if !path.exists() {
        return Err(ExtractError::MissingFile(path.to_owned()).into());
    }

    let pages = pdf_extract::extract_text_by_pages(path)
        .with_context(|| format!("Failed to read PDF text from {}", path.display()))?;
    debug!("Opened PDF with {} pages", pages.len());

    Ok(pages.iter().map(|page| split_lines(page)).collect())
}

pub(crate) fn split_lines(page: &str) -> Vec<String> {
    page.lines()
        .filter(|line| !line.trim().is_empty())
        .map(str::to_owned)
        .collect()
}
