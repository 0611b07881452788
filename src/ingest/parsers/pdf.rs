use std::path::Path;

use super::ParseError;

/// Extract text from a PDF. CPU-heavy on large files - the intake runs this
/// inside `spawn_blocking`.
pub fn parse_pdf(path: &Path) -> Result<String, ParseError> {
    match pdf_extract::extract_text(path) {
        Ok(text) => Ok(text),
        Err(e) => {
            tracing::error!("pdf parse error at {}: {}", path.display(), e);
            Err(ParseError::Pdf(e.to_string()))
        }
    }
}
