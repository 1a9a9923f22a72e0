//! Best-effort text extraction from invoice documents
//!
//! Extraction failure is never fatal: any unsupported type or parser error
//! yields empty text and a warning log, and ingestion continues.

/// Extract raw text from a document, keyed by mimetype.
///
/// PDF extraction runs on the blocking pool; XML and plain text are decoded
/// as UTF-8 (lossy). Everything else extracts to an empty string.
pub async fn extract_text(mime_type: &str, bytes: &[u8]) -> String {
    match mime_type {
        "application/pdf" => extract_pdf_text(bytes).await,
        "text/xml" | "application/xml" | "text/plain" => {
            String::from_utf8_lossy(bytes).into_owned()
        }
        other => {
            tracing::warn!(mime_type = other, "Unsupported document type for text extraction");
            String::new()
        }
    }
}

async fn extract_pdf_text(bytes: &[u8]) -> String {
    let owned = bytes.to_vec();
    let result =
        tokio::task::spawn_blocking(move || pdf_extract::extract_text_from_mem(&owned)).await;

    match result {
        Ok(Ok(text)) => text,
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "PDF text extraction failed");
            String::new()
        }
        Err(e) => {
            tracing::warn!(error = %e, "PDF extraction task panicked");
            String::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn xml_decodes_as_utf8() {
        let xml = br#"<?xml version="1.0"?><Fatura><Total>123.45</Total></Fatura>"#;
        let text = extract_text("text/xml", xml).await;
        assert!(text.contains("<Total>123.45</Total>"));
    }

    #[tokio::test]
    async fn invalid_utf8_is_lossy_not_fatal() {
        let bytes = [0xff, 0xfe, b'o', b'k'];
        let text = extract_text("application/xml", &bytes).await;
        assert!(text.contains("ok"));
    }

    #[tokio::test]
    async fn unknown_type_yields_empty() {
        let text = extract_text("image/png", &[0x89, 0x50, 0x4e, 0x47]).await;
        assert!(text.is_empty());
    }

    #[tokio::test]
    async fn garbage_pdf_yields_empty() {
        let text = extract_text("application/pdf", b"not a real pdf").await;
        assert!(text.is_empty());
    }
}
