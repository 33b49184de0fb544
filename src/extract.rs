use std::panic;

use tracing::debug;

use crate::error::{IngestError, IngestResult};

/// Plain text recovered from a checklist document.
#[derive(Debug, Clone)]
pub struct DecodedText {
    pub text: String,
    pub page_count: Option<usize>,
}

/// Turns a binary document into text. Decoding is never retried.
pub trait TextDecoder {
    fn decode(&self, filename: &str, bytes: &[u8]) -> IngestResult<DecodedText>;
}

pub struct PdfDecoder;

impl TextDecoder for PdfDecoder {
    fn decode(&self, filename: &str, bytes: &[u8]) -> IngestResult<DecodedText> {
        let failed = |reason: String| IngestError::ExtractionFailed {
            filename: filename.to_string(),
            reason,
        };
        // pdf-extract panics on some malformed documents (missing fonts, bad xrefs).
        let text = panic::catch_unwind(|| pdf_extract::extract_text_from_mem(bytes))
            .map_err(|payload| failed(panic_message(payload)))?
            .map_err(|e| failed(e.to_string()))?;
        // Page count is best-effort metadata; text is what matters.
        let page_count = lopdf::Document::load_mem(bytes)
            .map(|doc| doc.get_pages().len())
            .ok();
        debug!(
            "Decoded {}: {} chars, {:?} pages",
            filename,
            text.len(),
            page_count
        );
        Ok(DecodedText { text, page_count })
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    let detail = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown cause".into());
    format!("decoder panicked: {}", detail)
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::content::{Content, Operation};
    use lopdf::{dictionary, Document, Object, Stream};

    /// One page whose text uses font `/F9`, with no fonts in its resources.
    fn pdf_with_undefined_font() -> Vec<u8> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let content = Content {
            operations: vec![
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F9".into(), 12.into()]),
                Operation::new("Td", vec![100.into(), 600.into()]),
                Operation::new("Tj", vec![Object::string_literal("1 Mike Trout")]),
                Operation::new("ET", vec![]),
            ],
        };
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "Resources" => dictionary! {},
            "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
        });
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => vec![page_id.into()],
                "Count" => 1,
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let mut bytes = Vec::new();
        doc.save_to(&mut bytes).unwrap();
        bytes
    }

    #[test]
    fn garbage_is_an_extraction_failure() {
        let err = PdfDecoder
            .decode("broken.pdf", b"this is not a pdf at all")
            .unwrap_err();
        match err {
            IngestError::ExtractionFailed { filename, .. } => assert_eq!(filename, "broken.pdf"),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn decoder_panic_becomes_extraction_failure() {
        let bytes = pdf_with_undefined_font();
        let err = PdfDecoder.decode("no-fonts.pdf", &bytes).unwrap_err();
        match err {
            IngestError::ExtractionFailed { filename, .. } => assert_eq!(filename, "no-fonts.pdf"),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn panic_payloads_are_readable() {
        let msg = panic_message(Box::new("missing font F9"));
        assert_eq!(msg, "decoder panicked: missing font F9");
        let msg = panic_message(Box::new(String::from("bad xref")));
        assert!(msg.ends_with("bad xref"));
    }
}
