//! Content extraction for uploaded attachments.
//!
//! Turns attachment bytes into plain text, or fails with a typed error.
//! There is no OCR and no layout reconstruction:
//!
//! | Extensions | Strategy |
//! |------------|----------|
//! | `txt`, `py`, `cpp`, `cc`, `csv` | UTF-8 decode, undecodable bytes replaced |
//! | `docx` | paragraphs of `word/document.xml`, one per line |
//! | `pdf` | text of each page in page order, empty pages skipped |
//!
//! PDF page text has its trailing whitespace trimmed, so a page holding only
//! whitespace counts as empty.

use std::io::{Cursor, Read};

use quick_xml::events::Event;
use quick_xml::Reader;
use thiserror::Error;

use crate::types::Attachment;

/// Extensions decoded directly as text.
pub const PLAIN_TEXT_EXTENSIONS: &[&str] = &["txt", "py", "cpp", "cc", "csv"];

/// Errors from content extraction.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExtractError {
    #[error("Unsupported file type: {0}")]
    UnsupportedFormat(String),

    #[error("Could not read file: {0}")]
    ExtractionFailure(String),
}

/// How a supported extension is turned into text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    PlainText,
    WordDocument,
    Pdf,
}

impl DocumentKind {
    /// Classify an extension (case-insensitive, leading dot optional).
    pub fn from_extension(extension: &str) -> Option<Self> {
        let ext = extension.trim_start_matches('.').to_lowercase();

        if PLAIN_TEXT_EXTENSIONS.contains(&ext.as_str()) {
            return Some(DocumentKind::PlainText);
        }

        match ext.as_str() {
            "docx" => Some(DocumentKind::WordDocument),
            "pdf" => Some(DocumentKind::Pdf),
            _ => None,
        }
    }
}

/// Extract the text of an attachment, using its file-name extension.
pub fn extract_attachment(attachment: &Attachment) -> Result<String, ExtractError> {
    extract_text(&attachment.bytes, &attachment.extension())
}

/// Extract plain text from `bytes` according to `extension`.
///
/// Pure function of its inputs: the same bytes and extension always yield
/// the same text.
pub fn extract_text(bytes: &[u8], extension: &str) -> Result<String, ExtractError> {
    let kind = DocumentKind::from_extension(extension)
        .ok_or_else(|| ExtractError::UnsupportedFormat(display_extension(extension)))?;

    tracing::debug!(kind = ?kind, len = bytes.len(), "Extracting attachment text");

    match kind {
        DocumentKind::PlainText => Ok(decode_text(bytes)),
        DocumentKind::WordDocument => extract_docx(bytes),
        DocumentKind::Pdf => extract_pdf(bytes),
    }
}

fn display_extension(extension: &str) -> String {
    let ext = extension.trim_start_matches('.');
    if ext.is_empty() {
        "(no extension)".to_string()
    } else {
        format!(".{}", ext.to_lowercase())
    }
}

fn decode_text(bytes: &[u8]) -> String {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}

fn extract_docx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| ExtractError::ExtractionFailure(format!("not a valid DOCX archive: {}", e)))?;

    let mut xml = String::new();
    archive
        .by_name("word/document.xml")
        .map_err(|e| ExtractError::ExtractionFailure(format!("missing document body: {}", e)))?
        .read_to_string(&mut xml)
        .map_err(|e| ExtractError::ExtractionFailure(e.to_string()))?;

    paragraphs_from_document_xml(&xml).map(|paragraphs| paragraphs.join("\n"))
}

/// Collect the text of every `w:p` paragraph.
///
/// Paragraphs nested in another paragraph (text boxes) are emitted when they
/// close, ahead of the paragraph that contains them.
fn paragraphs_from_document_xml(xml: &str) -> Result<Vec<String>, ExtractError> {
    let mut reader = Reader::from_str(xml);
    let mut paragraphs = Vec::new();
    let mut open: Vec<String> = Vec::new();
    let mut in_text_run = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => match e.name().as_ref() {
                b"w:p" => open.push(String::new()),
                b"w:t" => in_text_run = true,
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.name().as_ref() {
                b"w:p" => paragraphs.push(String::new()),
                b"w:tab" => push_run(&mut open, "\t"),
                b"w:br" | b"w:cr" => push_run(&mut open, "\n"),
                _ => {}
            },
            Ok(Event::Text(t)) if in_text_run => {
                let text = t
                    .unescape()
                    .map_err(|e| ExtractError::ExtractionFailure(e.to_string()))?;
                push_run(&mut open, &text);
            }
            Ok(Event::End(e)) => match e.name().as_ref() {
                b"w:t" => in_text_run = false,
                b"w:p" => {
                    if let Some(paragraph) = open.pop() {
                        paragraphs.push(paragraph);
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                return Err(ExtractError::ExtractionFailure(format!(
                    "malformed document XML at byte {}: {}",
                    reader.buffer_position(),
                    e
                )))
            }
        }
    }

    Ok(paragraphs)
}

fn push_run(open: &mut [String], text: &str) {
    if let Some(p) = open.last_mut() {
        p.push_str(text);
    }
}

fn extract_pdf(bytes: &[u8]) -> Result<String, ExtractError> {
    let document = lopdf::Document::load_mem(bytes)
        .map_err(|e| ExtractError::ExtractionFailure(format!("not a readable PDF: {}", e)))?;

    let pages = document.get_pages().into_keys().map(|number| {
        document.extract_text(&[number]).unwrap_or_else(|e| {
            tracing::debug!(page = number, error = %e, "No extractable text on page");
            String::new()
        })
    });

    Ok(join_pages(pages))
}

/// Join page texts in order, dropping pages without text.
pub fn join_pages<I>(pages: I) -> String
where
    I: IntoIterator<Item = String>,
{
    pages
        .into_iter()
        .map(|page| page.trim_end().to_string())
        .filter(|page| !page.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::io::Write;

    fn docx_with_body(body: &str) -> Vec<u8> {
        let xml = format!(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:body>{}</w:body></w:document>"#,
            body
        );

        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        writer
            .start_file("word/document.xml", zip::write::SimpleFileOptions::default())
            .unwrap();
        writer.write_all(xml.as_bytes()).unwrap();
        writer.finish().unwrap().into_inner()
    }

    #[test]
    fn test_document_kind_classification() {
        assert_eq!(DocumentKind::from_extension("txt"), Some(DocumentKind::PlainText));
        assert_eq!(DocumentKind::from_extension(".CSV"), Some(DocumentKind::PlainText));
        assert_eq!(DocumentKind::from_extension("docx"), Some(DocumentKind::WordDocument));
        assert_eq!(DocumentKind::from_extension(".pdf"), Some(DocumentKind::Pdf));
        assert_eq!(DocumentKind::from_extension("js"), None);
        assert_eq!(DocumentKind::from_extension(""), None);
    }

    #[test]
    fn test_plain_text_replaces_invalid_bytes() {
        let bytes = b"print('hi')\n\xFF\xFEdone";
        let text = extract_text(bytes, "py").unwrap();
        assert!(text.starts_with("print('hi')\n"));
        assert!(text.ends_with("done"));
        assert!(text.contains('\u{FFFD}'));
    }

    #[test]
    fn test_plain_text_strips_bom() {
        let text = extract_text(b"\xEF\xBB\xBFa,b\n1,2", "csv").unwrap();
        assert_eq!(text, "a,b\n1,2");
    }

    #[test]
    fn test_unsupported_extension() {
        let attachment = Attachment::new("data.xyz", b"whatever".to_vec());
        let err = extract_attachment(&attachment).unwrap_err();
        assert_eq!(err, ExtractError::UnsupportedFormat(".xyz".to_string()));
        assert_eq!(err.to_string(), "Unsupported file type: .xyz");
    }

    #[test]
    fn test_missing_extension_is_unsupported() {
        let attachment = Attachment::new("README", b"text".to_vec());
        assert!(matches!(
            extract_attachment(&attachment),
            Err(ExtractError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_docx_paragraphs_in_order() {
        let bytes = docx_with_body(
            "<w:p><w:r><w:t>Photosynthesis</w:t></w:r><w:r><w:t xml:space=\"preserve\"> basics</w:t></w:r></w:p>\
             <w:p/>\
             <w:p><w:r><w:t>Light &amp; dark reactions</w:t></w:r></w:p>",
        );

        let text = extract_text(&bytes, "docx").unwrap();
        assert_eq!(text, "Photosynthesis basics\n\nLight & dark reactions");
    }

    #[test]
    fn test_docx_tabs_and_breaks() {
        let bytes = docx_with_body("<w:p><w:r><w:t>a</w:t><w:tab/><w:t>b</w:t><w:br/><w:t>c</w:t></w:r></w:p>");
        assert_eq!(extract_text(&bytes, "docx").unwrap(), "a\tb\nc");
    }

    #[test]
    fn test_docx_text_box_keeps_outer_paragraph() {
        let bytes = docx_with_body(
            "<w:p><w:r><w:t>Before box. </w:t></w:r>\
             <w:r><w:txbxContent><w:p><w:r><w:t>Boxed note</w:t></w:r></w:p></w:txbxContent></w:r>\
             <w:r><w:t>After box.</w:t></w:r></w:p>",
        );

        let text = extract_text(&bytes, "docx").unwrap();
        assert_eq!(text, "Boxed note\nBefore box. After box.");
    }

    #[test]
    fn test_corrupt_docx_is_extraction_failure() {
        let err = extract_text(b"PK\x03\x04 definitely not a zip", "docx").unwrap_err();
        assert!(matches!(err, ExtractError::ExtractionFailure(_)));
    }

    #[test]
    fn test_docx_without_body_is_extraction_failure() {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        writer
            .start_file("word/styles.xml", zip::write::SimpleFileOptions::default())
            .unwrap();
        writer.write_all(b"<styles/>").unwrap();
        let bytes = writer.finish().unwrap().into_inner();

        let err = extract_text(&bytes, "docx").unwrap_err();
        assert!(err.to_string().contains("missing document body"));
    }

    #[test]
    fn test_corrupt_pdf_is_extraction_failure() {
        let err = extract_text(b"%PDF-1.7 truncated", "pdf").unwrap_err();
        assert!(matches!(err, ExtractError::ExtractionFailure(_)));
    }

    fn pdf_with_pages(pages: &[&str]) -> Vec<u8> {
        use lopdf::content::{Content, Operation};
        use lopdf::{dictionary, Document, Object, Stream};

        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Courier",
            "Encoding" => "WinAnsiEncoding",
        });
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! { "F1" => font_id },
        });

        let mut kids = Vec::new();
        for text in pages {
            let operations = if text.is_empty() {
                Vec::new()
            } else {
                vec![
                    Operation::new("BT", vec![]),
                    Operation::new("Tf", vec!["F1".into(), 12.into()]),
                    Operation::new("Td", vec![72.into(), 720.into()]),
                    Operation::new("Tj", vec![Object::string_literal(*text)]),
                    Operation::new("ET", vec![]),
                ]
            };
            let content = Content { operations }.encode().unwrap();
            let content_id = doc.add_object(Stream::new(dictionary! {}, content));
            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Contents" => content_id,
                "Resources" => resources_id,
                "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
            });
            kids.push(Object::Reference(page_id));
        }

        let count = kids.len() as i64;
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => count,
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
    fn test_pdf_pages_in_order_skipping_empty_page() {
        let bytes = pdf_with_pages(&["Cell biology notes", "", "Mitosis has four phases"]);

        let text = extract_text(&bytes, "pdf").unwrap();
        assert_eq!(text, "Cell biology notes\nMitosis has four phases");
        assert_eq!(extract_text(&bytes, ".PDF").unwrap(), text);
    }

    #[test]
    fn test_join_pages_skips_empty_page() {
        let pages = vec![
            "Chapter one.\n".to_string(),
            String::new(),
            "Chapter three.".to_string(),
        ];
        assert_eq!(join_pages(pages), "Chapter one.\nChapter three.");
    }

    #[test]
    fn test_join_pages_skips_whitespace_only_page() {
        let pages = vec!["a".to_string(), " \n\t".to_string(), "b".to_string()];
        assert_eq!(join_pages(pages), "a\nb");
    }

    proptest! {
        #[test]
        fn prop_plain_text_extraction_is_idempotent(bytes in proptest::collection::vec(any::<u8>(), 0..512)) {
            let first = extract_text(&bytes, "txt").unwrap();
            let second = extract_text(&bytes, "txt").unwrap();
            prop_assert_eq!(first, second);
        }

        #[test]
        fn prop_valid_utf8_round_trips(text in "[^\u{FEFF}]*") {
            prop_assert_eq!(extract_text(text.as_bytes(), "txt").unwrap(), text);
        }
    }
}
