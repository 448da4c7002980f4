//! Source document text extraction.
//!
//! Plain text and markdown are read as UTF-8; PDF text is extracted with
//! `pdf-extract`. Page breaks (form feeds) become blank lines. Word
//! documents are read from the `word/document.xml` part of the archive,
//! one line per paragraph.

use std::io::{Cursor, Read};
use std::path::Path;

use quick_xml::events::Event;
use quick_xml::Reader;
use thiserror::Error;

/// Supported source document kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Text,
    Markdown,
    Pdf,
    Docx,
}

impl DocumentKind {
    /// Detect the kind from a file extension (case-insensitive)
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_string_lossy().to_lowercase();
        match ext.as_str() {
            "txt" => Some(DocumentKind::Text),
            "md" | "markdown" => Some(DocumentKind::Markdown),
            "pdf" => Some(DocumentKind::Pdf),
            "docx" => Some(DocumentKind::Docx),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("unsupported document type: {0} (expected .txt, .md, .pdf or .docx)")]
    Unsupported(String),

    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{path} is not valid UTF-8 text")]
    Encoding { path: String },

    #[error("failed to extract text from PDF {path}: {message}")]
    Pdf { path: String, message: String },

    #[error("failed to extract text from Word document {path}: {message}")]
    Docx { path: String, message: String },
}

/// Read a source document and return its text, trimmed
pub fn extract_text(path: &Path) -> Result<String, DocumentError> {
    let display = path.display().to_string();
    let kind = DocumentKind::from_path(path).ok_or_else(|| DocumentError::Unsupported(display.clone()))?;

    let data = std::fs::read(path).map_err(|source| DocumentError::Io {
        path: display.clone(),
        source,
    })?;

    extract_from_bytes(kind, &data).map_err(|e| match e {
        DocumentError::Encoding { .. } => DocumentError::Encoding { path: display },
        DocumentError::Pdf { message, .. } => DocumentError::Pdf {
            path: display,
            message,
        },
        DocumentError::Docx { message, .. } => DocumentError::Docx {
            path: display,
            message,
        },
        other => other,
    })
}

/// Extract text from an in-memory document
pub fn extract_from_bytes(kind: DocumentKind, data: &[u8]) -> Result<String, DocumentError> {
    let text = match kind {
        DocumentKind::Text | DocumentKind::Markdown => String::from_utf8(data.to_vec())
            .map_err(|_| DocumentError::Encoding {
                path: "(memory)".into(),
            })?,
        DocumentKind::Pdf => pdf_extract::extract_text_from_mem(data)
            .map_err(|e| DocumentError::Pdf {
                path: "(memory)".into(),
                message: e.to_string(),
            })?
            .replace('\x0C', "\n\n"),
        DocumentKind::Docx => docx_text(data).map_err(|message| DocumentError::Docx {
            path: "(memory)".into(),
            message,
        })?,
    };

    Ok(text.trim().to_string())
}

/// Paragraph text of a .docx archive, joined by newlines
fn docx_text(data: &[u8]) -> Result<String, String> {
    let mut archive = zip::ZipArchive::new(Cursor::new(data)).map_err(|e| e.to_string())?;
    let mut xml = String::new();
    archive
        .by_name("word/document.xml")
        .map_err(|e| e.to_string())?
        .read_to_string(&mut xml)
        .map_err(|e| e.to_string())?;

    let mut reader = Reader::from_str(&xml);
    let mut paragraphs = Vec::new();
    let mut current = String::new();
    let mut in_text = false;

    loop {
        match reader.read_event().map_err(|e| e.to_string())? {
            Event::Start(tag) if tag.name().as_ref() == b"w:t" => in_text = true,
            Event::End(tag) => match tag.name().as_ref() {
                b"w:t" => in_text = false,
                b"w:p" => paragraphs.push(std::mem::take(&mut current)),
                _ => {}
            },
            Event::Empty(tag) => match tag.name().as_ref() {
                b"w:tab" => current.push('\t'),
                b"w:br" | b"w:cr" => current.push('\n'),
                b"w:p" => paragraphs.push(String::new()),
                _ => {}
            },
            Event::Text(text) if in_text => {
                current.push_str(&text.unescape().map_err(|e| e.to_string())?);
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(paragraphs.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_kind_detection() {
        assert_eq!(DocumentKind::from_path(Path::new("a.TXT")), Some(DocumentKind::Text));
        assert_eq!(DocumentKind::from_path(Path::new("notes.md")), Some(DocumentKind::Markdown));
        assert_eq!(DocumentKind::from_path(Path::new("paper.pdf")), Some(DocumentKind::Pdf));
        assert_eq!(DocumentKind::from_path(Path::new("Report.DOCX")), Some(DocumentKind::Docx));
        assert_eq!(DocumentKind::from_path(Path::new("legacy.doc")), None);
        assert_eq!(DocumentKind::from_path(Path::new("README")), None);
    }

    #[test]
    fn test_extract_text_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("notes.md");
        std::fs::write(&path, "\n# Title\n\nBody text\n\n").unwrap();

        assert_eq!(extract_text(&path).unwrap(), "# Title\n\nBody text");
    }

    #[test]
    fn test_extract_rejects_unsupported_and_invalid() {
        let dir = TempDir::new().unwrap();

        let legacy = dir.path().join("doc.doc");
        std::fs::write(&legacy, "x").unwrap();
        assert!(matches!(extract_text(&legacy), Err(DocumentError::Unsupported(_))));

        let binary = dir.path().join("blob.txt");
        std::fs::write(&binary, [0xff, 0xfe, 0x00]).unwrap();
        assert!(matches!(extract_text(&binary), Err(DocumentError::Encoding { .. })));

        let missing = dir.path().join("missing.txt");
        assert!(matches!(extract_text(&missing), Err(DocumentError::Io { .. })));
    }

    #[test]
    fn test_invalid_pdf_is_an_error() {
        assert!(matches!(
            extract_from_bytes(DocumentKind::Pdf, b"not a pdf"),
            Err(DocumentError::Pdf { .. })
        ));
    }

    fn docx_bytes(document_xml: &str) -> Vec<u8> {
        use std::io::Write;

        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let options = zip::write::SimpleFileOptions::default();
        writer.start_file("[Content_Types].xml", options).unwrap();
        writer.write_all(b"<Types/>").unwrap();
        writer.start_file("word/document.xml", options).unwrap();
        writer.write_all(document_xml.as_bytes()).unwrap();
        writer.finish().unwrap().into_inner()
    }

    #[test]
    fn test_extract_docx_paragraphs() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main">
  <w:body>
    <w:p><w:r><w:t>Rust &amp; Tokio</w:t></w:r></w:p>
    <w:p/>
    <w:p><w:r><w:t xml:space="preserve">Futures are </w:t></w:r><w:r><w:t>lazy</w:t></w:r></w:p>
    <w:p><w:r><w:t>a</w:t><w:tab/><w:t>b</w:t></w:r></w:p>
    <w:sectPr/>
  </w:body>
</w:document>"#;

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("notes.docx");
        std::fs::write(&path, docx_bytes(xml)).unwrap();

        assert_eq!(
            extract_text(&path).unwrap(),
            "Rust & Tokio\n\nFutures are lazy\na\tb"
        );
    }

    #[test]
    fn test_docx_without_document_part_is_an_error() {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        writer
            .start_file("other.xml", zip::write::SimpleFileOptions::default())
            .unwrap();
        let bytes = writer.finish().unwrap().into_inner();

        assert!(matches!(
            extract_from_bytes(DocumentKind::Docx, &bytes),
            Err(DocumentError::Docx { .. })
        ));
        assert!(matches!(
            extract_from_bytes(DocumentKind::Docx, b"not a zip"),
            Err(DocumentError::Docx { .. })
        ));
    }
}
