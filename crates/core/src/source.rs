use crate::error::IngestError;
use crate::models::{SkippedDocument, SourceDocument, SourceFormat};
use lopdf::Document as PdfDocument;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;
use walkdir::WalkDir;

pub trait TextExtractor {
    fn extract_text(&self, path: &Path) -> Result<String, IngestError>;
}

#[derive(Debug, Default)]
pub struct LopdfExtractor;

impl TextExtractor for LopdfExtractor {
    fn extract_text(&self, path: &Path) -> Result<String, IngestError> {
        let document =
            PdfDocument::load(path).map_err(|error| IngestError::PdfParse(error.to_string()))?;

        let mut pages = Vec::new();
        for (page_no, _page_id) in document.get_pages() {
            let text = document
                .extract_text(&[page_no])
                .map_err(|error| IngestError::PdfParse(error.to_string()))?;
            if !text.trim().is_empty() {
                pages.push(text);
            }
        }

        if pages.is_empty() {
            return Err(IngestError::PdfParse(format!(
                "pdf had no readable page text: {}",
                path.display()
            )));
        }

        Ok(pages.join("\n\n"))
    }
}

#[derive(Debug, Default)]
pub struct PlainTextExtractor;

impl TextExtractor for PlainTextExtractor {
    fn extract_text(&self, path: &Path) -> Result<String, IngestError> {
        let bytes = fs::read(path)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

pub fn source_format(path: &Path) -> Option<SourceFormat> {
    let extension = path.extension().and_then(|ext| ext.to_str())?;
    if extension.eq_ignore_ascii_case("pdf") {
        Some(SourceFormat::Pdf)
    } else if extension.eq_ignore_ascii_case("txt") {
        Some(SourceFormat::Text)
    } else {
        None
    }
}

pub fn discover_documents(folder: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(folder)
        .into_iter()
        .filter_map(|item| item.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| source_format(entry.path()).is_some())
        .map(|entry| entry.path().to_path_buf())
        .collect();

    files.sort_unstable();
    files
}

pub fn load_document(path: &Path) -> Result<SourceDocument, IngestError> {
    let format = source_format(path)
        .ok_or_else(|| IngestError::UnsupportedFormat(path.display().to_string()))?;
    let id = path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .ok_or_else(|| IngestError::MissingFileName(path.display().to_string()))?
        .to_string();

    let raw_text = match format {
        SourceFormat::Pdf => LopdfExtractor.extract_text(path)?,
        SourceFormat::Text => PlainTextExtractor.extract_text(path)?,
    };

    Ok(SourceDocument {
        id,
        source_path: path.to_string_lossy().to_string(),
        format,
        raw_text,
    })
}

pub struct LoadReport {
    pub documents: Vec<SourceDocument>,
    pub skipped: Vec<SkippedDocument>,
}

pub fn load_folder_best_effort(
    folder: &Path,
    max_documents: Option<usize>,
) -> Result<LoadReport, IngestError> {
    let mut files = discover_documents(folder);

    if files.is_empty() {
        return Err(IngestError::InvalidArgument(format!(
            "no pdf or txt files found in {}",
            folder.display()
        )));
    }
    if let Some(limit) = max_documents {
        files.truncate(limit);
    }

    let mut documents = Vec::new();
    let mut skipped = Vec::new();
    let mut seen_ids = HashSet::new();

    for path in files {
        match load_document(&path) {
            Ok(mut document) => {
                if !seen_ids.insert(document.id.clone()) {
                    document.id = fallback_id(folder, &path, &seen_ids);
                    seen_ids.insert(document.id.clone());
                }
                documents.push(document);
            }
            Err(error) => {
                warn!(path = %path.display(), %error, "skipping unreadable document");
                skipped.push(SkippedDocument {
                    document_id: path
                        .file_stem()
                        .and_then(|stem| stem.to_str())
                        .unwrap_or_default()
                        .to_string(),
                    source_path: path.to_string_lossy().to_string(),
                    reason: error.to_string(),
                });
            }
        }
    }

    Ok(LoadReport { documents, skipped })
}

/// Id for a file whose stem is already taken: its path below `folder`,
/// suffixed with a counter if even that is taken.
fn fallback_id(folder: &Path, path: &Path, taken: &HashSet<String>) -> String {
    let relative = path.strip_prefix(folder).unwrap_or(path);
    let base = relative
        .components()
        .map(|part| part.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/");

    let mut candidate = base.clone();
    let mut counter = 2;
    while taken.contains(&candidate) {
        candidate = format!("{base}~{counter}");
        counter += 1;
    }
    candidate
}
