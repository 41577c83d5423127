use super::filing::{DetectedFileType, FilingService};
use crate::automation::{AutomationManager, EngineKind, ExportFormat};
use crate::processor::pool::panic_message;
use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use std::fs;
use std::panic;
use std::sync::Arc;
use thiserror::Error;

/// Extensions exported through a word-processor engine
pub const WORD_EXTENSIONS: &[&str] = &["doc", "docx", "rtf", "odt"];

/// Extensions exported through a spreadsheet engine
pub const SPREADSHEET_EXTENSIONS: &[&str] = &["xls", "xlsx", "ods"];

/// Errors detected before any engine is involved
#[derive(Error, Debug)]
pub enum ConversionError {
    #[error("Input file not found: {0}")]
    MissingInput(Utf8PathBuf),

    #[error("Input file is empty: {0}")]
    EmptyInput(Utf8PathBuf),

    #[error("Unsupported file type: {0}")]
    UnsupportedType(String),

    #[error("Failed to read PDF text from {path}: {reason}")]
    PdfText { path: Utf8PathBuf, reason: String },

    /// Scanned PDFs carry images only
    #[error("PDF has no text layer: {0}")]
    NoTextLayer(Utf8PathBuf),
}

/// Engine that handles a file extension, if any
pub fn engine_for_extension(ext: &str) -> Option<EngineKind> {
    let ext = ext.to_lowercase();
    if WORD_EXTENSIONS.contains(&ext.as_str()) {
        Some(EngineKind::WordProcessor)
    } else if SPREADSHEET_EXTENSIONS.contains(&ext.as_str()) {
        Some(EngineKind::Spreadsheet)
    } else {
        None
    }
}

/// Where [`ConversionService::organize`] put a document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FiledDocument {
    pub path: Utf8PathBuf,
    /// Name taken from a `Company:` label that is not in the known list yet
    pub new_company: Option<String>,
}

enum CompanyMatch {
    Known(String),
    Labelled(String),
}

/// Conversion, text extraction and filing built on automation sessions.
///
/// Every method blocks; they are meant to run inside task bodies on the worker pool.
/// Engine output always goes to a ledger-tracked temp directory first, so an engine
/// that dies halfway never leaves partial files in the destination.
pub struct ConversionService {
    automation: Arc<AutomationManager>,
    filing: FilingService,
    engine_visible: bool,
}

impl ConversionService {
    pub fn new(automation: Arc<AutomationManager>) -> Self {
        Self {
            automation,
            filing: FilingService::new(),
            engine_visible: false,
        }
    }

    /// Show engine windows while they work (debugging aid)
    pub fn with_engine_visible(mut self, visible: bool) -> Self {
        self.engine_visible = visible;
        self
    }

    pub fn filing(&self) -> &FilingService {
        &self.filing
    }

    /// Lowercase extension of `source`; files without one are recognized by content
    fn document_type(&self, source: &Utf8Path) -> String {
        let ext = extension_of(source);
        if !ext.is_empty() {
            return ext;
        }

        match self.filing.determine_file_type(source) {
            Ok(Some(DetectedFileType::Pdf)) => "pdf".to_string(),
            Ok(Some(DetectedFileType::Docx)) => "docx".to_string(),
            Ok(None) => ext,
            Err(e) => {
                tracing::debug!("Could not sniff {}: {:#}", source, e);
                ext
            }
        }
    }

    /// Convert `source` to a PDF named after `new_name` inside `save_dir`.
    ///
    /// PDFs are copied as-is; Office documents are exported by an engine session.
    ///
    /// # Returns
    /// Path of the saved PDF
    pub fn convert_to_pdf(&self, source: &Utf8Path, save_dir: &Utf8Path, new_name: &str) -> Result<Utf8PathBuf> {
        validate_input(source)?;

        let target_name = pdf_name(new_name);
        let ext = self.document_type(source);

        if ext == "pdf" {
            return self.filing.save_file(source, save_dir, &target_name);
        }

        let kind = engine_for_extension(&ext).ok_or_else(|| ConversionError::UnsupportedType(ext.clone()))?;
        tracing::info!("Converting {} to PDF via {}", source, kind);

        let staging = self
            .automation
            .ledger()
            .scoped_temp_directory()
            .context("Failed to create staging directory")?;
        let staged = staging.path().join(&target_name);

        self.automation
            .with_session(kind, self.engine_visible, |session| {
                session.export(source, &staged, ExportFormat::Pdf)
            })
            .with_context(|| format!("Failed to convert {}", source))?;

        fs::create_dir_all(save_dir).with_context(|| format!("Failed to create directory: {}", save_dir))?;
        let final_path = self.filing.claim_unique_path(save_dir, &target_name)?;
        move_file(&staged, &final_path)?;

        tracing::info!("Converted {} to {}", source, final_path);
        Ok(final_path)
    }

    /// Extract plain text from `source`.
    ///
    /// Text files are read directly, PDFs are parsed in-process and word-processor
    /// documents are exported to text by an engine session.
    pub fn extract_text(&self, source: &Utf8Path) -> Result<String> {
        validate_input(source)?;
        let ext = self.document_type(source);

        match ext.as_str() {
            "txt" => return fs::read_to_string(source).with_context(|| format!("Failed to read {}", source)),
            "pdf" => return extract_pdf_text(source),
            _ => {}
        }

        if engine_for_extension(&ext) != Some(EngineKind::WordProcessor) {
            return Err(ConversionError::UnsupportedType(ext).into());
        }

        let staging = self
            .automation
            .ledger()
            .scoped_temp_directory()
            .context("Failed to create staging directory")?;
        let stem = source.file_stem().unwrap_or("extracted");
        let staged = staging.path().join(format!("{}.txt", stem));

        self.automation
            .with_session(EngineKind::WordProcessor, self.engine_visible, |session| {
                session.export(source, &staged, ExportFormat::PlainText)
            })
            .with_context(|| format!("Failed to extract text from {}", source))?;

        let bytes = fs::read(&staged).with_context(|| format!("Failed to read {}", staged))?;
        let text = String::from_utf8_lossy(&bytes).into_owned();
        tracing::debug!("Extracted {} characters from {}", text.len(), source);
        Ok(text)
    }

    /// Rename and file `source` into `dest_dir`.
    ///
    /// With a filename portion, the document text is scanned for a known company name,
    /// falling back to a `Company:` label (best effort). Office documents are converted
    /// to PDF when `convert` is set; everything else is copied as-is.
    pub fn organize(
        &self,
        source: &Utf8Path,
        dest_dir: &Utf8Path,
        portion: Option<&str>,
        companies: &[String],
        convert: bool,
    ) -> Result<FiledDocument> {
        validate_input(source)?;

        let detected = match portion {
            Some(_) => self.detect_company(source, companies),
            None => None,
        };
        let (company, new_company) = match detected {
            Some(CompanyMatch::Known(name)) => (Some(name), None),
            Some(CompanyMatch::Labelled(name)) => (Some(name.clone()), Some(name)),
            None => (None, None),
        };

        let name = self
            .filing
            .filename_with_company(source, portion, company.as_deref());
        let mut name = self.filing.sanitize_filename(&name);

        let ext = self.document_type(source);
        if extension_of(source).is_empty() && !ext.is_empty() {
            name = format!("{}.{}", name, ext);
        }

        let path = if convert && engine_for_extension(&ext).is_some() {
            self.convert_to_pdf(source, dest_dir, &name)?
        } else {
            self.filing.save_file(source, dest_dir, &name)?
        };

        Ok(FiledDocument { path, new_company })
    }

    fn detect_company(&self, source: &Utf8Path, companies: &[String]) -> Option<CompanyMatch> {
        let text = match self.extract_text(source) {
            Ok(text) => text,
            Err(e) => {
                tracing::debug!("Skipping company detection for {}: {:#}", source, e);
                return None;
            }
        };

        if let Some(name) = self.filing.detect_company_name(&text, companies) {
            tracing::info!("Detected company name {} in {}", name, source);
            return Some(CompanyMatch::Known(name.to_string()));
        }

        match self.filing.detect_new_company_names(&text).into_iter().next() {
            Some(name) => {
                tracing::info!("Found new company name {} in {}", name, source);
                Some(CompanyMatch::Labelled(name))
            }
            None => {
                tracing::debug!("No company name in {}", source);
                None
            }
        }
    }
}

fn validate_input(source: &Utf8Path) -> Result<(), ConversionError> {
    let metadata = fs::metadata(source).map_err(|_| ConversionError::MissingInput(source.to_path_buf()))?;
    if metadata.len() == 0 {
        return Err(ConversionError::EmptyInput(source.to_path_buf()));
    }
    Ok(())
}

/// Text of every page of a PDF, in page order
fn extract_pdf_text(source: &Utf8Path) -> Result<String> {
    let bytes = fs::read(source).with_context(|| format!("Failed to read {}", source))?;

    // The parser panics on some malformed files
    let extracted = panic::catch_unwind(|| pdf_extract::extract_text_from_mem(&bytes));
    let text = match extracted {
        Ok(Ok(text)) => text,
        Ok(Err(e)) => {
            return Err(ConversionError::PdfText {
                path: source.to_path_buf(),
                reason: e.to_string(),
            }
            .into());
        }
        Err(payload) => {
            return Err(ConversionError::PdfText {
                path: source.to_path_buf(),
                reason: format!("parser panicked: {}", panic_message(payload)),
            }
            .into());
        }
    };

    if text.trim().is_empty() {
        return Err(ConversionError::NoTextLayer(source.to_path_buf()).into());
    }
    tracing::debug!("Extracted {} characters from PDF {}", text.len(), source);
    Ok(text)
}

fn extension_of(path: &Utf8Path) -> String {
    path.extension().unwrap_or_default().to_lowercase()
}

/// `new_name` with its extension replaced by `.pdf`
fn pdf_name(new_name: &str) -> String {
    let name = Utf8Path::new(new_name).file_name().unwrap_or(new_name);
    Utf8Path::new(name).with_extension("pdf").into_string()
}

/// Rename, falling back to copy and delete across filesystems
fn move_file(from: &Utf8Path, to: &Utf8Path) -> Result<()> {
    if fs::rename(from, to).is_ok() {
        return Ok(());
    }
    fs::copy(from, to).with_context(|| format!("Failed to copy {} to {}", from, to))?;
    if let Err(e) = fs::remove_file(from) {
        tracing::warn!("Failed to remove staged file {}: {}", from, e);
    }
    Ok(())
}
