use anyhow::{Context, Result, bail};
use camino::{Utf8Path, Utf8PathBuf};
use regex::Regex;
use std::collections::BTreeSet;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read};
use std::sync::{Mutex, PoisonError};

/// Longest file name produced by [`FilingService::sanitize_filename`]
pub const MAX_FILENAME_LEN: usize = 255;

/// Name used when sanitizing leaves nothing
pub const FALLBACK_FILENAME: &str = "unnamed_file";

/// Serializes unique-name selection across every worker in the process
static FILENAME_LOCK: Mutex<()> = Mutex::new(());

/// File type recognized from its leading bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectedFileType {
    Pdf,
    /// Zip container, most likely an Office Open XML document
    Docx,
}

/// Naming and copying of files into the destination folder
///
/// # Fields
///
/// - `invalid_chars`: anything outside letters, digits, space and `-_.()`
/// - `whitespace`: runs of whitespace collapsed to one space
/// - `company_label`: `Company:` followed by a name on the same line
#[derive(Debug, Clone)]
pub struct FilingService {
    invalid_chars: Regex,
    whitespace: Regex,
    company_label: Regex,
}

impl FilingService {
    pub fn new() -> Self {
        Self {
            invalid_chars: Regex::new(r"[^A-Za-z0-9\-_.() ]").expect("Invalid filename regex"),
            whitespace: Regex::new(r"\s+").expect("Invalid whitespace regex"),
            company_label: Regex::new(r"Company:(.*)").expect("Invalid company regex"),
        }
    }

    /// Strip characters that are unsafe in file names
    pub fn sanitize_filename(&self, name: &str) -> String {
        let kept = self.invalid_chars.replace_all(name, "");
        let collapsed = self.whitespace.replace_all(&kept, " ");
        let truncated: String = collapsed.trim().chars().take(MAX_FILENAME_LEN).collect();
        let trimmed = truncated.trim();

        if trimmed.is_empty() {
            FALLBACK_FILENAME.to_string()
        } else {
            trimmed.to_string()
        }
    }

    /// `"<portion> - <basename>"`, or the basename alone without a portion
    pub fn generate_new_filename(&self, original: &Utf8Path, portion: Option<&str>) -> String {
        let base_name = original.file_name().unwrap_or(original.as_str());
        match portion.map(str::trim).filter(|p| !p.is_empty()) {
            Some(portion) => format!("{} - {}", portion, base_name),
            None => base_name.to_string(),
        }
    }

    /// `"<portion> - <company><ext>"` when both are given
    pub fn filename_with_company(
        &self,
        original: &Utf8Path,
        portion: Option<&str>,
        company: Option<&str>,
    ) -> String {
        let portion = portion.map(str::trim).filter(|p| !p.is_empty());
        let company = company.map(str::trim).filter(|c| !c.is_empty());

        match (portion, company) {
            (Some(portion), Some(company)) => {
                let ext = original
                    .extension()
                    .map(|ext| format!(".{}", ext))
                    .unwrap_or_default();
                format!("{} - {}{}", portion, company, ext)
            }
            _ => self.generate_new_filename(original, portion),
        }
    }

    /// Pick a unique path and create it empty, so no other worker can pick it too.
    ///
    /// Tries `name`, then `stem_1.ext`, `stem_2.ext`, ...
    pub fn claim_unique_path(&self, dir: &Utf8Path, name: &str) -> Result<Utf8PathBuf> {
        let _lock = FILENAME_LOCK.lock().unwrap_or_else(PoisonError::into_inner);

        loop {
            let candidate = next_free_path(dir, name);
            match OpenOptions::new().write(true).create_new(true).open(&candidate) {
                Ok(_) => return Ok(candidate),
                // Created by another process in between
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(e) => {
                    return Err(e).with_context(|| format!("Failed to create {}", candidate));
                }
            }
        }
    }

    /// Copy `source` into `dir` under a unique version of `new_name`.
    ///
    /// # Returns
    /// The path the file was saved to
    pub fn save_file(&self, source: &Utf8Path, dir: &Utf8Path, new_name: &str) -> Result<Utf8PathBuf> {
        if !source.exists() {
            bail!("Source file does not exist: {}", source);
        }
        // Only the final component of the requested name is used
        let new_name = Utf8Path::new(new_name).file_name().unwrap_or(FALLBACK_FILENAME);

        fs::create_dir_all(dir).with_context(|| format!("Failed to create directory: {}", dir))?;
        let save_path = self.claim_unique_path(dir, new_name)?;

        if let Err(e) = fs::copy(source, &save_path) {
            let _ = fs::remove_file(&save_path);
            return Err(e).with_context(|| format!("Failed to copy {} to {}", source, save_path));
        }

        tracing::info!("File saved successfully: {}", save_path);
        Ok(save_path)
    }

    /// Recognize PDF and zip-based documents by their magic bytes
    pub fn determine_file_type(&self, path: &Utf8Path) -> Result<Option<DetectedFileType>> {
        let mut header = [0u8; 8];
        let mut file = File::open(path).with_context(|| format!("Failed to open {}", path))?;
        let read = file
            .read(&mut header)
            .with_context(|| format!("Failed to read {}", path))?;
        let header = &header[..read];

        if header.starts_with(b"%PDF") {
            Ok(Some(DetectedFileType::Pdf))
        } else if header.starts_with(b"PK\x03\x04") {
            Ok(Some(DetectedFileType::Docx))
        } else {
            tracing::warn!("Unable to determine file type for {}", path);
            Ok(None)
        }
    }

    /// First known company name that appears in `text` (case-insensitive)
    pub fn detect_company_name<'a>(&self, text: &str, known: &'a [String]) -> Option<&'a str> {
        let text = text.to_lowercase();
        known
            .iter()
            .map(String::as_str)
            .filter(|name| !name.trim().is_empty())
            .find(|name| text.contains(&name.to_lowercase()))
    }

    /// Names written after a `Company:` label anywhere in `text`
    pub fn detect_new_company_names(&self, text: &str) -> BTreeSet<String> {
        text.lines()
            .filter_map(|line| self.company_label.captures(line))
            .filter_map(|caps| caps.get(1))
            .map(|m| m.as_str().trim().to_string())
            .filter(|name| !name.is_empty())
            .collect()
    }
}

impl Default for FilingService {
    fn default() -> Self {
        Self::new()
    }
}

fn next_free_path(dir: &Utf8Path, name: &str) -> Utf8PathBuf {
    let candidate = dir.join(name);
    if !candidate.exists() {
        return candidate;
    }

    let as_path = Utf8Path::new(name);
    let stem = as_path.file_stem().unwrap_or(name);
    let ext = as_path
        .extension()
        .map(|ext| format!(".{}", ext))
        .unwrap_or_default();

    (1..)
        .map(|counter| dir.join(format!("{}_{}{}", stem, counter, ext)))
        .find(|candidate| !candidate.exists())
        .unwrap_or(candidate)
}
