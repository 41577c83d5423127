//! Services module - the document work that task bodies perform.
//!
//! These services are what the background processor actually runs. They block, talk to
//! external engines through [`AutomationManager`](crate::automation::AutomationManager)
//! sessions and stage every intermediate file in the resource ledger.
//!
//! # Components
//!
//! - [`FilingService`]: filename sanitizing and tagging, unique destination names,
//!   copying into the destination folder, magic-byte type detection and company-name
//!   detection
//! - [`ConversionService`]: PDF conversion of Office documents, text extraction from
//!   Office documents and PDFs, plus [`organize`](ConversionService::organize) which ties
//!   naming, detection and conversion together for one dropped file
//!
//! # Usage Example
//!
//! ```ignore
//! use dochandler::services::ConversionService;
//!
//! let service = ConversionService::new(automation.clone());
//! let filed = service.organize(
//!     &dropped,
//!     &dest_dir,
//!     Some("02-4100 - Demolition"),
//!     &company_names,
//!     true, // convert Office documents to PDF
//! )?;
//! if let Some(name) = filed.new_company {
//!     config.add_company_name(&name)?;
//! }
//! ```

pub mod conversion;
pub mod filing;

pub use conversion::{
    ConversionError, ConversionService, FiledDocument, SPREADSHEET_EXTENSIONS, WORD_EXTENSIONS,
    engine_for_extension,
};
pub use filing::{DetectedFileType, FALLBACK_FILENAME, FilingService, MAX_FILENAME_LEN};
