use camino::Utf8PathBuf;
use std::fmt;

/// Default priority for work the user is waiting on (a file was just dropped).
pub const PRIORITY_INTERACTIVE: i32 = 1;

/// Default priority for follow-up work such as text extraction for company detection.
pub const PRIORITY_BACKGROUND: i32 = 5;

/// Category of processing work carried by a [`Task`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    /// Document conversion (Word/Excel to PDF)
    Conversion,
    /// Text extraction from a document
    Extraction,
    /// Renaming and filing into a destination folder
    Organization,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::Conversion => "file_conversion",
            TaskKind::Extraction => "text_extraction",
            TaskKind::Organization => "file_organization",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Value produced by a successful task body
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutput {
    /// A file written by the task (converted PDF, filed copy)
    Path(Utf8PathBuf),
    /// Extracted text
    Text(String),
    /// The task had nothing to report
    Empty,
}

impl fmt::Display for TaskOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskOutput::Path(path) => write!(f, "{}", path),
            TaskOutput::Text(text) => write!(f, "{} characters of text", text.chars().count()),
            TaskOutput::Empty => f.write_str("no output"),
        }
    }
}

/// Zero-argument unit of work run on the worker pool
pub type TaskBody = Box<dyn FnOnce() -> anyhow::Result<TaskOutput> + Send + 'static>;

/// Invoked on the dispatcher thread with the result of a successful body
pub type TaskCallback = Box<dyn FnOnce(&TaskOutput) + Send + 'static>;

/// A unit of background work.
///
/// Built once and handed to the processor; nothing about it changes after enqueue.
///
/// ```ignore
/// let task = Task::new(TaskKind::Conversion, move || convert(&path))
///     .with_priority(PRIORITY_INTERACTIVE)
///     .with_target_path(path.clone())
///     .on_complete(|output| println!("done: {}", output));
/// ```
pub struct Task {
    pub kind: TaskKind,
    pub priority: i32,
    pub target_path: Option<Utf8PathBuf>,
    pub(crate) body: TaskBody,
    pub(crate) callback: Option<TaskCallback>,
}

impl Task {
    pub fn new<F>(kind: TaskKind, body: F) -> Self
    where
        F: FnOnce() -> anyhow::Result<TaskOutput> + Send + 'static,
    {
        Self {
            kind,
            priority: PRIORITY_INTERACTIVE,
            target_path: None,
            body: Box::new(body),
            callback: None,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_target_path(mut self, path: impl Into<Utf8PathBuf>) -> Self {
        self.target_path = Some(path.into());
        self
    }

    pub fn on_complete<F>(mut self, callback: F) -> Self
    where
        F: FnOnce(&TaskOutput) + Send + 'static,
    {
        self.callback = Some(Box::new(callback));
        self
    }

    pub fn has_callback(&self) -> bool {
        self.callback.is_some()
    }

    /// Split the task into its body and callback, leaving the metadata behind
    pub(crate) fn into_parts(self) -> (TaskBody, Option<TaskCallback>) {
        (self.body, self.callback)
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("kind", &self.kind)
            .field("priority", &self.priority)
            .field("target_path", &self.target_path)
            .field("has_callback", &self.callback.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_defaults() {
        let task = Task::new(TaskKind::Extraction, || Ok(TaskOutput::Empty));
        assert_eq!(task.priority, PRIORITY_INTERACTIVE);
        assert!(task.target_path.is_none());
        assert!(!task.has_callback());
    }

    #[test]
    fn test_task_builder() {
        let task = Task::new(TaskKind::Conversion, || Ok(TaskOutput::Empty))
            .with_priority(7)
            .with_target_path("C:/Inbox/quote.docx")
            .on_complete(|_| {});

        assert_eq!(task.priority, 7);
        assert_eq!(task.target_path.as_deref().map(|p| p.as_str()), Some("C:/Inbox/quote.docx"));
        assert!(task.has_callback());
    }

    #[test]
    fn test_task_kind_names() {
        assert_eq!(TaskKind::Conversion.to_string(), "file_conversion");
        assert_eq!(TaskKind::Extraction.to_string(), "text_extraction");
        assert_eq!(TaskKind::Organization.to_string(), "file_organization");
    }

    #[test]
    fn test_output_display() {
        assert_eq!(TaskOutput::Path("out/a.pdf".into()).to_string(), "out/a.pdf");
        assert_eq!(TaskOutput::Text("héllo".into()).to_string(), "5 characters of text");
        assert_eq!(TaskOutput::Empty.to_string(), "no output");
    }
}
