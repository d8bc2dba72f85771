//! Error handling for frameport
//!
//! This module defines the crate error type and a Result alias used
//! throughout the library. Only [`FrameportError::Graph`] (at build time)
//! is fatal to a pipeline; every other kind is isolated to the event or
//! call that produced it.

use thiserror::Error;

/// Main error type for frameport operations
#[derive(Error, Debug)]
pub enum FrameportError {
    /// The pipeline description could not be instantiated
    #[error("Graph error: {0}")]
    Graph(String),

    /// A requested state transition could not be reached
    #[error("State transition error: {0}")]
    StateTransition(String),

    /// A negotiated format description could not be parsed
    #[error("Format parse error: {0}")]
    FormatParse(String),

    /// A user callback returned an error or panicked
    #[error("Callback error on '{element}': {message}")]
    Callback { element: String, message: String },

    /// A frame does not fit into the frame slot
    #[error("Slot overflow: frame of {needed} bytes exceeds capacity of {capacity} bytes")]
    SlotOverflow { needed: usize, capacity: usize },

    /// No element with the given name exists in the pipeline
    #[error("Element not found: {0}")]
    ElementNotFound(String),

    /// The element exists but has no pad with the given name
    #[error("Pad '{pad}' not found on element '{element}'")]
    PadNotFound { element: String, pad: String },

    /// Sink callbacks can only be attached to app sinks
    #[error("Element '{0}' is not an appsink")]
    NotAnAppSink(String),

    /// Unknown property or a value of the wrong kind
    #[error("Property error: {0}")]
    Property(String),

    /// An operation needs a built pipeline
    #[error("No pipeline has been built")]
    NoPipeline,

    /// Errors related to configuration loading/saving
    #[error("Configuration error: {0}")]
    Config(String),

    /// Errors related to channel communication
    #[error("Channel error: {0}")]
    Channel(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<FrameportError>,
    },
}

impl FrameportError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        FrameportError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Build a callback error from whatever a user callback produced
    pub fn callback(element: impl Into<String>, message: impl Into<String>) -> Self {
        FrameportError::Callback {
            element: element.into(),
            message: message.into(),
        }
    }

    /// The innermost error, skipping any context wrappers
    pub fn root(&self) -> &FrameportError {
        match self {
            FrameportError::WithContext { source, .. } => source.root(),
            other => other,
        }
    }
}

/// Result type alias for frameport operations
pub type Result<T> = std::result::Result<T, FrameportError>;

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context lazily to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.with_context(f()))
    }
}
