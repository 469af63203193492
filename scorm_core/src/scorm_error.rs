// SCORM 1.2 error codes as seen by embedded packages.
// Packages read these through LMSGetLastError / LMSGetErrorString / LMSGetDiagnostic.

use std::fmt;

/// Error codes the runtime reports. Numeric values are part of the wire contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScormError {
    NoError,
    GeneralException,
    InvalidArgument,
    NotInitialized,
    InvalidSetValue,
    ReadOnly,
}

impl ScormError {
    pub const ALL: [ScormError; 6] = [
        ScormError::NoError,
        ScormError::GeneralException,
        ScormError::InvalidArgument,
        ScormError::NotInitialized,
        ScormError::InvalidSetValue,
        ScormError::ReadOnly,
    ];

    pub fn code(&self) -> u16 {
        match self {
            ScormError::NoError => 0,
            ScormError::GeneralException => 101,
            ScormError::InvalidArgument => 201,
            ScormError::NotInitialized => 301,
            ScormError::InvalidSetValue => 351,
            ScormError::ReadOnly => 401,
        }
    }

    pub fn from_code(code: u16) -> Option<Self> {
        Self::ALL.into_iter().find(|e| e.code() == code)
    }

    /// Fixed human-readable text for the code.
    pub fn message(&self) -> &'static str {
        match self {
            ScormError::NoError => "No error",
            ScormError::GeneralException => "General exception",
            ScormError::InvalidArgument => "Invalid argument error",
            ScormError::NotInitialized => "Not initialized",
            ScormError::InvalidSetValue => "Invalid set value",
            ScormError::ReadOnly => "Element is read only",
        }
    }
}

impl fmt::Display for ScormError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message(), self.code())
    }
}

/// Text returned for codes outside the table.
pub const UNKNOWN_ERROR: &str = "Unknown error";

/// A code argument as passed by a package (`"301"`, `""`, `" 0 "`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeArgument {
    /// Empty argument: refers to the last error.
    Last,
    Known(ScormError),
    Unknown,
}

impl CodeArgument {
    pub fn parse(arg: &str) -> Self {
        let trimmed = arg.trim();
        if trimmed.is_empty() {
            return CodeArgument::Last;
        }
        trimmed
            .parse::<u16>()
            .ok()
            .and_then(ScormError::from_code)
            .map_or(CodeArgument::Unknown, CodeArgument::Known)
    }
}

/// Last-operation error state held by a runtime object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorState {
    pub error: ScormError,
    pub diagnostic: String,
}

impl Default for ErrorState {
    fn default() -> Self {
        ErrorState {
            error: ScormError::NoError,
            diagnostic: String::new(),
        }
    }
}

impl ErrorState {
    pub fn set(&mut self, error: ScormError, diagnostic: impl Into<String>) {
        self.error = error;
        self.diagnostic = diagnostic.into();
    }

    pub fn clear(&mut self) {
        *self = ErrorState::default();
    }

    /// `GetErrorString(code)`.
    pub fn error_string(&self, code_arg: &str) -> String {
        match CodeArgument::parse(code_arg) {
            CodeArgument::Last => self.error.message().to_string(),
            CodeArgument::Known(error) => error.message().to_string(),
            CodeArgument::Unknown => UNKNOWN_ERROR.to_string(),
        }
    }

    /// `GetDiagnostic(code)`: detail of the last failure when asked about it,
    /// otherwise the table text for the requested code.
    pub fn diagnostic(&self, code_arg: &str) -> String {
        match CodeArgument::parse(code_arg) {
            CodeArgument::Last => self.last_diagnostic(),
            CodeArgument::Known(error) if error == self.error => self.last_diagnostic(),
            CodeArgument::Known(error) => error.message().to_string(),
            CodeArgument::Unknown => UNKNOWN_ERROR.to_string(),
        }
    }

    fn last_diagnostic(&self) -> String {
        if self.diagnostic.is_empty() {
            self.error.message().to_string()
        } else {
            self.diagnostic.clone()
        }
    }
}
