//! Error kinds recovered at the sandbox boundary.

use std::fmt;
use std::ops::Range;

/// Coarse classification used by hosts and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    LoadTimeout,
    Load,
    Runtime,
    Update,
}

/// Deny-list rule family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyCategory {
    Network,
    Storage,
    Navigation,
    DynamicEvaluation,
    Custom,
}

impl fmt::Display for DenyCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Network => "network",
            Self::Storage => "storage",
            Self::Navigation => "navigation",
            Self::DynamicEvaluation => "dynamic-evaluation",
            Self::Custom => "custom",
        };
        f.write_str(name)
    }
}

/// What is wrong with the `render` export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportProblem {
    Missing,
    MultipleExports { count: usize },
    UnsupportedForm,
    WrongParameterCount { found: usize },
    RestParameter,
}

impl fmt::Display for ExportProblem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing => write!(f, "code must export a render function"),
            Self::MultipleExports { count } => {
                write!(f, "code must have a single export, found {count}")
            }
            Self::UnsupportedForm => {
                write!(f, "render must be exported as `export function render(el, params)`")
            }
            Self::WrongParameterCount { found } => {
                write!(f, "render must take exactly two parameters (el, params), found {found}")
            }
            Self::RestParameter => write!(f, "render must not use a rest parameter"),
        }
    }
}

/// Failed static check of a program.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationFailure {
    Forbidden {
        rule: String,
        category: DenyCategory,
        span: Range<usize>,
    },
    Export {
        problem: ExportProblem,
        span: Option<Range<usize>>,
    },
    Syntax {
        message: String,
    },
}

impl ValidationFailure {
    /// Byte range in the original source the failure points at, if any.
    pub fn span(&self) -> Option<Range<usize>> {
        match self {
            Self::Forbidden { span, .. } => Some(span.clone()),
            Self::Export { span, .. } => span.clone(),
            Self::Syntax { .. } => None,
        }
    }
}

impl fmt::Display for ValidationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Forbidden { rule, category, .. } => {
                write!(f, "Security violation: {rule} is not allowed ({category})")
            }
            Self::Export { problem, .. } => write!(f, "{problem}"),
            Self::Syntax { message } => write!(f, "Syntax error: {message}"),
        }
    }
}

impl std::error::Error for ValidationFailure {}

/// Where the host's loader located an import failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceLocation {
    pub line: u32,
    pub column: u32,
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// Exception raised by the host while importing a module.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportError {
    pub message: String,
    pub location: Option<SourceLocation>,
}

impl ImportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            location: None,
        }
    }

    pub fn at(mut self, line: u32, column: u32) -> Self {
        self.location = Some(SourceLocation { line, column });
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LoadError {
    Timeout { after_ms: u64 },
    Import(ImportError),
    InvalidExport,
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout { after_ms } => write!(f, "Execution timeout ({after_ms} ms)"),
            Self::Import(ImportError {
                message,
                location: Some(location),
            }) => write!(f, "{message} (line {location})"),
            Self::Import(ImportError { message, .. }) => f.write_str(message),
            Self::InvalidExport => write!(f, "Exported render must be a function"),
        }
    }
}

impl std::error::Error for LoadError {}

/// Everything that can go wrong between a message and a rendered output.
#[derive(Debug, Clone, PartialEq)]
pub enum SandboxError {
    Validation(ValidationFailure),
    LoadTimeout { after_ms: u64 },
    Load(LoadError),
    Runtime { message: String },
    Update { message: String },
}

impl SandboxError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::LoadTimeout { .. } => ErrorKind::LoadTimeout,
            Self::Load(_) => ErrorKind::Load,
            Self::Runtime { .. } => ErrorKind::Runtime,
            Self::Update { .. } => ErrorKind::Update,
        }
    }
}

impl From<ValidationFailure> for SandboxError {
    fn from(failure: ValidationFailure) -> Self {
        Self::Validation(failure)
    }
}

impl From<LoadError> for SandboxError {
    fn from(error: LoadError) -> Self {
        match error {
            LoadError::Timeout { after_ms } => Self::LoadTimeout { after_ms },
            error => Self::Load(error),
        }
    }
}

impl fmt::Display for SandboxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validation(failure) => write!(f, "{failure}"),
            Self::LoadTimeout { after_ms } => write!(f, "Execution timeout ({after_ms} ms)"),
            Self::Load(error) => write!(f, "{error}"),
            Self::Runtime { message } => write!(f, "Runtime error: {message}"),
            Self::Update { message } => write!(f, "Update failed: {message}"),
        }
    }
}

impl std::error::Error for SandboxError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Validation(failure) => Some(failure),
            Self::Load(error) => Some(error),
            _ => None,
        }
    }
}

/// Rejected sandbox configuration.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    InvalidDenyPattern { pattern: String, message: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidDenyPattern { pattern, message } => {
                write!(f, "invalid deny-list pattern '{pattern}': {message}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}
