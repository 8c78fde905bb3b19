use std::fmt;

use thiserror::Error;

/// Main error type for the SymRefine system
#[derive(Error, Debug)]
pub enum SrError {
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("Timeout: {stage} exceeded {limit_ms} ms")]
    Timeout { stage: Stage, limit_ms: u64 },

    #[error("Unsupported operator: {0}")]
    UnsupportedOperator(String),

    #[error("Numerically invalid: {0}")]
    NumericInvalid(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Empty candidate pool: every raw candidate failed refinement")]
    EmptyCandidatePool,

    #[error("Unsanitizable expression: {0}")]
    Unsanitizable(String),

    #[error("Data error: {0}")]
    Data(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SrError {
    /// Whether the refinement pipeline may absorb this error locally.
    ///
    /// Configuration mistakes are the only class surfaced to callers.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, SrError::Config(_))
    }
}

/// Pipeline stage that owns a deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Simplify,
    Compile,
    FineTune,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Simplify => write!(f, "simplification"),
            Stage::Compile => write!(f, "compilation"),
            Stage::FineTune => write!(f, "fine-tuning"),
        }
    }
}

/// Errors raised while reading a raw candidate expression
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    #[error("unexpected character '{ch}' at position {pos}")]
    UnexpectedChar { ch: char, pos: usize },

    #[error("unexpected '{text}' at position {pos}")]
    UnexpectedToken { text: String, pos: usize },

    #[error("unexpected end of input")]
    UnexpectedEnd,

    #[error("unknown symbol '{name}' at position {pos}")]
    UnknownSymbol { name: String, pos: usize },

    #[error("malformed number '{text}' at position {pos}")]
    MalformedNumber { text: String, pos: usize },

    #[error("trailing input at position {pos}")]
    Trailing { pos: usize },

    #[error("function '{name}' expects {expected} arguments, got {got}")]
    Arity {
        name: String,
        expected: usize,
        got: usize,
    },

    #[error("expression nests deeper than {limit} levels")]
    TooDeep { limit: usize },
}

/// Result type alias for SymRefine operations
pub type SrResult<T> = Result<T, SrError>;

/// Macro for creating configuration errors
#[macro_export]
macro_rules! config_error {
    ($($arg:tt)*) => {
        $crate::SrError::Config(format!($($arg)*))
    };
}

/// Macro for creating data errors
#[macro_export]
macro_rules! data_error {
    ($($arg:tt)*) => {
        $crate::SrError::Data(format!($($arg)*))
    };
}

/// Macro for creating internal errors
#[macro_export]
macro_rules! internal_error {
    ($($arg:tt)*) => {
        $crate::SrError::Internal(format!($($arg)*))
    };
}
