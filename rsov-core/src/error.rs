use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TranslateError {
    #[error("Unexpected end of word stream")]
    EndOfStream,

    #[error("Format error: {0}")]
    FormatError(String),

    #[error("Identifier error: {0}")]
    IdentifierError(String),

    #[error(
        "Kernel '{kernel}' requests coordinate component {requested} but declares {declared} coordinate(s)"
    )]
    SignatureMismatch {
        kernel: String,
        requested: usize,
        declared: usize,
    },

    #[error("Unknown builtin '{0}'")]
    UnknownBuiltin(String),
}

impl TranslateError {
    /// Non-zero status code reported to callers that only look at a code.
    pub fn code(&self) -> i32 {
        match self {
            Self::EndOfStream => 1,
            Self::FormatError(_) => 2,
            Self::IdentifierError(_) => 3,
            Self::SignatureMismatch { .. } => 4,
            Self::UnknownBuiltin(_) => 5,
        }
    }
}

pub type Result<T> = std::result::Result<T, TranslateError>;

#[macro_export]
macro_rules! bail_format {
    ($($arg:tt)*) => {
        return Err($crate::error::TranslateError::FormatError(format!($($arg)*)))
    };
}

#[macro_export]
macro_rules! bail_id {
    ($($arg:tt)*) => {
        return Err($crate::error::TranslateError::IdentifierError(format!($($arg)*)))
    };
}

#[macro_export]
macro_rules! err_format {
    ($($arg:tt)*) => {
        $crate::error::TranslateError::FormatError(format!($($arg)*))
    };
}
