use thiserror::Error;

/// Why a text is not valid target format.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormatError {
    #[error("file is empty")]
    EmptyContent,

    #[error("file has no non-empty lines")]
    NoNonEmptyLines,

    #[error("line {line}: malformed token {token:?}")]
    MalformedLine { line: usize, token: String },
}

/// An unknown label for one of the model enums.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind}: {value:?}")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

impl ParseEnumError {
    pub(crate) fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid model config: {0}")]
pub struct InvalidConfig(pub &'static str);
