// Copyright 2025 Cornell University
// released under MIT License

use thiserror::Error;

/// Errors raised while parsing a process DSL string or while assembling a
/// `Process` / `ProcessCollection`. All of them reject the offending process
/// as a whole.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProcessError {
    /// Malformed DSL text. `span` is the byte range of `fragment` in the input.
    #[error("failed to parse `{fragment}`: {message}")]
    Grammar {
        fragment: String,
        message: String,
        span: (usize, usize),
    },
    /// The same action name is defined by two leaves of one process
    #[error("action `{name}` of process `{process}` is defined twice: `{first}` and `{second}`")]
    NamingCollision {
        process: String,
        name: String,
        first: String,
        second: String,
    },
    /// An action occurs in the DSL but the process description never declares it
    #[error("action `{name}` is used by process `{process}` but never declared")]
    UndeclaredAction { process: String, name: String },
    /// An action is declared but cannot be reached from the root of the process
    #[error("action `{name}` of process `{process}` is declared but never used")]
    UnreachableAction { process: String, name: String },
    /// A `{name}` jump refers to a subprocess that has no body
    #[error("subprocess `{name}` of process `{process}` has no body")]
    UnresolvedSubprocess { process: String, name: String },
    /// The description declares an action with a different kind than the DSL uses
    #[error("action `{name}` of process `{process}` is declared as {declared} but used as {used}")]
    KindMismatch {
        process: String,
        name: String,
        declared: String,
        used: String,
    },
    #[error("process `{process}` refers to unknown label `{label}`")]
    UnknownLabel { process: String, label: String },
    #[error("label `{label}` is declared twice in process `{process}`")]
    DuplicateLabel { process: String, label: String },
    #[error("process name `{name}` is used more than once")]
    DuplicateProcess { name: String },
    /// A required field for the declared action kind is missing
    #[error("action `{action}` of process `{process}` is missing the `{field}` field")]
    MissingSpecification {
        process: String,
        action: String,
        field: String,
    },
    #[error("invalid C declaration `{declaration}`: {message}")]
    Declaration {
        declaration: String,
        message: String,
    },
}

impl ProcessError {
    /// Byte range in the parsed text, only available for grammar errors
    pub fn span(&self) -> Option<(usize, usize)> {
        match self {
            ProcessError::Grammar { span, .. } => Some(*span),
            _ => None,
        }
    }
}

/// Errors raised by the code generation backends
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TranslationError {
    /// A backend was asked for something it cannot generate. Never recovered from.
    #[error("the {backend} backend cannot generate {request}")]
    BackendMisuse { backend: String, request: String },
    #[error("peers must be established before the collection is translated")]
    PeersNotEstablished,
    #[error("the process collection has no entry process")]
    MissingEntry,
    #[error("process `{process}` refers to unknown label `{label}`")]
    UnknownLabel { process: String, label: String },
    #[error("cannot determine the C type of label `{label}` in process `{process}`")]
    UnresolvedType { process: String, label: String },
    #[error("label `{label}` of process `{process}` is used as a callback but is not a function pointer")]
    NotAFunctionPointer { process: String, label: String },
}

/// Errors raised while loading a JSON process description
#[derive(Error, Debug)]
pub enum DescriptionError {
    /// Failure while parsing one DSL string; `text` is that string
    #[error("in process `{process}`: {source}")]
    Dsl {
        process: String,
        text: String,
        #[source]
        source: ProcessError,
    },
    #[error("in process `{process}`: {source}")]
    Process {
        process: String,
        #[source]
        source: ProcessError,
    },
    #[error("collection: {0}")]
    Collection(#[from] ProcessError),
    #[error("failed to read description: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed description: {0}")]
    Json(#[from] serde_json::Error),
}

pub type ProcessResult<T> = Result<T, ProcessError>;
pub type TranslationResult<T> = Result<T, TranslationError>;
