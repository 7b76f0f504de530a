use crate::backup::result_error::{AddFunctionName, AddMsg};
use derive_more::Display;
use itertools::Itertools;
use thiserror::Error;

/// Broad classification used to pick the process exit status.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Detected before anything was mutated.
    #[display("configuration")]
    Configuration,
    /// An external collaborator failed while the run was mutating state.
    #[display("execution")]
    Execution,
}

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Validation(#[from] validator::ValidationErrors),
    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),
    #[error("{0}")]
    Configuration(String),
    #[error("Missing required option {key:?} ({scope})")]
    MissingOption { key: String, scope: String },
    #[error("Invalid size {0:?}, expected <number>[k|m|g|t]")]
    InvalidSize(String),
    #[error("`{}` failed with {}{}", command, status, format_output(output))]
    Execution {
        command: String,
        status: String,
        output: String,
    },
    #[error("Entry {index} cannot {operation} while {state}")]
    InvalidTransition {
        index: usize,
        state: String,
        operation: &'static str,
    },
    #[error("{}:\n{}", msg, indent::indent_all_with("  ", error.to_string()))]
    WithMsg { msg: String, error: Box<Error> },
    #[error("{} failed:\n{}", fn_name, indent::indent_all_with("  ", error.to_string()))]
    WithFnName { error: Box<Error>, fn_name: String },
    #[error("{}", itertools::join(.0, "\n\n"))]
    LotsOfError(Vec<Error>),
}

fn format_output(output: &str) -> String {
    let output = output.trim_end();
    if output.is_empty() {
        String::new()
    } else {
        format!(":\n{}", indent::indent_all_with("  ", output))
    }
}

impl<S: Into<String>> AddMsg<S> for Error {
    fn add_msg(self, msg: S) -> Self {
        Self::WithMsg {
            msg: msg.into(),
            error: Box::new(self),
        }
    }
}

impl<S: Into<String>> AddFunctionName<S> for Error {
    fn add_fn_name(self, fn_name: S) -> Self {
        Self::WithFnName {
            error: Box::new(self),
            fn_name: fn_name.into(),
        }
    }
}

impl From<Vec<Error>> for Error {
    fn from(errors: Vec<Error>) -> Self {
        if errors.is_empty() {
            panic!("Should not create lots of errors when error is empty")
        }
        Self::LotsOfError(errors.into_iter().flat_map(|e| e.into_iter()).collect_vec())
    }
}

impl Error {
    pub fn configuration<S: Into<String>>(msg: S) -> Self {
        Error::Configuration(msg.into())
    }

    pub fn missing_option<K: Into<String>, S: Into<String>>(key: K, scope: S) -> Self {
        Error::MissingOption {
            key: key.into(),
            scope: scope.into(),
        }
    }

    pub fn into_iter(self) -> Box<dyn Iterator<Item = Error>> {
        match self {
            Error::LotsOfError(v) => Box::new(v.into_iter().flat_map(|e| e.into_iter())),
            e => Box::new(std::iter::once(e)),
        }
    }

    pub fn chain(self, other: Error) -> Error {
        Error::LotsOfError(self.into_iter().chain(other.into_iter()).collect_vec())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Validation(_)
            | Error::Configuration(_)
            | Error::MissingOption { .. }
            | Error::InvalidSize(_) => ErrorKind::Configuration,
            Error::Io(_)
            | Error::SerdeJson(_)
            | Error::Execution { .. }
            | Error::InvalidTransition { .. } => ErrorKind::Execution,
            Error::WithMsg { error, .. } | Error::WithFnName { error, .. } => error.kind(),
            Error::LotsOfError(errors) => errors
                .first()
                .map(Error::kind)
                .unwrap_or(ErrorKind::Execution),
        }
    }
}
