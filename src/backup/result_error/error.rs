use crate::backup::result_error::{WithDebugObjectAndFnName, WithMsg};
use itertools::Itertools;
use std::fmt::Debug;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    WalkDir(#[from] walkdir::Error),
    #[error(transparent)]
    ValidationError(#[from] validator::ValidationErrors),
    #[error(transparent)]
    ThreadPoolBuildError(#[from] rayon::ThreadPoolBuildError),
    #[error(transparent)]
    SerdeYml(#[from] serde_yml::Error),
    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),
    #[error(transparent)]
    Envy(#[from] envy::Error),
    #[error(transparent)]
    Reqwest(#[from] reqwest::Error),
    #[error("{0}")]
    Crypto(String),
    #[error(transparent)]
    Persist(#[from] tempfile::PersistError),
    #[error("Invalid setting {name}: {reason}")]
    Config { name: String, reason: String },
    #[error("{0:?} not found or not a directory")]
    NotFound(PathBuf),
    #[error("{0:?} already exists")]
    AlreadyExists(PathBuf),
    #[error("Invalid recipient {identity:?}: {reason}")]
    InvalidRecipient { identity: String, reason: String },
    #[error("Recipient {identity:?} resolved to {presented}, but {pinned} was trusted on first use")]
    UntrustedRecipient {
        identity: String,
        pinned: String,
        presented: String,
    },
    #[error("Refresh already failed earlier in this run: {0}")]
    RefreshUnavailable(String),
    #[error("HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },
    #[error("File is {size} bytes, single request limit is {limit} bytes")]
    FileTooLarge { size: u64, limit: u64 },
    #[error("Archive of unit {unit:?} failed:\n{}", indent::indent_all_with("  ", error.to_string()))]
    Archive { unit: String, error: Box<Error> },
    #[error("Encryption of {path:?} failed:\n{}", indent::indent_all_with("  ", error.to_string()))]
    Encrypt { path: PathBuf, error: Box<Error> },
    #[error("Upload of {path:?} failed:\n{}", indent::indent_all_with("  ", error.to_string()))]
    Upload { path: PathBuf, error: Box<Error> },
    #[error("Access token refresh failed:\n{}", indent::indent_all_with("  ", error.to_string()))]
    Auth { error: Box<Error> },
    #[error("{}:\n{}", msg, indent::indent_all_with("  ", error.to_string()))]
    WithMsg { msg: String, error: Box<Error> },
    #[error("{:?} {} failed:\n{}", obj_debug, fn_name, indent::indent_all_with("  ", error.to_string()))]
    WithDebugObjAndFnName {
        error: Box<Error>,
        obj_debug: Box<dyn Debug + Send + Sync>,
        fn_name: String,
    },
    #[error("{}", itertools::join(.0, "\n\n"))]
    LotsOfError(Vec<Error>),
}

impl<S: Into<String>, O: Debug + Send + Sync + 'static> WithDebugObjectAndFnName<S, O> for Error {
    fn with_debug_object_and_fn_name(self, obj: O, fn_name: S) -> Self {
        Error::WithDebugObjAndFnName {
            error: Box::new(self),
            obj_debug: Box::new(obj),
            fn_name: fn_name.into(),
        }
    }
}

impl<S: Into<String>> WithMsg<S> for Error {
    fn with_msg(self, msg: S) -> Self {
        Self::WithMsg {
            msg: msg.into(),
            error: Box::new(self),
        }
    }
}

impl From<age::EncryptError> for Error {
    fn from(value: age::EncryptError) -> Self {
        Self::Crypto(value.to_string())
    }
}

impl From<Vec<Error>> for Error {
    fn from(errors: Vec<Error>) -> Self {
        if errors.is_empty() {
            panic!("Should not create lots of errors when error is empty")
        }
        Self::LotsOfError(
            errors
                .into_iter()
                .flat_map(|e| e.into_iter())
                .collect_vec(),
        )
    }
}

impl Error {
    pub fn config<N: Into<String>, R: Into<String>>(name: N, reason: R) -> Self {
        Self::Config {
            name: name.into(),
            reason: reason.into(),
        }
    }

    pub fn archive<U: Into<String>>(unit: U, error: Error) -> Self {
        Self::Archive {
            unit: unit.into(),
            error: Box::new(error),
        }
    }

    pub fn encrypt<P: Into<PathBuf>>(path: P, error: Error) -> Self {
        Self::Encrypt {
            path: path.into(),
            error: Box::new(error),
        }
    }

    pub fn upload<P: Into<PathBuf>>(path: P, error: Error) -> Self {
        Self::Upload {
            path: path.into(),
            error: Box::new(error),
        }
    }

    pub fn auth(error: Error) -> Self {
        Self::Auth {
            error: Box::new(error),
        }
    }

    pub fn into_iter(self) -> Box<dyn Iterator<Item = Error>> {
        match self {
            Error::LotsOfError(v) => Box::new(v.into_iter().flat_map(|e| e.into_iter())),
            e => Box::new(std::iter::once(e)),
        }
    }

    /// Whether retrying the failed operation may succeed: connection failures,
    /// timeouts, rate limiting and server side errors.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Reqwest(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Error::HttpStatus { status, .. } => *status == 429 || *status >= 500,
            Error::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::Interrupted
            ),
            Error::Upload { error, .. }
            | Error::Auth { error }
            | Error::WithMsg { error, .. }
            | Error::WithDebugObjAndFnName { error, .. } => error.is_transient(),
            _ => false,
        }
    }
}
