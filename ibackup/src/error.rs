use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

/// Broad classification of an [`Error`], used by callers to decide whether to
/// re-prompt, retry, or give up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed key bag, object graph or manifest. Fatal to the read in progress.
    Format,
    /// A content key was needed while the key bag is still locked.
    NotUnlocked,
    /// The cipher or KDF needed for this operation cannot be instantiated.
    UnsupportedCrypto,
    /// The passcode did not unwrap any class key.
    InvalidCredential,
    /// The metadata database is unavailable.
    Connection,
    /// Underlying storage failure.
    Io,
    /// The operation is not defined for this kind of entry.
    UnsupportedOperation,
    /// An export destination already exists.
    AlreadyExists,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Invalid format: {0}")]
    InvalidFormat(String),
    #[error("Property list error: {0}")]
    Plist(#[from] plist::Error),
    #[error("Unknown file type {0}")]
    UnknownFileType(i64),
    #[error("Missing content file for {0}")]
    MissingContent(String),
    #[error("Symbolic link {0} has no target")]
    MissingSymlinkTarget(String),
    #[error("Protection class {0:02x?} was not found in the key bag")]
    MissingClass(Vec<u8>),
    #[error("No class key was derived for protection class {0:02x?}")]
    MissingClassKey(Vec<u8>),
    #[error("Invalid wrapped key length: expected {expected} bytes, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },
    #[error("Key unwrap failed: {0}")]
    KeyUnwrapFailed(aes_kw::Error),
    #[error("Key bag is locked")]
    NotUnlocked,
    #[error("Unsupported cryptography: {0}")]
    UnsupportedCrypto(String),
    #[error("The given passcode is not valid")]
    WrongPassword,
    #[error("No connection to the backup database")]
    NoConnection,
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("No database row for file {0}")]
    EntryNotFound(String),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("IO error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),
    #[error("File already exists: {}", .0.display())]
    AlreadyExists(PathBuf),
    #[error("Config error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidFormat(_)
            | Error::Plist(_)
            | Error::UnknownFileType(_)
            | Error::MissingContent(_)
            | Error::MissingSymlinkTarget(_)
            | Error::MissingClass(_)
            | Error::MissingClassKey(_)
            | Error::InvalidKeyLength { .. }
            | Error::KeyUnwrapFailed(_)
            | Error::JsonError(_) => ErrorKind::Format,
            Error::NotUnlocked => ErrorKind::NotUnlocked,
            Error::UnsupportedCrypto(_) => ErrorKind::UnsupportedCrypto,
            Error::WrongPassword => ErrorKind::InvalidCredential,
            Error::NoConnection | Error::Database(_) | Error::EntryNotFound(_) => {
                ErrorKind::Connection
            }
            Error::IoError(_) | Error::Io { .. } => ErrorKind::Io,
            Error::UnsupportedOperation(_) => ErrorKind::UnsupportedOperation,
            Error::AlreadyExists(_) => ErrorKind::AlreadyExists,
        }
    }

    pub(crate) fn io<P: Into<PathBuf>>(path: P, source: std::io::Error) -> Error {
        Error::Io {
            path: path.into(),
            source,
        }
    }
}

/// Attaches the attempted path to an `io::Error`.
pub trait IoResultExt<T> {
    fn at_path<P: Into<PathBuf>>(self, path: P) -> Result<T>;
}

impl<T> IoResultExt<T> for std::io::Result<T> {
    fn at_path<P: Into<PathBuf>>(self, path: P) -> Result<T> {
        self.map_err(|e| Error::io(path, e))
    }
}
