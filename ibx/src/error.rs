use std::fmt;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug)]
pub enum Error {
    BackupError(ibackup::Error),
    IoError(std::io::Error),
    NotFound(String),
    CliInputError(String),
    /// The export stopped at a destination that already exists.
    Conflict(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::BackupError(err) => write!(f, "Backup error: {}", err),
            Error::IoError(err) => write!(f, "IO error: {}", err),
            Error::NotFound(msg) => write!(f, "Not found: {}", msg),
            Error::CliInputError(msg) => write!(f, "CLI input error: {}", msg),
            Error::Conflict(path) => write!(
                f,
                "{} already exists, use --skip-existing or --overwrite",
                path
            ),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::BackupError(err) => Some(err),
            Error::IoError(err) => Some(err),
            _ => None,
        }
    }
}

impl std::convert::From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Error {
        Error::IoError(error)
    }
}

impl std::convert::From<ibackup::Error> for Error {
    fn from(error: ibackup::Error) -> Error {
        Error::BackupError(error)
    }
}
