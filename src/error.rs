use std::io;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug)]
pub enum Error {
    Io(io::Error),
    /// On-disk data failed validation (bad magic, checksum mismatch,
    /// truncated page, undecodable record).
    Corrupt(String),
    /// A persisted configuration record could not be parsed.
    InvalidConfig(String),
    /// The persisted record names a key/value codec the registry does not know.
    UnknownCodec(String),
    /// The persisted record names a custom ordering the registry does not know.
    UnknownOrdering(String),
    /// A single encoded entry does not fit into one page payload.
    EntryTooLarge { size: usize, max: usize },
    InvalidOperation(String),
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err)
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Io(err) => write!(f, "I/O error: {}", err),
            Error::Corrupt(msg) => write!(f, "Corrupt data: {}", msg),
            Error::InvalidConfig(msg) => write!(f, "Invalid configuration record: {}", msg),
            Error::UnknownCodec(id) => write!(f, "Unknown key/value codec: {}", id),
            Error::UnknownOrdering(name) => write!(f, "Unknown ordering: {}", name),
            Error::EntryTooLarge { size, max } => {
                write!(
                    f,
                    "Encoded entry of {} bytes exceeds page payload of {}",
                    size, max
                )
            }
            Error::InvalidOperation(msg) => write!(f, "Invalid operation: {}", msg),
        }
    }
}

impl std::error::Error for Error {}
