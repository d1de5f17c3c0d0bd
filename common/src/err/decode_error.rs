use std::fmt::Display;
use std::{fmt, io};
use std::num::ParseIntError;
use std::str::Utf8Error;
use std::string::FromUtf8Error;

#[derive(Debug)]
pub enum ReError {
    /// 一定不会出现的异常。如果出现，一定是BUG
    BUG(String),
    /// Recoverable parser/runtime error.
    Error(String),

    /// Byte stream is incomplete or malformed. Used by the binlog decoder.
    Incomplete(Needed),

    IoError(io::Error),
    Utf8Error(Utf8Error),
    FromUtf8Error(FromUtf8Error),
    ParseIntError(ParseIntError),

    ConnectionError(String),
    ConfigFileParseErr(String),
    TableSchemaIntoErr(String),

    /// MySQL replication protocol handshake/auth failed; fatal, not retriable.
    AuthenticationError(String),
    /// binlog format this build cannot decode; fatal, not retriable.
    UnsupportedFormatError(String),

    CoordinatorError(String),
}

impl Display for ReError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> fmt::Result {
        match self {
            ReError::BUG(s)
            | ReError::Error(s)
            | ReError::ConnectionError(s)
            | ReError::ConfigFileParseErr(s)
            | ReError::TableSchemaIntoErr(s)
            | ReError::AuthenticationError(s)
            | ReError::UnsupportedFormatError(s)
            | ReError::CoordinatorError(s) => write!(f, "{}", s),
            ReError::Incomplete(n) => write!(f, "{}", n),
            ReError::IoError(err) => write!(f, "{}", err),
            ReError::Utf8Error(err) => write!(f, "{}", err),
            ReError::FromUtf8Error(err) => write!(f, "{}", err),
            ReError::ParseIntError(err) => write!(f, "{}", err),
        }
    }
}

impl std::error::Error for ReError {}

impl From<io::Error> for ReError {
    fn from(error: io::Error) -> Self {
        ReError::IoError(error)
    }
}

impl From<Utf8Error> for ReError {
    fn from(error: Utf8Error) -> Self {
        ReError::Utf8Error(error)
    }
}

impl From<FromUtf8Error> for ReError {
    fn from(error: FromUtf8Error) -> Self {
        ReError::FromUtf8Error(error)
    }
}

impl From<ParseIntError> for ReError {
    fn from(error: ParseIntError) -> Self {
        ReError::ParseIntError(error)
    }
}

/// Contains information on what went wrong decoding a byte stream.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum Needed {
    Unknown,
    NoEnoughData,
    InvalidUtf8,
    InvalidData(String),
}

impl Display for Needed {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> fmt::Result {
        match self {
            Needed::Unknown => write!(f, "unknown decode failure"),
            Needed::NoEnoughData => write!(f, "not enough data"),
            Needed::InvalidUtf8 => write!(f, "invalid utf8"),
            Needed::InvalidData(s) => write!(f, "invalid data: {}", s),
        }
    }
}

/// Distinguishes errors the leader can retry from ones that must surface and
/// release leadership.
#[derive(Debug)]
pub enum ConsumerError {
    Fatal(ReError),
    Retriable(ReError),
}

impl Display for ConsumerError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> fmt::Result {
        match self {
            ConsumerError::Fatal(e) => write!(f, "fatal: {}", e),
            ConsumerError::Retriable(e) => write!(f, "retriable: {}", e),
        }
    }
}

impl std::error::Error for ConsumerError {}
