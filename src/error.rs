use std::fmt;

use serde_json::Error as JSONError;
use tokio::sync::mpsc::error::SendError as ChannelSendError;
use tokio::task::JoinError;
use tungstenite::Error as WSError;

use crate::messages::Reason;

use super::{ErrorType, Message, ID};

#[derive(Debug)]
pub struct Error {
    pub kind: ErrorKind,
}

#[allow(clippy::large_enum_variant)]
#[derive(Debug)]
pub enum ErrorKind {
    WSError(WSError),
    HandshakeError(Reason),
    UnexpectedMessage(&'static str), // Used when a peer sends another message before Hello/Welcome
    ChannelClosed,
    ThreadError(JoinError),
    ConnectionLost,
    Closing(String),
    JSONError(JSONError),
    MalformedData,
    InvalidMessageType(Message),
    InvalidState(&'static str),
    Timeout,
    ErrorReason(ErrorType, ID, Reason),
}

impl Error {
    pub fn new(kind: ErrorKind) -> Error {
        Error { kind }
    }

    fn get_description(&self) -> String {
        format!("WAMP Error: {}", self.kind.description())
    }

    #[inline]
    pub fn get_kind(self) -> ErrorKind {
        self.kind
    }

    #[inline]
    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.get_description())
    }
}

impl std::error::Error for Error {}

impl ErrorKind {
    pub fn description(&self) -> String {
        match *self {
            ErrorKind::WSError(ref e) => e.to_string(),
            ErrorKind::HandshakeError(ref r) => r.to_string(),
            ErrorKind::ThreadError(ref e) => e.to_string(),
            ErrorKind::JSONError(ref e) => e.to_string(),
            ErrorKind::ErrorReason(_, _, ref s) => s.to_string(),
            ErrorKind::Closing(ref s) => s.clone(),
            ErrorKind::UnexpectedMessage(s) | ErrorKind::InvalidState(s) => s.to_string(),
            ErrorKind::ChannelClosed => "Internal channel closed".to_string(),
            ErrorKind::ConnectionLost => "Connection Lost".to_string(),
            ErrorKind::MalformedData => "Malformed Data".to_string(),
            ErrorKind::Timeout => "Connection timed out".to_string(),
            ErrorKind::InvalidMessageType(ref t) => format!("Invalid Message Type: {:?}", t),
        }
    }
}

impl From<WSError> for Error {
    fn from(e: WSError) -> Error {
        Error::new(ErrorKind::WSError(e))
    }
}

impl From<JSONError> for Error {
    fn from(e: JSONError) -> Error {
        Error::new(ErrorKind::JSONError(e))
    }
}

impl From<JoinError> for Error {
    fn from(e: JoinError) -> Error {
        Error::new(ErrorKind::ThreadError(e))
    }
}

impl<T> From<ChannelSendError<T>> for Error {
    fn from(_: ChannelSendError<T>) -> Error {
        Error::new(ErrorKind::ChannelClosed)
    }
}
