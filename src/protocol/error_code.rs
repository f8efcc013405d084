//! Outbound connection failure codes

use std::fmt;

/// Reason an outbound connection ended (or failed to start)
///
/// Exactly one value is delivered per disconnection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ErrorCode {
    NoError = 0,
    Generic = 1,
    FailedToResolveURL = 2,
    GetSockOptError = 3,
    FailedToConnectSocket = 4,
    ConnectCommandFailed = 5,
    FailedToParseData = 6,
    PeerClosed = 7,
    ReadError = 8,
    PollError = 9,
    TlsInitError = 10,
    TlsHandshakeError = 11,
    TlsDecryptError = 12,
    TlsEncryptError = 13,
}

impl ErrorCode {
    pub fn is_error(&self) -> bool {
        *self != ErrorCode::NoError
    }
}

impl From<ErrorCode> for u8 {
    fn from(code: ErrorCode) -> u8 {
        code as u8
    }
}

impl TryFrom<u8> for ErrorCode {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, u8> {
        use ErrorCode::*;
        Ok(match value {
            0 => NoError,
            1 => Generic,
            2 => FailedToResolveURL,
            3 => GetSockOptError,
            4 => FailedToConnectSocket,
            5 => ConnectCommandFailed,
            6 => FailedToParseData,
            7 => PeerClosed,
            8 => ReadError,
            9 => PollError,
            10 => TlsInitError,
            11 => TlsHandshakeError,
            12 => TlsDecryptError,
            13 => TlsEncryptError,
            other => return Err(other),
        })
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}
