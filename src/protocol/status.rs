//! NetConnection / NetStream status vocabulary
//!
//! Status replies are immutable `(code, level)` pairs. The catalog mirrors the
//! standard Flash Media Server codes.

use std::fmt;

/// Severity of a status reply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusLevel {
    Status,
    Error,
    Warning,
}

impl StatusLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusLevel::Status => "status",
            StatusLevel::Error => "error",
            StatusLevel::Warning => "warning",
        }
    }
}

impl fmt::Display for StatusLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A status reply sent to the peer with `onStatus`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Status {
    pub code: &'static str,
    pub level: StatusLevel,
}

impl Status {
    pub const fn new(code: &'static str, level: StatusLevel) -> Self {
        Self { code, level }
    }

    const fn status(code: &'static str) -> Self {
        Self::new(code, StatusLevel::Status)
    }

    const fn error(code: &'static str) -> Self {
        Self::new(code, StatusLevel::Error)
    }

    const fn warning(code: &'static str) -> Self {
        Self::new(code, StatusLevel::Warning)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.code, self.level)
    }
}

pub mod net_connection {
    pub mod call {
        use super::super::Status;

        pub const BAD_VERSION: Status = Status::error("NetConnection.Call.BadVersion");
        pub const FAILED: Status = Status::error("NetConnection.Call.Failed");
        pub const PROHIBITED: Status = Status::error("NetConnection.Call.Prohibited");
    }

    pub mod connect {
        use super::super::Status;

        pub const APP_SHUTDOWN: Status = Status::error("NetConnection.Connect.AppShutdown");
        pub const CLOSED: Status = Status::status("NetConnection.Connect.Closed");
        pub const FAILED: Status = Status::error("NetConnection.Connect.Failed");
        pub const IDLE_TIMEOUT: Status = Status::status("NetConnection.Connect.IdleTimeout");
        pub const INVALID_APP: Status = Status::error("NetConnection.Connect.InvalidApp");
        pub const NETWORK_CHANGE: Status = Status::status("NetConnection.Connect.NetworkChange");
        pub const REJECTED: Status = Status::error("NetConnection.Connect.Rejected");
        pub const SUCCESS: Status = Status::status("NetConnection.Connect.Success");
    }
}

pub mod net_stream {
    use super::Status;

    pub const FAILED: Status = Status::error("NetStream.Failed");

    pub mod buffer {
        use super::super::Status;

        pub const EMPTY: Status = Status::status("NetStream.Buffer.Empty");
        pub const FLUSH: Status = Status::status("NetStream.Buffer.Flush");
        pub const FULL: Status = Status::status("NetStream.Buffer.Full");
    }

    pub mod connect {
        use super::super::Status;

        pub const CLOSED: Status = Status::status("NetStream.Connect.Closed");
        pub const FAILED: Status = Status::error("NetStream.Connect.Failed");
        pub const REJECTED: Status = Status::error("NetStream.Connect.Rejected");
        pub const SUCCESS: Status = Status::status("NetStream.Connect.Success");
    }

    pub mod drm {
        use super::super::Status;

        pub const UPDATE_NEEDED: Status = Status::status("NetStream.DRM.UpdateNeeded");
    }

    pub mod multicast_stream {
        use super::super::Status;

        pub const RESET: Status = Status::status("NetStream.MulticastStream.Reset");
    }

    pub mod pause {
        use super::super::Status;

        pub const NOTIFY: Status = Status::status("NetStream.Pause.Notify");
    }

    pub mod play {
        use super::super::Status;

        pub const FAILED: Status = Status::error("NetStream.Play.Failed");
        pub const FILE_STRUCTURE_INVALID: Status =
            Status::error("NetStream.Play.FileStructureInvalid");
        pub const INSUFFICIENT_BW: Status = Status::warning("NetStream.Play.InsufficientBW");
        pub const NO_SUPPORTED_TRACK_FOUND: Status =
            Status::status("NetStream.Play.NoSupportedTrackFound");
        pub const PUBLISH_NOTIFY: Status = Status::status("NetStream.Play.PublishNotify");
        pub const RESET: Status = Status::status("NetStream.Play.Reset");
        pub const START: Status = Status::status("NetStream.Play.Start");
        pub const STOP: Status = Status::status("NetStream.Play.Stop");
        pub const STREAM_NOT_FOUND: Status = Status::error("NetStream.Play.StreamNotFound");
        pub const TRANSITION: Status = Status::status("NetStream.Play.Transition");
        pub const UNPUBLISH_NOTIFY: Status = Status::status("NetStream.Play.UnpublishNotify");
    }

    pub mod publish {
        use super::super::Status;

        pub const BAD_NAME: Status = Status::error("NetStream.Publish.BadName");
        pub const IDLE: Status = Status::status("NetStream.Publish.Idle");
        pub const START: Status = Status::status("NetStream.Publish.Start");
        pub const REJECTED: Status = Status::error("NetStream.Publish.Rejected");
        pub const DENIED: Status = Status::error("NetStream.Publish.Denied");
    }

    pub mod record {
        use super::super::Status;

        pub const ALREADY_EXISTS: Status = Status::status("NetStream.Record.AlreadyExists");
        pub const FAILED: Status = Status::error("NetStream.Record.Failed");
        pub const NO_ACCESS: Status = Status::error("NetStream.Record.NoAccess");
        pub const START: Status = Status::status("NetStream.Record.Start");
        pub const STOP: Status = Status::status("NetStream.Record.Stop");
    }

    pub mod seek {
        use super::super::Status;

        pub const FAILED: Status = Status::error("NetStream.Seek.Failed");
        pub const INVALID_TIME: Status = Status::error("NetStream.Seek.InvalidTime");
        pub const NOTIFY: Status = Status::status("NetStream.Seek.Notify");
    }

    pub mod unpublish {
        use super::super::Status;

        pub const SUCCESS: Status = Status::status("NetStream.Unpublish.Success");
    }

    pub mod unpause {
        use super::super::Status;

        pub const NOTIFY: Status = Status::status("NetStream.Unpause.Notify");
    }

    pub mod step {
        use super::super::Status;

        pub const NOTIFY: Status = Status::status("NetStream.Step.Notify");
    }
}
