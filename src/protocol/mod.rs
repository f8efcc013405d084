//! RTMP protocol vocabulary shared with the engine
//!
//! Wire format handling lives in the engine; this module only holds the
//! status catalog and the outbound connection error codes.

pub mod error_code;
pub mod status;

pub use error_code::ErrorCode;
pub use status::{net_connection, net_stream, Status, StatusLevel};
