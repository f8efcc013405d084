//! Net-streams of accepted connections

pub mod stream;

pub use stream::{Command, Stream, StreamEvent};
