//! AMF values carried by RTMP commands

pub mod value;

pub use value::AmfValue;
