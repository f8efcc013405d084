//! Inbound side: server, applications and accepted clients

pub mod application;
pub mod client;
pub mod config;
pub mod listener;

pub use application::{Application, ApplicationEvent};
pub use client::{Client, ClientEvent};
pub use config::ServerConfig;
pub use listener::Server;
