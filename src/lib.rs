//! camrelay - RTSP to HLS relay server
//!
//! Manages one ffmpeg transcoding session per distinct RTSP source URL,
//! deduplicated and reference-counted across viewers. This library crate
//! exposes the core functionality for integration testing.

pub mod config;
pub mod events;
pub mod janitor;
pub mod serve_output;
pub mod server;
pub mod session;
