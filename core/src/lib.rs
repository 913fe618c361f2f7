//! Voice Call Core Library
//!
//! This crate drives a real-time voice call with a remote conversational
//! agent: call provisioning, connection state, transcripts, audio level
//! feedback and call duration.

pub mod audio;
pub mod orchestrator;
pub mod provisioning;
pub mod session;
pub mod telemetry;
