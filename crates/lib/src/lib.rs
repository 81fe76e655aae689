//! Pulsar core library — chat session state machine, remote AI backend,
//! configuration, and presentation helpers shared by the Pulsar clients.

pub mod config;
pub mod controller;
pub mod prefs;
pub mod reveal;
pub mod rpc;
pub mod session;
pub mod suggest;
