//! mqserve: a filesystem-queue server for a batch-compute engine.
//!
//! Clients drop request directories into a shared listen directory; the
//! server discovers them, validates their inputs, converts the parameter
//! document into the engine's XML format and runs the engine with bounded
//! concurrency. Progress and results are reported back through files in
//! the request directory, so the only interface between client and server
//! is a shared filesystem.

pub mod cli;
pub mod config;
pub mod error;
pub mod fscall;
pub mod params;
pub mod server;
