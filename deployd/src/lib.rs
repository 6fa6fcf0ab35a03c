//! Deployment server library
//!
//! Rebuilds an application's container image from a fresh git checkout and
//! swaps it in for the running container, cleaning up stale containers and
//! dangling images along the way.

pub mod app;
pub mod daemon;
pub mod deploy;
pub mod errors;
pub mod logs;
pub mod server;
pub mod source;
pub mod storage;
pub mod utils;
pub mod workers;
