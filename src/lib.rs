//! Resumable Uploads
//!
//! An HTTP server for the draft resumable upload protocol: clients create an
//! upload, append chunks at the offset the server reports, and resume after
//! interruptions by asking for that offset again.

pub mod config;
pub mod routes;
pub mod state;
pub mod upload;
