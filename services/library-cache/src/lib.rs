//!
//! src/lib.rs  Oct 2nd, 2026
//!
//! Offline-first album library: parallel fetch into a year-partitioned
//! cache, random sampling, and reference resolution for playlists
//!

pub mod config;
pub mod errors;
pub mod logging;

pub mod types;
pub mod catalog;
pub mod spotify;

pub mod fetcher;
pub mod cache;
pub mod resolver;
pub mod sampler;
pub mod playlist;

#[cfg(test)]
pub(crate) mod testing;

pub use errors::LibraryError;
