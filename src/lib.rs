//! Retrospector - retrospective IOC correlation
//!
//! Stores observed entities (domains, addresses, file hashes) and threat
//! intelligence indicators side by side, answers "which entities match these
//! IOCs?" and "which IOCs match these entities?", and alerts a webhook when
//! a freshly produced batch of entities hits a known indicator.

pub mod app;
pub mod cli;
pub mod config;
pub mod error;
pub mod model;
pub mod notify;
pub mod pipeline;
pub mod repository;
pub mod service;
pub mod transport;

pub use error::{Result, RetroError};
