//! Moar Reader - A self-hosted feed reader
//!
//! Each configured source keeps its articles in memory and mirrors them to
//! one JSON file per article under its own data directory. Disk writes go
//! through a per-source queue drained by a single writer task.

pub mod article;
pub mod codec;
pub mod config;
pub mod directory;
pub mod error;
pub mod fetcher;
pub mod routes;
pub mod store;
pub mod writeback;
