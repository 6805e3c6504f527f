#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! County annotation pipeline for AVA regions.
//!
//! [`pipeline::run`] reads the region files, gates them on CRS, loads
//! regions and county boundaries into `DuckDB`, annotates every region
//! in parallel through [`batch::process`], exports the annotated regions,
//! and reports what changed.

pub mod batch;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod worker;

pub use config::PipelineConfig;
pub use error::PipelineError;
pub use worker::WorkerPool;
