#![forbid(unsafe_code)]

pub mod catalog;
pub mod chapters;
pub mod cli;
pub mod config;
pub mod container;
pub mod error;
pub mod formats;
pub mod ingest;
pub mod logging;
pub mod metadata;
pub mod store;
pub mod xhtml;
