// src/lib.rs
pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod pipeline;
pub mod scraping;
pub mod types;
pub mod utils;

pub use config::ScrapeConfig;
pub use error::{BlockKind, ScrapeError};
pub use pipeline::{run_from_config, RunSummary, ScrapePipeline};
pub use types::{JobRecord, SearchTask, Source, WorkMode};
