// src/core/mod.rs
//! Storage services shared by the pipeline and the CLI

pub mod database;

pub use database::{Database, JobRepository, StoredJob, UpsertOutcome};
