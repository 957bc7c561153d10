// src/types/mod.rs
pub mod job;

pub use job::{JobRecord, RecordStage, SearchTask, Source, WorkMode, CAPTCHA_BLOCKED, NOT_AVAILABLE};
