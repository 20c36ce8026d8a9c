// MUSE Library Root
// Copyright (c) 2026 Xing_The_Creator | MUSE

pub mod agent;
pub mod config;
pub mod error;

pub use agent::core::MuseCore;
pub use agent::pipeline::{Pipeline, RunReport, Stage};
pub use config::{RunLimits, Settings};
pub use error::PipelineError;
