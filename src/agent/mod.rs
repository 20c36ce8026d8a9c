// MUSE Agent Modules
// Copyright (c) 2026 Xing_The_Creator | MUSE

pub mod caption_generator;
pub mod diffusion;
pub mod download_guard;
pub mod embedder;
pub mod embedding_store;
pub mod image_selector;
pub mod pipeline;
pub mod publisher;
pub mod source_tools;

pub mod core; // Runtime context
