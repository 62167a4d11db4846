// src/lib.rs

pub mod cache;
pub mod codec;
pub mod config;
pub mod consolidation;
pub mod decay;
pub mod embeddings;
pub mod error;
pub mod fingerprint;
pub mod scheduler;
pub mod service;
pub mod similarity;
pub mod storage;
pub mod types;

pub use config::EngramConfig;
pub use error::MemoryError;
pub use service::MemoryService;
pub use types::{MemoryRecord, MemoryStatus};
