pub mod analysis;
pub mod assignment;
pub mod cache;
pub mod config;
pub mod geo;
pub mod ingest;
pub mod llm;
pub mod queue;
pub mod shared;
pub mod storage;
