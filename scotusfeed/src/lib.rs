// Library interface for scotusfeed modules
// This allows tests and the binaries to import modules

pub mod error;
pub mod ingestion;
pub mod llm;
pub mod model;
pub mod pipeline;
pub mod processing;
pub mod rss;
pub mod scraping;
pub mod storage;
