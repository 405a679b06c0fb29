// Library interface for feeddigest modules
// This allows tests and other binaries to import modules

pub mod aggregator;
pub mod bot;
pub mod commands;
pub mod delivery;
pub mod digest;
pub mod ingestion;
pub mod llm;
pub mod normalize;
pub mod server;
pub mod telegram;
