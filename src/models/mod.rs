pub mod agent;
pub mod config;
pub mod filter;
pub mod interface;
pub mod preset;
