pub mod client;
pub mod coordinator;
pub mod poller;
pub mod registry;
