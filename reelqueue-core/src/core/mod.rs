pub mod error;
pub mod events;
pub mod filename;
pub mod http_client;
pub mod manifest;
pub mod orchestrator;
pub mod paths;
pub mod probe;
pub mod process;
pub mod queue;
pub mod transfer;
