pub mod admission;
pub mod job;
pub mod orchestrator;
pub mod sink;
pub mod store;
pub mod sweeper;
pub mod types;
