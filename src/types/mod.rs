//! Shared data types for the agent's core entities.

pub mod container;
pub mod task;

pub use container::{ContainerRecord, MappedState, MountEntry, NetworkEndpoint, PortBinding};
pub use task::{JobTask, PendingTask};
