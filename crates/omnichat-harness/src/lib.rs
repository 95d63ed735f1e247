#![doc = "OmniChat Harness\n\nDeterministic collaborators for exercising the runtime without real\nplatforms or databases: a scriptable mock route, in-memory storage and\ncredential stores, and a manually advanced clock."]

pub mod clock;
pub mod memory_storage;
pub mod mock_route;

pub use clock::ManualTimeSource;
pub use memory_storage::{MemoryCredentialStore, MemoryStorage};
pub use mock_route::{MockInteractions, MockRoute};
