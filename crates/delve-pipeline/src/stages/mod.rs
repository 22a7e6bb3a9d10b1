//! Built-in stages

pub mod execute;
pub mod persist;

pub use execute::ExecuteStage;
pub use persist::PersistStage;
