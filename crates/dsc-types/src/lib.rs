pub mod enums;
pub mod error;
pub mod run;
pub mod volume;

// Re-exports for convenience
pub use enums::{Channel, Event, MountMode, RunStatus};
pub use error::{DiscoveryError, Result};
pub use run::{Run, RunError, RunFile, RunFilter};
pub use volume::Volume;
