mod logging;
mod publisher;
mod tracing;
mod types;

pub use logging::*;
pub use publisher::*;
pub use tracing::*;
pub use types::*;
