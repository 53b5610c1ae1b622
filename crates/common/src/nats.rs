mod client;
mod message;
mod middleware;
mod partition;
mod trace_context;
mod traits;

pub use client::*;
pub use message::*;
pub use middleware::*;
pub use partition::*;
pub use trace_context::*;
pub use traits::*;
