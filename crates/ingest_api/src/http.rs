mod cors;
mod error;
mod events;
mod health;
mod ingest;
mod router;
mod state;

pub use cors::*;
pub use error::*;
pub use events::*;
pub use health::*;
pub use ingest::*;
pub use router::*;
pub use state::*;
