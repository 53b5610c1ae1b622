mod dead_letter;
mod security_event_consumer;

pub use dead_letter::*;
pub use security_event_consumer::*;
