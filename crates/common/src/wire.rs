mod security_event;

pub use security_event::*;
