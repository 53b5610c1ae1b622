mod security_event_producer;

pub use security_event_producer::*;
