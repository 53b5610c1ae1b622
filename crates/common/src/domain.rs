mod result;
mod security_event;

pub use result::*;
pub use security_event::*;
