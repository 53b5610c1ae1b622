mod client;
mod security_event_repository;

pub use client::*;
pub use security_event_repository::*;
