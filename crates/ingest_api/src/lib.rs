pub mod domain;
pub mod http;
pub mod nats;
mod ingest_api;

pub use ingest_api::*;
