pub mod domain;
pub mod nats;
mod storage_worker;

pub use storage_worker::*;
