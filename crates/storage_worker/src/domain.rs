mod event_batch;
mod event_storage_service;
mod flush_policy;

pub use event_batch::*;
pub use event_storage_service::*;
pub use flush_policy::*;
