pub mod clickhouse;
pub mod domain;
pub mod garde;
pub mod nats;
pub mod telemetry;
pub mod wire;

// Re-export mocks when testing feature is enabled
#[cfg(any(test, feature = "testing"))]
pub use domain::MockSecurityEventProducer;
#[cfg(any(test, feature = "testing"))]
pub use domain::MockSecurityEventReader;
#[cfg(any(test, feature = "testing"))]
pub use domain::MockSecurityEventRepository;
#[cfg(any(test, feature = "testing"))]
pub use nats::MockJetStreamConsumer;
#[cfg(any(test, feature = "testing"))]
pub use nats::MockJetStreamPublisher;
#[cfg(any(test, feature = "testing"))]
pub use nats::MockMessageAcker;
#[cfg(any(test, feature = "testing"))]
pub use nats::MockPullConsumer;
