use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use super::types::{PublishRequest, PublishResponse};
use super::{
    NatsPublishLoggingLayer, NatsPublishLoggingService, NatsPublishTracingLayer,
    NatsPublishTracingService,
};
use crate::nats::JetStreamPublisher;
use anyhow::{anyhow, Result};
use tower::{Service, ServiceBuilder};

pub const DEFAULT_PUBLISH_ACK_TIMEOUT: Duration = Duration::from_secs(5);

/// Innermost service: publishes and waits for the JetStream ack, bounded by `ack_timeout`
#[derive(Clone)]
pub struct NatsPublishService {
    publisher: Arc<dyn JetStreamPublisher>,
    ack_timeout: Duration,
}

impl NatsPublishService {
    pub fn new(publisher: Arc<dyn JetStreamPublisher>, ack_timeout: Duration) -> Self {
        Self {
            publisher,
            ack_timeout,
        }
    }
}

impl Service<PublishRequest> for NatsPublishService {
    type Response = PublishResponse;
    type Error = anyhow::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: PublishRequest) -> Self::Future {
        let publisher = Arc::clone(&self.publisher);
        let ack_timeout = self.ack_timeout;
        let subject = req.subject.clone();

        Box::pin(async move {
            let sequence = tokio::time::timeout(
                ack_timeout,
                publisher.publish_with_headers(subject.clone(), req.headers, req.payload),
            )
            .await
            .map_err(|_| {
                anyhow!(
                    "No JetStream acknowledgment for {} within {}ms",
                    subject,
                    ack_timeout.as_millis()
                )
            })??;

            Ok(PublishResponse { subject, sequence })
        })
    }
}

/// Builder for the layered publisher
pub struct NatsPublisherBuilder {
    publisher: Arc<dyn JetStreamPublisher>,
    service_name: String,
    ack_timeout: Duration,
    with_logging: bool,
}

impl NatsPublisherBuilder {
    pub fn new(publisher: Arc<dyn JetStreamPublisher>, service_name: impl Into<String>) -> Self {
        Self {
            publisher,
            service_name: service_name.into(),
            ack_timeout: DEFAULT_PUBLISH_ACK_TIMEOUT,
            with_logging: false,
        }
    }

    pub fn with_ack_timeout(mut self, ack_timeout: Duration) -> Self {
        self.ack_timeout = ack_timeout;
        self
    }

    pub fn with_logging(mut self) -> Self {
        self.with_logging = true;
        self
    }

    /// Layer order (outermost first): Tracing -> Logging -> Publish
    pub fn build(self) -> LayeredPublisher {
        let inner = NatsPublishService::new(self.publisher, self.ack_timeout);
        let tracing = NatsPublishTracingLayer::new(self.service_name);

        if self.with_logging {
            LayeredPublisher::Logged(
                ServiceBuilder::new()
                    .layer(tracing)
                    .layer(NatsPublishLoggingLayer::new())
                    .service(inner),
            )
        } else {
            LayeredPublisher::Quiet(ServiceBuilder::new().layer(tracing).service(inner))
        }
    }
}

/// Concrete service type returned by the builder for either layer combination
#[derive(Clone)]
pub enum LayeredPublisher {
    Logged(NatsPublishTracingService<NatsPublishLoggingService<NatsPublishService>>),
    Quiet(NatsPublishTracingService<NatsPublishService>),
}

impl Service<PublishRequest> for LayeredPublisher {
    type Response = PublishResponse;
    type Error = anyhow::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        match self {
            LayeredPublisher::Logged(svc) => svc.poll_ready(cx),
            LayeredPublisher::Quiet(svc) => svc.poll_ready(cx),
        }
    }

    fn call(&mut self, req: PublishRequest) -> Self::Future {
        match self {
            LayeredPublisher::Logged(svc) => svc.call(req),
            LayeredPublisher::Quiet(svc) => svc.call(req),
        }
    }
}
