use anyhow::{ensure, Result};
use async_nats::jetstream::consumer::{pull, AckPolicy, DeliverPolicy};
use sha2::{Digest, Sha256};
use std::time::Duration;

/// Maps hostnames onto a fixed set of partitions of one stream.
///
/// All events of a host land on the same subject, and JetStream keeps a
/// subject's messages in publish order, so per-host ordering survives any
/// number of producers and consumers.
#[derive(Debug, Clone)]
pub struct PartitionRouter {
    stream: String,
    partition_count: u32,
}

impl PartitionRouter {
    pub fn new(stream: impl Into<String>, partition_count: u32) -> Result<Self> {
        ensure!(partition_count > 0, "partition count must be at least 1");
        Ok(Self {
            stream: stream.into(),
            partition_count,
        })
    }

    pub fn stream(&self) -> &str {
        &self.stream
    }

    pub fn partition_count(&self) -> u32 {
        self.partition_count
    }

    /// Subjects the stream must capture
    pub fn stream_subjects(&self) -> Vec<String> {
        vec![format!("{}.>", self.stream)]
    }

    pub fn partition_for(&self, hostname: &str) -> u32 {
        let digest = Sha256::digest(hostname.as_bytes());
        let prefix = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
        prefix % self.partition_count
    }

    pub fn subject_for(&self, hostname: &str) -> String {
        format!(
            "{}.p{}.{}",
            self.stream,
            self.partition_for(hostname),
            host_token(hostname)
        )
    }

    pub fn partition_filter(&self, partition: u32) -> String {
        format!("{}.p{}.>", self.stream, partition)
    }
}

/// Hostname made safe for use as a single subject token
pub fn host_token(hostname: &str) -> String {
    if hostname.is_empty() {
        return "_".to_string();
    }

    hostname
        .chars()
        .map(|c| match c {
            '.' | '*' | '>' => '_',
            c if c.is_whitespace() => '_',
            c => c,
        })
        .collect()
}

/// Partitions owned by one member of a consumer group
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerAssignment {
    group: String,
    partitions: Vec<u32>,
}

impl ConsumerAssignment {
    /// Assignment over `partitions`; an empty list means every partition
    pub fn new(
        router: &PartitionRouter,
        group: impl Into<String>,
        partitions: &[u32],
    ) -> Result<Self> {
        let group = group.into();
        ensure!(!group.is_empty(), "consumer group name must not be empty");

        let mut owned: Vec<u32> = if partitions.is_empty() {
            (0..router.partition_count()).collect()
        } else {
            partitions.to_vec()
        };
        owned.sort_unstable();
        owned.dedup();

        for p in &owned {
            ensure!(
                *p < router.partition_count(),
                "partition {} is outside 0..{}",
                p,
                router.partition_count()
            );
        }

        Ok(Self {
            group,
            partitions: owned,
        })
    }

    pub fn partitions(&self) -> &[u32] {
        &self.partitions
    }

    pub fn owns_all(&self, router: &PartitionRouter) -> bool {
        self.partitions.len() == router.partition_count() as usize
    }

    /// Durable consumer name. Members owning disjoint partition sets get
    /// distinct names and therefore independent delivery progress.
    pub fn durable_name(&self, router: &PartitionRouter) -> String {
        if self.owns_all(router) {
            return self.group.clone();
        }

        let mut name = self.group.clone();
        for p in &self.partitions {
            name.push_str(&format!("-p{}", p));
        }
        name
    }

    pub fn filter_subjects(&self, router: &PartitionRouter) -> Vec<String> {
        if self.owns_all(router) {
            return router.stream_subjects();
        }
        self.partitions
            .iter()
            .map(|p| router.partition_filter(*p))
            .collect()
    }

    pub fn pull_config(&self, router: &PartitionRouter, ack_wait: Duration) -> pull::Config {
        let durable = self.durable_name(router);
        pull::Config {
            durable_name: Some(durable.clone()),
            name: Some(durable),
            description: Some(format!("Consumer group {}", self.group)),
            filter_subjects: self.filter_subjects(router),
            ack_policy: AckPolicy::Explicit,
            deliver_policy: DeliverPolicy::All,
            ack_wait,
            ..Default::default()
        }
    }
}
