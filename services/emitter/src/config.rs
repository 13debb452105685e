//! Route emitter configuration.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};

use crate::emission::{BackoffPolicy, BackpressurePolicy, PipelineConfig, RetryPolicy};

/// Emitter configuration (env-driven).
#[derive(Debug, Clone)]
pub struct Config {
    /// Scheduling event feed base URL (example: http://localhost:8080).
    pub event_source_url: String,

    /// Bus gateway base URL. Unset means dry run: messages are only logged.
    pub bus_url: Option<String>,

    /// Interval between full resyncs.
    pub resync_interval: Duration,

    /// Maximum number of queued batches.
    pub queue_capacity: usize,

    pub backpressure: BackpressurePolicy,

    /// Publish attempts per message, including the first.
    pub publish_max_attempts: u32,

    /// Per-request timeout for the bus gateway.
    pub publish_timeout: Duration,

    /// Minimum spacing between publishes.
    pub publish_pacing: Option<Duration>,

    /// Time the in-flight batch gets on shutdown.
    pub shutdown_grace: Duration,

    /// Max events to fetch per poll.
    pub fetch_limit: i64,

    /// Poll interval when no new events are available.
    pub poll_interval: Duration,

    /// Exit once fully caught up.
    pub once: bool,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through `lookup`, which maps a variable name to its value.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let event_source_url = lookup("ROUTESYNC_EVENT_SOURCE_URL")
            .unwrap_or_else(|| "http://localhost:8080".to_string());

        let bus_url = lookup("ROUTESYNC_BUS_URL").filter(|v| !v.trim().is_empty());

        let resync_secs: u64 = parse(&lookup, "ROUTESYNC_RESYNC_INTERVAL_SECS", "seconds")?
            .unwrap_or(20);
        if resync_secs == 0 {
            return Err(anyhow!("ROUTESYNC_RESYNC_INTERVAL_SECS must be positive."));
        }

        let queue_capacity: usize =
            parse(&lookup, "ROUTESYNC_QUEUE_CAPACITY", "integer")?.unwrap_or(256);

        let backpressure = match lookup("ROUTESYNC_BACKPRESSURE") {
            Some(raw) => raw
                .parse::<BackpressurePolicy>()
                .map_err(|e| anyhow!(e))
                .context("Invalid ROUTESYNC_BACKPRESSURE.")?,
            None => BackpressurePolicy::default(),
        };

        let publish_max_attempts: u32 =
            parse(&lookup, "ROUTESYNC_PUBLISH_MAX_ATTEMPTS", "integer")?.unwrap_or(5);

        let publish_timeout_ms: u64 =
            parse(&lookup, "ROUTESYNC_PUBLISH_TIMEOUT_MS", "milliseconds")?.unwrap_or(2000);

        let publish_pacing_ms: Option<u64> =
            parse(&lookup, "ROUTESYNC_PUBLISH_PACING_MS", "milliseconds")?;
        let publish_pacing = publish_pacing_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis);

        let shutdown_grace_ms: u64 =
            parse(&lookup, "ROUTESYNC_SHUTDOWN_GRACE_MS", "milliseconds")?.unwrap_or(5000);

        let fetch_limit: i64 = parse(&lookup, "ROUTESYNC_SYNC_LIMIT", "integer")?
            .unwrap_or(200)
            .clamp(1, 200);

        let poll_interval_ms: u64 =
            parse(&lookup, "ROUTESYNC_SYNC_POLL_INTERVAL_MS", "milliseconds")?.unwrap_or(1000);

        let once = lookup("ROUTESYNC_SYNC_ONCE")
            .map(|v| v == "1" || v.to_lowercase() == "true")
            .unwrap_or(false);

        let log_level = lookup("ROUTESYNC_LOG_LEVEL").unwrap_or_else(|| "info".to_string());

        Ok(Self {
            event_source_url,
            bus_url,
            resync_interval: Duration::from_secs(resync_secs),
            queue_capacity: queue_capacity.max(1),
            backpressure,
            publish_max_attempts: publish_max_attempts.max(1),
            publish_timeout: Duration::from_millis(publish_timeout_ms.max(1)),
            publish_pacing,
            shutdown_grace: Duration::from_millis(shutdown_grace_ms),
            fetch_limit,
            poll_interval: Duration::from_millis(poll_interval_ms.max(50)),
            once,
            log_level,
        })
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            resync_interval: self.resync_interval,
            queue_capacity: self.queue_capacity,
            backpressure: self.backpressure,
            retry: RetryPolicy {
                max_attempts: self.publish_max_attempts,
                backoff: BackoffPolicy::default(),
            },
            pacing: self.publish_pacing,
            shutdown_grace: self.shutdown_grace,
        }
    }
}

fn parse<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str, unit: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    lookup(name)
        .map(|v| v.trim().parse::<T>())
        .transpose()
        .with_context(|| format!("{name} must be an integer ({unit})."))
}
