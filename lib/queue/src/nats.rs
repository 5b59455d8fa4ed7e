//! NATS JetStream implementations.
//!
//! - Jobs: a work-queue stream; `Nats-Msg-Id` carries the dedup key.
//! - Cron registrations: a key-value bucket, one key per registration.
//! - Dedup cache: a key-value bucket whose `max_age` is the cache TTL.
//!
//! KV keys may not contain `:`, so ids are stored base64url-encoded.

use crate::cache::{DedupCache, DedupMarker};
use crate::envelope::Envelope;
use crate::error::QueueError;
use crate::job::{EnqueueOptions, EnqueueOutcome, JobQueue, TriggerJob};
use crate::registry::{RepeatableJob, RepeatableJobStore};
use async_nats::jetstream::{self, AckKind, consumer, kv, stream};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use futures::{Stream, StreamExt, TryStreamExt};
use rootcause::Report;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Stream holding queued jobs.
const JOBS_STREAM_NAME: &str = "CHAINFLOW_JOBS";

/// Subject prefix for jobs; the job name is appended.
const JOBS_SUBJECT_PREFIX: &str = "chainflow.jobs";

/// Bucket holding cron registrations.
const REGISTRY_BUCKET_NAME: &str = "chainflow-cron";

/// Bucket holding processed execution ids.
const CACHE_BUCKET_NAME: &str = "chainflow-processed";

/// Durable consumer shared by all workers.
const CONSUMER_NAME: &str = "chainflow-workers";

/// Configuration for the NATS-backed queue, registry and cache.
#[derive(Debug, Clone)]
pub struct NatsConfig {
    /// NATS server URL.
    pub url: String,
    /// Jobs stream name (defaults to CHAINFLOW_JOBS).
    pub stream_name: Option<String>,
    /// Jobs subject prefix (defaults to chainflow.jobs).
    pub subject_prefix: Option<String>,
    /// Window in which a repeated dedup key is dropped by the server.
    pub duplicate_window: Duration,
    /// Unconsumed jobs older than this are discarded.
    pub max_age: Duration,
    /// Registry bucket name (defaults to chainflow-cron).
    pub registry_bucket_name: Option<String>,
    /// Cache bucket name (defaults to chainflow-processed).
    pub cache_bucket_name: Option<String>,
    /// Lifetime of a dedup cache entry.
    pub cache_ttl: Duration,
    /// Durable consumer name (defaults to chainflow-workers).
    pub consumer_name: Option<String>,
}

impl NatsConfig {
    /// Creates a config with default names and windows.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            stream_name: None,
            subject_prefix: None,
            duplicate_window: Duration::from_secs(10 * 60),
            max_age: Duration::from_secs(24 * 60 * 60),
            registry_bucket_name: None,
            cache_bucket_name: None,
            cache_ttl: Duration::from_secs(24 * 60 * 60),
            consumer_name: None,
        }
    }

    fn stream(&self) -> &str {
        self.stream_name.as_deref().unwrap_or(JOBS_STREAM_NAME)
    }

    fn subject_prefix(&self) -> &str {
        self.subject_prefix.as_deref().unwrap_or(JOBS_SUBJECT_PREFIX)
    }

    fn registry_bucket(&self) -> &str {
        self.registry_bucket_name
            .as_deref()
            .unwrap_or(REGISTRY_BUCKET_NAME)
    }

    fn cache_bucket(&self) -> &str {
        self.cache_bucket_name.as_deref().unwrap_or(CACHE_BUCKET_NAME)
    }

    fn consumer(&self) -> &str {
        self.consumer_name.as_deref().unwrap_or(CONSUMER_NAME)
    }

    fn job_subject(&self, job: &TriggerJob) -> String {
        format!("{}.{}", self.subject_prefix(), job.source.job_name())
    }
}

/// Connects to NATS and returns a JetStream context.
///
/// # Errors
///
/// Returns an error if the server is unreachable.
pub async fn connect(config: &NatsConfig) -> Result<jetstream::Context, Report<QueueError>> {
    let client = async_nats::connect(&config.url)
        .await
        .map_err(|e| QueueError::ConnectionFailed {
            message: e.to_string(),
        })?;
    Ok(jetstream::new(client))
}

fn encode_key(id: &str) -> String {
    URL_SAFE_NO_PAD.encode(id)
}

async fn open_bucket(
    jetstream: &jetstream::Context,
    bucket: &str,
    max_age: Duration,
) -> Result<kv::Store, Report<QueueError>> {
    if let Ok(store) = jetstream.get_key_value(bucket).await {
        return Ok(store);
    }
    let store = jetstream
        .create_key_value(kv::Config {
            bucket: bucket.to_string(),
            history: 1,
            max_age,
            storage: stream::StorageType::File,
            ..Default::default()
        })
        .await
        .map_err(|e| QueueError::SetupFailed {
            message: format!("failed to create bucket {bucket}: {e}"),
        })?;
    Ok(store)
}

/// JetStream-backed job queue.
#[derive(Clone)]
pub struct NatsJobQueue {
    jetstream: jetstream::Context,
    config: NatsConfig,
}

impl NatsJobQueue {
    /// Creates the queue, ensuring the jobs stream exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the stream cannot be created.
    pub async fn new(
        jetstream: jetstream::Context,
        config: NatsConfig,
    ) -> Result<Self, Report<QueueError>> {
        Self::ensure_stream(&jetstream, &config).await?;
        Ok(Self { jetstream, config })
    }

    async fn ensure_stream(
        jetstream: &jetstream::Context,
        config: &NatsConfig,
    ) -> Result<(), Report<QueueError>> {
        let stream_config = stream::Config {
            name: config.stream().to_string(),
            subjects: vec![format!("{}.>", config.subject_prefix())],
            storage: stream::StorageType::File,
            retention: stream::RetentionPolicy::WorkQueue,
            duplicate_window: config.duplicate_window,
            max_age: config.max_age,
            ..Default::default()
        };

        jetstream
            .get_or_create_stream(stream_config)
            .await
            .map_err(|e| QueueError::SetupFailed {
                message: format!("failed to create jobs stream: {e}"),
            })?;
        Ok(())
    }
}

#[async_trait]
impl JobQueue for NatsJobQueue {
    #[instrument(skip_all, fields(execution_id = %job.execution_id, source = %job.source))]
    async fn enqueue(
        &self,
        job: &TriggerJob,
        options: &EnqueueOptions,
    ) -> Result<EnqueueOutcome, Report<QueueError>> {
        let subject = self.config.job_subject(job);
        let bytes = job.to_bytes()?;

        let publish_failed = |e: &dyn std::fmt::Display| QueueError::PublishFailed {
            message: e.to_string(),
        };

        let ack = match &options.dedup_key {
            Some(key) => {
                let mut headers = async_nats::HeaderMap::new();
                headers.insert(async_nats::header::NATS_MESSAGE_ID, key.as_str());
                self.jetstream
                    .publish_with_headers(subject, headers, bytes.into())
                    .await
                    .map_err(|e| publish_failed(&e))?
                    .await
                    .map_err(|e| publish_failed(&e))?
            }
            None => self
                .jetstream
                .publish(subject, bytes.into())
                .await
                .map_err(|e| publish_failed(&e))?
                .await
                .map_err(|e| publish_failed(&e))?,
        };

        if ack.duplicate {
            debug!("duplicate job dropped by the server");
            Ok(EnqueueOutcome::Duplicate)
        } else {
            debug!(sequence = ack.sequence, "job enqueued");
            Ok(EnqueueOutcome::Enqueued)
        }
    }
}

/// Repeatable-job registry in a KV bucket.
#[derive(Clone)]
pub struct NatsRepeatableJobStore {
    store: kv::Store,
}

impl NatsRepeatableJobStore {
    /// Opens or creates the registry bucket.
    ///
    /// # Errors
    ///
    /// Returns an error if the bucket cannot be created.
    pub async fn new(
        jetstream: &jetstream::Context,
        config: &NatsConfig,
    ) -> Result<Self, Report<QueueError>> {
        let store = open_bucket(jetstream, config.registry_bucket(), Duration::ZERO).await?;
        Ok(Self { store })
    }

    fn registry_error(e: impl std::fmt::Display) -> QueueError {
        QueueError::Registry {
            message: e.to_string(),
        }
    }

    async fn read(&self, key: &str) -> Result<Option<RepeatableJob>, Report<QueueError>> {
        let Some(bytes) = self.store.get(key).await.map_err(Self::registry_error)? else {
            return Ok(None);
        };
        let envelope: Envelope<RepeatableJob> =
            Envelope::from_json_bytes(&bytes).map_err(|e| QueueError::Serialization {
                message: format!("malformed registration {key}: {e}"),
            })?;
        Ok(Some(envelope.into_payload()))
    }
}

#[async_trait]
impl RepeatableJobStore for NatsRepeatableJobStore {
    async fn list(&self) -> Result<Vec<RepeatableJob>, Report<QueueError>> {
        let keys: Vec<String> = self
            .store
            .keys()
            .await
            .map_err(Self::registry_error)?
            .try_collect()
            .await
            .map_err(Self::registry_error)?;

        let mut jobs = Vec::with_capacity(keys.len());
        for key in keys {
            match self.read(&key).await {
                Ok(Some(job)) => jobs.push(job),
                Ok(None) => {}
                Err(e) => warn!(key = %key, error = %e.current_context(), "skipping unreadable registration"),
            }
        }
        Ok(jobs)
    }

    async fn get(&self, id: &str) -> Result<Option<RepeatableJob>, Report<QueueError>> {
        self.read(&encode_key(id)).await
    }

    async fn put(&self, job: &RepeatableJob) -> Result<(), Report<QueueError>> {
        let bytes = Envelope::new(job)
            .to_json_bytes()
            .map_err(|e| QueueError::Serialization {
                message: format!("failed to encode registration {}: {e}", job.id),
            })?;
        self.store
            .put(encode_key(&job.id), bytes.into())
            .await
            .map_err(Self::registry_error)?;
        Ok(())
    }

    async fn remove(&self, id: &str) -> Result<bool, Report<QueueError>> {
        let key = encode_key(id);
        if self
            .store
            .get(&key)
            .await
            .map_err(Self::registry_error)?
            .is_none()
        {
            return Ok(false);
        }
        self.store
            .delete(&key)
            .await
            .map_err(Self::registry_error)?;
        Ok(true)
    }
}

/// Dedup cache in a KV bucket with a bucket-level TTL.
#[derive(Clone)]
pub struct NatsDedupCache {
    store: kv::Store,
}

impl NatsDedupCache {
    /// Opens or creates the cache bucket.
    ///
    /// # Errors
    ///
    /// Returns an error if the bucket cannot be created.
    pub async fn new(
        jetstream: &jetstream::Context,
        config: &NatsConfig,
    ) -> Result<Self, Report<QueueError>> {
        let store = open_bucket(jetstream, config.cache_bucket(), config.cache_ttl).await?;
        Ok(Self { store })
    }

    fn cache_error(e: impl std::fmt::Display) -> QueueError {
        QueueError::Cache {
            message: e.to_string(),
        }
    }
}

#[async_trait]
impl DedupCache for NatsDedupCache {
    async fn get(&self, execution_id: &str) -> Result<Option<DedupMarker>, Report<QueueError>> {
        let Some(bytes) = self
            .store
            .get(encode_key(execution_id))
            .await
            .map_err(Self::cache_error)?
        else {
            return Ok(None);
        };
        let marker = serde_json::from_slice(&bytes).map_err(Self::cache_error)?;
        Ok(Some(marker))
    }

    async fn set(&self, execution_id: &str, marker: DedupMarker) -> Result<(), Report<QueueError>> {
        let bytes = serde_json::to_vec(&marker).map_err(Self::cache_error)?;
        self.store
            .put(encode_key(execution_id), bytes.into())
            .await
            .map_err(Self::cache_error)?;
        Ok(())
    }
}

/// Redelivery settings for the worker consumer.
#[derive(Debug, Clone, Copy)]
pub struct ConsumerSettings {
    /// Time a worker holds a job before the server redelivers it.
    pub ack_wait: Duration,
    /// Total deliveries before a job is dropped.
    pub max_deliver: i64,
}

impl Default for ConsumerSettings {
    fn default() -> Self {
        Self {
            ack_wait: Duration::from_secs(60),
            max_deliver: 5,
        }
    }
}

/// Durable pull consumer over the jobs stream.
pub struct JobConsumer {
    consumer: consumer::Consumer<consumer::pull::Config>,
}

impl JobConsumer {
    /// Binds to (or creates) the shared durable consumer.
    ///
    /// # Errors
    ///
    /// Returns an error if the stream or consumer cannot be opened.
    pub async fn new(
        jetstream: &jetstream::Context,
        config: &NatsConfig,
        settings: ConsumerSettings,
    ) -> Result<Self, Report<QueueError>> {
        let stream = jetstream
            .get_stream(config.stream())
            .await
            .map_err(|e| QueueError::SetupFailed {
                message: format!("failed to get jobs stream: {e}"),
            })?;

        let consumer = stream
            .get_or_create_consumer(
                config.consumer(),
                consumer::pull::Config {
                    durable_name: Some(config.consumer().to_string()),
                    ack_policy: consumer::AckPolicy::Explicit,
                    ack_wait: settings.ack_wait,
                    max_deliver: settings.max_deliver,
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| QueueError::SetupFailed {
                message: format!("failed to create consumer: {e}"),
            })?;

        Ok(Self { consumer })
    }

    /// Streams deliveries until the connection closes.
    ///
    /// # Errors
    ///
    /// Returns an error if the pull subscription cannot be started.
    pub async fn deliveries(
        &self,
    ) -> Result<impl Stream<Item = Result<Delivery, Report<QueueError>>> + Send, Report<QueueError>>
    {
        let messages = self
            .consumer
            .messages()
            .await
            .map_err(|e| QueueError::ConsumeFailed {
                message: e.to_string(),
            })?;

        Ok(messages.map(|message| {
            message
                .map(|message| Delivery { message })
                .map_err(|e| {
                    QueueError::ConsumeFailed {
                        message: e.to_string(),
                    }
                    .into()
                })
        }))
    }
}

/// A job pulled from the queue, awaiting acknowledgement.
pub struct Delivery {
    message: jetstream::Message,
}

impl Delivery {
    /// Decodes the job.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload is not a current-version job.
    pub fn job(&self) -> Result<TriggerJob, Report<QueueError>> {
        TriggerJob::from_bytes(&self.message.payload)
    }

    /// Delivery attempt, starting at 1.
    #[must_use]
    pub fn attempt(&self) -> i64 {
        self.message.info().map(|info| info.delivered).unwrap_or(1)
    }

    /// Acknowledges the job; it will not be delivered again.
    ///
    /// # Errors
    ///
    /// Returns an error if the acknowledgement is not sent.
    pub async fn ack(&self) -> Result<(), Report<QueueError>> {
        self.message.ack().await.map_err(|e| {
            QueueError::AckFailed {
                message: e.to_string(),
            }
            .into()
        })
    }

    /// Asks for redelivery after `delay`.
    ///
    /// # Errors
    ///
    /// Returns an error if the negative acknowledgement is not sent.
    pub async fn nak(&self, delay: Duration) -> Result<(), Report<QueueError>> {
        self.message
            .ack_with(AckKind::Nak(Some(delay)))
            .await
            .map_err(|e| {
                QueueError::AckFailed {
                    message: e.to_string(),
                }
                .into()
            })
    }

    /// Drops a job that can never succeed.
    ///
    /// # Errors
    ///
    /// Returns an error if the termination is not sent.
    pub async fn term(&self) -> Result<(), Report<QueueError>> {
        self.message.ack_with(AckKind::Term).await.map_err(|e| {
            QueueError::AckFailed {
                message: e.to_string(),
            }
            .into()
        })
    }
}
