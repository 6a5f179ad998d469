use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::{aio::ConnectionManager, Client};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::config::QueueConfig;

const QUEUE_KEY_PREFIX: &str = "queue:";

/// Background work handed to external workers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Job {
    SendVerificationEmail { user_id: String },
    SendPasswordResetEmail { user_id: String },
    SendPasswordChangedEmail { user_id: String },
    SendUserDestroyedEmail { email: String },
    CleanupDestroyedUserFiles { user_id: String },
}

impl Job {
    pub fn job_type(&self) -> &'static str {
        match self {
            Job::SendVerificationEmail { .. } => "sendVerificationEmail",
            Job::SendPasswordResetEmail { .. } => "sendPasswordResetEmail",
            Job::SendPasswordChangedEmail { .. } => "sendPasswordChangedEmail",
            Job::SendUserDestroyedEmail { .. } => "sendUserDestroyedEmail",
            Job::CleanupDestroyedUserFiles { .. } => "cleanupDestroyedUserFiles",
        }
    }

    pub fn payload(&self) -> serde_json::Value {
        match self {
            Job::SendVerificationEmail { user_id }
            | Job::SendPasswordResetEmail { user_id }
            | Job::SendPasswordChangedEmail { user_id }
            | Job::CleanupDestroyedUserFiles { user_id } => json!({ "userId": user_id }),
            Job::SendUserDestroyedEmail { email } => json!({ "email": email }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
    Fixed,
    Exponential,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub backoff: BackoffKind,
    pub delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: BackoffKind::Exponential,
            delay_ms: 10_000,
        }
    }
}

/// Wire format pushed onto `queue:<job_type>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobEnvelope {
    pub id: Uuid,
    pub job_type: String,
    pub payload: serde_json::Value,
    pub retry_policy: RetryPolicy,
    pub enqueued_at: DateTime<Utc>,
}

impl JobEnvelope {
    pub fn new(job: &Job, retry_policy: RetryPolicy) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_type: job.job_type().to_string(),
            payload: job.payload(),
            retry_policy,
            enqueued_at: Utc::now(),
        }
    }

    pub fn queue_key(&self) -> String {
        format!("{}{}", QUEUE_KEY_PREFIX, self.job_type)
    }
}

#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(&self, job: Job, retry_policy: RetryPolicy) -> Result<(), anyhow::Error>;
    async fn health_check(&self) -> Result<(), anyhow::Error>;
}

#[derive(Clone)]
pub struct RedisJobQueue {
    manager: ConnectionManager,
}

impl RedisJobQueue {
    pub async fn connect(config: &QueueConfig) -> Result<Self, anyhow::Error> {
        tracing::info!("Connecting to job queue");
        let client = Client::open(config.url.expose_secret().as_str())?;

        let manager = client.get_connection_manager().await.map_err(|e| {
            tracing::error!("Failed to get job queue connection manager: {}", e);
            anyhow::anyhow!("Failed to connect to job queue: {}", e)
        })?;

        tracing::info!("Successfully connected to job queue");

        Ok(Self { manager })
    }
}

#[async_trait]
impl JobQueue for RedisJobQueue {
    async fn enqueue(&self, job: Job, retry_policy: RetryPolicy) -> Result<(), anyhow::Error> {
        let envelope = JobEnvelope::new(&job, retry_policy);
        let body = serde_json::to_string(&envelope)?;

        let mut conn = self.manager.clone();
        let _: i64 = redis::cmd("LPUSH")
            .arg(envelope.queue_key())
            .arg(body)
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to enqueue {}: {}", envelope.job_type, e))?;

        tracing::debug!(job_type = %envelope.job_type, job_id = %envelope.id, "Job enqueued");
        Ok(())
    }

    async fn health_check(&self) -> Result<(), anyhow::Error> {
        let mut conn = self.manager.clone();
        redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Job queue health check failed: {}", e))
    }
}

/// Records enqueued jobs in memory for tests.
#[derive(Default)]
pub struct InMemoryJobQueue {
    jobs: std::sync::Mutex<Vec<JobEnvelope>>,
    unavailable: std::sync::atomic::AtomicBool,
}

impl InMemoryJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an unreachable queue.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable
            .store(unavailable, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn enqueued(&self) -> Vec<JobEnvelope> {
        self.jobs.lock().map(|jobs| jobs.clone()).unwrap_or_default()
    }

    pub fn job_types(&self) -> Vec<String> {
        self.enqueued().into_iter().map(|job| job.job_type).collect()
    }
}

#[async_trait]
impl JobQueue for InMemoryJobQueue {
    async fn enqueue(&self, job: Job, retry_policy: RetryPolicy) -> Result<(), anyhow::Error> {
        self.health_check().await?;
        self.jobs
            .lock()
            .map_err(|e| anyhow::anyhow!("Mock queue mutex poisoned: {}", e))?
            .push(JobEnvelope::new(&job, retry_policy));
        Ok(())
    }

    async fn health_check(&self) -> Result<(), anyhow::Error> {
        if self.unavailable.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(anyhow::anyhow!("Job queue is unavailable"));
        }
        Ok(())
    }
}
