use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::duration::KDuration;
use crate::error::CoreError;

/// Supported HTTP methods for a job's outgoing call. Deliberately a closed
/// set — only GET and POST are dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum HttpMethod {
    #[serde(rename = "GET")]
    Get,
    #[serde(rename = "POST")]
    Post,
}

/// Accepts any case on the wire (`"get"`, `"Post"`, ...) and normalises to
/// the closed set; method names are case-insensitive on input but always
/// rendered uppercase.
impl<'de> Deserialize<'de> for HttpMethod {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        HttpMethod::from_str(&raw).map_err(serde::de::Error::custom)
    }
}

impl FromStr for HttpMethod {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(HttpMethod::Get),
            "POST" => Ok(HttpMethod::Post),
            other => Err(CoreError::Validation(format!(
                "http.method must be GET or POST, got {other:?}"
            ))),
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HttpMethod::Get => write!(f, "GET"),
            HttpMethod::Post => write!(f, "POST"),
        }
    }
}

impl From<HttpMethod> for reqwest::Method {
    fn from(method: HttpMethod) -> Self {
        match method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
        }
    }
}

/// The HTTP call a job fires on each attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpConfig {
    pub method: HttpMethod,
    pub url: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub body: String,
}

impl HttpConfig {
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.url.trim().is_empty() {
            return Err(CoreError::Validation("http.url is required".into()));
        }
        url::Url::parse(&self.url)
            .map_err(|e| CoreError::Validation(format!("http.url is not a valid URL: {e}")))?;
        Ok(())
    }
}

/// Discriminates a one-shot fire from a periodic one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleKind {
    Once,
    Every,
}

/// A job's schedule. Kept as a single flat struct (rather than a Rust tagged
/// enum) so the `kind` discriminant sits alongside its siblings on the wire,
/// matching the document shape callers persist and PATCH against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
    pub kind: ScheduleKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "KDuration::is_zero")]
    pub every: KDuration,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "KDuration::is_zero")]
    pub jitter: KDuration,
}

impl Schedule {
    pub fn validate(&self, now: DateTime<Utc>) -> Result<(), CoreError> {
        match self.kind {
            ScheduleKind::Once => {
                let run_at = self
                    .run_at
                    .ok_or_else(|| CoreError::Validation("run_at is required for once".into()))?;
                if run_at <= now {
                    return Err(CoreError::Validation(
                        "run_at must be strictly in the future".into(),
                    ));
                }
            }
            ScheduleKind::Every => {
                if self.every.as_std().is_zero() {
                    return Err(CoreError::Validation(
                        "every must be greater than 0 for every schedule".into(),
                    ));
                }
            }
        }
        Ok(())
    }
}

/// Terminal status recorded on the job after its most recent execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    #[default]
    #[serde(rename = "")]
    None,
    Success,
    Failed,
    Timeout,
    Missed,
    Paused,
    Skipped,
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::None => "",
            JobStatus::Success => "success",
            JobStatus::Failed => "failed",
            JobStatus::Timeout => "timeout",
            JobStatus::Missed => "missed",
            JobStatus::Paused => "paused",
            JobStatus::Skipped => "skipped",
        };
        write!(f, "{s}")
    }
}

/// Currently the only supported job type; kept as an enum (rather than
/// inlining the literal "http") so a future job type is a compile error at
/// every match site instead of a silent string comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobType {
    Http,
}

impl Default for JobType {
    fn default() -> Self {
        JobType::Http
    }
}

/// The central entity: a scheduled HTTP invocation with retry and timeout
/// policy, plus the bookkeeping fields the scheduler and executor write
/// back after each run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    #[serde(default)]
    pub id: String,
    pub name: String,
    pub enabled: bool,
    #[serde(rename = "type")]
    pub job_type: JobType,
    pub http: HttpConfig,
    pub schedule: Schedule,
    pub timeout: KDuration,
    pub max_retries: u32,
    pub retry_backoff: KDuration,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_run_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_status: JobStatus,
    #[serde(default)]
    pub last_error: String,
}

impl Job {
    /// Applies the create-time defaults for fields left absent or zero.
    pub fn apply_defaults(&mut self) {
        if self.http.headers.is_empty() {
            self.http.headers = HashMap::new();
        }
        if self.timeout.is_zero() {
            self.timeout = KDuration::from(std::time::Duration::from_secs(10));
        }
        if self.max_retries == 0 {
            self.max_retries = 3;
        }
        if self.retry_backoff.is_zero() {
            self.retry_backoff = KDuration::from(std::time::Duration::from_secs(5));
        }
    }

    /// Full validation pass run before any `Store::put`.
    pub fn validate(&self, now: DateTime<Utc>) -> Result<(), CoreError> {
        if self.name.trim().is_empty() {
            return Err(CoreError::Validation("name is required".into()));
        }
        self.http.validate()?;
        self.schedule.validate(now)?;
        if self.timeout.as_std().is_zero() {
            return Err(CoreError::Validation("timeout must be greater than 0".into()));
        }
        Ok(())
    }
}

/// The persisted document: the whole job table plus a version tag and a
/// last-write timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStore {
    pub version: u32,
    pub updated_at: DateTime<Utc>,
    pub jobs: Vec<Job>,
}

pub const CURRENT_VERSION: u32 = 1;

impl Default for JobStore {
    fn default() -> Self {
        JobStore {
            version: CURRENT_VERSION,
            updated_at: Utc::now(),
            jobs: Vec::new(),
        }
    }
}
