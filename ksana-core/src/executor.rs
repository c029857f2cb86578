use std::sync::Arc;
use std::time::{Duration as StdDuration, Instant};

use chrono::Utc;
use rand::RngCore;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::clock::Clock;
use crate::model::{HttpMethod, Job, JobStatus};
use crate::store::JobStore;

const RUN_ID_HEADER: &str = "X-Ksana-Run-Id";

/// A classified outcome of one HTTP attempt. Kept as a structured enum
/// (rather than matching substrings in a rendered error, as the original
/// service did) so retry/terminal-status decisions are exhaustive-matched
/// at compile time; `message()` still renders the substrings
/// (`"timeout"`, `"status 5"`, ...) a log-scraping caller might expect.
#[derive(Debug, Clone)]
enum Failure {
    Timeout(String),
    ConnectionRefused(String),
    DnsFailure(String),
    HttpStatus(u16, String),
    Other(String),
}

impl Failure {
    fn message(&self) -> String {
        match self {
            Failure::Timeout(detail) => format!("request timeout: {detail}"),
            Failure::ConnectionRefused(detail) => format!("connection refused: {detail}"),
            Failure::DnsFailure(detail) => format!("no such host: {detail}"),
            Failure::HttpStatus(code, reason) => {
                format!("HTTP request failed with status {code}: {reason}")
            }
            Failure::Other(detail) => format!("HTTP request failed: {detail}"),
        }
    }

    fn is_retryable(&self) -> bool {
        match self {
            Failure::Timeout(_) | Failure::ConnectionRefused(_) | Failure::DnsFailure(_) => true,
            Failure::HttpStatus(code, _) => *code == 408 || *code == 429 || (500..600).contains(code),
            Failure::Other(_) => false,
        }
    }

    fn terminal_status(&self) -> JobStatus {
        match self {
            Failure::Timeout(_) => JobStatus::Timeout,
            _ => JobStatus::Failed,
        }
    }
}

fn classify_transport_error(err: &reqwest::Error) -> Failure {
    if err.is_timeout() {
        return Failure::Timeout(err.to_string());
    }
    if err.is_connect() {
        let rendered = err.to_string();
        if rendered.contains("dns error") || rendered.contains("failed to lookup address") {
            return Failure::DnsFailure(rendered);
        }
        return Failure::ConnectionRefused(rendered);
    }
    Failure::Other(err.to_string())
}

/// Bounded-concurrency HTTP executor. Owns one worker semaphore of capacity
/// `W` and a connection-reusing `reqwest::Client`; every `execute` call
/// holds a permit for its full attempt loop, including retries.
pub struct Executor {
    client: reqwest::Client,
    store: Arc<dyn JobStore>,
    clock: Arc<dyn Clock>,
    semaphore: Arc<tokio::sync::Semaphore>,
    workers: u32,
    default_timeout: StdDuration,
}

impl Executor {
    pub fn new(
        workers: usize,
        default_timeout: StdDuration,
        store: Arc<dyn JobStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(100)
            .pool_idle_timeout(StdDuration::from_secs(90))
            .connect_timeout(StdDuration::from_secs(10))
            .user_agent("ksana-scheduler")
            .build()
            .expect("failed to construct reqwest client for executor");

        Executor {
            client,
            store,
            clock,
            semaphore: Arc::new(tokio::sync::Semaphore::new(workers)),
            workers: workers as u32,
            default_timeout,
        }
    }

    /// Runs a job to completion: acquires a worker slot, attempts the HTTP
    /// call up to `max_retries + 1` times with `retry_backoff` between
    /// attempts, and writes the terminal status back through the store.
    /// Returns once the terminal status has been recorded (or the write
    /// itself failed, which is logged but not propagated).
    pub async fn execute(&self, job: Job, cancel: &CancellationToken) {
        let permit = tokio::select! {
            permit = self.semaphore.acquire() => match permit {
                Ok(permit) => permit,
                Err(_) => return,
            },
            _ = cancel.cancelled() => return,
        };

        let run_id = Self::generate_run_id();
        let start = Instant::now();
        let started_at = self.clock.now();

        info!(job_id = %job.id, job_name = %job.name, run_id = %run_id, "executing job");

        let timeout = if job.timeout.is_zero() {
            self.default_timeout
        } else {
            job.timeout.as_std()
        };

        let mut last_failure: Option<Failure> = None;
        let max_attempts = job.max_retries + 1;

        for attempt in 0..max_attempts {
            if attempt > 0 {
                let backoff = job.retry_backoff.as_std();
                tokio::select! {
                    _ = self.clock.sleep(backoff) => {}
                    _ = cancel.cancelled() => {
                        drop(permit);
                        return;
                    }
                }
            }

            let outcome = tokio::select! {
                outcome = tokio::time::timeout(timeout, self.attempt_once(&job, &run_id)) => outcome,
                _ = cancel.cancelled() => {
                    drop(permit);
                    return;
                }
            };

            match outcome {
                Ok(Ok(())) => {
                    last_failure = None;
                    break;
                }
                Ok(Err(failure)) => {
                    let retryable = failure.is_retryable();
                    last_failure = Some(failure);
                    if !retryable {
                        break;
                    }
                }
                Err(_elapsed) => {
                    last_failure = Some(Failure::Timeout(format!(
                        "attempt deadline exceeded after {timeout:?}"
                    )));
                    // timeouts are always retryable per the classification rules.
                }
            }
        }

        drop(permit);

        let (status, message) = match &last_failure {
            None => (JobStatus::Success, String::new()),
            Some(failure) => (failure.terminal_status(), failure.message()),
        };

        if status == JobStatus::Success {
            info!(job_id = %job.id, run_id = %run_id, elapsed = ?start.elapsed(), "job succeeded");
        } else {
            error!(job_id = %job.id, run_id = %run_id, error = %message, "job failed");
        }

        self.write_back(&job, status, message, started_at).await;
    }

    async fn attempt_once(&self, job: &Job, run_id: &str) -> Result<(), Failure> {
        let method: reqwest::Method = job.http.method.into();
        let url = job.http.url.clone();

        let mut headers = HeaderMap::new();
        for (key, value) in &job.http.headers {
            if let (Ok(name), Ok(val)) = (
                HeaderName::from_bytes(key.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                headers.insert(name, val);
            }
        }
        headers.insert(
            HeaderName::from_bytes(RUN_ID_HEADER.as_bytes()).expect("header name is valid ascii"),
            HeaderValue::from_str(run_id).expect("run id is valid ascii hex"),
        );

        if job.http.method == HttpMethod::Post
            && !job.http.body.is_empty()
            && !headers.contains_key(CONTENT_TYPE)
        {
            let trimmed = job.http.body.trim_start();
            let content_type = if trimmed.starts_with('{') || trimmed.starts_with('[') {
                "application/json"
            } else {
                "text/plain"
            };
            headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
        }

        let response = self
            .client
            .request(method, url.as_str())
            .headers(headers)
            .body(job.http.body.clone())
            .send()
            .await
            .map_err(|err| classify_transport_error(&err))?;

        let status = response.status();
        // Drain and discard the body to free the connection back to the pool.
        let _ = response.bytes().await;

        if status.as_u16() >= 200 && status.as_u16() < 300 {
            return Ok(());
        }

        Err(Failure::HttpStatus(
            status.as_u16(),
            status.canonical_reason().unwrap_or("unknown").to_owned(),
        ))
    }

    async fn write_back(
        &self,
        job: &Job,
        status: JobStatus,
        error: String,
        run_time: chrono::DateTime<Utc>,
    ) {
        let mut updated = job.clone();
        updated.last_run_at = Some(run_time);
        updated.last_status = status;
        updated.last_error = error;

        if let Err(err) = self.store.put(updated).await {
            warn!(job_id = %job.id, error = %err, "failed to write back job status");
        }
    }

    fn generate_run_id() -> String {
        let mut bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut bytes);
        hex::encode(bytes)
    }

    /// Waits until every in-flight execution has released its worker slot,
    /// or `timeout` elapses, whichever comes first. Returns `true` if the
    /// executor fully drained.
    pub async fn shutdown(&self, timeout: StdDuration) -> bool {
        tokio::time::timeout(timeout, self.semaphore.acquire_many(self.workers))
            .await
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::RealClock;
    use crate::model::{HttpConfig, JobType, Schedule, ScheduleKind};
    use crate::duration::KDuration;
    use crate::store::tests_support::InMemoryStore;
    use std::collections::HashMap;

    fn base_job(url: String) -> Job {
        Job {
            id: "job-1".to_owned(),
            name: "test".to_owned(),
            enabled: true,
            job_type: JobType::Http,
            http: HttpConfig {
                method: HttpMethod::Post,
                url,
                headers: HashMap::new(),
                body: String::new(),
            },
            schedule: Schedule {
                kind: ScheduleKind::Once,
                run_at: None,
                every: KDuration::ZERO,
                start_at: None,
                jitter: KDuration::ZERO,
            },
            timeout: KDuration::from(StdDuration::from_millis(500)),
            max_retries: 0,
            retry_backoff: KDuration::from(StdDuration::from_millis(10)),
            last_run_at: None,
            next_run_at: None,
            last_status: JobStatus::None,
            last_error: String::new(),
        }
    }

    #[tokio::test]
    async fn unreachable_host_is_marked_failed_with_connection_message() {
        let store = Arc::new(InMemoryStore::new());
        let clock = Arc::new(RealClock);
        let executor = Executor::new(1, StdDuration::from_secs(2), store.clone(), clock);
        let cancel = CancellationToken::new();

        // Port 1 is reserved and nothing listens there in any CI sandbox,
        // so the connection attempt fails fast and deterministically.
        let job = base_job("http://127.0.0.1:1/".to_owned());
        let job_id = job.id.clone();
        executor.execute(job, &cancel).await;

        let stored = store.get(&job_id).await.unwrap();
        assert_eq!(stored.last_status, JobStatus::Failed);
        assert!(!stored.last_error.is_empty());
    }

    #[tokio::test]
    async fn retry_budget_issues_exactly_max_retries_plus_one_attempts() {
        use httpmock::{Method, MockServer};

        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(Method::POST).path("/hook");
            then.status(500).body("server error");
        });

        let store = Arc::new(InMemoryStore::new());
        let clock = Arc::new(RealClock);
        let executor = Executor::new(1, StdDuration::from_secs(2), store.clone(), clock);
        let cancel = CancellationToken::new();

        let mut job = base_job(server.url("/hook"));
        job.max_retries = 2;
        job.retry_backoff = KDuration::from(StdDuration::from_millis(20));
        let job_id = job.id.clone();

        let start = Instant::now();
        executor.execute(job, &cancel).await;
        let elapsed = start.elapsed();

        mock.assert_hits(3);
        assert!(elapsed >= StdDuration::from_millis(40));

        let stored = store.get(&job_id).await.unwrap();
        assert_eq!(stored.last_status, JobStatus::Failed);
        assert!(stored.last_error.contains("status 500"));
    }

    #[tokio::test]
    async fn shutdown_drains_when_idle() {
        let store = Arc::new(InMemoryStore::new());
        let clock = Arc::new(RealClock);
        let executor = Executor::new(2, StdDuration::from_secs(1), store, clock);
        assert!(executor.shutdown(StdDuration::from_millis(100)).await);
    }

    #[test]
    fn failure_message_contains_legacy_substrings() {
        let f = Failure::HttpStatus(500, "Internal Server Error".to_owned());
        assert!(f.message().contains("status 5"));
        assert!(f.is_retryable());

        let f = Failure::HttpStatus(429, "Too Many Requests".to_owned());
        assert!(f.message().contains("status 429"));
        assert!(f.is_retryable());

        let f = Failure::Timeout("deadline".to_owned());
        assert!(f.message().contains("timeout"));
        assert_eq!(f.terminal_status(), JobStatus::Timeout);
    }
}
