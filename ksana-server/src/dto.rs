use std::collections::HashMap;

use ksana_core::{HttpConfig, HttpMethod, Job, JobStatus, JobType, KDuration, Schedule};
use serde::Deserialize;

/// The `http` block of a job as it arrives over the wire. `method` is
/// optional here (defaulted to `POST` by `apply_defaults` downstream) so a
/// caller can omit it entirely, matching the "defaults applied on create"
/// rule.
#[derive(Debug, Deserialize)]
pub struct HttpRequestDto {
    pub method: Option<HttpMethod>,
    pub url: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub body: String,
}

impl HttpRequestDto {
    fn into_http_config(self) -> HttpConfig {
        HttpConfig {
            method: self.method.unwrap_or(HttpMethod::Post),
            url: self.url,
            headers: self.headers,
            body: self.body,
        }
    }
}

/// `POST /jobs` body. Every field absent here falls to the create-time
/// defaults in `Job::apply_defaults`.
#[derive(Debug, Deserialize)]
pub struct CreateJobRequest {
    pub name: String,
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(rename = "type", default)]
    pub job_type: Option<JobType>,
    pub http: HttpRequestDto,
    pub schedule: Schedule,
    #[serde(default)]
    pub timeout: Option<KDuration>,
    #[serde(default)]
    pub max_retries: Option<u32>,
    #[serde(default)]
    pub retry_backoff: Option<KDuration>,
}

impl CreateJobRequest {
    pub fn into_job(self) -> Job {
        let mut job = Job {
            id: String::new(),
            name: self.name,
            enabled: self.enabled.unwrap_or(true),
            job_type: self.job_type.unwrap_or(JobType::Http),
            http: self.http.into_http_config(),
            schedule: self.schedule,
            timeout: self.timeout.unwrap_or(KDuration::ZERO),
            max_retries: self.max_retries.unwrap_or(0),
            retry_backoff: self.retry_backoff.unwrap_or(KDuration::ZERO),
            last_run_at: None,
            next_run_at: None,
            last_status: JobStatus::None,
            last_error: String::new(),
        };
        job.apply_defaults();
        job
    }
}

/// `PATCH /jobs/:id` body. Every field is optional; only the ones present
/// are applied onto the stored record (field-wise partial update, not a
/// merge-patch of nested objects — an `http` or `schedule` present here
/// replaces that block wholesale).
#[derive(Debug, Default, Deserialize)]
pub struct UpdateJobRequest {
    pub name: Option<String>,
    pub enabled: Option<bool>,
    pub http: Option<HttpRequestDto>,
    pub schedule: Option<Schedule>,
    pub timeout: Option<KDuration>,
    pub max_retries: Option<u32>,
    pub retry_backoff: Option<KDuration>,
}

impl UpdateJobRequest {
    /// A `schedule` replacement clears `next_run_at` so the scheduler
    /// recomputes it from scratch the next time it considers this job,
    /// rather than keeping a stale fire time from the old cadence.
    pub fn apply_to(self, mut existing: Job) -> Job {
        if let Some(name) = self.name {
            existing.name = name;
        }
        if let Some(enabled) = self.enabled {
            existing.enabled = enabled;
        }
        if let Some(http) = self.http {
            existing.http = http.into_http_config();
        }
        if let Some(schedule) = self.schedule {
            existing.schedule = schedule;
            existing.next_run_at = None;
        }
        if let Some(timeout) = self.timeout {
            existing.timeout = timeout;
        }
        if let Some(max_retries) = self.max_retries {
            existing.max_retries = max_retries;
        }
        if let Some(retry_backoff) = self.retry_backoff {
            existing.retry_backoff = retry_backoff;
        }
        existing
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ksana_core::ScheduleKind;

    fn schedule() -> Schedule {
        Schedule {
            kind: ScheduleKind::Every,
            run_at: None,
            every: KDuration::from(std::time::Duration::from_secs(60)),
            start_at: None,
            jitter: KDuration::ZERO,
        }
    }

    #[test]
    fn create_applies_defaults_for_absent_fields() {
        let req = CreateJobRequest {
            name: "nightly-sync".to_owned(),
            enabled: None,
            job_type: None,
            http: HttpRequestDto {
                method: None,
                url: "https://example.com/hook".to_owned(),
                headers: HashMap::new(),
                body: String::new(),
            },
            schedule: schedule(),
            timeout: None,
            max_retries: None,
            retry_backoff: None,
        };

        let job = req.into_job();
        assert!(job.enabled);
        assert_eq!(job.job_type, JobType::Http);
        assert_eq!(job.http.method, HttpMethod::Post);
        assert_eq!(job.timeout.as_std(), std::time::Duration::from_secs(10));
        assert_eq!(job.max_retries, 3);
        assert_eq!(job.retry_backoff.as_std(), std::time::Duration::from_secs(5));
    }

    #[test]
    fn update_only_touches_present_fields() {
        let existing = CreateJobRequest {
            name: "original".to_owned(),
            enabled: Some(true),
            job_type: None,
            http: HttpRequestDto {
                method: Some(HttpMethod::Get),
                url: "https://example.com/a".to_owned(),
                headers: HashMap::new(),
                body: String::new(),
            },
            schedule: schedule(),
            timeout: Some(KDuration::from(std::time::Duration::from_secs(5))),
            max_retries: Some(1),
            retry_backoff: Some(KDuration::from(std::time::Duration::from_secs(1))),
        }
        .into_job();

        let patch = UpdateJobRequest {
            name: Some("renamed".to_owned()),
            ..Default::default()
        };
        let updated = patch.apply_to(existing.clone());

        assert_eq!(updated.name, "renamed");
        assert_eq!(updated.http.url, existing.http.url);
        assert_eq!(updated.max_retries, existing.max_retries);
    }

    #[test]
    fn update_with_schedule_clears_next_run_at() {
        let mut existing = CreateJobRequest {
            name: "original".to_owned(),
            enabled: Some(true),
            job_type: None,
            http: HttpRequestDto {
                method: None,
                url: "https://example.com/a".to_owned(),
                headers: HashMap::new(),
                body: String::new(),
            },
            schedule: schedule(),
            timeout: None,
            max_retries: None,
            retry_backoff: None,
        }
        .into_job();
        existing.next_run_at = Some(chrono::Utc::now());

        let patch = UpdateJobRequest {
            schedule: Some(schedule()),
            ..Default::default()
        };
        let updated = patch.apply_to(existing);
        assert!(updated.next_run_at.is_none());
    }
}
