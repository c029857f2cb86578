use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use rand::RngCore;
use tokio::fs;
use tokio::sync::RwLock;
use tracing::warn;

use crate::error::{CoreError, CoreResult};
use crate::model::{Job, JobStore as JobStoreDoc, CURRENT_VERSION};

const FILE_NAME: &str = "jobs.json";

/// Durable job persistence, abstracted so the executor and scheduler can be
/// exercised against an in-memory fake in unit tests without touching disk.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn load(&self) -> CoreResult<JobStoreDoc>;
    async fn list(&self) -> CoreResult<Vec<Job>>;
    async fn get(&self, id: &str) -> CoreResult<Job>;
    async fn put(&self, job: Job) -> CoreResult<Job>;
    async fn delete(&self, id: &str) -> CoreResult<()>;
}

struct Inner {
    loaded: bool,
    data: JobStoreDoc,
    index: HashMap<String, usize>,
}

/// `jobs.json` under a data directory, cached in memory and rewritten in
/// full (temp file + fsync + rename) on every mutation.
pub struct JsonStore {
    data_dir: PathBuf,
    inner: RwLock<Inner>,
}

impl JsonStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        JsonStore {
            data_dir: data_dir.into(),
            inner: RwLock::new(Inner {
                loaded: false,
                data: JobStoreDoc {
                    version: CURRENT_VERSION,
                    updated_at: Utc::now(),
                    jobs: Vec::new(),
                },
                index: HashMap::new(),
            }),
        }
    }

    fn file_path(&self) -> PathBuf {
        self.data_dir.join(FILE_NAME)
    }

    fn rebuild_index(data: &JobStoreDoc) -> HashMap<String, usize> {
        data.jobs
            .iter()
            .enumerate()
            .map(|(i, job)| (job.id.clone(), i))
            .collect()
    }

    async fn atomic_write(&self, path: &Path, doc: &JobStoreDoc) -> CoreResult<()> {
        let json = serde_json::to_vec_pretty(doc)?;
        let tmp_path = path.with_extension("json.tmp");

        let write_result = async {
            let mut file = fs::File::create(&tmp_path).await?;
            use tokio::io::AsyncWriteExt;
            file.write_all(&json).await?;
            file.sync_all().await?;
            drop(file);
            fs::rename(&tmp_path, path).await?;
            Ok::<(), std::io::Error>(())
        }
        .await;

        if let Err(err) = write_result {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(CoreError::from(err));
        }
        Ok(())
    }

    fn generate_id() -> String {
        let mut bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut bytes);
        hex::encode(bytes)
    }
}

#[async_trait]
impl JobStore for JsonStore {
    async fn load(&self) -> CoreResult<JobStoreDoc> {
        fs::create_dir_all(&self.data_dir).await?;

        let path = self.file_path();
        let contents = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                let empty = JobStoreDoc {
                    version: CURRENT_VERSION,
                    updated_at: Utc::now(),
                    jobs: Vec::new(),
                };
                let mut inner = self.inner.write().await;
                inner.index = Self::rebuild_index(&empty);
                inner.data = empty.clone();
                inner.loaded = true;
                return Ok(empty);
            }
            Err(err) => return Err(CoreError::from(err)),
        };

        let parsed: Result<JobStoreDoc, _> = serde_json::from_slice(&contents);
        let doc = match parsed {
            Ok(doc) => doc,
            Err(err) => {
                warn!(error = %err, "jobs.json is corrupt, quarantining and starting empty");
                let quarantine = self
                    .data_dir
                    .join(format!("jobs.bad.{}.json", Utc::now().timestamp()));
                fs::rename(&path, &quarantine).await?;
                JobStoreDoc {
                    version: CURRENT_VERSION,
                    updated_at: Utc::now(),
                    jobs: Vec::new(),
                }
            }
        };

        let mut inner = self.inner.write().await;
        inner.index = Self::rebuild_index(&doc);
        inner.data = doc.clone();
        inner.loaded = true;
        Ok(doc)
    }

    async fn list(&self) -> CoreResult<Vec<Job>> {
        let inner = self.inner.read().await;
        if !inner.loaded {
            return Err(CoreError::Persistence("store not loaded".into()));
        }
        Ok(inner.data.jobs.clone())
    }

    async fn get(&self, id: &str) -> CoreResult<Job> {
        let inner = self.inner.read().await;
        let idx = inner
            .index
            .get(id)
            .ok_or_else(|| CoreError::NotFound(id.to_owned()))?;
        Ok(inner.data.jobs[*idx].clone())
    }

    async fn put(&self, mut job: Job) -> CoreResult<Job> {
        let mut inner = self.inner.write().await;
        if !inner.loaded {
            return Err(CoreError::Persistence("store not loaded".into()));
        }

        if job.id.is_empty() {
            job.id = Self::generate_id();
        }

        if let Some(&idx) = inner.index.get(&job.id) {
            inner.data.jobs[idx] = job.clone();
        } else {
            inner.data.jobs.push(job.clone());
        }

        inner.data.version = CURRENT_VERSION;
        inner.data.updated_at = Utc::now();
        inner.index = Self::rebuild_index(&inner.data);

        let path = self.file_path();
        let doc = inner.data.clone();
        self.atomic_write(&path, &doc).await?;

        Ok(job)
    }

    async fn delete(&self, id: &str) -> CoreResult<()> {
        let mut inner = self.inner.write().await;
        if !inner.loaded {
            return Err(CoreError::Persistence("store not loaded".into()));
        }
        if !inner.index.contains_key(id) {
            return Err(CoreError::NotFound(id.to_owned()));
        }

        inner.data.jobs.retain(|j| j.id != id);
        inner.data.version = CURRENT_VERSION;
        inner.data.updated_at = Utc::now();
        inner.index = Self::rebuild_index(&inner.data);

        let path = self.file_path();
        let doc = inner.data.clone();
        self.atomic_write(&path, &doc).await
    }
}

/// Test-only fakes shared by `ksana-core`'s other modules (the executor and
/// scheduler exercise their logic against this instead of a real `JsonStore`
/// so their test suites don't touch disk).
#[cfg(test)]
pub mod tests_support {
    use super::*;

    #[derive(Default)]
    pub struct InMemoryStore {
        inner: RwLock<HashMap<String, Job>>,
    }

    impl InMemoryStore {
        pub fn new() -> Self {
            InMemoryStore::default()
        }
    }

    #[async_trait]
    impl JobStore for InMemoryStore {
        async fn load(&self) -> CoreResult<JobStoreDoc> {
            let inner = self.inner.read().await;
            Ok(JobStoreDoc {
                version: CURRENT_VERSION,
                updated_at: Utc::now(),
                jobs: inner.values().cloned().collect(),
            })
        }

        async fn list(&self) -> CoreResult<Vec<Job>> {
            Ok(self.inner.read().await.values().cloned().collect())
        }

        async fn get(&self, id: &str) -> CoreResult<Job> {
            self.inner
                .read()
                .await
                .get(id)
                .cloned()
                .ok_or_else(|| CoreError::NotFound(id.to_owned()))
        }

        async fn put(&self, mut job: Job) -> CoreResult<Job> {
            if job.id.is_empty() {
                job.id = Self::generate_id();
            }
            self.inner.write().await.insert(job.id.clone(), job.clone());
            Ok(job)
        }

        async fn delete(&self, id: &str) -> CoreResult<()> {
            self.inner
                .write()
                .await
                .remove(id)
                .map(|_| ())
                .ok_or_else(|| CoreError::NotFound(id.to_owned()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{HttpConfig, HttpMethod, JobStatus, JobType, Schedule, ScheduleKind};
    use crate::duration::KDuration;

    fn sample_job(name: &str) -> Job {
        Job {
            id: String::new(),
            name: name.to_owned(),
            enabled: true,
            job_type: JobType::Http,
            http: HttpConfig {
                method: HttpMethod::Post,
                url: "https://example.com/hook".to_owned(),
                headers: HashMap::new(),
                body: String::new(),
            },
            schedule: Schedule {
                kind: ScheduleKind::Every,
                run_at: None,
                every: KDuration::from(std::time::Duration::from_secs(60)),
                start_at: None,
                jitter: KDuration::ZERO,
            },
            timeout: KDuration::from(std::time::Duration::from_secs(10)),
            max_retries: 3,
            retry_backoff: KDuration::from(std::time::Duration::from_secs(5)),
            last_run_at: None,
            next_run_at: None,
            last_status: JobStatus::None,
            last_error: String::new(),
        }
    }

    #[tokio::test]
    async fn put_assigns_id_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStore::new(dir.path());
        store.load().await.unwrap();

        let created = store.put(sample_job("alpha")).await.unwrap();
        assert!(!created.id.is_empty());
        assert_eq!(created.id.len(), 32);

        let fetched = store.get(&created.id).await.unwrap();
        assert_eq!(fetched.name, "alpha");

        assert!(dir.path().join("jobs.json").exists());
    }

    #[tokio::test]
    async fn put_replaces_existing_entry_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStore::new(dir.path());
        store.load().await.unwrap();

        let a = store.put(sample_job("alpha")).await.unwrap();
        let _b = store.put(sample_job("beta")).await.unwrap();

        let mut updated = a.clone();
        updated.name = "alpha-renamed".to_owned();
        store.put(updated).await.unwrap();

        let jobs = store.list().await.unwrap();
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].name, "alpha-renamed");
        assert_eq!(jobs[1].name, "beta");
    }

    #[tokio::test]
    async fn delete_unknown_id_fails_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStore::new(dir.path());
        store.load().await.unwrap();

        let err = store.delete("missing").await.unwrap_err();
        assert!(matches!(err, CoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn round_trip_through_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = JsonStore::new(dir.path());
            store.load().await.unwrap();
            store.put(sample_job("alpha")).await.unwrap();
        }

        let store = JsonStore::new(dir.path());
        let doc = store.load().await.unwrap();
        assert_eq!(doc.jobs.len(), 1);
        assert_eq!(doc.jobs[0].name, "alpha");
    }

    #[tokio::test]
    async fn corrupt_file_is_quarantined_and_load_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path()).await.unwrap();
        fs::write(dir.path().join(FILE_NAME), b"not json").await.unwrap();

        let store = JsonStore::new(dir.path());
        let doc = store.load().await.unwrap();
        assert!(doc.jobs.is_empty());

        let mut found_quarantine = false;
        let mut entries = fs::read_dir(dir.path()).await.unwrap();
        while let Some(entry) = entries.next_entry().await.unwrap() {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with("jobs.bad.") && name.ends_with(".json") {
                found_quarantine = true;
            }
        }
        assert!(found_quarantine);
    }

    #[tokio::test]
    async fn list_before_load_fails() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStore::new(dir.path());
        let err = store.list().await.unwrap_err();
        assert!(matches!(err, CoreError::Persistence(_)));
    }
}
