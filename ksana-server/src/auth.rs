use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::Response;
use tokio::fs;
use tokio::sync::RwLock;
use tracing::warn;

use crate::error::unauthorized;

/// Newline-delimited API keys loaded from a file at startup. Blank lines
/// and `#`-prefixed comments are skipped. `reload` re-reads the file
/// without restarting the process (e.g. in response to `SIGHUP`); a file
/// that goes missing clears the set rather than leaving the stale one in
/// place, so operators can lock the service down by deleting the file.
#[derive(Clone)]
pub struct ApiKeyStore {
    path: PathBuf,
    keys: Arc<RwLock<HashSet<String>>>,
}

impl ApiKeyStore {
    pub async fn load(path: impl Into<PathBuf>) -> Self {
        let store = ApiKeyStore {
            path: path.into(),
            keys: Arc::new(RwLock::new(HashSet::new())),
        };
        store.reload().await;
        store
    }

    pub async fn reload(&self) {
        let parsed = match fs::read_to_string(&self.path).await {
            Ok(contents) => parse_keys(&contents),
            Err(err) => {
                warn!(
                    path = %self.path.display(),
                    error = %err,
                    "failed to read api keys file; every request will be rejected"
                );
                HashSet::new()
            }
        };
        if parsed.is_empty() {
            warn!(
                path = %self.path.display(),
                "api keys file has no usable keys; every request will be rejected"
            );
        }
        *self.keys.write().await = parsed;
    }

    async fn is_valid(&self, key: &str) -> bool {
        self.keys.read().await.contains(key)
    }
}

fn parse_keys(contents: &str) -> HashSet<String> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_owned)
        .collect()
}

fn extract_key(request: &Request) -> Option<String> {
    if let Some(header) = request.headers().get(AUTHORIZATION) {
        if let Ok(value) = header.to_str() {
            if let Some(token) = value.strip_prefix("Bearer ") {
                return Some(token.to_owned());
            }
        }
    }
    request
        .headers()
        .get("X-Api-Key")
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned)
}

/// Rejects any request without a recognised `Authorization: Bearer <key>`
/// or `X-Api-Key` header. Applied only to the `/jobs*` route group —
/// `/health` and `/metrics` are mounted outside it.
pub async fn require_api_key(
    State(keys): State<ApiKeyStore>,
    request: Request,
    next: Next,
) -> Response {
    let presented = extract_key(&request);
    let authorized = match &presented {
        Some(key) => keys.is_valid(key).await,
        None => false,
    };

    if authorized {
        next.run(request).await
    } else {
        unauthorized()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_keys_skips_blank_lines_and_comments() {
        let keys = parse_keys("# a comment\nabc123\n\n  \ndef456\n");
        assert_eq!(keys.len(), 2);
        assert!(keys.contains("abc123"));
        assert!(keys.contains("def456"));
    }

    #[tokio::test]
    async fn missing_file_yields_empty_set() {
        let store = ApiKeyStore::load("/nonexistent/path/api_keys.txt").await;
        assert!(!store.is_valid("anything").await);
    }

    #[tokio::test]
    async fn loaded_key_validates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("api_keys.txt");
        tokio::fs::write(&path, "secret-key\n").await.unwrap();

        let store = ApiKeyStore::load(&path).await;
        assert!(store.is_valid("secret-key").await);
        assert!(!store.is_valid("other-key").await);
    }

    #[tokio::test]
    async fn reload_picks_up_new_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("api_keys.txt");
        tokio::fs::write(&path, "first-key\n").await.unwrap();

        let store = ApiKeyStore::load(&path).await;
        assert!(store.is_valid("first-key").await);

        tokio::fs::write(&path, "second-key\n").await.unwrap();
        store.reload().await;
        assert!(!store.is_valid("first-key").await);
        assert!(store.is_valid("second-key").await);
    }
}
