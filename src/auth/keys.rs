//! Signing-key cache.
//!
//! The [`KeyRefresher`] owns the current key set and republishes it on a
//! fixed interval. Readers hold a [`TokenValidator`] and only ever take a
//! snapshot, so verification never waits on a refresh in progress.
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use jsonwebtoken::jwk::JwkSet;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::TokenValidator;
use crate::error::{GovnetError, Result};

// tokio intervals cannot tick at zero
const MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Clone, Debug)]
pub struct KeyCacheConfig {
    pub jwks_url: String,
    pub refresh_interval: Duration,
    pub fetch_timeout: Duration,
    // Upper bound on keys taken from one document
    pub max_keys: usize,
}

/// Where the signing keys come from
#[async_trait]
pub trait KeySetSource: Send + Sync {
    async fn fetch(&self) -> Result<JwkSet>;
}

/// Fetches a JSON Web Key Set document over HTTP(S)
#[derive(Clone, Debug)]
pub struct HttpKeySetSource {
    client: reqwest::Client,
    url: String,
    max_keys: usize,
}

impl HttpKeySetSource {
    pub fn new(config: &KeyCacheConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.fetch_timeout)
            .build()?;
        Ok(Self {
            client,
            url: config.jwks_url.clone(),
            max_keys: config.max_keys,
        })
    }
}

#[async_trait]
impl KeySetSource for HttpKeySetSource {
    async fn fetch(&self) -> Result<JwkSet> {
        let response = self.client.get(&self.url).send().await?;
        if !response.status().is_success() {
            return Err(GovnetError::ServiceUnavailable(format!(
                "Key set endpoint {} answered {}",
                self.url,
                response.status()
            )));
        }
        let mut set: JwkSet = response.json().await?;
        if set.keys.len() > self.max_keys {
            warn!(
                "Key set from {} has {} keys, keeping the first {}",
                self.url,
                set.keys.len(),
                self.max_keys
            );
            set.keys.truncate(self.max_keys);
        }
        Ok(set)
    }
}

/// Create an empty key cell, returning the task that fills it and the
/// validator that reads it.
pub fn key_cache(
    source: Arc<dyn KeySetSource>,
    refresh_interval: Duration,
) -> (KeyRefresher, TokenValidator) {
    let (cell, snapshot) = watch::channel(Arc::new(JwkSet { keys: Vec::new() }));
    (
        KeyRefresher {
            source,
            cell,
            refresh_interval,
        },
        TokenValidator::new(snapshot),
    )
}

pub struct KeyRefresher {
    source: Arc<dyn KeySetSource>,
    cell: watch::Sender<Arc<JwkSet>>,
    refresh_interval: Duration,
}

impl KeyRefresher {
    /// Initial fetch at startup. Unlike later refreshes, failure is reported.
    pub async fn warm(&self) -> Result<usize> {
        let set = self.source.fetch().await?;
        let count = set.keys.len();
        self.cell.send_replace(Arc::new(set));
        info!("Signing key cache warmed with {} keys", count);
        Ok(count)
    }

    /// Replace the key set. On failure the previous set stays in effect.
    pub async fn refresh(&self) -> bool {
        match self.source.fetch().await {
            Ok(set) => {
                debug!("Refreshed signing key set: {} keys", set.keys.len());
                self.cell.send_replace(Arc::new(set));
                true
            }
            Err(e) => {
                error!("Failed to refresh signing key set, keeping previous: {}", e);
                false
            }
        }
    }

    /// Run the refresh loop until `shutdown` flips to true or its sender is dropped
    pub fn spawn(self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let period = self.refresh_interval.max(MIN_REFRESH_INTERVAL);
            if period != self.refresh_interval {
                warn!(
                    "Key refresh interval {:?} is too short, using {:?}",
                    self.refresh_interval, period
                );
            }
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // first tick completes immediately; warm() already covered it
            interval.tick().await;
            debug!(
                "Key refresh loop started with {}s interval",
                period.as_secs()
            );

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        self.refresh().await;
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            info!("Key refresh loop stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use crate::internal_error;

    struct ScriptedSource {
        responses: Mutex<VecDeque<Result<JwkSet>>>,
    }

    impl ScriptedSource {
        fn new(responses: Vec<Result<JwkSet>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
            })
        }
    }

    #[async_trait]
    impl KeySetSource for ScriptedSource {
        async fn fetch(&self) -> Result<JwkSet> {
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(internal_error!("script exhausted")))
        }
    }

    fn key_set(kids: &[&str]) -> JwkSet {
        let keys: Vec<serde_json::Value> = kids
            .iter()
            .map(|kid| serde_json::json!({"kty": "oct", "kid": kid, "alg": "HS256", "k": "c2VjcmV0"}))
            .collect();
        serde_json::from_value(serde_json::json!({ "keys": keys })).unwrap()
    }

    #[tokio::test]
    async fn test_warm_publishes_keys() {
        let source = ScriptedSource::new(vec![Ok(key_set(&["a", "b"]))]);
        let (refresher, validator) = key_cache(source, Duration::from_secs(300));
        assert_eq!(validator.key_count(), 0);
        assert_eq!(refresher.warm().await.unwrap(), 2);
        assert_eq!(validator.key_count(), 2);
    }

    #[tokio::test]
    async fn test_warm_failure_is_reported() {
        let source = ScriptedSource::new(vec![Err(GovnetError::ServiceUnavailable(
            "idp down".to_string(),
        ))]);
        let (refresher, validator) = key_cache(source, Duration::from_secs(300));
        assert!(refresher.warm().await.is_err());
        assert_eq!(validator.key_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_previous_set() {
        let source = ScriptedSource::new(vec![
            Ok(key_set(&["a"])),
            Err(GovnetError::ServiceUnavailable("idp down".to_string())),
            Ok(key_set(&["b", "c", "d"])),
        ]);
        let (refresher, validator) = key_cache(source, Duration::from_secs(300));
        refresher.warm().await.unwrap();

        assert!(!refresher.refresh().await);
        assert_eq!(validator.key_count(), 1);

        assert!(refresher.refresh().await);
        assert_eq!(validator.key_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_loop_runs_on_interval_and_stops() {
        let source = ScriptedSource::new(vec![
            Ok(key_set(&["a"])),
            Ok(key_set(&["a", "b"])),
        ]);
        let (refresher, validator) = key_cache(source, Duration::from_secs(300));
        refresher.warm().await.unwrap();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = refresher.spawn(shutdown_rx);

        tokio::time::sleep(Duration::from_secs(301)).await;
        assert_eq!(validator.key_count(), 2);

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_interval_still_refreshes() {
        let source = ScriptedSource::new(vec![
            Ok(key_set(&["a"])),
            Ok(key_set(&["a", "b"])),
        ]);
        let (refresher, validator) = key_cache(source, Duration::ZERO);
        refresher.warm().await.unwrap();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = refresher.spawn(shutdown_rx);
        tokio::time::sleep(MIN_REFRESH_INTERVAL + Duration::from_millis(10)).await;
        assert_eq!(validator.key_count(), 2);

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
