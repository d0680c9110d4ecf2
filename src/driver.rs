//! Local driver
//!
//! In-process stand-in for a durable task executor: drains the worklist one
//! unit at a time, retries retryable failures with exponential backoff and
//! jitter, then loops garbage collection batches over every scope.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use metrics::{counter, histogram};
use rand::{Rng, thread_rng};
use sea_orm::DatabaseConnection;
use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::activities::{Activities, CleanupSummary, SyncRequest};
use crate::cache::InMemoryTtlCache;
use crate::config::{AppConfig, DriverConfig, RateLimitPolicyConfig};
use crate::connectors::ProviderClients;
use crate::credentials::{HttpCredentialSource, TokenProvider};
use crate::documents::DocumentStore;
use crate::engine::{LeafBatchReport, Outcome, ReconciliationEngine};
use crate::error::ActivityFailure;
use crate::gc::GarbageCollector;
use crate::provider::ProviderKind;
use crate::repositories::StateStore;
use crate::sync_status::CancellationRegistry;
use crate::walker::Worklist;

/// Totals of one sync run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    pub units: usize,
    pub deleted: usize,
    pub downgraded: usize,
    pub updated: usize,
    pub leaves: LeafBatchReport,
    pub gc_processed: usize,
}

impl SyncReport {
    fn record_outcome(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Deleted => self.deleted += 1,
            Outcome::Downgraded => self.downgraded += 1,
            Outcome::Updated => self.updated += 1,
            _ => {}
        }
    }

    fn record_leaves(&mut self, leaves: &LeafBatchReport) {
        self.leaves.upserted += leaves.upserted;
        self.leaves.skipped += leaves.skipped;
        self.leaves.deleted += leaves.deleted;
        self.leaves.noop += leaves.noop;
        self.leaves.failed += leaves.failed;
    }
}

pub struct LocalDriver {
    activities: Arc<Activities>,
    rate_limit_policy: RateLimitPolicyConfig,
    config: DriverConfig,
}

impl LocalDriver {
    pub fn new(
        activities: Arc<Activities>,
        rate_limit_policy: RateLimitPolicyConfig,
        config: DriverConfig,
    ) -> Self {
        Self {
            activities,
            rate_limit_policy,
            config,
        }
    }

    /// Wires the production stack: HTTP provider clients behind the
    /// credential service, the given document store and the state store.
    pub fn from_config(
        config: &AppConfig,
        db: Arc<DatabaseConnection>,
        documents: Arc<dyn DocumentStore>,
    ) -> anyhow::Result<Self> {
        let credentials = HttpCredentialSource::new(
            config.credentials_url.clone(),
            config.credentials_api_key.clone(),
            config.request_timeout(),
        )
        .context("Failed to build the credential client")?;
        let tokens = Arc::new(TokenProvider::new(
            Arc::new(credentials),
            Arc::new(InMemoryTtlCache::new(config.token_cache.capacity)),
            Duration::from_secs(config.token_cache.ttl_seconds),
        ));
        let clients = ProviderClients::from_config(config, tokens)
            .context("Failed to build provider clients")?;

        let engine = Arc::new(ReconciliationEngine::new(
            StateStore::new(db),
            documents,
            clients,
            config.concurrency.clone(),
        ));
        let gc = GarbageCollector::new(engine.clone(), config.gc.clone());
        let activities = Arc::new(Activities::new(engine, gc, CancellationRegistry::new()));
        Ok(Self::new(
            activities,
            config.rate_limit_policy.clone(),
            config.driver.clone(),
        ))
    }

    pub fn activities(&self) -> &Arc<Activities> {
        &self.activities
    }

    /// Full sync: reconcile every reachable node, then garbage collect.
    ///
    /// The outcome is recorded on the connector row either way.
    #[instrument(skip(self))]
    pub async fn sync(
        &self,
        connector_id: Uuid,
        force_resync: bool,
    ) -> Result<SyncReport, ActivityFailure> {
        let request = SyncRequest::new(connector_id, force_resync);
        let provider = self.provider(connector_id).await;
        self.activities.start_sync(request).await?;

        let result = self.sync_inner(request, provider).await;
        self.activities
            .finish_sync(request, result.as_ref().err())
            .await?;
        if let Ok(report) = &result {
            info!(
                connector_id = %connector_id,
                units = report.units,
                upserted = report.leaves.upserted,
                deleted = report.deleted + report.leaves.deleted,
                gc_processed = report.gc_processed,
                "Sync finished"
            );
        }
        result
    }

    /// Garbage collection only, over every tracked scope.
    #[instrument(skip(self))]
    pub async fn gc(&self, connector_id: Uuid) -> Result<usize, ActivityFailure> {
        let request = SyncRequest::new(connector_id, false);
        let provider = self.provider(connector_id).await;
        self.collect(request, provider).await
    }

    #[instrument(skip(self))]
    pub async fn cleanup(&self, connector_id: Uuid) -> Result<CleanupSummary, ActivityFailure> {
        let provider = self.provider(connector_id).await;
        self.with_retry(provider, || self.activities.cleanup_connector(connector_id))
            .await
    }

    async fn sync_inner(
        &self,
        request: SyncRequest,
        provider: Option<ProviderKind>,
    ) -> Result<SyncReport, ActivityFailure> {
        let mut report = SyncReport::default();
        let mut worklist = Worklist::new();
        worklist.extend(
            self.with_retry(provider, || self.activities.seed_work(request))
                .await?,
        );

        while let Some(unit) = worklist.pop() {
            let summary = self
                .with_retry(provider, || {
                    self.activities.reconcile_unit(request, unit.clone())
                })
                .await?;
            report.units += 1;
            if let Some(outcome) = summary.outcome {
                report.record_outcome(outcome);
            }
            if let Some(leaves) = &summary.leaves {
                report.record_leaves(leaves);
            }
            worklist.extend(summary.follow_ups);

            if report.units % 50 == 0 {
                let progress = format!(
                    "{} units reconciled, {} pending",
                    report.units,
                    worklist.len()
                );
                self.activities
                    .report_progress(request.connector_id, &progress)
                    .await?;
            }
        }

        report.gc_processed = self.collect(request, provider).await?;
        Ok(report)
    }

    /// Loops GC batches over every scope until each returns no cursor.
    async fn collect(
        &self,
        request: SyncRequest,
        provider: Option<ProviderKind>,
    ) -> Result<usize, ActivityFailure> {
        let scopes = self
            .with_retry(provider, || self.activities.list_scopes(request.connector_id))
            .await?;
        let mut processed = 0;
        for scope in scopes {
            let mut cursor = None;
            loop {
                let batch = self
                    .with_retry(provider, || {
                        self.activities
                            .gc_batch(request, scope.clone(), cursor.clone())
                    })
                    .await?;
                processed += batch.processed_count;
                match batch.next_cursor {
                    Some(next) => cursor = Some(next),
                    None => break,
                }
            }
        }
        Ok(processed)
    }

    /// Runs an activity, retrying retryable failures up to `max_attempts`.
    async fn with_retry<T, F, Fut>(
        &self,
        provider: Option<ProviderKind>,
        mut activity: F,
    ) -> Result<T, ActivityFailure>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ActivityFailure>>,
    {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempts_completed = 0;
        loop {
            match activity().await {
                Ok(value) => return Ok(value),
                Err(failure) => {
                    attempts_completed += 1;
                    if !failure.is_retryable() || attempts_completed >= max_attempts {
                        return Err(failure);
                    }
                    let backoff = calculate_backoff(
                        &self.rate_limit_policy,
                        &failure,
                        attempts_completed,
                        provider,
                    );
                    let provider_label = provider.map_or("unknown", |p| p.as_str());
                    counter!("driver_retries_total", "provider" => provider_label).increment(1);
                    if matches!(failure, ActivityFailure::RateLimited { .. }) {
                        histogram!("rate_limited_backoff_seconds", "provider" => provider_label)
                            .record(backoff.as_secs_f64());
                    }
                    warn!(
                        provider = provider_label,
                        attempt = attempts_completed,
                        backoff_secs = backoff.as_secs_f64(),
                        error = %failure,
                        "Activity failed, retrying"
                    );
                    sleep(backoff).await;
                }
            }
        }
    }

    async fn provider(&self, connector_id: Uuid) -> Option<ProviderKind> {
        self.activities
            .engine()
            .store()
            .connectors
            .find_by_id(connector_id)
            .await
            .ok()
            .flatten()
            .and_then(|c| c.provider_kind().ok())
    }
}

/// Exponential backoff capped at the policy maximum, never shorter than a
/// provider-advertised `Retry-After`, plus jitter.
pub fn calculate_backoff(
    policy: &RateLimitPolicyConfig,
    failure: &ActivityFailure,
    attempts_completed: u32,
    provider: Option<ProviderKind>,
) -> Duration {
    let (base_seconds, max_seconds, jitter_factor) = match provider {
        Some(provider) => policy.resolve(provider),
        None => (policy.base_seconds, policy.max_seconds, policy.jitter_factor),
    };
    let exponent = i32::try_from(attempts_completed.saturating_sub(1)).unwrap_or(i32::MAX);
    let mut backoff = (base_seconds as f64 * 2_f64.powi(exponent)).min(max_seconds as f64);

    if let ActivityFailure::RateLimited {
        retry_after_secs: Some(retry_after),
        ..
    } = failure
    {
        backoff = backoff.max(*retry_after as f64);
    }

    let spread = jitter_factor * backoff;
    let jitter = if spread > 0.0 {
        thread_rng().gen_range(0.0..spread)
    } else {
        0.0
    };
    Duration::from_secs_f64(backoff + jitter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RateLimitProviderOverride;
    use std::collections::BTreeMap;

    fn policy(base: u64, max: u64, jitter: f64) -> RateLimitPolicyConfig {
        RateLimitPolicyConfig {
            base_seconds: base,
            max_seconds: max,
            jitter_factor: jitter,
            provider_overrides: BTreeMap::new(),
        }
    }

    fn backoff(
        policy: &RateLimitPolicyConfig,
        failure: &ActivityFailure,
        attempts: u32,
        provider: Option<ProviderKind>,
    ) -> Duration {
        calculate_backoff(policy, failure, attempts, provider)
    }

    fn transient() -> ActivityFailure {
        ActivityFailure::Transient {
            message: "502".into(),
        }
    }

    #[test]
    fn jitter_stays_within_the_factor() {
        let policy = policy(10, 10, 0.5);
        for _ in 0..20 {
            let secs = backoff(&policy, &transient(), 1, None).as_secs_f64();
            assert!((10.0..15.0).contains(&secs));
        }
    }

    #[test]
    fn backoff_doubles_until_the_cap() {
        let policy = policy(2, 10, 0.0);
        let expected: Vec<u64> = (1..=5)
            .map(|n| backoff(&policy, &transient(), n, None).as_secs())
            .collect();
        assert_eq!(expected, vec![2, 4, 8, 10, 10]);
    }

    #[test]
    fn retry_after_wins_over_a_shorter_backoff() {
        let policy = policy(1, 600, 0.0);
        let failure = ActivityFailure::RateLimited {
            retry_after_secs: Some(120),
            message: "429".into(),
        };
        assert_eq!(
            backoff(&policy, &failure, 1, None),
            Duration::from_secs(120)
        );
    }

    #[test]
    fn provider_overrides_replace_the_default_policy() {
        let mut policy = policy(1, 600, 0.0);
        policy.provider_overrides.insert(
            "slack".into(),
            RateLimitProviderOverride {
                base_seconds: Some(30),
                max_seconds: None,
                jitter_factor: None,
            },
        );
        assert_eq!(
            backoff(&policy, &transient(), 1, Some(ProviderKind::Slack)),
            Duration::from_secs(30)
        );
        assert_eq!(
            backoff(&policy, &transient(), 1, Some(ProviderKind::Github)),
            Duration::from_secs(1)
        );
    }
}
