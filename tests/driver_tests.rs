//! Local driver: retries, revocation, connector bookkeeping and cleanup.

#[path = "test_utils/mod.rs"]
mod test_utils;

use anyhow::Result;
use provider_sync::activities::SyncRequest;
use provider_sync::connectors::{ClientError, ResourceRef};
use provider_sync::error::ActivityFailure;
use provider_sync::provider::{NodeKind, Permission, ProviderKind};
use provider_sync::walker::WorkUnit;
use test_utils::{FakeProvider, Harness, ts};

async fn repo_with_issues(provider: FakeProvider, issues: usize) -> Result<Harness> {
    let h = Harness::with_provider(provider, None).await?;
    h.provider.put_scope("r", "octocat/Hello-World");
    for n in 1..=issues {
        h.provider.put_leaf(
            "r",
            NodeKind::GithubIssue,
            &format!("{n:03}"),
            None,
            &format!("Issue {n}"),
            "Body.",
            ts(3),
        );
    }
    h.grant_scope("r", Permission::Read).await?;
    Ok(h)
}

#[tokio::test]
async fn revoked_token_cancels_and_is_recorded() -> Result<()> {
    let h = repo_with_issues(FakeProvider::new(ProviderKind::Github), 3).await?;
    h.provider.revoke();

    let err = h.driver.sync(h.connector_id(), false).await.unwrap_err();
    assert!(matches!(err, ActivityFailure::AuthRevoked { .. }));
    assert!(!err.is_retryable());
    assert!(h.activities.cancellations().is_cancelled(h.connector_id()));

    let connector = h.store.connectors.get(h.connector_id()).await?;
    assert_eq!(connector.last_sync_status.as_deref(), Some("failed"));
    assert_eq!(connector.error_type.as_deref(), Some("oauth_token_revoked"));
    assert_eq!(h.leaf_count("r").await?, 0);
    Ok(())
}

#[tokio::test]
async fn cancelled_connector_rejects_further_units() -> Result<()> {
    let h = repo_with_issues(FakeProvider::new(ProviderKind::Github), 1).await?;
    let request = SyncRequest::new(h.connector_id(), false);
    h.activities.cancellations().cancel(h.connector_id());

    let err = h
        .activities
        .reconcile_unit(
            request,
            WorkUnit::Scope {
                scope_external_id: "r".to_string(),
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ActivityFailure::Cancelled { .. }));

    // A new sync opens a fresh cancellation scope.
    h.driver.sync(h.connector_id(), false).await?;
    assert_eq!(h.leaf_count("r").await?, 1);
    Ok(())
}

#[tokio::test]
async fn transient_failures_are_retried() -> Result<()> {
    let h = repo_with_issues(FakeProvider::new(ProviderKind::Github), 2).await?;
    h.provider
        .fail_next(ClientError::transient(ProviderKind::Github, "upstream 502"));
    h.provider.fail_next(ClientError::RateLimited {
        provider: ProviderKind::Github,
        retry_after_secs: None,
    });

    let report = h.driver.sync(h.connector_id(), false).await?;
    assert_eq!(report.leaves.upserted, 2);
    let connector = h.store.connectors.get(h.connector_id()).await?;
    assert_eq!(connector.last_sync_status.as_deref(), Some("succeeded"));
    assert_eq!(connector.error_type, None);
    Ok(())
}

#[tokio::test]
async fn exhausted_retries_fail_the_sync_with_the_error_kind() -> Result<()> {
    let h = repo_with_issues(FakeProvider::new(ProviderKind::Github), 1).await?;
    for _ in 0..3 {
        h.provider.fail_next(ClientError::RateLimited {
            provider: ProviderKind::Github,
            retry_after_secs: None,
        });
    }

    let err = h.driver.sync(h.connector_id(), false).await.unwrap_err();
    assert!(matches!(err, ActivityFailure::RateLimited { .. }));
    let connector = h.store.connectors.get(h.connector_id()).await?;
    assert_eq!(connector.last_sync_status.as_deref(), Some("failed"));
    assert_eq!(connector.error_type.as_deref(), Some("third_party_rate_limited"));
    Ok(())
}

#[tokio::test]
async fn failing_leaf_does_not_block_its_siblings() -> Result<()> {
    let h = repo_with_issues(FakeProvider::new(ProviderKind::Github), 3).await?;
    let stuck = h.id(NodeKind::GithubIssue, "002");
    h.documents.fail_on(&stuck);

    let err = h.driver.sync(h.connector_id(), false).await.unwrap_err();
    assert!(matches!(err, ActivityFailure::Transient { .. }));
    assert!(h.docs().document(&h.id(NodeKind::GithubIssue, "001")).is_some());
    assert!(h.docs().document(&h.id(NodeKind::GithubIssue, "003")).is_some());
    assert!(h.docs().document(&stuck).is_none());

    // Once the store recovers only the stuck leaf is sent.
    h.documents.recover(&stuck);
    h.docs().clear_calls();
    let report = h.driver.sync(h.connector_id(), false).await?;
    assert_eq!(report.leaves.upserted, 1);
    assert_eq!(h.docs().upsert_count(), 1);
    Ok(())
}

#[tokio::test]
async fn paginated_listings_are_drained() -> Result<()> {
    let provider = FakeProvider::new(ProviderKind::Github).with_page_size(4);
    let h = repo_with_issues(provider, 10).await?;

    let report = h.driver.sync(h.connector_id(), false).await?;
    assert_eq!(report.leaves.upserted, 10);
    // Scope, then three pages of issues.
    assert_eq!(report.units, 4);
    assert_eq!(h.provider.list_calls(), 3);
    Ok(())
}

#[tokio::test]
async fn progress_is_reported_until_the_first_success() -> Result<()> {
    let h = repo_with_issues(FakeProvider::new(ProviderKind::Github), 1).await?;
    h.activities
        .report_progress(h.connector_id(), "3 units reconciled, 1 pending")
        .await?;
    let connector = h.store.connectors.get(h.connector_id()).await?;
    assert_eq!(
        connector.first_sync_progress.as_deref(),
        Some("3 units reconciled, 1 pending")
    );

    h.driver.sync(h.connector_id(), false).await?;
    h.activities
        .report_progress(h.connector_id(), "later")
        .await?;
    let connector = h.store.connectors.get(h.connector_id()).await?;
    assert_ne!(connector.first_sync_progress.as_deref(), Some("later"));
    Ok(())
}

#[tokio::test]
async fn seeded_work_revisits_tracked_containers() -> Result<()> {
    let h = Harness::new(ProviderKind::Slack).await?;
    h.grant_scope("T1", Permission::Read).await?;
    h.grant_container("T1", NodeKind::SlackChannel, "C9", None, Permission::Read)
        .await?;

    let units = h
        .activities
        .seed_work(SyncRequest::new(h.connector_id(), false))
        .await?;
    assert_eq!(
        units,
        vec![
            WorkUnit::Scope {
                scope_external_id: "T1".to_string()
            },
            WorkUnit::Container {
                node: ResourceRef::new(NodeKind::SlackChannel, "C9", "T1"),
                grant: None,
                discovered: None,
            },
        ]
    );
    Ok(())
}

#[tokio::test]
async fn cleanup_removes_everything_even_after_revocation() -> Result<()> {
    let h = Harness::new(ProviderKind::Slack).await?;
    h.provider.put_scope("T1", "Acme");
    h.provider
        .put_container("T1", NodeKind::SlackChannel, "C1", None, "general");
    h.provider.put_leaf(
        "T1",
        NodeKind::SlackThread,
        "1.1",
        Some("C1"),
        "Thread",
        "Message.",
        ts(5),
    );
    h.grant_scope("T1", Permission::Read).await?;
    h.driver.sync(h.connector_id(), false).await?;
    h.provider.revoke();

    let summary = h.driver.cleanup(h.connector_id()).await?;
    assert_eq!(summary.scopes, 1);
    assert_eq!(summary.containers, 1);
    assert_eq!(summary.leaves, 1);
    assert!(h.docs().document_ids().is_empty());
    assert!(h.docs().folder_ids().is_empty());
    assert!(
        h.store
            .connectors
            .find_by_id(h.connector_id())
            .await?
            .is_none()
    );
    Ok(())
}
