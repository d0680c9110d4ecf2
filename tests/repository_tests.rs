#[path = "test_utils/mod.rs"]
mod test_utils;

use anyhow::Result;
use chrono::Utc;
use uuid::Uuid;

use provider_sync::provider::{NodeKind, Permission, ProviderKind};
use provider_sync::repositories::{
    LeafUpsert, NewConnector, NewContainer, NewSyncScope, StateStore,
};
use test_utils::{setup_test_db_arc, ts};

async fn store_with_connector(provider: ProviderKind) -> Result<(StateStore, Uuid)> {
    let store = StateStore::new(setup_test_db_arc().await?);
    let connector = store
        .connectors
        .create(NewConnector {
            provider,
            connection_id: "conn-1".to_string(),
            workspace_id: "ws-1".to_string(),
            data_source_id: "ds-1".to_string(),
            metadata: None,
            ticket_retention_days: None,
        })
        .await?;
    Ok((store, connector.id))
}

fn channel(connector_id: Uuid, external_id: &str, permission: Permission) -> NewContainer {
    NewContainer {
        connector_id,
        scope_external_id: "T1".to_string(),
        kind: NodeKind::SlackChannel,
        external_id: external_id.to_string(),
        parent_external_id: None,
        permission,
    }
}

fn thread(connector_id: Uuid, external_id: &str, channel: &str) -> LeafUpsert {
    LeafUpsert {
        connector_id,
        scope_external_id: "T1".to_string(),
        container_external_id: Some(channel.to_string()),
        kind: NodeKind::SlackThread,
        external_id: external_id.to_string(),
        title: Some(format!("Thread {external_id}")),
        state: None,
        document_id: format!("slack-thread-{external_id}"),
        parents: vec![format!("slack-thread-{external_id}")],
        source_url: None,
        upstream_updated_at: Some(ts(4)),
    }
}

#[tokio::test]
async fn upsert_grant_overwrites_section_grants() -> Result<()> {
    let (store, connector_id) = store_with_connector(ProviderKind::Zendesk).await?;
    let grant = NewSyncScope {
        connector_id,
        kind: NodeKind::ZendeskBrand,
        external_id: "42".to_string(),
        permission: Permission::Read,
        help_center_permission: Some(Permission::Read),
        tickets_permission: None,
    };
    let first = store.scopes.upsert_grant(grant.clone()).await?;

    let second = store
        .scopes
        .upsert_grant(NewSyncScope {
            help_center_permission: Some(Permission::None),
            tickets_permission: Some(Permission::Read),
            ..grant
        })
        .await?;

    assert_eq!(first.id, second.id);
    assert_eq!(second.help_center_permission.as_deref(), Some("none"));
    assert_eq!(second.tickets_permission.as_deref(), Some("read"));
    assert_eq!(store.scopes.find_all(connector_id).await?.len(), 1);
    Ok(())
}

#[tokio::test]
async fn section_permission_rejects_non_sections() -> Result<()> {
    let (store, connector_id) = store_with_connector(ProviderKind::Zendesk).await?;
    let scope = store
        .scopes
        .create(NewSyncScope {
            connector_id,
            kind: NodeKind::ZendeskBrand,
            external_id: "42".to_string(),
            permission: Permission::Read,
            help_center_permission: None,
            tickets_permission: Some(Permission::Read),
        })
        .await?;

    let cleared = store
        .scopes
        .set_section_permission(scope.id, NodeKind::ZendeskTickets, None)
        .await?;
    assert_eq!(cleared.tickets_permission, None);

    let err = store
        .scopes
        .set_section_permission(scope.id, NodeKind::ZendeskCategory, None)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("zendesk_category"));
    Ok(())
}

#[tokio::test]
async fn container_cursor_pages_by_external_id() -> Result<()> {
    let (store, connector_id) = store_with_connector(ProviderKind::Slack).await?;
    for (id, permission) in [
        ("C3", Permission::Read),
        ("C1", Permission::None),
        ("C2", Permission::Read),
        ("C4", Permission::None),
    ] {
        store.containers.create(channel(connector_id, id, permission)).await?;
    }

    let page = store
        .containers
        .fetch_past_cursor(connector_id, "T1", None, Some("C1"), 2)
        .await?;
    let ids: Vec<_> = page.iter().map(|c| c.external_id.as_str()).collect();
    assert_eq!(ids, ["C2", "C3"]);

    let revoked = store
        .containers
        .fetch_past_cursor(connector_id, "T1", Some(Permission::None), None, 10)
        .await?;
    let ids: Vec<_> = revoked.iter().map(|c| c.external_id.as_str()).collect();
    assert_eq!(ids, ["C1", "C4"]);

    assert!(
        store
            .containers
            .any_readable(connector_id, "T1", NodeKind::SlackChannel)
            .await?
    );
    Ok(())
}

#[tokio::test]
async fn container_with_leaves_is_not_empty() -> Result<()> {
    let (store, connector_id) = store_with_connector(ProviderKind::Slack).await?;
    let busy = store
        .containers
        .create(channel(connector_id, "C1", Permission::Read))
        .await?;
    let idle = store
        .containers
        .create(channel(connector_id, "C2", Permission::Read))
        .await?;
    store.leaves.upsert(thread(connector_id, "1.1", "C1")).await?;

    assert!(!store.containers.is_empty(&busy).await?);
    assert!(store.containers.is_empty(&idle).await?);
    Ok(())
}

#[tokio::test]
async fn leaf_upsert_keeps_identity_and_sync_stamp() -> Result<()> {
    let (store, connector_id) = store_with_connector(ProviderKind::Slack).await?;
    let created = store.leaves.upsert(thread(connector_id, "1.1", "C1")).await?;
    assert_eq!(created.last_upserted_ts, None);
    store.leaves.mark_upserted(created.id, Utc::now()).await?;

    let refreshed = store
        .leaves
        .upsert(LeafUpsert {
            title: Some("Renamed".to_string()),
            ..thread(connector_id, "1.1", "C1")
        })
        .await?;

    assert_eq!(refreshed.id, created.id);
    assert_eq!(refreshed.title.as_deref(), Some("Renamed"));
    let stored = store
        .leaves
        .find_one(connector_id, NodeKind::SlackThread, "1.1")
        .await?
        .expect("leaf tracked");
    assert!(stored.last_upserted_ts.is_some());
    Ok(())
}

#[tokio::test]
async fn connector_bookkeeping_tracks_first_success() -> Result<()> {
    let (store, connector_id) = store_with_connector(ProviderKind::Github).await?;
    store
        .connectors
        .record_sync_finished(connector_id, "failed", Some("third_party_rate_limited"), ts(1))
        .await?;
    let first = store
        .connectors
        .record_sync_finished(connector_id, "succeeded", None, ts(2))
        .await?;
    let second = store
        .connectors
        .record_sync_finished(connector_id, "succeeded", None, ts(3))
        .await?;

    assert_eq!(first.error_type, None);
    assert_eq!(first.first_successful_sync_time, second.first_successful_sync_time);
    assert_eq!(
        second.last_sync_successful_time.map(|t| t.to_utc()),
        Some(ts(3))
    );

    let missing = Uuid::new_v4();
    assert!(store.connectors.get(missing).await.is_err());
    Ok(())
}
