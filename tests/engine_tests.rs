//! Reconciliation engine behavior against a scripted provider.

#[path = "test_utils/mod.rs"]
mod test_utils;

use anyhow::Result;
use chrono::{Duration, Utc};
use provider_sync::connectors::{RemoteResource, ResourceRef};
use provider_sync::documents::StoreCall;
use provider_sync::engine::Outcome;
use provider_sync::ids::section_id;
use provider_sync::provider::{NodeKind, Permission, ProviderKind};
use test_utils::{Harness, ts};

fn recent() -> chrono::DateTime<Utc> {
    Utc::now() - Duration::days(1)
}

/// Brand 42 with category 7 holding article 99, plus one solved ticket.
async fn zendesk_brand() -> Result<Harness> {
    let h = Harness::new(ProviderKind::Zendesk).await?;
    h.provider.put_scope("42", "Acme");
    h.provider
        .put_container("42", NodeKind::ZendeskCategory, "7", None, "Billing");
    h.provider.put_leaf(
        "42",
        NodeKind::ZendeskArticle,
        "99",
        Some("7"),
        "Refunds",
        "How refunds work.",
        ts(2),
    );
    h.provider.put_leaf(
        "42",
        NodeKind::ZendeskTicket,
        "500",
        None,
        "Card declined",
        "Customer could not pay.",
        recent(),
    );
    h.grant_brand("42", Some(Permission::Read), Some(Permission::Read))
        .await?;
    h.grant_container("42", NodeKind::ZendeskCategory, "7", None, Permission::Read)
        .await?;
    Ok(h)
}

#[tokio::test]
async fn full_sync_publishes_leaves_with_parent_chains() -> Result<()> {
    let h = zendesk_brand().await?;
    let report = h.driver.sync(h.connector_id(), false).await?;
    assert_eq!(report.leaves.upserted, 2);

    let brand = h.id(NodeKind::ZendeskBrand, "42");
    let help_center = section_id(NodeKind::ZendeskHelpCenter, h.connector_id(), "42");
    let tickets = section_id(NodeKind::ZendeskTickets, h.connector_id(), "42");
    let category = h.id(NodeKind::ZendeskCategory, "7");

    let article = h
        .docs()
        .document(&h.id(NodeKind::ZendeskArticle, "99"))
        .expect("article upserted");
    assert_eq!(
        article.parents,
        vec![
            h.id(NodeKind::ZendeskArticle, "99"),
            category.clone(),
            help_center.clone(),
            brand.clone()
        ]
    );
    assert_eq!(article.parent_id.as_deref(), Some(category.as_str()));
    assert!(article.text.starts_with("# Refunds"));
    assert_eq!(article.tags[0], "title:Refunds");

    let ticket = h
        .docs()
        .document(&h.id(NodeKind::ZendeskTicket, "500"))
        .expect("ticket upserted");
    assert_eq!(
        ticket.parents,
        vec![h.id(NodeKind::ZendeskTicket, "500"), tickets.clone(), brand.clone()]
    );

    for folder in [&brand, &help_center, &tickets, &category] {
        assert!(h.docs().folder(folder).is_some(), "missing folder {folder}");
    }
    let category_folder = h.docs().folder(&category).unwrap();
    assert_eq!(category_folder.parent_id.as_deref(), Some(help_center.as_str()));

    let connector = h.store.connectors.get(h.connector_id()).await?;
    assert_eq!(connector.last_sync_status.as_deref(), Some("succeeded"));
    assert!(connector.first_successful_sync_time.is_some());
    Ok(())
}

#[tokio::test]
async fn second_pass_without_changes_writes_nothing() -> Result<()> {
    let h = zendesk_brand().await?;
    h.driver.sync(h.connector_id(), false).await?;
    h.docs().clear_calls();

    let report = h.driver.sync(h.connector_id(), false).await?;
    assert_eq!(report.leaves.upserted, 0);
    assert_eq!(report.leaves.skipped, 2);
    let writes: Vec<_> = h
        .docs()
        .calls()
        .into_iter()
        .filter(|c| matches!(c, StoreCall::UpsertDocument(_) | StoreCall::UpsertFolder(_)))
        .collect();
    assert!(writes.is_empty(), "unexpected writes: {writes:?}");
    Ok(())
}

#[tokio::test]
async fn only_leaves_modified_upstream_are_sent_again() -> Result<()> {
    let h = zendesk_brand().await?;
    h.driver.sync(h.connector_id(), false).await?;

    h.provider.edit(NodeKind::ZendeskArticle, "99", |article| {
        article.body = Some("Refunds now take two days.".to_string());
        article.updated_at = Some(Utc::now() + Duration::hours(1));
    });
    h.docs().clear_calls();
    let report = h.driver.sync(h.connector_id(), false).await?;
    assert_eq!(report.leaves.upserted, 1);
    assert_eq!(
        h.docs().calls(),
        vec![StoreCall::UpsertDocument(h.id(NodeKind::ZendeskArticle, "99"))]
    );
    let article = h
        .docs()
        .document(&h.id(NodeKind::ZendeskArticle, "99"))
        .unwrap();
    assert!(article.text.contains("two days"));

    let forced = h.driver.sync(h.connector_id(), true).await?;
    assert_eq!(forced.leaves.upserted, 2);
    Ok(())
}

#[tokio::test]
async fn revoked_help_center_keeps_explicitly_granted_categories() -> Result<()> {
    let h = zendesk_brand().await?;
    h.driver.sync(h.connector_id(), false).await?;

    h.grant_brand("42", Some(Permission::None), Some(Permission::Read))
        .await?;
    let ctx = h.context(false).await?;
    let outcome = h.engine.reconcile_scope(&ctx, "42").await?;
    assert_eq!(outcome, Outcome::Downgraded);

    let scope = h
        .store
        .scopes
        .find_one(h.connector_id(), "42")
        .await?
        .unwrap();
    assert_eq!(scope.help_center_permission, None);
    assert_eq!(scope.tickets_permission.as_deref(), Some("read"));

    let help_center = section_id(NodeKind::ZendeskHelpCenter, h.connector_id(), "42");
    assert!(h.docs().folder(&help_center).is_none());
    assert!(
        h.docs()
            .document(&h.id(NodeKind::ZendeskArticle, "99"))
            .is_some()
    );
    assert!(
        h.docs()
            .document(&h.id(NodeKind::ZendeskTicket, "500"))
            .is_some()
    );
    assert!(
        h.store
            .containers
            .find_one(h.connector_id(), NodeKind::ZendeskCategory, "7")
            .await?
            .is_some()
    );

    // Tickets go too and no category is granted any more: the brand goes.
    h.grant_brand("42", None, Some(Permission::None)).await?;
    h.set_container_permission(NodeKind::ZendeskCategory, "7", Permission::None)
        .await?;
    let outcome = h.engine.reconcile_scope(&ctx, "42").await?;
    assert_eq!(outcome, Outcome::Deleted);

    assert!(
        h.store
            .scopes
            .find_one(h.connector_id(), "42")
            .await?
            .is_none()
    );
    assert!(
        h.store
            .containers
            .find_by_scope(h.connector_id(), "42")
            .await?
            .is_empty()
    );
    assert_eq!(h.leaf_count("42").await?, 0);
    assert!(h.docs().document_ids().is_empty());
    assert!(h.docs().folder_ids().is_empty());
    Ok(())
}

#[tokio::test]
async fn revoked_tickets_section_drops_only_tickets() -> Result<()> {
    let h = zendesk_brand().await?;
    h.driver.sync(h.connector_id(), false).await?;

    h.grant_brand("42", Some(Permission::Read), Some(Permission::None))
        .await?;
    let report = h.driver.sync(h.connector_id(), false).await?;
    assert_eq!(report.downgraded, 1);

    assert!(
        h.docs()
            .document(&h.id(NodeKind::ZendeskTicket, "500"))
            .is_none()
    );
    let tickets = section_id(NodeKind::ZendeskTickets, h.connector_id(), "42");
    assert!(h.docs().folder(&tickets).is_none());
    assert!(
        h.docs()
            .document(&h.id(NodeKind::ZendeskArticle, "99"))
            .is_some()
    );
    Ok(())
}

#[tokio::test]
async fn whole_scope_revocation_removes_everything() -> Result<()> {
    let h = Harness::new(ProviderKind::Github).await?;
    h.provider.put_scope("1296269", "octocat/Hello-World");
    for n in 1..=3 {
        h.provider.put_leaf(
            "1296269",
            NodeKind::GithubIssue,
            &n.to_string(),
            None,
            &format!("Issue {n}"),
            "Steps to reproduce.",
            ts(3),
        );
    }
    h.grant_scope("1296269", Permission::Read).await?;
    let report = h.driver.sync(h.connector_id(), false).await?;
    assert_eq!(report.leaves.upserted, 3);

    h.grant_scope("1296269", Permission::None).await?;
    let report = h.driver.sync(h.connector_id(), false).await?;
    assert_eq!(report.deleted, 1);
    assert!(h.docs().document_ids().is_empty());
    assert!(h.docs().folder_ids().is_empty());
    assert!(h.store.scopes.find_all(h.connector_id()).await?.is_empty());
    assert_eq!(h.leaf_count("1296269").await?, 0);
    Ok(())
}

#[tokio::test]
async fn vanished_upstream_scope_is_deleted() -> Result<()> {
    let h = Harness::new(ProviderKind::Notion).await?;
    h.provider.put_scope("ws", "Team");
    h.provider
        .put_container("ws", NodeKind::NotionDatabase, "db1", None, "Roadmap");
    h.provider.put_leaf(
        "ws",
        NodeKind::NotionPage,
        "p1",
        Some("db1"),
        "Q3",
        "Ship it.",
        ts(4),
    );
    h.grant_scope("ws", Permission::Read).await?;
    h.driver.sync(h.connector_id(), false).await?;
    assert_eq!(h.leaf_count("ws").await?, 1);

    h.provider.remove(NodeKind::NotionWorkspace, "ws");
    let ctx = h.context(false).await?;
    assert_eq!(h.engine.reconcile_scope(&ctx, "ws").await?, Outcome::Deleted);
    assert!(h.docs().document_ids().is_empty());
    assert!(h.docs().folder_ids().is_empty());
    Ok(())
}

#[tokio::test]
async fn leaves_under_revoked_containers_are_dropped() -> Result<()> {
    let h = Harness::new(ProviderKind::Slack).await?;
    h.provider.put_scope("T1", "Acme");
    h.provider
        .put_container("T1", NodeKind::SlackChannel, "C1", None, "general");
    h.provider.put_leaf(
        "T1",
        NodeKind::SlackThread,
        "1712.01",
        Some("C1"),
        "Deploy",
        "Deploying now.",
        ts(5),
    );
    h.grant_scope("T1", Permission::Read).await?;
    h.driver.sync(h.connector_id(), false).await?;

    h.set_container_permission(NodeKind::SlackChannel, "C1", Permission::None)
        .await?;
    let ctx = h.context(false).await?;
    let node = provider_sync::connectors::ResourceRef::new(NodeKind::SlackThread, "1712.01", "T1");
    assert_eq!(
        h.engine.reconcile_leaf(&ctx, &node, None).await?,
        Outcome::Deleted
    );
    assert!(
        h.docs()
            .document(&h.id(NodeKind::SlackThread, "1712.01"))
            .is_none()
    );
    // Untracked and unwanted: nothing to do.
    assert_eq!(
        h.engine.reconcile_leaf(&ctx, &node, None).await?,
        Outcome::Noop
    );
    Ok(())
}

#[tokio::test]
async fn open_tickets_are_skipped_and_deleted_tickets_removed() -> Result<()> {
    let h = zendesk_brand().await?;
    h.driver.sync(h.connector_id(), false).await?;
    let ctx = h.context(false).await?;
    let node = provider_sync::connectors::ResourceRef::new(NodeKind::ZendeskTicket, "500", "42");

    h.provider.edit(NodeKind::ZendeskTicket, "500", |t| {
        t.state = Some("open".to_string());
    });
    assert_eq!(
        h.engine.reconcile_leaf(&ctx, &node, None).await?,
        Outcome::Skipped
    );
    assert!(
        h.docs()
            .document(&h.id(NodeKind::ZendeskTicket, "500"))
            .is_some()
    );

    h.provider.edit(NodeKind::ZendeskTicket, "500", |t| {
        t.state = Some("deleted".to_string());
    });
    assert_eq!(
        h.engine.reconcile_leaf(&ctx, &node, None).await?,
        Outcome::Deleted
    );
    assert!(
        h.docs()
            .document(&h.id(NodeKind::ZendeskTicket, "500"))
            .is_none()
    );
    Ok(())
}

#[tokio::test]
async fn leaves_without_content_are_tracked_but_not_indexed() -> Result<()> {
    let h = Harness::new(ProviderKind::Github).await?;
    h.provider.put_scope("r", "repo");
    h.provider
        .put_leaf("r", NodeKind::GithubIssue, "1", None, "Empty", "   ", ts(3));
    h.grant_scope("r", Permission::Read).await?;
    let report = h.driver.sync(h.connector_id(), false).await?;
    assert_eq!(report.leaves.upserted, 0);
    assert_eq!(report.leaves.skipped, 1);
    assert_eq!(h.leaf_count("r").await?, 1);
    assert!(h.docs().document_ids().is_empty());
    Ok(())
}

#[tokio::test]
async fn nested_collections_build_full_parent_chains() -> Result<()> {
    let h = Harness::new(ProviderKind::Intercom).await?;
    h.provider.put_scope("hc", "Help");
    h.provider
        .put_container("hc", NodeKind::IntercomCollection, "c1", None, "Getting started");
    h.provider
        .put_container("hc", NodeKind::IntercomCollection, "c2", Some("c1"), "Setup");
    h.provider.put_leaf(
        "hc",
        NodeKind::IntercomArticle,
        "a1",
        Some("c2"),
        "Install",
        "Run the installer.",
        ts(6),
    );
    h.grant_scope("hc", Permission::Read).await?;
    h.driver.sync(h.connector_id(), false).await?;

    let root = h.id(NodeKind::IntercomHelpCenter, "hc");
    let c1 = h.id(NodeKind::IntercomCollection, "c1");
    let c2 = h.id(NodeKind::IntercomCollection, "c2");
    let article = h
        .docs()
        .document(&h.id(NodeKind::IntercomArticle, "a1"))
        .expect("article upserted");
    assert_eq!(
        article.parents,
        vec![
            h.id(NodeKind::IntercomArticle, "a1"),
            c2.clone(),
            c1.clone(),
            root.clone()
        ]
    );
    let folder = h.docs().folder(&c2).unwrap();
    assert_eq!(folder.parents, vec![c2, c1.clone(), root]);
    assert_eq!(folder.parent_id, Some(c1));
    Ok(())
}

#[tokio::test]
async fn collections_below_the_third_level_are_not_synced() -> Result<()> {
    let h = Harness::new(ProviderKind::Intercom).await?;
    h.provider.put_scope("hc", "Help");
    let levels = [("c1", None), ("c2", Some("c1")), ("c3", Some("c2")), ("c4", Some("c3"))];
    for (collection, parent) in levels {
        h.provider
            .put_container("hc", NodeKind::IntercomCollection, collection, parent, collection);
        h.provider.put_leaf(
            "hc",
            NodeKind::IntercomArticle,
            &format!("a-{collection}"),
            Some(collection),
            "Article",
            "Body.",
            ts(6),
        );
    }
    h.grant_scope("hc", Permission::Read).await?;
    h.driver.sync(h.connector_id(), false).await?;

    for collection in ["c1", "c2", "c3"] {
        assert!(
            h.store
                .containers
                .find_one(h.connector_id(), NodeKind::IntercomCollection, collection)
                .await?
                .is_some(),
            "{collection} tracked"
        );
        let article = h.id(NodeKind::IntercomArticle, &format!("a-{collection}"));
        assert!(h.docs().document(&article).is_some(), "{article} indexed");
    }
    assert!(
        h.store
            .containers
            .find_one(h.connector_id(), NodeKind::IntercomCollection, "c4")
            .await?
            .is_none()
    );
    assert!(h.docs().folder(&h.id(NodeKind::IntercomCollection, "c4")).is_none());
    assert!(
        h.docs()
            .document(&h.id(NodeKind::IntercomArticle, "a-c4"))
            .is_none()
    );
    assert_eq!(h.leaf_count("hc").await?, 3);
    assert_eq!(
        h.engine
            .container_depth(h.connector_id(), NodeKind::IntercomCollection, "c3")
            .await?,
        3
    );

    let mut discovered = RemoteResource::new(NodeKind::IntercomCollection, "c4");
    discovered.parent_external_id = Some("c3".to_string());
    let ctx = h.context(false).await?;
    let outcome = h
        .engine
        .reconcile_container(
            &ctx,
            &ResourceRef::new(NodeKind::IntercomCollection, "c4", "hc"),
            Some(Permission::Read),
            Some(discovered),
        )
        .await?;
    assert_eq!(outcome, Outcome::Noop);
    Ok(())
}

#[tokio::test]
async fn draft_articles_are_removed() -> Result<()> {
    let h = Harness::new(ProviderKind::Intercom).await?;
    h.provider.put_scope("hc", "Help");
    h.provider
        .put_container("hc", NodeKind::IntercomCollection, "c1", None, "FAQ");
    h.provider.put_leaf(
        "hc",
        NodeKind::IntercomArticle,
        "a1",
        Some("c1"),
        "Pricing",
        "It is free.",
        ts(6),
    );
    h.grant_scope("hc", Permission::Read).await?;
    h.driver.sync(h.connector_id(), false).await?;
    assert_eq!(h.leaf_count("hc").await?, 1);

    h.provider.edit(NodeKind::IntercomArticle, "a1", |a| {
        a.state = Some("draft".to_string());
        a.updated_at = Some(Utc::now() + Duration::hours(1));
    });
    h.driver.sync(h.connector_id(), false).await?;
    assert_eq!(h.leaf_count("hc").await?, 0);
    assert!(h.docs().document_ids().is_empty());
    Ok(())
}
