//! Per-kind reconciliation rules.
//!
//! The downgrade and deletion conditions differ between providers and are
//! spelled out kind by kind here; the engine only asks these functions what to
//! do.

use chrono::{DateTime, Utc};

use crate::models::sync_scope;
use crate::provider::{NodeKind, Permission};

/// How revocation applies to a scope kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeRule {
    /// Sections are granted and revoked independently; the scope goes away only
    /// when every section is off and no explicitly granted container is left.
    Sectioned,
    /// One grant covers the whole scope; `none` means full deletion.
    Whole,
}

pub fn scope_rule(kind: NodeKind) -> ScopeRule {
    match kind {
        NodeKind::ZendeskBrand => ScopeRule::Sectioned,
        NodeKind::IntercomHelpCenter
        | NodeKind::GithubRepo
        | NodeKind::SlackWorkspace
        | NodeKind::NotionWorkspace => ScopeRule::Whole,
        // Not scope kinds; treated as a plain grant.
        _ => ScopeRule::Whole,
    }
}

/// What a scope reconciliation must do before refreshing the scope itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScopeDecision {
    /// Delete the scope and everything below it.
    Delete,
    /// Keep the scope; clean up the listed revoked sections first.
    Keep { revoked_sections: Vec<NodeKind> },
}

/// Zendesk brand rule.
///
/// * tickets revoked, help center still on: drop the tickets section only;
/// * help center revoked: drop the help-center folder, leave categories that
///   still carry their own grant alone;
/// * every section off and no readable category: delete the brand.
fn decide_zendesk_brand(scope: &sync_scope::Model, readable_categories: bool) -> ScopeDecision {
    let help_center = scope.help_center_permission();
    let tickets = scope.tickets_permission();
    let help_center_on = help_center.is_some_and(|p| p.is_readable());
    let tickets_on = tickets.is_some_and(|p| p.is_readable());

    if !help_center_on && !tickets_on && !readable_categories {
        return ScopeDecision::Delete;
    }

    let mut revoked_sections = Vec::new();
    if tickets == Some(Permission::None) {
        revoked_sections.push(NodeKind::ZendeskTickets);
    }
    if help_center == Some(Permission::None) {
        revoked_sections.push(NodeKind::ZendeskHelpCenter);
    }
    ScopeDecision::Keep { revoked_sections }
}

/// Decides the fate of a scope from its grants.
///
/// `readable_containers` tells whether any container of the scope still
/// carries a readable grant of its own.
pub fn decide_scope(
    kind: NodeKind,
    scope: &sync_scope::Model,
    readable_containers: bool,
) -> ScopeDecision {
    match (scope_rule(kind), kind) {
        (ScopeRule::Sectioned, NodeKind::ZendeskBrand) => {
            decide_zendesk_brand(scope, readable_containers)
        }
        // Intercom help centers, GitHub repos, Slack and Notion workspaces have
        // no partial state: a readable scope stays even when it is empty.
        _ => {
            if scope.scope_permission().is_readable() {
                ScopeDecision::Keep {
                    revoked_sections: Vec::new(),
                }
            } else {
                ScopeDecision::Delete
            }
        }
    }
}

/// Child kinds whose discovery a scope currently allows.
///
/// Zendesk brands discover categories only while the help center is readable
/// and tickets only while tickets are readable.
pub fn discoverable_children(kind: NodeKind, scope: &sync_scope::Model) -> Vec<NodeKind> {
    kind.child_kinds()
        .iter()
        .copied()
        .filter(|child| scope.permission_for(*child).is_readable())
        .collect()
}

/// What to do with a leaf given its upstream lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Indexability {
    Index,
    /// Not indexed now, not removed either.
    Skip,
    /// Take the delete path.
    Delete,
}

pub fn indexability(kind: NodeKind, state: Option<&str>) -> Indexability {
    match kind {
        NodeKind::ZendeskTicket => match state {
            Some("deleted") => Indexability::Delete,
            Some("solved") | Some("closed") => Indexability::Index,
            _ => Indexability::Skip,
        },
        NodeKind::IntercomArticle => match state {
            Some("draft") => Indexability::Delete,
            _ => Indexability::Index,
        },
        _ => Indexability::Index,
    }
}

/// Whether a leaf already upserted at `last_upserted` must be sent again.
///
/// Without an upstream modification time a previously upserted leaf is
/// considered current.
pub fn needs_upsert(
    force_resync: bool,
    last_upserted: Option<DateTime<Utc>>,
    upstream_updated: Option<DateTime<Utc>>,
) -> bool {
    if force_resync {
        return true;
    }
    match (last_upserted, upstream_updated) {
        (None, _) => true,
        (Some(last), Some(upstream)) => last < upstream,
        (Some(_), None) => false,
    }
}
