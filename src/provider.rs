//! Provider vocabulary shared by every layer of the sync core.
//!
//! [`ProviderKind`] is the closed set of supported providers and [`NodeKind`]
//! the closed set of resource kinds they expose. Per-provider behavior is
//! selected by matching on these enums rather than by string comparison.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error returned when parsing an unknown provider, node kind or permission.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {what}: '{value}'")]
pub struct ParseKindError {
    pub what: &'static str,
    pub value: String,
}

/// Supported upstream providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Slack,
    Github,
    Intercom,
    Zendesk,
    Notion,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 5] = [
        ProviderKind::Slack,
        ProviderKind::Github,
        ProviderKind::Intercom,
        ProviderKind::Zendesk,
        ProviderKind::Notion,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Slack => "slack",
            ProviderKind::Github => "github",
            ProviderKind::Intercom => "intercom",
            ProviderKind::Zendesk => "zendesk",
            ProviderKind::Notion => "notion",
        }
    }

    /// Fan-out ceiling used when no override is configured.
    ///
    /// Slack's per-method tiers are the tightest of the supported APIs.
    pub fn default_concurrency(&self) -> usize {
        match self {
            ProviderKind::Slack => 5,
            ProviderKind::Github
            | ProviderKind::Intercom
            | ProviderKind::Zendesk
            | ProviderKind::Notion => 10,
        }
    }

    /// The scope kind this provider organizes content under.
    pub fn scope_kind(&self) -> NodeKind {
        match self {
            ProviderKind::Slack => NodeKind::SlackWorkspace,
            ProviderKind::Github => NodeKind::GithubRepo,
            ProviderKind::Intercom => NodeKind::IntercomHelpCenter,
            ProviderKind::Zendesk => NodeKind::ZendeskBrand,
            ProviderKind::Notion => NodeKind::NotionWorkspace,
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = ParseKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ProviderKind::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ParseKindError {
                what: "provider",
                value: s.to_string(),
            })
    }
}

/// Position of a node kind in a provider's resource tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeLevel {
    /// Top-level unit (brand, help center, repo, workspace).
    Scope,
    /// Virtual folder splitting a scope into independently grantable halves.
    Section,
    /// Grouping node below a scope, possibly nested.
    Container,
    /// Unit mirrored 1:1 into the document store.
    Leaf,
}

/// Every resource kind the sync core knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    ZendeskBrand,
    ZendeskHelpCenter,
    ZendeskCategory,
    ZendeskArticle,
    ZendeskTickets,
    ZendeskTicket,
    IntercomHelpCenter,
    IntercomCollection,
    IntercomArticle,
    GithubRepo,
    GithubIssue,
    SlackWorkspace,
    SlackChannel,
    SlackThread,
    NotionWorkspace,
    NotionDatabase,
    NotionPage,
}

impl NodeKind {
    pub const ALL: [NodeKind; 17] = [
        NodeKind::ZendeskBrand,
        NodeKind::ZendeskHelpCenter,
        NodeKind::ZendeskCategory,
        NodeKind::ZendeskArticle,
        NodeKind::ZendeskTickets,
        NodeKind::ZendeskTicket,
        NodeKind::IntercomHelpCenter,
        NodeKind::IntercomCollection,
        NodeKind::IntercomArticle,
        NodeKind::GithubRepo,
        NodeKind::GithubIssue,
        NodeKind::SlackWorkspace,
        NodeKind::SlackChannel,
        NodeKind::SlackThread,
        NodeKind::NotionWorkspace,
        NodeKind::NotionDatabase,
        NodeKind::NotionPage,
    ];

    pub fn provider(&self) -> ProviderKind {
        match self {
            NodeKind::ZendeskBrand
            | NodeKind::ZendeskHelpCenter
            | NodeKind::ZendeskCategory
            | NodeKind::ZendeskArticle
            | NodeKind::ZendeskTickets
            | NodeKind::ZendeskTicket => ProviderKind::Zendesk,
            NodeKind::IntercomHelpCenter
            | NodeKind::IntercomCollection
            | NodeKind::IntercomArticle => ProviderKind::Intercom,
            NodeKind::GithubRepo | NodeKind::GithubIssue => ProviderKind::Github,
            NodeKind::SlackWorkspace | NodeKind::SlackChannel | NodeKind::SlackThread => {
                ProviderKind::Slack
            }
            NodeKind::NotionWorkspace | NodeKind::NotionDatabase | NodeKind::NotionPage => {
                ProviderKind::Notion
            }
        }
    }

    pub fn level(&self) -> NodeLevel {
        match self {
            NodeKind::ZendeskBrand
            | NodeKind::IntercomHelpCenter
            | NodeKind::GithubRepo
            | NodeKind::SlackWorkspace
            | NodeKind::NotionWorkspace => NodeLevel::Scope,
            NodeKind::ZendeskHelpCenter | NodeKind::ZendeskTickets => NodeLevel::Section,
            NodeKind::ZendeskCategory
            | NodeKind::IntercomCollection
            | NodeKind::SlackChannel
            | NodeKind::NotionDatabase => NodeLevel::Container,
            NodeKind::ZendeskArticle
            | NodeKind::ZendeskTicket
            | NodeKind::IntercomArticle
            | NodeKind::GithubIssue
            | NodeKind::SlackThread
            | NodeKind::NotionPage => NodeLevel::Leaf,
        }
    }

    /// Snake-case name persisted in the `kind` columns.
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::ZendeskBrand => "zendesk_brand",
            NodeKind::ZendeskHelpCenter => "zendesk_help_center",
            NodeKind::ZendeskCategory => "zendesk_category",
            NodeKind::ZendeskArticle => "zendesk_article",
            NodeKind::ZendeskTickets => "zendesk_tickets",
            NodeKind::ZendeskTicket => "zendesk_ticket",
            NodeKind::IntercomHelpCenter => "intercom_help_center",
            NodeKind::IntercomCollection => "intercom_collection",
            NodeKind::IntercomArticle => "intercom_article",
            NodeKind::GithubRepo => "github_repo",
            NodeKind::GithubIssue => "github_issue",
            NodeKind::SlackWorkspace => "slack_workspace",
            NodeKind::SlackChannel => "slack_channel",
            NodeKind::SlackThread => "slack_thread",
            NodeKind::NotionWorkspace => "notion_workspace",
            NodeKind::NotionDatabase => "notion_database",
            NodeKind::NotionPage => "notion_page",
        }
    }

    /// Segment used inside internal ids (`zendesk-help-center-...`).
    pub fn id_segment(&self) -> &'static str {
        match self {
            NodeKind::ZendeskBrand => "brand",
            NodeKind::ZendeskHelpCenter => "help-center",
            NodeKind::ZendeskCategory => "category",
            NodeKind::ZendeskArticle => "article",
            NodeKind::ZendeskTickets => "tickets",
            NodeKind::ZendeskTicket => "ticket",
            NodeKind::IntercomHelpCenter => "help-center",
            NodeKind::IntercomCollection => "collection",
            NodeKind::IntercomArticle => "article",
            NodeKind::GithubRepo => "repo",
            NodeKind::GithubIssue => "issue",
            NodeKind::SlackWorkspace => "workspace",
            NodeKind::SlackChannel => "channel",
            NodeKind::SlackThread => "thread",
            NodeKind::NotionWorkspace => "workspace",
            NodeKind::NotionDatabase => "database",
            NodeKind::NotionPage => "page",
        }
    }

    /// Kinds discovered directly below this kind.
    pub fn child_kinds(&self) -> &'static [NodeKind] {
        match self {
            NodeKind::ZendeskBrand => &[NodeKind::ZendeskCategory, NodeKind::ZendeskTicket],
            NodeKind::ZendeskCategory => &[NodeKind::ZendeskArticle],
            NodeKind::IntercomHelpCenter => &[NodeKind::IntercomCollection],
            NodeKind::IntercomCollection => {
                &[NodeKind::IntercomCollection, NodeKind::IntercomArticle]
            }
            NodeKind::GithubRepo => &[NodeKind::GithubIssue],
            NodeKind::SlackWorkspace => &[NodeKind::SlackChannel],
            NodeKind::SlackChannel => &[NodeKind::SlackThread],
            NodeKind::NotionWorkspace => &[NodeKind::NotionDatabase],
            NodeKind::NotionDatabase => &[NodeKind::NotionPage],
            _ => &[],
        }
    }

    /// Section folder that sits between the scope and nodes of this kind.
    pub fn section(&self) -> Option<NodeKind> {
        match self {
            NodeKind::ZendeskCategory | NodeKind::ZendeskArticle => {
                Some(NodeKind::ZendeskHelpCenter)
            }
            NodeKind::ZendeskTicket => Some(NodeKind::ZendeskTickets),
            _ => None,
        }
    }

    /// Independently grantable sections of a scope kind.
    pub fn sections(&self) -> &'static [NodeKind] {
        match self {
            NodeKind::ZendeskBrand => &[NodeKind::ZendeskHelpCenter, NodeKind::ZendeskTickets],
            _ => &[],
        }
    }

    /// Container kind a node of this kind hangs off, if any.
    ///
    /// For nested containers this is their own kind.
    pub fn parent_container_kind(&self) -> Option<NodeKind> {
        match self {
            NodeKind::ZendeskArticle => Some(NodeKind::ZendeskCategory),
            NodeKind::IntercomArticle | NodeKind::IntercomCollection => {
                Some(NodeKind::IntercomCollection)
            }
            NodeKind::SlackThread => Some(NodeKind::SlackChannel),
            NodeKind::NotionPage => Some(NodeKind::NotionDatabase),
            _ => None,
        }
    }

    /// Whether leaves of this kind are subject to the connector retention window.
    pub fn has_retention(&self) -> bool {
        matches!(self, NodeKind::ZendeskTicket)
    }

    /// Maximum container nesting depth for this kind.
    pub fn max_depth(&self) -> usize {
        match self {
            NodeKind::IntercomCollection => 3,
            _ => 1,
        }
    }

    /// Leaf kinds of a provider, used by GC sweeps.
    pub fn leaf_kinds(provider: ProviderKind) -> Vec<NodeKind> {
        NodeKind::ALL
            .into_iter()
            .filter(|k| k.provider() == provider && k.level() == NodeLevel::Leaf)
            .collect()
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeKind {
    type Err = ParseKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NodeKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| ParseKindError {
                what: "node kind",
                value: s.to_string(),
            })
    }
}

/// Access level granted on a scope, section or container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    None,
    Read,
    ReadWrite,
}

impl Permission {
    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::None => "none",
            Permission::Read => "read",
            Permission::ReadWrite => "read_write",
        }
    }

    pub fn is_readable(&self) -> bool {
        matches!(self, Permission::Read | Permission::ReadWrite)
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Permission {
    type Err = ParseKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(Permission::None),
            "read" => Ok(Permission::Read),
            "read_write" => Ok(Permission::ReadWrite),
            other => Err(ParseKindError {
                what: "permission",
                value: other.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_kinds_round_trip_through_their_names() {
        for kind in NodeKind::ALL {
            assert_eq!(kind.as_str().parse::<NodeKind>().unwrap(), kind);
        }
    }

    #[test]
    fn provider_parsing_is_case_insensitive() {
        assert_eq!("Zendesk".parse::<ProviderKind>().unwrap(), ProviderKind::Zendesk);
        assert!("dropbox".parse::<ProviderKind>().is_err());
    }

    #[test]
    fn slack_has_the_tightest_default_concurrency() {
        assert_eq!(ProviderKind::Slack.default_concurrency(), 5);
        assert_eq!(ProviderKind::Zendesk.default_concurrency(), 10);
    }

    #[test]
    fn zendesk_sections_split_help_center_and_tickets() {
        assert_eq!(NodeKind::ZendeskArticle.section(), Some(NodeKind::ZendeskHelpCenter));
        assert_eq!(NodeKind::ZendeskTicket.section(), Some(NodeKind::ZendeskTickets));
        assert_eq!(NodeKind::IntercomArticle.section(), None);
    }

    #[test]
    fn only_nested_kinds_point_at_their_own_kind() {
        assert_eq!(
            NodeKind::IntercomCollection.parent_container_kind(),
            Some(NodeKind::IntercomCollection)
        );
        assert_eq!(NodeKind::ZendeskCategory.parent_container_kind(), None);
        assert_eq!(NodeKind::GithubIssue.parent_container_kind(), None);
        assert_eq!(
            NodeKind::ZendeskArticle.parent_container_kind(),
            Some(NodeKind::ZendeskCategory)
        );
    }

    #[test]
    fn permission_ordering_matches_access_strength() {
        assert!(Permission::ReadWrite > Permission::Read);
        assert!(Permission::Read > Permission::None);
        assert!(!Permission::None.is_readable());
    }

    #[test]
    fn every_scope_kind_belongs_to_its_provider() {
        for provider in ProviderKind::ALL {
            let scope = provider.scope_kind();
            assert_eq!(scope.provider(), provider);
            assert_eq!(scope.level(), NodeLevel::Scope);
        }
    }
}
