//! Internal document and folder ids.
//!
//! Ids are derived deterministically from the connector id and the provider's
//! external id, so re-deriving them after a crash always lands on the same
//! document store entry: `{provider}-{segment}-{connector_id}-{external_id}`.
//! Section folders reuse the scope's external id.

use uuid::Uuid;

use crate::provider::NodeKind;

/// Builds the internal id of a node.
pub fn internal_id(kind: NodeKind, connector_id: Uuid, external_id: &str) -> String {
    format!(
        "{}-{}-{}-{}",
        kind.provider(),
        kind.id_segment(),
        connector_id,
        external_id
    )
}

/// Internal id of the section folder (help center, tickets) of a scope.
pub fn section_id(section: NodeKind, connector_id: Uuid, scope_external_id: &str) -> String {
    internal_id(section, connector_id, scope_external_id)
}

/// Recovers the kind and external id from an internal id minted for `connector_id`.
///
/// Returns `None` for ids of other connectors or unknown prefixes.
pub fn parse_internal_id(connector_id: Uuid, internal_id: &str) -> Option<(NodeKind, String)> {
    NodeKind::ALL.into_iter().find_map(|kind| {
        let prefix = format!("{}-{}-{}-", kind.provider(), kind.id_segment(), connector_id);
        internal_id
            .strip_prefix(&prefix)
            .filter(|rest| !rest.is_empty())
            .map(|rest| (kind, rest.to_string()))
    })
}
