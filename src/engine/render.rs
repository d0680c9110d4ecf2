//! Document rendering for leaves.

use crate::connectors::RemoteResource;
use crate::documents::DocumentUpsert;
use crate::provider::NodeKind;

/// Renders the indexed text: `# title` followed by the body.
///
/// Returns `None` when the leaf has no content worth indexing.
pub fn render_text(title: &str, body: Option<&str>) -> Option<String> {
    let body = body.map(str::trim).unwrap_or_default();
    if body.is_empty() {
        return None;
    }
    if title.trim().is_empty() {
        return Some(body.to_string());
    }
    Some(format!("# {}\n\n{}", title.trim(), body))
}

/// Title used for tags and folders, falling back to the external id.
pub fn display_title(resource: &RemoteResource) -> String {
    resource
        .title
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| resource.external_id.clone())
}

/// Tags attached to a leaf document.
///
/// `title:` is always first so display titles can be recovered from the index
/// without another provider call.
pub fn tags(kind: NodeKind, resource: &RemoteResource) -> Vec<String> {
    let mut tags = vec![format!("title:{}", display_title(resource))];
    if let Some(created) = resource.created_at {
        tags.push(format!("createdAt:{}", created.timestamp_millis()));
    }
    if let Some(updated) = resource.updated_at {
        tags.push(format!("updatedAt:{}", updated.timestamp_millis()));
    }
    if let (NodeKind::GithubIssue, Some(state)) = (kind, resource.state.as_deref()) {
        tags.push(format!("state:{state}"));
    }
    for tag in &resource.tags {
        if !tags.contains(tag) {
            tags.push(tag.clone());
        }
    }
    tags
}

/// Builds the document store payload for a leaf.
///
/// `parents` must start with the document's own id.
pub fn document(
    kind: NodeKind,
    document_id: &str,
    resource: &RemoteResource,
    parents: Vec<String>,
) -> Option<DocumentUpsert> {
    let text = render_text(&display_title(resource), resource.body.as_deref())?;
    Some(DocumentUpsert {
        document_id: document_id.to_string(),
        text,
        tags: tags(kind, resource),
        parent_id: parents.get(1).cloned(),
        parents,
        source_url: resource.url.clone(),
        timestamp: resource.updated_at.map(|t| t.timestamp_millis()),
    })
}
