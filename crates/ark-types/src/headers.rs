use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::digest::Digest;
use crate::id::ResourceId;
use crate::model::InteractionModel;

/// Server-managed metadata persisted beside a resource's content.
///
/// Headers survive resource deletion: a tombstoned resource keeps its
/// headers with `deleted = true` so a later re-create can be checked for
/// interaction-model and archival-group compatibility.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceHeaders {
    pub id: ResourceId,
    /// Containing resource. `None` only for the repository root.
    pub parent: Option<ResourceId>,
    /// Root of the archival group this resource belongs to, when it is
    /// stored inside another resource's object.
    pub archival_group_id: Option<ResourceId>,
    pub interaction_model: InteractionModel,
    /// `true` when this resource is itself an archival group root.
    pub archival_group: bool,
    pub deleted: bool,
    pub created_by: Option<String>,
    pub created_date: Option<DateTime<Utc>>,
    pub last_modified_by: Option<String>,
    pub last_modified_date: Option<DateTime<Utc>>,
    pub mime_type: Option<String>,
    pub filename: Option<String>,
    pub content_size: Option<u64>,
    /// Digest URNs of the content. Binaries always carry at least the
    /// server-default digest.
    #[serde(default)]
    pub digests: Vec<Digest>,
    /// Logical path of the content file inside the backing object.
    pub content_path: Option<String>,
}

impl ResourceHeaders {
    pub fn new(
        id: ResourceId,
        parent: Option<ResourceId>,
        interaction_model: InteractionModel,
    ) -> Self {
        Self {
            id,
            parent,
            archival_group_id: None,
            interaction_model,
            archival_group: false,
            deleted: false,
            created_by: None,
            created_date: None,
            last_modified_by: None,
            last_modified_date: None,
            mime_type: None,
            filename: None,
            content_size: None,
            digests: Vec::new(),
            content_path: None,
        }
    }

    /// Stamp creation attribution. Also initializes the modification
    /// attribution to the same instant.
    pub fn touch_created(&mut self, principal: Option<&str>, at: DateTime<Utc>) {
        self.created_by = principal.map(str::to_string);
        self.created_date = Some(at);
        self.touch_modified(principal, at);
    }

    pub fn touch_modified(&mut self, principal: Option<&str>, at: DateTime<Utc>) {
        self.last_modified_by = principal.map(str::to_string);
        self.last_modified_date = Some(at);
    }

    /// Turn these headers into a tombstone record.
    pub fn mark_deleted(&mut self, at: DateTime<Utc>) {
        self.deleted = true;
        self.last_modified_date = Some(at);
    }

    pub fn is_archival_group_member(&self) -> bool {
        self.archival_group_id.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digest::DigestAlgorithm;
    use chrono::TimeZone;

    fn sample_id() -> ResourceId {
        ResourceId::parse("info:ark/a/b").unwrap()
    }

    #[test]
    fn new_headers_are_live_and_unattributed() {
        let h = ResourceHeaders::new(
            sample_id(),
            Some(ResourceId::parse("info:ark/a").unwrap()),
            InteractionModel::BasicContainer,
        );
        assert!(!h.deleted);
        assert!(!h.archival_group);
        assert!(h.created_date.is_none());
        assert!(h.digests.is_empty());
    }

    #[test]
    fn touch_created_sets_both_attributions() {
        let mut h = ResourceHeaders::new(sample_id(), None, InteractionModel::NonRdfSource);
        let at = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        h.touch_created(Some("admin"), at);
        assert_eq!(h.created_by.as_deref(), Some("admin"));
        assert_eq!(h.created_date, Some(at));
        assert_eq!(h.last_modified_by.as_deref(), Some("admin"));
        assert_eq!(h.last_modified_date, Some(at));
    }

    #[test]
    fn mark_deleted_keeps_model_for_conflict_checks() {
        let mut h = ResourceHeaders::new(sample_id(), None, InteractionModel::NonRdfSource);
        let at = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        h.mark_deleted(at);
        assert!(h.deleted);
        assert_eq!(h.interaction_model, InteractionModel::NonRdfSource);
        assert_eq!(h.last_modified_date, Some(at));
    }

    #[test]
    fn json_roundtrip() {
        let mut h = ResourceHeaders::new(sample_id(), None, InteractionModel::NonRdfSource);
        h.mime_type = Some("text/plain".to_string());
        h.content_size = Some(5);
        h.digests.push(Digest::new(
            DigestAlgorithm::Md5,
            "5d41402abc4b2a76b9719d911017c592",
        ));
        let json = serde_json::to_string(&h).unwrap();
        let back: ResourceHeaders = serde_json::from_str(&json).unwrap();
        assert_eq!(back, h);
    }
}
