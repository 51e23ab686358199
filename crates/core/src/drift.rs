//! Advisory comparison of a local mirror row against the provider's copy.
//!
//! Nothing here mutates state. Callers decide whether to act on the
//! recommended action; only [`DriftAction::is_safe_to_apply`] actions are
//! ever applied automatically.

use serde::Serialize;

use crate::domain::resource::{RemoteId, RemoteObject, ResourceId, ResourceKind, SyncStatus, SyncedResource};
use crate::normalize::name_key;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum DriftAction {
    NoAction,
    /// Move the local status to match the provider.
    UpdateLocalStatus { to: SyncStatus },
    /// Attach the remote id of a provider object that corresponds to an
    /// unlinked local row and mark it active.
    LinkRemoteId { remote_id: RemoteId },
    /// The provider no longer has the object; soft-delete the local row.
    MarkLocalDeleted,
    /// Local fields diverge from the provider; push the local spec again.
    PushLocalSpec,
    /// The local row is deleted but the provider still has the object.
    DeleteRemote { remote_id: RemoteId },
    ManualReview { reason: String },
}

impl DriftAction {
    pub fn is_safe_to_apply(&self) -> bool {
        matches!(
            self,
            Self::UpdateLocalStatus { .. } | Self::LinkRemoteId { .. } | Self::MarkLocalDeleted
        )
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DriftReport {
    pub resource_id: ResourceId,
    pub kind: ResourceKind,
    pub has_drift: bool,
    pub details: Vec<String>,
    pub recommended_action: DriftAction,
    pub remote_status: Option<SyncStatus>,
}

/// Maps the provider's status vocabulary onto local statuses. `None` means
/// the value is not recognized.
pub fn map_remote_status(raw: &str) -> Option<SyncStatus> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "ready" | "active" | "completed" | "published" | "available" | "created" => {
            Some(SyncStatus::Active)
        }
        "pending" | "processing" | "creating" | "queued" | "training" => {
            Some(SyncStatus::Creating)
        }
        "draft" => Some(SyncStatus::Draft),
        "failed" | "error" | "errored" => Some(SyncStatus::Failed),
        "deleted" | "archived" | "removed" => Some(SyncStatus::Deleted),
        _ => None,
    }
}

/// Whether `remote` is the provider copy of an unlinked `local` row.
///
/// Stamped metadata that names another tenant or another local id rules the
/// object out. Otherwise a matching local id is enough, while a name match
/// also needs the stamped tenant to agree.
pub fn corresponds(local: &SyncedResource, remote: &RemoteObject) -> bool {
    let tenant = remote.tenant_id();
    if tenant.is_some_and(|tenant| tenant != local.tenant_id.0) {
        return false;
    }
    match remote.local_id() {
        Some(local_id) => local_id == local.id.0,
        None => {
            tenant.is_some()
                && remote.name.as_deref().is_some_and(|name| name_key(name) == name_key(&local.name))
        }
    }
}

pub fn reconcile(
    local: &SyncedResource,
    remote: Option<&RemoteObject>,
    kind: ResourceKind,
) -> DriftReport {
    let mut details = Vec::new();
    let remote_status = remote.and_then(|object| object.status.as_deref()).and_then(map_remote_status);
    let action = recommend(local, remote, kind, remote_status, &mut details);

    DriftReport {
        resource_id: local.id.clone(),
        kind,
        has_drift: action != DriftAction::NoAction,
        details,
        recommended_action: action,
        remote_status,
    }
}

fn recommend(
    local: &SyncedResource,
    remote: Option<&RemoteObject>,
    kind: ResourceKind,
    remote_status: Option<SyncStatus>,
    details: &mut Vec<String>,
) -> DriftAction {
    if local.kind != kind {
        let reason =
            format!("local record is a {} but was reconciled as a {}", local.kind.as_str(), kind.as_str());
        details.push(reason.clone());
        return DriftAction::ManualReview { reason };
    }

    let Some(remote) = remote else {
        return match (&local.remote_id, local.status) {
            (_, SyncStatus::Deleted) | (None, _) => DriftAction::NoAction,
            (Some(remote_id), _) => {
                details.push(format!("remote {} `{remote_id}` no longer exists", kind.as_str()));
                DriftAction::MarkLocalDeleted
            }
        };
    };

    let Some(local_remote_id) = &local.remote_id else {
        if corresponds(local, remote) {
            details.push(format!(
                "local record has no remote id but remote `{}` corresponds to it",
                remote.remote_id
            ));
            return DriftAction::LinkRemoteId { remote_id: remote.remote_id.clone() };
        }
        details.push(format!("remote `{}` does not correspond to this record", remote.remote_id));
        return DriftAction::ManualReview {
            reason: "unlinked local record has no matching remote object".to_string(),
        };
    };

    if local_remote_id != &remote.remote_id {
        let reason = format!(
            "local remote id `{local_remote_id}` differs from fetched `{}`",
            remote.remote_id
        );
        details.push(reason.clone());
        return DriftAction::ManualReview { reason };
    }

    if local.status == SyncStatus::Deleted {
        if remote_status == Some(SyncStatus::Deleted) {
            return DriftAction::NoAction;
        }
        details.push(format!("local record is deleted but remote `{}` still exists", remote.remote_id));
        return DriftAction::DeleteRemote { remote_id: remote.remote_id.clone() };
    }

    match (remote.status.as_deref(), remote_status) {
        (Some(raw), None) => {
            let reason = format!("unrecognized remote status `{raw}`");
            details.push(reason.clone());
            DriftAction::ManualReview { reason }
        }
        (_, Some(SyncStatus::Deleted)) => {
            details.push(format!(
                "local status is {} but remote reports deleted",
                local.status.as_str()
            ));
            DriftAction::UpdateLocalStatus { to: SyncStatus::Deleted }
        }
        (_, Some(SyncStatus::Failed)) => {
            let reason = format!("remote reports failed while local status is {}", local.status.as_str());
            details.push(reason.clone());
            DriftAction::ManualReview { reason }
        }
        (_, Some(SyncStatus::Creating | SyncStatus::Draft)) => {
            details.push("remote object is still processing".to_string());
            DriftAction::NoAction
        }
        (_, Some(SyncStatus::Active)) | (None, None) => {
            if local.status != SyncStatus::Active {
                details.push(format!(
                    "local status is {} but remote is active",
                    local.status.as_str()
                ));
                return DriftAction::UpdateLocalStatus { to: SyncStatus::Active };
            }
            match remote.name.as_deref() {
                Some(name) if name_key(name) != name_key(&local.name) => {
                    details.push(format!("remote name `{name}` differs from local `{}`", local.name));
                    DriftAction::PushLocalSpec
                }
                _ => DriftAction::NoAction,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use serde_json::json;

    use super::{corresponds, map_remote_status, reconcile, DriftAction};
    use crate::domain::resource::{
        RemoteId, RemoteObject, ResourceId, ResourceKind, ResourceSpec, SyncStatus, SyncedResource,
        VoiceSpec,
    };
    use crate::domain::TenantId;

    fn voice(status: SyncStatus, remote_id: Option<&str>) -> SyncedResource {
        let now = Utc::now();
        SyncedResource {
            tenant_id: TenantId("t-1".to_string()),
            id: ResourceId("vce_1".to_string()),
            kind: ResourceKind::Voice,
            name: "Warm Voice".to_string(),
            remote_id: remote_id.map(|id| RemoteId(id.to_string())),
            status,
            spec: ResourceSpec::Voice(VoiceSpec { name: "Warm Voice".to_string(), settings: json!({}) }),
            last_synced_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn remote(id: &str, status: &str, name: &str) -> RemoteObject {
        RemoteObject {
            remote_id: RemoteId(id.to_string()),
            status: Some(status.to_string()),
            name: Some(name.to_string()),
            data: json!({}),
        }
    }

    #[test]
    fn remote_vocabulary_maps_to_local_statuses() {
        assert_eq!(map_remote_status("READY"), Some(SyncStatus::Active));
        assert_eq!(map_remote_status("completed"), Some(SyncStatus::Active));
        assert_eq!(map_remote_status("training"), Some(SyncStatus::Creating));
        assert_eq!(map_remote_status("errored"), Some(SyncStatus::Failed));
        assert_eq!(map_remote_status("archived"), Some(SyncStatus::Deleted));
        assert_eq!(map_remote_status("exploded"), None);
    }

    #[test]
    fn matching_objects_report_no_drift() {
        let local = voice(SyncStatus::Active, Some("r-1"));
        let report = reconcile(&local, Some(&remote("r-1", "ready", "warm voice")), ResourceKind::Voice);

        assert!(!report.has_drift);
        assert_eq!(report.recommended_action, DriftAction::NoAction);
        assert_eq!(report.remote_status, Some(SyncStatus::Active));
    }

    #[test]
    fn unlinked_record_with_corresponding_remote_recommends_link() {
        let local = voice(SyncStatus::Failed, None);
        let mut object = remote("r-9", "ready", "Another name");
        object.data = json!({ "metadata": { "local_id": "vce_1" } });

        let report = reconcile(&local, Some(&object), ResourceKind::Voice);

        assert!(report.has_drift);
        assert_eq!(
            report.recommended_action,
            DriftAction::LinkRemoteId { remote_id: RemoteId("r-9".to_string()) }
        );
        assert!(report.recommended_action.is_safe_to_apply());
    }

    #[test]
    fn name_match_needs_the_same_tenant_metadata() {
        let local = voice(SyncStatus::Draft, None);
        let mut object = remote("r-3", "ready", "WARM VOICE");

        assert!(!corresponds(&local, &object), "bare name match is not enough");

        object.data = json!({ "metadata": { "tenant_id": "t-1" } });
        assert!(corresponds(&local, &object));

        object.data = json!({ "metadata": { "tenant_id": "t-2" } });
        assert!(!corresponds(&local, &object));

        object.data = json!({ "metadata": { "tenant_id": "t-1", "local_id": "vce_other" } });
        assert!(!corresponds(&local, &object));

        object.data = json!({ "metadata": { "tenant_id": "t-2", "local_id": "vce_1" } });
        assert!(!corresponds(&local, &object));
    }

    #[test]
    fn foreign_tenant_object_is_never_linked() {
        let local = voice(SyncStatus::Draft, None);
        let mut object = remote("rv-tenant-b", "ready", "Warm Voice");
        object.data = json!({ "metadata": { "tenant_id": "tenant-b", "local_id": "vce_other" } });

        let report = reconcile(&local, Some(&object), ResourceKind::Voice);

        assert!(matches!(report.recommended_action, DriftAction::ManualReview { .. }));
        assert!(!report.recommended_action.is_safe_to_apply());
    }

    #[test]
    fn missing_remote_recommends_local_delete() {
        let local = voice(SyncStatus::Active, Some("r-1"));
        let report = reconcile(&local, None, ResourceKind::Voice);

        assert!(report.has_drift);
        assert_eq!(report.recommended_action, DriftAction::MarkLocalDeleted);
    }

    #[test]
    fn remote_deleted_updates_local_status() {
        let local = voice(SyncStatus::Active, Some("r-1"));
        let report = reconcile(&local, Some(&remote("r-1", "archived", "Warm Voice")), ResourceKind::Voice);

        assert_eq!(
            report.recommended_action,
            DriftAction::UpdateLocalStatus { to: SyncStatus::Deleted }
        );
    }

    #[test]
    fn locally_deleted_but_remote_alive_is_reported_not_applied() {
        let local = voice(SyncStatus::Deleted, Some("r-1"));
        let report = reconcile(&local, Some(&remote("r-1", "ready", "Warm Voice")), ResourceKind::Voice);

        assert!(report.has_drift);
        assert!(!report.recommended_action.is_safe_to_apply());
        assert_eq!(
            report.recommended_action,
            DriftAction::DeleteRemote { remote_id: RemoteId("r-1".to_string()) }
        );
    }

    #[test]
    fn renamed_remote_recommends_push() {
        let local = voice(SyncStatus::Active, Some("r-1"));
        let report = reconcile(&local, Some(&remote("r-1", "ready", "Cold Voice")), ResourceKind::Voice);

        assert_eq!(report.recommended_action, DriftAction::PushLocalSpec);
        assert_eq!(report.details.len(), 1);
    }

    #[test]
    fn unknown_remote_status_needs_review() {
        let local = voice(SyncStatus::Active, Some("r-1"));
        let report = reconcile(&local, Some(&remote("r-1", "exploded", "Warm Voice")), ResourceKind::Voice);

        assert!(matches!(report.recommended_action, DriftAction::ManualReview { .. }));
        assert!(report.has_drift);
    }
}
