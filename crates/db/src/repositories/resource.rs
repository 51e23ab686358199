use sqlx::{sqlite::SqliteRow, Row};

use dialsync_core::domain::format_timestamp;
use dialsync_core::domain::resource::{
    RemoteId, ResourceId, ResourceKind, ResourceSpec, SyncStatus, SyncedResource,
};
use dialsync_core::domain::TenantId;
use dialsync_core::normalize::name_key;

use super::{
    is_unique_violation, parse_optional_timestamp, parse_timestamp, RepositoryError,
    ResourceRepository,
};
use crate::DbPool;

const SELECT_COLUMNS: &str = "SELECT
    tenant_id,
    id,
    kind,
    name,
    remote_id,
    status,
    spec_json,
    last_synced_at,
    created_at,
    updated_at
 FROM synced_resource";

pub struct SqlResourceRepository {
    pool: DbPool,
}

impl SqlResourceRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl ResourceRepository for SqlResourceRepository {
    async fn find(
        &self,
        tenant: &TenantId,
        id: &ResourceId,
    ) -> Result<Option<SyncedResource>, RepositoryError> {
        let row = sqlx::query(&format!("{SELECT_COLUMNS} WHERE tenant_id = ? AND id = ?"))
            .bind(&tenant.0)
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.map(resource_from_row).transpose()
    }

    async fn find_by_remote_id(
        &self,
        tenant: &TenantId,
        remote_id: &RemoteId,
    ) -> Result<Option<SyncedResource>, RepositoryError> {
        let row = sqlx::query(&format!(
            "{SELECT_COLUMNS} WHERE tenant_id = ? AND remote_id = ? ORDER BY updated_at DESC LIMIT 1"
        ))
        .bind(&tenant.0)
        .bind(&remote_id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(resource_from_row).transpose()
    }

    async fn find_by_name(
        &self,
        tenant: &TenantId,
        kind: ResourceKind,
        name: &str,
    ) -> Result<Option<SyncedResource>, RepositoryError> {
        let row = sqlx::query(&format!(
            "{SELECT_COLUMNS}
             WHERE tenant_id = ? AND kind = ? AND name_key = ? AND status <> 'deleted'"
        ))
        .bind(&tenant.0)
        .bind(kind.as_str())
        .bind(name_key(name))
        .fetch_optional(&self.pool)
        .await?;

        row.map(resource_from_row).transpose()
    }

    async fn list(
        &self,
        tenant: &TenantId,
        kind: Option<ResourceKind>,
    ) -> Result<Vec<SyncedResource>, RepositoryError> {
        let rows = if let Some(kind) = kind {
            sqlx::query(&format!(
                "{SELECT_COLUMNS} WHERE tenant_id = ? AND kind = ? ORDER BY created_at ASC, id ASC"
            ))
            .bind(&tenant.0)
            .bind(kind.as_str())
            .fetch_all(&self.pool)
            .await?
        } else {
            sqlx::query(&format!(
                "{SELECT_COLUMNS} WHERE tenant_id = ? ORDER BY created_at ASC, id ASC"
            ))
            .bind(&tenant.0)
            .fetch_all(&self.pool)
            .await?
        };

        rows.into_iter().map(resource_from_row).collect()
    }

    async fn insert(&self, resource: SyncedResource) -> Result<(), RepositoryError> {
        let spec_json = encode_spec(&resource)?;
        let result = sqlx::query(
            "INSERT INTO synced_resource (
                tenant_id,
                id,
                kind,
                name,
                name_key,
                remote_id,
                status,
                spec_json,
                last_synced_at,
                created_at,
                updated_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&resource.tenant_id.0)
        .bind(&resource.id.0)
        .bind(resource.kind.as_str())
        .bind(&resource.name)
        .bind(name_key(&resource.name))
        .bind(resource.remote_id.as_ref().map(|id| id.0.clone()))
        .bind(resource.status.as_str())
        .bind(spec_json)
        .bind(resource.last_synced_at.as_ref().map(format_timestamp))
        .bind(format_timestamp(&resource.created_at))
        .bind(format_timestamp(&resource.updated_at))
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(error) if is_unique_violation(&error) => Err(name_conflict(&resource)),
            Err(error) => Err(error.into()),
        }
    }

    async fn save(&self, resource: SyncedResource) -> Result<(), RepositoryError> {
        let spec_json = encode_spec(&resource)?;
        let result = sqlx::query(
            "INSERT INTO synced_resource (
                tenant_id,
                id,
                kind,
                name,
                name_key,
                remote_id,
                status,
                spec_json,
                last_synced_at,
                created_at,
                updated_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(tenant_id, id) DO UPDATE SET
                kind = excluded.kind,
                name = excluded.name,
                name_key = excluded.name_key,
                remote_id = excluded.remote_id,
                status = excluded.status,
                spec_json = excluded.spec_json,
                last_synced_at = excluded.last_synced_at,
                updated_at = excluded.updated_at",
        )
        .bind(&resource.tenant_id.0)
        .bind(&resource.id.0)
        .bind(resource.kind.as_str())
        .bind(&resource.name)
        .bind(name_key(&resource.name))
        .bind(resource.remote_id.as_ref().map(|id| id.0.clone()))
        .bind(resource.status.as_str())
        .bind(spec_json)
        .bind(resource.last_synced_at.as_ref().map(format_timestamp))
        .bind(format_timestamp(&resource.created_at))
        .bind(format_timestamp(&resource.updated_at))
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(error) if is_unique_violation(&error) => Err(name_conflict(&resource)),
            Err(error) => Err(error.into()),
        }
    }

    async fn remove(&self, tenant: &TenantId, id: &ResourceId) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM synced_resource WHERE tenant_id = ? AND id = ?")
            .bind(&tenant.0)
            .bind(&id.0)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

fn name_conflict(resource: &SyncedResource) -> RepositoryError {
    RepositoryError::Conflict(format!(
        "{} `{}` already exists for tenant `{}`",
        resource.kind.as_str(),
        resource.name,
        resource.tenant_id
    ))
}

fn encode_spec(resource: &SyncedResource) -> Result<String, RepositoryError> {
    serde_json::to_string(&resource.spec)
        .map_err(|error| RepositoryError::Decode(format!("cannot encode resource spec: {error}")))
}

fn resource_from_row(row: SqliteRow) -> Result<SyncedResource, RepositoryError> {
    let kind_raw = row.try_get::<String, _>("kind")?;
    let kind = ResourceKind::parse(&kind_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown resource kind `{kind_raw}`")))?;

    let status_raw = row.try_get::<String, _>("status")?;
    let status = SyncStatus::parse(&status_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown sync status `{status_raw}`")))?;

    let spec_raw = row.try_get::<String, _>("spec_json")?;
    let spec: ResourceSpec = serde_json::from_str(&spec_raw)
        .map_err(|error| RepositoryError::Decode(format!("invalid spec_json: {error}")))?;

    Ok(SyncedResource {
        tenant_id: TenantId(row.try_get("tenant_id")?),
        id: ResourceId(row.try_get("id")?),
        kind,
        name: row.try_get("name")?,
        remote_id: row.try_get::<Option<String>, _>("remote_id")?.map(RemoteId),
        status,
        spec,
        last_synced_at: parse_optional_timestamp("last_synced_at", row.try_get("last_synced_at")?)?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}
