//! Postgres-backed version store.
//!
//! Rows in `organization_units` are immutable once written except for
//! the close that sets `end_date` when a successor arrives. Writes run
//! in one transaction with the newest row locked `FOR UPDATE`; a racing
//! writer either waits and then collides on the version primary key or
//! sees the closed row, so at most one successor wins.
//!
//! The `VersionRepository` port is synchronous; the sqlx calls are
//! bridged onto the ambient tokio runtime.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{PgPool, Row};
use tracing::instrument;

use orgledger_core::{CODE_MAX, CODE_MIN, DomainError, DomainResult, TenantId, UnitCode};
use orgledger_directory::{NewVersion, OrganizationVersion, Placement, VersionRepository};
use orgledger_directory::{UnitStatus, UnitType};

pub struct PostgresVersionStore {
    pool: Arc<PgPool>,
}

impl PostgresVersionStore {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    #[instrument(
        skip(self, input),
        fields(tenant_id = %input.tenant_id, code = %input.code),
        err
    )]
    async fn create_version(&self, input: NewVersion) -> DomainResult<OrganizationVersion> {
        guard_interval(&input)?;
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let row = sqlx::query(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM organization_units
                WHERE tenant_id = $1 AND code = $2
            ) AS taken
            "#,
        )
        .bind(input.tenant_id.as_uuid())
        .bind(input.code.as_str())
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("check_code", e))?;
        let taken: bool = row
            .try_get("taken")
            .map_err(|e| map_sqlx_error("check_code", e))?;
        if taken {
            tx.rollback()
                .await
                .map_err(|e| map_sqlx_error("rollback", e))?;
            return Err(DomainError::conflict(format!(
                "organization code already in use: {}",
                input.code
            )));
        }

        let today = Utc::now().date_naive();
        let now = Utc::now();
        let mut version = version_from_input(input, 1, None, now);
        version.is_current = version.active_on(today);
        insert_version(&mut tx, &version).await?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(version)
    }

    #[instrument(
        skip(self, input),
        fields(tenant_id = %input.tenant_id, code = %input.code),
        err
    )]
    async fn update_version(&self, input: NewVersion) -> DomainResult<OrganizationVersion> {
        guard_interval(&input)?;
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let newest = lock_newest(&mut tx, input.tenant_id, &input.code).await?;
        if newest.status == UnitStatus::Deleted {
            tx.rollback()
                .await
                .map_err(|e| map_sqlx_error("rollback", e))?;
            return Err(DomainError::not_found(format!(
                "organization not found: {}",
                input.code
            )));
        }
        if input.effective_date < newest.effective_date {
            tx.rollback()
                .await
                .map_err(|e| map_sqlx_error("rollback", e))?;
            return Err(DomainError::validation(format!(
                "effective_date {} precedes the version it supersedes ({})",
                input.effective_date, newest.effective_date
            )));
        }

        let today = Utc::now().date_naive();
        let now = Utc::now();
        close_version(&mut tx, &newest, input.effective_date, today, now).await?;

        let mut successor = version_from_input(input, newest.version + 1, Some(newest.version), now);
        successor.is_current = successor.active_on(today);
        insert_version(&mut tx, &successor).await?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(successor)
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id, code = %code), err)]
    async fn delete_version(
        &self,
        tenant_id: TenantId,
        code: &UnitCode,
        reason: &str,
    ) -> DomainResult<OrganizationVersion> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let newest = lock_newest(&mut tx, tenant_id, code).await?;
        if newest.status == UnitStatus::Deleted {
            tx.rollback()
                .await
                .map_err(|e| map_sqlx_error("rollback", e))?;
            return Err(DomainError::not_found(format!(
                "organization not found: {code}"
            )));
        }

        let today = Utc::now().date_naive();
        // A future-dated newest version keeps the chain contiguous: the
        // terminal row starts where that version would have.
        let terminal_effective = newest.effective_date.max(today);
        let now = Utc::now();
        close_version(&mut tx, &newest, terminal_effective, today, now).await?;

        let mut terminal = OrganizationVersion {
            tenant_id,
            code: code.clone(),
            parent_code: newest.parent_code.clone(),
            name: newest.name.clone(),
            unit_type: newest.unit_type,
            status: UnitStatus::Deleted,
            level: newest.level,
            path: newest.path.clone(),
            sort_order: newest.sort_order,
            description: newest.description.clone(),
            effective_date: terminal_effective,
            end_date: None,
            version: newest.version + 1,
            supersedes_version: Some(newest.version),
            change_reason: Some(reason.to_string()),
            is_current: false,
            created_at: now,
            updated_at: now,
        };
        terminal.is_current = terminal.active_on(today);
        insert_version(&mut tx, &terminal).await?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(terminal)
    }

    async fn current_version(
        &self,
        tenant_id: TenantId,
        code: &UnitCode,
    ) -> DomainResult<Option<OrganizationVersion>> {
        let today = Utc::now().date_naive();
        let row: Option<UnitRow> = sqlx::query_as(
            r#"
            SELECT tenant_id, code, parent_code, name, unit_type, status,
                   level, path, sort_order, description, effective_date, end_date,
                   version, supersedes_version, change_reason, is_current,
                   created_at, updated_at
            FROM organization_units
            WHERE tenant_id = $1 AND code = $2 AND status != 'DELETED'
              AND effective_date <= $3 AND (end_date IS NULL OR end_date > $3)
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(code.as_str())
        .bind(today)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("current_version", e))?;
        row.map(UnitRow::into_version).transpose()
    }

    async fn children_of(
        &self,
        tenant_id: TenantId,
        code: &UnitCode,
    ) -> DomainResult<Vec<OrganizationVersion>> {
        let today = Utc::now().date_naive();
        let rows: Vec<UnitRow> = sqlx::query_as(
            r#"
            SELECT tenant_id, code, parent_code, name, unit_type, status,
                   level, path, sort_order, description, effective_date, end_date,
                   version, supersedes_version, change_reason, is_current,
                   created_at, updated_at
            FROM organization_units
            WHERE tenant_id = $1 AND parent_code = $2 AND status != 'DELETED'
              AND effective_date <= $3 AND (end_date IS NULL OR end_date > $3)
            ORDER BY sort_order, code
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(code.as_str())
        .bind(today)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("children_of", e))?;
        rows.into_iter().map(UnitRow::into_version).collect()
    }

    async fn code_exists(&self, tenant_id: TenantId, code: &UnitCode) -> DomainResult<bool> {
        let row = sqlx::query(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM organization_units
                WHERE tenant_id = $1 AND code = $2
            ) AS taken
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(code.as_str())
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("code_exists", e))?;
        row.try_get("taken")
            .map_err(|e| map_sqlx_error("code_exists", e))
    }

    async fn has_live_children(
        &self,
        tenant_id: TenantId,
        code: &UnitCode,
    ) -> DomainResult<bool> {
        let today = Utc::now().date_naive();
        let row = sqlx::query(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM organization_units
                WHERE tenant_id = $1 AND parent_code = $2 AND status != 'DELETED'
                  AND effective_date <= $3 AND (end_date IS NULL OR end_date > $3)
            ) AS found
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(code.as_str())
        .bind(today)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("has_live_children", e))?;
        row.try_get("found")
            .map_err(|e| map_sqlx_error("has_live_children", e))
    }

    /// The lowest free code is either the floor of the range or the
    /// successor of a used code, so those are the only candidates the
    /// query has to test.
    async fn next_free_code(&self, tenant_id: TenantId) -> DomainResult<UnitCode> {
        let row = sqlx::query(
            r#"
            SELECT MIN(candidate) AS next FROM (
                SELECT $2::bigint AS candidate
                UNION ALL
                SELECT code::bigint + 1 FROM organization_units WHERE tenant_id = $1
            ) candidates
            WHERE candidate BETWEEN $2 AND $3
              AND NOT EXISTS (
                  SELECT 1 FROM organization_units used
                  WHERE used.tenant_id = $1 AND used.code = candidate::text
              )
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(i64::from(CODE_MIN))
        .bind(i64::from(CODE_MAX))
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("next_free_code", e))?;
        let next: Option<i64> = row
            .try_get("next")
            .map_err(|e| map_sqlx_error("next_free_code", e))?;
        match next {
            Some(n) => UnitCode::from_number(n as u32),
            None => Err(DomainError::business_rule(
                "organization code space exhausted",
            )),
        }
    }

    async fn version_chain(
        &self,
        tenant_id: TenantId,
        code: &UnitCode,
    ) -> DomainResult<Vec<OrganizationVersion>> {
        let rows: Vec<UnitRow> = sqlx::query_as(
            r#"
            SELECT tenant_id, code, parent_code, name, unit_type, status,
                   level, path, sort_order, description, effective_date, end_date,
                   version, supersedes_version, change_reason, is_current,
                   created_at, updated_at
            FROM organization_units
            WHERE tenant_id = $1 AND code = $2
            ORDER BY version DESC
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(code.as_str())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("version_chain", e))?;
        rows.into_iter().map(UnitRow::into_version).collect()
    }
}

fn guard_interval(input: &NewVersion) -> DomainResult<()> {
    if let Some(end) = input.end_date {
        if end <= input.effective_date {
            return Err(DomainError::validation(format!(
                "end_date {end} must be after effective_date {}",
                input.effective_date
            )));
        }
    }
    Ok(())
}

fn version_from_input(
    input: NewVersion,
    version: i64,
    supersedes_version: Option<i64>,
    now: DateTime<Utc>,
) -> OrganizationVersion {
    OrganizationVersion {
        tenant_id: input.tenant_id,
        code: input.code,
        parent_code: input.parent_code,
        name: input.name,
        unit_type: input.unit_type,
        status: input.status,
        level: input.level,
        path: input.path,
        sort_order: input.sort_order,
        description: input.description,
        effective_date: input.effective_date,
        end_date: input.end_date,
        version,
        supersedes_version,
        change_reason: input.change_reason,
        is_current: false,
        created_at: now,
        updated_at: now,
    }
}

async fn lock_newest(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    tenant_id: TenantId,
    code: &UnitCode,
) -> DomainResult<OrganizationVersion> {
    let row: Option<UnitRow> = sqlx::query_as(
        r#"
        SELECT tenant_id, code, parent_code, name, unit_type, status,
               level, path, sort_order, description, effective_date, end_date,
               version, supersedes_version, change_reason, is_current,
               created_at, updated_at
        FROM organization_units
        WHERE tenant_id = $1 AND code = $2
        ORDER BY version DESC
        LIMIT 1
        FOR UPDATE
        "#,
    )
    .bind(tenant_id.as_uuid())
    .bind(code.as_str())
    .fetch_optional(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("lock_newest", e))?;
    match row {
        Some(row) => row.into_version(),
        None => Err(DomainError::not_found(format!(
            "organization not found: {code}"
        ))),
    }
}

async fn close_version(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    newest: &OrganizationVersion,
    end_date: NaiveDate,
    today: NaiveDate,
    now: DateTime<Utc>,
) -> DomainResult<()> {
    let still_current = newest.effective_date <= today && today < end_date;
    sqlx::query(
        r#"
        UPDATE organization_units
        SET end_date = $4, is_current = $5, updated_at = $6
        WHERE tenant_id = $1 AND code = $2 AND version = $3
        "#,
    )
    .bind(newest.tenant_id.as_uuid())
    .bind(newest.code.as_str())
    .bind(newest.version)
    .bind(end_date)
    .bind(still_current)
    .bind(now)
    .execute(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("close_version", e))?;
    Ok(())
}

async fn insert_version(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    version: &OrganizationVersion,
) -> DomainResult<()> {
    sqlx::query(
        r#"
        INSERT INTO organization_units (
            tenant_id, code, parent_code, name, unit_type, status,
            level, path, sort_order, description, effective_date, end_date,
            version, supersedes_version, change_reason, is_current,
            created_at, updated_at
        ) VALUES (
            $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12,
            $13, $14, $15, $16, $17, $18
        )
        "#,
    )
    .bind(version.tenant_id.as_uuid())
    .bind(version.code.as_str())
    .bind(version.parent_code.as_ref().map(|c| c.as_str()))
    .bind(&version.name)
    .bind(version.unit_type.as_str())
    .bind(version.status.as_str())
    .bind(version.level)
    .bind(&version.path)
    .bind(version.sort_order)
    .bind(version.description.clone())
    .bind(version.effective_date)
    .bind(version.end_date)
    .bind(version.version)
    .bind(version.supersedes_version)
    .bind(version.change_reason.clone())
    .bind(version.is_current)
    .bind(version.created_at)
    .bind(version.updated_at)
    .execute(&mut **tx)
    .await
    .map_err(|e| {
        if is_unique_violation(&e) {
            DomainError::conflict(format!(
                "concurrent version write for {}",
                version.code
            ))
        } else {
            map_sqlx_error("insert_version", e)
        }
    })?;
    Ok(())
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> DomainError {
    match err {
        sqlx::Error::Database(db_err) => {
            let message = format!("database error in {operation}: {}", db_err.message());
            if let Some(code) = db_err.code() {
                match code.as_ref() {
                    "23505" => DomainError::conflict(message),
                    "23503" | "23514" => DomainError::validation(message),
                    _ => DomainError::transient_store(message),
                }
            } else {
                DomainError::transient_store(message)
            }
        }
        sqlx::Error::PoolClosed => {
            DomainError::transient_store(format!("connection pool closed in {operation}"))
        }
        sqlx::Error::RowNotFound => {
            DomainError::not_found(format!("row not found in {operation}"))
        }
        other => DomainError::transient_store(format!("sqlx error in {operation}: {other}")),
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        if let Some(code) = db_err.code() {
            return code.as_ref() == "23505";
        }
    }
    false
}

#[derive(Debug)]
struct UnitRow {
    tenant_id: uuid::Uuid,
    code: String,
    parent_code: Option<String>,
    name: String,
    unit_type: String,
    status: String,
    level: i32,
    path: String,
    sort_order: i32,
    description: Option<String>,
    effective_date: NaiveDate,
    end_date: Option<NaiveDate>,
    version: i64,
    supersedes_version: Option<i64>,
    change_reason: Option<String>,
    is_current: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for UnitRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(UnitRow {
            tenant_id: row.try_get("tenant_id")?,
            code: row.try_get("code")?,
            parent_code: row.try_get("parent_code")?,
            name: row.try_get("name")?,
            unit_type: row.try_get("unit_type")?,
            status: row.try_get("status")?,
            level: row.try_get("level")?,
            path: row.try_get("path")?,
            sort_order: row.try_get("sort_order")?,
            description: row.try_get("description")?,
            effective_date: row.try_get("effective_date")?,
            end_date: row.try_get("end_date")?,
            version: row.try_get("version")?,
            supersedes_version: row.try_get("supersedes_version")?,
            change_reason: row.try_get("change_reason")?,
            is_current: row.try_get("is_current")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl UnitRow {
    fn into_version(self) -> DomainResult<OrganizationVersion> {
        Ok(OrganizationVersion {
            tenant_id: TenantId::from_uuid(self.tenant_id),
            code: UnitCode::parse(&self.code)?,
            parent_code: self
                .parent_code
                .as_deref()
                .map(UnitCode::parse)
                .transpose()?,
            name: self.name,
            unit_type: self.unit_type.parse::<UnitType>()?,
            status: self.status.parse::<UnitStatus>()?,
            level: self.level,
            path: self.path,
            sort_order: self.sort_order,
            description: self.description,
            effective_date: self.effective_date,
            end_date: self.end_date,
            version: self.version,
            supersedes_version: self.supersedes_version,
            change_reason: self.change_reason,
            is_current: self.is_current,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

// The port is synchronous; callers inside a tokio runtime get the
// async paths bridged onto that runtime.

fn runtime_handle() -> DomainResult<tokio::runtime::Handle> {
    tokio::runtime::Handle::try_current().map_err(|_| {
        DomainError::transient_store(
            "PostgresVersionStore requires a tokio runtime context",
        )
    })
}

impl VersionRepository for PostgresVersionStore {
    fn create(&self, input: NewVersion) -> DomainResult<OrganizationVersion> {
        runtime_handle()?.block_on(self.create_version(input))
    }

    fn update(&self, input: NewVersion) -> DomainResult<OrganizationVersion> {
        runtime_handle()?.block_on(self.update_version(input))
    }

    fn delete(
        &self,
        tenant_id: TenantId,
        code: &UnitCode,
        reason: &str,
    ) -> DomainResult<OrganizationVersion> {
        runtime_handle()?.block_on(self.delete_version(tenant_id, code, reason))
    }

    fn find_by_code(
        &self,
        tenant_id: TenantId,
        code: &UnitCode,
    ) -> DomainResult<Option<OrganizationVersion>> {
        runtime_handle()?.block_on(self.current_version(tenant_id, code))
    }

    fn find_children(
        &self,
        tenant_id: TenantId,
        code: &UnitCode,
    ) -> DomainResult<Vec<OrganizationVersion>> {
        runtime_handle()?.block_on(self.children_of(tenant_id, code))
    }

    fn exists(&self, tenant_id: TenantId, code: &UnitCode) -> DomainResult<bool> {
        runtime_handle()?.block_on(self.code_exists(tenant_id, code))
    }

    fn has_children(&self, tenant_id: TenantId, code: &UnitCode) -> DomainResult<bool> {
        runtime_handle()?.block_on(self.has_live_children(tenant_id, code))
    }

    fn placement(
        &self,
        tenant_id: TenantId,
        code: &UnitCode,
    ) -> DomainResult<Option<Placement>> {
        let current = runtime_handle()?.block_on(self.current_version(tenant_id, code))?;
        Ok(current.map(|v| Placement {
            level: v.level,
            path: v.path,
        }))
    }

    fn generate_next_code(&self, tenant_id: TenantId) -> DomainResult<UnitCode> {
        runtime_handle()?.block_on(self.next_free_code(tenant_id))
    }

    fn load_versions(
        &self,
        tenant_id: TenantId,
        code: &UnitCode,
    ) -> DomainResult<Vec<OrganizationVersion>> {
        runtime_handle()?.block_on(self.version_chain(tenant_id, code))
    }
}
