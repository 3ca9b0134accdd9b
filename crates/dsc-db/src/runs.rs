use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, Sqlite};

use dsc_types::{DiscoveryError, Result, Run, RunFilter, RunStatus};

use crate::connection::Database;

const RUN_COLUMNS: &str = "id, name, parent_id, owner_id, parameters, status, result, files, errors,
     started_at, failed_at, completed_at, created_at, updated_at";

/// Repository for run record storage and retrieval.
pub struct RunRepository<'a> {
    db: &'a Database,
}

impl<'a> RunRepository<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Insert a new run record. Fails if the id already exists.
    pub async fn create(&self, run: &Run) -> Result<()> {
        sqlx::query(
            "INSERT INTO runs
             (id, name, parent_id, owner_id, parameters, status, result, files, errors,
              started_at, failed_at, completed_at, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&run.id)
        .bind(&run.name)
        .bind(&run.parent_id)
        .bind(&run.owner_id)
        .bind(serde_json::to_string(&run.parameters)?)
        .bind(run.status.as_str())
        .bind(serde_json::to_string(&run.result)?)
        .bind(serde_json::to_string(&run.files)?)
        .bind(serde_json::to_string(&run.errors)?)
        .bind(run.started_at.map(|dt| dt.to_rfc3339()))
        .bind(run.failed_at.map(|dt| dt.to_rfc3339()))
        .bind(run.completed_at.map(|dt| dt.to_rfc3339()))
        .bind(run.created_at.to_rfc3339())
        .bind(run.updated_at.to_rfc3339())
        .execute(self.db.pool())
        .await
        .map_err(|e| DiscoveryError::Database(format!("Insert run: {e}")))?;

        Ok(())
    }

    /// Get a run by ID.
    pub async fn get(&self, id: &str) -> Result<Option<Run>> {
        let row: Option<RunRow> = sqlx::query_as(&format!(
            "SELECT {RUN_COLUMNS} FROM runs WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(self.db.pool())
        .await
        .map_err(|e| DiscoveryError::Database(format!("Get run: {e}")))?;

        Ok(row.map(row_to_run))
    }

    /// Persist the mutable fields of a run and refresh `updated_at`.
    ///
    /// `parameters`, `name`, `owner_id`, `parent_id` and `created_at` are
    /// immutable after creation and are not written.
    pub async fn update(&self, run: &mut Run) -> Result<bool> {
        run.updated_at = Utc::now();

        let result = sqlx::query(
            "UPDATE runs
             SET status = ?, result = ?, files = ?, errors = ?,
                 started_at = ?, failed_at = ?, completed_at = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(run.status.as_str())
        .bind(serde_json::to_string(&run.result)?)
        .bind(serde_json::to_string(&run.files)?)
        .bind(serde_json::to_string(&run.errors)?)
        .bind(run.started_at.map(|dt| dt.to_rfc3339()))
        .bind(run.failed_at.map(|dt| dt.to_rfc3339()))
        .bind(run.completed_at.map(|dt| dt.to_rfc3339()))
        .bind(run.updated_at.to_rfc3339())
        .bind(&run.id)
        .execute(self.db.pool())
        .await
        .map_err(|e| DiscoveryError::Database(format!("Update run: {e}")))?;

        Ok(result.rows_affected() > 0)
    }

    /// List runs matching every set field of `filter`, oldest first.
    pub async fn filter(&self, filter: &RunFilter) -> Result<Vec<Run>> {
        let mut query: QueryBuilder<Sqlite> =
            QueryBuilder::new(format!("SELECT {RUN_COLUMNS} FROM runs WHERE 1 = 1"));

        if let Some(status) = filter.status {
            query.push(" AND status = ").push_bind(status.as_str());
        }
        if let Some(ref owner_id) = filter.owner_id {
            query.push(" AND owner_id = ").push_bind(owner_id.clone());
        }
        if let Some(ref parent_id) = filter.parent_id {
            query.push(" AND parent_id = ").push_bind(parent_id.clone());
        }
        query.push(" ORDER BY created_at ASC");

        let rows: Vec<RunRow> = query
            .build_query_as::<RunRow>()
            .fetch_all(self.db.pool())
            .await
            .map_err(|e| DiscoveryError::Database(format!("Filter runs: {e}")))?;

        Ok(rows.into_iter().map(row_to_run).collect())
    }

    /// Child runs spawned by `parent_id`.
    pub async fn children(&self, parent_id: &str) -> Result<Vec<Run>> {
        self.filter(&RunFilter {
            parent_id: Some(parent_id.to_string()),
            ..RunFilter::default()
        })
        .await
    }
}

#[derive(sqlx::FromRow)]
struct RunRow {
    id: String,
    name: String,
    parent_id: Option<String>,
    owner_id: Option<String>,
    parameters: String,
    status: String,
    result: String,
    files: String,
    errors: String,
    started_at: Option<String>,
    failed_at: Option<String>,
    completed_at: Option<String>,
    created_at: String,
    updated_at: String,
}

fn row_to_run(row: RunRow) -> Run {
    Run {
        id: row.id,
        name: row.name,
        parent_id: row.parent_id,
        owner_id: row.owner_id,
        parameters: serde_json::from_str(&row.parameters).unwrap_or_default(),
        status: RunStatus::parse(&row.status).unwrap_or_default(),
        result: serde_json::from_str(&row.result).unwrap_or_default(),
        files: serde_json::from_str(&row.files).unwrap_or_default(),
        errors: serde_json::from_str(&row.errors).unwrap_or_default(),
        started_at: row.started_at.as_deref().and_then(parse_timestamp),
        failed_at: row.failed_at.as_deref().and_then(parse_timestamp),
        completed_at: row.completed_at.as_deref().and_then(parse_timestamp),
        created_at: parse_timestamp(&row.created_at).unwrap_or_default(),
        updated_at: parse_timestamp(&row.updated_at).unwrap_or_default(),
    }
}

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
