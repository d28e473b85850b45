//! Primary datastore rows the crons read and drain.

use {
    chrono::{DateTime, Utc},
    sqlx::{QueryBuilder, Row, Sqlite, SqlitePool, sqlite::SqliteRow},
};

use crate::{Error, Result};

/// SQLite caps bound parameters per statement; inserts are chunked below it.
const INSERT_CHUNK: usize = 1000;

/// Kind of a scheduled contact event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FireType {
    /// A flow wait expired.
    WaitExpiration,
    /// A flow wait for a message timed out.
    WaitTimeout,
    /// A session reached its expiry.
    SessionExpiration,
    /// A campaign event is due; the fire scope holds the event id.
    Campaign,
}

impl FireType {
    #[must_use]
    pub fn code(self) -> &'static str {
        match self {
            Self::WaitExpiration => "E",
            Self::WaitTimeout => "T",
            Self::SessionExpiration => "S",
            Self::Campaign => "C",
        }
    }

    #[must_use]
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "E" => Some(Self::WaitExpiration),
            "T" => Some(Self::WaitTimeout),
            "S" => Some(Self::SessionExpiration),
            "C" => Some(Self::Campaign),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContactFire {
    pub id: i64,
    pub org_id: i64,
    pub contact_id: i64,
    pub fire_type: FireType,
    pub scope: String,
    pub fire_on: DateTime<Utc>,
    pub session_uuid: Option<String>,
}

impl ContactFire {
    fn from_row(row: &SqliteRow) -> Result<Self> {
        let code: String = row.get("fire_type");
        let fire_type = FireType::from_code(&code)
            .ok_or_else(|| Error::message(format!("unknown fire type: {code}")))?;
        let fire_on_ms: i64 = row.get("fire_on_ms");
        let fire_on = DateTime::from_timestamp_millis(fire_on_ms)
            .ok_or_else(|| Error::message(format!("fire_on_ms out of range: {fire_on_ms}")))?;
        Ok(Self {
            id: row.get("id"),
            org_id: row.get("org_id"),
            contact_id: row.get("contact_id"),
            fire_type,
            scope: row.get("scope"),
            fire_on,
            session_uuid: row.get("session_uuid"),
        })
    }
}

/// A fire to schedule.
#[derive(Debug, Clone)]
pub struct NewContactFire {
    pub org_id: i64,
    pub contact_id: i64,
    pub fire_type: FireType,
    pub scope: String,
    pub fire_on: DateTime<Utc>,
    pub session_uuid: Option<String>,
}

/// Up to `limit` fires due at `now`, oldest first.
pub async fn load_due_fires(
    pool: &SqlitePool,
    now: DateTime<Utc>,
    limit: usize,
) -> Result<Vec<ContactFire>> {
    let rows = sqlx::query(
        "SELECT id, org_id, contact_id, fire_type, scope, fire_on_ms, session_uuid
         FROM contact_fires
         WHERE fire_on_ms <= ?
         ORDER BY fire_on_ms, id
         LIMIT ?",
    )
    .bind(now.timestamp_millis())
    .bind(i64::try_from(limit).unwrap_or(i64::MAX))
    .fetch_all(pool)
    .await?;

    rows.iter().map(ContactFire::from_row).collect()
}

/// Delete fires by id, returning how many were removed.
pub async fn delete_fires(pool: &SqlitePool, ids: &[i64]) -> Result<u64> {
    if ids.is_empty() {
        return Ok(0);
    }
    let mut query = QueryBuilder::<Sqlite>::new("DELETE FROM contact_fires WHERE id IN (");
    let mut list = query.separated(", ");
    for id in ids {
        list.push_bind(*id);
    }
    list.push_unseparated(")");

    let result = query.build().execute(pool).await?;
    Ok(result.rows_affected())
}

/// Schedule fires. A fire replaces any existing one for the same contact,
/// type and scope.
pub async fn insert_fires(pool: &SqlitePool, fires: &[NewContactFire]) -> Result<()> {
    for chunk in fires.chunks(INSERT_CHUNK) {
        let mut query = QueryBuilder::<Sqlite>::new(
            "INSERT OR REPLACE INTO contact_fires \
             (org_id, contact_id, fire_type, scope, fire_on_ms, session_uuid) ",
        );
        query.push_values(chunk, |mut row, fire| {
            row.push_bind(fire.org_id)
                .push_bind(fire.contact_id)
                .push_bind(fire.fire_type.code())
                .push_bind(fire.scope.clone())
                .push_bind(fire.fire_on.timestamp_millis())
                .push_bind(fire.session_uuid.clone());
        });
        query.build().execute(pool).await?;
    }
    Ok(())
}

/// Outgoing messages of `org_id` still waiting to be sent: queued, or
/// errored and pending retry.
pub async fn outbox_count(pool: &SqlitePool, org_id: i64) -> Result<i64> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM msgs
         WHERE org_id = ? AND direction = 'O' AND status IN ('Q', 'E')",
    )
    .bind(org_id)
    .fetch_one(pool)
    .await?;
    Ok(count)
}
