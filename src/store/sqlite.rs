use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use leadflow_common::{
    Activity, ActivityKind, AuditLookup, AuditRecord, Lead, LeadPatch, LeadStore, NextAction,
    ServiceInterest, StoreError,
};
use rusqlite::types::Value;
use rusqlite::{Connection, ErrorCode, params, params_from_iter};
use uuid::Uuid;

const LEAD_COLUMNS: &str = "id, name, company, phone, email, address, value, proposal_id, stage, stage_updated_at, service_interest, audit_pending, next_action, last_contact_at, created_at, updated_at, created_by, updated_by";

/// Async-safe handle to the lead database.
///
/// All access runs on tokio's blocking pool via `spawn_blocking`, serialized
/// by one mutex around the connection.
#[derive(Clone)]
pub struct SqliteStore {
    inner: Arc<std::sync::Mutex<LeadDb>>,
}

impl SqliteStore {
    pub fn new(db: LeadDb) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(db)),
        }
    }

    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self::new(LeadDb::new(path)?))
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self::new(LeadDb::new_in_memory()?))
    }

    /// Run a closure with access to the database on a blocking thread.
    pub async fn call<F, R>(&self, f: F) -> Result<R, StoreError>
    where
        F: FnOnce(&LeadDb) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let db = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = db
                .lock()
                .map_err(|e| StoreError::Unavailable(format!("DB lock poisoned: {}", e)))?;
            f(&guard).map_err(classify)
        })
        .await
        .map_err(|e| StoreError::Backend(anyhow::Error::new(e).context("DB task panicked")))?
    }

    /// Record a completed audit for a lead.
    pub async fn record_audit(&self, lead_id: &str, summary: &str) -> Result<AuditRecord, StoreError> {
        let lead_id = lead_id.to_string();
        let summary = summary.to_string();
        let found = {
            let lead_id = lead_id.clone();
            self.call(move |db| db.lead_exists(&lead_id)).await?
        };
        if !found {
            return Err(StoreError::lead_not_found(&lead_id));
        }
        self.call(move |db| db.insert_audit(&lead_id, &summary)).await
    }
}

/// Busy or locked databases are worth retrying; everything else is not.
fn classify(e: anyhow::Error) -> StoreError {
    let busy = e
        .downcast_ref::<rusqlite::Error>()
        .and_then(rusqlite::Error::sqlite_error_code)
        .is_some_and(|code| matches!(code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked));
    if busy {
        StoreError::Unavailable(format!("{:#}", e))
    } else {
        StoreError::Backend(e)
    }
}

fn ts(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)
        .with_context(|| format!("Invalid timestamp '{}'", raw))?
        .with_timezone(&Utc))
}

fn opt_text(value: &Option<String>) -> Value {
    match value {
        Some(v) => Value::Text(v.clone()),
        None => Value::Null,
    }
}

pub struct LeadDb {
    conn: Connection,
}

impl LeadDb {
    /// Open (or create) a database at `path`, creating parent directories.
    pub fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let conn = Connection::open(path).context("Failed to open SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    pub fn new_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to open in-memory SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> Result<()> {
        self.conn
            .busy_timeout(Duration::from_secs(2))
            .context("Failed to set busy timeout")?;
        self.conn
            .execute_batch("PRAGMA foreign_keys = ON;")
            .context("Failed to enable foreign keys")?;
        self.conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS leads (
                    id TEXT PRIMARY KEY,
                    name TEXT NOT NULL,
                    company TEXT,
                    phone TEXT,
                    email TEXT,
                    address TEXT,
                    value INTEGER NOT NULL DEFAULT 0,
                    proposal_id TEXT,
                    stage TEXT NOT NULL,
                    stage_updated_at TEXT NOT NULL,
                    service_interest TEXT NOT NULL DEFAULT '[]',
                    audit_pending INTEGER NOT NULL DEFAULT 0,
                    next_action TEXT,
                    last_contact_at TEXT,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL,
                    created_by TEXT NOT NULL,
                    updated_by TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS activities (
                    seq INTEGER PRIMARY KEY AUTOINCREMENT,
                    id TEXT NOT NULL UNIQUE,
                    lead_id TEXT NOT NULL REFERENCES leads(id) ON DELETE CASCADE,
                    kind TEXT NOT NULL,
                    body TEXT NOT NULL,
                    timestamp TEXT NOT NULL,
                    actor TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS audits (
                    id TEXT PRIMARY KEY,
                    lead_id TEXT NOT NULL REFERENCES leads(id) ON DELETE CASCADE,
                    summary TEXT NOT NULL,
                    completed_at TEXT NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_leads_stage ON leads(stage);
                CREATE INDEX IF NOT EXISTS idx_activities_lead ON activities(lead_id);
                CREATE INDEX IF NOT EXISTS idx_audits_lead ON audits(lead_id);
                ",
            )
            .context("Failed to create tables")?;
        Ok(())
    }

    pub fn lead_exists(&self, id: &str) -> Result<bool> {
        lead_exists_in(&self.conn, id)
    }

    /// Insert a lead with its history. Returns `false` when the id is taken.
    pub fn insert_lead(&self, lead: &Lead) -> Result<bool> {
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        if lead_exists_in(&tx, &lead.id)? {
            return Ok(false);
        }
        tx.execute(
            &format!(
                "INSERT INTO leads ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)",
                LEAD_COLUMNS
            ),
            params![
                lead.id,
                lead.name,
                lead.company,
                lead.phone,
                lead.email,
                lead.address,
                lead.value,
                lead.proposal_id,
                lead.stage,
                ts(lead.stage_updated_at),
                serde_json::to_string(&lead.service_interest)?,
                lead.audit_pending,
                lead.next_action.as_ref().map(serde_json::to_string).transpose()?,
                lead.last_contact_at.map(ts),
                ts(lead.created_at),
                ts(lead.updated_at),
                lead.created_by,
                lead.updated_by,
            ],
        )
        .with_context(|| format!("Failed to insert lead {}", lead.id))?;
        for activity in &lead.activities {
            insert_activity(&tx, &lead.id, activity)?;
        }
        tx.commit().context("Failed to commit lead insert")?;
        Ok(true)
    }

    pub fn get_lead(&self, id: &str) -> Result<Option<Lead>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {} FROM leads WHERE id = ?1", LEAD_COLUMNS))
            .context("Failed to prepare get_lead")?;
        let mut rows = stmt
            .query_map(params![id], LeadRow::from_row)
            .context("Failed to query lead")?;
        let row = match rows.next() {
            Some(row) => row.context("Failed to read lead row")?,
            None => return Ok(None),
        };
        let activities = self.activities_for(id)?;
        Ok(Some(row.into_lead(activities)?))
    }

    pub fn list_leads(&self) -> Result<Vec<Lead>> {
        let mut by_lead: HashMap<String, Vec<Activity>> = HashMap::new();
        {
            let mut stmt = self
                .conn
                .prepare("SELECT lead_id, id, kind, body, timestamp, actor FROM activities ORDER BY seq")
                .context("Failed to prepare activity listing")?;
            let rows = stmt
                .query_map([], |row| {
                    Ok((row.get::<_, String>(0)?, ActivityRow::from_row_at(row, 1)?))
                })
                .context("Failed to query activities")?;
            for row in rows {
                let (lead_id, activity) = row.context("Failed to read activity row")?;
                by_lead.entry(lead_id).or_default().push(activity.into_activity()?);
            }
        }

        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {} FROM leads ORDER BY created_at, id",
                LEAD_COLUMNS
            ))
            .context("Failed to prepare lead listing")?;
        let rows = stmt
            .query_map([], LeadRow::from_row)
            .context("Failed to query leads")?;
        let mut leads = Vec::new();
        for row in rows {
            let r = row.context("Failed to read lead row")?;
            let activities = by_lead.remove(&r.id).unwrap_or_default();
            leads.push(r.into_lead(activities)?);
        }
        Ok(leads)
    }

    fn activities_for(&self, lead_id: &str) -> Result<Vec<Activity>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, kind, body, timestamp, actor FROM activities WHERE lead_id = ?1 ORDER BY seq",
            )
            .context("Failed to prepare activity query")?;
        let rows = stmt
            .query_map(params![lead_id], |row| ActivityRow::from_row_at(row, 0))
            .context("Failed to query activities")?;
        let mut activities = Vec::new();
        for row in rows {
            activities.push(row.context("Failed to read activity row")?.into_activity()?);
        }
        Ok(activities)
    }

    /// Apply a partial update. Returns `false` when the lead does not exist.
    pub fn update_lead(&self, id: &str, patch: &LeadPatch, now: DateTime<Utc>) -> Result<bool> {
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        let found = apply_patch(&tx, id, patch, None, now)?;
        tx.commit().context("Failed to commit lead update")?;
        Ok(found)
    }

    /// Append an activity and advance `last_contact_at`. Returns `false` when
    /// the lead does not exist.
    pub fn append_activity(&self, id: &str, activity: &Activity) -> Result<bool> {
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        if !lead_exists_in(&tx, id)? {
            return Ok(false);
        }
        insert_activity(&tx, id, activity)?;
        tx.commit().context("Failed to commit activity")?;
        Ok(true)
    }

    /// Stage patch and status activity in one transaction, applied only
    /// while the lead is still at `expected_stage`.
    pub fn commit_transition(
        &self,
        id: &str,
        expected_stage: &str,
        patch: &LeadPatch,
        activity: &Activity,
        now: DateTime<Utc>,
    ) -> Result<TransitionWrite> {
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        match current_stage(&tx, id)? {
            None => return Ok(TransitionWrite::Missing),
            Some(stage) if stage != expected_stage => return Ok(TransitionWrite::Conflict(stage)),
            Some(_) => {}
        }
        if !apply_patch(&tx, id, patch, Some(expected_stage), now)? {
            return Ok(match current_stage(&tx, id)? {
                Some(stage) => TransitionWrite::Conflict(stage),
                None => TransitionWrite::Missing,
            });
        }
        insert_activity(&tx, id, activity)?;
        tx.commit().context("Failed to commit stage transition")?;
        Ok(TransitionWrite::Committed)
    }

    pub fn insert_audit(&self, lead_id: &str, summary: &str) -> Result<AuditRecord> {
        let record = AuditRecord {
            id: Uuid::new_v4().to_string(),
            lead_id: lead_id.to_string(),
            summary: summary.to_string(),
            completed_at: Utc::now(),
        };
        self.conn
            .execute(
                "INSERT INTO audits (id, lead_id, summary, completed_at) VALUES (?1, ?2, ?3, ?4)",
                params![record.id, record.lead_id, record.summary, ts(record.completed_at)],
            )
            .with_context(|| format!("Failed to record audit for lead {}", lead_id))?;
        Ok(record)
    }

    /// Most recent audit for a lead.
    pub fn audit_for_lead(&self, lead_id: &str) -> Result<Option<AuditRecord>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, lead_id, summary, completed_at FROM audits
                 WHERE lead_id = ?1 ORDER BY completed_at DESC LIMIT 1",
            )
            .context("Failed to prepare audit query")?;
        let mut rows = stmt
            .query_map(params![lead_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })
            .context("Failed to query audits")?;
        match rows.next() {
            Some(row) => {
                let (id, lead_id, summary, completed_at) = row.context("Failed to read audit row")?;
                Ok(Some(AuditRecord {
                    id,
                    lead_id,
                    summary,
                    completed_at: parse_ts(&completed_at)?,
                }))
            }
            None => Ok(None),
        }
    }
}

/// Outcome of a stage-guarded transition write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionWrite {
    Committed,
    Missing,
    /// The lead has moved on; carries the stage it is at now.
    Conflict(String),
}

fn current_stage(conn: &Connection, id: &str) -> Result<Option<String>> {
    let mut stmt = conn
        .prepare("SELECT stage FROM leads WHERE id = ?1")
        .context("Failed to prepare stage lookup")?;
    let mut rows = stmt
        .query_map(params![id], |row| row.get::<_, String>(0))
        .context("Failed to query lead stage")?;
    match rows.next() {
        Some(stage) => Ok(Some(stage.context("Failed to read lead stage")?)),
        None => Ok(None),
    }
}

fn lead_exists_in(conn: &Connection, id: &str) -> Result<bool> {
    conn.query_row("SELECT EXISTS(SELECT 1 FROM leads WHERE id = ?1)", params![id], |row| {
        row.get(0)
    })
    .context("Failed to check lead existence")
}

fn insert_activity(conn: &Connection, lead_id: &str, activity: &Activity) -> Result<()> {
    conn.execute(
        "INSERT INTO activities (id, lead_id, kind, body, timestamp, actor) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            activity.id,
            lead_id,
            activity.kind.as_str(),
            activity.body,
            ts(activity.timestamp),
            activity.actor,
        ],
    )
    .context("Failed to insert activity")?;
    // Fixed-width nanosecond timestamps compare correctly as text.
    conn.execute(
        "UPDATE leads SET last_contact_at = ?1
         WHERE id = ?2 AND (last_contact_at IS NULL OR last_contact_at < ?1)",
        params![ts(activity.timestamp), lead_id],
    )
    .context("Failed to advance last_contact_at")?;
    Ok(())
}

/// Write only the columns named in `patch`. With `expected_stage` set, the
/// row is only touched while its stage still matches.
fn apply_patch(
    conn: &Connection,
    id: &str,
    patch: &LeadPatch,
    expected_stage: Option<&str>,
    now: DateTime<Utc>,
) -> Result<bool> {
    let mut sets: Vec<&str> = Vec::new();
    let mut values: Vec<Value> = Vec::new();

    if let Some(ref name) = patch.name {
        sets.push("name");
        values.push(Value::Text(name.clone()));
    }
    if let Some(ref company) = patch.company {
        sets.push("company");
        values.push(opt_text(company));
    }
    if let Some(ref phone) = patch.phone {
        sets.push("phone");
        values.push(opt_text(phone));
    }
    if let Some(ref email) = patch.email {
        sets.push("email");
        values.push(opt_text(email));
    }
    if let Some(ref address) = patch.address {
        sets.push("address");
        values.push(opt_text(address));
    }
    if let Some(value) = patch.value {
        sets.push("value");
        values.push(Value::Integer(value));
    }
    if let Some(ref proposal_id) = patch.proposal_id {
        sets.push("proposal_id");
        values.push(opt_text(proposal_id));
    }
    if let Some(ref stage) = patch.stage {
        let at = patch
            .stage_updated_at
            .unwrap_or(leadflow_common::WriteTime::ServerNow)
            .resolve(now);
        sets.push("stage");
        values.push(Value::Text(stage.clone()));
        sets.push("stage_updated_at");
        values.push(Value::Text(ts(at)));
    }
    if let Some(ref tags) = patch.service_interest {
        sets.push("service_interest");
        values.push(Value::Text(serde_json::to_string(tags)?));
    }
    if let Some(pending) = patch.audit_pending {
        sets.push("audit_pending");
        values.push(Value::Integer(i64::from(pending)));
    }
    if let Some(ref next_action) = patch.next_action {
        sets.push("next_action");
        values.push(match next_action {
            Some(action) => Value::Text(serde_json::to_string(action)?),
            None => Value::Null,
        });
    }
    if let Some(updated_at) = patch.updated_at {
        sets.push("updated_at");
        values.push(Value::Text(ts(updated_at.resolve(now))));
    }
    if let Some(ref updated_by) = patch.updated_by {
        sets.push("updated_by");
        values.push(Value::Text(updated_by.clone()));
    }

    if sets.is_empty() {
        return lead_exists_in(conn, id);
    }

    let assignments: Vec<String> = sets
        .iter()
        .enumerate()
        .map(|(i, col)| format!("{} = ?{}", col, i + 1))
        .collect();
    let mut sql = format!(
        "UPDATE leads SET {} WHERE id = ?{}",
        assignments.join(", "),
        sets.len() + 1
    );
    values.push(Value::Text(id.to_string()));
    if let Some(stage) = expected_stage {
        sql.push_str(&format!(" AND stage = ?{}", sets.len() + 2));
        values.push(Value::Text(stage.to_string()));
    }
    let changed = conn
        .execute(&sql, params_from_iter(values))
        .with_context(|| format!("Failed to update lead {}", id))?;
    Ok(changed > 0)
}

/// Intermediate row struct for leads before JSON and timestamp columns are
/// converted into typed values.
struct LeadRow {
    id: String,
    name: String,
    company: Option<String>,
    phone: Option<String>,
    email: Option<String>,
    address: Option<String>,
    value: i64,
    proposal_id: Option<String>,
    stage: String,
    stage_updated_at: String,
    service_interest: String,
    audit_pending: bool,
    next_action: Option<String>,
    last_contact_at: Option<String>,
    created_at: String,
    updated_at: String,
    created_by: String,
    updated_by: String,
}

impl LeadRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            company: row.get(2)?,
            phone: row.get(3)?,
            email: row.get(4)?,
            address: row.get(5)?,
            value: row.get(6)?,
            proposal_id: row.get(7)?,
            stage: row.get(8)?,
            stage_updated_at: row.get(9)?,
            service_interest: row.get(10)?,
            audit_pending: row.get(11)?,
            next_action: row.get(12)?,
            last_contact_at: row.get(13)?,
            created_at: row.get(14)?,
            updated_at: row.get(15)?,
            created_by: row.get(16)?,
            updated_by: row.get(17)?,
        })
    }

    fn into_lead(self, activities: Vec<Activity>) -> Result<Lead> {
        let service_interest: Vec<ServiceInterest> = serde_json::from_str(&self.service_interest)
            .context("Failed to parse service_interest JSON")?;
        let next_action: Option<NextAction> = self
            .next_action
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .context("Failed to parse next_action JSON")?;
        Ok(Lead {
            stage_updated_at: parse_ts(&self.stage_updated_at)?,
            last_contact_at: self.last_contact_at.as_deref().map(parse_ts).transpose()?,
            created_at: parse_ts(&self.created_at)?,
            updated_at: parse_ts(&self.updated_at)?,
            id: self.id,
            name: self.name,
            company: self.company,
            phone: self.phone,
            email: self.email,
            address: self.address,
            value: self.value,
            proposal_id: self.proposal_id,
            stage: self.stage,
            service_interest,
            audit_pending: self.audit_pending,
            next_action,
            activities,
            created_by: self.created_by,
            updated_by: self.updated_by,
        })
    }
}

struct ActivityRow {
    id: String,
    kind: String,
    body: String,
    timestamp: String,
    actor: String,
}

impl ActivityRow {
    fn from_row_at(row: &rusqlite::Row<'_>, offset: usize) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(offset)?,
            kind: row.get(offset + 1)?,
            body: row.get(offset + 2)?,
            timestamp: row.get(offset + 3)?,
            actor: row.get(offset + 4)?,
        })
    }

    fn into_activity(self) -> Result<Activity> {
        let kind: ActivityKind = self
            .kind
            .parse()
            .map_err(|e| anyhow::anyhow!("{}", e))
            .context("Failed to parse activity kind")?;
        Ok(Activity {
            id: self.id,
            kind,
            body: self.body,
            timestamp: parse_ts(&self.timestamp)?,
            actor: self.actor,
        })
    }
}

#[async_trait]
impl LeadStore for SqliteStore {
    async fn get_lead(&self, id: &str) -> Result<Option<Lead>, StoreError> {
        let id = id.to_string();
        self.call(move |db| db.get_lead(&id)).await
    }

    async fn list_leads(&self) -> Result<Vec<Lead>, StoreError> {
        self.call(|db| db.list_leads()).await
    }

    async fn insert_lead(&self, lead: Lead) -> Result<(), StoreError> {
        let id = lead.id.clone();
        let inserted = self.call(move |db| db.insert_lead(&lead)).await?;
        if inserted { Ok(()) } else { Err(StoreError::lead_exists(&id)) }
    }

    async fn update_lead(&self, id: &str, patch: LeadPatch) -> Result<(), StoreError> {
        let owned = id.to_string();
        let found = self
            .call(move |db| db.update_lead(&owned, &patch, Utc::now()))
            .await?;
        if found { Ok(()) } else { Err(StoreError::lead_not_found(id)) }
    }

    async fn append_activity(&self, id: &str, activity: Activity) -> Result<(), StoreError> {
        let owned = id.to_string();
        let found = self
            .call(move |db| db.append_activity(&owned, &activity))
            .await?;
        if found { Ok(()) } else { Err(StoreError::lead_not_found(id)) }
    }

    async fn commit_transition(
        &self,
        id: &str,
        expected_stage: &str,
        patch: LeadPatch,
        activity: Activity,
    ) -> Result<(), StoreError> {
        let owned = id.to_string();
        let expected = expected_stage.to_string();
        let write = self
            .call(move |db| db.commit_transition(&owned, &expected, &patch, &activity, Utc::now()))
            .await?;
        match write {
            TransitionWrite::Committed => Ok(()),
            TransitionWrite::Missing => Err(StoreError::lead_not_found(id)),
            TransitionWrite::Conflict(actual) => {
                Err(StoreError::stage_conflict(id, expected_stage, &actual))
            }
        }
    }
}

#[async_trait]
impl AuditLookup for SqliteStore {
    async fn audit_for_lead(&self, lead_id: &str) -> Result<Option<AuditRecord>, StoreError> {
        let lead_id = lead_id.to_string();
        self.call(move |db| db.audit_for_lead(&lead_id)).await
    }
}
