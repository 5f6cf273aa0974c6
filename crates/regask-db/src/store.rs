//! SQLite-backed registry store.
//!
//! Owns the two relational tables (`companies`, `establishments`) and the
//! FTS5 lexical index over company names. The question-answering pipeline
//! treats the store as read-only; the insert/bootstrap methods exist for
//! index construction and test fixtures.
//!
//! Query execution goes through [`PlanRequest`], a constrained read-only
//! request shape: a target table, column-allowlisted predicates and
//! projection, and a row limit. SQL text is assembled exclusively from
//! allowlisted identifiers with every literal bound as a parameter; free
//! text never reaches the statement.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::Mutex;
use std::time::Instant;

use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::error::{DbError, DbResult};
use crate::normalize::normalize_name;
use crate::vector::{activity_vector, name_vector, VectorIndex};

/// A result row: field name to JSON value.
pub type Row = BTreeMap<String, serde_json::Value>;

/// Hard cap on rows a single plan request may return, regardless of the
/// requested limit.
pub const MAX_REQUEST_LIMIT: usize = 1000;

/// Columns exposed for plan requests against `companies`.
pub const COMPANY_COLUMNS: &[&str] = &[
    "cnpj_root",
    "legal_name",
    "trade_name",
    "status",
    "activity_code",
    "secondary_activity_codes",
    "street",
    "city",
    "state",
    "postal_code",
    "registered_on",
];

/// Columns exposed for plan requests against `establishments`.
pub const ESTABLISHMENT_COLUMNS: &[&str] = &[
    "company_id",
    "unit_id",
    "branch_flag",
    "street",
    "city",
    "state",
    "postal_code",
    "activity_code",
    "status",
];

// ============================================================================
// Registry entities
// ============================================================================

/// Headquarters/branch discriminator, stored as `"1"` / `"2"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BranchFlag {
    /// The company's headquarters unit.
    Headquarters,
    /// A branch unit.
    Branch,
}

impl BranchFlag {
    /// Stored database value for this flag.
    pub fn as_db_value(&self) -> &'static str {
        match self {
            Self::Headquarters => "1",
            Self::Branch => "2",
        }
    }

    /// Parse a stored database value.
    pub fn from_db_value(value: &str) -> Option<Self> {
        match value {
            "1" => Some(Self::Headquarters),
            "2" => Some(Self::Branch),
            _ => None,
        }
    }
}

/// A company row (the canonical registry entity).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Company {
    /// Registry identifier, unique and immutable.
    pub cnpj_root: String,
    /// Legal name.
    pub legal_name: String,
    /// Trade name, if different from the legal name.
    pub trade_name: Option<String>,
    /// Registration status.
    pub status: String,
    /// Primary activity code.
    pub activity_code: String,
    /// Comma-separated secondary activity codes.
    pub secondary_activity_codes: Option<String>,
    /// Street address of the registered seat.
    pub street: Option<String>,
    /// City.
    pub city: Option<String>,
    /// State.
    pub state: Option<String>,
    /// Postal code.
    pub postal_code: Option<String>,
    /// Registration date (ISO 8601 date string).
    pub registered_on: Option<String>,
}

/// An establishment row (a branch/unit of exactly one company).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Establishment {
    /// Owning company's registry identifier.
    pub company_id: String,
    /// Establishment identifier, unique within the company.
    pub unit_id: String,
    /// Headquarters or branch.
    pub branch_flag: BranchFlag,
    /// Street address.
    pub street: Option<String>,
    /// City.
    pub city: Option<String>,
    /// State.
    pub state: Option<String>,
    /// Postal code.
    pub postal_code: Option<String>,
    /// Activity code of this unit.
    pub activity_code: Option<String>,
    /// Unit status.
    pub status: Option<String>,
}

// ============================================================================
// PlanRequest
// ============================================================================

/// Target table of a plan request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TableRef {
    /// The `companies` table.
    Companies,
    /// The `establishments` table.
    Establishments,
}

impl TableRef {
    /// Table name as it appears in SQL.
    pub fn table_name(&self) -> &'static str {
        match self {
            Self::Companies => "companies",
            Self::Establishments => "establishments",
        }
    }

    /// Column allowlist for this table.
    pub fn columns(&self) -> &'static [&'static str] {
        match self {
            Self::Companies => COMPANY_COLUMNS,
            Self::Establishments => ESTABLISHMENT_COLUMNS,
        }
    }
}

/// Comparison operator of a request predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestOp {
    /// Column equals a single value.
    Eq,
    /// Column is one of a list of values.
    In,
}

/// Literal value bound into a request predicate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestValue {
    /// A single text literal.
    Text(String),
    /// A list of text literals (for `In`).
    TextList(Vec<String>),
}

/// One predicate of a plan request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestPredicate {
    /// Column name; must be in the target table's allowlist.
    pub column: String,
    /// Comparison operator.
    pub op: RequestOp,
    /// Bound value(s).
    pub value: RequestValue,
}

/// A constrained, read-only query request.
///
/// The store validates every identifier against the target table's allowlist
/// before building SQL; requests that reference anything else are rejected.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanRequest {
    /// Target table.
    pub table: TableRef,
    /// Filter predicates (at least one; full scans are not served).
    pub predicates: Vec<RequestPredicate>,
    /// Columns to project (at least one).
    pub projection: Vec<String>,
    /// Maximum number of rows to return (clamped to [`MAX_REQUEST_LIMIT`]).
    pub limit: usize,
}

// ============================================================================
// RegistryStore
// ============================================================================

/// Entry used when building the vector indexes from the relational store.
#[derive(Debug, Clone)]
pub struct CompanyIndexEntry {
    /// Registry identifier.
    pub cnpj_root: String,
    /// Legal name.
    pub legal_name: String,
    /// Primary activity code.
    pub activity_code: String,
    /// Comma-separated secondary activity codes.
    pub secondary_activity_codes: Option<String>,
}

/// SQLite-backed registry store.
///
/// The connection sits behind a mutex so the store is shareable across
/// concurrent pipeline invocations; all pipeline access is read-only.
pub struct RegistryStore {
    conn: Mutex<Connection>,
}

impl RegistryStore {
    /// Open (or create) a registry database at the given path.
    pub fn open(path: impl AsRef<Path>) -> DbResult<Self> {
        debug!("Opening registry store at {:?}", path.as_ref());
        let conn = Connection::open(path)?;
        Self::configure(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory registry database (tests, ephemeral use).
    pub fn open_in_memory() -> DbResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::configure(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn configure(conn: &Connection) -> DbResult<()> {
        conn.pragma_update(None, "foreign_keys", true)?;
        conn.busy_timeout(std::time::Duration::from_millis(2000))?;
        Ok(())
    }

    fn lock(&self) -> DbResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| DbError::internal(format!("Connection lock poisoned: {}", e)))
    }

    /// Create the relational tables if they do not exist.
    pub fn apply_schema(&self) -> DbResult<()> {
        let conn = self.lock()?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS companies (
                cnpj_root                 TEXT PRIMARY KEY,
                legal_name                TEXT NOT NULL,
                legal_name_norm           TEXT NOT NULL,
                trade_name                TEXT,
                trade_name_norm           TEXT,
                status                    TEXT NOT NULL,
                activity_code             TEXT NOT NULL,
                secondary_activity_codes  TEXT,
                street                    TEXT,
                city                      TEXT,
                state                     TEXT,
                postal_code               TEXT,
                registered_on             TEXT
            );

            CREATE TABLE IF NOT EXISTS establishments (
                company_id    TEXT NOT NULL REFERENCES companies(cnpj_root),
                unit_id       TEXT NOT NULL,
                branch_flag   TEXT NOT NULL CHECK (branch_flag IN ('1', '2')),
                street        TEXT,
                city          TEXT,
                state         TEXT,
                postal_code   TEXT,
                activity_code TEXT,
                status        TEXT,
                PRIMARY KEY (company_id, unit_id)
            );

            CREATE INDEX IF NOT EXISTS idx_companies_legal_name_norm
                ON companies(legal_name_norm);
            CREATE INDEX IF NOT EXISTS idx_establishments_company
                ON establishments(company_id, branch_flag);
            "#,
        )?;
        Ok(())
    }

    /// Insert a company row, computing the normalized name columns.
    pub fn insert_company(&self, company: &Company) -> DbResult<()> {
        let conn = self.lock()?;
        conn.execute(
            r#"
            INSERT INTO companies (
                cnpj_root, legal_name, legal_name_norm, trade_name, trade_name_norm,
                status, activity_code, secondary_activity_codes,
                street, city, state, postal_code, registered_on
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            "#,
            rusqlite::params![
                company.cnpj_root,
                company.legal_name,
                normalize_name(&company.legal_name),
                company.trade_name,
                company.trade_name.as_deref().map(normalize_name),
                company.status,
                company.activity_code,
                company.secondary_activity_codes,
                company.street,
                company.city,
                company.state,
                company.postal_code,
                company.registered_on,
            ],
        )?;
        Ok(())
    }

    /// Insert an establishment row.
    pub fn insert_establishment(&self, est: &Establishment) -> DbResult<()> {
        let conn = self.lock()?;
        conn.execute(
            r#"
            INSERT INTO establishments (
                company_id, unit_id, branch_flag,
                street, city, state, postal_code, activity_code, status
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
            rusqlite::params![
                est.company_id,
                est.unit_id,
                est.branch_flag.as_db_value(),
                est.street,
                est.city,
                est.state,
                est.postal_code,
                est.activity_code,
                est.status,
            ],
        )?;
        Ok(())
    }

    // ========================================================================
    // Lexical index
    // ========================================================================

    /// (Re)build the FTS5 lexical index over company names.
    pub fn build_lexical_index(&self) -> DbResult<()> {
        let conn = self.lock()?;
        conn.execute_batch(
            r#"
            CREATE VIRTUAL TABLE IF NOT EXISTS company_fts
                USING fts5(legal_name, trade_name, cnpj_root UNINDEXED);
            DELETE FROM company_fts;
            INSERT INTO company_fts (legal_name, trade_name, cnpj_root)
                SELECT legal_name, coalesce(trade_name, ''), cnpj_root FROM companies;
            "#,
        )?;
        debug!("Lexical index rebuilt");
        Ok(())
    }

    /// Whether the lexical index exists in this database.
    pub fn lexical_index_ready(&self) -> DbResult<bool> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            "SELECT count(*) FROM sqlite_master WHERE type = 'table' AND name = 'company_fts'",
            [],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    // ========================================================================
    // Retrieval primitives
    // ========================================================================

    /// Exact lookup: normalized-name equality or registry-identifier equality.
    ///
    /// Returns matching company identifiers in deterministic order.
    pub fn exact_company_lookup(&self, fragment: &str) -> DbResult<Vec<String>> {
        let normalized = normalize_name(fragment);
        let raw = fragment.trim();
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT cnpj_root FROM companies
            WHERE legal_name_norm = ?1
               OR (trade_name_norm IS NOT NULL AND trade_name_norm = ?1)
               OR cnpj_root = ?2
            ORDER BY cnpj_root
            "#,
        )?;
        let ids = stmt
            .query_map(rusqlite::params![normalized, raw], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(ids)
    }

    /// Lexical search over company names, best match first.
    ///
    /// Uses the FTS5 index (BM25 ranking) and appends a normalized-substring
    /// fallback for fragments FTS tokenization misses. Fails with
    /// [`DbError::LexicalIndexMissing`] if the index has not been built,
    /// distinct from "no matches", which returns an empty vector.
    pub fn lexical_company_search(&self, fragment: &str, top_k: usize) -> DbResult<Vec<String>> {
        if !self.lexical_index_ready()? {
            return Err(DbError::lexical_index_missing(
                "company_fts table has not been built",
            ));
        }

        let match_expr = fts_match_expression(fragment);
        let mut ids: Vec<String> = Vec::new();

        if let Some(expr) = match_expr {
            let conn = self.lock()?;
            let mut stmt = conn.prepare(
                r#"
                SELECT cnpj_root FROM company_fts
                WHERE company_fts MATCH ?1
                ORDER BY bm25(company_fts), cnpj_root
                LIMIT ?2
                "#,
            )?;
            ids = stmt
                .query_map(rusqlite::params![expr, top_k as i64], |row| row.get(0))?
                .collect::<Result<Vec<String>, _>>()?;
        }

        // Substring fallback over the normalized name, as the registry's
        // original lookup did with ILIKE.
        if ids.len() < top_k {
            let normalized = normalize_name(fragment);
            if !normalized.is_empty() {
                let seen: HashSet<String> = ids.iter().cloned().collect();
                let conn = self.lock()?;
                let mut stmt = conn.prepare(
                    r#"
                    SELECT cnpj_root FROM companies
                    WHERE legal_name_norm LIKE '%' || ?1 || '%'
                    ORDER BY length(legal_name_norm), cnpj_root
                    LIMIT ?2
                    "#,
                )?;
                let extra = stmt
                    .query_map(rusqlite::params![normalized, top_k as i64], |row| {
                        row.get::<_, String>(0)
                    })?
                    .collect::<Result<Vec<String>, _>>()?;
                for id in extra {
                    if !seen.contains(id.as_str()) && ids.len() < top_k {
                        ids.push(id);
                    }
                }
            }
        }

        trace!("Lexical search '{}' -> {} hits", fragment, ids.len());
        Ok(ids)
    }

    /// Legal names for a set of company identifiers.
    pub fn company_names(&self, ids: &[String]) -> DbResult<Vec<(String, String)>> {
        let mut out = Vec::with_capacity(ids.len());
        let conn = self.lock()?;
        let mut stmt =
            conn.prepare("SELECT legal_name FROM companies WHERE cnpj_root = ?1")?;
        for id in ids {
            let name: Option<String> = stmt
                .query_row(rusqlite::params![id], |row| row.get(0))
                .map(Some)
                .or_else(|e| match e {
                    rusqlite::Error::QueryReturnedNoRows => Ok(None),
                    other => Err(other),
                })?;
            if let Some(name) = name {
                out.push((id.clone(), name));
            }
        }
        Ok(out)
    }

    /// Number of company rows.
    pub fn company_count(&self) -> DbResult<usize> {
        let conn = self.lock()?;
        let n: i64 = conn.query_row("SELECT count(*) FROM companies", [], |row| row.get(0))?;
        Ok(n as usize)
    }

    /// Number of establishment rows.
    pub fn establishment_count(&self) -> DbResult<usize> {
        let conn = self.lock()?;
        let n: i64 =
            conn.query_row("SELECT count(*) FROM establishments", [], |row| row.get(0))?;
        Ok(n as usize)
    }

    /// All companies with the fields needed for vector-index construction.
    pub fn companies_for_indexing(&self) -> DbResult<Vec<CompanyIndexEntry>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT cnpj_root, legal_name, activity_code, secondary_activity_codes
            FROM companies ORDER BY cnpj_root
            "#,
        )?;
        let entries = stmt
            .query_map([], |row| {
                Ok(CompanyIndexEntry {
                    cnpj_root: row.get(0)?,
                    legal_name: row.get(1)?,
                    activity_code: row.get(2)?,
                    secondary_activity_codes: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    // ========================================================================
    // Plan execution
    // ========================================================================

    /// Execute a validated plan request, read-only.
    ///
    /// Rows come back in deterministic order (first projected column). The
    /// optional deadline is checked while streaming rows; exceeding it fails
    /// with [`DbError::DeadlineExceeded`].
    pub fn execute_read(
        &self,
        request: &PlanRequest,
        deadline: Option<Instant>,
    ) -> DbResult<Vec<Row>> {
        let (sql, params) = build_select(request)?;
        trace!("Executing plan request: {}", sql);

        let started = Instant::now();
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&sql)?;
        let mut rows_iter = stmt.query(rusqlite::params_from_iter(params))?;

        let mut rows: Vec<Row> = Vec::new();
        while let Some(row) = rows_iter.next()? {
            if let Some(deadline) = deadline {
                if Instant::now() > deadline {
                    return Err(DbError::DeadlineExceeded {
                        elapsed_ms: started.elapsed().as_millis() as u64,
                    });
                }
            }
            let mut out = Row::new();
            for (i, column) in request.projection.iter().enumerate() {
                out.insert(column.clone(), value_ref_to_json(row.get_ref(i)?));
            }
            rows.push(out);
        }
        Ok(rows)
    }
}

/// Build the SELECT statement and its bound parameters for a plan request.
///
/// Every identifier is checked against the target table's column allowlist;
/// literals are always bound, never spliced.
fn build_select(request: &PlanRequest) -> DbResult<(String, Vec<SqlValue>)> {
    let table = request.table;

    if request.projection.is_empty() {
        return Err(DbError::invalid_request("projection must not be empty"));
    }
    if request.predicates.is_empty() {
        return Err(DbError::invalid_request(
            "plan requests must carry at least one predicate",
        ));
    }
    if request.limit == 0 {
        return Err(DbError::invalid_request("limit must be at least 1"));
    }

    let allowed = table.columns();
    for column in &request.projection {
        if !allowed.contains(&column.as_str()) {
            return Err(DbError::column_not_allowed(table.table_name(), column));
        }
    }

    let mut clauses: Vec<String> = Vec::with_capacity(request.predicates.len());
    let mut params: Vec<SqlValue> = Vec::new();
    for predicate in &request.predicates {
        if !allowed.contains(&predicate.column.as_str()) {
            return Err(DbError::column_not_allowed(
                table.table_name(),
                &predicate.column,
            ));
        }
        match (&predicate.op, &predicate.value) {
            (RequestOp::Eq, RequestValue::Text(value)) => {
                clauses.push(format!("{} = ?", predicate.column));
                params.push(SqlValue::Text(value.clone()));
            }
            (RequestOp::In, RequestValue::TextList(values)) => {
                if values.is_empty() {
                    return Err(DbError::invalid_request(
                        "IN predicate must carry at least one value",
                    ));
                }
                let placeholders = vec!["?"; values.len()].join(", ");
                clauses.push(format!("{} IN ({})", predicate.column, placeholders));
                params.extend(values.iter().cloned().map(SqlValue::Text));
            }
            _ => {
                return Err(DbError::invalid_request(
                    "predicate operator does not match its value shape",
                ));
            }
        }
    }

    let limit = request.limit.min(MAX_REQUEST_LIMIT);
    let sql = format!(
        "SELECT {} FROM {} WHERE {} ORDER BY {} LIMIT {}",
        request.projection.join(", "),
        table.table_name(),
        clauses.join(" AND "),
        request.projection[0],
        limit,
    );
    Ok((sql, params))
}

/// Build an FTS5 MATCH expression from a free-text fragment.
///
/// Tokens are normalized and individually quoted so registry names with
/// punctuation cannot inject MATCH syntax. Returns `None` when the fragment
/// has no usable tokens.
fn fts_match_expression(fragment: &str) -> Option<String> {
    let normalized = normalize_name(fragment);
    let tokens: Vec<String> = normalized
        .split_whitespace()
        .map(|t| format!("\"{}\"", t))
        .collect();
    if tokens.is_empty() {
        None
    } else {
        Some(tokens.join(" "))
    }
}

fn value_ref_to_json(value: ValueRef<'_>) -> serde_json::Value {
    match value {
        ValueRef::Null => serde_json::Value::Null,
        ValueRef::Integer(i) => serde_json::Value::from(i),
        ValueRef::Real(f) => serde_json::Value::from(f),
        ValueRef::Text(t) => serde_json::Value::from(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => serde_json::Value::from(format!("<blob:{} bytes>", b.len())),
    }
}

// ============================================================================
// Vector index construction from the store
// ============================================================================

/// Populate a name-vector index from every company in the store.
///
/// Returns the number of companies indexed.
pub fn index_company_names(store: &RegistryStore, index: &VectorIndex) -> DbResult<usize> {
    let entries = store.companies_for_indexing()?;
    for entry in &entries {
        index.upsert(entry.cnpj_root.clone(), name_vector(&entry.legal_name))?;
    }
    Ok(entries.len())
}

/// Populate an activity-vector index from every company in the store.
///
/// Returns the number of companies indexed.
pub fn index_company_activities(store: &RegistryStore, index: &VectorIndex) -> DbResult<usize> {
    let entries = store.companies_for_indexing()?;
    for entry in &entries {
        index.upsert(
            entry.cnpj_root.clone(),
            activity_vector(
                &entry.activity_code,
                entry.secondary_activity_codes.as_deref(),
            ),
        )?;
    }
    Ok(entries.len())
}

// ============================================================================
// Tests
// ============================================================================
