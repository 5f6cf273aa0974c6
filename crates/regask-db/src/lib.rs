//! # regask-db
//!
//! Storage layer for RegAsk - the relational registry store and the
//! retrieval indexes built over it.
//!
//! This crate isolates the "heavy" storage implementations from the domain
//! logic in `regask-core`. By separating these concerns:
//!
//! - Changes to `regask-core` compile fast (no SQLite dep)
//! - Index implementations can evolve without touching pipeline logic
//! - Testing is easier with in-memory stores and indexes
//!
//! ## Architecture
//!
//! ```text
//! regask-cli → regask-core → (traits / request types)
//!                  ↑
//!              regask-db (SQLite store, FTS5 lexical index, vector index)
//!              regask-llm (language-model client)
//! ```
//!
//! ## Modules
//!
//! - `store`: SQLite registry store, FTS5 lexical index, plan-request execution
//! - `vector`: File-backed vector index plus name/activity vector construction
//! - `normalize`: Name normalization shared by ingestion and lookup
//!
//! ## Usage
//!
//! ```ignore
//! use regask_db::{RegistryStore, PlanRequest, VectorIndex};
//!
//! let store = RegistryStore::open("registry.db")?;
//! store.apply_schema()?;
//! store.build_lexical_index()?;
//!
//! // Exact and lexical name resolution
//! let ids = store.exact_company_lookup("Petrobras")?;
//! let ranked = store.lexical_company_search("petroleo brasileiro", 10)?;
//!
//! // Constrained read-only execution
//! let rows = store.execute_read(&request, None)?;
//! ```

pub mod error;
pub mod normalize;
pub mod store;
pub mod vector;

pub use error::{DbError, DbResult};
pub use normalize::normalize_name;
pub use store::{
    index_company_activities, index_company_names, BranchFlag, Company, CompanyIndexEntry,
    Establishment, PlanRequest, RegistryStore, RequestOp, RequestPredicate, RequestValue, Row,
    TableRef, COMPANY_COLUMNS, ESTABLISHMENT_COLUMNS, MAX_REQUEST_LIMIT,
};
pub use vector::{
    activity_vector, clamp_score, cosine_similarity, name_vector, VectorHit, VectorIndex,
    ACTIVITY_VECTOR_DIM, NAME_VECTOR_DIM, PRIMARY_ACTIVITY_WEIGHT, SECONDARY_ACTIVITY_WEIGHT,
};
