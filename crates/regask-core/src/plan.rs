//! Query planning.
//!
//! The composer turns (intent, grounded identifiers, optional proposed
//! filters) into a [`QueryPlan`] by filling one fixed template per intent.
//! Free text never becomes query content: the only variable parts of a plan
//! are catalog-validated field names and literal values bound as parameters.
//! Anything that fails validation is rejected before execution.

use serde::{Deserialize, Serialize};

use regask_db::{PlanRequest, RequestOp, RequestPredicate, RequestValue};

use crate::catalog::{EntityKind, SchemaCatalog};
use crate::classify::Intent;
use crate::errors::{RegaskError, RegaskResult};

/// Default row limit applied to every plan.
pub const DEFAULT_ROW_LIMIT: usize = 50;

// ============================================================================
// QueryPlan
// ============================================================================

/// Comparison operator of a plan predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PredicateOp {
    /// Field equals a single value.
    Eq,
    /// Field is one of a list of values.
    In,
}

/// Literal value of a plan predicate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PredicateValue {
    /// A single text literal.
    Text(String),
    /// A list of text literals.
    TextList(Vec<String>),
}

/// One predicate of a query plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Predicate {
    /// Catalog field name.
    pub field: String,
    /// Comparison operator.
    pub op: PredicateOp,
    /// Literal value(s), always bound as parameters.
    pub value: PredicateValue,
}

/// A validated, parameterized query plan.
///
/// Plans are read-only by construction: there is no mutation shape to
/// express. [`QueryPlan::validate`] checks every field against the schema
/// catalog; the storage layer re-checks its own allowlist at execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryPlan {
    /// The intent this plan serves.
    pub intent: Intent,
    /// Target entity.
    pub entity: EntityKind,
    /// Filter predicates.
    pub predicates: Vec<Predicate>,
    /// Fields to return.
    pub projection: Vec<String>,
    /// Maximum rows.
    pub limit: usize,
}

impl QueryPlan {
    /// Validate this plan against the schema catalog.
    pub fn validate(&self, catalog: &SchemaCatalog) -> RegaskResult<()> {
        if self.predicates.is_empty() {
            return Err(RegaskError::plan_validation(
                "plan has no predicates",
                "Name a specific company in the question",
            ));
        }
        for predicate in &self.predicates {
            if !catalog.has_field(self.entity, &predicate.field) {
                return Err(RegaskError::plan_validation(
                    format!(
                        "field `{}` does not exist on `{}`",
                        predicate.field, self.entity
                    ),
                    "Ask about fields the registry actually records",
                ));
            }
            if let PredicateValue::TextList(values) = &predicate.value {
                if values.is_empty() {
                    return Err(RegaskError::plan_validation(
                        format!("predicate on `{}` has an empty value list", predicate.field),
                        "Name at least one company",
                    ));
                }
            }
        }
        for field in &self.projection {
            if !catalog.has_field(self.entity, field) {
                return Err(RegaskError::plan_validation(
                    format!("projected field `{}` does not exist on `{}`", field, self.entity),
                    "Ask about fields the registry actually records",
                ));
            }
        }
        Ok(())
    }

    /// Lower this plan into a storage-layer request.
    pub fn to_request(&self) -> PlanRequest {
        PlanRequest {
            table: self.entity.table_ref(),
            predicates: self
                .predicates
                .iter()
                .map(|p| RequestPredicate {
                    column: p.field.clone(),
                    op: match p.op {
                        PredicateOp::Eq => RequestOp::Eq,
                        PredicateOp::In => RequestOp::In,
                    },
                    value: match &p.value {
                        PredicateValue::Text(v) => RequestValue::Text(v.clone()),
                        PredicateValue::TextList(vs) => RequestValue::TextList(vs.clone()),
                    },
                })
                .collect(),
            projection: self.projection.clone(),
            limit: self.limit,
        }
    }

    /// Predicate summary for diagnostics: field names and operators only,
    /// never literal values.
    pub fn predicate_summary(&self) -> String {
        self.predicates
            .iter()
            .map(|p| {
                format!(
                    "{} {}",
                    p.field,
                    match p.op {
                        PredicateOp::Eq => "=",
                        PredicateOp::In => "in",
                    }
                )
            })
            .collect::<Vec<_>>()
            .join(", ")
    }
}

// ============================================================================
// Proposed filters
// ============================================================================

/// A field/value filter proposed by the language model.
///
/// Proposals are suggestions, not instructions: each is validated against
/// the catalog and dropped (with a validation error) when it names an
/// unknown field. Values are only ever bound as parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposedFilter {
    /// Proposed catalog field name.
    pub field: String,
    /// Proposed literal value.
    pub value: String,
}

// ============================================================================
// QueryComposer
// ============================================================================

fn text_eq(field: &str, value: impl Into<String>) -> Predicate {
    Predicate {
        field: field.to_string(),
        op: PredicateOp::Eq,
        value: PredicateValue::Text(value.into()),
    }
}

fn strings(fields: &[&str]) -> Vec<String> {
    fields.iter().map(|f| f.to_string()).collect()
}

/// Builds one fixed plan template per intent.
pub struct QueryComposer<'a> {
    catalog: &'a SchemaCatalog,
    row_limit: usize,
}

impl<'a> QueryComposer<'a> {
    /// Create a composer over the given catalog.
    pub fn new(catalog: &'a SchemaCatalog, row_limit: usize) -> Self {
        Self { catalog, row_limit }
    }

    /// Compose and validate the plan for an intent.
    ///
    /// `company_ids` are the grounded identifiers from retrieval; every
    /// intent except `Unsupported` requires at least one. `filters` are
    /// optional model-proposed refinements, validated before use.
    pub fn compose(
        &self,
        intent: Intent,
        company_ids: &[String],
        filters: &[ProposedFilter],
    ) -> RegaskResult<QueryPlan> {
        if intent == Intent::Unsupported {
            return Err(RegaskError::plan_validation(
                "no plan template exists for unsupported questions",
                "Ask about company locations, branches, or similar companies",
            ));
        }
        if company_ids.is_empty() {
            return Err(RegaskError::plan_validation(
                format!("intent `{}` requires a grounded company", intent),
                "Name a specific company in the question",
            ));
        }

        let mut plan = match intent {
            Intent::LookupByName => QueryPlan {
                intent,
                entity: EntityKind::Companies,
                predicates: vec![text_eq("cnpj_root", company_ids[0].clone())],
                projection: strings(&[
                    "cnpj_root",
                    "legal_name",
                    "trade_name",
                    "status",
                    "activity_code",
                    "city",
                    "state",
                    "registered_on",
                ]),
                limit: self.row_limit,
            },
            Intent::LookupByLocation => QueryPlan {
                intent,
                entity: EntityKind::Establishments,
                predicates: vec![
                    text_eq("company_id", company_ids[0].clone()),
                    text_eq("branch_flag", regask_db::BranchFlag::Headquarters.as_db_value()),
                ],
                projection: strings(&[
                    "company_id",
                    "unit_id",
                    "street",
                    "city",
                    "state",
                    "postal_code",
                ]),
                limit: self.row_limit,
            },
            Intent::ListBranches => QueryPlan {
                intent,
                entity: EntityKind::Establishments,
                predicates: vec![text_eq("company_id", company_ids[0].clone())],
                projection: strings(&[
                    "company_id",
                    "unit_id",
                    "branch_flag",
                    "city",
                    "state",
                    "status",
                ]),
                limit: self.row_limit,
            },
            Intent::FindSimilar => QueryPlan {
                intent,
                entity: EntityKind::Companies,
                predicates: vec![Predicate {
                    field: "cnpj_root".to_string(),
                    op: PredicateOp::In,
                    value: PredicateValue::TextList(company_ids.to_vec()),
                }],
                projection: strings(&[
                    "cnpj_root",
                    "legal_name",
                    "activity_code",
                    "city",
                    "state",
                ]),
                limit: self.row_limit,
            },
            Intent::Unsupported => unreachable!("rejected above"),
        };

        for filter in filters {
            if !self.catalog.has_field(plan.entity, &filter.field) {
                return Err(RegaskError::plan_validation(
                    format!(
                        "proposed filter field `{}` does not exist on `{}`",
                        filter.field, plan.entity
                    ),
                    "Ask about fields the registry actually records",
                ));
            }
            plan.predicates.push(text_eq(&filter.field, filter.value.clone()));
        }

        plan.validate(self.catalog)?;
        Ok(plan)
    }
}
