//! Query execution.
//!
//! Runs a validated plan against the registry store, read-only, under a hard
//! row limit and a wall-clock deadline. Store-level failures and timeouts
//! surface as [`RegaskError::Execution`] carrying only the plan's target
//! entity and predicate shape; the raw store error text goes to the logs.

use std::time::{Duration, Instant};

use tracing::{debug, error};

use regask_db::{RegistryStore, Row};

use crate::errors::{RegaskError, RegaskResult};
use crate::plan::QueryPlan;

/// Executes validated plans with resource limits.
pub struct QueryExecutor {
    row_limit: usize,
    timeout: Duration,
}

impl QueryExecutor {
    /// Create an executor with the given row limit and per-query timeout.
    pub fn new(row_limit: usize, timeout: Duration) -> Self {
        Self { row_limit, timeout }
    }

    /// Run a plan, returning its typed result rows.
    ///
    /// The plan's own limit is clamped to this executor's row limit. The
    /// deadline covers the whole read, checked while rows stream.
    pub fn run(&self, store: &RegistryStore, plan: &QueryPlan) -> RegaskResult<Vec<Row>> {
        let mut request = plan.to_request();
        request.limit = request.limit.min(self.row_limit);

        let started = Instant::now();
        let deadline = started + self.timeout;

        match store.execute_read(&request, Some(deadline)) {
            Ok(rows) => {
                debug!(
                    "Plan for `{}` returned {} rows in {} ms",
                    plan.entity,
                    rows.len(),
                    started.elapsed().as_millis()
                );
                Ok(rows)
            }
            Err(err) => {
                error!("Plan execution failed for `{}`: {}", plan.entity, err);
                Err(RegaskError::Execution {
                    entity: plan.entity.name().to_string(),
                    predicates: plan.predicate_summary(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::EntityKind;
    use crate::classify::Intent;
    use crate::plan::{Predicate, PredicateOp, PredicateValue, QueryPlan};
    use regask_db::Company;

    fn seeded_store() -> RegistryStore {
        let store = RegistryStore::open_in_memory().unwrap();
        store.apply_schema().unwrap();
        for i in 0..5 {
            store
                .insert_company(&Company {
                    cnpj_root: format!("0000000{}", i),
                    legal_name: format!("COMPANY {}", i),
                    trade_name: None,
                    status: "active".to_string(),
                    activity_code: "47113".to_string(),
                    secondary_activity_codes: None,
                    street: None,
                    city: Some("Recife".to_string()),
                    state: Some("PE".to_string()),
                    postal_code: None,
                    registered_on: None,
                })
                .unwrap();
        }
        store
    }

    fn plan_for(ids: Vec<String>, limit: usize) -> QueryPlan {
        QueryPlan {
            intent: Intent::FindSimilar,
            entity: EntityKind::Companies,
            predicates: vec![Predicate {
                field: "cnpj_root".to_string(),
                op: PredicateOp::In,
                value: PredicateValue::TextList(ids),
            }],
            projection: vec!["cnpj_root".to_string(), "legal_name".to_string()],
            limit,
        }
    }

    #[test]
    fn test_run_returns_typed_rows() {
        let store = seeded_store();
        let executor = QueryExecutor::new(50, Duration::from_secs(2));
        let rows = executor
            .run(&store, &plan_for(vec!["00000001".to_string()], 50))
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["legal_name"], serde_json::json!("COMPANY 1"));
    }

    #[test]
    fn test_row_limit_is_clamped() {
        let store = seeded_store();
        let executor = QueryExecutor::new(2, Duration::from_secs(2));
        let ids: Vec<String> = (0..5).map(|i| format!("0000000{}", i)).collect();
        let rows = executor.run(&store, &plan_for(ids, 1000)).unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn test_store_failure_hides_raw_error() {
        let store = seeded_store();
        let executor = QueryExecutor::new(50, Duration::from_secs(2));
        let mut plan = plan_for(vec!["00000001".to_string()], 50);
        // Bypass catalog validation to exercise the storage allowlist.
        plan.predicates.push(Predicate {
            field: "no_such_column".to_string(),
            op: PredicateOp::Eq,
            value: PredicateValue::Text("x".to_string()),
        });
        let err = executor.run(&store, &plan).unwrap_err();
        match err {
            RegaskError::Execution { entity, predicates } => {
                assert_eq!(entity, "companies");
                assert!(predicates.contains("no_such_column ="));
                assert!(!predicates.contains('x'));
            }
            other => panic!("expected Execution error, got {:?}", other),
        }
    }
}
