//! Structural rules over the assembled plan. Errors abort the load;
//! warnings are surfaced through the validator artefact and the log.

use model::plan::{
    migration::MigrationPlan,
    table::{IdentityMode, TableRef},
    transform::Transformation,
};
use std::collections::{HashMap, HashSet};

pub fn structural(plan: &MigrationPlan) -> (Vec<String>, Vec<String>) {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    if plan.name.trim().is_empty() {
        errors.push("migration name must not be empty".into());
    }
    if plan.tables.is_empty() {
        errors.push("the plan must declare at least one table".into());
    }
    if !plan.target.provider.is_valid_target() {
        errors.push(format!(
            "target provider {} is not supported; use SqlServer or AzureSql",
            plan.target.provider
        ));
    }
    for (role, conn) in [("source", &plan.source), ("target", &plan.target)] {
        if !conn.provider.supports_auth(conn.auth) {
            errors.push(format!(
                "{role} connection: {} does not accept authentication mode {}",
                conn.provider, conn.auth
            ));
        }
    }

    let mut seen_orders: HashSet<u32> = HashSet::new();
    for job in &plan.tables {
        if !seen_orders.insert(job.order) {
            warnings.push(format!(
                "duplicate execution order {} (table `{}`)",
                job.order, job.source
            ));
        }
        if job.batch_column.trim().is_empty() {
            errors.push(format!("table `{}` has no batch column", job.source));
        }
    }

    // keyLookup parents must run earlier and generate identities;
    // anything else would need a key map that cannot exist yet.
    let orders: HashMap<TableRef, (u32, IdentityMode)> = plan
        .tables
        .iter()
        .map(|j| (j.source.clone(), (j.order, j.settings.identity_mode)))
        .collect();
    for job in &plan.tables {
        for t in &job.transformations {
            if let Transformation::KeyLookup { parent_table, target, .. } = t {
                let parent = TableRef::parse(parent_table);
                match orders.get(&parent) {
                    None => errors.push(format!(
                        "table `{}`: keyLookup `{target}` references unknown parent `{parent}`",
                        job.source
                    )),
                    Some((parent_order, mode)) => {
                        if *parent_order >= job.order {
                            errors.push(format!(
                                "table `{}`: keyLookup `{target}` parent `{parent}` must have a lower execution order",
                                job.source
                            ));
                        }
                        if *mode != IdentityMode::Generate {
                            errors.push(format!(
                                "table `{}`: keyLookup `{target}` parent `{parent}` must use identity mode generate",
                                job.source
                            ));
                        }
                    }
                }
            }
        }

        // Within one table, one writer per target column.
        let mut claimed: HashSet<String> = HashSet::new();
        for t in &job.transformations {
            for col in t.target_columns() {
                if !claimed.insert(col.to_ascii_lowercase()) {
                    errors.push(format!(
                        "table `{}`: target column `{col}` is written by more than one transformation",
                        job.source
                    ));
                }
            }
        }
    }

    (errors, warnings)
}
