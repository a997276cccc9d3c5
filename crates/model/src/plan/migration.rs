use crate::plan::{
    connection::ConnectionDescriptor,
    table::{IdentityMode, TableJob, TableRef},
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The immutable migration plan: loaded once at start, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationPlan {
    pub name: String,
    /// Rows per page; 0 disables paging (whole table in one read).
    pub batch_size: usize,
    pub query_timeout_secs: u64,
    pub source: ConnectionDescriptor,
    pub target: ConnectionDescriptor,
    /// Sorted ascending by `order`.
    pub tables: Vec<TableJob>,
}

impl MigrationPlan {
    /// Parent tables whose generated keys must be remembered: every table
    /// with identity mode = generate that some later table's keyLookup
    /// references, plus any generate-mode table (its map is created
    /// regardless so descendants may opt in).
    pub fn key_remap_parents(&self) -> HashMap<TableRef, bool> {
        let mut parents = HashMap::new();
        for job in &self.tables {
            if job.settings.identity_mode == IdentityMode::Generate {
                parents.insert(job.source.clone(), true);
            }
        }
        parents
    }

    pub fn job_by_source(&self, source: &TableRef) -> Option<&TableJob> {
        self.tables.iter().find(|j| &j.source == source)
    }

    /// Tables in declared execution order, honoring the inclusion filter
    /// when requested.
    pub fn ordered_jobs(&self, include_only: bool) -> Vec<&TableJob> {
        let mut jobs: Vec<&TableJob> = self
            .tables
            .iter()
            .filter(|j| !include_only || j.include)
            .collect();
        jobs.sort_by_key(|j| j.order);
        jobs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::{
        connection::{AuthMode, Provider},
        table::{ExistingDataAction, TableSettings},
    };

    fn descriptor() -> ConnectionDescriptor {
        ConnectionDescriptor {
            provider: Provider::SqlServer,
            server: "localhost".into(),
            port: None,
            database: "db".into(),
            auth: AuthMode::SqlAuth,
            username: Some("sa".into()),
            password: Some("pw".into()),
        }
    }

    fn job(order: u32, table: &str, include: bool, mode: IdentityMode) -> TableJob {
        TableJob {
            order,
            source: TableRef::parse(table),
            target: TableRef::parse(table),
            batch_column: "Id".into(),
            include,
            mappings: vec![],
            transformations: vec![],
            settings: TableSettings {
                identity_mode: mode,
                identity_column: Some("Id".into()),
                existing_data: ExistingDataAction::Append,
            },
        }
    }

    fn plan(tables: Vec<TableJob>) -> MigrationPlan {
        MigrationPlan {
            name: "test".into(),
            batch_size: 100,
            query_timeout_secs: 30,
            source: descriptor(),
            target: descriptor(),
            tables,
        }
    }

    #[test]
    fn ordered_jobs_sorts_and_filters() {
        let plan = plan(vec![
            job(2, "dbo.Orders", false, IdentityMode::Preserve),
            job(1, "dbo.Customers", true, IdentityMode::Generate),
        ]);
        let all = plan.ordered_jobs(false);
        assert_eq!(all[0].source.table, "Customers");
        let included = plan.ordered_jobs(true);
        assert_eq!(included.len(), 1);
    }

    #[test]
    fn key_remap_parents_tracks_generate_mode() {
        let plan = plan(vec![
            job(1, "dbo.Customers", true, IdentityMode::Generate),
            job(2, "dbo.Orders", true, IdentityMode::Preserve),
        ]);
        let parents = plan.key_remap_parents();
        assert!(parents.contains_key(&TableRef::parse("dbo.Customers")));
        assert!(!parents.contains_key(&TableRef::parse("dbo.Orders")));
    }
}
