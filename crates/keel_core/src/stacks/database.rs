//! Database stack: every database of the stage, placed in the isolated subnets.

use std::collections::BTreeMap;

use keel_config::DatabaseSpec;
use keel_constructs::{DatabaseOutputs, DatabaseOverrides, ManagedDatabase};
use tracing::debug;

use crate::error::CoreResult;
use crate::outputs::keys;
use crate::scope::Exported;
use crate::stack::StackId;
use crate::stacks::{NetworkStackOutputs, DATABASE_STACK};
use crate::stage::StageBuilder;

#[derive(Debug, Clone)]
pub struct DatabaseStackOutputs {
    pub stack: StackId,
    /// Connection details per database name, addressed through imports.
    pub databases: BTreeMap<String, Exported<DatabaseOutputs>>,
}

impl DatabaseStackOutputs {
    pub fn get(&self, name: &str) -> Option<&Exported<DatabaseOutputs>> {
        self.databases.get(name)
    }
}

fn overrides(spec: &DatabaseSpec) -> DatabaseOverrides {
    DatabaseOverrides {
        db_name: spec.db_name.clone(),
        username: spec.username.clone(),
        allocated_storage_gb: spec.allocated_storage_gb,
        instance_class: spec.instance_class.clone(),
        multi_az: spec.multi_az,
    }
}

pub fn declare_database(
    builder: &mut StageBuilder,
    network: &NetworkStackOutputs,
    specs: &[DatabaseSpec],
    alert_email: Option<&str>,
) -> CoreResult<DatabaseStackOutputs> {
    let config = builder.config().clone();

    builder.declare_stack(DATABASE_STACK, &[&network.stack], |scope| {
        let placement = scope.import(&network.database);
        let mut databases = BTreeMap::new();

        for spec in specs {
            let database =
                ManagedDatabase::build(&spec.name, &config, &placement, &overrides(spec), alert_email)?;
            scope.add_construct(&database);

            let local = database.outputs();
            let endpoint = scope.export(
                keys::db_endpoint(&spec.name),
                local.endpoint_address.clone(),
                format!("Endpoint address of database {}", spec.name),
            );
            let secret_arn = scope.export(
                keys::db_secret_arn(&spec.name),
                local.secret_arn.clone(),
                format!("Credentials secret of database {}", spec.name),
            );

            let shared = DatabaseOutputs {
                endpoint_address: scope.import(&endpoint),
                secret_arn: scope.import(&secret_arn),
                ..local
            };
            debug!("Database {} exported from {}", spec.name, scope.id());
            databases.insert(spec.name.clone(), scope.share(shared));
        }

        Ok(DatabaseStackOutputs {
            stack: scope.id().clone(),
            databases,
        })
    })
}
