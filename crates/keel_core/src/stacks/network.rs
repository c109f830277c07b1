//! Network stack.

use keel_constructs::{NetworkTopology, Placement, Token};

use crate::error::CoreResult;
use crate::outputs::keys;
use crate::scope::Exported;
use crate::stack::StackId;
use crate::stage::StageBuilder;
use crate::stacks::NETWORK_STACK;

/// What the network stack publishes.
#[derive(Debug, Clone)]
pub struct NetworkStackOutputs {
    pub stack: StackId,
    pub vpc_id: Exported<Token>,
    pub public_subnet_ids: Exported<Vec<Token>>,
    /// Compute subnets and security group, addressed through imports.
    pub compute: Exported<Placement>,
    /// Database subnets and security group, addressed through imports.
    pub database: Exported<Placement>,
}

pub fn declare_network(builder: &mut StageBuilder) -> CoreResult<NetworkStackOutputs> {
    let topology = NetworkTopology::build(builder.config())?;

    builder.declare_stack(NETWORK_STACK, &[], |scope| {
        scope.add_construct(&topology);

        let vpc_id = scope.export(keys::VPC_ID, topology.vpc_id(), "Virtual network id");
        let public_subnet_ids = scope.export_list(
            keys::PUBLIC_SUBNET_IDS,
            topology.public.ids(),
            "Public subnet ids",
        );
        let compute_subnet_ids = scope.export_list(
            keys::COMPUTE_SUBNET_IDS,
            topology.compute.ids(),
            "Compute subnet ids",
        );
        let database_subnet_ids = scope.export_list(
            keys::DATABASE_SUBNET_IDS,
            topology.database.ids(),
            "Database subnet ids",
        );
        let compute_sg = scope.export(
            keys::COMPUTE_SECURITY_GROUP_ID,
            topology.compute_security_group.id(),
            "Compute security group id",
        );
        let database_sg = scope.export(
            keys::DATABASE_SECURITY_GROUP_ID,
            topology.database_security_group.id(),
            "Database security group id",
        );

        // Consumers see the same groups and ingress rules, addressed by import.
        let own_vpc = scope.import(&vpc_id);
        let compute = Placement {
            vpc_id: own_vpc.clone(),
            subnet_ids: scope.import(&compute_subnet_ids),
            security_group: topology
                .compute_security_group
                .to_ref()
                .with_id(scope.import(&compute_sg)),
        };
        let database = Placement {
            vpc_id: own_vpc,
            subnet_ids: scope.import(&database_subnet_ids),
            security_group: topology
                .database_security_group
                .to_ref()
                .with_id(scope.import(&database_sg)),
        };

        Ok(NetworkStackOutputs {
            stack: scope.id().clone(),
            vpc_id,
            public_subnet_ids,
            compute: scope.share(compute),
            database: scope.share(database),
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_config::resolve;

    #[test]
    fn test_network_exports_stable_keys() {
        let config = resolve("dev");
        let port = config.database.port;
        let mut builder = StageBuilder::new("keel", config);
        let network = declare_network(&mut builder).unwrap();
        let stage = builder.finish();

        let names = stage.outputs().names();
        for key in [
            "dev-vpc-id",
            "dev-public-subnet-ids",
            "dev-compute-subnet-ids",
            "dev-database-subnet-ids",
            "dev-compute-sg-id",
            "dev-database-sg-id",
        ] {
            assert!(names.contains(&key), "missing export {}", key);
        }

        let database = network.database.value();
        assert_eq!(
            database.subnet_ids,
            vec![Token::ImportList("dev-database-subnet-ids".to_string())]
        );
        assert_eq!(
            database.security_group.id,
            Token::Import("dev-database-sg-id".to_string())
        );
        // The ingress rule survives the move to imported ids.
        assert!(database
            .security_group
            .admits(&network.compute.value().security_group, port));
    }
}
