//! CLI command implementations

pub mod config;
pub mod groups;
pub mod run;
pub mod topics;

pub use config::ConfigCommand;
pub use groups::GroupsCommand;
pub use run::RunArgs;
pub use topics::TopicsCommand;

use eos_bridge::{AdminConfig, AdminGateway, RdKafkaAdmin};
use eos_bridge_config::BridgeSettings;

use crate::error::CliResult;

/// Admin gateway for the configured cluster.
fn admin_gateway(settings: &BridgeSettings) -> CliResult<(AdminGateway<RdKafkaAdmin>, AdminConfig)> {
    let config = AdminConfig::from_settings(settings)?;
    let backend = RdKafkaAdmin::new(config.clone())?;
    Ok((AdminGateway::new(backend), config))
}
