//! Consumer group commands

use clap::Subcommand;
use colored::Colorize;
use eos_bridge_config::BridgeSettings;

use super::admin_gateway;
use crate::error::CliResult;

#[derive(Subcommand, Debug, Clone)]
pub enum GroupsCommand {
    /// Delete consumer groups and their committed offsets; missing groups are ignored
    #[command(name = "delete")]
    Delete {
        /// Group ids
        #[arg(required = true)]
        groups: Vec<String>,
    },
}

impl GroupsCommand {
    pub async fn execute(&self, settings: &BridgeSettings) -> CliResult<()> {
        let (gateway, _) = admin_gateway(settings)?;

        match self {
            GroupsCommand::Delete { groups } => {
                gateway.delete_consumer_groups(groups).await?;
                println!("{} deleted {} group(s)", "✓".green().bold(), groups.len());
            }
        }

        Ok(())
    }
}
