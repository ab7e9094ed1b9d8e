//! Configuration commands

use clap::Subcommand;
use eos_bridge_config::BridgeSettings;

use crate::error::CliResult;

const REDACTED: &str = "********";

#[derive(Subcommand, Debug, Clone)]
pub enum ConfigCommand {
    /// Print the effective settings after file and environment overrides
    #[command(name = "show")]
    Show {
        /// Print secrets instead of masking them
        #[arg(long)]
        reveal_secrets: bool,
    },
}

impl ConfigCommand {
    pub async fn execute(&self, settings: &BridgeSettings) -> CliResult<()> {
        match self {
            ConfigCommand::Show { reveal_secrets } => {
                let mut shown = settings.clone();
                if !reveal_secrets {
                    redact(&mut shown);
                }
                println!("{}", serde_json::to_string_pretty(&shown)?);
            }
        }
        Ok(())
    }
}

fn redact(settings: &mut BridgeSettings) {
    if settings.kafka.security.password.is_some() {
        settings.kafka.security.password = Some(REDACTED.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redact_masks_password_only() {
        let mut settings = BridgeSettings::default();
        settings.kafka.security.username = Some("svc".to_string());
        settings.kafka.security.password = Some("hunter2".to_string());

        redact(&mut settings);

        assert_eq!(settings.kafka.security.username.as_deref(), Some("svc"));
        assert_eq!(settings.kafka.security.password.as_deref(), Some(REDACTED));
    }

    #[test]
    fn test_redact_leaves_missing_password() {
        let mut settings = BridgeSettings::default();
        redact(&mut settings);
        assert!(settings.kafka.security.password.is_none());
    }
}
