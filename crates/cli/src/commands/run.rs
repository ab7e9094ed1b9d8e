//! Run command - copy input topics to an output topic exactly once
//!
//! Starts a passthrough [`BridgeWorker`] against the configured cluster and
//! runs it until Ctrl-C. The final partial batch is committed on shutdown.

use clap::Args;
use colored::Colorize;
use eos_bridge::{
    BridgeWorker, ConsumerConfig, ConsumerSession, ExactlyOnceBridge, LoggingStatusSink,
    PassthroughTransform, ProducerConfig, RdKafkaConsumer, RdKafkaProducer, TransactionTimeouts,
    TransactionalProducerSession, WorkerConfig,
};
use eos_bridge_config::BridgeSettings;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

use super::admin_gateway;
use crate::error::{CliError, CliResult};

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Topics to consume
    #[arg(long = "input", short, required = true, num_args = 1..)]
    inputs: Vec<String>,

    /// Topic receiving the copied records
    #[arg(long, short)]
    output: String,

    /// Consumer group id
    #[arg(long, short)]
    group: String,

    /// Transactional id (defaults to `<group>_<output>`)
    #[arg(long)]
    transactional_id: Option<String>,

    /// Ensure the output topic exists with at least this many partitions before starting
    #[arg(long)]
    output_partitions: Option<usize>,

    /// Topic receiving rejected inputs (overrides `worker.error_topic`)
    #[arg(long)]
    error_topic: Option<String>,
}

impl RunArgs {
    fn transactional_id(&self) -> String {
        self.transactional_id
            .clone()
            .unwrap_or_else(|| format!("{}_{}", self.group, self.output))
    }

    fn validate(&self) -> CliResult<()> {
        if self.inputs.contains(&self.output) {
            return Err(CliError::InvalidArguments(format!(
                "output topic {} is also an input",
                self.output
            )));
        }
        Ok(())
    }

    pub async fn execute(&self, settings: &BridgeSettings) -> CliResult<()> {
        self.validate()?;
        let transactional_id = self.transactional_id();

        if let Some(partitions) = self.output_partitions {
            let (gateway, config) = admin_gateway(settings)?;
            gateway
                .ensure_topic(&config.topic_spec(&self.output, partitions))
                .await?;
        }

        let consumer_config = ConsumerConfig::from_settings(settings, &self.group)?;
        let producer_config = ProducerConfig::from_settings(settings, &transactional_id)?;
        let consumer = RdKafkaConsumer::new(&consumer_config)?;
        let producer = RdKafkaProducer::new(&producer_config)?;

        let mut bridge = ExactlyOnceBridge::new(
            ConsumerSession::new(consumer, &self.group),
            TransactionalProducerSession::new(
                producer,
                &transactional_id,
                TransactionTimeouts::from(&producer_config),
            ),
            Arc::new(LoggingStatusSink),
        );

        let started = async {
            bridge.init().await?;
            bridge.consumer().subscribe(&self.inputs)
        }
        .await;
        if let Err(err) = started {
            // Stop the client event listener before reporting.
            let _ = bridge.close().await;
            return Err(err.into());
        }

        let mut worker_config = WorkerConfig::from_settings(&settings.worker);
        if let Some(error_topic) = &self.error_topic {
            worker_config.error_topic = Some(error_topic.clone());
        }
        let worker = BridgeWorker::new(bridge, PassthroughTransform::new(&self.output), worker_config);

        println!(
            "{} {} → {} as {} (Ctrl-C to stop)",
            "Running".green().bold(),
            self.inputs.join(", ").bold(),
            self.output.bold(),
            transactional_id.cyan()
        );

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut handle = tokio::spawn(worker.run(shutdown_rx));

        let joined = tokio::select! {
            joined = &mut handle => joined,
            signal = tokio::signal::ctrl_c() => {
                signal?;
                info!("Shutdown requested, committing the pending batch");
                let _ = shutdown_tx.send(true);
                handle.await
            }
        };
        let stats = joined.map_err(|e| CliError::Task(e.to_string()))??;

        println!("{}", "Stopped".bold());
        println!("  cycles committed: {}", stats.cycles_committed.to_string().green());
        println!("  cycles aborted:   {}", stats.cycles_aborted.to_string().red());
        println!("  cycles skipped:   {}", stats.cycles_skipped);
        println!("  records:          {}", stats.records_committed);

        Ok(())
    }
}
