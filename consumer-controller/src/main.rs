// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use anyhow::anyhow;
use clap::*;
use consumer_controller_config::Config;
use evm_consumer_controller::config::EvmConsumerConfig;
use evm_consumer_controller::metrics::ControllerMetrics;
use evm_consumer_controller::rpc::ChainSession;
use evm_consumer_controller::types::SignerId;
use evm_consumer_controller::{ConsumerController, EvmConsumerController};
use prometheus::Registry;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[clap(rename_all = "kebab-case")]
#[clap(name = env!("CARGO_BIN_NAME"))]
struct Args {
    #[clap(long = "config-path", global = true)]
    config_path: Option<PathBuf>,
    #[clap(subcommand)]
    command: ControllerCommand,
}

#[derive(Subcommand, Debug, PartialEq)]
#[clap(rename_all = "kebab-case")]
enum ControllerCommand {
    /// Block at the latest L2 height committed to L1
    #[clap(name = "latest-finalized-block")]
    LatestFinalizedBlock,
    #[clap(name = "block")]
    Block {
        #[clap(long)]
        height: u64,
    },
    /// Up to `limit` blocks in [start, end)
    #[clap(name = "blocks")]
    Blocks {
        #[clap(long)]
        start: u64,
        #[clap(long)]
        end: u64,
        #[clap(long, default_value = "100")]
        limit: u64,
        /// Walk down from end - 1 instead of up from start
        #[clap(long, default_value = "false")]
        descending: bool,
    },
    #[clap(name = "is-finalized")]
    IsFinalized {
        #[clap(long)]
        height: u64,
    },
    #[clap(name = "voting-power")]
    VotingPower {
        /// Hex encoded public key of the finality provider
        #[clap(long)]
        signer: SignerId,
        #[clap(long)]
        height: u64,
    },
    #[clap(name = "activated-height")]
    ActivatedHeight {
        #[clap(long)]
        signer: SignerId,
    },
    #[clap(name = "latest-block-height")]
    LatestBlockHeight,
    /// Print a default config, or write it to `path`
    #[clap(name = "config-template")]
    ConfigTemplate {
        #[clap(long)]
        path: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Init logging, stdout is reserved for command output
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
    let args = Args::parse();

    if let ControllerCommand::ConfigTemplate { path } = &args.command {
        let config = EvmConsumerConfig::default();
        match path {
            Some(path) => write_config_template(config, path)?,
            None => println!("{}", serde_json::to_string_pretty(&config)?),
        }
        return Ok(());
    }

    let config_path = args
        .config_path
        .ok_or_else(|| anyhow!("--config-path is required"))?;
    let config = EvmConsumerConfig::load(&config_path)?;
    let registry = Registry::new();
    let metrics = Arc::new(ControllerMetrics::new(&registry));
    let controller = EvmConsumerController::new(&config, metrics).await?;

    let result = run_command(&controller, args.command).await;
    controller.close().await?;
    println!("{}", serde_json::to_string_pretty(&result?)?);
    Ok(())
}

fn write_config_template(config: EvmConsumerConfig, path: &Path) -> anyhow::Result<()> {
    let persisted = config.persisted(path);
    persisted.save()?;
    tracing::info!("Config template written to {}", persisted.path().display());
    Ok(())
}

async fn run_command<S: ChainSession>(
    controller: &EvmConsumerController<S>,
    command: ControllerCommand,
) -> anyhow::Result<Value> {
    let output = match command {
        ControllerCommand::LatestFinalizedBlock => {
            json!(controller.query_latest_finalized_block().await?)
        }
        ControllerCommand::Block { height } => json!(controller.query_block(height).await?),
        ControllerCommand::Blocks {
            start,
            end,
            limit,
            descending,
        } => {
            let blocks = if descending {
                controller
                    .blocks()
                    .get_blocks_descending(start, end, limit)
                    .await?
            } else {
                controller.query_blocks(start, end, limit).await?
            };
            json!(blocks)
        }
        ControllerCommand::IsFinalized { height } => json!({
            "height": height,
            "finalized": controller.query_is_block_finalized(height).await?,
        }),
        ControllerCommand::VotingPower { signer, height } => {
            let record = controller.voting_power_record(&signer, height).await?;
            json!({
                "signer": record.signer_id.to_string(),
                "height": height,
                "power": record.power,
                "l1_block": record.at_l1_block.to_string(),
            })
        }
        ControllerCommand::ActivatedHeight { signer } => json!({
            "signer": signer.to_string(),
            "activated_height": controller.query_activated_height(&signer).await?,
        }),
        ControllerCommand::LatestBlockHeight => {
            json!({ "height": controller.query_latest_block_height().await? })
        }
        ControllerCommand::ConfigTemplate { .. } => {
            return Err(anyhow!("config-template does not query the chain"))
        }
    };
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        let args = Args::try_parse_from([
            "evm-consumer-controller",
            "--config-path",
            "controller.yaml",
            "blocks",
            "--start",
            "10",
            "--end",
            "20",
        ])
        .unwrap();
        assert_eq!(args.config_path, Some(PathBuf::from("controller.yaml")));
        assert_eq!(
            args.command,
            ControllerCommand::Blocks {
                start: 10,
                end: 20,
                limit: 100,
                descending: false
            }
        );

        let signer = format!("0x02{}", "ab".repeat(32));
        let args = Args::try_parse_from([
            "evm-consumer-controller",
            "activated-height",
            "--signer",
            &signer,
            "--config-path",
            "c.json",
        ])
        .unwrap();
        assert_eq!(
            args.command,
            ControllerCommand::ActivatedHeight {
                signer: signer.parse().unwrap()
            }
        );

        assert!(Args::try_parse_from([
            "evm-consumer-controller",
            "voting-power",
            "--signer",
            "0x1234",
            "--height",
            "1"
        ])
        .is_err());
    }

    #[test]
    fn test_config_template_written_in_file_format() {
        let dir = tempfile::tempdir().unwrap();

        let yaml_path = dir.path().join("controller.yaml");
        write_config_template(EvmConsumerConfig::default(), &yaml_path).unwrap();
        let content = std::fs::read_to_string(&yaml_path).unwrap();
        assert!(content.contains("rpc-l1-address: http://127.0.0.1:8545"));
        assert!(content.contains("max-concurrent-batches: 4"));

        let json_path = dir.path().join("controller.json");
        write_config_template(EvmConsumerConfig::default(), &json_path).unwrap();
        let loaded = EvmConsumerConfig::load(&json_path).unwrap();
        assert_eq!(loaded.log_query_range, 10_000);
        assert_eq!(loaded.topology, EvmConsumerConfig::default().topology);
    }
}
