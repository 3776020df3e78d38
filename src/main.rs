//! # riff System Controller
//!
//! Runs the riff controllers against the current cluster.
//!
//! ## Usage
//!
//! ```text
//! riff-system-controller                                # every controller
//! riff-system-controller --controllers function,container
//! riff-system-controller --metrics-port 9090
//! ```
//!
//! Other settings come from the environment; see `config::ControllerConfig`.

use anyhow::Result;
use clap::Parser;
use riff_system_controller::config::{ControllerConfig, ServerConfig};
use riff_system_controller::runtime::initialization::{init_tracing, initialize};
use riff_system_controller::runtime::watch_loop::run_watch_loop;
use riff_system_controller::runtime::ControllerKind;
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "riff-system-controller", version, about = "riff Kubernetes controllers")]
struct Cli {
    /// Controllers to run, all when omitted
    #[arg(long, value_enum, value_delimiter = ',', env = "CONTROLLERS")]
    controllers: Vec<ControllerKind>,

    /// Port for /metrics, /healthz and /readyz
    #[arg(long, env = "METRICS_PORT")]
    metrics_port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let controller_config = ControllerConfig::from_env();
    let mut server_config = ServerConfig::from_env();
    if let Some(port) = cli.metrics_port {
        server_config.metrics_port = port;
    }

    init_tracing(controller_config.json_logs());

    let mut kinds = if cli.controllers.is_empty() {
        ControllerKind::ALL.to_vec()
    } else {
        cli.controllers
    };
    kinds.sort();
    kinds.dedup();

    let init = initialize(controller_config, server_config).await?;
    run_watch_loop(
        init.client,
        init.reconcile,
        init.controller_config,
        init.server_state,
        &kinds,
    )
    .await?;

    info!("riff system controller exited");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_controller_subset() {
        let cli = Cli::try_parse_from([
            "riff-system-controller",
            "--controllers",
            "processor,cluster-builder",
            "--metrics-port",
            "9090",
        ])
        .unwrap();
        assert_eq!(
            cli.controllers,
            vec![ControllerKind::Processor, ControllerKind::ClusterBuilder]
        );
        assert_eq!(cli.metrics_port, Some(9090));
    }

    #[test]
    fn test_rejects_unknown_controller() {
        assert!(Cli::try_parse_from(["riff-system-controller", "--controllers", "broker"]).is_err());
    }
}
