//! imgr-controller - keeps instance manager daemons running on this node

use clap::Parser;
use kube::{Client, CustomResourceExt};

use imgr_common::crd::{EngineImage, InstanceManager};
use imgr_common::telemetry::{init_telemetry, TelemetryConfig};
use imgr_controller::config::ControllerArgs;
use imgr_controller::{runner, ControllerConfig};

/// Instance manager controller
#[derive(Parser, Debug)]
#[command(name = "imgr-controller", version, about, long_about = None)]
struct Cli {
    /// Print CRD manifests and exit
    #[arg(long)]
    crd: bool,

    #[command(flatten)]
    controller: ControllerArgs,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    if cli.crd {
        return print_crds();
    }

    let provider = init_telemetry(TelemetryConfig {
        otlp_endpoint: cli.controller.otlp_endpoint.clone(),
        ..Default::default()
    })?;

    let config = ControllerConfig::try_from(&cli.controller)?;
    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;

    let result = runner::run(client, config).await;

    if let Some(provider) = provider {
        if let Err(e) = provider.shutdown() {
            eprintln!("Failed to flush traces: {e}");
        }
    }
    result.map_err(Into::into)
}

fn print_crds() -> anyhow::Result<()> {
    for crd in [InstanceManager::crd(), EngineImage::crd()] {
        let yaml = serde_yaml::to_string(&crd)
            .map_err(|e| anyhow::anyhow!("Failed to serialize CRD: {}", e))?;
        println!("---\n{yaml}");
    }
    Ok(())
}
