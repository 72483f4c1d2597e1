use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tracing::{error, info};

use vmexecd::cli::Cli;
use vmexecd::config::{ConfigOverrides, ServiceConfig};
use vmexecd::{http, logging};

fn main() -> ExitCode {
    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("failed to start tokio runtime: {err}");
            return ExitCode::FAILURE;
        }
    };
    runtime.block_on(run())
}

async fn run() -> ExitCode {
    logging::init();
    let cli = Cli::parse();

    let overrides = ConfigOverrides {
        listen_addr: cli.listen,
        firecracker_bin: cli.firecracker_bin,
        kernel_image: cli.kernel,
        rootfs_image: cli.rootfs,
        state_root: cli.state_root,
    };

    let config = match ServiceConfig::load(cli.config.as_deref(), overrides) {
        Ok(config) => config,
        Err(err) => {
            error!(%err, "failed to load configuration");
            return ExitCode::FAILURE;
        }
    };
    config.check_disk_preflight();

    let listener = match TcpListener::bind(&config.listen_addr).await {
        Ok(listener) => listener,
        Err(err) => {
            error!(%err, addr = %config.listen_addr, "failed to bind listen address");
            return ExitCode::FAILURE;
        }
    };
    info!(addr = %config.listen_addr, "vmexecd listening");

    let app = http::app(Arc::new(config));
    let result = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(%err, "server exited with error");
            ExitCode::FAILURE
        }
    }
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("received shutdown signal"),
        Err(err) => error!(%err, "failed to listen for shutdown signal"),
    }
}
