use std::thread;

use anyhow::{Context, Result};
use clap::Parser;
use mtls_echo_common::{logging, EndpointIdentity, ServerSettings};
use mtls_echo_server::TlsServer;
use tracing::info;

#[derive(Parser)]
#[command(name = "mtls-echo-server")]
#[command(about = "Echo server with mutual TLS authentication")]
struct Args {
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Address to bind (overrides HOST)
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on (overrides SCKT_PORT)
    #[arg(short, long)]
    port: Option<u16>,
}

impl Args {
    fn settings(&self) -> Result<ServerSettings> {
        let mut settings = ServerSettings::from_env().context("Invalid server settings")?;
        if let Some(host) = &self.host {
            settings = settings.with_host(host.as_str());
        }
        if let Some(port) = self.port {
            settings = settings.with_port(port);
        }
        Ok(settings)
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    logging::init("server", &args.log_level);
    info!("Starting mTLS echo server...");

    let settings = args.settings()?;
    let server = TlsServer::new(settings, &EndpointIdentity::server())
        .context("Failed to create server")?;

    // Ctrl-C only wakes the watcher; stopping happens on a normal thread.
    let (interrupt_tx, interrupt_rx) = crossbeam_channel::bounded::<()>(1);
    ctrlc::set_handler(move || {
        let _ = interrupt_tx.try_send(());
    })
    .context("Failed to install Ctrl-C handler")?;

    let stopper = server.clone();
    thread::Builder::new()
        .name("shutdown-watcher".into())
        .spawn(move || {
            if interrupt_rx.recv().is_ok() {
                info!("Server shutting down...");
                stopper.stop();
            }
        })
        .context("Failed to spawn shutdown watcher")?;

    server.start().context("Server error")?;
    info!("Server stopped");
    Ok(())
}
