use std::io::{self, BufRead, Write};

use anyhow::{Context, Result};
use clap::Parser;
use mtls_echo_client::TlsClient;
use mtls_echo_common::{logging, ClientSettings, EndpointIdentity};
use tracing::error;

#[derive(Parser)]
#[command(name = "mtls-echo-client")]
#[command(about = "Send text to an mTLS echo server")]
struct Args {
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Server host (overrides HOST)
    #[arg(long)]
    host: Option<String>,

    /// Server port (overrides SCKT_PORT)
    #[arg(short, long)]
    port: Option<u16>,

    /// Message to send once; starts an interactive session when omitted
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    message: Vec<String>,
}

impl Args {
    fn settings(&self) -> Result<ClientSettings> {
        let mut settings = ClientSettings::from_env().context("Invalid client settings")?;
        if let Some(host) = &self.host {
            settings = settings.with_host(host.as_str());
        }
        if let Some(port) = self.port {
            settings = settings.with_port(port);
        }
        Ok(settings)
    }

    /// Words of the one-shot message joined by single spaces
    fn one_shot_message(&self) -> Option<String> {
        (!self.message.is_empty()).then(|| self.message.join(" "))
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    logging::init("client", &args.log_level);

    let mut client = TlsClient::new(args.settings()?, &EndpointIdentity::client())
        .context("Failed to create client")?;

    let Some(message) = args.one_shot_message() else {
        return interactive_session(&mut client);
    };

    if client.connect() {
        if let Some(response) = client.send(&message) {
            println!("Server response: {response}");
        }
        client.close();
    }
    Ok(())
}

fn interactive_session(client: &mut TlsClient) -> Result<()> {
    if !client.connect() {
        return Ok(());
    }

    // The prompt blocks in read_line, so Ctrl-C ends the process from the
    // handler; the OS tears the socket down.
    ctrlc::set_handler(|| {
        println!("\nInterrupted by user");
        std::process::exit(130);
    })
    .context("Failed to install Ctrl-C handler")?;

    println!("Connected to server. Type 'exit' to quit or DESCONEXION.");
    let stdin = io::stdin();
    let mut line = String::new();
    loop {
        print!("> ");
        if let Err(e) = io::stdout().flush() {
            error!("Error: {}", e);
            break;
        }

        line.clear();
        match stdin.lock().read_line(&mut line) {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                error!("Error: {}", e);
                break;
            }
        }

        let message = line.trim_end_matches(['\r', '\n']);
        if is_exit_command(message) {
            break;
        }
        if let Some(response) = client.send(message) {
            println!("Server response: {response}");
        }
    }

    client.close();
    Ok(())
}

fn is_exit_command(message: &str) -> bool {
    message.eq_ignore_ascii_case("exit") || message.eq_ignore_ascii_case("desconexion")
}
