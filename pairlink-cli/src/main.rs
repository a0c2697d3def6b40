/*!
 * pairlink
 * Asks the daemon to pair with or connect to a Bluetooth device
 */

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::process::ExitCode;

mod client;

use client::PairlinkClient;
use pairlink_daemon::{MethodCall, Response};

#[derive(Parser)]
#[command(name = "pairlink")]
#[command(about = "Pair or connect a Bluetooth device through pairlinkd")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Daemon socket path
    #[arg(short, long, default_value = "/run/pairlink/pairlink.sock")]
    socket: String,

    /// Method channel to address
    #[arg(long)]
    channel: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Pair with (or connect to) the device at ADDRESS
    Pair {
        /// MAC address or peripheral UUID, depending on the daemon's backend
        address: String,
    },
    /// Send an arbitrary method call
    Call {
        method: String,

        /// Arguments as a JSON object
        #[arg(long, default_value = "{}")]
        arguments: String,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let client = PairlinkClient::new(cli.socket);

    let mut call = match cli.command {
        Commands::Pair { address } => MethodCall::pair_device(&address),
        Commands::Call { method, arguments } => MethodCall {
            id: None,
            channel: None,
            method,
            arguments: serde_json::from_str(&arguments).context("--arguments is not valid JSON")?,
        },
    };
    call.channel = cli.channel;

    let response = client.send_request(&call).await?;
    Ok(report(&response))
}

fn report(response: &Response) -> ExitCode {
    match response {
        Response::Success { result, .. } => {
            println!("ok: {}", result);
            ExitCode::SUCCESS
        }
        Response::Error {
            code,
            message,
            details,
            ..
        } => {
            match details {
                Some(details) => eprintln!("{}: {} ({})", code, message, details),
                None => eprintln!("{}: {}", code, message),
            }
            ExitCode::FAILURE
        }
        Response::NotImplemented { method, .. } => {
            eprintln!("not implemented: {}", method);
            ExitCode::from(2)
        }
        Response::Malformed { message } => {
            eprintln!("daemon rejected the request: {}", message);
            ExitCode::from(2)
        }
    }
}
