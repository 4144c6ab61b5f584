//! Test client for the simulator telemetry protocol.
//!
//! # Usage
//!
//! ```bash
//! # One-shot read of the exterior subtree
//! test_client --host 192.168.31.107 get-value /root/thisVehicle/exterior
//!
//! # Poll speed and rpm every 200ms, giving up after 500ms of silence
//! test_client --host 192.168.31.107 subscribe
//!
//! # Custom paths and fields, JSON output
//! test_client subscribe -p /root/thisVehicle/exterior/lights/Properties/headlights \
//!     -f headlights --interval 1000 --read-wait 1500 --format json
//! ```

use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use simtel_client::{
    ClientConfig, Framing, Subscription, TelemetryClient, TelemetryError, Timeouts, Update,
    DEFAULT_PORT, RPM_PATH, SPEED_PATH,
};

/// Test client for a driving simulator's TCP/XML telemetry interface.
#[derive(Parser)]
#[command(name = "test_client")]
#[command(version)]
struct Cli {
    /// Simulator host
    #[arg(long, default_value = "127.0.0.1", env = "SIMTEL_HOST")]
    host: String,

    /// Simulator port
    #[arg(long, default_value_t = DEFAULT_PORT, env = "SIMTEL_PORT")]
    port: u16,

    /// Output format: text or json
    #[arg(long, default_value = "text")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Request the value(s) under a path once and print the response
    GetValue {
        /// Data tree path
        path: String,
        /// Connect timeout in milliseconds
        #[arg(long, default_value = "3000")]
        connect_timeout: u64,
        /// Write timeout in milliseconds
        #[arg(long, default_value = "1000")]
        write_timeout: u64,
        /// Read timeout in milliseconds
        #[arg(long, default_value = "3000")]
        read_timeout: u64,
    },

    /// Subscribe to paths and print each pushed update
    Subscribe {
        /// Data tree paths (defaults to rpm and speed)
        #[arg(short, long = "path")]
        paths: Vec<String>,
        /// Tags printed from each update (defaults to speed and actualRpm)
        #[arg(short, long = "field")]
        fields: Vec<String>,
        /// Push interval requested from the simulator, in milliseconds
        #[arg(short, long, default_value = "200")]
        interval: u64,
        /// Max wait for each update in milliseconds
        #[arg(short, long, default_value = "500")]
        read_wait: u64,
        /// Connect timeout in milliseconds
        #[arg(long, default_value = "2000")]
        connect_timeout: u64,
        /// Write timeout in milliseconds
        #[arg(long, default_value = "2000")]
        write_timeout: u64,
        /// Split coalesced reads on </Message> instead of one document per read
        #[arg(long)]
        split_messages: bool,
        /// Only print updates whose values changed
        #[arg(long)]
        changes_only: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = ClientConfig::new(cli.host.clone(), cli.port);

    let result = match cli.command {
        Command::GetValue {
            path,
            connect_timeout,
            write_timeout,
            read_timeout,
        } => {
            let timeouts = Timeouts {
                connect: Duration::from_millis(connect_timeout),
                write: Duration::from_millis(write_timeout),
                read: Duration::from_millis(read_timeout),
            };
            get_value(config.with_timeouts(timeouts), &path, cli.format).await
        }
        Command::Subscribe {
            paths,
            fields,
            interval,
            read_wait,
            connect_timeout,
            write_timeout,
            split_messages,
            changes_only,
        } => {
            let paths = if paths.is_empty() {
                vec![RPM_PATH.to_string(), SPEED_PATH.to_string()]
            } else {
                paths
            };
            let mut subscription = Subscription::new(paths, interval)
                .with_timeouts(Timeouts {
                    connect: Duration::from_millis(connect_timeout),
                    write: Duration::from_millis(write_timeout),
                    read: Duration::from_millis(read_wait),
                })
                .suppress_duplicates(changes_only);
            if !fields.is_empty() {
                subscription = subscription.with_report_fields(fields);
            }
            if split_messages {
                subscription = subscription.with_framing(Framing::MessageBoundary);
            }
            subscribe(config, subscription, cli.format).await
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            if let Some(op) = e.timed_out() {
                eprintln!("The {} budget ran out; see --help for the timeout options.", op);
            }
            ExitCode::FAILURE
        }
    }
}

async fn get_value(
    config: ClientConfig,
    path: &str,
    format: OutputFormat,
) -> Result<(), TelemetryError> {
    let client = TelemetryClient::new(config);
    let response = client.get_value(path).await?;

    match format {
        OutputFormat::Text => {
            println!("events: {}", response.event_names().join(", "));
            // The last path segment usually names the subtree that was returned.
            if let Some(tag) = path.rsplit('/').find(|s| !s.is_empty()) {
                match response.field(tag) {
                    Some(text) => println!("{}: {}", tag, text),
                    None => println!("{}: not found", tag),
                }
            }
        }
        OutputFormat::Json => {
            let names = response.event_names();
            println!("{}", serde_json::json!({ "path": path, "events": names }));
        }
    }
    Ok(())
}

async fn subscribe(
    config: ClientConfig,
    subscription: Subscription,
    format: OutputFormat,
) -> Result<(), TelemetryError> {
    let poller = TelemetryClient::new(config).poller(subscription);

    let stop = poller.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupted, closing connection");
            stop.cancel();
        }
    });

    let handle = poller.spawn(move |update| match update {
        Update::Sample(sample) => match format {
            OutputFormat::Text => println!("{}", sample),
            OutputFormat::Json => match serde_json::to_string(&sample) {
                Ok(line) => println!("{}", line),
                Err(e) => tracing::warn!("failed to encode sample: {}", e),
            },
        },
        Update::Malformed { error } => tracing::warn!("malformed update: {}", error),
    });

    let summary = handle.join().await?;
    if format == OutputFormat::Json {
        if let Ok(line) = serde_json::to_string(&summary) {
            println!("{}", line);
        }
    }
    tracing::info!(
        samples = summary.samples,
        malformed = summary.malformed,
        reason = ?summary.reason,
        "polling stopped"
    );
    Ok(())
}
