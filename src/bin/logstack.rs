//! logstack: command-line front end
//!
//! Runs one operation against the configured store and prints the result
//! as JSON. Event payloads are printed as JSON strings.
//!
//! ## Configuration
//! - `config.yaml` in the working directory, or `--config <path>`
//! - LOGSTACK_CONFIG: path to a YAML config file
//! - LOGSTACK__STORAGE__TYPE etc.: per-key overrides
//! - LOGSTACK_LOG: tracing filter (default: info), written to stderr

use std::collections::BTreeSet;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use serde_json::Value;
use tracing::error;

use logstack::config::Config;
use logstack::utils::bootstrap::init_tracing;
use logstack::{
    AppendRequest, LogListRequest, LogService, LogStackError, LogStreamRequest, StreamRequest,
};

#[derive(Parser)]
#[command(name = "logstack", about = "Append-only multi-log event store", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// YAML config file
    #[arg(long, global = true)]
    config: Option<String>,
}

#[derive(Subcommand)]
enum Command {
    /// Append an event to a log
    Append(AppendArgs),
    /// List known logs
    Logs(PageArgs),
    /// Read the events of one stream
    Stream(StreamArgs),
    /// Read every event of a log
    Log(LogArgs),
}

#[derive(Args)]
struct AppendArgs {
    log: String,
    #[arg(value_name = "TYPE")]
    event_type: String,
    /// JSON object or array
    payload: Option<String>,
    /// Stream id; generated when omitted
    #[arg(long)]
    id: Option<String>,
}

#[derive(Args)]
struct PageArgs {
    #[arg(long)]
    limit: Option<usize>,
    #[arg(long)]
    cursor: Option<String>,
    /// Comma separated fields to return
    #[arg(long, value_delimiter = ',')]
    fields: Option<Vec<String>>,
}

#[derive(Args)]
struct StreamArgs {
    log: String,
    id: String,
    #[arg(long)]
    reverse: bool,
    #[command(flatten)]
    page: PageArgs,
}

#[derive(Args)]
struct LogArgs {
    log: String,
    #[arg(long)]
    reverse: bool,
    #[command(flatten)]
    page: PageArgs,
}

impl PageArgs {
    fn selection(&self) -> Option<BTreeSet<String>> {
        self.fields
            .as_ref()
            .map(|fields| fields.iter().cloned().collect())
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    let config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Failed to load configuration");
            return ExitCode::FAILURE;
        }
    };

    let service = match LogService::from_config(&config).await {
        Ok(service) => service,
        Err(e) => {
            error!(error = %e, "Failed to initialize storage");
            return ExitCode::FAILURE;
        }
    };

    match execute(&service, cli.command).await {
        Ok(output) => {
            println!("{output}");
            ExitCode::SUCCESS
        }
        Err(envelope) => {
            println!("{envelope}");
            ExitCode::FAILURE
        }
    }
}

/// Run one command and render its output, or the error envelope on failure.
async fn execute(service: &LogService, command: Command) -> Result<String, String> {
    run(service, command)
        .await
        .map_err(|e| render(&e.to_envelope()))
}

async fn run(service: &LogService, command: Command) -> Result<String, LogStackError> {
    match command {
        Command::Append(args) => {
            let payload = args
                .payload
                .as_deref()
                .map(serde_json::from_str::<Value>)
                .transpose()
                .map_err(|e| LogStackError::validation(format!("payload is not JSON: {e}")))?;

            let id = service
                .append(AppendRequest {
                    log: args.log,
                    event_type: args.event_type,
                    id: args.id,
                    payload,
                })
                .await?;
            Ok(render(&serde_json::json!({ "id": id })))
        }
        Command::Logs(page) => {
            let result = service
                .log_list(LogListRequest {
                    limit: page.limit,
                    cursor: page.cursor.clone(),
                    selection: page.selection(),
                })
                .await?;
            Ok(render(&result))
        }
        Command::Stream(args) => {
            let result = service
                .stream_by_id(StreamRequest {
                    selection: args.page.selection(),
                    log: args.log,
                    id: args.id,
                    reverse: args.reverse,
                    limit: args.page.limit,
                    cursor: args.page.cursor,
                })
                .await?;
            Ok(render_events(&result))
        }
        Command::Log(args) => {
            let result = service
                .log_stream(LogStreamRequest {
                    selection: args.page.selection(),
                    log: args.log,
                    reverse: args.reverse,
                    limit: args.page.limit,
                    cursor: args.page.cursor,
                })
                .await?;
            Ok(render_events(&result))
        }
    }
}

fn render(value: &impl Serialize) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|e| format!("{{\"error\": \"{e}\"}}"))
}

/// Render an event page with each payload as a JSON string.
fn render_events(page: &impl Serialize) -> String {
    let mut value = serde_json::to_value(page).unwrap_or(Value::Null);
    if let Some(Value::Array(streams)) = value.get_mut("streams") {
        for event in streams {
            if let Some(payload) = event.get_mut("payload") {
                *payload = Value::String(payload.to_string());
            }
        }
    }
    render(&value)
}
