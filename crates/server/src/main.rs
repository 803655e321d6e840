//! `smartapi-mcp` binary: stdio MCP transport over [`ServerCore`].
//!
//! Speaks line-delimited JSON-RPC on stdin/stdout (one message per line).
//! Logs go to stderr only; stdout carries nothing but protocol frames.

use clap::Parser;
use parking_lot::Mutex;
use serde_json::{Value, json};
use smartapi_mcp_server::config::{ApiConfig, ServerConfig};
use smartapi_mcp_server::surface::ServerCore;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt as _, AsyncWriteExt as _, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt as _, util::SubscriberInitExt as _};

const PROTOCOL_VERSION: &str = "2024-11-05";

/// Bridge registry-listed OpenAPI services into MCP tools.
#[derive(Parser, Debug)]
#[command(name = "smartapi-mcp")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "SMARTAPI_MCP_CONFIG")]
    config: Option<PathBuf>,

    /// API ids to onboard at startup, in addition to the config file's list
    #[arg(long = "api", value_name = "ID")]
    apis: Vec<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "SMARTAPI_MCP_LOG_LEVEL")]
    log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "SMARTAPI_MCP_LOG_FORMAT")]
    log_format: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    setup_tracing(&cli.log_level, cli.log_format.as_deref());

    let mut config = match &cli.config {
        Some(path) => match ServerConfig::load(path) {
            Ok(config) => config,
            Err(err) => {
                tracing::error!(error = %err, "failed to load configuration");
                return ExitCode::FAILURE;
            }
        },
        None => ServerConfig::default(),
    };
    for id in &cli.apis {
        config.apis.push(ApiConfig::for_id(id.clone()));
    }

    let core = match ServerCore::new(config) {
        Ok(core) => Arc::new(core),
        Err(err) => {
            tracing::error!(error = %err, "failed to start server core");
            return ExitCode::FAILURE;
        }
    };

    let reports = core.onboard_configured().await;
    tracing::info!(
        apis = reports.len(),
        tools = core.list_tools().len(),
        "startup onboarding complete"
    );

    if let Err(err) = run_stdio(core).await {
        tracing::error!(error = %err, "stdio transport failed");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

fn setup_tracing(level: &str, format: Option<&str>) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let registry = tracing_subscriber::registry().with(filter);

    // stdout is the protocol channel; all diagnostics go to stderr.
    match format {
        Some("json") => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init(),
        _ => registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .init(),
    }
}

/// Read JSON-RPC lines from stdin until EOF or SIGINT.
///
/// `tools/call` runs as its own task so slow upstreams never block the read
/// loop; everything else is answered inline. Responses funnel through one
/// writer task so frames never interleave.
async fn run_stdio(core: Arc<ServerCore>) -> anyhow::Result<()> {
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Value>();

    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(message) = out_rx.recv().await {
            let mut line = serde_json::to_string(&message)?;
            line.push('\n');
            stdout.write_all(line.as_bytes()).await?;
            stdout.flush().await?;
        }
        anyhow::Ok(())
    });

    let in_flight: Arc<Mutex<HashMap<String, CancellationToken>>> =
        Arc::new(Mutex::new(HashMap::new()));
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupt received; shutting down");
                break;
            }
        };
        let Some(line) = line else { break };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let Ok(msg) = serde_json::from_str::<Value>(line) else {
            tracing::warn!("dropping unparseable input line");
            continue;
        };
        handle_message(&core, &msg, &out_tx, &in_flight);
    }

    for token in in_flight.lock().values() {
        token.cancel();
    }
    drop(out_tx);
    writer.await??;
    Ok(())
}

fn handle_message(
    core: &Arc<ServerCore>,
    msg: &Value,
    out: &mpsc::UnboundedSender<Value>,
    in_flight: &Arc<Mutex<HashMap<String, CancellationToken>>>,
) {
    let Some(method) = msg.get("method").and_then(Value::as_str) else {
        return;
    };

    // Notifications carry no `id` and get no response.
    let Some(id) = msg.get("id") else {
        if method == "notifications/cancelled"
            && let Some(request_id) = msg.pointer("/params/requestId")
            && let Some(token) = in_flight.lock().remove(&request_id.to_string())
        {
            tracing::debug!(request_id = %request_id, "cancelling in-flight tool call");
            token.cancel();
        }
        return;
    };
    let id = id.clone();

    match method {
        "initialize" => {
            let _ = out.send(jsonrpc_ok(&id, &initialize_result(msg)));
        }
        "ping" => {
            let _ = out.send(jsonrpc_ok(&id, &json!({})));
        }
        "tools/list" => {
            let tools = core.list_tools();
            let result = match serde_json::to_value(&tools) {
                Ok(tools) => json!({ "tools": tools }),
                Err(err) => {
                    let _ = out.send(jsonrpc_err(
                        &id,
                        &json!({ "code": -32603, "message": err.to_string() }),
                    ));
                    return;
                }
            };
            let _ = out.send(jsonrpc_ok(&id, &result));
        }
        "tools/call" => {
            let Some(name) = msg.pointer("/params/name").and_then(Value::as_str) else {
                let _ = out.send(jsonrpc_err(
                    &id,
                    &json!({ "code": -32602, "message": "missing tool name" }),
                ));
                return;
            };
            let name = name.to_string();
            let arguments = msg
                .pointer("/params/arguments")
                .cloned()
                .unwrap_or_else(|| json!({}));

            let token = CancellationToken::new();
            in_flight.lock().insert(id.to_string(), token.clone());

            let core = Arc::clone(core);
            let out = out.clone();
            let in_flight = Arc::clone(in_flight);
            tokio::spawn(async move {
                let result = core.call_tool(&name, &arguments, &token).await;
                in_flight.lock().remove(&id.to_string());
                let response = match serde_json::to_value(&result) {
                    Ok(result) => jsonrpc_ok(&id, &result),
                    Err(err) => jsonrpc_err(
                        &id,
                        &json!({ "code": -32603, "message": err.to_string() }),
                    ),
                };
                let _ = out.send(response);
            });
        }
        _ => {
            let _ = out.send(jsonrpc_err(
                &id,
                &json!({ "code": -32601, "message": "method not found" }),
            ));
        }
    }
}

fn initialize_result(msg: &Value) -> Value {
    let protocol_version = msg
        .pointer("/params/protocolVersion")
        .and_then(Value::as_str)
        .unwrap_or(PROTOCOL_VERSION);

    json!({
        "protocolVersion": protocol_version,
        "capabilities": { "tools": {} },
        "serverInfo": {
            "name": "smartapi-mcp",
            "version": env!("CARGO_PKG_VERSION")
        }
    })
}

fn jsonrpc_ok(id: &Value, result: &Value) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "result": result })
}

fn jsonrpc_err(id: &Value, error: &Value) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "error": error })
}
