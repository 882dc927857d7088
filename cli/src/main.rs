use std::time::Duration;

use clap::{Parser, Subcommand};
use gateway::{ConnectError, ConnectionConfig, ConnectionMode, GatewayStack, RequestError, StackOptions};
use serde_json::{Value, json};
use tracing::info;

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Connect(#[from] ConnectError),
    #[error(transparent)]
    Request(#[from] RequestError),
    #[error("invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("signal handler failed: {0}")]
    Signal(#[from] std::io::Error),
}

#[derive(Parser, Debug)]
#[command(name = "gateway-cli", about = "OpenClaw gateway connection CLI")]
struct Cli {
    #[arg(long, env = "GATEWAY_URL", default_value = gateway::config::DEFAULT_GATEWAY_URL)]
    url: String,

    #[arg(long, env = "GATEWAY_TOKEN", default_value = "", hide_env_values = true)]
    token: String,

    #[arg(long, env = "GATEWAY_MODE", default_value = "local")]
    mode: String,

    /// How long to wait for the first successful connection.
    #[arg(long, default_value_t = gateway::config::DEFAULT_CONNECT_TIMEOUT_MS)]
    connect_timeout_ms: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print matching events as JSON lines until Ctrl-C.
    Watch {
        #[arg(default_value = "*")]
        pattern: String,
    },
    /// Send one request and print its payload.
    Call {
        method: String,
        #[arg(long, default_value = "{}")]
        params: String,
    },
    Health,
    Agents,
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let mode: ConnectionMode = cli.mode.parse()?;
    let config = ConnectionConfig::new(cli.url, cli.token, mode);

    let stack = GatewayStack::new(StackOptions::from_env());
    stack.connect(config)?;
    stack.wait_connected(Duration::from_millis(cli.connect_timeout_ms)).await?;

    let result = match cli.command {
        Command::Watch { pattern } => run_watch(&stack, &pattern).await,
        Command::Call { method, params } => run_call(&stack, &method, &params).await,
        Command::Health => {
            let health = stack.client().health().await?;
            print_json(&serde_json::to_value(health)?)
        }
        Command::Agents => {
            let agents = stack.client().agent_list().await?;
            print_json(&serde_json::to_value(agents)?)
        }
    };

    stack.disconnect();
    result
}

async fn run_watch(stack: &GatewayStack, pattern: &str) -> Result<(), CliError> {
    let (sub, mut events) = stack.stream(pattern);
    info!(%pattern, "watching gateway events");

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    loop {
        tokio::select! {
            result = &mut ctrl_c => {
                result?;
                break;
            }
            Some(event) = events.recv() => {
                println!("{}", json!({ "topic": event.topic, "payload": event.payload }));
            }
        }
    }

    sub.unsubscribe();
    Ok(())
}

async fn run_call(stack: &GatewayStack, method: &str, params: &str) -> Result<(), CliError> {
    let params: Value = serde_json::from_str(params)?;
    let payload = stack.send(method, params).await?;
    print_json(&payload)
}

fn print_json(value: &Value) -> Result<(), CliError> {
    let rendered = serde_json::to_string_pretty(value)?;
    println!("{rendered}");
    Ok(())
}
