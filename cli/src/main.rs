//! chainfeed CLI — issue calls and tail streams from the terminal.
//!
//! Usage:
//! ```bash
//! # Send a JSON-RPC call over the shared connection
//! chainfeed call --url wss://api.chainfeed.io/ws --method token-price --params '[{"symbol":"ETH"}]'
//!
//! # Tail a streaming call
//! chainfeed stream --url wss://api.chainfeed.io/stream --name chain-new-txs --param chain=eth
//! ```

use std::env;
use std::process;

use anyhow::{anyhow, bail, Context};
use futures::StreamExt;
use serde_json::Value;

use chainfeed_core::config::ClientConfig;
use chainfeed_core::logging::{init_tracing, LogConfig};
use chainfeed_core::query::StreamRequest;
use chainfeed_core::transport::RpcTransport;
use chainfeed_ws::WsRpcClient;

#[tokio::main]
async fn main() {
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        print_usage();
        process::exit(1);
    }

    let level = parse_flag(&args[2..], "--log-level").unwrap_or_else(|| "warn".into());
    init_tracing(&LogConfig::default().with_level(level));

    let result = match args[1].as_str() {
        "call" => cmd_call(&args[2..]).await,
        "stream" => cmd_stream(&args[2..]).await,
        "version" | "--version" | "-V" => {
            println!("chainfeed {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        "help" | "--help" | "-h" => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {other}");
            print_usage();
            process::exit(1);
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

fn print_usage() {
    println!("chainfeed {}", env!("CARGO_PKG_VERSION"));
    println!("Call and stream blockchain data over WebSocket JSON-RPC\n");
    println!("USAGE:");
    println!("    chainfeed <COMMAND> [FLAGS]\n");
    println!("COMMANDS:");
    println!("    call       Send a JSON-RPC call and print the result");
    println!("    stream     Open a streaming call and print each item");
    println!("    version    Print version");
    println!("    help       Print this help\n");
    println!("COMMON FLAGS:");
    println!("    --config <FILE>      JSON client config");
    println!("    --log-level <LEVEL>  trace|debug|info|warn|error  [default: warn]\n");
    println!("CALL FLAGS:");
    println!("    --url <URL>          Shared connection endpoint");
    println!("    --method <NAME>      Method to call  [required]");
    println!("    --params <JSON>      JSON array of parameters  [default: []]\n");
    println!("STREAM FLAGS:");
    println!("    --url <URL>          Stream endpoint");
    println!("    --name <NAME>        Streaming call name  [required]");
    println!("    --param <K=V>        Scalar parameter (repeatable)");
    println!("    --rate-limit <N>     Custom rate limit  [default: -1]");
    println!("    --limit <N>          Stop after N items");
}

fn load_config(args: &[String]) -> anyhow::Result<ClientConfig> {
    match parse_flag(args, "--config") {
        Some(path) => {
            let text = std::fs::read_to_string(&path).with_context(|| format!("reading {path}"))?;
            Ok(ClientConfig::from_json_str(&text)?)
        }
        None => Ok(ClientConfig::default()),
    }
}

async fn cmd_call(args: &[String]) -> anyhow::Result<()> {
    let method = parse_flag(args, "--method").ok_or_else(|| anyhow!("--method is required"))?;
    let params = match parse_flag(args, "--params") {
        Some(raw) => match serde_json::from_str::<Value>(&raw).context("parsing --params")? {
            Value::Array(items) => items,
            other => vec![other],
        },
        None => vec![],
    };

    let mut config = load_config(args)?;
    if let Some(url) = parse_flag(args, "--url") {
        config = config.with_endpoint(url);
    }
    let client = WsRpcClient::new(config)?;

    let start = std::time::Instant::now();
    let result = client.request(&method, params).await?;
    let latency = start.elapsed();

    println!("{}", serde_json::to_string_pretty(&result)?);
    eprintln!("({}ms)", latency.as_millis());
    client.disconnect().await;
    Ok(())
}

async fn cmd_stream(args: &[String]) -> anyhow::Result<()> {
    let name = parse_flag(args, "--name").ok_or_else(|| anyhow!("--name is required"))?;
    let limit = match parse_flag(args, "--limit") {
        Some(raw) => Some(raw.parse::<usize>().context("parsing --limit")?),
        None => None,
    };

    let mut request = StreamRequest::new(name);
    for pair in parse_all(args, "--param") {
        let Some((key, value)) = pair.split_once('=') else {
            bail!("--param expects KEY=VALUE, got {pair:?}");
        };
        request = request.param(key, value);
    }
    if let Some(raw) = parse_flag(args, "--rate-limit") {
        request = request.with_rate_limit(raw.parse().context("parsing --rate-limit")?);
    }

    let mut config = load_config(args)?;
    if let Some(url) = parse_flag(args, "--url") {
        config = config.with_stream_endpoint(url);
    }
    let client = WsRpcClient::new(config)?;
    let mut stream = client.stream::<Value>(&request)?;
    eprintln!("Streaming {}", stream.url());

    let mut seen = 0usize;
    while let Some(item) = stream.next().await {
        println!("{}", serde_json::to_string(&item?)?);
        seen += 1;
        if limit.is_some_and(|n| seen >= n) {
            break;
        }
    }
    Ok(())
}

fn parse_flag(args: &[String], flag: &str) -> Option<String> {
    let pos = args.iter().position(|a| a == flag)?;
    args.get(pos + 1).cloned()
}

fn parse_all(args: &[String], flag: &str) -> Vec<String> {
    args.windows(2)
        .filter(|w| w[0] == flag)
        .map(|w| w[1].clone())
        .collect()
}
