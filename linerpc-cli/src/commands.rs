//! Command execution.

use crate::Commands;
use colored::Colorize;
use linerpc_client::{Client, ClientError};
use linerpc_protocol::{Request, Response};
use serde_json::{json, Map, Value};
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// Executes a command and returns the formatted output.
pub async fn execute(client: &Client, cmd: Commands) -> Result<String, Box<dyn std::error::Error>> {
    match cmd {
        Commands::Repl => Err("the REPL cannot run as a one-shot command".into()),

        Commands::Call { func, args, kwargs } => {
            let request = Request {
                func_name: func,
                args: args.iter().map(|a| parse_value(a)).collect(),
                kwargs: match kwargs {
                    Some(ref raw) => parse_kwargs(raw)?,
                    None => Map::new(),
                },
            };
            let response = client.send(&request).await?;
            Ok(format_response(&response))
        }

        Commands::Send { line } => {
            let response = client.send_raw(&line).await?;
            Ok(format_response(&response))
        }

        Commands::Echo { message } => {
            let echoed = echo(client.config().addr, &message).await?;
            Ok(format!("{} {:?}", "Echoed:".green(), echoed))
        }

        Commands::Demo => run_demo(client).await,
    }
}

/// Parses a command-line argument as JSON, falling back to a plain string.
///
/// `5` is a number, `"5"` and `five` are strings.
pub fn parse_value(arg: &str) -> Value {
    serde_json::from_str(arg).unwrap_or_else(|_| Value::String(arg.to_string()))
}

/// Parses keyword arguments given as a JSON object or `@file.json`.
pub fn parse_kwargs(arg: &str) -> Result<Map<String, Value>, Box<dyn std::error::Error>> {
    let value: Value = if let Some(path) = arg.strip_prefix('@') {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content)?
    } else {
        serde_json::from_str(arg)?
    };
    match value {
        Value::Object(map) => Ok(map),
        _ => Err("keyword arguments must be a JSON object".into()),
    }
}

/// Formats a response for display.
pub fn format_response(response: &Response) -> String {
    match response {
        Response::Result(value) => format_json(value),
        Response::Error(message) => format!("{}: {}", "Remote error".red(), message),
    }
}

/// Formats JSON for display.
pub fn format_json(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

/// Talks to a server in echo mode: sends `message` and reads until close.
async fn echo(addr: SocketAddr, message: &str) -> Result<String, Box<dyn std::error::Error>> {
    let mut stream = TcpStream::connect(addr).await?;
    stream.write_all(message.as_bytes()).await?;
    let mut echoed = Vec::new();
    stream.read_to_end(&mut echoed).await?;
    Ok(String::from_utf8_lossy(&echoed).into_owned())
}

/// One demo call, timed.
async fn timed_call(
    client: &Client,
    func: &str,
    args: Vec<Value>,
) -> Result<(Value, Duration), ClientError> {
    let start = Instant::now();
    let value = client.call(func, args, Map::new()).await?;
    Ok((value, start.elapsed()))
}

fn report(label: &str, value: &Value, elapsed: Duration) {
    println!(
        "{:<28} {} {:>8.2?}",
        label.cyan(),
        value.to_string().green(),
        elapsed
    );
}

/// Runs the scripted scenario showing blocking calls overlap instead of
/// queueing. Three concurrent `sleep(5)` calls should take about five
/// seconds in total, not fifteen.
pub async fn run_demo(client: &Client) -> Result<String, Box<dyn std::error::Error>> {
    let total = Instant::now();

    let (value, elapsed) = timed_call(client, "sleep", vec![json!(5)]).await?;
    report("sleep(5)", &value, elapsed);

    let start = Instant::now();
    let (a, b, c) = tokio::join!(
        client.call("sleep", vec![json!(5)], Map::new()),
        client.call("sleep", vec![json!(5)], Map::new()),
        client.call("sleep", vec![json!(5)], Map::new()),
    );
    a?;
    b?;
    let value = c?;
    report("3 x sleep(5), concurrent", &value, start.elapsed());

    let (value, elapsed) = timed_call(client, "sleep", vec![json!(2)]).await?;
    report("sleep(2)", &value, elapsed);

    let (value, elapsed) = timed_call(client, "add", vec![json!(2), json!(3)]).await?;
    report("add(2, 3)", &value, elapsed);

    let (value, elapsed) = timed_call(client, "upper", vec![json!("hello, world!")]).await?;
    report("upper(\"hello, world!\")", &value, elapsed);

    Ok(format!(
        "{} in {:.2?}",
        "Demo finished".bold(),
        total.elapsed()
    ))
}
