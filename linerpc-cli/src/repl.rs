//! Interactive REPL.

use crate::commands::{format_response, parse_kwargs, parse_value, run_demo};
use colored::Colorize;
use linerpc_client::Client;
use linerpc_protocol::Request;
use rustyline::error::ReadlineError;
use rustyline::history::DefaultHistory;
use rustyline::{Config, Editor};
use serde_json::Map;

const HELP_TEXT: &str = r#"
Available commands:
  help                               Show this help
  call <func> [args...] [-- kwargs]  Call a function; args are JSON or bare words
  <func> [args...]                   Shorthand for call
  send <line>                        Send a raw request line
  {...}                              Lines starting with '{' are sent raw
  demo                               Run the concurrency demo

  quit, exit                         Exit the REPL

Examples:
  add 2 3
  upper "hello, world!"
  call add 1 -- {"b": 2}
"#;

pub async fn run(client: Client) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", "linerpc CLI".bold().cyan());
    println!("Server: {}", client.config().addr);

    let config = Config::builder()
        .history_ignore_space(true)
        .auto_add_history(true)
        .build();
    let mut rl: Editor<(), DefaultHistory> = Editor::with_config(config)?;

    let history_path = std::env::var("HOME")
        .map(|h| std::path::PathBuf::from(h).join(".linerpc_history"))
        .unwrap_or_else(|_| ".linerpc_history".into());
    let _ = rl.load_history(&history_path);

    println!("Type 'help' for available commands.\n");

    loop {
        let prompt = format!("{} ", "linerpc>".cyan());
        match rl.readline(&prompt) {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                match execute_repl_command(&client, line).await {
                    Ok(Some(output)) => println!("{}\n", output),
                    Ok(None) => break,
                    Err(e) => println!("{}: {}\n", "Error".red(), e),
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("^C");
                continue;
            }
            Err(ReadlineError::Eof) => {
                println!("^D");
                break;
            }
            Err(err) => {
                println!("{}: {:?}", "Error".red(), err);
                break;
            }
        }
    }

    let _ = rl.save_history(&history_path);
    Ok(())
}

async fn execute_repl_command(
    client: &Client,
    line: &str,
) -> Result<Option<String>, Box<dyn std::error::Error>> {
    if line.starts_with('{') {
        let response = client.send_raw(line).await?;
        return Ok(Some(format_response(&response)));
    }

    let (cmd, rest) = match line.split_once(char::is_whitespace) {
        Some((cmd, rest)) => (cmd, rest.trim()),
        None => (line, ""),
    };

    match cmd.to_lowercase().as_str() {
        "quit" | "exit" => Ok(None),
        "help" | "?" => Ok(Some(HELP_TEXT.to_string())),
        "demo" => Ok(Some(run_demo(client).await?)),
        "send" => {
            if rest.is_empty() {
                return Err("usage: send <line>".into());
            }
            let response = client.send_raw(rest).await?;
            Ok(Some(format_response(&response)))
        }
        "call" => {
            let (func, rest) = match rest.split_once(char::is_whitespace) {
                Some((func, rest)) => (func, rest.trim()),
                None if !rest.is_empty() => (rest, ""),
                None => return Err("usage: call <func> [args...] [-- kwargs]".into()),
            };
            call(client, func, rest).await.map(Some)
        }
        // Anything else is a function name
        _ => call(client, cmd, rest).await.map(Some),
    }
}

async fn call(
    client: &Client,
    func: &str,
    rest: &str,
) -> Result<String, Box<dyn std::error::Error>> {
    let (args, kwargs) = match rest.split_once("--") {
        Some((args, kwargs)) => (args, parse_kwargs(kwargs.trim())?),
        None => (rest, Map::new()),
    };

    let request = Request {
        func_name: func.to_string(),
        args: split_args(args).iter().map(|a| parse_value(a)).collect(),
        kwargs,
    };
    let response = client.send(&request).await?;
    Ok(format_response(&response))
}

/// Splits an argument line on whitespace, keeping double-quoted strings and
/// bracketed JSON values together.
fn split_args(line: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for c in line.chars() {
        if in_string {
            current.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }

        match c {
            '"' => {
                in_string = true;
                current.push(c);
            }
            '[' | '{' => {
                depth += 1;
                current.push(c);
            }
            ']' | '}' => {
                depth = depth.saturating_sub(1);
                current.push(c);
            }
            c if c.is_whitespace() && depth == 0 => {
                if !current.is_empty() {
                    args.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }
    if !current.is_empty() {
        args.push(current);
    }
    args
}
