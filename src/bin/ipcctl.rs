//! # ipcctl
//!
//! Command-line access to channels on a running broker.
//!
//! ```bash
//! ipcctl <command> <channel> [args...]
//! ```
//!
//! | Command | Example | Description |
//! |---------|---------|-------------|
//! | call | `ipcctl call ipc:ping test` | Send a request and print the result |
//! | send | `ipcctl send ipc:onSomething '"hi"'` | Fire a one-way message |
//! | listen | `ipcctl listen ipc:onSomething` | Print every message on the channel |
//!
//! Each argument is parsed as JSON; anything that is not valid JSON is sent
//! as a plain string, so `42` is a number, `'{"a":1}'` an object and `hello`
//! a string.
//!
//! The broker is located through `BROKER_ADDR` / `BROKER_SOCKET`, and
//! `IPC_CALL_TIMEOUT_MS` bounds how long `call` waits.
//!
//! ## Example Output
//! ```text
//! Result:
//! Map:
//!    status : : "ok"
//!    uptime : : 12345
//! ```

use std::sync::Arc;

use ipc_proxy::{
    Args, Emit, IpcError, Listen, ProxyConfig, RemoteMethod, SocketTransport, logger,
    transport::listener,
};
use serde_json::{Value, json};

const APP_NAME: &str = "ipcctl";
const APP_VERSION: &str = env!("CARGO_PKG_VERSION");
const USAGE: &str = "Usage: ipcctl <call|send|listen> <channel> [args...]";

fn print_value(value: &Value, indent: usize, key_opt: Option<&str>) {
    let padding = " ".repeat(indent);
    let label = key_opt.map(|key| format!("{key} : : ")).unwrap_or_default();

    match value {
        Value::Null => println!("{padding}{label}Null"),
        Value::Bool(b) => println!("{padding}{label}{b}"),
        Value::Number(n) => println!("{padding}{label}{n}"),
        Value::String(s) => println!("{padding}{label}\"{s}\""),
        Value::Array(arr) => {
            println!("{padding}{label}List:");
            for (i, v) in arr.iter().enumerate() {
                print_value(v, indent + 3, Some(&i.to_string()));
            }
        }
        Value::Object(obj) => {
            println!("{padding}{label}Map:");
            for (k, v) in obj {
                print_value(v, indent + 3, Some(k));
            }
        }
    }
}

fn parse_args(raw: &[String]) -> Args {
    raw.iter()
        .map(|arg| serde_json::from_str(arg).unwrap_or_else(|_| Value::String(arg.clone())))
        .collect()
}

fn error_value(err: &IpcError) -> Value {
    json!({ "error": err.to_string() })
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    logger::setup_logger();
    let args: Vec<String> = std::env::args().skip(1).collect();

    // Handle global flags first
    if args.iter().any(|a| a == "--version" || a == "-v") {
        println!("{APP_NAME} version {APP_VERSION}");
        return Ok(());
    }

    if args.iter().any(|a| a == "--help" || a == "-h") {
        println!("{USAGE}");
        return Ok(());
    }

    let (Some(command), Some(channel)) = (args.first(), args.get(1)) else {
        eprintln!("{USAGE}");
        return Ok(());
    };
    let call_args = parse_args(args.get(2..).unwrap_or_default());

    match command.as_str() {
        "call" => {
            let config = ProxyConfig::from_env();
            let response = match SocketTransport::connect().await {
                Ok(transport) => {
                    RemoteMethod::new(Arc::new(transport), channel.as_str(), config.call_timeout)
                        .call(call_args)
                        .await
                        .unwrap_or_else(|e| error_value(&e))
                }
                Err(e) => error_value(&IpcError::Io(e)),
            };
            println!("\nResult:");
            print_value(&response, 0, None);
        }
        "send" => {
            let transport = SocketTransport::connect().await?;
            transport.send(channel, call_args);
            transport.close().await;
            println!("\nSent to {channel}");
        }
        "listen" => {
            println!("Listening on {channel}. Press ctrl+c to exit.\n\n");
            let transport = SocketTransport::connect().await?;
            transport
                .listen(
                    channel,
                    listener(|args| async move {
                        println!("\nResult:");
                        print_value(&Value::Array(args), 0, None);
                    }),
                )
                .await
                .map_err(std::io::Error::other)?;
            tokio::signal::ctrl_c().await?;
        }
        other => eprintln!("Unknown command: {other}\n{USAGE}"),
    }
    Ok(())
}
