//! misty-ctl: command-line interface for the misty daemon.

mod cmd;

use anyhow::{Context, Result};

use cmd::peers::{cmd_peers, cmd_ping};
use cmd::status::{cmd_server, cmd_status};

const DEFAULT_PORT: u16 = 3000;

fn print_usage() {
    println!("misty-ctl: command-line interface for mistyd");
    println!();
    println!("USAGE:");
    println!("  misty-ctl [--port <port>] <command>");
    println!();
    println!("COMMANDS:");
    println!("  status          Session status and login URL (default)");
    println!("  peers           List peers on the overlay");
    println!("  server          Show the server peer");
    println!("  ping <host>     Probe a peer by hostname");
    println!("  help            Show this message");
    println!();
    println!("OPTIONS:");
    println!("  --port <port>   API port (default {})", DEFAULT_PORT);
}

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();

    // Parse --port option
    let mut port = DEFAULT_PORT;
    let mut remaining: Vec<&str> = Vec::new();
    let mut i = 0;
    while i < args.len() {
        if args[i] == "--port" {
            i += 1;
            port = args
                .get(i)
                .context("--port requires a value")?
                .parse()
                .context("--port must be a number")?;
        } else {
            remaining.push(&args[i]);
        }
        i += 1;
    }

    match remaining.as_slice() {
        ["status"] | [] => cmd_status(port).await,
        ["peers"] => cmd_peers(port).await,
        ["server"] => cmd_server(port).await,
        ["ping", host] => cmd_ping(port, host).await,
        ["help"] | ["--help"] | ["-h"] => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {}", other.join(" "));
            eprintln!();
            print_usage();
            std::process::exit(1);
        }
    }
}
