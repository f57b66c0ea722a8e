//! Interactive command-line front end for the voice engine. Thin edge
//! only: argument parsing and the command loop use `anyhow` for error
//! context, everything below `Session` uses the library's own error
//! types.

use std::io::{self, BufRead, Write};

use anyhow::{bail, Context, Result};
use voicelink_engine::{init_logger, Pan, Session, SessionConfig};

fn main() -> Result<()> {
    init_logger();

    let mut args = std::env::args().skip(1);
    let key_base64 = args.next().context("usage: voicelink <key-base64> <dest-host> <dest-port> [bind-port]")?;
    let dest_host = args.next().context("missing <dest-host>")?;
    let dest_port: u16 = args
        .next()
        .context("missing <dest-port>")?
        .parse()
        .context("dest-port must be a u16")?;
    let bind_port: u16 = match args.next() {
        Some(p) => p.parse().context("bind-port must be a u16")?,
        None => 0,
    };

    let config = SessionConfig {
        key_base64,
        dest_host,
        dest_port,
        bind_port,
        ..SessionConfig::default()
    };

    let mut session = Session::start(config).context("failed to start session")?;
    println!("session started; type `help` for commands");

    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = line.context("failed to read stdin")?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match run_command(&mut session, line) {
            Ok(true) => break,
            Ok(false) => {}
            Err(e) => eprintln!("error: {e:#}"),
        }
        io::stdout().flush().ok();
    }

    Ok(())
}

/// Returns `Ok(true)` when the command loop should exit.
fn run_command(session: &mut Session, line: &str) -> Result<bool> {
    let mut parts = line.split_whitespace();
    let cmd = parts.next().unwrap_or("");

    match cmd {
        "help" => {
            println!(
                "commands: add <id> | remove <id> | volume <id> <0..1> | pan <id> <l|c|r> | \
                 transmit <id> | stop-transmit | stats <id> | quit"
            );
        }
        "add" => {
            let id = parts.next().context("usage: add <id>")?;
            session.add_channel(id, 1.0, Pan::Center)?;
            println!("added channel '{id}'");
        }
        "remove" => {
            let id = parts.next().context("usage: remove <id>")?;
            session.remove_channel(id)?;
            println!("removed channel '{id}'");
        }
        "volume" => {
            let id = parts.next().context("usage: volume <id> <0..1>")?;
            let v: f32 = parts
                .next()
                .context("usage: volume <id> <0..1>")?
                .parse()
                .context("volume must be a float")?;
            session.set_volume(id, v)?;
        }
        "pan" => {
            let id = parts.next().context("usage: pan <id> <l|c|r>")?;
            let pan = match parts.next() {
                Some("l") => Pan::Left,
                Some("r") => Pan::Right,
                Some("c") => Pan::Center,
                _ => bail!("pan must be one of: l, c, r"),
            };
            session.set_pan(id, pan)?;
        }
        "transmit" => {
            let id = parts.next().context("usage: transmit <id>")?;
            session.begin_transmit(id)?;
            println!("transmitting on '{id}'");
        }
        "stop-transmit" => {
            session.end_transmit()?;
            println!("transmit stopped");
        }
        "stats" => {
            let id = parts.next().context("usage: stats <id>")?;
            match session.stats(id) {
                Some(stats) => println!("{stats:?}"),
                None => println!("no such channel"),
            }
        }
        "quit" | "exit" => return Ok(true),
        other => eprintln!("unknown command '{other}', try `help`"),
    }

    Ok(false)
}
