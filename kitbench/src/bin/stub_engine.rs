//! Stand-in engine for exercising kitbench without a real database.
//!
//! Speaks the same control protocol as the engine: announces readiness on
//! stdout, accepts a single control connection, echoes each command line and
//! prints a throughput report when told to quit.

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use std::io::Write;
use std::net::Ipv4Addr;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpListener;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ReportFormat {
    /// `TPS:(<value>)`
    Tps,
    /// `MQTh/s: (<value>)`
    Mqth,
}

#[derive(Parser, Debug)]
#[command(name = "kitbench-stub-engine")]
#[command(about = "Minimal engine speaking the kitbench control protocol")]
struct Args {
    /// Network mode (accepted for compatibility, always on)
    #[arg(short = 'n')]
    network: bool,

    /// Port to listen on
    #[arg(short, long)]
    port: u16,

    /// Throughput value reported on quit
    #[arg(long, env = "KITBENCH_STUB_TPS", default_value = "123.4")]
    tps: String,

    /// Report line format
    #[arg(long, value_enum, default_value_t = ReportFormat::Tps)]
    format: ReportFormat,

    /// Exit with an error instead of becoming ready
    #[arg(long)]
    fail_startup: bool,

    /// Keep loading forever without ever becoming ready
    #[arg(long)]
    never_ready: bool,
}

fn say(line: &str) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{line}")?;
    stdout.flush()?;
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();

    say(&format!("Stub engine started (pid {})", std::process::id()))?;
    if args.fail_startup {
        eprintln!("error: cannot open database device");
        std::process::exit(1);
    }
    if args.never_ready {
        say("Loading database...")?;
        std::future::pending::<()>().await;
    }

    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, args.port))
        .await
        .with_context(|| format!("Failed to bind port {}", args.port))?;
    say("Waiting for client connection")?;

    let (stream, _) = listener.accept().await.context("Failed to accept")?;
    drop(listener);

    let mut lines = BufReader::new(stream).lines();
    while let Some(line) = lines.next_line().await? {
        let command = line.trim();
        if command.is_empty() {
            continue;
        }
        say(&format!("(kit) {command}"))?;
        if command == "quit" {
            match args.format {
                ReportFormat::Tps => say(&format!("TPS:({})", args.tps))?,
                ReportFormat::Mqth => say(&format!("MQTh/s: ({})", args.tps))?,
            }
            return Ok(());
        }
    }

    eprintln!("control connection closed without quit");
    std::process::exit(2);
}
