use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use fshare_core::receive::{self, ReceiveOptions, ReceiveTarget};
use fshare_core::session::{self, SendOptions};
use fshare_core::tunnel::TunnelMode;
use fshare_core::util::{format_size, generate_password};
use fshare_core::{EventSink, ShareContext, ShareError};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

mod output;
mod prompt;

use output::EventPrinter;
use prompt::StdinPrompt;

/// Length of the password generated by `send --secure`
const SECURE_PASSWORD_LEN: usize = 8;

/// Events buffered between the core and the terminal
const EVENT_CAPACITY: usize = 256;

#[derive(Parser)]
#[command(name = "fshare")]
#[command(about = "Share a file over the local network or a public tunnel")]
#[command(version)]
struct Cli {
    /// Verbose logging (overrides RUST_LOG)
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Share a file until the session expires or Ctrl-C
    Send {
        #[arg(help = "Path to file to send")]
        path: PathBuf,

        /// Require receivers to present this password
        #[arg(long)]
        password: Option<String>,

        /// Generate a random password when none is given
        #[arg(long)]
        secure: bool,

        /// Fail unless a public tunnel can be created
        #[arg(long, conflicts_with = "local")]
        tunnel: bool,

        /// Never create a public tunnel
        #[arg(long)]
        local: bool,
    },

    /// Fetch a file from a sender on the local network
    Receive {
        host: String,
        port: u16,
        #[arg(value_name = "FILE_NAME")]
        file_name: String,

        #[arg(long)]
        password: Option<String>,

        /// Directory to save into (defaults to the configured download dir)
        #[arg(long, value_name = "DIR")]
        out: Option<PathBuf>,
    },

    /// Fetch a file through a public URL
    Get {
        url: String,
        #[arg(value_name = "FILE_NAME")]
        file_name: String,

        #[arg(long)]
        password: Option<String>,

        #[arg(long, value_name = "DIR")]
        out: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.debug);

    let ctx = ShareContext::load(cli.debug);

    let result = match cli.command {
        Commands::Send {
            path,
            password,
            secure,
            tunnel,
            local,
        } => {
            let password = match password {
                Some(p) => Some(p),
                None if secure => Some(generate_password(SECURE_PASSWORD_LEN)),
                None => None,
            };
            let tunnel = if local {
                TunnelMode::Disabled
            } else if tunnel {
                TunnelMode::Required
            } else {
                TunnelMode::Auto
            };
            let options = SendOptions {
                password,
                tunnel,
                ..SendOptions::default()
            };
            run_send(&ctx, path, options).await
        }
        Commands::Receive {
            host,
            port,
            file_name,
            password,
            out,
        } => {
            let target = ReceiveTarget::Direct { host, port };
            run_receive(&ctx, target, file_name, password, out).await
        }
        Commands::Get {
            url,
            file_name,
            password,
            out,
        } => run_receive(&ctx, ReceiveTarget::Url(url), file_name, password, out).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            if let Some(hint) = e.downcast_ref::<ShareError>().and_then(ShareError::remediation) {
                eprintln!("Hint: {}", hint);
            }
            ExitCode::FAILURE
        }
    }
}

fn init_logging(debug: bool) {
    let filter = if debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("warn,fshare_core=info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run_send(ctx: &ShareContext, path: PathBuf, options: SendOptions) -> Result<()> {
    let (events, mut rx) = EventSink::channel(EVENT_CAPACITY);

    // Installed before `start` so Ctrl-C during the tunnel request still tears down
    let shutdown = options.shutdown.clone();
    let on_signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_signal.cancel();
        }
    });

    let mut printer = EventPrinter::new(ctx.debug);
    let active = match session::start(ctx, &path, options, events).await {
        Ok(active) => active,
        Err(ShareError::Cancelled) => {
            while let Ok(event) = rx.try_recv() {
                printer.print(&event);
            }
            println!("Stopped before the session started");
            return Ok(());
        }
        Err(e) => return Err(e).with_context(|| format!("Cannot share {}", path.display())),
    };

    let connections = active.watch_connections();
    let mut run = tokio::spawn(active.run());
    let mut stopping = false;

    loop {
        tokio::select! {
            Some(event) = rx.recv() => printer.print(&event),

            _ = shutdown.cancelled(), if !stopping => {
                stopping = true;
                let open = *connections.borrow();
                println!("\nStopping, closing {} open connection(s) and the tunnel...", open);
            }

            reason = &mut run => {
                while let Ok(event) = rx.try_recv() {
                    printer.print(&event);
                }
                let reason = reason.context("Session task failed")?;
                tracing::debug!("Session finished: {}", reason);
                return Ok(());
            }
        }
    }
}

async fn run_receive(
    ctx: &ShareContext,
    target: ReceiveTarget,
    file_name: String,
    password: Option<String>,
    out: Option<PathBuf>,
) -> Result<()> {
    let mut options = ReceiveOptions::from_config(&ctx.config);
    options.password = password;
    options.expected_file_name = Some(file_name);
    if let Some(dir) = out {
        options.download_dir = dir;
    }

    let outcome = tokio::select! {
        result = receive::receive(&target, &options, &StdinPrompt) => {
            result.context("Receive failed")?
        }
        _ = tokio::signal::ctrl_c() => anyhow::bail!("Cancelled"),
    };

    println!(
        "Saved {} ({}) to {}",
        outcome.file_name,
        format_size(outcome.bytes),
        outcome.path.display()
    );
    println!(
        "Took {:.2}s at {}",
        outcome.elapsed.as_secs_f64(),
        outcome.throughput
    );
    Ok(())
}
