use anyhow::Result;
use audit_relay_proxy::audit::{build_sink, AuditHandle};
use audit_relay_proxy::config::{AuditSinkKind, ProxyConfig};
use audit_relay_proxy::server::ProxyServer;
use audit_relay_proxy::signals::wait_for_termination;
use clap::Parser;
use log::{error, info};
use std::path::PathBuf;

const VERBOSE_FILTER: &str = "info,audit_relay_proxy::protocol::sniffer=trace";

#[derive(Parser, Debug)]
#[clap(author, version, about = "Transparent MySQL relay with command auditing")]
struct Args {
    /// Config file path
    #[clap(short, long, env = "AUDIT_RELAY_CONFIG")]
    config: Option<String>,

    /// Address to listen on (`:port` listens on all interfaces)
    #[clap(short, long, env = "AUDIT_RELAY_BIND")]
    bind: Option<String>,

    /// Backend MySQL server address
    #[clap(long, env = "AUDIT_RELAY_BACKEND")]
    backend: Option<String>,

    /// Read buffer size in bytes
    #[clap(long, env = "AUDIT_RELAY_BUFFER")]
    buffer: Option<usize>,

    /// Backend connect timeout in milliseconds
    #[clap(long, env = "AUDIT_RELAY_CONNECT_TIMEOUT_MS")]
    connect_timeout_ms: Option<u64>,

    /// Log every classified command
    #[clap(short, long, env = "AUDIT_RELAY_VERBOSE")]
    verbose: bool,

    /// Exit after the first session ends
    #[clap(long, env = "AUDIT_RELAY_ONESHOT")]
    oneshot: bool,

    /// Append audit records as JSON lines to this file
    #[clap(long, env = "AUDIT_RELAY_AUDIT_LOG")]
    audit_log: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // Parse command-line arguments
    let args = Args::parse();

    // Initialize logging; verbose mode adds the per-command trace lines
    let default_filter = if args.verbose { VERBOSE_FILTER } else { "info" };
    env_logger::init_from_env(
        env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, default_filter),
    );

    // Load configuration
    let mut config = ProxyConfig::load(args.config.as_deref())?;

    // Override config with command-line arguments
    if let Some(bind) = args.bind {
        config.bind_addr = bind;
    }
    if let Some(backend) = args.backend {
        config.backend_addr = backend;
    }
    if let Some(buffer) = args.buffer {
        config.buffer_size = buffer;
    }
    if let Some(timeout) = args.connect_timeout_ms {
        config.connect_timeout_ms = timeout;
    }
    if args.verbose {
        config.verbose = true;
    }
    if args.oneshot {
        config.oneshot = true;
    }
    if let Some(path) = args.audit_log {
        config.audit.sink = AuditSinkKind::Jsonl;
        config.audit.path = Some(path);
    }

    config.validate()?;

    let audit = build_sink(&config.audit)?;
    let server = ProxyServer::bind(config, audit.as_ref().map(AuditHandle::sink)).await?;
    let shutdown = server.shutdown_handle();

    info!("Listening on {}", server.local_addr()?);
    info!("Backend MySQL: {}", server.transport().backend_addr());

    let mut server_task = tokio::spawn(server.run());

    let mut finished = None;
    let signal = tokio::select! {
        result = &mut server_task => {
            finished = Some(result);
            None
        }
        signal = wait_for_termination() => Some(signal),
    };

    match signal {
        Some(Ok(name)) => {
            info!("received signal: {}, exiting", name);
            shutdown.shutdown();
        }
        Some(Err(e)) => {
            error!("Failed to install signal handlers: {}", e);
            finished = Some(server_task.await);
        }
        None => {}
    }

    // Write out queued audit records before exiting
    if let Some(audit) = &audit {
        audit.close().await;
    }

    if let Some(result) = finished {
        result??;
    }

    info!("Server stopped");

    Ok(())
}
