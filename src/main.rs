//! Socklink - Local Tunneling Proxy Client
//!
//! This is the main entry point for the Socklink application.

use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use socklink::config::{load_config, Config, ProxyOptions};
use socklink::credentials::{CredentialResolver, CredentialSource};
use socklink::helper::DEBUG_ROUTER;
use socklink::proxy::Proxy;
use std::path::PathBuf;
use std::process::ExitCode;
use tokio::process::Command;
use tracing::{debug, info, Level};
use tracing_subscriber::FmtSubscriber;

/// Socklink - expose a remote service on a local TCP or UDP port
#[derive(Parser, Debug)]
#[command(name = "socklink")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Service code or host of the target
    target: String,

    /// Command to run once the port is open; `{host}` and `{port}` are substituted
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    command: Vec<String>,

    /// Local address to bind to
    #[arg(short, long)]
    bind: Option<String>,

    /// TCP port number (default: first free port in the scan range)
    #[arg(short, long)]
    port: Option<u16>,

    /// UDP port number
    #[arg(short, long, value_name = "PORT", conflicts_with = "port")]
    udp: Option<u16>,

    /// Path to the credentials file
    #[arg(long)]
    credentials: Option<PathBuf>,

    /// Credential profile name in the credentials file
    #[arg(long)]
    profile: Option<String>,

    /// Router hostname
    #[arg(long, hide = true)]
    router: Option<String>,

    /// Extra handshake header, NAME=VALUE (repeatable)
    #[arg(long = "header", value_name = "NAME=VALUE")]
    headers: Vec<String>,

    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable debug output
    #[arg(short, long)]
    debug: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "warn")]
    log_level: String,

    /// Enable JSON logging format
    #[arg(long)]
    json_log: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let level = if args.debug { "debug" } else { args.log_level.as_str() };
    if let Err(e) = setup_logging(level, args.json_log) {
        eprintln!("ERROR: {:#}", e);
        return ExitCode::FAILURE;
    }

    match run(args).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("ERROR: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<ExitCode> {
    let config = match &args.config {
        Some(path) => {
            let config = load_config(path)?;
            info!("Configuration loaded from: {:?}", path);
            config
        }
        None => Config::default(),
    };

    let options = build_options(&args, &config)?;
    let resolver = build_resolver(&args, &config);
    let host = options.bind().to_string();

    let proxy = Proxy::new(&args.target, options, resolver)?;
    info!("Socklink v{}", socklink::VERSION);
    info!("Target: {}", proxy.target());

    let port = match proxy.open().await {
        Ok(port) => port,
        Err(e) => {
            proxy.close().await;
            return Err(e.into());
        }
    };

    let result = if args.command.is_empty() {
        println!("{}:{}", host, port);
        wait_for_shutdown().await;
        Ok(ExitCode::SUCCESS)
    } else {
        run_command(&args.command, &host, port).await
    };

    proxy.close().await;
    result
}

/// CLI flags over the config file over built-in defaults
fn build_options(args: &Args, config: &Config) -> Result<ProxyOptions> {
    let mut builder = config.proxy.apply(ProxyOptions::builder());

    if let Some(ref bind) = args.bind {
        builder = builder.bind(bind.clone());
    }
    if let Some(ref router) = args.router {
        builder = builder.router(router.clone());
    } else if args.debug && config.proxy.router.is_none() {
        builder = builder.router(DEBUG_ROUTER);
    }
    if let Some(port) = args.port {
        builder = builder.port(port);
    }
    if let Some(port) = args.udp {
        builder = builder.udp(true).port(port);
    }
    for header in &args.headers {
        let (name, value) = parse_header(header)?;
        builder = builder.header(name, value);
    }

    Ok(builder.build()?)
}

/// Environment first, then the credentials file
fn build_resolver(args: &Args, config: &Config) -> CredentialResolver {
    let path = args
        .credentials
        .clone()
        .unwrap_or_else(|| config.credentials.path.clone());
    let profile = args
        .profile
        .clone()
        .unwrap_or_else(|| config.credentials.profile.clone());

    let mut sources = Vec::new();
    if let Some(source) = CredentialSource::from_env() {
        debug!("Using credentials from the environment");
        sources.push(source);
    }
    sources.push(CredentialSource::file(path, profile));
    CredentialResolver::new(sources)
}

fn parse_header(header: &str) -> Result<(&str, &str)> {
    let (name, value) = header
        .split_once('=')
        .ok_or_else(|| anyhow!("invalid header {:?}, expected NAME=VALUE", header))?;
    if name.trim().is_empty() {
        bail!("invalid header {:?}, empty name", header);
    }
    Ok((name.trim(), value.trim()))
}

/// Substitute `{host}` and `{port}` in every argument
fn render_command(template: &[String], host: &str, port: u16) -> Vec<String> {
    let port = port.to_string();
    template
        .iter()
        .map(|arg| arg.replace("{host}", host).replace("{port}", &port))
        .collect()
}

async fn run_command(template: &[String], host: &str, port: u16) -> Result<ExitCode> {
    let command = render_command(template, host, port);
    let (program, rest) = command
        .split_first()
        .ok_or_else(|| anyhow!("empty command"))?;
    debug!("Running: {}", command.join(" "));

    let mut child = Command::new(program)
        .args(rest)
        .spawn()
        .with_context(|| format!("Failed to run {}", program))?;

    let status = tokio::select! {
        status = child.wait() => status?,
        _ = wait_for_shutdown() => {
            child.kill().await.ok();
            child.wait().await?
        }
    };
    debug!("{} exited with {}", program, status);

    Ok(match status.code() {
        Some(0) => ExitCode::SUCCESS,
        Some(code) => ExitCode::from(u8::try_from(code).unwrap_or(1)),
        None => ExitCode::FAILURE,
    })
}

/// Resolve on Ctrl+C or SIGTERM
async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => info!("Received Ctrl+C, shutting down..."),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
                }
            }
            Err(e) => {
                debug!("Failed to setup SIGTERM handler: {}", e);
                let _ = tokio::signal::ctrl_c().await;
                info!("Received Ctrl+C, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        // On Windows, only handle Ctrl+C
        let _ = tokio::signal::ctrl_c().await;
        info!("Received Ctrl+C, shutting down...");
    }
}

/// Setup logging based on configuration
fn setup_logging(level: &str, json: bool) -> Result<()> {
    let level = match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" | "warning" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::WARN,
    };

    // stdout belongs to `host:port` and the child command
    if json {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(level)
            .with_writer(std::io::stderr)
            .json()
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(level)
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_thread_ids(false)
            .with_thread_names(false)
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    }

    Ok(())
}
