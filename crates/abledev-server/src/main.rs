//! abledev server - serves backend functions over the query/mutation routes.
//!
//! In development mode every call loads its function file fresh from the
//! source directory. In production mode the functions are discovered and
//! loaded once at startup.

use abledev_core::{
    build_mapping, listen_on_available_port, serve, start_dev_server, DevServerOptions, Gateway,
    GatewayConfig, HostContext, ModuleLoader, OperatingMode, PortRetryPolicy, ScriptModuleLoader,
    ServerConfig, ServerHandle, WireValue,
};
use abledev_core::server::FunctionPreview;
use anyhow::{anyhow, Context, Result};
use clap::{Parser, ValueEnum};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    Development,
    Production,
}

#[derive(Parser, Debug)]
#[command(name = "abledev-server")]
#[command(about = "Query/mutation gateway for abledev backend functions")]
struct Args {
    /// How functions are found
    #[arg(long, value_enum, default_value = "development")]
    mode: Mode,

    /// Directory holding queries/ and mutations/
    #[arg(long, default_value = "src")]
    src_path: PathBuf,

    /// Host to bind to
    #[arg(long, default_value = ServerConfig::DEFAULT_HOST)]
    host: String,

    /// Preferred port; the next free port up is used when it is taken
    #[arg(short, long, default_value_t = ServerConfig::DEFAULT_PREFERRED_PORT)]
    port: u16,

    /// Give up after this many bind attempts (default: keep trying)
    #[arg(long)]
    max_port_attempts: Option<u32>,

    /// Fail calls that run longer than this many milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Function file extension
    #[arg(long, default_value = ServerConfig::DEFAULT_SOURCE_EXTENSION)]
    extension: String,

    /// Prefix for the call routes, e.g. /api
    #[arg(long, default_value = "")]
    base_path: String,

    /// JSON object merged into every function's context
    #[arg(long)]
    host_context: Option<String>,

    /// Script whose default export supplies /dev/preview-data (development only)
    #[arg(long)]
    preview_script: Option<PathBuf>,

    /// Send invocation error details to clients
    #[arg(long)]
    expose_errors: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging
    let log_level = if args.debug { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();

    info!("Starting abledev server in {:?} mode", args.mode);

    let host: IpAddr = args
        .host
        .parse()
        .with_context(|| format!("Invalid host address: {}", args.host))?;
    let host_context = parse_host_context(args.host_context.as_deref())?;

    let mut config = GatewayConfig::default()
        .with_base_path(args.base_path.clone())
        .with_error_details(args.expose_errors);
    if let Some(ms) = args.timeout_ms {
        config = config.with_invocation_timeout(Duration::from_millis(ms));
    }

    let port_policy = match args.max_port_attempts {
        Some(max) => PortRetryPolicy::bounded(max),
        None => PortRetryPolicy::unbounded(),
    };

    let server = match args.mode {
        Mode::Development => {
            let mut options = DevServerOptions::new(&args.src_path)
                .with_host(host)
                .with_port(args.port)
                .with_port_policy(port_policy)
                .with_extension(args.extension.clone())
                .with_host_context(host_context.clone())
                .with_gateway_config(config);
            if let Some(script) = &args.preview_script {
                let provider = load_preview(script, host_context).await?;
                options = options.with_preview_data(Arc::new(provider));
            }
            start_dev_server(options).await?
        }
        Mode::Production => {
            if args.preview_script.is_some() {
                warn!("--preview-script is ignored in production mode");
            }
            start_production(&args, host, port_policy, host_context, config).await?
        }
    };

    // Print port for the parent process to read (intentional stdout)
    println!("SERVER_PORT={}", server.port());
    info!("abledev server running on {}", server.address());

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, closing server");
    server.close().await?;

    Ok(())
}

async fn start_production(
    args: &Args,
    host: IpAddr,
    port_policy: PortRetryPolicy,
    host_context: HostContext,
    config: GatewayConfig,
) -> Result<ServerHandle> {
    let loader = ScriptModuleLoader::new(&args.src_path);
    let mapping = build_mapping(&args.src_path, &args.extension, &loader).await?;

    let gateway = Arc::new(Gateway::new(
        OperatingMode::production(mapping),
        host_context,
        config,
    ));
    let bound = listen_on_available_port(host, args.port, port_policy).await?;
    Ok(serve(gateway.router(), bound))
}

fn parse_host_context(raw: Option<&str>) -> Result<HostContext> {
    let Some(raw) = raw else {
        return Ok(HostContext::new());
    };
    let parsed: serde_json::Value =
        serde_json::from_str(raw).context("--host-context must be valid JSON")?;
    Ok(HostContext::from_wire(WireValue::from(parsed))?)
}

async fn load_preview(script: &Path, host_context: HostContext) -> Result<FunctionPreview> {
    let script = std::fs::canonicalize(script)
        .with_context(|| format!("Preview script not found: {}", script.display()))?;
    let root = script
        .parent()
        .ok_or_else(|| anyhow!("Preview script has no parent directory"))?;

    let loader = ScriptModuleLoader::new(root);
    let function = loader
        .load(&script)
        .await?
        .into_callable()
        .ok_or_else(|| anyhow!("Default export of {} is not a function", script.display()))?;
    Ok(FunctionPreview::new(function, host_context))
}
