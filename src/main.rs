use std::{path::Path, sync::Arc, time::Duration};

use axum::http::Method;
use clap::{Parser, ValueEnum};
use color_eyre::{
    Result,
    eyre::{Context, eyre},
};
use herald::{
    adapters::{GatewayServer, HttpClientAdapter, InstanceRegistrar, RegistryClient, RegistryServer},
    config::{ConfigValidator, DiscoveryConfig, GatewayConfig, RegistryConfig, load_config},
    core::{DiscoveryCache, InvocationEngine, LoadBalancer, MethodDescriptor, ServiceClient},
    tracing_setup::{self, LogFormat},
    utils::graceful_shutdown::{GracefulShutdown, ShutdownReason},
};
use tokio::{net::TcpListener, task::JoinHandle};
use tracing::Instrument;

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    #[clap(subcommand)]
    command: Commands,

    /// Log level or filter directive (overridden by RUST_LOG)
    #[clap(long, global = true, default_value = "info")]
    log_level: String,

    #[clap(long, global = true, value_enum, default_value_t = LogFormat::Pretty)]
    log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ConfigKind {
    Registry,
    Gateway,
}

#[derive(Parser, Debug)]
enum Commands {
    /// Run the service registry
    Registry {
        /// Configuration file; defaults apply when omitted
        #[clap(short, long)]
        config: Option<String>,
        /// Override the listen address
        #[clap(short, long)]
        listen: Option<String>,
    },
    /// Run the API gateway
    Gateway {
        #[clap(short, long, default_value = "gateway.yaml")]
        config: String,
    },
    /// Validate configuration file
    Validate {
        #[clap(short, long, default_value = "gateway.yaml")]
        config: String,
        #[clap(short, long, value_enum, default_value_t = ConfigKind::Gateway)]
        kind: ConfigKind,
    },
    /// Initialize a new configuration file
    Init {
        #[clap(short, long, default_value = "gateway.yaml")]
        config: String,
        #[clap(short, long, value_enum, default_value_t = ConfigKind::Gateway)]
        kind: ConfigKind,
    },
    /// Call a registered service through discovery, load balancing and retries
    Call {
        /// Logical service name as registered
        #[clap(short, long)]
        service: String,
        #[clap(short, long, default_value = "GET")]
        method: String,
        /// Path on the service, optionally with a query string
        #[clap(short, long, default_value = "/")]
        path: String,
        /// JSON request body
        #[clap(short, long)]
        data: Option<String>,
        /// Discovery configuration file
        #[clap(short, long)]
        config: Option<String>,
        #[clap(long)]
        registry_url: Option<String>,
        /// Try the next instance once one is exhausted
        #[clap(long)]
        failover: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::parse();
    let init_logging = || {
        tracing_setup::init_tracing(&args.log_level, args.log_format)
            .map_err(|e| eyre!("Failed to initialize tracing: {}", e))
    };

    match &args.command {
        Commands::Validate { config, kind } => validate_config_command(config, *kind).await,
        Commands::Init { config, kind } => init_config_command(config, *kind).await,
        Commands::Registry { config, listen } => {
            init_logging()?;
            run_registry(config.as_deref(), listen.clone()).await
        }
        Commands::Gateway { config } => {
            init_logging()?;
            run_gateway(config).await
        }
        Commands::Call {
            service,
            method,
            path,
            data,
            config,
            registry_url,
            failover,
        } => {
            init_logging()?;
            let mut discovery: DiscoveryConfig = match config {
                Some(path) => load_config(path).await?,
                None => DiscoveryConfig::default(),
            };
            if let Some(url) = registry_url {
                discovery.registry_url = url.clone();
            }
            discovery.retry.failover |= *failover;
            ConfigValidator::validate_discovery(&discovery)
                .context("Invalid discovery configuration")?;
            call_command(discovery, service, method, path, data.as_deref()).await
        }
    }
}

fn start_signal_handler() -> Arc<GracefulShutdown> {
    let graceful_shutdown = Arc::new(GracefulShutdown::new());
    let signal_handler_shutdown = graceful_shutdown.clone();
    tokio::spawn(async move {
        signal_handler_shutdown.run_signal_handler().await;
    });
    graceful_shutdown
}

/// Wait for the server task to stop on its own or for shutdown, then give it
/// the shutdown timeout to drain.
async fn run_until_shutdown(
    graceful_shutdown: &GracefulShutdown,
    mut server: JoinHandle<Result<()>>,
) -> Result<()> {
    let mut token = graceful_shutdown.shutdown_token();
    tokio::select! {
        result = &mut server => {
            return result.context("Server task panicked")?;
        }
        reason = token.wait_for_shutdown() => {
            tracing::info!("Shutdown signal received: {:?}", reason);
        }
    }

    match graceful_shutdown.drain(&mut server).await {
        ShutdownReason::Graceful => tracing::info!("Graceful shutdown completed"),
        ShutdownReason::Force => {
            server.abort();
            tracing::warn!("Server aborted with connections still open");
        }
    }
    Ok(())
}

async fn run_registry(config_path: Option<&str>, listen: Option<String>) -> Result<()> {
    let mut config: RegistryConfig = match config_path {
        Some(path) => {
            tracing::info!("Loading registry configuration from {path}");
            load_config(path).await?
        }
        None => RegistryConfig::default(),
    };
    if let Some(listen) = listen {
        config.listen_addr = listen;
    }
    ConfigValidator::validate_registry(&config).context("Invalid registry configuration")?;

    let graceful_shutdown = start_signal_handler();
    let listener = TcpListener::bind(&config.listen_addr)
        .await
        .with_context(|| format!("Failed to bind registry to {}", config.listen_addr))?;

    let server = RegistryServer::new(&config);
    let server = tokio::spawn(server.serve(listener, graceful_shutdown.shutdown_token()));
    run_until_shutdown(&graceful_shutdown, server).await
}

async fn run_gateway(config_path: &str) -> Result<()> {
    tracing::info!("Loading gateway configuration from {config_path}");
    let config: GatewayConfig = load_config(config_path)
        .await
        .with_context(|| format!("Failed to load gateway config from {config_path}"))?;
    ConfigValidator::validate_gateway(&config).context("Invalid gateway configuration")?;

    let graceful_shutdown = start_signal_handler();
    let listener = TcpListener::bind(&config.listen_addr)
        .await
        .with_context(|| format!("Failed to bind gateway to {}", config.listen_addr))?;

    let instance = config.instance.clone();
    let server = GatewayServer::from_config(config).await?;
    let server = tokio::spawn(server.serve(listener, graceful_shutdown.shutdown_token()));

    // Registration happens once the listener is serving so the self health
    // check can succeed on the first heartbeat.
    let registrar_task = match instance {
        Some(instance) => {
            let registrar = InstanceRegistrar::new(instance, Arc::new(HttpClientAdapter::new()))?;
            if let Err(e) = registrar.register().await {
                tracing::warn!("{:#}; heartbeats will keep retrying", e);
            }
            let token = graceful_shutdown.shutdown_token();
            Some(tokio::spawn(
                async move { registrar.run(token).await }
                    .instrument(tracing_setup::component_span("registrar")),
            ))
        }
        None => None,
    };

    let result = run_until_shutdown(&graceful_shutdown, server).await;

    if let Some(task) = registrar_task {
        // Stop the heartbeat loop if the server exited without a signal.
        graceful_shutdown.trigger_shutdown(ShutdownReason::Graceful);
        if tokio::time::timeout(Duration::from_secs(5), task).await.is_err() {
            tracing::warn!("Timed out waiting for deregistration");
        }
    }
    result
}

async fn call_command(
    config: DiscoveryConfig,
    service: &str,
    method: &str,
    path: &str,
    data: Option<&str>,
) -> Result<()> {
    let method = Method::from_bytes(method.to_ascii_uppercase().as_bytes())
        .map_err(|_| eyre!("Invalid HTTP method: {method}"))?;
    let body: Option<serde_json::Value> = data
        .map(serde_json::from_str)
        .transpose()
        .context("--data must be valid JSON")?;

    let registry = Arc::new(
        RegistryClient::new(
            config.registry_url.clone(),
            Duration::from_millis(config.timeout_ms),
        )
        .context("Failed to create registry client")?,
    );
    let discovery = Arc::new(DiscoveryCache::new(
        registry,
        Duration::from_millis(config.cache_ttl_ms),
    ));
    let engine = InvocationEngine::new(
        discovery,
        Arc::new(LoadBalancer::new()),
        Arc::new(HttpClientAdapter::new()),
    )
    .with_strategy(config.load_balance_strategy);

    let client = ServiceClient::new(service, Arc::new(engine)).with_policy(config.retry);
    let descriptor = MethodDescriptor::new(method, path.to_string());
    let response: serde_json::Value = client
        .call(&descriptor, body.as_ref())
        .await
        .with_context(|| format!("Call to {service} failed"))?;

    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}

/// Validate configuration file and exit
async fn validate_config_command(config_path: &str, kind: ConfigKind) -> Result<()> {
    println!("🔍 Validating {kind:?} configuration file: {config_path}");

    if !Path::new(config_path).exists() {
        eprintln!("❌ Error: Configuration file '{config_path}' not found");
        std::process::exit(1);
    }

    let outcome = match kind {
        ConfigKind::Registry => match load_config::<RegistryConfig>(config_path).await {
            Ok(config) => {
                println!("✅ Configuration parsing: OK");
                ConfigValidator::validate_registry(&config).map(|()| {
                    vec![
                        format!("Listen Address: {}", config.listen_addr),
                        format!("Lease TTL: {}ms", config.lease_ttl_ms),
                        format!("Environment: {}", config.environment),
                    ]
                })
            }
            Err(e) => parse_failed(e),
        },
        ConfigKind::Gateway => match load_config::<GatewayConfig>(config_path).await {
            Ok(config) => {
                println!("✅ Configuration parsing: OK");
                ConfigValidator::validate_gateway(&config).map(|()| {
                    vec![
                        format!("Listen Address: {}", config.listen_addr),
                        format!("Registry: {}", config.registry_url),
                        format!("Routes: {}", config.routes.len()),
                        format!("Service Rate Limits: {}", config.rate_limits.len()),
                        format!("Auth Enabled: {}", config.auth.is_some()),
                        format!("Self Registration: {}", config.instance.is_some()),
                    ]
                })
            }
            Err(e) => parse_failed(e),
        },
    };

    match outcome {
        Ok(summary) => {
            println!("✅ Configuration validation: OK");
            println!();
            println!("📋 Configuration Summary:");
            for line in summary {
                println!("   • {line}");
            }
            println!();
            println!("🎉 Configuration is valid and ready to use!");
            Ok(())
        }
        Err(e) => {
            eprintln!("❌ Configuration validation failed:");
            eprintln!("{e}");
            println!();
            println!("💡 Common fixes:");
            println!("   • Ensure the registry URL starts with http:// or https://");
            println!("   • Route URIs take the form lb://<service>");
            println!("   • Every route needs a Path= predicate");
            println!("   • Verify listen address format (e.g., '127.0.0.1:3000')");
            std::process::exit(1);
        }
    }
}

fn parse_failed<T>(e: color_eyre::Report) -> T {
    eprintln!("❌ Configuration parsing failed:");
    eprintln!("   {e:#}");
    std::process::exit(1);
}

/// Initialize a new configuration file
async fn init_config_command(config_path: &str, kind: ConfigKind) -> Result<()> {
    let path = Path::new(config_path);
    if path.exists() {
        eprintln!("❌ Error: Configuration file '{config_path}' already exists");
        std::process::exit(1);
    }

    let (default_config, command) = match kind {
        ConfigKind::Registry => (DEFAULT_REGISTRY_CONFIG, "registry"),
        ConfigKind::Gateway => (DEFAULT_GATEWAY_CONFIG, "gateway"),
    };

    tokio::fs::write(path, default_config)
        .await
        .context("Failed to write config file")?;
    println!("✅ Created default {command} configuration at: {config_path}");
    println!("   Run 'herald {command} --config {config_path}' to start the server");
    Ok(())
}

const DEFAULT_REGISTRY_CONFIG: &str = r#"# herald registry configuration
listen_addr: "0.0.0.0:3000"

# Instances disappear from discovery when no heartbeat arrives within this window
lease_ttl_ms: 30000

environment: "Development"
"#;

const DEFAULT_GATEWAY_CONFIG: &str = r#"# herald gateway configuration
app_name: "api-gateway"
listen_addr: "0.0.0.0:8080"
registry_url: "http://localhost:3000"
registry_timeout_ms: 5000

load_balance_strategy: round_robin

routes:
  - id: orders
    uri: lb://order-service
    predicates: ["Path=/orders/**"]
    filters: ["StripPrefix=1"]
  - id: users
    uri: lb://user-service
    predicates: ["Path=/users/**", "Method=GET,POST"]
    filters: ["StripPrefix=1"]

retry:
  maxRetries: 3
  retryDelayMs: 500
  failover: true
  timeoutMs: 10000

global_rate_limit:
  windowMs: 60000
  max: 100

rate_limits:
  # keyed by the first path segment of the request
  - service: orders
    windowMs: 1000
    max: 20

rate_limit_exemptions: ["^/health$", "^/auth/.*$"]

# Counters are shared between gateway nodes only when Redis is configured
# rate_limit_store:
#   redis_url: "redis://127.0.0.1:6379"

# auth:
#   secret: "change-me"

# Register the gateway itself with the registry
# instance:
#   app_name: "api-gateway"
#   port: 8080
#   ip: "localhost"
"#;
