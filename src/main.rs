//! Vantage - Dokku deployment orchestration over SSH

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use vantage::{
    api::{router, AppState},
    config::{get_data_dir, load_config, Config},
    db::init_database,
    deploy::DeployPipeline,
    events::Notifier,
    health::HealthProber,
    hosts::HostOps,
    ssh::SshExecutor,
    sync::{DatabaseSynchronizer, DomainSynchronizer, EnvVarSynchronizer, SshKeySynchronizer},
};

#[derive(Parser)]
#[command(name = "vantage")]
#[command(version = "0.1.0")]
#[command(about = "Deploy and operate applications on remote Dokku hosts")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Host to bind to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Port to listen on
    #[arg(short, long, default_value = "8080")]
    port: u16,

    /// Database path (defaults to ~/.vantage/vantage.db)
    #[arg(short, long)]
    database: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the Vantage server
    Serve,
    /// Initialize the database
    Init,
    /// Show configuration info
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vantage=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = load_config();

    let db_path = cli
        .database
        .clone()
        .or(config.database.path.clone())
        .unwrap_or_else(|| config.database.get_path().to_string_lossy().to_string());

    match cli.command {
        Some(Commands::Init) => {
            println!("Initializing database at: {}", db_path);
            let _pool = init_database(&db_path).await?;
            println!("Database initialized successfully!");
            return Ok(());
        }
        Some(Commands::Config) => {
            println!("Vantage Configuration");
            println!("=====================");
            println!("Data directory: {}", get_data_dir().display());
            println!("Database path: {}", db_path);
            println!("Server: {}:{}", cli.host, cli.port);
            println!("Health interval: {}s", config.health.interval);
            println!("Workspace root: {}", config.deploy.workspace_root);
            return Ok(());
        }
        _ => {}
    }

    run_server(&cli.host, cli.port, &db_path, config).await
}

async fn run_server(host: &str, port: u16, db_path: &str, config: Config) -> anyhow::Result<()> {
    tracing::info!("Initializing database at: {}", db_path);
    let pool = init_database(db_path).await?;

    let notifier = Notifier::new();
    let runner = Arc::new(SshExecutor::new(
        Duration::from_secs(config.ssh.connect),
        Duration::from_secs(config.ssh.stream_ceiling),
    ));

    let pipeline = Arc::new(DeployPipeline::new(
        pool.clone(),
        runner.clone(),
        notifier.clone(),
        config.ssh.clone(),
        config.deploy.clone(),
    ));
    let host_ops = Arc::new(HostOps::new(
        pool.clone(),
        runner.clone(),
        notifier.clone(),
        config.ssh.clone(),
    ));
    let prober = Arc::new(HealthProber::new(
        pool.clone(),
        notifier.clone(),
        config.health.clone(),
    )?);

    let app_state = AppState {
        pool: pool.clone(),
        notifier: notifier.clone(),
        pipeline,
        host_ops,
        prober,
        domains: Arc::new(DomainSynchronizer::new(
            pool.clone(),
            runner.clone(),
            notifier.clone(),
            config.ssh.clone(),
        )),
        env_vars: Arc::new(EnvVarSynchronizer::new(
            pool.clone(),
            runner.clone(),
            notifier.clone(),
            config.ssh.clone(),
        )),
        databases: Arc::new(DatabaseSynchronizer::new(
            pool.clone(),
            runner.clone(),
            notifier.clone(),
            config.ssh.clone(),
        )),
        ssh_keys: Arc::new(SshKeySynchronizer::new(
            pool.clone(),
            runner.clone(),
            notifier.clone(),
            config.ssh.clone(),
        )),
        config: Arc::new(config.clone()),
    };

    // Background health loop, isolated from request handling
    let loop_prober = HealthProber::new(pool, notifier, config.health.clone())?;
    tokio::spawn(loop_prober.run_loop());

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = router(app_state)
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    print_banner(host, port, db_path);

    tracing::info!("Starting server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn print_banner(host: &str, port: u16, db_path: &str) {
    println!();
    println!("  ╭─────────────────────────────────────────────────────────────╮");
    println!("  │                                                             │");
    println!("  │   VANTAGE v0.1.0                                            │");
    println!("  │   Dokku Deployment Orchestration                            │");
    println!("  │                                                             │");
    println!("  ├─────────────────────────────────────────────────────────────┤");
    println!("  │                                                             │");
    println!("  │   API:       http://{}:{}/api                     │", host, port);
    println!("  │   WebSocket: ws://{}:{}/ws                        │", host, port);
    println!("  │   Database:  {}   │", truncate_path(db_path, 35));
    println!("  │                                                             │");
    println!("  ╰─────────────────────────────────────────────────────────────╯");
    println!();
}

fn truncate_path(path: &str, max_len: usize) -> String {
    if path.len() <= max_len {
        format!("{:width$}", path, width = max_len)
    } else {
        format!("...{}", &path[path.len() - max_len + 3..])
    }
}
