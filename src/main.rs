use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use secrecy::SecretString;
use tokio::sync::watch;
use tracing::{error, info, warn};

use leadflow::config::Config;
use leadflow::gateway::{self, GatewayState};
use leadflow::knowledge::{HttpEmbedder, KnowledgeRetriever, KnowledgeService};
use leadflow::llm::HttpChatModel;
use leadflow::pipeline::HtlPipeline;
use leadflow::queue::{HttpQueue, MessageQueue};
use leadflow::rpc::{HttpStateClient, StateStore};
use leadflow::worker::{
    ActionApplier, DebounceTable, FollowupScheduler, MessageProcessor, ProcessorDeps, QueueConsumer,
};

/// Leadflow — multi-tenant WhatsApp conversation automation core.
#[derive(Parser, Debug)]
#[command(name = "leadflow", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the ingress gateway, queue consumer, and follow-up scheduler.
    Start,
    /// Signal a running instance to shut down gracefully.
    Stop,
    /// Dangerous: truncate conversations and messages via the state RPC.
    ResetState {
        /// Confirm the truncation.
        #[arg(long)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let outcome = match cli.command {
        Commands::Start => start().await,
        Commands::Stop => stop(),
        Commands::ResetState { yes } => reset_state(yes).await,
    };
    if let Err(e) = outcome {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();
}

async fn start() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let config = Config::from_env()?;

    let queue: Arc<dyn MessageQueue> = Arc::new(HttpQueue::new(config.queue_url.clone()));
    let store: Arc<dyn StateStore> = Arc::new(HttpStateClient::new(
        config.internal_api_base_url.clone(),
        config.internal_secret.clone(),
    ));
    let chat = Arc::new(HttpChatModel::new(
        config.llm_base_url.clone(),
        config.llm_model.clone(),
        config.llm_api_key.clone(),
    ));

    let retriever: Option<Arc<dyn KnowledgeRetriever>> = match config.database_url {
        Some(ref dsn) => {
            let pool = sqlx::postgres::PgPoolOptions::new()
                .max_connections(5)
                .connect(dsn)
                .await?;
            let embedder = Arc::new(HttpEmbedder::new(
                config.embedding_base_url.clone(),
                config.embedding_model.clone(),
                config.embedding_api_key.clone(),
            ));
            info!("knowledge retrieval enabled");
            Some(Arc::new(KnowledgeService::new(pool, embedder)))
        }
        None => {
            warn!("DATABASE_URL not set; running without knowledge retrieval");
            None
        }
    };

    let pipeline = Arc::new(HtlPipeline::new(chat, retriever));
    let debounce = Arc::new(DebounceTable::new(config.debounce_window));
    let applier = Arc::new(ActionApplier::new(store.clone(), pipeline.clone()));
    let processor = MessageProcessor::new(ProcessorDeps {
        store: store.clone(),
        pipeline,
        applier,
        debounce,
        pipeline_budget: config.pipeline_budget,
    });

    let consumer = QueueConsumer::new(queue.clone(), processor.clone());
    let scheduler = FollowupScheduler::new(
        store,
        processor,
        config.scheduler_interval,
        config.followup_buckets.clone(),
    );

    // Liveness file: `leadflow stop` removes it to request shutdown.
    std::fs::write(&config.liveness_file, std::process::id().to_string())?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let gateway_state = GatewayState {
        queue,
        app_secret: config.webhook_app_secret.clone(),
        verify_token: config.webhook_verify_token.clone(),
    };
    let listener = tokio::net::TcpListener::bind(&config.webhook_bind).await?;
    info!(bind = %config.webhook_bind, "ingress gateway listening");

    let gateway_task = tokio::spawn({
        let app = gateway::router(gateway_state);
        let mut shutdown = shutdown_rx.clone();
        async move {
            let serve = axum::serve(listener, app).with_graceful_shutdown(async move {
                let _ = shutdown.changed().await;
            });
            if let Err(e) = serve.await {
                error!(error = %e, "gateway server failed");
            }
        }
    });

    let consumer_task = tokio::spawn({
        let shutdown = shutdown_rx.clone();
        async move { consumer.run(shutdown).await }
    });
    let scheduler_task = tokio::spawn({
        let shutdown = shutdown_rx.clone();
        async move { scheduler.run(shutdown).await }
    });

    info!("leadflow started");
    wait_for_shutdown(&config.liveness_file).await;
    info!("shutting down");

    let _ = shutdown_tx.send(true);
    let _ = std::fs::remove_file(&config.liveness_file);
    let _ = tokio::time::timeout(
        Duration::from_secs(10),
        futures::future::join3(gateway_task, consumer_task, scheduler_task),
    )
    .await;

    Ok(())
}

/// Block until ctrl-c, SIGTERM, or liveness-file removal.
async fn wait_for_shutdown(liveness_file: &str) {
    let liveness_watch = async {
        loop {
            tokio::time::sleep(Duration::from_secs(1)).await;
            if !std::path::Path::new(liveness_file).exists() {
                info!("liveness file removed; stopping");
                return;
            }
        }
    };

    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("sigterm handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
            _ = liveness_watch => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = liveness_watch => {}
        }
    }
}

fn stop() -> Result<(), Box<dyn std::error::Error>> {
    let liveness_file = std::env::var("LIVENESS_FILE")
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| "/tmp/leadflow.alive".to_string());

    if !std::path::Path::new(&liveness_file).exists() {
        return Err(format!("no running instance (liveness file {liveness_file} not found)").into());
    }
    std::fs::remove_file(&liveness_file)?;
    println!("Shutdown requested ({liveness_file} removed).");
    Ok(())
}

async fn reset_state(yes: bool) -> Result<(), Box<dyn std::error::Error>> {
    if !yes {
        return Err("reset-state truncates conversations and messages; pass --yes to confirm".into());
    }
    init_tracing();

    let base_url = std::env::var("INTERNAL_API_BASE_URL")
        .map_err(|_| "INTERNAL_API_BASE_URL is not set")?;
    let secret = std::env::var("INTERNAL_SECRET").map_err(|_| "INTERNAL_SECRET is not set")?;

    let store = HttpStateClient::new(base_url, SecretString::from(secret));
    store.reset_state().await?;
    println!("State reset complete.");
    Ok(())
}
