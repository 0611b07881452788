use std::env;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use packrat::core::embed::EmbedClient;
use packrat::graph::{GraphSink, GraphStore};
use packrat::{api, core::config, ingest, store, AppState};

fn parse_port_from_args() -> Option<u16> {
    let mut args = std::env::args().peekable();
    while let Some(a) = args.next() {
        if a == "--port" {
            if let Some(v) = args.next() {
                if let Ok(p) = v.parse::<u16>() {
                    return Some(p);
                }
            }
        } else if let Some(rest) = a.strip_prefix("--port=") {
            if let Ok(p) = rest.parse::<u16>() {
                return Some(p);
            }
        }
    }
    None
}

fn port_from_env() -> Option<u16> {
    for k in ["PACKRAT_PORT", "PORT"] {
        if let Ok(v) = std::env::var(k) {
            if let Ok(p) = v.trim().parse::<u16>() {
                return Some(p);
            }
        }
    }
    None
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,tower_http=warn"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let args: Vec<String> = std::env::args().collect();

    let pool = store::get_pool().await?.clone();
    store::run_migrations(&pool).await?;

    // Shared HTTP client for the embedding and rerank endpoints.
    let http_timeout = env::var("HTTP_TIMEOUT_SECS")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(30);
    let connect_timeout = env::var("HTTP_CONNECT_TIMEOUT_SECS")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(10);
    let http_client = reqwest::Client::builder()
        .timeout(Duration::from_secs(http_timeout))
        .connect_timeout(Duration::from_secs(connect_timeout))
        .build()?;

    // One-shot maintenance modes.
    if args.iter().any(|a| a == "--reindex") {
        let embed = EmbedClient::new(http_client, config::ollama_url());
        let confirm_swap = args.iter().any(|a| a == "--confirm-swap");
        ingest::reindex::reindex(&pool, &embed, confirm_swap).await?;
        store::close_pool().await;
        return Ok(());
    }
    if args.iter().any(|a| a == "--retry-dead-letters") {
        let state = Arc::new(AppState::new(pool.clone(), http_client));
        let recovered = ingest::retry::retry_dead_letters(&state).await?;
        info!("recovered {} dead-lettered files", recovered);
        store::close_pool().await;
        return Ok(());
    }

    info!("starting packrat");

    // Graph session. Boot continues without it - /health reports 503 and
    // the drainer is not started (the supervisor restarts us).
    let graph = match GraphStore::connect().await {
        Ok(g) => Some(Arc::new(g)),
        Err(e) => {
            error!("graph store unreachable at boot: {} — outbox drainer disabled", e);
            None
        }
    };

    let mut state = AppState::new(pool.clone(), http_client);
    if let Some(graph) = &graph {
        state = state.with_graph(Arc::clone(graph));
    }
    let state = Arc::new(state);

    // Background tasks share one stop flag; each finishes its current
    // iteration inside the grace window.
    let (stop_tx, stop_rx) = watch::channel(false);
    let mut tasks: Vec<(&str, JoinHandle<()>)> = Vec::new();

    tasks.push((
        "watcher",
        tokio::spawn(ingest::watcher::run_watcher(
            Arc::clone(&state),
            stop_rx.clone(),
        )),
    ));
    tasks.push((
        "embedding-worker",
        tokio::spawn(ingest::embedding_worker::run_embedding_worker(
            pool.clone(),
            state.embed.clone(),
            stop_rx.clone(),
        )),
    ));
    if let Some(graph) = &graph {
        tasks.push((
            "outbox-drainer",
            tokio::spawn(ingest::outbox_worker::run_outbox_worker(
                pool.clone(),
                Arc::clone(graph) as Arc<dyn GraphSink>,
                stop_rx.clone(),
            )),
        ));
    }

    let app = api::router(Arc::clone(&state));

    let port: u16 = parse_port_from_args().or_else(port_from_env).unwrap_or(8000);
    let bind_addr = format!("0.0.0.0:{}", port);
    let listener = match tokio::net::TcpListener::bind(&bind_addr).await {
        Ok(l) => l,
        Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => {
            anyhow::bail!(
                "Address already in use: {}. Stop the existing process or run with --port {} (or set PORT/PACKRAT_PORT).",
                bind_addr,
                port.saturating_add(1)
            )
        }
        Err(e) => return Err(e.into()),
    };
    info!("packrat listening on http://{}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Wind down: flag the workers, give each the grace window, then force.
    let _ = stop_tx.send(true);
    for (name, mut handle) in tasks {
        match tokio::time::timeout(Duration::from_secs(10), &mut handle).await {
            Ok(_) => info!("{} stopped", name),
            Err(_) => {
                warn!("{} did not stop within the grace window — aborting", name);
                handle.abort();
            }
        }
    }
    store::close_pool().await;

    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).ok();
        let mut sigint = signal(SignalKind::interrupt()).ok();

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = async {
                if let Some(ref mut s) = sigterm {
                    s.recv().await;
                } else {
                    futures::future::pending::<()>().await;
                }
            } => {},
            _ = async {
                if let Some(ref mut s) = sigint {
                    s.recv().await;
                } else {
                    futures::future::pending::<()>().await;
                }
            } => {},
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
