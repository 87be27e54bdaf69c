//! Serve command - the control plane
//!
//! Startup order: settings, store migrations (fatal when the database is
//! newer than the binary), broker connect + stream ensure, consumer binding
//! for all active subscriptions, map worker pool, single HTTP listener for
//! ingest and the API. Shutdown drains HTTP first, then cancels workers and
//! waits up to a grace deadline before force-closing.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::Router;
use langhook_api::{AppState, HealthProbes, Probe};
use langhook_config::Settings;
use langhook_ingest::{IngestState, RateLimiter, RateStore, RedisRateStore, SignatureVerifier};
use langhook_llm::{Budget, ChatModel, LlmBroker, OpenAiChat, SystemClock};
use langhook_mapping::{MapWorker, MappingEngine};
use langhook_matcher::{ConsumerRegistry, DispatchConfig, MatcherContext, WebhookDispatcher};
use langhook_metrics::PipelineMetrics;
use langhook_protocol::{DLQ_STREAM, EVENTS_STREAM, RAW_STREAM};
use langhook_store::Store;
use langhook_stream::{EventBus, JetStreamBus, StreamSpec};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// How long in-flight work may take after shutdown begins
const SHUTDOWN_GRACE: Duration = Duration::from_secs(15);

/// Run the pipeline until interrupted
pub async fn run() -> Result<()> {
    let settings = Settings::from_env().context("loading configuration")?;
    info!(
        broker = %settings.broker_url,
        store = %settings.store_dsn,
        listen = %settings.listen_addr,
        "starting langhook"
    );

    // store first: a schema version mismatch must stop the process before
    // any consumer binds
    let store = Store::connect(&settings.store_dsn)
        .await
        .context("opening registry store")?;

    let bus: Arc<dyn EventBus> = Arc::new(
        JetStreamBus::connect(&settings.broker_url)
            .await
            .context("connecting to broker")?,
    );
    ensure_streams(bus.as_ref()).await?;

    let rate_store =
        Arc::new(RedisRateStore::connect(&settings.cache_url).context("configuring cache store")?);

    let metrics = Arc::new(PipelineMetrics::new().context("registering metrics")?);

    let chat = OpenAiChat::from_settings(&settings.llm)
        .map(|chat| Arc::new(chat) as Arc<dyn ChatModel>);
    let budget = Arc::new(Budget::new(&settings.gate, Arc::new(SystemClock)));
    let broker = Arc::new(LlmBroker::new(chat, budget, Arc::clone(&metrics)));

    let engine = Arc::new(MappingEngine::new(store.clone(), Arc::clone(&broker)));

    let shutdown = CancellationToken::new();

    // subscription consumers
    let matcher_ctx = Arc::new(MatcherContext {
        bus: Arc::clone(&bus),
        store: store.clone(),
        broker: Arc::clone(&broker),
        metrics: Arc::clone(&metrics),
        dispatcher: WebhookDispatcher::new(DispatchConfig::default()),
    });
    let registry = Arc::new(ConsumerRegistry::new(matcher_ctx, shutdown.clone()));
    registry
        .bind_active()
        .await
        .context("binding subscription consumers")?;

    // map worker pool
    let mut worker_tasks = Vec::new();
    for index in 0..settings.map_workers {
        let worker = MapWorker::new(
            Arc::clone(&bus),
            store.clone(),
            Arc::clone(&engine),
            Arc::clone(&metrics),
            settings.event_logging_enabled,
        );
        let token = shutdown.child_token();
        worker_tasks.push(tokio::spawn(async move {
            if let Err(e) = worker.run(token).await {
                tracing::error!(worker = index, error = %e, "map worker exited with error");
            }
        }));
    }

    // HTTP surface: ingest + API on one listener
    let ingest_state = Arc::new(IngestState::new(
        Arc::clone(&bus),
        RateLimiter::new(
            Arc::clone(&rate_store) as Arc<dyn RateStore>,
            settings.rate_limit,
        ),
        SignatureVerifier::new(settings.secrets.clone()),
        settings.max_body_bytes,
        Arc::clone(&metrics),
    ));

    let app_state = AppState::new(
        store.clone(),
        Arc::clone(&bus),
        Arc::clone(&broker),
        Arc::clone(&registry),
        Arc::clone(&metrics),
        probes(Arc::clone(&bus), store.clone(), Arc::clone(&rate_store)),
    );

    let mut app = langhook_ingest::router(ingest_state).merge(langhook_api::router(app_state));
    if let Some(prefix) = &settings.server_path {
        app = Router::new().nest(prefix, app);
        info!(prefix = %prefix, "serving under path prefix");
    }

    let listener = TcpListener::bind(&settings.listen_addr)
        .await
        .with_context(|| format!("binding {}", settings.listen_addr))?;
    info!(address = %settings.listen_addr, "http server listening");

    // ctrl-c starts the drain
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            signal_token.cancel();
        }
    });

    let server = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(wait_cancelled(shutdown.clone()));

    server.await.context("http server")?;

    // HTTP is drained; stop broker consumers and wait out in-flight work
    info!("http drained, stopping workers");
    shutdown.cancel();
    registry.shutdown(SHUTDOWN_GRACE).await;
    for task in worker_tasks {
        if tokio::time::timeout(SHUTDOWN_GRACE, task).await.is_err() {
            warn!("map worker did not stop within the grace deadline");
        }
    }

    info!("langhook stopped");
    Ok(())
}

/// Create the streams the pipeline publishes to
async fn ensure_streams(bus: &dyn EventBus) -> Result<()> {
    bus.ensure_stream(StreamSpec::new(RAW_STREAM, ["raw.>"]))
        .await
        .context("ensuring raw stream")?;
    bus.ensure_stream(StreamSpec::new(EVENTS_STREAM, ["langhook.events.>"]))
        .await
        .context("ensuring events stream")?;
    bus.ensure_stream(StreamSpec::new(DLQ_STREAM, ["dlq.>"]))
        .await
        .context("ensuring dlq stream")?;
    Ok(())
}

/// On-demand reachability probes for /health
fn probes(bus: Arc<dyn EventBus>, store: Store, cache: Arc<RedisRateStore>) -> HealthProbes {
    let broker_probe: Probe = {
        let bus = Arc::clone(&bus);
        Arc::new(move || {
            let bus = Arc::clone(&bus);
            Box::pin(async move { bus.ping().await.is_ok() })
        })
    };
    let store_probe: Probe = {
        let store = store.clone();
        Arc::new(move || {
            let store = store.clone();
            Box::pin(async move { store.ping().await.is_ok() })
        })
    };
    let cache_probe: Probe = {
        let cache = Arc::clone(&cache);
        Arc::new(move || {
            let cache = Arc::clone(&cache);
            Box::pin(async move { cache.ping().await.is_ok() })
        })
    };

    HealthProbes {
        broker: broker_probe,
        store: store_probe,
        cache: cache_probe,
    }
}

async fn wait_cancelled(token: CancellationToken) {
    token.cancelled().await;
}
