//! Main server entrypoint: loads configuration, wires every pipeline
//! component together, and serves the HTTP API until shutdown.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use sentrymux::cache::{ClassificationCache, L2Cache};
use sentrymux::classifier::Classifier;
use sentrymux::config::AppConfig;
use sentrymux::error::{AppError, AppResult};
use sentrymux::grouping::GroupManager;
use sentrymux::inhibition::{ActiveAlertCache, InhibitionEngine};
use sentrymux::llm::LlmClient;
use sentrymux::matcher::RegexCache;
use sentrymux::model::InhibitionRule;
use sentrymux::processor::{run_group_flush_loop, AsyncProcessor};
use sentrymux::publisher::{Publisher, TargetRegistry};
use sentrymux::routing::RoutingConfig;
use sentrymux::silence::SilenceEngine;
use sentrymux::store::AlertStore;

#[derive(Parser, Debug)]
#[command(name = "sentrymux-server", about = "Alert ingestion and fanout server")]
struct Args {
    #[arg(long, env = "SENTRYMUX_CONFIG", default_value = "config.yaml")]
    config: String,
    #[arg(long, env = "SENTRYMUX_ROUTING", default_value = "routing.yaml")]
    routing: String,
    #[arg(long, env = "SENTRYMUX_TARGETS", default_value = "targets.yaml")]
    targets: String,
}

#[tokio::main]
async fn main() -> AppResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .json()
        .init();

    let args = Args::parse();
    tracing::info!(config = %args.config, "starting sentrymux");

    let config_raw = std::fs::read_to_string(&args.config)?;
    let config = AppConfig::from_yaml(&config_raw)?;

    let routing_raw = std::fs::read_to_string(&args.routing)?;
    let routing = Arc::new(RoutingConfig::parse(&routing_raw)?);

    let targets_raw = std::fs::read_to_string(&args.targets).unwrap_or_default();
    let targets: Vec<sentrymux::model::PublishingTarget> = if targets_raw.trim().is_empty() {
        Vec::new()
    } else {
        serde_yaml::from_str(&targets_raw)?
    };

    let store = Arc::new(AlertStore::connect(&config.database_url).await?);

    let l2 = match &config.cache.redis_url {
        Some(url) => Some(L2Cache::connect(url).await?),
        None => None,
    };
    let cache = Arc::new(ClassificationCache::new(config.cache.l1_capacity, l2));
    cache.rebuild_l1().await;
    let llm = Arc::new(LlmClient::new(config.llm.clone()));
    let classifier = Arc::new(Classifier::new(cache, llm, config.cache.l2_ttl.into()));

    let regex_cache = Arc::new(RegexCache::default());
    let active_alerts = Arc::new(ActiveAlertCache::default());

    let inhibit_rules: Vec<InhibitionRule> = routing
        .inhibit_rules
        .iter()
        .map(|r| InhibitionRule {
            source_matchers: r.source_matchers.clone(),
            target_matchers: r.target_matchers.clone(),
            equal: r.equal.clone(),
        })
        .collect::<Vec<_>>();
    let inhibition = Arc::new(InhibitionEngine::new(inhibit_rules, active_alerts.clone(), regex_cache.clone()));

    let silences = Arc::new(SilenceEngine::new(regex_cache.clone()));
    silences.load(store.list_silences().await?);

    let groups = Arc::new(GroupManager::new(config.processor.max_groups));
    let registry = Arc::new(TargetRegistry::new(targets));
    let publisher = Arc::new(Publisher::new(config.publisher.clone(), registry.clone()));

    let processor = AsyncProcessor::spawn(
        config.processor.clone(),
        store.clone(),
        classifier,
        routing,
        regex_cache,
        groups.clone(),
        silences.clone(),
        inhibition,
    );

    tokio::spawn(run_group_flush_loop(
        groups,
        store.clone(),
        publisher,
        Duration::from_secs(1),
    ));

    {
        let store = store.clone();
        let retention = (config.alert_retention_days, config.silence_retention_days);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(3600));
            loop {
                ticker.tick().await;
                match store.cleanup(retention.0, retention.1).await {
                    Ok(deleted) => tracing::info!(deleted, "periodic cleanup finished"),
                    Err(err) => tracing::warn!(error = %err, "periodic cleanup failed"),
                }
            }
        });
    }

    {
        let silences = silences.clone();
        let retention_days = config.silence_retention_days;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(30));
            loop {
                ticker.tick().await;
                silences.sweep_expired(chrono::Duration::days(retention_days));
            }
        });
    }

    {
        let registry = registry.clone();
        let health_http = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .expect("reqwest client builder never fails with these options");
        let interval = Duration::from(config.target_health_check_interval);
        tokio::spawn(async move {
            registry.health_check_all(&health_http).await;
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                registry.health_check_all(&health_http).await;
            }
        });
    }

    let state = Arc::new(sentrymux::web::AppState {
        config: config.clone(),
        processor,
        silences,
        store,
        started_at: std::time::Instant::now(),
    });

    let app = sentrymux::web::router(state);
    let addr: std::net::SocketAddr = config
        .listen_addr
        .parse()
        .map_err(|e| AppError::config("parse_listen_addr", format!("{e}")))?;

    tracing::info!(%addr, "listening");
    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .await?;

    Ok(())
}
