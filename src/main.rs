use clap::Parser;
use std::sync::Arc;
use std::time::Duration;

use fluxgate::config::Config;
use fluxgate::handlers::AppState;
use fluxgate::health::HealthChecker;
use fluxgate::limiter::RateLimiter;
use fluxgate::metrics::NoopMetricsRecorder;
use fluxgate::provider::{MemoryRuleRepository, RuleSetProvider, YamlRuleRepository};
use fluxgate::reload::ReloadBus;
use fluxgate::reset::BucketResetHandler;
use fluxgate::server::Server;
use fluxgate::store::{LocalTokenBucketStore, RedisTokenBucketStore, TokenBucketStore};

/// FluxGate: distributed token-bucket rate limiting.
#[derive(Debug, Parser)]
#[command(name = "fluxgate", version = fluxgate::VERSION)]
struct Cli {
    /// Path to the config file (YAML/TOML, resolved by the `config` crate).
    #[arg(long, default_value = "fluxgate")]
    config: String,

    /// Overrides `bind_address` from the loaded config.
    #[arg(long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let mut config = Config::load(&cli.config)?;
    if let Some(bind) = cli.bind {
        config.bind_address = bind;
    }

    tracing::info!(store_url = %config.store_url, bind = %config.bind_address, "starting fluxgate");

    let store: Arc<dyn TokenBucketStore> = if config.store_url.is_empty() {
        let local = Arc::new(LocalTokenBucketStore::new());
        let sweep_store = Arc::clone(&local);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(60));
            loop {
                interval.tick().await;
                let removed = sweep_store.sweep_expired().await;
                if removed > 0 {
                    tracing::debug!(removed, "swept expired local buckets");
                }
            }
        });
        local
    } else if config.is_cluster() {
        Arc::new(RedisTokenBucketStore::cluster(config.store_nodes()).await?)
    } else {
        Arc::new(RedisTokenBucketStore::standalone(&config.store_url).await?)
    };

    let file_watch = config.rules_path.as_ref().map(|path| Arc::new(YamlRuleRepository::new(path)));

    let repository: Box<dyn fluxgate::provider::RuleRepository> = match &file_watch {
        Some(repo) => Box::new(repo.as_ref().clone()),
        None => Box::new(MemoryRuleRepository::new()),
    };
    let provider = Arc::new(RuleSetProvider::new(repository));

    let limiter = RateLimiter::with_policy(
        Arc::clone(&store),
        Arc::new(NoopMetricsRecorder),
        config.on_store_unavailable,
    );
    let health = HealthChecker::new(Arc::clone(&store));

    // PUBLISH/SUBSCRIBE and the version poll both work against any single
    // node of a cluster, so the reload protocol is wired up regardless of
    // topology. Only an empty store_url (no Redis at all) skips it.
    if !config.store_url.is_empty() {
        let seed_node = config.store_nodes()[0].clone();
        let reload_client = redis::Client::open(seed_node.as_str())?;
        let reload_bus = Arc::new(match &file_watch {
            Some(repo) => ReloadBus::with_file_watch(reload_client, config.poll_interval, Arc::clone(repo)),
            None => ReloadBus::new(reload_client, config.poll_interval),
        });
        let reset_handler = Arc::new(BucketResetHandler::new(Arc::clone(&store), Arc::clone(&provider)));
        reload_bus.subscribe(reset_handler);
    }

    let state = AppState {
        limiter,
        provider,
        health,
    };

    let server = Server::new(config.bind_address.clone(), state);
    server.run().await?;

    Ok(())
}
