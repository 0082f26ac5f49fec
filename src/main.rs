use claude_relay::gateway::{listen, routes};
use claude_relay::{
    ClaudeMessagesStage, CookieReauthenticator, Pipeline, PrefixAffinityCache, RelayConfig,
    RelayState,
};
use std::sync::Arc;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const CONFIG_PATH_ENV: &str = "CLAUDE_RELAY_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "claude-relay.toml";

fn init_tracing(config: &RelayConfig) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    match config.log_directory.as_deref() {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "claude-relay.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer())
                .with(fmt::layer().with_ansi(false).with_writer(writer))
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer())
                .init();
            None
        }
    }
}

fn install_panic_hook() {
    // Any panic must land in the logs for post-mortem diagnosis. The payload
    // is intentionally not logged to avoid leaking request data.
    std::panic::set_hook(Box::new(|panic_info| {
        let location = panic_info
            .location()
            .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column()))
            .unwrap_or_else(|| "unknown".to_string());
        tracing::error!(location = %location, "PANIC: relay panicked at {location}");
    }));
}

#[tokio::main]
async fn main() {
    let config_path =
        std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let config = match RelayConfig::load(&config_path) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("failed to load config from {config_path}: {err}");
            std::process::exit(1);
        }
    };

    let _log_guard = init_tracing(&config);
    install_panic_hook();

    if config.accounts.is_empty() {
        tracing::warn!(
            config_path = %config_path,
            "no accounts configured; every request will be deferred"
        );
    }

    let pool = Arc::new(claude_relay::AccountPool::new());
    for account in config.accounts.iter().cloned() {
        pool.register(account.into());
    }
    tracing::info!(accounts = pool.len(), "account pool ready");

    let affinity = Arc::new(PrefixAffinityCache::new(config.affinity_ttl_seconds));
    let reauth = Arc::new(CookieReauthenticator::new());

    let stage = ClaudeMessagesStage::new(&config, Arc::clone(&pool), affinity, reauth);
    let pipeline = Arc::new(Pipeline::new().with_stage(stage));
    let router = routes::build_router(RelayState { pipeline });

    let default_port = claude_relay::config::DEFAULT_LISTEN_ADDRESS
        .rsplit(':')
        .next()
        .and_then(|p| p.parse().ok())
        .unwrap_or(37821);
    let address = match listen::parse_listen_address(&config.listen_address, default_port) {
        Ok(address) => address,
        Err(err) => {
            tracing::error!("invalid listen_address {:?}: {}", config.listen_address, err);
            std::process::exit(1);
        }
    };

    if let Err(err) = listen::serve(&address, router).await {
        tracing::error!("{}", err);
        std::process::exit(1);
    }
}
