use postgen_config::AppConfig;
use postgen_observability::{info, init_tracing, warn, TracingConfig};
use postgen_utils::CacheManager;

use post_generator::{build_state, router};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    if let Err(e) = init_tracing(TracingConfig::for_service("post-generator").json()) {
        eprintln!("tracing already initialised: {}", e);
    }

    let config = AppConfig::from_env();
    let addr = format!("{}:{}", config.server.host, config.server.port);
    info!("🚀 [Post Generator] Starting on {}", addr);

    let state = build_state(config)?;

    let sweep_interval = state.config.cache.sweep_interval();
    CacheManager::spawn_sweeper(&state.cache, sweep_interval);
    CacheManager::spawn_sweeper(&state.api_cache, sweep_interval);
    info!("🧹 Cache sweepers running every {:?}", sweep_interval);

    if !state.config.feature_toggles.remote_generation_enabled() {
        warn!("⚠️  Remote generation disabled, posts use the template generator");
    }

    let app = router(state);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("✅ Post Generator listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
