use chatbi_suggest::{
    api::{build_router, AppState},
    behavior::{BehaviorStore, InMemoryBehaviorStore, RedisBehaviorStore},
    config::{BehaviorBackend, Config},
    embedding::EmbeddingProvider,
    lexical::IndexManager,
    oracle::{HttpOracleClient, Oracle},
    orchestrator::SuggestService,
    vector::{HnswVectorIndex, VectorSearch},
};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chatbi_suggest=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::load().unwrap_or_else(|e| {
        eprintln!("Failed to load configuration: {}", e);
        eprintln!("Using default configuration");
        Config::default()
    });

    if let Err(e) = config.search.validate() {
        tracing::error!("Invalid search configuration: {}", e);
        return Err(e.into());
    }

    tracing::info!("Starting ChatBI Suggest v{}", env!("CARGO_PKG_VERSION"));

    // Initialize Prometheus metrics
    if config.observability.prometheus_enabled {
        if let Err(e) = chatbi_suggest::metrics::init_metrics() {
            tracing::warn!("Failed to initialize metrics: {}", e);
            tracing::warn!("Continuing without metrics");
        } else {
            tracing::info!("✅ Prometheus metrics initialized");
        }
    }

    // Embedding provider (encoder loads lazily on first request)
    let embedding = Arc::new(EmbeddingProvider::new(config.embedder.clone()));
    tracing::info!(
        model = %config.embedder.model,
        dimension = config.embedder.dimension,
        "✅ Embedding provider initialized"
    );

    // Lexical index
    let lexical = Arc::new(IndexManager::new(&config.lexical)?);
    tracing::info!(
        path = %config.lexical.index_path.display(),
        docs = lexical.num_docs(),
        "✅ Lexical index opened"
    );

    // Vector index
    let vector: Arc<dyn VectorSearch> = Arc::new(HnswVectorIndex::new(config.embedder.dimension));
    tracing::info!("✅ Vector index initialized");

    // Behavior store (optional; the engine serves without personalization)
    let behavior: Option<Arc<dyn BehaviorStore>> = if config.behavior.enabled {
        match config.behavior.backend {
            BehaviorBackend::Memory => {
                tracing::info!("✅ Behavior store initialized (in-memory)");
                Some(Arc::new(InMemoryBehaviorStore::new(&config.behavior)))
            }
            BehaviorBackend::Redis => {
                let url = config.behavior.redis_url.clone().unwrap_or_default();
                match RedisBehaviorStore::new(&url, &config.behavior).await {
                    Ok(store) => {
                        tracing::info!("✅ Behavior store initialized (redis)");
                        Some(Arc::new(store))
                    }
                    Err(e) => {
                        tracing::warn!("⚠️  Behavior store unavailable: {}", e);
                        tracing::warn!("   Continuing without personalization");
                        None
                    }
                }
            }
        }
    } else {
        tracing::info!("⚠️  Behavior tracking disabled in configuration");
        None
    };

    // Oracle (optional; every failure degrades to empty results)
    let oracle: Option<Arc<dyn Oracle>> = if config.oracle.enabled {
        match HttpOracleClient::new(config.oracle.clone()) {
            Ok(client) => {
                if client.is_available() {
                    tracing::info!(model = %config.oracle.model, "✅ Oracle client initialized");
                } else {
                    tracing::warn!("⚠️  Oracle enabled but not available (missing API key)");
                }
                Some(Arc::new(client))
            }
            Err(e) => {
                tracing::warn!("⚠️  Oracle initialization failed: {}", e);
                None
            }
        }
    } else {
        None
    };

    // Orchestrator
    let service = Arc::new(SuggestService::new(
        config.clone(),
        embedding,
        lexical,
        vector,
        behavior,
        oracle,
    ));
    tracing::info!("✅ Suggestion service initialized");

    // HTTP server
    let app = build_router(AppState::new(service));
    let addr = format!("{}:{}", config.server.host, config.server.http_port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("🚀 HTTP API server listening on http://{}", addr);
    tracing::info!("   Health check: http://{}/api/v1/health", addr);
    tracing::info!("   Autocomplete: http://{}/api/v1/autocomplete", addr);

    let server = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!("HTTP server error: {}", e);
        }
    });

    tokio::select! {
        _ = server => {
            tracing::warn!("HTTP server stopped");
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
        }
    }

    tracing::info!("Shutting down gracefully...");
    Ok(())
}
