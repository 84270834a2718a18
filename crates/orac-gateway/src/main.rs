//! ORAC Core: voice-command orchestration between an STT front-end and
//! home-automation backends.

use clap::Parser;
use orac_backends::{AdapterRegistry, MappingStore};
use orac_core::CoreConfig;
use orac_gateway::state::AppState;
use orac_llm::{Favorites, LlamaSupervisor, ModelCatalog, SupervisorConfig};
use orac_pipeline::{
    CommandHistory, GenerationPipeline, LastCommandStore, PerformanceLog, PipelineDeps,
    SttResponseCache, TopicRegistry,
};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::info;
use tracing_subscriber::EnvFilter;

const DEFAULT_MODEL: &str = "Qwen3-0.6B-Q4_K_M.gguf";

#[derive(Parser, Debug)]
#[command(name = "orac", about = "ORAC Core voice-command orchestrator")]
struct Args {
    /// Root for backends, grammars, topics, caches and the performance log.
    #[arg(long, env = "ORAC_DATA_DIR", default_value = "./data")]
    data_dir: PathBuf,

    /// Directory containing gguf model files.
    #[arg(long, env = "ORAC_MODELS_DIR", default_value = "./models")]
    models_dir: PathBuf,

    /// Path to the llama-server binary.
    #[arg(long, env = "ORAC_LLAMA_SERVER", default_value = "llama-server")]
    llama_server: PathBuf,

    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    #[arg(long, env = "ORAC_PORT", default_value_t = 8000)]
    port: u16,

    /// Maximum STT-response cache entries before LRU eviction.
    #[arg(long, default_value_t = 500)]
    cache_size: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();
    let config = Arc::new(CoreConfig::new(
        args.data_dir,
        args.models_dir,
        args.llama_server,
    ));
    config.ensure_dirs().await?;
    info!(data_dir = %config.data_dir.display(), "data directory ready");

    let store = Arc::new(MappingStore::load(config.backends_dir()).await?);
    let adapters = Arc::new(AdapterRegistry::new(store.clone(), config.grammars_dir()));
    let topics = Arc::new(
        TopicRegistry::load(config.topics_file(), DEFAULT_MODEL.to_string()).await?,
    );
    let cache = Arc::new(SttResponseCache::load(args.cache_size, config.cache_file()).await);
    let catalog = Arc::new(ModelCatalog::load_or_seed(&config.model_configs_file()).await?);
    let favorites = Favorites::load_or_seed(&config.favorites_file()).await?;

    let supervisor = Arc::new(LlamaSupervisor::new(SupervisorConfig::new(
        config.llama_server_bin.clone(),
        config.models_dir.clone(),
    )));

    let last_command = Arc::new(LastCommandStore::new());
    let history = Arc::new(Mutex::new(CommandHistory::new(100)));
    let perf_log = Arc::new(PerformanceLog::new(config.performance_log()));

    let pipeline = GenerationPipeline::new(PipelineDeps {
        config: config.clone(),
        topics: topics.clone(),
        store: store.clone(),
        adapters: adapters.clone(),
        engine: supervisor.clone(),
        cache: cache.clone(),
        last_command: last_command.clone(),
        history: history.clone(),
        catalog: catalog.clone(),
    });

    // Warm the default model in the background; first requests shouldn't
    // pay the model-load cost when a default is configured.
    {
        let supervisor = supervisor.clone();
        let grammars_dir = config.grammars_dir();
        tokio::spawn(async move {
            supervisor.preload_default(&favorites, &grammars_dir).await;
        });
    }

    let state = Arc::new(AppState {
        config,
        store,
        adapters,
        topics,
        cache,
        pipeline,
        supervisor,
        last_command,
        history,
        perf_log,
        catalog,
        started_at: Instant::now(),
    });

    let bind_addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;
    orac_gateway::server::serve(state, bind_addr).await
}
