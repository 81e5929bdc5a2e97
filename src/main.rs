//! Copywriter agent service
//!
//! Wires configuration, the LLM client, the tools and the session store into
//! one [`Agent`] and serves the HTTP API.

use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use copywriter_agent::agent::{Agent, AgentSettings, SessionStore};
use copywriter_agent::config::{load_dotenv, ServiceConfig};
use copywriter_agent::llm::OpenAiClient;
use copywriter_agent::server::{create_router, AppState};
use copywriter_agent::tools::transcriptions::{register_library_tools, LibraryError, TranscriptLibrary};
use copywriter_agent::tools::web_search::{TavilyClient, WebSearchTool};
use copywriter_agent::tools::Toolbox;
use copywriter_agent::{metrics, tracing as telemetry};
use tracing::{error, info, warn};

const SERVICE_NAME: &str = "copywriter-agent";

#[derive(Debug, Parser)]
#[command(name = "copywriter-agent", version, about = "Copywriting assistant agent service")]
struct Args {
    /// Address to bind
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    host: String,

    /// Port to listen on
    #[arg(long, env = "PORT", default_value_t = 8000)]
    port: u16,
}

#[tokio::main]
async fn main() -> ExitCode {
    load_dotenv();
    let args = Args::parse();

    let config = match ServiceConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = telemetry::init_tracing(
        SERVICE_NAME,
        config.otlp_endpoint.as_deref(),
        config.log_format,
    ) {
        eprintln!("failed to initialize tracing: {}", e);
        return ExitCode::FAILURE;
    }

    let result = run(args, config).await;
    telemetry::shutdown_tracing();

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Agent service stopped with an error");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args, config: ServiceConfig) -> Result<(), Box<dyn std::error::Error>> {
    let system_prompt = config.read_system_prompt()?;
    metrics::register_metrics();

    let store = SessionStore::connect(&config.database_url).await?;
    info!("Session store ready");

    let model = OpenAiClient::new(&config.openai_base_url, &config.openai_api_key)?
        .with_service_tier(config.service_tier.clone());

    let mut toolbox = Toolbox::new();
    let search = TavilyClient::new(&config.tavily_base_url, &config.tavily_api_key)?;
    toolbox.register(WebSearchTool::new(search, config.search_max_results));

    match TranscriptLibrary::load(&config.transcriptions_path) {
        Ok(library) => {
            info!(
                path = %config.transcriptions_path.display(),
                creators = library.creators().len(),
                "Loaded transcription library"
            );
            register_library_tools(&mut toolbox, Arc::new(library));
        }
        Err(LibraryError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!(
                path = %config.transcriptions_path.display(),
                "Transcription library not found, creator tools disabled"
            );
        }
        Err(e) => return Err(e.into()),
    }

    let settings = AgentSettings {
        model: config.model.clone(),
        system_prompt,
        history_runs: config.history_runs,
        max_tool_rounds: config.max_tool_rounds,
        user_memories: config.user_memories,
        ..AgentSettings::default()
    };
    let agent = Agent::new(settings, Arc::new(model), toolbox, store.clone());
    let agent_info = agent.info();

    let app = create_router(AppState::new(agent, store, config.default_user_id.as_str()));

    let addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(
        %addr,
        agent_id = %agent_info.id,
        model = %agent_info.model,
        tools = ?agent_info.tools,
        "Agent service listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Agent service stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
