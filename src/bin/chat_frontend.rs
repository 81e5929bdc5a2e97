//! Chat front end for the copywriter agent service

use std::net::SocketAddr;
use std::process::ExitCode;

use clap::Parser;
use copywriter_agent::config::{load_dotenv, FrontendConfig};
use copywriter_agent::frontend::{create_router, FrontendState};
use copywriter_agent::tracing as telemetry;
use tracing::{error, info, warn};

#[derive(Debug, Parser)]
#[command(name = "copywriter-chat", version, about = "Browser chat for the copywriter agent")]
struct Args {
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    host: String,

    #[arg(long, env = "PORT", default_value_t = 8501)]
    port: u16,
}

#[tokio::main]
async fn main() -> ExitCode {
    load_dotenv();
    let args = Args::parse();

    let config = match FrontendConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = telemetry::init_tracing("copywriter-chat", None, config.log_format) {
        eprintln!("failed to initialize tracing: {}", e);
        return ExitCode::FAILURE;
    }

    match serve(args, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Chat front end stopped with an error");
            ExitCode::FAILURE
        }
    }
}

async fn serve(args: Args, config: FrontendConfig) -> Result<(), Box<dyn std::error::Error>> {
    let addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, api = %config.api_base_url, user_id = %config.user_id, "Chat front end listening");

    let app = create_router(FrontendState { config });
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
        })
        .await?;
    Ok(())
}
