mod dom;
mod face;
mod hands;

use anyhow::Result;
use clap::Parser;
use dotenvy::dotenv;
use phantom_agent::{
    ActionProtocol, DecisionService, DiagnosticLog, GeminiClient, MissionEngine, Settings,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Browser agent: console decisions, plan generation and phantom missions over HTTP.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// First port to try for the API server
    #[arg(long, default_value_t = 3000)]
    port: u16,

    /// Run Chrome without a window when launching a new instance
    #[arg(long)]
    headless: bool,

    /// DevTools URL of a running Chrome to attach to
    #[arg(long, default_value = "http://127.0.0.1:9222")]
    attach: String,

    /// Chrome profile directory for launched instances
    #[arg(long)]
    profile_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let settings = Settings::from_env()?;
    info!(model = %settings.model, "starting browser agent");

    // Launch browser in a blocking task (it can take a while)
    let launch = hands::LaunchConfig {
        attach_url: args.attach,
        headless: args.headless,
        profile_dir: args.profile_dir,
    };
    let chrome = tokio::task::spawn_blocking(move || hands::ChromeBrowser::launch(&launch))
        .await
        .map_err(|e| anyhow::anyhow!("Browser launch panicked: {}", e))??;

    let decisions: Arc<dyn DecisionService> = Arc::new(GeminiClient::new(settings));
    let protocol = ActionProtocol::new(decisions.clone(), Arc::new(chrome.active_page()));
    let engine = MissionEngine::new(Arc::new(chrome.sessions()), decisions);

    let state = face::AppState::new(protocol, engine, DiagnosticLog::new());
    let port = face::start_server(state, args.port).await?;
    info!("API running at http://localhost:{}", port);

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    drop(chrome);
    Ok(())
}
