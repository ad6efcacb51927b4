use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use dotenvy::dotenv;
use tokio::sync::broadcast;
use tracing::info;
use tracing_subscriber::EnvFilter;

use overlook::config::Config;
use overlook::model::OpenAiClient;
use overlook::server::{AgentEvent, AppState, router};
use overlook::session::SessionClient;

#[derive(Parser, Debug)]
#[command(about = "LLM-driven browser agent with an overseer verification pass")]
struct Args {
    /// Port to listen on; falls back to the next free port up to +9.
    #[arg(long, default_value_t = 3000)]
    port: u16,

    /// Override the per-command step budget.
    #[arg(long)]
    max_steps: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("overlook=info")),
        )
        .init();

    let args = Args::parse();
    let mut config = Config::from_env()?;
    if let Some(max_steps) = args.max_steps {
        config.max_steps = max_steps;
    }

    let model = Arc::new(OpenAiClient::new(
        config.openai_api_key.clone(),
        config.model.clone(),
    ));
    let sessions = SessionClient::new(&config);
    let (events, _) = broadcast::channel::<AgentEvent>(64);

    let state = Arc::new(AppState {
        config,
        model,
        sessions,
        events,
    });
    let app = router(state);

    // Try the requested port, fall back to the next nine if in use.
    let mut listener = None;
    let mut port = args.port;
    for p in args.port..args.port.saturating_add(10) {
        match tokio::net::TcpListener::bind(format!("127.0.0.1:{p}")).await {
            Ok(l) => {
                listener = Some(l);
                port = p;
                break;
            }
            Err(_) => continue,
        }
    }
    let listener = listener.ok_or_else(|| {
        anyhow::anyhow!(
            "could not bind any port between {} and {}",
            args.port,
            args.port.saturating_add(9)
        )
    })?;

    info!("listening on http://localhost:{port}");
    axum::serve(listener, app).await?;
    Ok(())
}
