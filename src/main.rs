use std::path::Path;
use std::sync::Arc;

use convo_flow::cli::{ChatExit, run_chat};
use convo_flow::collab::llm::GeneratorConfig;
use convo_flow::collab::{LlmEvaluator, LlmGenerator};
use convo_flow::config::{AppConfig, SessionConfig};
use convo_flow::flow::{FlowDefinition, FlowRegistry, defaults, loader};
use convo_flow::llm::{LlmConfig, create_provider};
use convo_flow::routes::flow_routes;
use convo_flow::session::SessionManager;

const USAGE: &str = "Usage: convo-flow [chat | serve | flows | export <dir>]";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = args.first().map(String::as_str).unwrap_or("chat");
    let app_config = AppConfig::from_env()?;

    match command {
        "flows" => list_flows(&app_config).await,
        "export" => {
            let Some(dir) = args.get(1) else {
                eprintln!("{USAGE}");
                std::process::exit(2);
            };
            export_defaults(Path::new(dir)).await
        }
        "chat" | "serve" => run(&app_config, command == "serve").await,
        _ => {
            eprintln!("{USAGE}");
            std::process::exit(2);
        }
    }
}

async fn run(app_config: &AppConfig, serve_only: bool) -> anyhow::Result<()> {
    // ── Flows ────────────────────────────────────────────────────────────
    let registry = match app_config.flow_dir {
        Some(ref dir) => loader::load_dir(dir).await?,
        None => FlowRegistry::with_defaults()?,
    };
    let registry = Arc::new(registry);

    // ── LLM ──────────────────────────────────────────────────────────────
    let llm_config = LlmConfig::from_env().unwrap_or_else(|e| {
        eprintln!("Error: {e}");
        eprintln!("  export ANTHROPIC_API_KEY=sk-ant-...");
        eprintln!("  (or FLOW_LLM_BACKEND=openai with OPENAI_API_KEY,");
        eprintln!("   or FLOW_LLM_BACKEND=mistral with MISTRAL_API_KEY)");
        std::process::exit(1);
    });
    let llm = create_provider(&llm_config)?;

    // ── Sessions ─────────────────────────────────────────────────────────
    let session_config = SessionConfig::from_env()?;
    let manager = Arc::new(SessionManager::new(
        Arc::clone(&registry),
        Arc::new(LlmGenerator::new(Arc::clone(&llm), GeneratorConfig::default())),
        Arc::new(LlmEvaluator::new(Arc::clone(&llm))),
        session_config,
    ));

    eprintln!("🧭 Convo Flow v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Model: {}", llm.model_name());
    eprintln!("   Flows: {}", registry.len());

    // ── HTTP ─────────────────────────────────────────────────────────────
    let http_port = match (app_config.http_port, serve_only) {
        (Some(port), _) => Some(port),
        (None, true) => Some(8080),
        (None, false) => None,
    };
    let server = match http_port {
        Some(port) => {
            let app = flow_routes(Arc::clone(&manager));
            let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
            eprintln!("   HTTP API: http://0.0.0.0:{}/api/flows", port);
            Some(tokio::spawn(async move {
                if let Err(e) = axum::serve(listener, app).await {
                    tracing::error!("HTTP server error: {}", e);
                }
            }))
        }
        None => None,
    };

    if serve_only {
        if let Some(server) = server {
            server.await?;
        }
        return Ok(());
    }

    // ── Chat ─────────────────────────────────────────────────────────────
    eprintln!("   Flow: {}", app_config.cli_flow_id);
    eprintln!("   Type a message and press Enter. /status for progress, /quit to exit.\n");

    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let mut stdout = std::io::stdout();
    let exit = run_chat(&manager, &app_config.cli_flow_id, stdin, &mut stdout).await?;
    tracing::info!(exit = ?exit, "Chat ended");

    // Keep serving HTTP after the chat if a port was configured.
    if exit != ChatExit::Quit {
        if let Some(server) = server {
            server.await?;
        }
    }
    Ok(())
}

async fn list_flows(app_config: &AppConfig) -> anyhow::Result<()> {
    let summaries = match app_config.flow_dir {
        Some(ref dir) => loader::list_flow_files(dir).await,
        None => FlowRegistry::with_defaults()?.list(),
    };
    for summary in summaries {
        println!("{:<24} {} - {}", summary.flow_id, summary.name, summary.description);
    }
    Ok(())
}

async fn export_defaults(dir: &Path) -> anyhow::Result<()> {
    for config in defaults::default_flows() {
        let definition = FlowDefinition::from_config(config)?;
        let path = loader::save_flow(dir, &definition).await?;
        println!("{}", path.display());
    }
    Ok(())
}
