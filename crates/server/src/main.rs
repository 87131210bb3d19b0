//! DSA Copilot Server
//!
//! Axum server exposing the compliance agents over HTTP, blocking or
//! as server-sent event streams, plus a CLI that runs one agent and prints
//! its events as JSON lines.

mod api;
mod config;
mod transport;

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use copilot_core::skills::artifact_registry::{CompanyProfile, ResearchReport};
use copilot_core::skills::{ChatRequest, MatchRequest};
use copilot_core::swarm::{AgentRequest, Coordinator, StreamEvent};
use futures::StreamExt;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use crate::config::PersistedConfig;
use crate::transport::SessionRegistry;

/// Application state
#[derive(Clone)]
pub struct AppState {
    pub coordinator: Coordinator,
    pub sessions: SessionRegistry,
}

#[derive(Parser, Clone)]
#[command(author, version, about = "DSA Copilot - Digital Services Act compliance agents")]
struct Args {
    #[command(subcommand)]
    command: Option<CliCommand>,
}

#[derive(Subcommand, Clone)]
enum CliCommand {
    /// Start the HTTP server (default)
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "8001")]
        port: u16,
    },
    /// Resolve a company name to its legal entity
    Match {
        /// Company name as entered by the user
        name: String,
        /// Country of establishment
        #[arg(short, long)]
        country: String,
    },
    /// Research a company against the question table
    Research {
        /// Company name
        name: String,
    },
    /// Classify a company profile (JSON file) and analyze its obligations
    Classify {
        /// Path to a `{company_name, facts}` profile or a saved research report
        profile: PathBuf,
    },
    /// Ask the DSA assistant a question
    Chat {
        message: String,
        /// What the user is looking at, passed to the assistant as context
        #[arg(long)]
        context: Option<String>,
    },
}

async fn build_coordinator() -> anyhow::Result<Coordinator> {
    let mut persisted = PersistedConfig::load().await;
    persisted.apply_env(|name| std::env::var(name).ok())?;
    let config = persisted.to_coordinator_config()?;
    Ok(Coordinator::from_config(config).await?)
}

pub async fn run_server(coordinator: Coordinator, port: u16) -> anyhow::Result<()> {
    let state = AppState {
        coordinator,
        sessions: SessionRegistry::new(),
    };
    let app = api::router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("DSA Copilot server listening on http://{}", addr);
    tracing::info!("agents: /agents/company_matcher, /agents/company_researcher, /agents/service_categorizer, /agents/main_agent (+ /stream)");
    tracing::info!("api: /api/v1/sessions, /api/v1/config, /api/v1/openapi.json");

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Run one session, printing every event as a JSON line. Ctrl-C cancels it.
async fn run_cli(coordinator: Coordinator, request: AgentRequest) -> anyhow::Result<()> {
    request.validate()?;
    let (session, events) = coordinator.start(request);
    let guard = SessionRegistry::new().register(session);

    let cancel_on_interrupt = {
        let session = guard.session().clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!(session = %session.id, "interrupted, cancelling");
                session.cancel();
            }
        })
    };

    let mut failed = None;
    let mut records = Box::pin(transport::records(events, guard));
    while let Some(event) = records.next().await {
        println!("{}", event.to_json());
        if let StreamEvent::Error { message } = &event {
            failed = Some(message.clone());
        }
    }
    cancel_on_interrupt.abort();

    match failed {
        Some(message) => anyhow::bail!("session failed: {}", message),
        None => Ok(()),
    }
}

/// A profile file, or the `result` payload of a research run
async fn read_profile(path: &Path) -> anyhow::Result<CompanyProfile> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("cannot read {}", path.display()))?;
    parse_profile(&raw).with_context(|| format!("{} is not a company profile", path.display()))
}

fn parse_profile(raw: &str) -> anyhow::Result<CompanyProfile> {
    let value: serde_json::Value = serde_json::from_str(raw)?;
    if value.get("answers").is_some() {
        let report: ResearchReport = serde_json::from_value(value)?;
        return Ok(report.profile());
    }
    Ok(serde_json::from_value(value)?)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    // Logs go to stderr so CLI runs keep stdout for events
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let coordinator = build_coordinator().await?;

    match args.command.unwrap_or(CliCommand::Serve { port: 8001 }) {
        CliCommand::Serve { port } => run_server(coordinator, port).await,
        CliCommand::Match { name, country } => {
            let request = AgentRequest::MatchCompany(MatchRequest {
                company_name: name,
                country_of_establishment: country,
            });
            run_cli(coordinator, request).await
        }
        CliCommand::Research { name } => {
            run_cli(coordinator, AgentRequest::ResearchCompany { company_name: name }).await
        }
        CliCommand::Classify { profile } => {
            let company_profile = read_profile(&profile).await?;
            run_cli(coordinator, AgentRequest::Classify { company_profile }).await
        }
        CliCommand::Chat { message, context } => {
            let request = AgentRequest::Chat(ChatRequest {
                message,
                frontend_context: context,
            });
            run_cli(coordinator, request).await
        }
    }
}
