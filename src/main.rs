use clap::{Parser, Subcommand};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

mod agent;
mod client;
mod error;
mod ingest;
mod models;
mod reconstruct;
mod relay;
mod retrieval;
mod server;
mod session;
mod settings;
mod sse;
mod timeline;

use settings::{resolve_settings, ModelParams, SettingsLayer};

#[derive(Debug, Parser)]
#[command(name = "docs_assistant")]
#[command(about = "Documentation chat assistant with streamed answers", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Serve the chat endpoint.
    Start {
        #[arg(long, default_value = "127.0.0.1:7171")]
        listen: String,
        #[arg(long)]
        model: Option<String>,
        #[arg(long)]
        max_tokens: Option<u32>,
        /// 0 disables extended thinking.
        #[arg(long)]
        thinking_budget: Option<u32>,
        #[arg(long)]
        search_base_url: Option<String>,
        #[arg(long)]
        docs_site_url: Option<String>,
        #[arg(long)]
        max_steps: Option<usize>,
    },
    /// Ask a running server one question and print the answer.
    Ask {
        #[arg(long, default_value = "http://127.0.0.1:7171")]
        server: String,
        question: Vec<String>,
    },
    /// Build the JSONL tables the search engines index.
    Load {
        /// Directory of .md/.mdx documentation pages.
        #[arg(long)]
        docs_dir: Option<PathBuf>,
        #[arg(long, default_value = "data/shaped_documentation.jsonl")]
        docs_out: PathBuf,
        /// Single markdown file with the API reference.
        #[arg(long)]
        api_file: Option<PathBuf>,
        #[arg(long, default_value = "data/api_docs_chunked.jsonl")]
        api_out: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Start {
            listen,
            model,
            max_tokens,
            thinking_budget,
            search_base_url,
            docs_site_url,
            max_steps,
        } => {
            let addr: SocketAddr = listen.parse()?;
            let params = ModelParams { model, max_tokens, thinking_budget };
            let cli_layer = SettingsLayer {
                model_params: (params != ModelParams::default()).then_some(params),
                search_base_url,
                docs_site_url,
                max_steps,
                ..Default::default()
            };
            let settings = resolve_settings(&SettingsLayer::from_env(), &cli_layer)?;
            info!(settings = %serde_json::to_string(&settings)?, "resolved settings");

            let metrics = PrometheusBuilder::new().install_recorder()?;
            let state = server::AppState::new(settings, Some(metrics));
            server::serve(addr, state).await?;
        }
        Commands::Ask { server, question } => {
            let question = question.join(" ");
            if question.trim().is_empty() {
                anyhow::bail!("a question is required");
            }
            let history = vec![session::ConversationMessage::user(question.clone())];
            let mut timeline = timeline::Timeline::new();
            timeline.push(timeline::DisplayRecord::User { content: question });

            let chat = client::ChatClient::new(&server);
            tokio::select! {
                res = chat.ask(&history, timeline, |_| {}) => {
                    let timeline = match res {
                        Ok((timeline, outcome)) => client::conclude(timeline, &outcome),
                        Err(e) => {
                            tracing::error!(error = %e, "chat request failed");
                            let mut t = timeline::Timeline::new();
                            t.push(timeline::DisplayRecord::Assistant { content: client::APOLOGY.into() });
                            t
                        }
                    };
                    println!("{}", client::render(&timeline));
                }
                _ = tokio::signal::ctrl_c() => {}
            }
        }
        Commands::Load { docs_dir, docs_out, api_file, api_out } => {
            if docs_dir.is_none() && api_file.is_none() {
                anyhow::bail!("nothing to load: pass --docs-dir and/or --api-file");
            }
            if let Some(dir) = docs_dir {
                let summary = ingest::load_documentation(&dir, &docs_out)?;
                println!(
                    "{}: {} chunks from {} files ({} failed)",
                    docs_out.display(),
                    summary.chunks,
                    summary.files,
                    summary.failed
                );
            }
            if let Some(file) = api_file {
                let summary = ingest::load_api_docs(&file, &api_out)?;
                println!("{}: {} chunks", api_out.display(), summary.chunks);
            }
        }
    }
    Ok(())
}
