use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use news_pipeline::{NewsPipeline, PipelineConfig};
use serde::Serialize;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "news-pipeline", about = "Aggregate news, generate drafts and review them")]
struct Cli {
    /// TOML configuration file. Built-in defaults are used when omitted.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Fetch every configured source into the article store
    Aggregate,
    /// Generate articles and posts from recent articles
    Generate {
        /// Categories to generate for; all configured ones when empty
        categories: Vec<String>,
    },
    /// Aggregate, then generate for every category
    Run,
    /// List content awaiting review
    Pending,
    Approve {
        id: i64,
        #[arg(short, long)]
        feedback: Option<String>,
    },
    Reject {
        id: i64,
        #[arg(short, long)]
        feedback: Option<String>,
    },
    /// Replace the reviewed text of an artifact, keeping the original
    Edit {
        id: i64,
        #[arg(short, long)]
        body: String,
        #[arg(short, long)]
        feedback: Option<String>,
    },
    /// Counts by status, category and source
    Stats,
}

fn print_json(value: &impl Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn load_config(path: Option<&PathBuf>) -> Result<PipelineConfig> {
    match path {
        Some(path) => PipelineConfig::load(path).with_context(|| format!("loading {}", path.display())),
        None => {
            let mut config = PipelineConfig::default();
            config.apply_env_overrides();
            Ok(config)
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref())?;
    let pipeline = NewsPipeline::connect(config).await.context("starting pipeline")?;

    match cli.command {
        Command::Aggregate => print_json(&pipeline.aggregate().await?)?,
        Command::Generate { categories } => print_json(&pipeline.generate(&categories).await?)?,
        Command::Run => print_json(&pipeline.run_daily().await?)?,
        Command::Pending => print_json(&pipeline.review().list_pending().await?)?,
        Command::Approve { id, feedback } => print_json(&pipeline.review().approve(id, feedback.as_deref()).await?)?,
        Command::Reject { id, feedback } => print_json(&pipeline.review().reject(id, feedback.as_deref()).await?)?,
        Command::Edit { id, body, feedback } => {
            print_json(&pipeline.review().edit(id, &body, feedback.as_deref()).await?)?
        }
        Command::Stats => print_json(&pipeline.review().stats().await?)?,
    }

    info!("Done");
    Ok(())
}
