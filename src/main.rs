use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use localchat_store::{commands, init_logging, AppState, StoreConfig};

#[derive(Parser)]
#[command(name = "localchat")]
#[command(about = "Inspect the localchat store and move notes in and out of it")]
struct Cli {
    /// Data directory (overrides LOCALCHAT_DATA_DIR)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Conversations
    Conversations {
        #[command(subcommand)]
        action: ListOnly,
    },
    /// Tool-server configurations
    Servers {
        #[command(subcommand)]
        action: ServerAction,
    },
    /// Tools loaded by the runtime
    Tools {
        #[command(subcommand)]
        action: ListOnly,
    },
    /// Notes
    Notes {
        #[command(subcommand)]
        action: NoteAction,
    },
}

#[derive(Subcommand)]
enum ListOnly {
    List,
}

#[derive(Subcommand)]
enum ServerAction {
    List,
    /// Remove a server (no-op if it does not exist)
    Remove { name: String },
}

#[derive(Subcommand)]
enum NoteAction {
    List,
    /// Write notes to a file
    Export {
        #[arg(long, value_enum, default_value = "json")]
        format: ExportFormat,
        /// Note to export (markdown only)
        #[arg(long)]
        id: Option<String>,
        /// Directory to write into
        #[arg(long, default_value = ".")]
        out: PathBuf,
    },
    /// Import a .json, .zip or .md file
    Import { file: PathBuf },
}

#[derive(Clone, Copy, ValueEnum)]
enum ExportFormat {
    Json,
    Markdown,
    Zip,
}

impl ExportFormat {
    fn as_str(self) -> &'static str {
        match self {
            ExportFormat::Json => "json",
            ExportFormat::Markdown => "markdown",
            ExportFormat::Zip => "zip",
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();

    let mut config = StoreConfig::from_env();
    if let Some(dir) = cli.data_dir {
        config.data_dir = dir;
    }
    // A one-shot command never needs to watch for other contexts
    config.poll_interval_ms = 0;

    let state = AppState::open(config).await.context("Failed to open the localchat store")?;

    match cli.command {
        Commands::Conversations { action: ListOnly::List } => {
            for conversation in commands::list_conversations(&state) {
                println!(
                    "{}  {}  {} messages  (updated {})",
                    conversation.id,
                    conversation.name,
                    conversation.messages.len(),
                    conversation.updated_at.format("%Y-%m-%d %H:%M")
                );
            }
        }
        Commands::Servers { action: ServerAction::List } => {
            for (name, server) in commands::list_servers(&state) {
                println!("{}  {}", name, server.url);
            }
        }
        Commands::Servers {
            action: ServerAction::Remove { name },
        } => {
            commands::remove_server(&state, &name).await.map_err(anyhow::Error::msg)?;
            println!("Removed {}", name);
        }
        Commands::Tools { action: ListOnly::List } => {
            for tool in commands::list_tools(&state) {
                println!("{}  [{}]  {}", tool.name, tool.server_name, tool.description);
            }
        }
        Commands::Notes { action: NoteAction::List } => {
            for note in commands::list_notes(&state) {
                println!("{}  {}", note.id, note.title);
            }
        }
        Commands::Notes {
            action: NoteAction::Export { format, id, out },
        } => {
            if matches!(format, ExportFormat::Markdown) && id.is_none() {
                bail!("--id is required for a markdown export");
            }
            let artifact = commands::export_notes(&state, format.as_str(), id.as_deref())
                .await
                .map_err(anyhow::Error::msg)?;
            tokio::fs::create_dir_all(&out)
                .await
                .with_context(|| format!("Failed to create {}", out.display()))?;
            let path = out.join(&artifact.file_name);
            tokio::fs::write(&path, &artifact.bytes)
                .await
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!("Wrote {}", path.display());
        }
        Commands::Notes {
            action: NoteAction::Import { file },
        } => {
            let report = state
                .transfer
                .import_path(&file)
                .await
                .with_context(|| format!("Failed to import {}", file.display()))?;
            for warning in &report.warnings {
                eprintln!("warning: {}", warning);
            }
            println!("Imported {} notes ({} skipped)", report.imported, report.skipped);
        }
    }

    Ok(())
}
