//! Biscuit - headless language server driver.
//!
//! Opens one file against its language server and prints hover text,
//! definitions, completions or diagnostics. Useful for checking a server
//! setup without the editor.

mod output;

use anyhow::{bail, Context};
use biscuit_lsp::{
    default_configs, load_configs, ChannelDocument, Document, DocumentId, DocumentUpdate,
    LspConfig, LspManager, TextPosition,
};
use biscuit_util::log::{self, LogConfig, LogLevel};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, info};

#[derive(Parser)]
#[command(name = "biscuit")]
#[command(author, version, about = "Query a language server from the command line", long_about = None)]
struct Cli {
    /// Server configuration file (JSON array)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the server command for this file's language
    #[arg(long)]
    server: Option<String>,

    /// Workspace root (defaults to the nearest root marker, then the cwd)
    #[arg(long)]
    root: Option<PathBuf>,

    /// Seconds to wait for the server
    #[arg(long, default_value_t = 30)]
    timeout: u64,

    /// Enable verbose logging to stderr
    #[arg(short, long)]
    verbose: bool,

    /// Log level when not verbose (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show hover information at a position
    Hover {
        file: PathBuf,
        /// Position as line.column, lines from 1
        position: TextPosition,
    },
    /// Find where the symbol at a position is defined
    Definition {
        file: PathBuf,
        position: TextPosition,
    },
    /// List completions at a position
    Complete {
        file: PathBuf,
        position: TextPosition,
        /// Maximum entries to print
        #[arg(short, long, default_value_t = 50)]
        limit: usize,
    },
    /// Print the diagnostics published for a file
    Diagnostics { file: PathBuf },
    /// List configured servers
    Servers,
}

impl Commands {
    fn file(&self) -> Option<&Path> {
        match self {
            Self::Hover { file, .. }
            | Self::Definition { file, .. }
            | Self::Complete { file, .. }
            | Self::Diagnostics { file } => Some(file),
            Self::Servers => None,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(&cli);

    let cwd = std::env::current_dir()?;
    let mut configs = match &cli.config {
        Some(path) => load_configs(path)
            .with_context(|| format!("loading server config {}", path.display()))?,
        None => default_configs(),
    };

    let Some(file) = cli.command.file() else {
        for config in &configs {
            println!(
                "{:<12} {:<28} {}",
                config.language,
                config.command,
                config.extensions.join(",")
            );
        }
        return Ok(());
    };

    let file = absolute(file, &cwd);
    if let Some(server) = &cli.server {
        apply_server_override(&mut configs, &file, server)?;
    }

    let root = cli.root.clone().map(|root| absolute(&root, &cwd)).unwrap_or(cwd);
    let manager = LspManager::new(configs, root);
    let result = run(&cli, &manager, &file).await;
    manager
        .shutdown_all(Duration::from_secs(cli.timeout.min(5)))
        .await;
    result
}

fn init_logging(cli: &Cli) {
    let config = if cli.verbose {
        LogConfig {
            print: true,
            level: LogLevel::Debug,
            ..Default::default()
        }
    } else {
        LogConfig {
            level: cli.log_level,
            file: log::default_log_path(),
            ..Default::default()
        }
    };
    if let Err(e) = log::init(config) {
        eprintln!("Warning: Could not initialize logging: {e}");
    }
}

fn absolute(path: &Path, cwd: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        cwd.join(path)
    }
}

/// Point the config serving `file` at `server`, a command line with
/// optional arguments.
fn apply_server_override(configs: &mut [LspConfig], file: &Path, server: &str) -> anyhow::Result<()> {
    let mut parts = server.split_whitespace();
    let Some(command) = parts.next() else {
        bail!("--server needs a command");
    };
    let Some(config) = configs.iter_mut().find(|c| c.handles_path(file)) else {
        bail!("No server configured for {}", file.display());
    };
    config.command = command.to_string();
    config.args = parts.map(str::to_string).collect();
    debug!(language = %config.language, command = %config.command, "Server command overridden");
    Ok(())
}

async fn run(cli: &Cli, manager: &LspManager, file: &Path) -> anyhow::Result<()> {
    let text = std::fs::read_to_string(file)
        .with_context(|| format!("reading {}", file.display()))?;
    let (tx, mut updates) = tokio::sync::mpsc::unbounded_channel();
    let doc = Arc::new(ChannelDocument::new(Some(file.to_path_buf()), text, tx));
    let id = doc.id();
    let timeout = Duration::from_secs(cli.timeout);

    manager.open_document(doc).await?;
    manager.wait_ready(id, timeout).await?;
    info!(file = %file.display(), "Server ready");

    match &cli.command {
        Commands::Hover { position, .. } => {
            manager.request_hover(id, *position).await?;
            let update = next_update(&mut updates, id, timeout, |u| {
                matches!(u, DocumentUpdate::Hover(_))
            })
            .await?;
            if let DocumentUpdate::Hover(info) = update {
                println!("{}", output::hover(&info));
            }
        }
        Commands::Definition { position, .. } => {
            manager.request_definition(id, *position).await?;
            let update = next_update(&mut updates, id, timeout, |u| {
                matches!(u, DocumentUpdate::Jump(_))
            })
            .await?;
            if let DocumentUpdate::Jump(target) = update {
                println!("{}", output::jump(&target));
            }
        }
        Commands::Complete {
            position, limit, ..
        } => {
            manager.request_completion(id, *position).await?;
            let update = next_update(&mut updates, id, timeout, |u| {
                matches!(u, DocumentUpdate::Completions(_))
            })
            .await?;
            if let DocumentUpdate::Completions(set) = update {
                print!("{}", output::completions(&set, *limit));
            }
        }
        Commands::Diagnostics { .. } => {
            let update = next_update(&mut updates, id, timeout, |u| {
                matches!(u, DocumentUpdate::Diagnostics(_))
            })
            .await?;
            if let DocumentUpdate::Diagnostics(set) = update {
                println!("{}", output::diagnostics(&set));
            }
        }
        Commands::Servers => {}
    }

    manager.close_document(id).await;
    Ok(())
}

/// Wait for the first update for `id` accepted by `wanted`.
async fn next_update(
    updates: &mut UnboundedReceiver<(DocumentId, DocumentUpdate)>,
    id: DocumentId,
    timeout: Duration,
    wanted: impl Fn(&DocumentUpdate) -> bool,
) -> anyhow::Result<DocumentUpdate> {
    let wait = async {
        while let Some((doc, update)) = updates.recv().await {
            if doc != id {
                continue;
            }
            if let DocumentUpdate::Unavailable { language } = &update {
                bail!("The {language} language server is not available");
            }
            if wanted(&update) {
                return Ok(update);
            }
            debug!(update = ?update, "Skipping update");
        }
        bail!("Document closed before a result arrived")
    };
    tokio::time::timeout(timeout, wait)
        .await
        .context("Timed out waiting for the language server")?
}

#[cfg(test)]
mod tests {
    use super::*;
    use biscuit_lsp::HoverInfo;
    use tokio::sync::mpsc;

    #[test]
    fn test_parse_hover_command() {
        let cli = Cli::try_parse_from(["biscuit", "--timeout", "3", "hover", "src/lib.rs", "4.2"])
            .unwrap();
        assert_eq!(cli.timeout, 3);
        match cli.command {
            Commands::Hover { file, position } => {
                assert_eq!(file, PathBuf::from("src/lib.rs"));
                assert_eq!(position, TextPosition { line: 4, column: 2 });
            }
            _ => panic!("expected hover"),
        }
    }

    #[test]
    fn test_parse_rejects_bad_position() {
        assert!(Cli::try_parse_from(["biscuit", "definition", "a.rs", "0.3"]).is_err());
        assert!(Cli::try_parse_from(["biscuit", "definition", "a.rs", "four"]).is_err());
        assert!(Cli::try_parse_from(["biscuit", "--log-level", "loud", "servers"]).is_err());
    }

    #[test]
    fn test_server_override() {
        let mut configs = default_configs();
        apply_server_override(&mut configs, Path::new("/w/app.py"), "pylsp --verbose").unwrap();
        let python = configs.iter().find(|c| c.language == "python").unwrap();
        assert_eq!(python.command, "pylsp");
        assert_eq!(python.args, vec!["--verbose"]);

        assert!(apply_server_override(&mut configs, Path::new("/w/notes.txt"), "x").is_err());
        assert!(apply_server_override(&mut configs, Path::new("/w/a.rs"), "  ").is_err());
    }

    #[test]
    fn test_absolute() {
        let cwd = Path::new("/home/me/project");
        assert_eq!(absolute(Path::new("src/a.rs"), cwd), cwd.join("src/a.rs"));
        assert_eq!(absolute(Path::new("/etc/x"), cwd), PathBuf::from("/etc/x"));
    }

    #[tokio::test]
    async fn test_next_update_filters() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = DocumentId::new(1);
        let other = DocumentId::new(2);
        let hover = DocumentUpdate::Hover(HoverInfo {
            position: TextPosition { line: 1, column: 0 },
            text: "fn".to_string(),
        });
        tx.send((other, hover.clone())).unwrap();
        tx.send((id, DocumentUpdate::Diagnostics(Default::default()))).unwrap();
        tx.send((id, hover.clone())).unwrap();

        let update = next_update(&mut rx, id, Duration::from_secs(1), |u| {
            matches!(u, DocumentUpdate::Hover(_))
        })
        .await
        .unwrap();
        assert_eq!(update, hover);
    }

    #[tokio::test]
    async fn test_next_update_unavailable() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = DocumentId::new(1);
        tx.send((
            id,
            DocumentUpdate::Unavailable {
                language: "go".to_string(),
            },
        ))
        .unwrap();
        let err = next_update(&mut rx, id, Duration::from_secs(1), |_| true)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("go language server"));
    }
}
