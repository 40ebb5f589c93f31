//! QuickNote CLI - a quick multi-note scratchpad.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use quicknote_core::{KvStore, NoteRepository, NoteSummary};
use quicknote_files::FilesStore;
use quicknote_sqlite::SqliteStore;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

const QUICKNOTE_DIR: &str = ".quicknote";
const SQLITE_FILE: &str = "quicknote.sqlite";

#[derive(Parser)]
#[command(name = "quicknote", about = "Quick multi-note scratchpad", version)]
struct Cli {
    /// Store directory (defaults to the nearest .quicknote directory)
    #[arg(long, env = "QUICKNOTE_DIR", global = true)]
    dir: Option<PathBuf>,

    /// Storage backend
    #[arg(long, env = "QUICKNOTE_BACKEND", value_enum, default_value_t = Backend::Files, global = true)]
    backend: Backend,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Backend {
    /// One JSON file per key
    Files,
    /// A single SQLite database
    Sqlite,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a new store in the current directory
    Init {
        /// Delete the existing store and reinitialize
        #[arg(long)]
        reinitialize: bool,
    },
    #[command(flatten)]
    Store(StoreCommand),
}

/// Commands that operate on an existing store.
#[derive(Subcommand)]
enum StoreCommand {
    /// Create a note and select it
    New {
        /// Note content (reads from stdin if not provided and stdin is not a tty)
        #[arg(long)]
        content: Option<String>,
    },
    /// List notes, newest first
    Ls,
    /// Show a note
    Show {
        /// Note ID (defaults to the current note)
        id: Option<String>,
    },
    /// Replace a note's content
    Edit {
        /// Note ID
        id: String,
        /// New content (reads from stdin if not provided)
        #[arg(long)]
        content: Option<String>,
    },
    /// Delete one or more notes
    Rm {
        /// Comma-separated note IDs
        ids: String,
    },
    /// Search note titles and previews
    Search {
        /// Case-insensitive substring
        query: String,
    },
    /// Show or change the current note
    Current {
        /// Note ID to select
        id: Option<String>,
        /// Clear the selection
        #[arg(long, conflicts_with = "id")]
        clear: bool,
    },
    /// Report notes that are stored but missing from the list
    Check,
}

/// Find the .quicknote directory by searching up from current directory
fn find_store_dir() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;
    loop {
        let candidate = current.join(QUICKNOTE_DIR);
        if candidate.is_dir() {
            return Some(candidate);
        }
        if !current.pop() {
            return None;
        }
    }
}

/// Resolve the store directory, or error if not initialized
fn get_store_dir(explicit: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(dir) = explicit {
        if !dir.is_dir() {
            bail!("Store directory {} does not exist", dir.display());
        }
        return Ok(dir);
    }
    match find_store_dir() {
        Some(dir) => Ok(dir),
        None => bail!("No .quicknote directory found. Run 'quicknote init' to create one."),
    }
}

fn parse_ids(ids: &str) -> Vec<String> {
    ids.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn read_stdin() -> Result<String> {
    let mut buf = String::new();
    io::stdin()
        .read_to_string(&mut buf)
        .context("Failed to read from stdin")?;
    Ok(buf)
}

fn is_stdin_tty() -> bool {
    atty::is(atty::Stream::Stdin)
}

fn print_summaries(list: &[NoteSummary], current: Option<&str>) {
    for note in list {
        let marker = if Some(note.id.as_str()) == current { "*" } else { " " };
        let preview: String = note
            .preview
            .chars()
            .map(|c| if c == '\n' || c == '\r' { ' ' } else { c })
            .collect();
        println!(
            "{} {}: {} ({}) -- {}",
            marker,
            note.id,
            note.title,
            note.updated_at,
            preview.trim()
        );
    }
}

fn init(dir: Option<PathBuf>, reinitialize: bool) -> Result<()> {
    let store_dir = dir.unwrap_or_else(|| PathBuf::from(QUICKNOTE_DIR));

    if store_dir.exists() {
        if reinitialize {
            std::fs::remove_dir_all(&store_dir)
                .context("Failed to remove existing store directory")?;
        } else {
            bail!(
                "QuickNote is already initialized in {}. Use --reinitialize to delete and recreate.",
                store_dir.display()
            );
        }
    }

    FilesStore::open(&store_dir).context("Failed to create store")?;

    let verb = if reinitialize { "Reinitialized" } else { "Initialized" };
    println!("{} quicknote store in {}", verb, store_dir.display());
    Ok(())
}

async fn run<S: KvStore>(repo: NoteRepository<S>, command: StoreCommand) -> Result<()> {
    // Safe on every start: only imports when there are no notes yet.
    if let Some(note) = repo.migrate_from_single_note().await {
        eprintln!("Imported single-note content as note {}", note.id);
    }

    match command {
        StoreCommand::New { content } => {
            let content = match content {
                Some(c) => c,
                None if !is_stdin_tty() => read_stdin()?,
                None => String::new(),
            };
            let note = repo
                .create_note(Some(&content))
                .await
                .context("Failed to create note")?;
            println!("Created note {}: {}", note.id, note.title);
        }

        StoreCommand::Ls => {
            let list = repo.get_notes_list().await;
            let current = repo.get_current_note_id().await;
            print_summaries(&list, current.as_deref());
        }

        StoreCommand::Show { id } => {
            let id = match id {
                Some(id) => id,
                None => match repo.get_current_note_id().await {
                    Some(id) => id,
                    None => bail!("No current note"),
                },
            };
            let Some(note) = repo.get_note(&id).await else {
                eprintln!("Note {} not found", id);
                std::process::exit(1);
            };

            println!("{}", note.content);
            println!("\n---\n");
            println!("Title: {}", note.title);
            println!("Created: {}", note.created_at);
            println!("Last modified: {}", note.updated_at);
        }

        StoreCommand::Edit { id, content } => {
            let content = match content {
                Some(c) => c,
                None => read_stdin()?,
            };
            if repo.save_note_content(&id, &content).await {
                println!("Saved note {}", id);
            } else {
                eprintln!("Failed to save note {}", id);
                std::process::exit(1);
            }
        }

        StoreCommand::Rm { ids } => {
            let ids = parse_ids(&ids);
            if ids.is_empty() {
                eprintln!("No note IDs provided");
                std::process::exit(1);
            }

            let mut failed = Vec::new();
            for id in &ids {
                if repo.delete_note(id).await {
                    println!("Deleted note {}", id);
                } else {
                    failed.push(id);
                }
            }

            if !failed.is_empty() {
                for id in &failed {
                    eprintln!("Failed to delete note {}", id);
                }
                std::process::exit(1);
            }
        }

        StoreCommand::Search { query } => {
            let matches = repo.search_notes(&query).await;
            let current = repo.get_current_note_id().await;
            print_summaries(&matches, current.as_deref());
        }

        StoreCommand::Current { id, clear } => {
            if clear {
                if !repo.set_current_note_id(None).await {
                    bail!("Failed to clear the current note");
                }
                println!("Cleared current note");
            } else if let Some(id) = id {
                // The tracker does not validate; keep the pointer inside the list.
                if !repo.get_notes_list().await.iter().any(|s| s.id == id) {
                    eprintln!("Note {} not found", id);
                    std::process::exit(1);
                }
                if !repo.set_current_note_id(Some(&id)).await {
                    bail!("Failed to select note {}", id);
                }
                println!("Selected note {}", id);
            } else {
                match repo.get_current_note_id().await {
                    Some(id) => println!("{}", id),
                    None => println!("No current note"),
                }
            }
        }

        StoreCommand::Check => {
            let orphans = repo.find_orphans().await;
            if orphans.is_empty() {
                println!("OK: every stored note is listed");
            } else {
                for id in &orphans {
                    println!("Unlisted note {}", id);
                }
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

fn open_files(dir: &Path) -> Result<NoteRepository<FilesStore>> {
    let store = FilesStore::open(dir).context("Failed to open file store")?;
    Ok(NoteRepository::new(store))
}

fn open_sqlite(dir: &Path) -> Result<NoteRepository<SqliteStore>> {
    let store = SqliteStore::open(dir.join(SQLITE_FILE)).context("Failed to open SQLite store")?;
    Ok(NoteRepository::new(store))
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    let command = match cli.command {
        Commands::Init { reinitialize } => return init(cli.dir, reinitialize),
        Commands::Store(command) => command,
    };

    let store_dir = get_store_dir(cli.dir)?;
    log::debug!("using store at {}", store_dir.display());

    match cli.backend {
        Backend::Files => run(open_files(&store_dir)?, command).await,
        Backend::Sqlite => run(open_sqlite(&store_dir)?, command).await,
    }
}
