//! NoteSphere command-line interface
//!
//! Every invocation opens the data directory, bootstraps the positioning
//! pipeline from the persisted vector store, runs one command and persists
//! the layout on the way out.
//!
//! # Usage
//!
//! ```bash
//! notesphere add "I love hiking in the mountains"
//! notesphere list
//! notesphere search "hiking trip planning" --limit 5
//! notesphere layout > layout.json
//! ```
//!
//! # Environment Variables
//!
//! - `NOTESPHERE_HOME`: data directory (default: `~/.notesphere`)
//! - `NOTESPHERE_THRESHOLD`: override the connection threshold
//! - `RUST_LOG`: logging level (e.g., "info", "debug")

mod notes;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use notes::{preview, NoteBook};
use notesphere_core::{
    ChangeOutcome, CoordinatorHandle, Document, DocumentId, LayoutCoordinator, LayoutSnapshot,
    LibsqlVectorStore, PipelineConfig, VectorStore,
};
use notesphere_nlp_engine::{EmbeddingService, TextEncoder};
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Characters of note content shown in listings
const PREVIEW_CHARS: usize = 100;

#[derive(Parser, Debug)]
#[command(
    name = "notesphere",
    version,
    about = "Notes arranged on a 2D canvas by meaning"
)]
struct Cli {
    /// Data directory holding notes.json and vectors.db
    #[arg(long, env = "NOTESPHERE_HOME", global = true)]
    home: Option<PathBuf>,

    /// Pipeline configuration file (TOML); defaults to <home>/config.toml if present
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Minimum similarity for a connection edge
    #[arg(long, env = "NOTESPHERE_THRESHOLD", global = true)]
    threshold: Option<f32>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create a note and place it on the canvas
    Add {
        /// Note content
        #[arg(required = true, num_args = 1..)]
        text: Vec<String>,
    },
    /// Replace a note's content
    Edit {
        /// Note id (or unique prefix)
        id: String,
        /// New content
        #[arg(required = true, num_args = 1..)]
        text: Vec<String>,
    },
    /// Delete a note
    Delete {
        /// Note id (or unique prefix)
        id: String,
    },
    /// List notes with their coordinates
    List,
    /// Print the current layout snapshot as JSON
    Layout,
    /// Rank notes by similarity to a query
    Search {
        /// Query text
        #[arg(required = true, num_args = 1..)]
        text: Vec<String>,
        /// Maximum results
        #[arg(short, long, default_value_t = 10)]
        limit: usize,
    },
    /// Recompute every position from the stored embeddings
    Rebuild,
    /// Regenerate every embedding, then rebuild the layout
    Reindex,
    /// Show corpus and pipeline statistics
    Stats,
}

struct App {
    notes: NoteBook,
    pipeline: CoordinatorHandle,
    store: Arc<dyn VectorStore>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let home = match cli.home.clone() {
        Some(home) => home,
        None => dirs::home_dir()
            .ok_or_else(|| anyhow!("Failed to get home directory"))?
            .join(".notesphere"),
    };
    std::fs::create_dir_all(&home)
        .with_context(|| format!("Failed to create data directory {}", home.display()))?;

    let config = load_config(&home, cli.config.as_deref(), cli.threshold)?;
    let mut app = App::open(&home, config).await?;

    let result = app.run(cli.command).await;
    app.pipeline
        .shutdown()
        .await
        .context("Failed to persist layout")?;
    result
}

fn load_config(home: &Path, explicit: Option<&Path>, threshold: Option<f32>) -> Result<PipelineConfig> {
    let default_path = home.join("config.toml");
    let mut config = match explicit {
        Some(path) => PipelineConfig::load(path)?,
        None if default_path.exists() => PipelineConfig::load(&default_path)?,
        None => PipelineConfig::default(),
    };

    if let Some(threshold) = threshold {
        config.similarity_threshold = threshold;
    }
    config.validate().map_err(|e| anyhow!("Invalid configuration: {}", e))?;
    Ok(config)
}

impl App {
    async fn open(home: &Path, config: PipelineConfig) -> Result<Self> {
        let notes = NoteBook::open(home.join("notes.json"))?;

        let mut service = EmbeddingService::new(config.embedding.clone())?;
        service.initialize()?;
        tracing::debug!("Embedding backend: {}", service.device_info());
        let encoder: Arc<dyn TextEncoder> = Arc::new(service);

        let store = Arc::new(LibsqlVectorStore::new(home.join("vectors.db")).await?);
        Self::start(notes, config, encoder, store).await
    }

    async fn start(
        notes: NoteBook,
        config: PipelineConfig,
        encoder: Arc<dyn TextEncoder>,
        store: Arc<dyn VectorStore>,
    ) -> Result<Self> {
        let pipeline = LayoutCoordinator::start(config, encoder, store.clone()).await?;
        let app = Self {
            notes,
            pipeline,
            store,
        };
        app.sync().await?;
        Ok(app)
    }

    /// Replay changes that never reached the pipeline
    ///
    /// A command that failed after saving notes.json (or a hand-edited file)
    /// leaves notes without a current embedding and embeddings without a
    /// note. Both are sent through the pipeline again here; failures stay
    /// pending for the next run.
    async fn sync(&self) -> Result<()> {
        let stored: HashMap<DocumentId, notesphere_core::EmbeddingRecord> = self
            .store
            .all_embeddings()
            .await
            .context("Failed to read stored embeddings")?
            .into_iter()
            .map(|r| (r.doc_id.clone(), r))
            .collect();
        let snapshot = self.pipeline.snapshot();
        let live: Vec<Document> = self
            .notes
            .documents()
            .into_iter()
            .filter(|d| d.is_embeddable())
            .collect();

        let (mut placed, mut withdrawn, mut failed) = (0, 0, 0);
        for note in &live {
            let current = stored
                .get(&note.id)
                .is_some_and(|r| r.is_current_for(&note.content_hash))
                && snapshot.contains(&note.id);
            if current {
                continue;
            }
            match self
                .pipeline
                .document_changed(note.id.clone(), note.content.clone(), note.content_hash.clone())
                .await
            {
                Ok(_) => placed += 1,
                Err(e) => {
                    tracing::warn!("Could not place note {}: {}", note.id, e);
                    failed += 1;
                }
            }
        }

        let live_ids: BTreeSet<&DocumentId> = live.iter().map(|d| &d.id).collect();
        for id in stored.keys().filter(|id| !live_ids.contains(id)) {
            match self.pipeline.document_deleted(id.clone()).await {
                Ok(_) => withdrawn += 1,
                Err(e) => {
                    tracing::warn!("Could not withdraw embedding of {}: {}", id, e);
                    failed += 1;
                }
            }
        }

        if placed + withdrawn > 0 {
            tracing::info!(
                "Synced layout with notes: {} placed, {} withdrawn",
                placed,
                withdrawn
            );
        }
        if failed > 0 {
            tracing::warn!("{} notes are still out of sync; they will be retried", failed);
        }
        Ok(())
    }

    async fn run(&mut self, command: Commands) -> Result<()> {
        match command {
            Commands::Add { text } => self.add(text.join(" ")).await,
            Commands::Edit { id, text } => self.edit(&id, text.join(" ")).await,
            Commands::Delete { id } => self.delete(&id).await,
            Commands::List => {
                self.list();
                Ok(())
            }
            Commands::Layout => {
                println!("{}", serde_json::to_string_pretty(&*self.pipeline.snapshot())?);
                Ok(())
            }
            Commands::Search { text, limit } => self.search(&text.join(" "), limit).await,
            Commands::Rebuild => {
                let version = self.pipeline.rebuild().await?;
                let snapshot = self.pipeline.snapshot();
                println!(
                    "Positions refreshed for {} notes (layout v{}, epoch {}).",
                    snapshot.len(),
                    version,
                    snapshot.layout_epoch
                );
                Ok(())
            }
            Commands::Reindex => {
                let report = self.pipeline.reconcile(&self.notes.documents(), true).await?;
                println!(
                    "Embedded {} notes, removed {} stale embeddings (layout v{}).",
                    report.embedded, report.removed, report.version
                );
                for (id, reason) in &report.failed {
                    println!("  failed {}: {}", id, reason);
                }
                Ok(())
            }
            Commands::Stats => self.stats(),
        }
    }

    async fn add(&mut self, content: String) -> Result<()> {
        if content.trim().is_empty() {
            bail!("Note content cannot be empty");
        }

        let note = Document::new(content);
        let id = note.id.clone();
        let (content, hash) = (note.content.clone(), note.content_hash.clone());
        self.notes.insert(note);
        self.notes.save()?;

        let outcome = self
            .pipeline
            .document_changed(id.clone(), content, hash)
            .await
            .with_context(|| format!("Note {} saved but not placed; it is retried on the next run", id))?;
        println!("Note saved: {}", id);
        print_placement(&self.pipeline.snapshot(), &id, outcome);
        Ok(())
    }

    async fn edit(&mut self, prefix: &str, content: String) -> Result<()> {
        let id = self.notes.resolve(prefix)?;
        if content.trim().is_empty() {
            bail!("Note content cannot be empty; use `notesphere delete {}`", id);
        }

        if self.notes.update(&id, content)? {
            self.notes.save()?;
        }

        // Same text still goes through: an earlier attempt may have failed
        let note = self
            .notes
            .get(&id)
            .ok_or_else(|| anyhow!("No note with id {}", id))?;
        let outcome = self
            .pipeline
            .document_changed(id.clone(), note.content.clone(), note.content_hash.clone())
            .await
            .with_context(|| format!("Note {} saved but not placed; run the edit again", id))?;
        if outcome == ChangeOutcome::Unchanged {
            println!("Note {} unchanged.", id);
            return Ok(());
        }
        println!("Note updated: {}", id);
        print_placement(&self.pipeline.snapshot(), &id, outcome);
        Ok(())
    }

    async fn delete(&mut self, prefix: &str) -> Result<()> {
        let id = self.notes.resolve(prefix)?;
        self.pipeline
            .document_deleted(id.clone())
            .await
            .with_context(|| format!("Failed to remove note {} from the layout", id))?;
        self.notes.remove(&id);
        self.notes.save()?;
        println!("Note deleted: {}", id);
        Ok(())
    }

    fn list(&self) {
        let documents = self.notes.documents();
        if documents.is_empty() {
            println!("No notes found.");
            return;
        }

        let snapshot = self.pipeline.snapshot();
        for (i, note) in documents.iter().enumerate() {
            let coords = snapshot
                .point(&note.id)
                .map(|p| format!("({:.2}, {:.2})", p.x, p.y))
                .unwrap_or_else(|| "N/A".to_string());
            println!("{:>3}. {}  {}", i + 1, note.id, coords);
            println!("     {}", preview(&note.content, PREVIEW_CHARS));
        }
    }

    async fn search(&self, query: &str, limit: usize) -> Result<()> {
        let results = self.pipeline.query_by_similarity(query, limit).await?;
        if results.is_empty() {
            println!("No notes to search.");
            return Ok(());
        }

        for hit in results {
            let content = self
                .notes
                .get(&hit.doc_id)
                .map(|d| preview(&d.content, PREVIEW_CHARS))
                .unwrap_or_default();
            println!("{:>6.3}  {}  {}", hit.score, hit.doc_id, content);
        }
        Ok(())
    }

    fn stats(&self) -> Result<()> {
        let snapshot = self.pipeline.snapshot();
        let summary = serde_json::json!({
            "notes": self.notes.len(),
            "points": snapshot.len(),
            "edges": snapshot.edges.len(),
            "layoutVersion": snapshot.version,
            "layoutEpoch": snapshot.layout_epoch,
            "similarityThreshold": self.pipeline.config().similarity_threshold,
            "notesFile": self.notes.path(),
            "pipeline": self.pipeline.metrics(),
        });
        println!("{}", serde_json::to_string_pretty(&summary)?);
        Ok(())
    }
}

fn print_placement(snapshot: &LayoutSnapshot, id: &DocumentId, outcome: ChangeOutcome) {
    match snapshot.point(id) {
        Some(point) => println!("  Coordinates: ({:.2}, {:.2})", point.x, point.y),
        None => println!("  Coordinates: N/A"),
    }

    let connected: Vec<String> = snapshot
        .edges
        .iter()
        .filter(|e| e.touches(id))
        .map(|e| {
            let other = if &e.a == id { &e.b } else { &e.a };
            format!("{} ({:.2})", other, e.score)
        })
        .collect();
    if !connected.is_empty() {
        println!("  Connected to: {}", connected.join(", "));
    }

    if let ChangeOutcome::Published {
        latency,
        budget_exceeded: true,
        ..
    } = outcome
    {
        println!("  (pipeline took {:?}, over budget)", latency);
    }
}
