//! Note storage for the CLI
//!
//! Notes live in a single `notes.json` file in the data directory. Writes go
//! to a temporary sibling first and are renamed into place, so a crash never
//! leaves a truncated file behind.

use anyhow::{anyhow, bail, Context, Result};
use notesphere_core::{Document, DocumentId};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub struct NoteBook {
    path: PathBuf,
    notes: BTreeMap<DocumentId, Document>,
}

impl NoteBook {
    /// Load `path`, or start empty if it does not exist yet
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let notes = if path.exists() {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let documents: Vec<Document> = serde_json::from_str(&raw)
                .with_context(|| format!("Failed to parse {}", path.display()))?;
            documents.into_iter().map(|d| (d.id.clone(), d)).collect()
        } else {
            tracing::debug!("{} not found, starting with no notes", path.display());
            BTreeMap::new()
        };

        Ok(Self { path, notes })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let json = serde_json::to_string_pretty(&self.documents())?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json).with_context(|| format!("Failed to write {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("Failed to replace {}", self.path.display()))?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.notes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }

    /// All notes, oldest first
    pub fn documents(&self) -> Vec<Document> {
        let mut documents: Vec<Document> = self.notes.values().cloned().collect();
        documents.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        documents
    }

    pub fn get(&self, id: &DocumentId) -> Option<&Document> {
        self.notes.get(id)
    }

    pub fn insert(&mut self, document: Document) {
        self.notes.insert(document.id.clone(), document);
    }

    /// Replace a note's content; `Ok(false)` when it is unchanged
    pub fn update(&mut self, id: &DocumentId, content: String) -> Result<bool> {
        let note = self
            .notes
            .get_mut(id)
            .ok_or_else(|| anyhow!("No note with id {}", id))?;
        Ok(note.update_content(content))
    }

    pub fn remove(&mut self, id: &DocumentId) -> Option<Document> {
        self.notes.remove(id)
    }

    /// Resolve a full id or a unique id prefix
    pub fn resolve(&self, prefix: &str) -> Result<DocumentId> {
        let exact = DocumentId::from(prefix);
        if self.notes.contains_key(&exact) {
            return Ok(exact);
        }

        let matches: Vec<&DocumentId> = self
            .notes
            .keys()
            .filter(|id| id.as_str().starts_with(prefix))
            .collect();
        match matches.as_slice() {
            [only] => Ok((*only).clone()),
            [] => bail!("No note matches '{}'", prefix),
            _ => bail!("'{}' matches {} notes; use a longer prefix", prefix, matches.len()),
        }
    }
}

/// First `max` characters of `content` on one line, with an ellipsis if cut
pub fn preview(content: &str, max: usize) -> String {
    let flat: String = content.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max {
        flat
    } else {
        let cut: String = flat.chars().take(max).collect();
        format!("{}...", cut)
    }
}
