use crate::error::EngineError;
use crate::note_config::{generate_stable_id, parse_config, NoteConfig};
use crate::paths::{note_folder_name, note_link, parse_note_folder, to_posix_path, write_atomic};
use crate::settings::EngineSettings;
use anyhow::{Context as _, Result};
use ignore::WalkBuilder;
use std::path::{Path, PathBuf};

#[derive(Clone, Debug, PartialEq)]
pub struct NoteRecord {
    /// Four-digit folder prefix. Not stable across renames.
    pub id: String,
    pub folder_name: String,
    pub doc_path: PathBuf,
    pub metadata_path: PathBuf,
    /// `None` when the metadata record is absent or malformed.
    pub config: Option<NoteConfig>,
}

impl NoteRecord {
    /// The only identifier that survives a folder rename.
    pub fn stable_id(&self) -> Option<&str> {
        self.config.as_ref().map(|c| c.stable_id.as_str())
    }

    pub fn title(&self) -> &str {
        parse_note_folder(&self.folder_name)
            .map(|(_, title)| title)
            .unwrap_or(&self.folder_name)
    }
}

/// What a changed path means to the engine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PathRole {
    NoteDocument { folder: String },
    NoteMetadata { folder: String },
    NoteFolder { folder: String },
    MasterIndex,
    Unrelated,
}

/// Reads and writes the notes directory. Holds no note state of its own;
/// scanned records go into a [`crate::cache::NoteIndex`].
#[derive(Clone, Debug)]
pub struct NoteManager {
    root: PathBuf,
    notes_root: PathBuf,
    notes_dir: String,
    index_file: String,
    doc_file: String,
    meta_file: String,
}

impl NoteManager {
    pub fn open(root: impl Into<PathBuf>, settings: &EngineSettings) -> Result<Self> {
        let root = root.into();
        if !root.is_dir() {
            anyhow::bail!("knowledge base root is not a directory: {}", root.display());
        }
        Ok(Self {
            notes_root: settings.notes_root(&root),
            notes_dir: settings.layout.notes_dir.clone(),
            index_file: settings.layout.index_file.clone(),
            doc_file: settings.layout.note_doc_file.clone(),
            meta_file: settings.layout.note_meta_file.clone(),
            root,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn notes_root(&self) -> &Path {
        &self.notes_root
    }

    pub fn doc_file(&self) -> &str {
        &self.doc_file
    }

    pub fn meta_file(&self) -> &str {
        &self.meta_file
    }

    pub fn ensure_structure(&self) -> Result<()> {
        std::fs::create_dir_all(&self.notes_root)
            .with_context(|| format!("create notes folder: {}", self.notes_root.display()))
    }

    /// Link used by the master index, the outline and the sidebar.
    pub fn link_for(&self, folder_name: &str) -> String {
        note_link(&self.notes_dir, folder_name, &self.doc_file)
    }

    /// Lists every note folder and builds its record.
    ///
    /// Malformed metadata leaves the note configless; a record without
    /// `stableId` aborts the scan.
    pub fn scan(&self) -> Result<Vec<NoteRecord>> {
        if !self.notes_root.is_dir() {
            tracing::warn!(path = %self.notes_root.display(), "notes folder does not exist");
            return Ok(Vec::new());
        }

        let mut builder = WalkBuilder::new(&self.notes_root);
        builder
            .hidden(true)
            .follow_links(false)
            .ignore(false)
            .git_ignore(true)
            .git_exclude(true)
            .git_global(true)
            .max_depth(Some(1));

        let mut folders = Vec::new();
        for result in builder.build() {
            let dent = match result {
                Ok(d) => d,
                Err(err) => {
                    tracing::debug!(error = %err, "skipping unreadable entry");
                    continue;
                }
            };
            if dent.depth() != 1 || !dent.file_type().is_some_and(|t| t.is_dir()) {
                continue;
            }
            let name = dent.file_name().to_string_lossy().into_owned();
            if parse_note_folder(&name).is_some() {
                folders.push(name);
            }
        }
        folders.sort();

        let mut records = Vec::with_capacity(folders.len());
        for folder in folders {
            if let Some(record) = self.load_record(&folder)? {
                records.push(record);
            }
        }
        Ok(records)
    }

    /// Builds the record of one folder; `None` if it is not a note folder or
    /// has no document.
    pub fn load_record(&self, folder_name: &str) -> Result<Option<NoteRecord>> {
        let Some((id, _title)) = parse_note_folder(folder_name) else {
            return Ok(None);
        };
        let folder_path = self.notes_root.join(folder_name);
        let doc_path = folder_path.join(&self.doc_file);
        if !doc_path.is_file() {
            tracing::warn!(folder = folder_name, "note folder has no document, skipping");
            return Ok(None);
        }
        let metadata_path = folder_path.join(&self.meta_file);
        let config = self.load_config(&metadata_path)?;

        Ok(Some(NoteRecord {
            id: id.to_string(),
            folder_name: folder_name.to_string(),
            doc_path,
            metadata_path,
            config,
        }))
    }

    /// Reads a metadata record. Absent → `None`; malformed → `None` with a
    /// warning; missing `stableId` → fatal error.
    pub fn load_config(&self, metadata_path: &Path) -> Result<Option<NoteConfig>> {
        let raw = match std::fs::read_to_string(metadata_path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("read metadata record: {}", metadata_path.display()))
            }
        };

        match parse_config(&raw, metadata_path) {
            Ok(config) => Ok(Some(config)),
            Err(err @ EngineError::MalformedConfig { .. }) => {
                tracing::warn!(error = %err, "treating note as configless");
                Ok(None)
            }
            Err(err) => Err(err.into()),
        }
    }

    pub fn write_config(&self, metadata_path: &Path, config: &NoteConfig) -> Result<()> {
        let json = config.canonical_json()?;
        write_atomic(metadata_path, &json)
    }

    /// Finds the folder currently carrying `id` without scanning every note.
    pub fn find_folder(&self, id: &str) -> Result<Option<String>> {
        let entries = match std::fs::read_dir(&self.notes_root) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("read notes folder: {}", self.notes_root.display()))
            }
        };

        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            if parse_note_folder(&name).is_some_and(|(folder_id, _)| folder_id == id)
                && entry.path().is_dir()
            {
                return Ok(Some(name));
            }
        }
        Ok(None)
    }

    /// Smallest unused four-digit id greater than every existing one.
    pub fn next_free_id(&self) -> Result<String> {
        let highest = self
            .scan_ids()?
            .into_iter()
            .filter_map(|id| id.parse::<u32>().ok())
            .max()
            .unwrap_or(0);
        if highest >= 9999 {
            anyhow::bail!("no free note id left");
        }
        Ok(format!("{:04}", highest + 1))
    }

    fn scan_ids(&self) -> Result<Vec<String>> {
        let entries = match std::fs::read_dir(&self.notes_root) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err).with_context(|| "read notes folder"),
        };
        Ok(entries
            .flatten()
            .filter_map(|e| {
                let name = e.file_name().to_string_lossy().into_owned();
                parse_note_folder(&name).map(|(id, _)| id.to_string())
            })
            .collect())
    }

    /// Authors a new note: folder, document template with TOC markers and a
    /// metadata record with defaults and a fresh stable id.
    pub fn create_note(
        &self,
        title: &str,
        settings: &EngineSettings,
        now_ms: i64,
    ) -> Result<NoteRecord> {
        let id = self.next_free_id()?;
        let folder_name = note_folder_name(&id, title);
        let folder_path = self.notes_root.join(&folder_name);
        if folder_path.exists() {
            anyhow::bail!("note folder already exists: {}", folder_path.display());
        }
        std::fs::create_dir_all(&folder_path)
            .with_context(|| format!("create note folder: {}", folder_path.display()))?;

        let doc_path = folder_path.join(&self.doc_file);
        let doc = format!(
            "# {folder_name}\n\n{}\n{}\n",
            settings.toc.start_marker, settings.toc.end_marker
        );
        write_atomic(&doc_path, &doc)?;

        let metadata_path = folder_path.join(&self.meta_file);
        let config = NoteConfig::new(generate_stable_id(), now_ms);
        self.write_config(&metadata_path, &config)?;

        tracing::info!(id = %id, folder = %folder_name, "created note");
        Ok(NoteRecord {
            id,
            folder_name,
            doc_path,
            metadata_path,
            config: Some(config),
        })
    }

    pub fn rename_folder(&self, from: &str, to: &str) -> Result<()> {
        let from_path = self.notes_root.join(from);
        let to_path = self.notes_root.join(to);
        if to_path.exists() {
            anyhow::bail!("note folder already exists: {}", to_path.display());
        }
        std::fs::rename(&from_path, &to_path)
            .with_context(|| format!("rename {} -> {}", from_path.display(), to_path.display()))
    }

    /// Maps a changed path (absolute or root-relative) to its role.
    pub fn path_role(&self, path: &Path) -> PathRole {
        let abs = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        };

        if abs == self.root.join(&self.index_file) {
            return PathRole::MasterIndex;
        }

        let Ok(rel) = abs.strip_prefix(&self.notes_root) else {
            return PathRole::Unrelated;
        };
        let Ok(rel) = to_posix_path(rel) else {
            return PathRole::Unrelated;
        };
        let mut parts = rel.split('/').filter(|p| !p.is_empty());
        let Some(folder) = parts.next() else {
            return PathRole::Unrelated;
        };
        if parse_note_folder(folder).is_none() {
            return PathRole::Unrelated;
        }
        let folder = folder.to_string();

        match (parts.next(), parts.next()) {
            (None, _) => PathRole::NoteFolder { folder },
            (Some(file), None) if file == self.doc_file => PathRole::NoteDocument { folder },
            (Some(file), None) if file == self.meta_file => PathRole::NoteMetadata { folder },
            _ => PathRole::Unrelated,
        }
    }
}
