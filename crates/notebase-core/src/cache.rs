use crate::error::{EngineError, IdCollision};
use crate::note_config::{ConfigPatch, NoteConfig};
use crate::notes::NoteRecord;
use crate::paths::rebase_note_path;
use std::collections::{BTreeMap, HashMap};

/// In-memory index of every note, keyed by folder id and by stable id.
///
/// Every view the engine renders is derived from this cache; files are only
/// read again when the change classifier says so.
#[derive(Clone, Debug, Default)]
pub struct NoteIndex {
    notes: HashMap<String, NoteRecord>,
    stable_to_id: HashMap<String, String>,
}

impl NoteIndex {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Replaces the whole cache. Duplicate folder ids are checked before
    /// duplicate stable ids; both abort without touching the current state.
    pub fn initialize(&mut self, records: Vec<NoteRecord>) -> Result<(), EngineError> {
        check_unique(&records, |r| Some(r.id.as_str()))
            .map_err(|collisions| EngineError::DuplicateIds { collisions })?;
        check_unique(&records, NoteRecord::stable_id)
            .map_err(|collisions| EngineError::DuplicateStableIds { collisions })?;

        self.notes.clear();
        self.stable_to_id.clear();
        for record in records {
            self.insert_unchecked(record);
        }
        tracing::debug!(notes = self.notes.len(), "note index initialized");
        Ok(())
    }

    pub fn note_count(&self) -> usize {
        self.notes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }

    pub fn get_by_id(&self, id: &str) -> Option<&NoteRecord> {
        self.notes.get(id)
    }

    pub fn get_by_stable_id(&self, stable_id: &str) -> Option<&NoteRecord> {
        self.stable_to_id
            .get(stable_id)
            .and_then(|id| self.notes.get(id))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.notes.contains_key(id)
    }

    pub fn ids_sorted(&self) -> Vec<String> {
        let mut ids = self.notes.keys().cloned().collect::<Vec<_>>();
        ids.sort();
        ids
    }

    pub fn records_sorted(&self) -> Vec<&NoteRecord> {
        let mut records = self.notes.values().collect::<Vec<_>>();
        records.sort_by(|a, b| a.id.cmp(&b.id));
        records
    }

    /// Inserts a new note. Fails when the id or the stable id is in use.
    pub fn add(&mut self, record: NoteRecord) -> Result<(), EngineError> {
        if self.notes.contains_key(&record.id) {
            return Err(EngineError::IdTaken { id: record.id });
        }
        if let Some(existing) = record
            .stable_id()
            .and_then(|sid| self.stable_to_id.get(sid))
        {
            return Err(EngineError::DuplicateStableIds {
                collisions: vec![IdCollision {
                    key: record.stable_id().unwrap_or_default().to_string(),
                    folders: sorted_pair(&self.notes[existing].folder_name, &record.folder_name),
                }],
            });
        }
        self.insert_unchecked(record);
        Ok(())
    }

    /// Replaces the record carrying the same id, or inserts it.
    pub fn upsert(&mut self, record: NoteRecord) -> Result<(), EngineError> {
        if let Some(sid) = record.stable_id() {
            if let Some(other) = self.stable_to_id.get(sid).filter(|other| **other != record.id) {
                return Err(EngineError::DuplicateStableIds {
                    collisions: vec![IdCollision {
                        key: sid.to_string(),
                        folders: sorted_pair(&self.notes[other].folder_name, &record.folder_name),
                    }],
                });
            }
        }
        self.delete(&record.id);
        self.insert_unchecked(record);
        Ok(())
    }

    pub fn delete(&mut self, id: &str) -> Option<NoteRecord> {
        let record = self.notes.remove(id)?;
        if let Some(sid) = record.stable_id() {
            self.stable_to_id.remove(sid);
        }
        Some(record)
    }

    /// The note's metadata with `patch` merged in and `updatedAt` stamped,
    /// leaving the cache untouched. `None` when the patch changes nothing.
    pub fn patched_config(
        &self,
        id: &str,
        patch: &ConfigPatch,
        now_ms: i64,
    ) -> Result<Option<NoteConfig>, EngineError> {
        let record = self
            .notes
            .get(id)
            .ok_or_else(|| EngineError::UnknownNote { id: id.to_string() })?;
        let mut config = record
            .config
            .clone()
            .ok_or_else(|| EngineError::MissingConfig { id: id.to_string() })?;
        if !patch.apply(&mut config) {
            return Ok(None);
        }
        config.updated_at = Some(now_ms);
        Ok(Some(config))
    }

    /// Merges `patch` into the note's metadata and stamps `updatedAt` when a
    /// field actually changed. Returns the updated record.
    pub fn update_config(
        &mut self,
        id: &str,
        patch: &ConfigPatch,
        now_ms: i64,
    ) -> Result<&NoteRecord, EngineError> {
        let patched = self.patched_config(id, patch, now_ms)?;
        let record = self
            .notes
            .get_mut(id)
            .ok_or_else(|| EngineError::UnknownNote { id: id.to_string() })?;
        if let Some(config) = patched {
            record.config = Some(config);
        }
        Ok(record)
    }

    pub fn set_config(&mut self, id: &str, config: NoteConfig) -> Result<(), EngineError> {
        let mut record = self
            .notes
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::UnknownNote { id: id.to_string() })?;
        record.config = Some(config);
        self.upsert(record)
    }

    /// Points the record at a renamed folder. The id is unchanged.
    pub fn rename_folder(&mut self, id: &str, folder_name: &str) -> Result<(), EngineError> {
        let record = self
            .notes
            .get_mut(id)
            .ok_or_else(|| EngineError::UnknownNote { id: id.to_string() })?;
        record.doc_path = rebase_note_path(&record.doc_path, folder_name);
        record.metadata_path = rebase_note_path(&record.metadata_path, folder_name);
        record.folder_name = folder_name.to_string();
        Ok(())
    }

    /// Moves a note to a new id and folder. The stable id follows it.
    pub fn change_id(
        &mut self,
        old_id: &str,
        new_id: &str,
        folder_name: &str,
    ) -> Result<(), EngineError> {
        if !self.notes.contains_key(old_id) {
            return Err(EngineError::UnknownNote {
                id: old_id.to_string(),
            });
        }
        if old_id != new_id && self.notes.contains_key(new_id) {
            return Err(EngineError::IdTaken {
                id: new_id.to_string(),
            });
        }
        let Some(mut record) = self.delete(old_id) else {
            return Err(EngineError::UnknownNote {
                id: old_id.to_string(),
            });
        };
        record.id = new_id.to_string();
        record.doc_path = rebase_note_path(&record.doc_path, folder_name);
        record.metadata_path = rebase_note_path(&record.metadata_path, folder_name);
        record.folder_name = folder_name.to_string();
        self.insert_unchecked(record);
        Ok(())
    }

    fn insert_unchecked(&mut self, record: NoteRecord) {
        if let Some(sid) = record.stable_id() {
            self.stable_to_id.insert(sid.to_string(), record.id.clone());
        }
        self.notes.insert(record.id.clone(), record);
    }
}

fn check_unique<'a>(
    records: &'a [NoteRecord],
    key: impl Fn(&'a NoteRecord) -> Option<&'a str>,
) -> Result<(), Vec<IdCollision>> {
    let mut groups: BTreeMap<&str, Vec<String>> = BTreeMap::new();
    for record in records {
        if let Some(k) = key(record) {
            groups.entry(k).or_default().push(record.folder_name.clone());
        }
    }
    let collisions = groups
        .into_iter()
        .filter(|(_, folders)| folders.len() > 1)
        .map(|(k, mut folders)| {
            folders.sort();
            IdCollision {
                key: k.to_string(),
                folders,
            }
        })
        .collect::<Vec<_>>();
    if collisions.is_empty() {
        Ok(())
    } else {
        Err(collisions)
    }
}

fn sorted_pair(a: &str, b: &str) -> Vec<String> {
    let mut folders = vec![a.to_string(), b.to_string()];
    folders.sort();
    folders
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn record(folder: &str, stable_id: Option<&str>) -> NoteRecord {
        let id = folder[..4].to_string();
        let dir = PathBuf::from("notes").join(folder);
        NoteRecord {
            id,
            folder_name: folder.to_string(),
            doc_path: dir.join("README.md"),
            metadata_path: dir.join("note.json"),
            config: stable_id.map(|sid| NoteConfig::new(sid, 0)),
        }
    }

    #[test]
    fn initialize_and_lookup() {
        let mut index = NoteIndex::empty();
        index
            .initialize(vec![record("0002. B", Some("sb")), record("0001. A", Some("sa"))])
            .expect("initialize");

        assert_eq!(index.note_count(), 2);
        assert_eq!(index.ids_sorted(), vec!["0001", "0002"]);
        assert_eq!(
            index.get_by_stable_id("sb").map(|r| r.folder_name.as_str()),
            Some("0002. B")
        );
        assert!(index.get_by_id("0003").is_none());
    }

    #[test]
    fn initialize_reports_every_duplicate_id() {
        let mut index = NoteIndex::empty();
        index
            .initialize(vec![record("0009. Keep", Some("k"))])
            .expect("initialize");

        let err = index
            .initialize(vec![
                record("0001. B", Some("b")),
                record("0001. A", Some("a")),
                record("0002. C", None),
                record("0002. D", None),
            ])
            .expect_err("duplicate ids");
        let EngineError::DuplicateIds { collisions } = err else {
            panic!("expected duplicate ids");
        };
        assert_eq!(collisions.len(), 2);
        assert_eq!(collisions[0].folders, vec!["0001. A", "0001. B"]);
        assert_eq!(collisions[1].key, "0002");

        // Failed initialization keeps the previous contents.
        assert!(index.contains("0009"));
    }

    #[test]
    fn initialize_rejects_duplicate_stable_ids() {
        let mut index = NoteIndex::empty();
        let err = index
            .initialize(vec![record("0001. A", Some("same")), record("0002. B", Some("same"))])
            .expect_err("duplicate stable ids");
        assert!(err.is_fatal());
        assert!(matches!(err, EngineError::DuplicateStableIds { .. }));
    }

    #[test]
    fn add_rejects_taken_id() {
        let mut index = NoteIndex::empty();
        index.add(record("0001. A", Some("a"))).expect("add");
        assert_eq!(
            index.add(record("0001. Other", Some("x"))),
            Err(EngineError::IdTaken {
                id: "0001".to_string()
            })
        );
    }

    #[test]
    fn update_config_stamps_only_real_changes() {
        let mut index = NoteIndex::empty();
        index.add(record("0001. A", Some("a"))).expect("add");

        let patch = ConfigPatch {
            done: Some(true),
            ..ConfigPatch::default()
        };
        let updated = index.update_config("0001", &patch, 42).expect("update");
        assert!(updated.config.as_ref().is_some_and(|c| c.done));
        assert_eq!(updated.config.as_ref().and_then(|c| c.updated_at), Some(42));

        let again = index.update_config("0001", &patch, 99).expect("update again");
        assert_eq!(again.config.as_ref().and_then(|c| c.updated_at), Some(42));

        assert!(matches!(
            index.update_config("0404", &patch, 1),
            Err(EngineError::UnknownNote { .. })
        ));
        index.add(record("0002. Bare", None)).expect("add bare");
        assert!(matches!(
            index.update_config("0002", &patch, 1),
            Err(EngineError::MissingConfig { .. })
        ));
    }

    #[test]
    fn patched_config_leaves_cache_alone() {
        let mut index = NoteIndex::empty();
        index.add(record("0001. A", Some("a"))).expect("add");
        let patch = ConfigPatch {
            deprecated: Some(true),
            ..ConfigPatch::default()
        };

        let patched = index.patched_config("0001", &patch, 7).expect("patch");
        assert!(patched.as_ref().is_some_and(|c| c.deprecated && c.updated_at == Some(7)));
        let cached = index.get_by_id("0001").and_then(|r| r.config.as_ref());
        assert!(cached.is_some_and(|c| !c.deprecated));

        let noop = ConfigPatch {
            deprecated: Some(false),
            ..ConfigPatch::default()
        };
        assert_eq!(index.patched_config("0001", &noop, 7).expect("patch"), None);
    }

    #[test]
    fn rename_and_change_id_keep_stable_id_lookup() {
        let mut index = NoteIndex::empty();
        index.add(record("0001. A", Some("sa"))).expect("add");

        index.rename_folder("0001", "0001. Renamed").expect("rename");
        let renamed = index.get_by_id("0001").expect("renamed");
        assert_eq!(renamed.doc_path, PathBuf::from("notes/0001. Renamed/README.md"));

        index.change_id("0001", "0005", "0005. Renamed").expect("change id");
        assert!(index.get_by_id("0001").is_none());
        assert_eq!(
            index.get_by_stable_id("sa").map(|r| r.id.as_str()),
            Some("0005")
        );
        assert_eq!(
            index.get_by_id("0005").map(|r| r.metadata_path.clone()),
            Some(PathBuf::from("notes/0005. Renamed/note.json"))
        );
    }

    #[test]
    fn upsert_replaces_and_delete_clears_stable_id() {
        let mut index = NoteIndex::empty();
        index.add(record("0001. A", Some("sa"))).expect("add");
        index.upsert(record("0001. A", Some("sb"))).expect("upsert");
        assert!(index.get_by_stable_id("sa").is_none());
        assert!(index.get_by_stable_id("sb").is_some());

        index.delete("0001");
        assert!(index.is_empty());
        assert!(index.get_by_stable_id("sb").is_none());
    }
}
