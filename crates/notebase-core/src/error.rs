use thiserror::Error;

/// A key shared by more than one note folder.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IdCollision {
    pub key: String,
    pub folders: Vec<String>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EngineError {
    #[error("duplicate note ids, rename one folder of each group: {}", format_collisions(.collisions))]
    DuplicateIds { collisions: Vec<IdCollision> },
    #[error("duplicate stable ids, regenerate `stableId` in one record of each group: {}", format_collisions(.collisions))]
    DuplicateStableIds { collisions: Vec<IdCollision> },
    #[error("metadata record {path} is missing required field `stableId`")]
    MissingStableId { path: String },
    #[error("metadata record {path} is malformed: {message}")]
    MalformedConfig { path: String, message: String },
    #[error("unknown note id {id}")]
    UnknownNote { id: String },
    #[error("note {id} has no metadata record")]
    MissingConfig { id: String },
    #[error("note id {id} is already taken")]
    IdTaken { id: String },
}

impl EngineError {
    /// Conditions that leave note identity ambiguous. The process must stop on these.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::DuplicateIds { .. } | Self::DuplicateStableIds { .. } | Self::MissingStableId { .. }
        )
    }
}

/// Walks an `anyhow` chain and reports whether it carries a fatal [`EngineError`].
pub fn is_fatal_error(err: &anyhow::Error) -> bool {
    err.chain()
        .filter_map(|cause| cause.downcast_ref::<EngineError>())
        .any(EngineError::is_fatal)
}

fn format_collisions(collisions: &[IdCollision]) -> String {
    collisions
        .iter()
        .map(|c| format!("{} ({})", c.key, c.folders.join(", ")))
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_ids_message_lists_every_folder() {
        let err = EngineError::DuplicateIds {
            collisions: vec![
                IdCollision {
                    key: "0001".to_string(),
                    folders: vec!["0001. A".to_string(), "0001. B".to_string()],
                },
                IdCollision {
                    key: "0007".to_string(),
                    folders: vec!["0007. C".to_string(), "0007. D".to_string()],
                },
            ],
        };

        let message = err.to_string();
        for folder in ["0001. A", "0001. B", "0007. C", "0007. D"] {
            assert!(message.contains(folder), "{message}");
        }
        assert!(err.is_fatal());
    }

    #[test]
    fn fatal_detection_walks_context_chain() {
        let err = anyhow::Error::new(EngineError::MissingStableId {
            path: "notes/0001. A/note.json".to_string(),
        })
        .context("scan notes");
        assert!(is_fatal_error(&err));

        let err = anyhow::Error::new(EngineError::UnknownNote {
            id: "0001".to_string(),
        });
        assert!(!is_fatal_error(&err));
    }
}
