pub mod batch;
pub mod cache;
pub mod changes;
pub mod classify;
pub mod debounce;
pub mod engine;
pub mod error;
pub mod history;
pub mod markdown;
pub mod master_index;
pub mod note_config;
pub mod notes;
pub mod numbering;
pub mod outline;
pub mod paths;
pub mod settings;
pub mod sidebar;
pub mod slug;
pub mod toc;
pub mod watch;
