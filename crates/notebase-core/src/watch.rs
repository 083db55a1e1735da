use crate::debounce::Debouncer;
use crate::engine::{Engine, RebuildReport};
use crate::error::is_fatal_error;
use crate::paths::{parse_note_folder, to_posix_path};
use crate::settings::EngineSettings;
use anyhow::Result;
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver};
use std::time::Instant;

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum WatchEvent {
    Changed(PathBuf),
    RescanRequired,
}

/// Which paths the engine reacts to: the master index, note folders and the
/// two files inside each note folder.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WatchFilter {
    root: PathBuf,
    index_file: String,
    notes_dir: String,
    doc_file: String,
    meta_file: String,
}

impl WatchFilter {
    pub fn new(root: impl Into<PathBuf>, settings: &EngineSettings) -> Self {
        Self {
            root: root.into(),
            index_file: settings.layout.index_file.clone(),
            notes_dir: settings.layout.notes_dir.trim_matches('/').to_string(),
            doc_file: settings.layout.note_doc_file.clone(),
            meta_file: settings.layout.note_meta_file.clone(),
        }
    }

    pub fn is_tracked(&self, abs_path: &Path) -> bool {
        let Ok(rel) = abs_path.strip_prefix(&self.root) else {
            return false;
        };
        let Ok(rel) = to_posix_path(rel) else {
            return false;
        };
        if rel == self.index_file {
            return true;
        }

        let Some(rest) = rel.strip_prefix(&self.notes_dir).and_then(|r| r.strip_prefix('/')) else {
            return false;
        };
        let parts = rest.split('/').filter(|p| !p.is_empty()).collect::<Vec<_>>();
        match parts.as_slice() {
            [folder] => parse_note_folder(folder).is_some(),
            [folder, file] => {
                parse_note_folder(folder).is_some()
                    && (*file == self.doc_file || *file == self.meta_file)
            }
            _ => false,
        }
    }
}

pub struct NoteWatcher {
    _watcher: RecommendedWatcher,
    receiver: Receiver<notify::Result<notify::Event>>,
    filter: WatchFilter,
}

impl NoteWatcher {
    pub fn new(root: impl AsRef<Path>, settings: &EngineSettings) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        let (tx, rx) = mpsc::channel();
        let mut watcher = notify::recommended_watcher(move |event| {
            let _ = tx.send(event);
        })?;
        watcher.watch(&root, RecursiveMode::Recursive)?;

        Ok(Self {
            _watcher: watcher,
            receiver: rx,
            filter: WatchFilter::new(root, settings),
        })
    }

    /// Blocks for the first event or until `deadline`, then drains whatever
    /// else is queued. `None` waits indefinitely.
    pub fn recv_until(&self, deadline: Option<Instant>) -> Result<Vec<WatchEvent>> {
        let first = match deadline {
            None => match self.receiver.recv() {
                Ok(event) => event,
                Err(err) => anyhow::bail!("watch receiver closed: {err}"),
            },
            Some(deadline) => {
                let remain = deadline.saturating_duration_since(Instant::now());
                match self.receiver.recv_timeout(remain) {
                    Ok(event) => event,
                    Err(mpsc::RecvTimeoutError::Timeout) => return Ok(Vec::new()),
                    Err(mpsc::RecvTimeoutError::Disconnected) => {
                        anyhow::bail!("watch receiver disconnected")
                    }
                }
            }
        };

        let mut out = Vec::new();
        push_event(&self.filter, first, &mut out);
        while let Ok(event) = self.receiver.try_recv() {
            push_event(&self.filter, event, &mut out);
        }
        Ok(dedup_events(out))
    }
}

fn push_event(filter: &WatchFilter, event: notify::Result<notify::Event>, out: &mut Vec<WatchEvent>) {
    let event = match event {
        Ok(event) => event,
        Err(err) => {
            tracing::warn!(error = %err, "file watcher error, scheduling a rescan");
            out.push(WatchEvent::RescanRequired);
            return;
        }
    };
    if matches!(event.kind, EventKind::Access(_)) {
        return;
    }
    if event.need_rescan() {
        out.push(WatchEvent::RescanRequired);
        return;
    }
    // Renames report both sides; each is tracked on its own.
    for path in event.paths {
        if filter.is_tracked(&path) {
            out.push(WatchEvent::Changed(path));
        }
    }
}

fn dedup_events(events: Vec<WatchEvent>) -> Vec<WatchEvent> {
    if events.contains(&WatchEvent::RescanRequired) {
        return vec![WatchEvent::RescanRequired];
    }
    events.into_iter().collect::<BTreeSet<_>>().into_iter().collect()
}

/// Feeds watcher events through the debouncer into the engine until the
/// watcher closes or a fatal error occurs.
pub fn run_watch_loop(engine: &mut Engine, watcher: &NoteWatcher) -> Result<()> {
    let mut debouncer = Debouncer::new(
        engine.settings().debounce(),
        engine.settings().min_update_interval(),
    );
    tracing::info!(root = %engine.root().display(), "watching for changes");

    loop {
        let events = watcher.recv_until(debouncer.next_wakeup())?;
        drive_pass(engine, &mut debouncer, events, Instant::now())?;
    }
}

/// Records `events`, then runs an update pass if the debouncer says one is
/// due at `now`. Non-fatal pass failures are logged and the pass counts as
/// finished with nothing written.
pub fn drive_pass(
    engine: &mut Engine,
    debouncer: &mut Debouncer,
    events: Vec<WatchEvent>,
    now: Instant,
) -> Result<Option<RebuildReport>> {
    for event in events {
        match event {
            WatchEvent::Changed(path) => debouncer.record(path, now),
            WatchEvent::RescanRequired => debouncer.request_rescan(now),
        }
    }

    debouncer.tick(now);
    let Some(changes) = debouncer.begin(now) else {
        return Ok(None);
    };

    let report = match engine.apply_changes(&changes) {
        Ok(report) => Some(report),
        Err(err) if is_fatal_error(&err) => return Err(err),
        Err(err) => {
            tracing::error!(error = %format!("{err:#}"), "update pass failed");
            None
        }
    };
    let written = report.as_ref().map(|r| r.written.clone()).unwrap_or_default();
    debouncer.finish(Instant::now().max(now), written);
    Ok(report)
}
