use crate::changes::ChangeSet;
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::{Duration, Instant};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DebounceState {
    Idle,
    /// Events are arriving; a pass starts once `deadline` passes quietly.
    Pending { deadline: Instant },
    /// A pass is running (`cooldown_until == None`) or has just finished.
    Reconciling { cooldown_until: Option<Instant> },
}

/// Collapses bursts of file events into single update passes and keeps a
/// second pass from starting while one is running or cooling down.
///
/// Time is passed in by the caller so the machine can be driven in tests.
#[derive(Clone, Debug)]
pub struct Debouncer {
    state: DebounceState,
    quiet: Duration,
    min_interval: Duration,
    pending: ChangeSet,
    self_written: HashSet<PathBuf>,
    pass_started: Option<Instant>,
}

impl Debouncer {
    pub fn new(quiet: Duration, min_interval: Duration) -> Self {
        Self {
            state: DebounceState::Idle,
            quiet,
            min_interval,
            pending: ChangeSet::default(),
            self_written: HashSet::new(),
            pass_started: None,
        }
    }

    pub fn state(&self) -> DebounceState {
        self.state
    }

    pub fn pending(&self) -> &ChangeSet {
        &self.pending
    }

    pub fn record(&mut self, path: PathBuf, now: Instant) {
        if let DebounceState::Reconciling {
            cooldown_until: Some(_),
        } = self.state
        {
            if self.self_written.contains(&path) {
                tracing::trace!(path = %path.display(), "absorbing event for a file written by the last pass");
                return;
            }
        }
        self.pending.paths.insert(path);
        self.bump(now);
    }

    pub fn request_rescan(&mut self, now: Instant) {
        self.pending.rescan = true;
        self.bump(now);
    }

    fn bump(&mut self, now: Instant) {
        match self.state {
            DebounceState::Idle | DebounceState::Pending { .. } => {
                self.state = DebounceState::Pending {
                    deadline: now + self.quiet,
                };
            }
            // Merged into the set for the next pass.
            DebounceState::Reconciling { .. } => {}
        }
    }

    /// Takes the pending changes if the quiet period is over.
    pub fn begin(&mut self, now: Instant) -> Option<ChangeSet> {
        match self.state {
            DebounceState::Pending { deadline } if now >= deadline => {
                self.state = DebounceState::Reconciling {
                    cooldown_until: None,
                };
                self.pass_started = Some(now);
                Some(std::mem::take(&mut self.pending))
            }
            _ => None,
        }
    }

    /// Ends the running pass. Events for `written` are dropped from the
    /// pending set now and ignored until the cooldown ends.
    pub fn finish(&mut self, now: Instant, written: Vec<PathBuf>) {
        if !matches!(
            self.state,
            DebounceState::Reconciling {
                cooldown_until: None
            }
        ) {
            return;
        }
        self.self_written = written.into_iter().collect();
        for path in &self.self_written {
            self.pending.paths.remove(path);
        }

        let earliest_next = self
            .pass_started
            .map_or(now, |started| started + self.min_interval);
        self.state = DebounceState::Reconciling {
            cooldown_until: Some((now + self.quiet).max(earliest_next)),
        };
    }

    /// Leaves the cooldown once it is over.
    pub fn tick(&mut self, now: Instant) {
        let DebounceState::Reconciling {
            cooldown_until: Some(until),
        } = self.state
        else {
            return;
        };
        if now < until {
            return;
        }
        self.self_written.clear();
        self.state = if self.pending.is_empty() {
            DebounceState::Idle
        } else {
            DebounceState::Pending { deadline: now }
        };
    }

    /// When the caller should call [`Self::tick`] / [`Self::begin`] next
    /// even without new events.
    pub fn next_wakeup(&self) -> Option<Instant> {
        match self.state {
            DebounceState::Idle => None,
            DebounceState::Pending { deadline } => Some(deadline),
            DebounceState::Reconciling { cooldown_until } => cooldown_until,
        }
    }
}
