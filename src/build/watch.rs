//! File watching for the dev pipeline.
//!
//! Uses `notify-debouncer-full` to collect raw filesystem events, then matches
//! them against the configured watch rules. Each rule has its own debounce
//! window: a burst of changes triggers one run once the window has passed
//! without further changes. A rule never runs twice at once; changes that
//! arrive while it runs queue exactly one re-run.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use notify::event::ModifyKind;
use notify::{
    Config as NotifyConfig, EventKind, PollWatcher, RecommendedWatcher, RecursiveMode, Watcher,
};
use notify_debouncer_full::{
    DebounceEventResult, Debouncer, RecommendedCache, new_debouncer, new_debouncer_opt,
};
use tokio::sync::{broadcast, mpsc};

use super::builder::Builder;
use super::files::glob_base;
use super::paths::to_slash;
use crate::config::WatchConfig;
use crate::util::format_duration;

/// How long raw events are collected before they are matched against rules.
const EVENT_WINDOW: Duration = Duration::from_millis(50);

// =============================================================================
// Errors
// =============================================================================

#[derive(thiserror::Error, Debug)]
pub enum WatchError {
    #[error("notify error: {0}")]
    Notify(#[from] notify::Error),

    #[error("watch rule '{rule}' has an invalid pattern: {source}")]
    Pattern {
        rule: String,
        #[source]
        source: globset::Error,
    },
}

// =============================================================================
// Watch events
// =============================================================================

/// Events sent from the file watcher.
#[derive(Debug)]
pub enum WatchEvent {
    /// Files were created, changed, renamed or removed.
    Changed(Vec<PathBuf>),
    /// Watcher error occurred.
    Error(String),
}

// =============================================================================
// Rules
// =============================================================================

/// One watch rule, compiled.
#[derive(Debug, Clone)]
pub struct WatchRule {
    pub name: String,
    /// Stage references to re-run; empty means reload only
    pub tasks: Vec<String>,
    pub debounce: Duration,
    include: GlobSet,
    exclude: GlobSet,
    bases: Vec<String>,
}

impl WatchRule {
    /// Whether a slash-separated path relative to the project matches.
    pub fn matches(&self, relative: &str) -> bool {
        self.include.is_match(relative) && !self.exclude.is_match(relative)
    }
}

/// The rules of a project, matched against paths under its directory.
#[derive(Debug, Clone)]
pub struct WatchRules {
    base_path: PathBuf,
    rules: Vec<WatchRule>,
}

impl WatchRules {
    pub fn from_config(config: &WatchConfig, base_path: &Path) -> Result<Self, WatchError> {
        // Events carry canonical paths
        let base_path = base_path
            .canonicalize()
            .unwrap_or_else(|_| base_path.to_path_buf());

        let mut rules = Vec::new();
        for (name, rule) in config.rules.iter() {
            let include = compile_set(name, rule.files.iter().filter(|p| !p.starts_with('!')).map(String::as_str))?;
            let exclude = compile_set(name, rule.files.iter().filter_map(|p| p.strip_prefix('!')))?;
            let bases = rule
                .files
                .iter()
                .filter(|p| !p.starts_with('!'))
                .map(|p| glob_base(p.trim_start_matches("./")))
                .collect();

            rules.push(WatchRule {
                name: name.to_string(),
                tasks: rule.tasks.clone(),
                debounce: Duration::from_millis(rule.debounce_ms.unwrap_or(config.debounce_ms)),
                include,
                exclude,
                bases,
            });
        }

        Ok(Self { base_path, rules })
    }

    pub fn rules(&self) -> &[WatchRule] {
        &self.rules
    }

    pub fn get(&self, index: usize) -> Option<&WatchRule> {
        self.rules.get(index)
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Indices of the rules an absolute path triggers.
    pub fn matching(&self, path: &Path) -> Vec<usize> {
        let Ok(relative) = path.strip_prefix(&self.base_path) else {
            return Vec::new();
        };
        let relative = to_slash(relative);
        self.rules
            .iter()
            .enumerate()
            .filter(|(_, rule)| rule.matches(&relative))
            .map(|(i, _)| i)
            .collect()
    }

    /// Directories to watch recursively.
    ///
    /// The literal prefix of every pattern, or its closest existing ancestor
    /// inside the project. Directories inside another watched one are dropped.
    pub fn roots(&self) -> Vec<PathBuf> {
        let mut roots: Vec<PathBuf> = self
            .rules
            .iter()
            .flat_map(|rule| rule.bases.iter())
            .map(|base| {
                let mut dir = self.base_path.join(base);
                while !dir.is_dir() && dir != self.base_path {
                    match dir.parent() {
                        Some(parent) => dir = parent.to_path_buf(),
                        None => break,
                    }
                }
                dir
            })
            .collect();

        roots.sort();
        let mut kept: Vec<PathBuf> = Vec::new();
        for root in roots {
            if !kept.iter().any(|k| root.starts_with(k)) {
                kept.push(root);
            }
        }
        kept
    }
}

fn compile_set<'a>(rule: &str, patterns: impl Iterator<Item = &'a str>) -> Result<GlobSet, WatchError> {
    let error = |source| WatchError::Pattern {
        rule: rule.to_string(),
        source,
    };
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = GlobBuilder::new(pattern.trim_start_matches("./"))
            .literal_separator(true)
            .build()
            .map_err(error)?;
        builder.add(glob);
    }
    builder.build().map_err(error)
}

// =============================================================================
// Scheduling
// =============================================================================

#[derive(Debug, Clone)]
struct RuleState {
    window: Duration,
    deadline: Option<Instant>,
    running: bool,
    pending: bool,
}

/// Debounce and overlap bookkeeping for watch rules.
///
/// Runs are serialized: nothing becomes due while a run is in flight.
#[derive(Debug, Clone)]
pub struct RuleScheduler {
    rules: Vec<RuleState>,
}

impl RuleScheduler {
    pub fn new(windows: impl IntoIterator<Item = Duration>) -> Self {
        Self {
            rules: windows
                .into_iter()
                .map(|window| RuleState {
                    window,
                    deadline: None,
                    running: false,
                    pending: false,
                })
                .collect(),
        }
    }

    /// Note a change for a rule. Each change pushes its deadline back.
    pub fn record(&mut self, rule: usize, now: Instant) {
        let Some(state) = self.rules.get_mut(rule) else {
            return;
        };
        if state.running {
            state.pending = true;
        } else {
            state.deadline = Some(now + state.window);
        }
    }

    /// When the next rule becomes due, if any can start.
    pub fn next_deadline(&self) -> Option<Instant> {
        if self.is_running() {
            return None;
        }
        self.rules.iter().filter_map(|s| s.deadline).min()
    }

    /// Rules whose window has passed, in declaration order. They are marked running.
    pub fn due(&mut self, now: Instant) -> Vec<usize> {
        if self.is_running() {
            return Vec::new();
        }
        let mut due = Vec::new();
        for (i, state) in self.rules.iter_mut().enumerate() {
            if state.deadline.is_some_and(|d| d <= now) {
                state.deadline = None;
                state.running = true;
                due.push(i);
            }
        }
        due
    }

    /// Mark rules as finished, rescheduling any that changed while running.
    pub fn finish(&mut self, rules: &[usize], now: Instant) {
        for &rule in rules {
            let Some(state) = self.rules.get_mut(rule) else {
                continue;
            };
            state.running = false;
            if std::mem::take(&mut state.pending) {
                state.deadline = Some(now + state.window);
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.rules.iter().any(|s| s.running)
    }
}

// =============================================================================
// File watcher
// =============================================================================

/// A file watcher that can use either native or polling backend.
pub enum FileWatcher {
    /// Native file system watcher (recommended for local development).
    Native {
        _debouncer: Debouncer<RecommendedWatcher, RecommendedCache>,
    },
    /// Polling-based watcher (for network filesystems, Docker, etc.).
    Polling {
        _debouncer: Debouncer<PollWatcher, RecommendedCache>,
    },
}

impl FileWatcher {
    /// Start watching `roots`, sending events to `tx` until dropped.
    pub fn new(
        config: &WatchConfig,
        roots: &[PathBuf],
        tx: mpsc::UnboundedSender<WatchEvent>,
    ) -> Result<Self, WatchError> {
        let callback = move |result: DebounceEventResult| match result {
            Ok(events) => {
                let paths: Vec<PathBuf> = events
                    .iter()
                    .filter(|event| is_relevant_event(&event.kind))
                    .flat_map(|event| event.paths.iter().cloned())
                    .collect();
                if !paths.is_empty() {
                    let _ = tx.send(WatchEvent::Changed(paths));
                }
            }
            Err(errors) => {
                for e in errors {
                    let _ = tx.send(WatchEvent::Error(e.to_string()));
                }
            }
        };

        if config.poll {
            let poll_interval = Duration::from_millis(config.poll_interval_ms);
            let notify_config = NotifyConfig::default().with_poll_interval(poll_interval);

            let mut debouncer = new_debouncer_opt::<_, PollWatcher, RecommendedCache>(
                EVENT_WINDOW,
                None,
                callback,
                RecommendedCache::default(),
                notify_config,
            )?;
            add_roots(&mut debouncer, roots)?;

            Ok(FileWatcher::Polling {
                _debouncer: debouncer,
            })
        } else {
            let mut debouncer = new_debouncer(EVENT_WINDOW, None, callback)?;
            add_roots(&mut debouncer, roots)?;

            Ok(FileWatcher::Native {
                _debouncer: debouncer,
            })
        }
    }
}

fn add_roots<W: Watcher, C: notify_debouncer_full::FileIdCache>(
    debouncer: &mut Debouncer<W, C>,
    roots: &[PathBuf],
) -> Result<(), WatchError> {
    for root in roots {
        if root.exists() {
            debouncer.watch(root, RecursiveMode::Recursive)?;
        }
    }
    Ok(())
}

/// Check if an event kind is relevant for rebuilds.
fn is_relevant_event(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(_)
            | EventKind::Remove(_)
            | EventKind::Modify(ModifyKind::Data(_))
            | EventKind::Modify(ModifyKind::Name(_))
            | EventKind::Modify(ModifyKind::Any)
    )
}

// =============================================================================
// Watch loop
// =============================================================================

/// Watch until the process is interrupted.
///
/// Matching rules re-run their stages through `builder`. A failed run is
/// logged and watching continues. After each successful run a reload is sent
/// on `reload`, when given.
pub async fn watch(
    builder: Arc<Builder>,
    config: &WatchConfig,
    reload: Option<broadcast::Sender<()>>,
) -> Result<(), WatchError> {
    let rules = Arc::new(WatchRules::from_config(config, builder.base_path())?);
    if rules.is_empty() {
        tracing::info!("no watch rules configured");
        std::future::pending::<()>().await;
        return Ok(());
    }

    let (tx, mut rx) = mpsc::unbounded_channel();
    let roots = rules.roots();
    let _watcher = FileWatcher::new(config, &roots, tx)?;
    for root in &roots {
        tracing::debug!(root = %root.display(), "watching");
    }

    let (done_tx, mut done_rx) = mpsc::unbounded_channel::<Vec<usize>>();
    let mut scheduler = RuleScheduler::new(rules.rules().iter().map(|r| r.debounce));

    loop {
        let deadline = scheduler.next_deadline();
        tokio::select! {
            event = rx.recv() => match event {
                Some(WatchEvent::Changed(paths)) => {
                    let now = Instant::now();
                    for path in &paths {
                        for rule in rules.matching(path) {
                            tracing::debug!(rule = %rules.rules()[rule].name, path = %path.display(), "change");
                            scheduler.record(rule, now);
                        }
                    }
                }
                Some(WatchEvent::Error(e)) => tracing::warn!("watch error: {e}"),
                None => break,
            },
            Some(finished) = done_rx.recv() => scheduler.finish(&finished, Instant::now()),
            _ = wait_until(deadline) => {
                let due = scheduler.due(Instant::now());
                if due.is_empty() {
                    continue;
                }

                let builder = Arc::clone(&builder);
                let rules = Arc::clone(&rules);
                let reload = reload.clone();
                let done = done_tx.clone();
                tokio::task::spawn_blocking(move || {
                    let guard = RunGuard::new(due, done);
                    for &index in guard.rules() {
                        if let Some(rule) = rules.get(index) {
                            run_rule(&builder, rule, reload.as_ref());
                        }
                    }
                });
            }
        }
    }

    Ok(())
}

/// Reports a batch of rule runs as finished when dropped, even if a run panics.
struct RunGuard {
    rules: Vec<usize>,
    done: mpsc::UnboundedSender<Vec<usize>>,
}

impl RunGuard {
    fn new(rules: Vec<usize>, done: mpsc::UnboundedSender<Vec<usize>>) -> Self {
        Self { rules, done }
    }

    fn rules(&self) -> &[usize] {
        &self.rules
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        if std::thread::panicking() {
            tracing::error!("watch run panicked; rules {:?} are released", self.rules);
        }
        let _ = self.done.send(std::mem::take(&mut self.rules));
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)).await,
        None => std::future::pending().await,
    }
}

fn run_rule(builder: &Builder, rule: &WatchRule, reload: Option<&broadcast::Sender<()>>) {
    if !rule.tasks.is_empty() {
        tracing::info!(rule = %rule.name, "change detected, running {}", rule.tasks.join(", "));
        match builder.run_stages(&format!("watch:{}", rule.name), &rule.tasks) {
            Ok(result) => tracing::info!(
                rule = %rule.name,
                stages = result.stages.len(),
                "done in {}",
                format_duration(result.elapsed)
            ),
            Err(e) => {
                tracing::error!(rule = %rule.name, "{e}");
                return;
            }
        }
    }

    if let Some(tx) = reload {
        tracing::debug!(rule = %rule.name, "reload");
        let _ = tx.send(());
    }
}
