//! Console process registry.
//!
//! The table maps handles to [`ConsoleProcess`]es, tracks which terminal the
//! client has focused and persists every entry's [`ConsoleProcessInfo`] to
//! the console index so terminals survive a server restart. It also carries
//! the terminal helpers addressed by caption (`terminal_*` methods).

use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use dashmap::DashMap;
use protocol::ClientEvent;
use serde::Serialize;

use super::info::{ConsoleProcessInfo, InteractionMode};
use super::process::{strip_ansi, ConsoleProcess, ConsoleServices, PollStatus, SpawnMode};
use super::supervisor::ProcessOptions;
use super::transport::InputHandler;
use super::ConsoleError;

/// Rows and columns used to make a reattached terminal redraw.
const JIGGLE_SIZE: (u16, u16) = (25, 5);

/// Snapshot of a terminal for `terminal_context`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TerminalContext {
    pub handle: String,
    pub caption: String,
    pub title: String,
    pub working_dir: String,
    pub shell: String,
    pub running: bool,
    pub busy: bool,
    pub connection: String,
    pub sequence: i32,
    pub lines: usize,
    pub cols: u16,
    pub rows: u16,
    pub pid: Option<u32>,
    pub full_screen: bool,
    pub restarted: bool,
}

/// All console processes of the server.
pub struct ConsoleProcessTable {
    services: Arc<ConsoleServices>,
    processes: DashMap<String, Arc<ConsoleProcess>>,
    visible: Mutex<Option<String>>,
    /// Serializes creating, restarting, renaming and reaping so a caption is
    /// chosen and claimed in one step.
    mutation: Mutex<()>,
}

impl ConsoleProcessTable {
    pub fn new(services: Arc<ConsoleServices>) -> Self {
        Self {
            services,
            processes: DashMap::new(),
            visible: Mutex::new(None),
            mutation: Mutex::new(()),
        }
    }

    fn lock_mutation(&self) -> MutexGuard<'_, ()> {
        self.mutation.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn services(&self) -> &Arc<ConsoleServices> {
        &self.services
    }

    pub fn find_by_handle(&self, handle: &str) -> Option<Arc<ConsoleProcess>> {
        self.processes.get(handle).map(|p| Arc::clone(p.value()))
    }

    pub fn find_by_caption(&self, caption: &str) -> Option<Arc<ConsoleProcess>> {
        self.processes()
            .into_iter()
            .find(|p| p.caption() == caption)
    }

    /// Looks a process up, failing for unknown handles.
    pub fn get(&self, handle: &str) -> Result<Arc<ConsoleProcess>, ConsoleError> {
        self.find_by_handle(handle)
            .ok_or_else(|| ConsoleError::UnknownHandle(handle.to_string()))
    }

    /// Every process, ordered by terminal sequence.
    pub fn processes(&self) -> Vec<Arc<ConsoleProcess>> {
        let mut procs: Vec<_> = self.processes.iter().map(|p| Arc::clone(p.value())).collect();
        procs.sort_by_key(|p| (p.terminal_sequence(), p.handle().to_string()));
        procs
    }

    /// Handles of every process.
    pub fn handles(&self) -> Vec<String> {
        self.processes().iter().map(|p| p.handle().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.processes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processes.is_empty()
    }

    /// Next terminal sequence and its default caption.
    pub fn next_terminal_name(&self) -> (i32, String) {
        let next = self
            .processes
            .iter()
            .map(|p| p.terminal_sequence())
            .max()
            .unwrap_or(0)
            .max(0)
            + 1;
        (next, format!("Terminal {next}"))
    }

    /// Adds a process that is not yet started.
    ///
    /// Fails without touching the table when another process already uses
    /// the caption.
    pub fn create_process(
        &self,
        spawn: SpawnMode,
        options: ProcessOptions,
        info: ConsoleProcessInfo,
    ) -> Result<Arc<ConsoleProcess>, ConsoleError> {
        let _guard = self.lock_mutation();
        self.create_process_locked(spawn, options, info)
    }

    fn create_process_locked(
        &self,
        spawn: SpawnMode,
        options: ProcessOptions,
        info: ConsoleProcessInfo,
    ) -> Result<Arc<ConsoleProcess>, ConsoleError> {
        if !info.caption.is_empty() && self.find_by_caption(&info.caption).is_some() {
            return Err(ConsoleError::DuplicateCaption(info.caption));
        }
        let proc = ConsoleProcess::new(Arc::clone(&self.services), Some(spawn), options, info);
        self.insert(Arc::clone(&proc));
        Ok(proc)
    }

    /// Starts the terminal described by `info`, reattaching to or
    /// restarting the process already using its handle.
    pub fn start_terminal(
        &self,
        mut info: ConsoleProcessInfo,
    ) -> Result<Arc<ConsoleProcess>, ConsoleError> {
        let _guard = self.lock_mutation();
        if !info.handle.is_empty() {
            if let Some(existing) = self.find_by_handle(&info.handle) {
                if existing.is_started() {
                    let (cols, rows) = JIGGLE_SIZE;
                    existing.resize(cols, rows);
                    return Ok(existing);
                }
                return self.restart_terminal(&existing);
            }
        }

        let settings = &self.services.settings;
        if info.terminal_sequence <= 0 {
            let (sequence, caption) = self.next_terminal_name();
            info.terminal_sequence = sequence;
            if info.caption.is_empty() {
                info.caption = caption;
            }
        } else if info.caption.is_empty() {
            info.caption = format!("Terminal {}", info.terminal_sequence);
        }
        info.allow_restart = true;
        info.interaction_mode = InteractionMode::Always;
        info.max_output_lines = settings.max_output_lines;
        info.track_env = settings.track_env;
        info.auto_close = settings.auto_close;
        info.started = false;
        info.zombie = false;
        info.exit_code = None;
        info.restarted = false;

        let options = self.terminal_options(&info);
        let proc = self.create_process_locked(SpawnMode::Terminal, options, info)?;
        self.start_or_reap(&proc)?;
        self.save_or_warn();
        Ok(proc)
    }

    /// Caller holds the mutation lock.
    fn restart_terminal(
        &self,
        existing: &Arc<ConsoleProcess>,
    ) -> Result<Arc<ConsoleProcess>, ConsoleError> {
        let mut info = existing.info();
        info.restarted = true;
        info.zombie = false;
        info.exit_code = None;
        info.started = false;

        if !info.shell_type.is_reloadable() {
            existing.delete_log_file(false)?;
        }

        let options = self.terminal_options(&info);
        let proc = ConsoleProcess::new(
            Arc::clone(&self.services),
            Some(SpawnMode::Terminal),
            options,
            info,
        );
        self.insert(Arc::clone(&proc));
        tracing::info!(handle = %proc.handle(), caption = %proc.caption(), "Restarting terminal");
        self.start_or_reap(&proc)?;
        self.save_or_warn();
        Ok(proc)
    }

    fn terminal_options(&self, info: &ConsoleProcessInfo) -> ProcessOptions {
        let working_dir = Some(info.cwd.as_path())
            .filter(|cwd| !cwd.as_os_str().is_empty() && cwd.is_dir())
            .map(Path::to_path_buf);
        ProcessOptions {
            shell_path: self.services.settings.shell_path(info.shell_type),
            working_dir,
            ..Default::default()
        }
    }

    fn start_or_reap(&self, proc: &Arc<ConsoleProcess>) -> Result<(), ConsoleError> {
        if let Err(e) = proc.start() {
            tracing::error!(handle = %proc.handle(), error = %e, "Failed to start console process");
            self.reap_locked(proc.handle());
            return Err(e);
        }
        Ok(())
    }

    /// Removes a process, terminating it and deleting its log and saved
    /// environment. Returns whether the handle was known.
    pub fn reap(&self, handle: &str) -> bool {
        let _guard = self.lock_mutation();
        self.reap_locked(handle)
    }

    fn reap_locked(&self, handle: &str) -> bool {
        let Some((_, proc)) = self.processes.remove(handle) else {
            return false;
        };
        proc.terminate();
        if let Err(e) = proc.delete_log_file(false) {
            tracing::warn!(handle, error = %e, "Failed to delete terminal log");
        }
        if let Err(e) = proc.delete_env_file() {
            tracing::warn!(handle, error = %e, "Failed to delete saved environment");
        }
        {
            let mut visible = self.visible.lock().unwrap_or_else(PoisonError::into_inner);
            if visible.as_deref() == Some(handle) {
                *visible = None;
            }
        }
        tracing::info!(handle, "Console process reaped");
        self.save_or_warn();
        true
    }

    /// Renames a process. Returns false when another process has the caption.
    pub fn set_caption(&self, handle: &str, caption: &str) -> Result<bool, ConsoleError> {
        let _guard = self.lock_mutation();
        let proc = self.get(handle)?;
        if self
            .find_by_caption(caption)
            .is_some_and(|other| other.handle() != handle)
        {
            return Ok(false);
        }
        proc.set_caption(caption);
        self.save_or_warn();
        Ok(true)
    }

    /// Records the focused terminal; `None` or an empty handle clears it.
    pub fn set_visible(&self, handle: Option<&str>) -> Result<(), ConsoleError> {
        let mut visible = self.visible.lock().unwrap_or_else(PoisonError::into_inner);
        match handle.filter(|h| !h.is_empty()) {
            None => {
                *visible = None;
                Ok(())
            }
            Some(h) if self.processes.contains_key(h) => {
                *visible = Some(h.to_string());
                Ok(())
            }
            Some(h) => {
                *visible = None;
                Err(ConsoleError::UnknownHandle(h.to_string()))
            }
        }
    }

    /// Handle of the focused terminal.
    pub fn visible(&self) -> Option<String> {
        self.visible
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Polls every process. Saves the index when one exited.
    pub fn poll_all(&self) -> usize {
        let mut exited = 0;
        for proc in self.processes() {
            if let PollStatus::Exited(_) = proc.poll() {
                exited += 1;
            }
        }
        if exited > 0 {
            self.save_or_warn();
        }
        exited
    }

    /// JSON array of the given processes' info.
    fn serialize_procs(procs: &[Arc<ConsoleProcess>]) -> Result<String, ConsoleError> {
        let infos: Vec<ConsoleProcessInfo> = procs.iter().map(|p| p.info()).collect();
        Ok(serde_json::to_string(&infos)?)
    }

    /// JSON array of every process' info.
    pub fn serialize(&self) -> Result<String, ConsoleError> {
        Self::serialize_procs(&self.processes())
    }

    /// Replaces the table with the entries of a serialized index.
    ///
    /// A malformed index is discarded with a warning. Restored entries are
    /// neither running nor busy. Logs of handles not in the index are
    /// deleted.
    pub fn deserialize(&self, json: &str) -> usize {
        let _guard = self.lock_mutation();
        self.processes.clear();
        let infos: Vec<ConsoleProcessInfo> = match serde_json::from_str(json) {
            Ok(infos) => infos,
            Err(e) => {
                tracing::warn!(error = %e, "Discarding malformed console process index");
                Vec::new()
            }
        };

        for mut info in infos {
            if info.handle.is_empty() {
                continue;
            }
            info.started = false;
            info.restarted = false;
            let spawn = info.is_terminal().then_some(SpawnMode::Terminal);
            let options = self.terminal_options(&info);
            let proc = ConsoleProcess::new(Arc::clone(&self.services), spawn, options, info);
            proc.set_not_busy();
            self.insert(proc);
        }

        let known: HashSet<String> = self.processes.iter().map(|p| p.key().clone()).collect();
        match self.services.storage.delete_orphaned_logs(&known) {
            Ok(0) => {}
            Ok(removed) => tracing::debug!(removed, "Removed orphaned console logs"),
            Err(e) => tracing::warn!(error = %e, "Failed to remove orphaned console logs"),
        }
        tracing::info!(processes = known.len(), "Console processes restored");
        known.len()
    }

    /// Writes the index.
    pub fn save(&self) -> Result<(), ConsoleError> {
        let json = self.serialize()?;
        Ok(self.services.storage.save_index(&json)?)
    }

    fn save_or_warn(&self) {
        if let Err(e) = self.save() {
            tracing::warn!(error = %e, "Failed to save console process index");
        }
    }

    /// Loads the index written by a previous run.
    pub fn load(&self) -> Result<usize, ConsoleError> {
        match self.services.storage.load_index()? {
            Some(json) => Ok(self.deserialize(&json)),
            None => Ok(0),
        }
    }

    /// Marks restartable processes as not started.
    pub fn on_suspend(&self) {
        for proc in self.processes() {
            proc.on_suspend();
        }
    }

    /// Saves the index for the next run.
    ///
    /// Only a normal shutdown saves, and only restartable entries are kept.
    pub fn save_at_shutdown(&self, terminated_normally: bool) -> Result<(), ConsoleError> {
        if !terminated_normally {
            return Ok(());
        }
        self.on_suspend();
        let keep: Vec<_> = self
            .processes()
            .into_iter()
            .filter(|p| p.allow_restart())
            .collect();
        *self.visible.lock().unwrap_or_else(PoisonError::into_inner) = None;

        let json = Self::serialize_procs(&keep)?;
        self.services.storage.save_index(&json)?;
        tracing::info!(saved = keep.len(), "Console process index saved at shutdown");
        Ok(())
    }

    /// Terminates every running process.
    pub fn terminate_all(&self) {
        for proc in self.processes() {
            proc.terminate();
        }
    }

    fn insert(&self, proc: Arc<ConsoleProcess>) {
        self.processes.insert(proc.handle().to_string(), proc);
    }

    fn terminals(&self) -> Vec<Arc<ConsoleProcess>> {
        self.processes()
            .into_iter()
            .filter(|p| p.is_terminal())
            .collect()
    }

    fn find_terminal(&self, caption: &str) -> Result<Arc<ConsoleProcess>, ConsoleError> {
        self.terminals()
            .into_iter()
            .find(|p| p.caption() == caption)
            .ok_or_else(|| ConsoleError::UnknownTerminal(caption.to_string()))
    }

    /// Captions of every terminal.
    pub fn terminal_list(&self) -> Vec<String> {
        self.terminals().iter().map(|p| p.caption()).collect()
    }

    /// Asks the client to open a terminal; returns its caption.
    pub fn terminal_create(&self, caption: Option<&str>) -> Result<String, ConsoleError> {
        let caption = match caption.filter(|c| !c.is_empty()) {
            Some(caption) => {
                if self.find_by_caption(caption).is_some() {
                    return Err(ConsoleError::DuplicateCaption(caption.to_string()));
                }
                caption.to_string()
            }
            None => self.next_terminal_name().1,
        };
        self.services
            .events
            .enque_client_event(ClientEvent::CreateNamedTerminal {
                id: caption.clone(),
            });
        Ok(caption)
    }

    pub fn terminal_context(&self, caption: &str) -> Result<TerminalContext, ConsoleError> {
        let proc = self.find_terminal(caption)?;
        let lines = proc.buffer_line_count();
        let info = proc.info();
        Ok(TerminalContext {
            handle: info.handle,
            caption: info.caption,
            title: info.title,
            working_dir: info.cwd.display().to_string(),
            shell: info.shell_type.name().to_string(),
            running: info.started,
            busy: info.has_child_procs,
            connection: info.channel_mode.to_string(),
            sequence: info.terminal_sequence,
            lines,
            cols: info.cols,
            rows: info.rows,
            pid: proc.pid(),
            full_screen: info.alt_buffer_active,
            restarted: info.restarted,
        })
    }

    /// Saved output of a terminal, one element per line.
    pub fn terminal_buffer(&self, caption: &str, strip: bool) -> Result<Vec<String>, ConsoleError> {
        let proc = self.find_terminal(caption)?;
        let mut buffer = proc.saved_buffer();
        if strip {
            buffer = strip_ansi(&buffer);
        }
        Ok(buffer.split('\n').map(str::to_string).collect())
    }

    /// Busy state per caption; unknown captions are not busy.
    pub fn terminal_busy(&self, captions: &[String]) -> Vec<bool> {
        captions
            .iter()
            .map(|c| self.find_terminal(c).is_ok_and(|p| p.is_busy()))
            .collect()
    }

    /// Running state per caption; unknown captions are not running.
    pub fn terminal_running(&self, captions: &[String]) -> Vec<bool> {
        captions
            .iter()
            .map(|c| self.find_terminal(c).is_ok_and(|p| p.is_started()))
            .collect()
    }

    /// Interrupts and reaps terminals.
    pub fn terminal_kill(&self, captions: &[String]) -> Result<(), ConsoleError> {
        for caption in captions {
            let proc = self.find_terminal(caption)?;
            proc.interrupt();
            self.reap(proc.handle());
        }
        Ok(())
    }

    /// Caption of the focused terminal.
    pub fn terminal_visible(&self) -> Option<String> {
        self.visible()
            .and_then(|handle| self.find_by_handle(&handle))
            .map(|p| p.caption())
    }

    /// Erases a terminal's saved output and clears its display.
    pub fn terminal_clear(&self, caption: &str) -> Result<(), ConsoleError> {
        let proc = self.find_terminal(caption)?;
        proc.delete_log_file(false)?;
        self.services
            .events
            .enque_client_event(ClientEvent::ClearTerminal {
                id: caption.to_string(),
            });
        Ok(())
    }

    /// Types text into a running terminal.
    pub fn terminal_send(&self, caption: &str, text: &str) -> Result<(), ConsoleError> {
        let proc = self.find_terminal(caption)?;
        if !proc.is_started() {
            return Err(ConsoleError::NotRunning);
        }
        proc.on_received_input(text);
        Ok(())
    }

    /// Starts a terminal if needed and optionally brings it to the front.
    pub fn terminal_activate(&self, caption: Option<&str>, show: bool) -> Result<(), ConsoleError> {
        let caption = caption.filter(|c| !c.is_empty());
        if let Some(caption) = caption {
            let proc = self.find_terminal(caption)?;
            if !proc.is_started() {
                self.start_or_reap(&proc)?;
            }
        }
        if show {
            self.services
                .events
                .enque_client_event(ClientEvent::ActivateTerminal {
                    id: caption.unwrap_or_default().to_string(),
                });
        }
        Ok(())
    }
}

impl InputHandler for ConsoleProcessTable {
    fn accepts(&self, handle: &str) -> bool {
        self.processes.contains_key(handle)
    }

    fn on_input(&self, handle: &str, input: &str) {
        match self.find_by_handle(handle) {
            Some(proc) => proc.on_received_input(input),
            None => tracing::debug!(handle, "Dropping input for reaped terminal"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::console::info::{AutoClose, ShellType};
    use crate::console::process::ConsoleSettings;
    use crate::console::storage::ConsoleStorage;
    use crate::console::supervisor::fake::{FakeOp, FakeSupervisor};
    use crate::console::supervisor::ProcessEvent;
    use crate::console::transport::Transports;
    use crate::events::ClientEventQueue;
    use std::sync::atomic::Ordering;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        supervisor: Arc<FakeSupervisor>,
        events: Arc<ClientEventQueue>,
        table: ConsoleProcessTable,
    }

    fn fixture() -> Fixture {
        fixture_with(ConsoleSettings::default())
    }

    fn fixture_with(settings: ConsoleSettings) -> Fixture {
        let dir = TempDir::new().unwrap();
        let supervisor = Arc::new(FakeSupervisor::default());
        let events = Arc::new(ClientEventQueue::new());
        let services = Arc::new(ConsoleServices {
            supervisor: supervisor.clone(),
            storage: ConsoleStorage::new(dir.path().join("console"), 1000, 8192),
            events: events.clone(),
            transports: Transports::new(events.clone(), None),
            settings,
        });
        Fixture {
            _dir: dir,
            supervisor,
            events,
            table: ConsoleProcessTable::new(services),
        }
    }

    impl Fixture {
        fn new_terminal(&self) -> Arc<ConsoleProcess> {
            self.table
                .start_terminal(ConsoleProcessInfo::default())
                .unwrap()
        }

        fn storage(&self) -> &ConsoleStorage {
            &self.table.services().storage
        }

        fn last_event(&self) -> ClientEvent {
            self.events.events_since(0).pop().unwrap().event
        }
    }

    fn modal_info(caption: &str) -> ConsoleProcessInfo {
        ConsoleProcessInfo {
            caption: caption.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_terminals_are_named_in_sequence() {
        let f = fixture();
        assert_eq!(f.table.next_terminal_name(), (1, "Terminal 1".to_string()));

        let first = f.new_terminal();
        let second = f.new_terminal();
        assert_eq!(first.caption(), "Terminal 1");
        assert_eq!(second.caption(), "Terminal 2");
        assert_eq!(second.terminal_sequence(), 2);
        assert!(first.is_started());
        assert_eq!(f.table.terminal_list(), vec!["Terminal 1", "Terminal 2"]);
    }

    #[test]
    fn test_duplicate_caption_rejected_without_mutation() {
        let f = fixture();
        f.table
            .create_process(SpawnMode::Command("make".into()), ProcessOptions::default(), modal_info("Build"))
            .unwrap();
        let before = f.table.handles();

        let result = f.table.create_process(
            SpawnMode::Command("make".into()),
            ProcessOptions::default(),
            modal_info("Build"),
        );
        assert!(matches!(result, Err(ConsoleError::DuplicateCaption(c)) if c == "Build"));
        assert_eq!(f.table.handles(), before);

        let info = ConsoleProcessInfo {
            caption: "Build".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            f.table.start_terminal(info),
            Err(ConsoleError::DuplicateCaption(_))
        ));
        assert_eq!(f.table.len(), 1);
    }

    #[test]
    fn test_concurrent_terminal_creates_get_unique_captions() {
        use std::sync::Barrier;

        const THREADS: usize = 4;
        for _ in 0..200 {
            let f = fixture();
            let barrier = Barrier::new(THREADS);
            let results: Vec<_> = std::thread::scope(|scope| {
                let workers: Vec<_> = (0..THREADS)
                    .map(|_| {
                        scope.spawn(|| {
                            barrier.wait();
                            f.table.start_terminal(ConsoleProcessInfo::default())
                        })
                    })
                    .collect();
                workers.into_iter().map(|w| w.join().unwrap()).collect()
            });

            let mut captions: Vec<String> = results
                .into_iter()
                .map(|r| r.unwrap().caption())
                .collect();
            captions.sort();
            captions.dedup();
            assert_eq!(captions.len(), THREADS);
            assert_eq!(f.table.len(), THREADS);
        }
    }

    #[test]
    fn test_concurrent_restarts_reuse_one_process() {
        use std::sync::Barrier;

        let f = fixture();
        let terminal = f.new_terminal();
        f.supervisor.emit(ProcessEvent::Exit(0));
        f.table.poll_all();
        assert!(!terminal.is_started());

        let barrier = Barrier::new(4);
        let handles: Vec<String> = std::thread::scope(|scope| {
            let workers: Vec<_> = (0..4)
                .map(|_| {
                    scope.spawn(|| {
                        barrier.wait();
                        f.table.start_terminal(terminal.info()).unwrap()
                    })
                })
                .collect();
            workers
                .into_iter()
                .map(|w| w.join().unwrap().handle().to_string())
                .collect()
        });

        assert!(handles.iter().all(|h| h == terminal.handle()));
        assert_eq!(f.table.len(), 1);
        assert_eq!(f.supervisor.spawn_count(), 2);
    }

    #[test]
    fn test_set_caption() {
        let f = fixture();
        let first = f.new_terminal();
        let second = f.new_terminal();

        assert!(!f.table.set_caption(second.handle(), "Terminal 1").unwrap());
        assert_eq!(second.caption(), "Terminal 2");
        assert!(f.table.set_caption(second.handle(), "Logs").unwrap());
        assert_eq!(second.caption(), "Logs");
        // renaming to its own caption is fine
        assert!(f.table.set_caption(first.handle(), "Terminal 1").unwrap());
        assert!(matches!(
            f.table.set_caption("missing", "x"),
            Err(ConsoleError::UnknownHandle(_))
        ));
    }

    #[test]
    fn test_persistence_round_trip() {
        let f = fixture();
        let terminal = f.new_terminal();
        f.supervisor
            .emit(ProcessEvent::Output("hello\r\n".to_string()));
        let modal = f
            .table
            .create_process(SpawnMode::Command("make".into()), ProcessOptions::default(), modal_info("Build"))
            .unwrap();
        modal.start().unwrap();
        f.supervisor
            .emit(ProcessEvent::Output("compiled\n".to_string()));
        f.table.poll_all();
        terminal.poll();
        assert!(terminal.is_busy());

        let json = f.table.serialize().unwrap();
        f.table.processes.clear();
        assert!(f.table.is_empty());

        assert_eq!(f.table.deserialize(&json), 2);
        let restored = f.table.find_by_caption("Build").unwrap();
        assert_eq!(restored.handle(), modal.handle());
        assert_eq!(restored.saved_buffer(), "compiled\n");
        assert!(!restored.is_busy());
        assert!(!restored.is_started());

        let restored_terminal = f.table.find_by_handle(terminal.handle()).unwrap();
        assert_eq!(restored_terminal.caption(), "Terminal 1");
        assert_eq!(restored_terminal.saved_buffer(), "hello\r\n");
        assert!(!restored_terminal.is_busy());
    }

    #[test]
    fn test_malformed_index_discarded() {
        let f = fixture();
        f.new_terminal();
        assert_eq!(f.table.deserialize("{not json"), 0);
        assert!(f.table.is_empty());
    }

    #[test]
    fn test_deserialize_removes_orphaned_logs() {
        let f = fixture();
        f.storage().append_log("orphan", "old output").unwrap();
        let terminal = f.new_terminal();
        f.storage().append_log(terminal.handle(), "kept").unwrap();

        let json = f.table.serialize().unwrap();
        f.table.deserialize(&json);
        assert!(!f.storage().log_path("orphan").exists());
        assert!(f.storage().log_path(terminal.handle()).exists());
    }

    #[test]
    fn test_save_and_load() {
        let f = fixture();
        let terminal = f.new_terminal();
        f.table.save().unwrap();

        f.table.deserialize("[]");
        assert_eq!(f.table.load().unwrap(), 1);
        assert!(f.table.find_by_handle(terminal.handle()).is_some());
    }

    #[test]
    fn test_save_at_shutdown_keeps_restartable_only() {
        let f = fixture();
        let terminal = f.new_terminal();
        f.table
            .create_process(SpawnMode::Command("make".into()), ProcessOptions::default(), modal_info("Build"))
            .unwrap();
        f.table.set_visible(Some(terminal.handle())).unwrap();

        f.table.save().unwrap();
        f.table.save_at_shutdown(false).unwrap();
        let index = f.storage().load_index().unwrap().unwrap();
        let infos: Vec<ConsoleProcessInfo> = serde_json::from_str(&index).unwrap();
        assert_eq!(infos.len(), 2);

        f.table.save_at_shutdown(true).unwrap();
        let index = f.storage().load_index().unwrap().unwrap();
        let infos: Vec<ConsoleProcessInfo> = serde_json::from_str(&index).unwrap();
        assert_eq!(infos.len(), 1);
        assert_eq!(infos[0].handle, terminal.handle());
        assert!(!infos[0].started);
        assert_eq!(f.table.visible(), None);
    }

    #[test]
    fn test_zombie_terminal_not_auto_reaped() {
        let f = fixture_with(ConsoleSettings {
            auto_close: AutoClose::Never,
            ..Default::default()
        });
        let terminal = f.new_terminal();
        f.supervisor.emit(ProcessEvent::Exit(1));
        assert_eq!(f.table.poll_all(), 1);

        let proc = f.table.find_by_handle(terminal.handle()).unwrap();
        assert!(proc.is_zombie());
        assert!(f.table.reap(terminal.handle()));
        assert!(f.table.find_by_handle(terminal.handle()).is_none());
        assert!(!f.table.reap(terminal.handle()));
    }

    #[test]
    fn test_reap_deletes_files_and_clears_visible() {
        let f = fixture();
        let terminal = f.new_terminal();
        f.storage().append_log(terminal.handle(), "x").unwrap();
        f.storage().save_env(terminal.handle(), &[]).unwrap();
        f.table.set_visible(Some(terminal.handle())).unwrap();

        f.table.reap(terminal.handle());
        assert!(f.supervisor.ops().contains(&FakeOp::Terminate));
        assert!(!f.storage().log_path(terminal.handle()).exists());
        assert!(!f.storage().env_path(terminal.handle()).exists());
        assert_eq!(f.table.visible(), None);
    }

    #[test]
    fn test_restart_of_non_reloadable_shell_discards_buffer() {
        let f = fixture();
        let info = ConsoleProcessInfo {
            shell_type: ShellType::Cmd64,
            ..Default::default()
        };
        let terminal = f.table.start_terminal(info).unwrap();
        let handle = terminal.handle().to_string();
        f.supervisor
            .emit(ProcessEvent::Output("C:\\> dir\r\n".to_string()));
        f.supervisor.emit(ProcessEvent::Exit(0));
        f.table.poll_all();
        assert!(f.storage().log_path(&handle).exists());

        let restarted = f.table.start_terminal(terminal.info()).unwrap();
        assert_eq!(restarted.handle(), handle);
        assert!(restarted.was_restarted());
        assert!(restarted.is_started());
        assert!(!f.storage().log_path(&handle).exists());
        assert_eq!(f.supervisor.spawn_count(), 2);
    }

    #[test]
    fn test_restart_of_reloadable_shell_keeps_buffer() {
        let f = fixture();
        let terminal = f.new_terminal();
        f.supervisor
            .emit(ProcessEvent::Output("$ ls\r\n".to_string()));
        f.supervisor.emit(ProcessEvent::Exit(0));
        f.table.poll_all();

        let restarted = f.table.start_terminal(terminal.info()).unwrap();
        assert!(restarted.was_restarted());
        assert_eq!(restarted.saved_buffer(), "$ ls\r\n");
    }

    #[test]
    fn test_reattach_to_running_terminal_jiggles_size() {
        let f = fixture();
        let terminal = f.new_terminal();
        let again = f.table.start_terminal(terminal.info()).unwrap();
        assert!(Arc::ptr_eq(&terminal, &again));
        assert_eq!(f.supervisor.spawn_count(), 1);

        terminal.poll();
        assert!(f.supervisor.ops().contains(&FakeOp::Resize(25, 5)));
    }

    #[test]
    fn test_failed_start_reaps_terminal() {
        let f = fixture();
        f.supervisor.fail.store(true, Ordering::SeqCst);
        let result = f.table.start_terminal(ConsoleProcessInfo::default());
        assert!(matches!(result, Err(ConsoleError::Spawn { .. })));
        assert!(f.table.is_empty());
    }

    #[test]
    fn test_visible_handle() {
        let f = fixture();
        let terminal = f.new_terminal();
        f.table.set_visible(Some(terminal.handle())).unwrap();
        assert_eq!(f.table.terminal_visible().as_deref(), Some("Terminal 1"));

        assert!(f.table.set_visible(Some("missing")).is_err());
        assert_eq!(f.table.visible(), None);

        f.table.set_visible(Some(terminal.handle())).unwrap();
        f.table.set_visible(Some("")).unwrap();
        assert_eq!(f.table.visible(), None);
    }

    #[test]
    fn test_terminal_create_emits_event() {
        let f = fixture();
        f.new_terminal();
        assert_eq!(f.table.terminal_create(None).unwrap(), "Terminal 2");
        assert_eq!(
            f.last_event(),
            ClientEvent::CreateNamedTerminal {
                id: "Terminal 2".to_string()
            }
        );
        assert_eq!(f.table.terminal_create(Some("R")).unwrap(), "R");
        assert!(matches!(
            f.table.terminal_create(Some("Terminal 1")),
            Err(ConsoleError::DuplicateCaption(_))
        ));
    }

    #[test]
    fn test_terminal_context_and_buffer() {
        let f = fixture();
        let terminal = f.new_terminal();
        f.supervisor
            .emit(ProcessEvent::Output("\x1b[32mok\x1b[0m\nnext".to_string()));
        terminal.poll();

        let context = f.table.terminal_context("Terminal 1").unwrap();
        assert_eq!(context.handle, terminal.handle());
        assert_eq!(context.sequence, 1);
        assert!(context.running);
        assert_eq!(context.lines, 2);
        assert_eq!(context.connection, "rpc");
        assert_eq!(context.shell, "Default");

        assert_eq!(
            f.table.terminal_buffer("Terminal 1", true).unwrap(),
            vec!["ok", "next"]
        );
        let err = f.table.terminal_buffer("nope", false).unwrap_err();
        assert_eq!(err.to_string(), "Unknown terminal 'nope'");
    }

    #[test]
    fn test_terminal_busy_and_running() {
        let f = fixture();
        f.new_terminal();
        let captions = vec!["Terminal 1".to_string(), "missing".to_string()];
        assert_eq!(f.table.terminal_busy(&captions), vec![true, false]);
        assert_eq!(f.table.terminal_running(&captions), vec![true, false]);
    }

    #[test]
    fn test_terminal_send_requires_running() {
        let f = fixture_with(ConsoleSettings {
            auto_close: AutoClose::Never,
            ..Default::default()
        });
        f.new_terminal();
        f.table.terminal_send("Terminal 1", "ls\n").unwrap();
        assert!(f.supervisor.ops().contains(&FakeOp::Write("ls\n".to_string())));

        f.supervisor.emit(ProcessEvent::Exit(0));
        f.table.poll_all();
        let err = f.table.terminal_send("Terminal 1", "ls\n").unwrap_err();
        assert_eq!(err.to_string(), "Terminal is not running and cannot accept input");
    }

    #[test]
    fn test_terminal_clear_and_kill() {
        let f = fixture();
        let terminal = f.new_terminal();
        f.storage().append_log(terminal.handle(), "junk").unwrap();

        f.table.terminal_clear("Terminal 1").unwrap();
        assert_eq!(terminal.saved_buffer(), "");
        assert_eq!(
            f.last_event(),
            ClientEvent::ClearTerminal {
                id: "Terminal 1".to_string()
            }
        );

        f.table
            .terminal_kill(&["Terminal 1".to_string()])
            .unwrap();
        assert!(f.table.is_empty());
        assert!(f.supervisor.ops().contains(&FakeOp::Interrupt));
    }

    #[test]
    fn test_terminal_activate_restarts_and_shows() {
        let f = fixture();
        let terminal = f.new_terminal();
        f.supervisor.emit(ProcessEvent::Exit(0));
        f.table.poll_all();
        assert!(!terminal.is_started());

        f.table.terminal_activate(Some("Terminal 1"), true).unwrap();
        assert!(terminal.is_started());
        assert_eq!(f.supervisor.spawn_count(), 2);
        assert_eq!(
            f.last_event(),
            ClientEvent::ActivateTerminal {
                id: "Terminal 1".to_string()
            }
        );
        assert!(f.table.terminal_activate(Some("nope"), false).is_err());
    }

    #[test]
    fn test_websocket_input_routed_by_handle() {
        let f = fixture();
        let terminal = f.new_terminal();
        assert!(f.table.accepts(terminal.handle()));
        assert!(!f.table.accepts("missing"));

        f.table.on_input(terminal.handle(), "pwd\r");
        assert_eq!(f.supervisor.ops(), vec![FakeOp::Write("pwd\r".to_string())]);
    }
}
