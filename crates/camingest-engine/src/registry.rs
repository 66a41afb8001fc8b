//! Bounded registry of reader sessions.
//!
//! Shared sessions are deduplicated by stream name; dedicated sessions are
//! always new. The table lock is never held while waiting for a session
//! thread or while calling into a consumer.

use std::sync::Arc;
use std::time::Instant;

use crossbeam_channel::Sender;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use camingest_source::SourceOpener;
use camingest_types::{IngestEvent, SessionId, SessionState, SessionStats, StopReason, StreamConfig};

use crate::catalog::ConfigLookup;
use crate::config::EngineConfig;
use crate::dispatch::PacketCallback;
use crate::error::IngestError;
use crate::session::{SessionHandle, SessionShared, Worker};
use crate::IngestResult;

/// Snapshot of one registered session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub id: SessionId,
    pub name: String,
    pub dedicated: bool,
    pub state: SessionState,
    pub stats: SessionStats,
}

struct SlotEntry {
    shared: Arc<SessionShared>,
    worker: Worker,
}

#[derive(Default)]
struct Slot {
    generation: u64,
    entry: Option<SlotEntry>,
}

struct SlotTable {
    slots: Vec<Slot>,
}

impl SlotTable {
    fn new(capacity: usize) -> Self {
        Self {
            slots: (0..capacity).map(|_| Slot::default()).collect(),
        }
    }

    fn entries(&self) -> impl Iterator<Item = &SlotEntry> {
        self.slots.iter().filter_map(|slot| slot.entry.as_ref())
    }

    fn find(&self, name: &str, dedicated: bool) -> Option<&SlotEntry> {
        self.entries()
            .find(|e| e.shared.is_dedicated() == dedicated && e.shared.name() == name)
    }

    /// Id for the next session placed in the first free slot.
    fn next_id(&self) -> Option<SessionId> {
        self.slots
            .iter()
            .position(|slot| slot.entry.is_none())
            .map(|index| SessionId {
                slot: index,
                generation: self.slots[index].generation + 1,
            })
    }

    fn occupy(&mut self, id: SessionId, entry: SlotEntry) {
        let slot = &mut self.slots[id.slot];
        slot.generation = id.generation;
        slot.entry = Some(entry);
    }

    fn remove(&mut self, id: SessionId) -> Option<SlotEntry> {
        let slot = self.slots.get_mut(id.slot)?;
        if slot.entry.as_ref().is_some_and(|e| e.shared.id() == id) {
            slot.entry.take()
        } else {
            None
        }
    }

    fn drain(&mut self) -> Vec<SlotEntry> {
        self.slots
            .iter_mut()
            .filter_map(|slot| slot.entry.take())
            .collect()
    }
}

/// Owns every reader session and the threads driving them.
pub struct ReaderRegistry {
    config: EngineConfig,
    catalog: Arc<dyn ConfigLookup>,
    opener: Arc<dyn SourceOpener>,
    events: Option<Sender<IngestEvent>>,
    table: Mutex<SlotTable>,
    stop_lock: Mutex<()>,
}

impl ReaderRegistry {
    /// Create a registry with `config.max_sessions` slots.
    pub fn new(
        config: EngineConfig,
        catalog: Arc<dyn ConfigLookup>,
        opener: Arc<dyn SourceOpener>,
    ) -> Self {
        let table = Mutex::new(SlotTable::new(config.max_sessions));
        Self {
            config,
            catalog,
            opener,
            events: None,
            table,
            stop_lock: Mutex::new(()),
        }
    }

    /// Publish lifecycle events on `events`.
    pub fn with_events(mut self, events: Sender<IngestEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Number of slots.
    pub fn capacity(&self) -> usize {
        self.config.max_sessions
    }

    /// Start a reader for `name`, or return the running shared one.
    ///
    /// A shared start on a name that already has a running shared session
    /// returns that session, replacing its consumer when one is given.
    #[instrument(skip(self, name, consumer), fields(stream = %name))]
    pub fn start(
        &self,
        name: &str,
        dedicated: bool,
        consumer: Option<PacketCallback>,
    ) -> IngestResult<SessionHandle> {
        let config = self
            .catalog
            .stream_config(name)
            .ok_or_else(|| IngestError::ConfigNotFound(name.to_string()))?;
        config.validate()?;

        let mut reaped = None;
        let result = {
            let mut table = self.table.lock();

            let existing = if dedicated {
                None
            } else {
                table.find(name, false).map(|e| Arc::clone(&e.shared))
            };

            match existing {
                Some(shared) if shared.is_running() => {
                    drop(table);
                    let handle = SessionHandle::new(shared);
                    if let Some(consumer) = consumer {
                        handle.set_consumer(Some(consumer));
                        info!(id = %handle.id(), "Updated consumer for existing stream reader");
                    } else {
                        debug!(id = %handle.id(), "Stream reader already running");
                    }
                    return Ok(handle);
                }
                Some(shared) => {
                    info!(id = %shared.id(), "Replacing stopped stream reader");
                    reaped = table.remove(shared.id());
                }
                None => {}
            }

            self.spawn_locked(&mut table, config, dedicated, consumer)
        };

        if let Some(entry) = reaped {
            self.finish(entry);
        }

        result
    }

    fn spawn_locked(
        &self,
        table: &mut SlotTable,
        config: StreamConfig,
        dedicated: bool,
        consumer: Option<PacketCallback>,
    ) -> IngestResult<SessionHandle> {
        let id = table.next_id().ok_or_else(|| {
            warn!(capacity = self.capacity(), "Maximum stream readers reached");
            IngestError::ResourceExhausted {
                capacity: self.capacity(),
            }
        })?;

        let name = config.name.clone();
        let shared = Arc::new(SessionShared::new(
            id,
            config,
            dedicated,
            consumer,
            self.events.clone(),
        ));
        shared.emit(IngestEvent::SessionStarted {
            id,
            name,
            dedicated,
        });

        let worker =
            match Worker::spawn(Arc::clone(&shared), Arc::clone(&self.opener), self.config.clone()) {
                Ok(worker) => worker,
                Err(e) => {
                    shared.emit(IngestEvent::SessionStopped {
                        id,
                        name: shared.name().to_string(),
                        reason: StopReason::Failed {
                            message: e.to_string(),
                        },
                    });
                    return Err(e);
                }
            };

        table.occupy(
            id,
            SlotEntry {
                shared: Arc::clone(&shared),
                worker,
            },
        );

        info!(%id, dedicated, "Started stream reader");
        Ok(SessionHandle::new(shared))
    }

    /// Wait for a session that already stopped by itself.
    fn finish(&self, entry: SlotEntry) {
        entry.shared.request_stop();
        if let Err(e) = entry.worker.wait(self.config.stop_timeout()) {
            warn!(error = %e, "Stopped stream reader did not exit");
        }
    }

    /// Stop a session and wait for its thread.
    ///
    /// Stopping a handle that is no longer registered is a no-op. On
    /// timeout the session is still removed and its thread is detached.
    #[instrument(skip(self, handle), fields(stream = %handle.name(), id = %handle.id()))]
    pub fn stop(&self, handle: &SessionHandle) -> IngestResult<()> {
        let _serial = self.stop_lock.lock();

        let entry = {
            let mut table = self.table.lock();
            let Some(entry) = table.remove(handle.id()) else {
                debug!("Stream reader already stopped");
                return Ok(());
            };
            entry.shared.clear_consumer();
            entry.shared.request_stop();
            entry
        };

        info!("Stopping stream reader");

        if entry.worker.is_current_thread() {
            debug!("Stop requested from the reader thread, not waiting");
            return Ok(());
        }

        entry.worker.wait(self.config.stop_timeout())?;
        info!("Stopped stream reader");
        Ok(())
    }

    /// Find a session by name, preferring a dedicated one.
    pub fn lookup(&self, name: &str) -> Option<SessionHandle> {
        let table = self.table.lock();
        table
            .find(name, true)
            .or_else(|| table.find(name, false))
            .map(|e| SessionHandle::new(Arc::clone(&e.shared)))
    }

    /// Session occupying `slot`, if any.
    pub fn session_at(&self, slot: usize) -> Option<SessionHandle> {
        let table = self.table.lock();
        table
            .slots
            .get(slot)
            .and_then(|s| s.entry.as_ref())
            .map(|e| SessionHandle::new(Arc::clone(&e.shared)))
    }

    /// Snapshot of all registered sessions, in slot order.
    pub fn sessions(&self) -> Vec<SessionInfo> {
        let table = self.table.lock();
        table
            .entries()
            .map(|e| SessionInfo {
                id: e.shared.id(),
                name: e.shared.name().to_string(),
                dedicated: e.shared.is_dedicated(),
                state: e.shared.state(),
                stats: e.shared.metrics().snapshot(),
            })
            .collect()
    }

    /// Number of registered sessions for `name`.
    pub fn count(&self, name: &str) -> usize {
        self.table
            .lock()
            .entries()
            .filter(|e| e.shared.name() == name)
            .count()
    }

    pub fn len(&self) -> usize {
        self.table.lock().entries().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stop every session, waiting at most the shutdown timeout in total.
    #[instrument(skip(self))]
    pub fn shutdown_all(&self) {
        let _serial = self.stop_lock.lock();

        let entries = {
            let mut table = self.table.lock();
            let entries = table.drain();
            for entry in &entries {
                debug!(stream = %entry.shared.name(), id = %entry.shared.id(), "Preparing to stop");
                entry.shared.clear_consumer();
                entry.shared.request_stop();
            }
            entries
        };

        if entries.is_empty() {
            return;
        }

        info!(count = entries.len(), "Shutting down stream readers");

        let timeout = self.config.shutdown_timeout();
        let deadline = Instant::now() + timeout;

        for entry in entries {
            let name = entry.shared.name().to_string();
            if entry.worker.is_current_thread() {
                continue;
            }
            match entry.worker.wait_until(deadline, timeout) {
                Ok(()) => debug!(stream = %name, "Stream reader joined"),
                Err(e) => warn!(stream = %name, error = %e, "Detaching stream reader thread"),
            }
        }

        info!("Stream readers shut down");
    }
}

impl Drop for ReaderRegistry {
    fn drop(&mut self) {
        self.shutdown_all();
    }
}
