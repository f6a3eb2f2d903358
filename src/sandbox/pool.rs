/// Fixed pool of scratch slots
///
/// A slot is a directory one execution owns exclusively. Slots go back on
/// the free list only after being wiped, and a slot whose wipe failed is
/// wiped again before its next use. With per-slot identities each slot is
/// owned by its own uid, so payloads in different slots cannot reach each
/// other's files, processes or /proc entries.
use crate::config::types::{GradeError, Result};
use crate::sandbox::cancel::CancelToken;
use crate::sandbox::workspace::{is_empty_dir, reset_dir, ScratchOwner};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use std::path::{Path, PathBuf};
use std::time::Duration;

const ACQUIRE_POLL: Duration = Duration::from_millis(25);

/// First uid/gid of the per-slot identities
pub const SLOT_ID_BASE: u32 = 60000;

/// Unprivileged identity owning slot `id`
pub fn slot_identity(id: usize) -> ScratchOwner {
    let id = SLOT_ID_BASE + id as u32;
    ScratchOwner { uid: id, gid: id }
}

pub struct SlotPool {
    slots_dir: PathBuf,
    size: usize,
    per_slot_identity: bool,
    free_tx: Sender<usize>,
    free_rx: Receiver<usize>,
}

/// Exclusive lease on one slot; wiped and returned on drop.
pub struct SlotGuard<'a> {
    pool: &'a SlotPool,
    id: usize,
    workdir: PathBuf,
}

impl SlotPool {
    pub fn new(root: &Path, size: usize, per_slot_identity: bool) -> Result<Self> {
        if size == 0 {
            return Err(GradeError::Configuration(
                "sandbox slot count must be at least 1".to_string(),
            ));
        }
        let slots_dir = root.join("slots");
        let (free_tx, free_rx) = bounded(size);
        let pool = Self {
            slots_dir,
            size,
            per_slot_identity,
            free_tx,
            free_rx,
        };
        for id in 0..size {
            reset_dir(&pool.slot_path(id), pool.owner(id))?;
            pool.free_tx
                .send(id)
                .map_err(|_| GradeError::Sandbox("slot free list closed".to_string()))?;
        }
        log::debug!("Sandbox pool ready: {} slots under {}", size, pool.slots_dir.display());
        Ok(pool)
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn available(&self) -> usize {
        self.free_rx.len()
    }

    pub fn slots_dir(&self) -> &Path {
        &self.slots_dir
    }

    fn owner(&self, id: usize) -> Option<ScratchOwner> {
        self.per_slot_identity.then(|| slot_identity(id))
    }

    fn slot_path(&self, id: usize) -> PathBuf {
        self.slots_dir.join(format!("slot-{}", id))
    }

    /// Block until a slot is free or `cancel` fires
    pub fn acquire(&self, cancel: &CancelToken) -> Result<SlotGuard<'_>> {
        loop {
            cancel.check()?;
            match self.free_rx.recv_timeout(ACQUIRE_POLL) {
                Ok(id) => {
                    let workdir = self.slot_path(id);
                    if !is_empty_dir(&workdir) {
                        log::warn!("Slot {} was not clean on acquire; resetting", id);
                        if let Err(e) = reset_dir(&workdir, self.owner(id)) {
                            self.release(id);
                            return Err(e);
                        }
                    }
                    return Ok(SlotGuard {
                        pool: self,
                        id,
                        workdir,
                    });
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(GradeError::Sandbox("slot free list closed".to_string()))
                }
            }
        }
    }

    fn release(&self, id: usize) {
        if self.free_tx.send(id).is_err() {
            log::error!("Failed to return slot {} to the pool", id);
        }
    }
}

impl SlotGuard<'_> {
    pub fn id(&self) -> usize {
        self.id
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// Identity payloads in this slot run as, if the pool isolates slots
    pub fn owner(&self) -> Option<ScratchOwner> {
        self.pool.owner(self.id)
    }
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = reset_dir(&self.workdir, self.pool.owner(self.id)) {
            log::error!("Failed to reset slot {}: {}", self.id, e);
        }
        self.pool.release(self.id);
    }
}
