/// Global admission control across in-flight grade requests
///
/// At most `capacity` requests hold a permit. Further requests wait in FIFO
/// order up to `queue_depth`; past that the caller gets backpressure.
use crate::config::types::{poisoned, GradeError, Result};
use crate::sandbox::CancelToken;
use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::Duration;

const CANCEL_POLL: Duration = Duration::from_millis(25);

#[derive(Debug, Default)]
struct AdmissionState {
    active: usize,
    next_ticket: u64,
    waiting: VecDeque<u64>,
}

#[derive(Debug)]
pub struct AdmissionController {
    capacity: usize,
    queue_depth: usize,
    state: Mutex<AdmissionState>,
    turn: Condvar,
}

/// Held for the duration of one grade; releases its slot on drop.
#[derive(Debug)]
pub struct AdmissionPermit<'a> {
    controller: &'a AdmissionController,
    /// True when the request had to wait in the queue
    pub queued: bool,
}

impl AdmissionController {
    pub fn new(capacity: usize, queue_depth: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            queue_depth,
            state: Mutex::new(AdmissionState::default()),
            turn: Condvar::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// (active, waiting)
    pub fn load(&self) -> (usize, usize) {
        match self.state.lock() {
            Ok(state) => (state.active, state.waiting.len()),
            Err(poison) => {
                let state = poison.into_inner();
                (state.active, state.waiting.len())
            }
        }
    }

    pub fn admit(&self, cancel: &CancelToken) -> Result<AdmissionPermit<'_>> {
        let mut state = self.state.lock().map_err(poisoned)?;
        if state.waiting.is_empty() && state.active < self.capacity {
            state.active += 1;
            return Ok(AdmissionPermit {
                controller: self,
                queued: false,
            });
        }
        if state.waiting.len() >= self.queue_depth {
            return Err(GradeError::Backpressure {
                queue_depth: self.queue_depth,
            });
        }

        let ticket = state.next_ticket;
        state.next_ticket += 1;
        state.waiting.push_back(ticket);
        log::debug!("Grade request queued (ticket {}, {} waiting)", ticket, state.waiting.len());

        loop {
            if cancel.is_cancelled() {
                state.waiting.retain(|t| *t != ticket);
                self.turn.notify_all();
                return Err(GradeError::Cancelled);
            }
            if state.waiting.front() == Some(&ticket) && state.active < self.capacity {
                state.waiting.pop_front();
                state.active += 1;
                // The next ticket may also fit if several permits were freed.
                self.turn.notify_all();
                return Ok(AdmissionPermit {
                    controller: self,
                    queued: true,
                });
            }
            let (guard, _) = self
                .turn
                .wait_timeout(state, CANCEL_POLL)
                .map_err(poisoned)?;
            state = guard;
        }
    }

    fn release(&self) {
        let mut state = match self.state.lock() {
            Ok(state) => state,
            Err(poison) => poison.into_inner(),
        };
        state.active = state.active.saturating_sub(1);
        self.turn.notify_all();
    }
}

impl Drop for AdmissionPermit<'_> {
    fn drop(&mut self) {
        self.controller.release();
    }
}
