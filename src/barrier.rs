//! Start gate that lines up the first command byte of every worker in a batch.
//!
//! The gate is a counting latch plus a release signal. It releases once the
//! orchestrator has opened it and every participant has arrived. Arrival is
//! counted even when a worker gives up early (failed open, panic, dropped
//! ticket), so one broken camera never holds the others back.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default)]
struct GateState {
    participants: usize,
    arrived: usize,
    opened: bool,
    generation: u64,
}

impl GateState {
    const fn released(&self) -> bool {
        self.opened && self.arrived >= self.participants
    }
}

/// Observable gate state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateStatus {
    /// Workers block at the gate.
    Closed,
    /// Workers pass freely.
    Open,
}

/// Shared start gate for one batch at a time.
#[derive(Debug, Default)]
pub struct StartGate {
    state: Mutex<GateState>,
    released: Condvar,
}

impl StartGate {
    /// A closed gate with no participants.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Close the gate for a new batch of `participants` workers.
    ///
    /// Tickets from an earlier batch no longer count.
    pub fn reset(&self, participants: usize) {
        let mut state = self.lock();
        state.participants = participants;
        state.arrived = 0;
        state.opened = false;
        state.generation = state.generation.wrapping_add(1);
    }

    /// Hand out one participant ticket for the current batch.
    pub fn ticket(&self) -> GateTicket<'_> {
        let generation = self.lock().generation;
        GateTicket {
            gate: self,
            generation,
            arrived: false,
        }
    }

    /// Open the gate; it releases as soon as every participant has arrived.
    pub fn open(&self) {
        let mut state = self.lock();
        state.opened = true;
        if state.released() {
            self.released.notify_all();
        }
    }

    /// Guard that opens the gate when dropped.
    pub fn open_on_drop(&self) -> OpenGuard<'_> {
        OpenGuard { gate: self }
    }

    /// Current state.
    pub fn status(&self) -> GateStatus {
        if self.lock().released() {
            GateStatus::Open
        } else {
            GateStatus::Closed
        }
    }

    /// Participants that have arrived in the current batch.
    pub fn arrived(&self) -> usize {
        self.lock().arrived
    }

    fn arrive(&self, generation: u64) -> MutexGuard<'_, GateState> {
        let mut state = self.lock();
        if state.generation == generation {
            state.arrived += 1;
            if state.released() {
                self.released.notify_all();
            }
        }
        state
    }
}

/// One participant's place at the gate.
///
/// Dropping a ticket without waiting still counts as arrival.
#[derive(Debug)]
pub struct GateTicket<'a> {
    gate: &'a StartGate,
    generation: u64,
    arrived: bool,
}

impl GateTicket<'_> {
    /// Arrive and block until the gate releases.
    pub fn wait(mut self) {
        self.arrived = true;
        let generation = self.generation;
        let state = self.gate.arrive(generation);
        let _released = self
            .gate
            .released
            .wait_while(state, |state| {
                state.generation == generation && !state.released()
            })
            .unwrap_or_else(PoisonError::into_inner);
    }
}

impl Drop for GateTicket<'_> {
    fn drop(&mut self) {
        if !self.arrived {
            self.arrived = true;
            drop(self.gate.arrive(self.generation));
        }
    }
}

/// Opens the gate on every exit path of the orchestrator.
#[derive(Debug)]
pub struct OpenGuard<'a> {
    gate: &'a StartGate,
}

impl Drop for OpenGuard<'_> {
    fn drop(&mut self) {
        self.gate.open();
    }
}
