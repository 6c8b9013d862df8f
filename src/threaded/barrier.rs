use crate::error::{Result, SpanError};
use std::sync::{Condvar, Mutex};

/// A reusable counting barrier.
///
/// The last thread to arrive resets the count and flips `generation`;
/// everyone else sleeps until the generation differs from the one they
/// saw on entry. A thread that races ahead into the next round bumps the
/// count for that round without waking or confusing a slow waiter.
pub struct GenerationBarrier {
    total: usize,
    state: Mutex<BarrierState>,
    cvar: Condvar,
}

struct BarrierState {
    arrived: usize,
    generation: bool,
}

impl GenerationBarrier {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            state: Mutex::new(BarrierState {
                arrived: 0,
                generation: false,
            }),
            cvar: Condvar::new(),
        }
    }

    /// Block until `total` threads have called `wait`. Returns `true` on
    /// exactly one thread per round, the last to arrive.
    pub fn wait(&self) -> Result<bool> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| SpanError::LockPoisoned("barrier"))?;
        let entered = state.generation;
        state.arrived += 1;

        if state.arrived >= self.total {
            state.arrived = 0;
            state.generation = !entered;
            self.cvar.notify_all();
            return Ok(true);
        }

        let _state = self
            .cvar
            .wait_while(state, |s| s.generation == entered)
            .map_err(|_| SpanError::LockPoisoned("barrier"))?;
        Ok(false)
    }
}
