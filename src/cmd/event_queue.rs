/*!
Cooperative event queue.

Every piece of work in the console (command dispatch, stack callbacks,
procedure timeouts) runs as a task on one `tokio::task::LocalSet`. This
module wraps `spawn_local` into the three primitives the command layer
needs:

  post(f)            run `f` on the next turn of the queue
  post_in(delay, f)  run `f` once `delay` has elapsed
  cancel(handle)     drop a posted event before it runs

All functions must be called from inside a `LocalSet` context.
*/

use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;

use tokio::task::{self, AbortHandle};

use crate::log_trace;

/// Handle to a posted event, used to cancel it.
#[derive(Debug)]
pub struct EventHandle {
    id: u64,
    abort: AbortHandle,
}

/// Single threaded task queue. Clones share the same id sequence.
#[derive(Clone, Debug, Default)]
pub struct EventQueue {
    next_id: Rc<Cell<u64>>,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate_id(&self) -> u64 {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        id
    }

    /// Run `f` on the next turn of the queue.
    pub fn post<F>(&self, f: F) -> EventHandle
    where
        F: FnOnce() + 'static,
    {
        let id = self.allocate_id();
        log_trace!("event #{id} posted");
        let join = task::spawn_local(async move { f() });
        EventHandle {
            id,
            abort: join.abort_handle(),
        }
    }

    /// Run `f` after `delay`.
    pub fn post_in<F>(&self, delay: Duration, f: F) -> EventHandle
    where
        F: FnOnce() + 'static,
    {
        let id = self.allocate_id();
        log_trace!("event #{id} posted in {}ms", delay.as_millis());
        let join = task::spawn_local(async move {
            tokio::time::sleep(delay).await;
            f();
        });
        EventHandle {
            id,
            abort: join.abort_handle(),
        }
    }

    /// Cancel a pending event. Returns false if it already ran.
    pub fn cancel(&self, handle: EventHandle) -> bool {
        let pending = !handle.abort.is_finished();
        handle.abort.abort();
        log_trace!("event #{} cancelled (pending: {pending})", handle.id);
        pending
    }
}

/* --------------------------------- Tests ---------------------------------- */
