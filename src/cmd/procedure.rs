/*!
Asynchronous procedures.

Commands that must wait for a stack callback (connection complete,
initialization done, ...) start a `Procedure`. The procedure retains the
command response, arms a timeout and from then on owns itself:

  start -> do_start() ------------------------> false: terminate
                 |
                 +-- stack callback: update(..) -> Step::Terminate
                 +-- timeout fires:  do_when_timeout(), terminate

Whichever of the callback or the timeout comes first wins; after
`terminate` the procedure value is dropped, the timeout is cancelled and
the retained response is released (which closes it and reports the final
status to the console). Late callbacks find the procedure gone and are
ignored.

Stack callbacks reach the procedure through a `ProcedureHandle`, a weak
reference that never keeps a terminated procedure alive.
*/

use std::cell::RefCell;
use std::rc::{Rc, Weak};
use std::time::Duration;

use crate::cmd::event_queue::{EventHandle, EventQueue};
use crate::cmd::response::{CommandResponse, PendingResponse, ResponseHandle};
use crate::{log_debug, log_trace};

/// Outcome of an update applied to a running procedure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Step {
    Continue,
    Terminate,
}

pub trait Procedure: Sized + 'static {
    /// Name used in traces.
    const NAME: &'static str;

    /// Kick off the stack operation. Returning false terminates the
    /// procedure right away; the failure must already be written to
    /// `response`.
    fn do_start(&mut self, this: &ProcedureHandle<Self>, response: &CommandResponse) -> bool;

    /// Called when the timeout fires, before termination.
    fn do_when_timeout(&mut self, response: &CommandResponse) {
        response.failure_with("timeout");
    }
}

// Field order is drop order: the procedure goes first so its cleanup
// (detaching stack handlers) runs before the response is released.
struct Running<P> {
    procedure: P,
    timeout: Option<EventHandle>,
    response: PendingResponse,
    _owner: Rc<ProcedureCell<P>>,
}

struct ProcedureCell<P> {
    state: RefCell<Option<Running<P>>>,
    queue: EventQueue,
}

impl<P: Procedure> ProcedureCell<P> {
    fn terminate(&self) {
        let running = self.state.borrow_mut().take();
        let Some(mut running) = running else {
            return;
        };
        if let Some(timeout) = running.timeout.take() {
            self.queue.cancel(timeout);
        }
        log_debug!("procedure {} terminated", P::NAME);
        drop(running);
    }
}

/// Weak handle given to stack callbacks.
pub struct ProcedureHandle<P>(Weak<ProcedureCell<P>>);

impl<P> Clone for ProcedureHandle<P> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<P: Procedure> ProcedureHandle<P> {
    pub fn is_running(&self) -> bool {
        self.0
            .upgrade()
            .is_some_and(|cell| cell.state.borrow().is_some())
    }

    /// Apply `f` to the procedure if it is still running; terminate it
    /// when `f` returns `Step::Terminate`.
    ///
    /// When called re-entrantly (from inside `do_start` or another update)
    /// the update is re-posted on the event queue.
    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&mut P, &CommandResponse) -> Step + 'static,
    {
        let Some(cell) = self.0.upgrade() else {
            log_trace!("procedure {} gone, update dropped", P::NAME);
            return;
        };
        let step = match cell.state.try_borrow_mut() {
            Ok(mut state) => match state.as_mut() {
                Some(running) => f(&mut running.procedure, &running.response),
                None => return,
            },
            Err(_) => {
                let this = self.clone();
                cell.queue.post(move || this.update(f));
                return;
            }
        };
        if step == Step::Terminate {
            cell.terminate();
        }
    }

    /// Terminate without touching the response.
    pub fn terminate(&self) {
        if let Some(cell) = self.0.upgrade() {
            match cell.state.try_borrow_mut() {
                Ok(state) => {
                    drop(state);
                    cell.terminate();
                }
                Err(_) => {
                    let this = self.clone();
                    cell.queue.post(move || this.terminate());
                }
            }
        }
    }

    fn when_timeout(&self) {
        let Some(cell) = self.0.upgrade() else {
            return;
        };
        {
            let mut state = cell.state.borrow_mut();
            let Some(running) = state.as_mut() else {
                return;
            };
            // The timer is the event currently running.
            running.timeout = None;
            log_debug!("procedure {} timed out", P::NAME);
            running.procedure.do_when_timeout(&running.response);
        }
        cell.terminate();
    }
}

/// Build and start a procedure for `response`, timing out after `timeout`.
///
/// Returns a handle to the procedure; it stops running once terminated.
pub fn start_procedure<P: Procedure>(
    queue: &EventQueue,
    response: &ResponseHandle,
    timeout: Duration,
    procedure: P,
) -> ProcedureHandle<P> {
    let cell = Rc::new(ProcedureCell {
        state: RefCell::new(None),
        queue: queue.clone(),
    });
    let handle = ProcedureHandle(Rc::downgrade(&cell));

    let timer = {
        let handle = handle.clone();
        queue.post_in(timeout, move || handle.when_timeout())
    };
    *cell.state.borrow_mut() = Some(Running {
        procedure,
        timeout: Some(timer),
        response: response.retain(),
        _owner: Rc::clone(&cell),
    });
    log_debug!("procedure {} started (timeout {}ms)", P::NAME, timeout.as_millis());

    let started = {
        let mut state = cell.state.borrow_mut();
        match state.as_mut() {
            Some(running) => running.procedure.do_start(&handle, &running.response),
            None => false,
        }
    };
    if !started {
        cell.terminate();
    }
    handle
}

/* --------------------------------- Tests ---------------------------------- */
