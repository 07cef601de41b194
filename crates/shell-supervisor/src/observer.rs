//! Observer registry for supervisor events
//!
//! Handlers run on the worker thread that raised the event. A handler that
//! panics costs only the notification it was processing: the panic is
//! caught, wrapped in [`Error::Invocation`] and reported through the fault
//! handlers, and delivery continues with the next handler and the next item.
//!
//! Every delivery holds the gate for reading; [`Observers::close`] takes it
//! for writing, so once it returns no handler is running or will run.

use std::cell::Cell;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, error, warn};

use crate::error::Error;
use crate::event::{ShellEvent, ShellEventKind};

type EventHandler = Arc<dyn Fn(&ShellEvent) + Send + Sync>;
type FaultHandler = Arc<dyn Fn(&Error) + Send + Sync>;

thread_local! {
    static DELIVERING: Cell<bool> = const { Cell::new(false) };
}

/// Registered event and fault handlers
#[derive(Default)]
pub(crate) struct Observers {
    events: RwLock<Vec<EventHandler>>,
    faults: RwLock<Vec<FaultHandler>>,
    gate: RwLock<()>,
    closed: AtomicBool,
}

impl Observers {
    pub(crate) fn subscribe(&self, handler: impl Fn(&ShellEvent) + Send + Sync + 'static) {
        let mut events = self.events.write().unwrap_or_else(PoisonError::into_inner);
        // Dropping the handler releases whatever it captured, e.g. a channel sender.
        if !self.closed.load(Ordering::SeqCst) {
            events.push(Arc::new(handler));
        }
    }

    pub(crate) fn on_fault(&self, handler: impl Fn(&Error) + Send + Sync + 'static) {
        let mut faults = self.faults.write().unwrap_or_else(PoisonError::into_inner);
        if !self.closed.load(Ordering::SeqCst) {
            faults.push(Arc::new(handler));
        }
    }

    /// Deliver `event` to every event handler
    pub(crate) fn emit(&self, event: &ShellEvent) {
        self.gated(|| self.deliver(event));
    }

    /// Report a supervisor error to fault handlers and as a `Fault` event
    pub(crate) fn fault(&self, err: Error) {
        warn!(error = %err, "supervisor fault");
        self.gated(|| self.report(&err));
    }

    /// Stop delivering and unregister everything
    ///
    /// Waits for deliveries in progress, unless called from a handler.
    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        if DELIVERING.get() {
            debug!("observers closed from a handler");
        } else {
            drop(self.gate.write().unwrap_or_else(PoisonError::into_inner));
        }

        self.events
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.faults
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    fn gated(&self, deliver: impl FnOnce()) {
        let _open = self.gate.read().unwrap_or_else(PoisonError::into_inner);
        if self.closed.load(Ordering::SeqCst) {
            return;
        }

        let outer = DELIVERING.replace(true);
        deliver();
        DELIVERING.set(outer);
    }

    fn deliver(&self, event: &ShellEvent) {
        // Snapshot so handlers may register further handlers.
        let handlers = self
            .events
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        for handler in handlers {
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| handler(event))) {
                let err = Error::from_panic(event.kind.name(), payload);
                if event.kind == ShellEventKind::Fault {
                    error!(error = %err, "fault handler panicked");
                } else {
                    warn!(error = %err, "supervisor fault");
                    self.report(&err);
                }
            }
        }
    }

    fn report(&self, err: &Error) {
        let handlers = self
            .faults
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        for handler in handlers {
            if catch_unwind(AssertUnwindSafe(|| handler(err))).is_err() {
                error!(error = %err, "fault handler panicked");
            }
        }

        self.deliver(&ShellEvent::new_with_data(ShellEventKind::Fault, err.to_string()));
    }
}
