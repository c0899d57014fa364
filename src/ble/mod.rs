//! BLE command suites and the stack they drive.
//!
//! `App` is the context every handler receives: the (simulated) stack and
//! the event queue procedures schedule their timeouts on.

use std::rc::Rc;

use crate::cmd::{CommandResponse, CommandSuite, EventQueue, Output};

pub mod ble_commands;
pub mod gap_commands;
pub mod stack;
pub mod types;

use stack::{Ble, StackSettings};
use types::BleError;

pub struct App {
    pub ble: Rc<Ble>,
    pub queue: EventQueue,
}

impl App {
    pub fn new(settings: StackSettings, output: Output) -> Self {
        let queue = EventQueue::new();
        let ble = Ble::new(settings, queue.clone(), output);
        Self { ble, queue }
    }
}

/// Every suite exposed on the console.
pub fn suites() -> Vec<CommandSuite<App>> {
    vec![ble_commands::suite(), gap_commands::suite()]
}

/// Write success or the stack error. False if the response already had a status.
pub(crate) fn report_error_or_success(
    response: &CommandResponse,
    result: Result<(), BleError>,
) -> bool {
    match result {
        Ok(()) => response.success(),
        Err(e) => response.failure_with(e.as_str()),
    }
}
