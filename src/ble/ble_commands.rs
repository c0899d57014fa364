/*!
`ble` suite: lifecycle of the BLE instance.

  init        initialize the stack (asynchronous, 100s timeout)
  shutdown    tear the stack down
  reset       shutdown (if needed) then init
  getVersion  version string of the stack
*/

use std::rc::Rc;
use std::time::Duration;

use crate::ble::stack::Ble;
use crate::ble::{App, report_error_or_success};
use crate::cmd::{
    ArgDescriptor, Command, CommandArgs, CommandResponse, CommandSuite, Context, Procedure,
    ProcedureHandle, ResponseHandle, Step, arg, start_procedure,
};
use crate::log_error;

const INIT_TIMEOUT: Duration = Duration::from_secs(100);

const VERSION_RESULTS: &[ArgDescriptor] = &[arg(
    "string",
    "",
    "The version of the stack used by BLE API.",
)];

static COMMANDS: &[Command<App>] = &[
    Command::new(
        "shutdown",
        "Shutdown the current BLE instance, calling ble related function after this call may lead to failure.",
        shutdown,
    ),
    Command::new(
        "init",
        "Initialize the ble API and underlying BLE stack.\r\nBe sure to call this function before any other ble API function",
        init,
    ),
    Command::new(
        "reset",
        "Reset the ble API and ble stack. This function internally does a shutdown and an init",
        reset,
    ),
    Command::new("getVersion", "Return the version of the BLE API.", get_version)
        .results(VERSION_RESULTS),
];

pub fn suite() -> CommandSuite<App> {
    CommandSuite::new("ble", COMMANDS)
}

fn shutdown(ctx: &Context<'_, App>, _args: &CommandArgs<'_>, response: &ResponseHandle) {
    report_error_or_success(response, ctx.app.ble.shutdown());
}

fn init(ctx: &Context<'_, App>, _args: &CommandArgs<'_>, response: &ResponseHandle) {
    if ctx.app.ble.has_initialized() {
        response.success();
        return;
    }
    start_procedure(
        &ctx.app.queue,
        response,
        INIT_TIMEOUT,
        InitProcedure {
            ble: ctx.app.ble.clone(),
        },
    );
}

struct InitProcedure {
    ble: Rc<Ble>,
}

impl Procedure for InitProcedure {
    const NAME: &'static str = "ble init";

    fn do_start(&mut self, this: &ProcedureHandle<Self>, response: &CommandResponse) -> bool {
        let this = this.clone();
        let started = self.ble.init(move |result| {
            this.update(move |_, response| {
                report_error_or_success(response, result);
                Step::Terminate
            })
        });
        match started {
            Ok(()) => true,
            Err(e) => {
                response.failure_with(e.as_str());
                false
            }
        }
    }
}

fn reset(ctx: &Context<'_, App>, _args: &CommandArgs<'_>, response: &ResponseHandle) {
    let ble = &ctx.app.ble;
    if ble.has_initialized() && ble.shutdown().is_err() {
        response.failure_with("Failed to shutdown the ble instance");
        return;
    }
    let started = ble.init(|result| {
        if let Err(e) = result {
            log_error!("ble reset: init failed: {e}");
        }
    });
    match started {
        Ok(()) => response.success(),
        Err(_) => response.failure_with("Failed to init the ble instance"),
    };
}

fn get_version(ctx: &Context<'_, App>, _args: &CommandArgs<'_>, response: &ResponseHandle) {
    match ctx.app.ble.version() {
        Some(version) => response.success_with(version),
        None => response.failure_with("ble version is not available"),
    };
}

/* --------------------------------- Tests ---------------------------------- */
