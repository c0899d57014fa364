/*!
Command suites and the dispatch engine.

A `CommandSuite<C>` groups the commands of one functional area ("ble",
"gap", ...). Every suite answers two builtin commands ahead of its own:

  help <commandName>   describe a command (arguments, results)
  list                 names of every command in the suite

Dispatch of `<suite> <command> [args...]`:
  1. Look the command up by exact name, builtins first. Unknown -> FAIL.
  2. Check the argument count against the descriptor.
  3. Run the handler with a fresh response.
  4. If nothing retained the response, close it and return its status.
     Otherwise return EXECUTING_CONTINUE; the final status is delivered
     through the completion callback when the response closes.
*/

use crate::cmd::args::CommandArgs;
use crate::cmd::command::{ArgDescriptor, Command, Context, arg};
use crate::cmd::response::{Output, ResponseHandle, StatusCode};
use crate::log_debug;

pub const INVALID_COMMAND_NAME: &str = "invalid command name, you can get all the command name for this module by using the command 'list'";
pub const NOT_ENOUGH_ARGUMENTS: &str = "not enough arguments";
pub const TOO_MANY_ARGUMENTS: &str = "too many arguments";
pub const UNKNOWN_HELP_SUBJECT: &str = "the name of this command does not exist, you can list the command by using the command 'list'";

const HELP_HELP: &str =
    "Print help about a command, you can list the command by using the command 'list'";
const HELP_ARGS: &[ArgDescriptor] = &[arg(
    "string",
    "<commandName>",
    "the name of a command you want help for, use the command 'list' to have a list of available commands",
)];
const LIST_HELP: &str = "list all the command in a module";
const LIST_RESULTS: &[ArgDescriptor] = &[arg("JSON Array", "", "names of the commands")];

pub struct CommandSuite<C: 'static> {
    name: &'static str,
    builtins: [Command<C>; 2],
    commands: &'static [Command<C>],
}

impl<C: 'static> CommandSuite<C> {
    pub fn new(name: &'static str, commands: &'static [Command<C>]) -> Self {
        let suite = Self {
            name,
            builtins: [
                Command::new("help", HELP_HELP, help::<C>).args(HELP_ARGS),
                Command::new("list", LIST_HELP, list::<C>).results(LIST_RESULTS),
            ],
            commands,
        };
        debug_assert!(
            suite.duplicate_name().is_none(),
            "duplicate command name in suite '{name}'"
        );
        suite
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Builtins then suite commands, in declaration order.
    pub fn commands(&self) -> impl Iterator<Item = &Command<C>> {
        self.builtins.iter().chain(self.commands.iter())
    }

    /// Exact-name lookup, builtins first.
    pub fn find(&self, name: &str) -> Option<&Command<C>> {
        self.commands().find(|c| c.name == name)
    }

    pub fn duplicate_name(&self) -> Option<&'static str> {
        let mut seen = std::collections::HashSet::new();
        self.commands().map(|c| c.name).find(|n| !seen.insert(*n))
    }

    /// Route `tokens` (`[suite, command, args...]`) to a handler.
    ///
    /// `on_complete` receives the final status of a command that continues
    /// asynchronously; it is never called when the returned status is final.
    pub fn dispatch<F>(&self, app: &C, tokens: &[String], output: &Output, on_complete: F) -> StatusCode
    where
        F: FnOnce(StatusCode) + 'static,
    {
        let all = CommandArgs::new(tokens);
        let name = all.get(1).unwrap_or_default();
        let args = all.drop(2);

        let response = ResponseHandle::new(output.clone());
        if output.echo() {
            response.set_command_name(name);
            response.set_arguments(&args);
        }

        let Some(command) = self.find(name) else {
            log_debug!("{}: no command named '{name}'", self.name);
            response.failure_with(INVALID_COMMAND_NAME);
            response.close();
            return response.status_code();
        };

        if args.count() < command.min_args() {
            response.invalid_parameters_with(NOT_ENOUGH_ARGUMENTS);
            response.close();
            return response.status_code();
        }
        if args.count() > command.max_args {
            response.invalid_parameters_with(TOO_MANY_ARGUMENTS);
            response.close();
            return response.status_code();
        }

        log_debug!("{} {}: {} argument(s)", self.name, name, args.count());
        let ctx = Context { app, suite: self };
        (command.handler)(&ctx, &args, &response);

        if !response.is_pending() || response.is_closed() {
            response.close();
            return response.status_code();
        }

        log_debug!("{} {}: executing asynchronously", self.name, name);
        response.set_on_close(on_complete);
        StatusCode::ExecutingContinue
    }
}

/* ---- Builtins ---- */

fn list<C: 'static>(ctx: &Context<'_, C>, _args: &CommandArgs<'_>, response: &ResponseHandle) {
    let names: Vec<&str> = ctx.suite.commands().map(|c| c.name).collect();
    response.success_with(names);
}

#[cfg(feature = "command-help")]
fn help<C: 'static>(ctx: &Context<'_, C>, args: &CommandArgs<'_>, response: &ResponseHandle) {
    let Some(command) = ctx.suite.find(&args[0]) else {
        response.invalid_parameters_with(UNKNOWN_HELP_SUBJECT);
        return;
    };

    let describe = |items: &[ArgDescriptor]| -> Vec<String> {
        items.iter().map(ArgDescriptor::describe).collect()
    };
    response.success_with(serde_json::json!({
        "command": command.name,
        "help": command.help,
        "arguments": describe(command.args),
        "results": describe(command.results),
    }));
}

#[cfg(not(feature = "command-help"))]
fn help<C: 'static>(_ctx: &Context<'_, C>, _args: &CommandArgs<'_>, response: &ResponseHandle) {
    response.success_with(
        "Commands help is deactivated, rebuild with the `command-help` feature enabled",
    );
}

/* --------------------------------- Tests ---------------------------------- */
