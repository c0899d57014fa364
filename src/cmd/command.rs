/*!
Command descriptors.

A `Command<C>` bundles everything the dispatcher and the builtin `help`
need to know about a command: its name, help text, argument and result
metadata, the maximum argument count and the handler. Descriptors are
plain `const` records kept in static tables, one table per suite.

`C` is the application context handed to every handler (the BLE stack
and the event queue for the real suites, anything for tests).
*/

use crate::cmd::args::CommandArgs;
use crate::cmd::response::ResponseHandle;
use crate::cmd::suite::CommandSuite;

/// Metadata for one argument or one result field.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ArgDescriptor {
    pub ty: &'static str,
    pub name: &'static str,
    pub desc: &'static str,
}

impl ArgDescriptor {
    /// `"name: type - description"`, as listed by `help`.
    pub fn describe(&self) -> String {
        format!("{}: {} - {}", self.name, self.ty, self.desc)
    }
}

pub const fn arg(ty: &'static str, name: &'static str, desc: &'static str) -> ArgDescriptor {
    ArgDescriptor { ty, name, desc }
}

/// What a handler sees besides its arguments.
pub struct Context<'a, C: 'static> {
    pub app: &'a C,
    pub suite: &'a CommandSuite<C>,
}

pub type Handler<C> = fn(&Context<'_, C>, &CommandArgs<'_>, &ResponseHandle);

pub struct Command<C: 'static> {
    pub name: &'static str,
    pub help: &'static str,
    pub args: &'static [ArgDescriptor],
    pub results: &'static [ArgDescriptor],
    pub max_args: usize,
    pub handler: Handler<C>,
}

impl<C: 'static> Command<C> {
    /// Command without arguments or results.
    pub const fn new(name: &'static str, help: &'static str, handler: Handler<C>) -> Self {
        Self {
            name,
            help,
            args: &[],
            results: &[],
            max_args: 0,
            handler,
        }
    }

    /// Declare the expected arguments. Also sets `max_args` to their count.
    pub const fn args(mut self, args: &'static [ArgDescriptor]) -> Self {
        self.args = args;
        self.max_args = args.len();
        self
    }

    pub const fn results(mut self, results: &'static [ArgDescriptor]) -> Self {
        self.results = results;
        self
    }

    /// Accept up to `max_args` arguments (for trailing optional ones).
    pub const fn max_args(mut self, max_args: usize) -> Self {
        self.max_args = max_args;
        self
    }

    pub fn min_args(&self) -> usize {
        self.args.len()
    }
}

impl<C: 'static> std::fmt::Debug for Command<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Command")
            .field("name", &self.name)
            .field("args", &self.args.len())
            .field("max_args", &self.max_args)
            .finish()
    }
}

/* --------------------------------- Tests ---------------------------------- */
