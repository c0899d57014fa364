/*!
Command engine.

Everything needed to turn a console line into a JSON response, independent
of what the commands actually drive:

  src/cmd/
    mod.rs          (this file)
    args.rs         (CommandArgs view + numeric argument parsing)
    command.rs      (Command / ArgDescriptor records, handler signature)
    response.rs     (StatusCode, CommandResponse, ResponseHandle, Output)
    suite.rs        (CommandSuite: builtin help/list + dispatch)
    procedure.rs    (asynchronous procedures with timeout)
    event_queue.rs  (post / post_in / cancel on the local task set)
    console.rs      (line loop, suite routing, retcode reporting)

Conventions:
  - Handlers never return errors; every outcome is a status written into
    the response.
  - Command tables are `static` slices of `Command<C>` built with the
    `const` builder methods.
  - All of this runs on one thread inside a `tokio::task::LocalSet`.
*/

pub mod args;
pub mod command;
pub mod console;
pub mod event_queue;
pub mod procedure;
pub mod response;
pub mod suite;

pub use args::{CommandArgs, parse_int};
pub use command::{ArgDescriptor, Command, Context, arg};
pub use console::Console;
pub use event_queue::{EventHandle, EventQueue};
pub use procedure::{Procedure, ProcedureHandle, Step, start_procedure};
pub use response::{CommandResponse, Output, PendingResponse, ResponseHandle, StatusCode};
pub use suite::CommandSuite;
