/*!
Line oriented console.

Reads command lines, routes them to the suite named by their first token
and reports each outcome as a `retcode: N` line after the JSON response:

  > gap connect PUBLIC AA:BB:CC:DD:EE:FF
  {"status":0,"result":{...}}
  retcode: 0

When a command continues asynchronously the console waits for its final
status before reading the next line. Stack events printed meanwhile are
interleaved with the output as they happen.

Local retcodes:
  -2  line could not be tokenized (unbalanced quotes)
  -5  no suite with that name
*/

use anyhow::{Context as _, Result};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::oneshot;

use crate::cmd::response::{Output, StatusCode};
use crate::cmd::suite::CommandSuite;
use crate::{log_debug, log_error, log_info};

pub struct Console<C: 'static> {
    app: C,
    suites: Vec<CommandSuite<C>>,
    output: Output,
}

impl<C: 'static> Console<C> {
    pub fn new(app: C, suites: Vec<CommandSuite<C>>, output: Output) -> Self {
        Self {
            app,
            suites,
            output,
        }
    }

    pub fn app(&self) -> &C {
        &self.app
    }

    pub fn suite(&self, name: &str) -> Option<&CommandSuite<C>> {
        self.suites.iter().find(|s| s.name() == name)
    }

    /// Execute one line. Returns `None` for blank lines.
    pub async fn execute(&self, line: &str) -> Option<StatusCode> {
        let tokens = match shell_words::split(line) {
            Ok(t) => t,
            Err(e) => {
                log_error!("cannot tokenize '{line}': {e}");
                return Some(StatusCode::InvalidParameters);
            }
        };
        let suite_name = tokens.first()?;
        let Some(suite) = self.suite(suite_name) else {
            log_error!("unknown command suite '{suite_name}'");
            return Some(StatusCode::NotFound);
        };

        let (tx, rx) = oneshot::channel();
        let status = suite.dispatch(&self.app, &tokens, &self.output, move |status| {
            let _ = tx.send(status);
        });
        if status != StatusCode::ExecutingContinue {
            return Some(status);
        }

        log_debug!("waiting for '{line}' to complete");
        match rx.await {
            Ok(status) => Some(status),
            Err(_) => {
                log_error!("'{line}' finished without reporting a status");
                Some(StatusCode::Fail)
            }
        }
    }

    /// Run until `input` is exhausted. Returns the number of commands executed.
    pub async fn run<R>(&self, input: R) -> Result<usize>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut lines = input.lines();
        let mut executed = 0;
        while let Some(line) = lines
            .next_line()
            .await
            .context("failed to read command line")?
        {
            if let Some(status) = self.execute(line.trim()).await {
                self.output.write_line(&format!("retcode: {}", status.code()));
                executed += 1;
            }
        }
        log_info!("input closed after {executed} command(s)");
        Ok(executed)
    }
}

/* --------------------------------- Tests ---------------------------------- */

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cmd::args::CommandArgs;
    use crate::cmd::command::{Command, Context};
    use crate::cmd::event_queue::EventQueue;
    use crate::cmd::procedure::{Procedure, ProcedureHandle, Step, start_procedure};
    use crate::cmd::response::tests::{capture, lines};
    use crate::cmd::response::{CommandResponse, ResponseHandle};
    use std::time::Duration;
    use tokio::task::LocalSet;

    struct Clock {
        queue: EventQueue,
    }

    struct Later(EventQueue);

    impl Procedure for Later {
        const NAME: &'static str = "later";

        fn do_start(&mut self, this: &ProcedureHandle<Self>, _: &CommandResponse) -> bool {
            let this = this.clone();
            self.0.post_in(Duration::from_millis(20), move || {
                this.update(|_, r| {
                    r.success_with("tick");
                    Step::Terminate
                })
            });
            true
        }
    }

    fn now(_: &Context<'_, Clock>, _: &CommandArgs<'_>, response: &ResponseHandle) {
        response.success_with("now");
    }

    fn later(ctx: &Context<'_, Clock>, _: &CommandArgs<'_>, response: &ResponseHandle) {
        let queue = ctx.app.queue.clone();
        start_procedure(&ctx.app.queue, response, Duration::from_secs(1), Later(queue));
    }

    static COMMANDS: &[Command<Clock>] = &[
        Command::new("now", "", now),
        Command::new("later", "", later),
    ];

    fn console(output: Output) -> Console<Clock> {
        Console::new(
            Clock {
                queue: EventQueue::new(),
            },
            vec![CommandSuite::new("clock", COMMANDS)],
            output,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn prints_retcode_after_each_response() {
        LocalSet::new()
            .run_until(async {
                let (out, buf) = capture();
                let input: &[u8] = b"clock now\n\nclock later\nclock nope\n";
                let executed = console(out).run(input).await.unwrap();
                assert_eq!(executed, 3);
                assert_eq!(
                    lines(&buf),
                    vec![
                        r#"{"status":0,"result":"now"}"#,
                        "retcode: 0",
                        r#"{"status":0,"result":"tick"}"#,
                        "retcode: 0",
                        r#"{"status":-1,"error":"invalid command name, you can get all the command name for this module by using the command 'list'"}"#,
                        "retcode: -1",
                    ]
                );
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_suite_and_bad_quotes() {
        LocalSet::new()
            .run_until(async {
                let (out, buf) = capture();
                let input: &[u8] = b"radio on\nclock now 'oops\n";
                console(out).run(input).await.unwrap();
                assert_eq!(lines(&buf), vec!["retcode: -5", "retcode: -2"]);
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn execute_skips_blank_lines() {
        LocalSet::new()
            .run_until(async {
                let (out, _buf) = capture();
                let console = console(out);
                assert_eq!(console.execute("   ").await, None);
                assert_eq!(console.execute("clock list").await, Some(StatusCode::Success));
                assert!(console.suite("clock").is_some());
            })
            .await;
    }
}
