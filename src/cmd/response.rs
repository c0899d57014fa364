/*!
Command response object.

A `CommandResponse` collects the outcome of one command and writes it as a
single JSON line once closed:

  {"name":"connect","arguments":["PUBLIC","AA:.."],"status":0,"result":{...}}

`name` and `arguments` only appear when they were set. The payload key is
`error` when the status is negative and `result` otherwise.

Rules:
  - name, arguments, status and result are each written at most once;
    later writes are refused (setter returns false).
  - `close()` is idempotent. The first call emits the line and then runs
    the on-close callback exactly once.
  - A response is closed automatically when the last handle goes away.

Ownership is shared through `ResponseHandle`. A holder that needs the
response to outlive the command handler (an asynchronous procedure) calls
`retain()`; the returned `PendingResponse` keeps the command in the
"executing" state and closes the response when the last one is released.
*/

use std::cell::{Cell, RefCell, RefMut};
use std::fmt;
use std::io::{self, Write};
use std::ops::Deref;
use std::rc::Rc;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::cmd::args::CommandArgs;
use crate::log_error;

/* ---- Status codes ---- */

/// Status codes reported on the `status` field and as console `retcode`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum StatusCode {
    CommandBusy = 2,
    ExecutingContinue = 1,
    Success = 0,
    Fail = -1,
    InvalidParameters = -2,
    NotImplemented = -3,
    CallbackMissing = -4,
    NotFound = -5,
}

impl StatusCode {
    pub const fn code(self) -> i32 {
        self as i32
    }

    pub const fn is_error(self) -> bool {
        self.code() < 0
    }

    pub fn from_code(code: i32) -> Option<Self> {
        Some(match code {
            2 => StatusCode::CommandBusy,
            1 => StatusCode::ExecutingContinue,
            0 => StatusCode::Success,
            -1 => StatusCode::Fail,
            -2 => StatusCode::InvalidParameters,
            -3 => StatusCode::NotImplemented,
            -4 => StatusCode::CallbackMissing,
            -5 => StatusCode::NotFound,
            _ => return None,
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StatusCode::CommandBusy => "COMMAND_BUSY",
            StatusCode::ExecutingContinue => "EXECUTING_CONTINUE",
            StatusCode::Success => "SUCCESS",
            StatusCode::Fail => "FAIL",
            StatusCode::InvalidParameters => "INVALID_PARAMETERS",
            StatusCode::NotImplemented => "COMMAND_NOT_IMPLEMENTED",
            StatusCode::CallbackMissing => "COMMAND_CB_MISSING",
            StatusCode::NotFound => "COMMAND_NOT_FOUND",
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/* ---- Output sink ---- */

/// Line oriented sink shared by responses, event printers and the console.
#[derive(Clone)]
pub struct Output {
    sink: Rc<RefCell<dyn Write>>,
    echo: bool,
}

impl Output {
    pub fn stdout() -> Self {
        Self::new(Rc::new(RefCell::new(io::stdout())))
    }

    pub fn new(sink: Rc<RefCell<dyn Write>>) -> Self {
        Self { sink, echo: false }
    }

    /// Echo command name and arguments into every response.
    pub fn with_echo(mut self, echo: bool) -> Self {
        self.echo = echo;
        self
    }

    pub fn echo(&self) -> bool {
        self.echo
    }

    pub fn write_line(&self, line: &str) {
        let mut sink = self.sink.borrow_mut();
        if let Err(e) = writeln!(sink, "{line}").and_then(|_| sink.flush()) {
            log_error!("failed to write console output: {e}");
        }
    }

    pub fn write_json(&self, value: &Value) {
        self.write_line(&value.to_string());
    }
}

impl fmt::Debug for Output {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Output").field("echo", &self.echo).finish()
    }
}

/* ---- Response ---- */

type OnClose = Box<dyn FnOnce(StatusCode)>;

pub struct CommandResponse {
    output: Output,
    name: RefCell<Option<String>>,
    arguments: RefCell<Option<Vec<String>>>,
    status: Cell<Option<StatusCode>>,
    result: RefCell<Option<(&'static str, Value)>>,
    closed: Cell<bool>,
    pending: Cell<usize>,
    on_close: RefCell<Option<OnClose>>,
}

impl CommandResponse {
    fn new(output: Output) -> Self {
        Self {
            output,
            name: RefCell::new(None),
            arguments: RefCell::new(None),
            status: Cell::new(None),
            result: RefCell::new(None),
            closed: Cell::new(false),
            pending: Cell::new(0),
            on_close: RefCell::new(None),
        }
    }

    pub fn set_command_name(&self, name: &str) -> bool {
        if self.is_closed() || self.name.borrow().is_some() {
            return false;
        }
        *self.name.borrow_mut() = Some(name.to_string());
        true
    }

    pub fn set_arguments(&self, args: &CommandArgs<'_>) -> bool {
        if self.is_closed() || self.arguments.borrow().is_some() {
            return false;
        }
        *self.arguments.borrow_mut() = Some(args.to_vec());
        true
    }

    /// Set the status once. Decides whether the payload lands under
    /// `result` or `error`.
    pub fn set_status_code(&self, status: StatusCode) -> bool {
        if self.is_closed() || self.status.get().is_some() {
            return false;
        }
        self.status.set(Some(status));
        true
    }

    /// Current status; `Success` until one is set.
    pub fn status_code(&self) -> StatusCode {
        self.status.get().unwrap_or(StatusCode::Success)
    }

    pub fn has_status(&self) -> bool {
        self.status.get().is_some()
    }

    fn result_key(&self) -> &'static str {
        if self.status_code().is_error() {
            "error"
        } else {
            "result"
        }
    }

    /// Payload sink. The key is fixed by the first call, so set the status
    /// before writing a result.
    pub fn result_stream(&self) -> RefMut<'_, Value> {
        let key = self.result_key();
        RefMut::map(self.result.borrow_mut(), |slot| {
            &mut slot.get_or_insert_with(|| (key, Value::Null)).1
        })
    }

    pub fn has_result(&self) -> bool {
        self.result.borrow().is_some()
    }

    fn write_result(&self, value: impl Serialize) {
        if self.is_closed() || self.has_result() {
            return;
        }
        match serde_json::to_value(value) {
            Ok(v) => *self.result_stream() = v,
            Err(e) => log_error!("failed to serialize command result: {e}"),
        }
    }

    /// Set `status` and the payload. False, with no effect, when a status
    /// was already set or the response is closed.
    fn finish(&self, status: StatusCode, value: Option<impl Serialize>) -> bool {
        if !self.set_status_code(status) {
            return false;
        }
        if let Some(v) = value {
            self.write_result(v);
        }
        true
    }

    /* ---- Combinators ---- */

    pub fn success(&self) -> bool {
        self.finish(StatusCode::Success, None::<()>)
    }

    pub fn success_with(&self, value: impl Serialize) -> bool {
        self.finish(StatusCode::Success, Some(value))
    }

    pub fn failure(&self) -> bool {
        self.finish(StatusCode::Fail, None::<()>)
    }

    pub fn failure_with(&self, value: impl Serialize) -> bool {
        self.finish(StatusCode::Fail, Some(value))
    }

    pub fn invalid_parameters(&self) -> bool {
        self.finish(StatusCode::InvalidParameters, None::<()>)
    }

    pub fn invalid_parameters_with(&self, value: impl Serialize) -> bool {
        self.finish(StatusCode::InvalidParameters, Some(value))
    }

    pub fn not_implemented(&self) -> bool {
        self.finish(StatusCode::NotImplemented, None::<()>)
    }

    pub fn not_implemented_with(&self, value: impl Serialize) -> bool {
        self.finish(StatusCode::NotImplemented, Some(value))
    }

    /* ---- Lifecycle ---- */

    pub fn set_on_close(&self, f: impl FnOnce(StatusCode) + 'static) {
        *self.on_close.borrow_mut() = Some(Box::new(f));
    }

    pub fn is_closed(&self) -> bool {
        self.closed.get()
    }

    /// Number of outstanding `PendingResponse` guards.
    pub fn pending(&self) -> usize {
        self.pending.get()
    }

    pub fn is_pending(&self) -> bool {
        self.pending.get() > 0
    }

    /// Emit the response and run the on-close callback. Later calls do nothing.
    pub fn close(&self) {
        if self.closed.replace(true) {
            return;
        }
        self.output.write_json(&self.to_json());
        let status = self.status_code();
        let callback = self.on_close.borrow_mut().take();
        if let Some(callback) = callback {
            callback(status);
        }
    }

    /// Object as emitted on close.
    pub fn to_json(&self) -> Value {
        let mut obj = Map::new();
        if let Some(name) = self.name.borrow().as_ref() {
            obj.insert("name".into(), Value::from(name.as_str()));
        }
        if let Some(args) = self.arguments.borrow().as_ref() {
            obj.insert("arguments".into(), Value::from(args.clone()));
        }
        obj.insert("status".into(), Value::from(self.status_code().code()));
        if let Some((key, value)) = self.result.borrow().as_ref() {
            obj.insert((*key).into(), value.clone());
        }
        Value::Object(obj)
    }
}

impl Drop for CommandResponse {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for CommandResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandResponse")
            .field("status", &self.status.get())
            .field("closed", &self.closed.get())
            .field("pending", &self.pending.get())
            .finish()
    }
}

/* ---- Handles ---- */

/// Shared handle to a response. Cloning does not affect completion.
#[derive(Clone, Debug)]
pub struct ResponseHandle(Rc<CommandResponse>);

impl ResponseHandle {
    pub fn new(output: Output) -> Self {
        Self(Rc::new(CommandResponse::new(output)))
    }

    /// Keep the command executing until the returned guard is dropped.
    pub fn retain(&self) -> PendingResponse {
        self.0.pending.set(self.0.pending.get() + 1);
        PendingResponse(self.clone())
    }
}

impl Deref for ResponseHandle {
    type Target = CommandResponse;

    fn deref(&self) -> &CommandResponse {
        &self.0
    }
}

/// Guard marking a response as awaited by an asynchronous completion.
#[derive(Debug)]
pub struct PendingResponse(ResponseHandle);

impl PendingResponse {
    pub fn handle(&self) -> &ResponseHandle {
        &self.0
    }
}

impl Deref for PendingResponse {
    type Target = CommandResponse;

    fn deref(&self) -> &CommandResponse {
        &self.0
    }
}

impl Drop for PendingResponse {
    fn drop(&mut self) {
        let response = &self.0;
        let left = response.pending.get().saturating_sub(1);
        response.pending.set(left);
        if left == 0 {
            response.close();
        }
    }
}

/* --------------------------------- Tests ---------------------------------- */

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde_json::json;

    /// Output writing into a shared buffer, plus an accessor for its lines.
    pub(crate) fn capture() -> (Output, Rc<RefCell<Vec<u8>>>) {
        let buf = Rc::new(RefCell::new(Vec::new()));
        let sink: Rc<RefCell<dyn Write>> = buf.clone();
        (Output::new(sink), buf)
    }

    pub(crate) fn lines(buf: &Rc<RefCell<Vec<u8>>>) -> Vec<String> {
        String::from_utf8_lossy(&buf.borrow())
            .lines()
            .map(str::to_string)
            .collect()
    }

    pub(crate) fn json_lines(buf: &Rc<RefCell<Vec<u8>>>) -> Vec<Value> {
        lines(buf)
            .iter()
            .filter_map(|l| serde_json::from_str(l).ok())
            .collect()
    }

    #[test]
    fn fields_are_write_once() {
        let (out, _buf) = capture();
        let response = ResponseHandle::new(out);
        let t = vec!["x".to_string()];
        assert!(response.set_command_name("a"));
        assert!(!response.set_command_name("b"));
        assert!(response.set_arguments(&CommandArgs::new(&t)));
        assert!(!response.set_arguments(&CommandArgs::new(&[])));
        assert!(response.set_status_code(StatusCode::Fail));
        assert!(!response.set_status_code(StatusCode::Success));
        assert_eq!(response.status_code(), StatusCode::Fail);

        let v = response.to_json();
        assert_eq!(v["name"], "a");
        assert_eq!(v["arguments"], json!(["x"]));
    }

    #[test]
    fn combinator_after_status_is_ignored() {
        let (out, buf) = capture();
        let response = ResponseHandle::new(out);
        assert!(response.success_with("first"));
        assert!(!response.failure_with("second"));
        assert!(!response.not_implemented());
        response.close();
        assert_eq!(json_lines(&buf), vec![json!({"status": 0, "result": "first"})]);
        assert!(!response.invalid_parameters_with("after close"));
    }

    #[test]
    fn negative_status_uses_error_key() {
        let (out, buf) = capture();
        let response = ResponseHandle::new(out);
        response.invalid_parameters_with("bad");
        response.close();
        assert_eq!(json_lines(&buf), vec![json!({"status": -2, "error": "bad"})]);

        let (out, buf) = capture();
        let response = ResponseHandle::new(out);
        response.set_status_code(StatusCode::Success);
        *response.result_stream() = json!({"k": 1});
        response.close();
        assert_eq!(json_lines(&buf), vec![json!({"status": 0, "result": {"k": 1}})]);
    }

    #[test]
    fn result_stream_before_status_uses_default_key() {
        let (out, buf) = capture();
        let response = ResponseHandle::new(out);
        *response.result_stream() = json!(1);
        response.set_status_code(StatusCode::Fail);
        response.close();
        assert_eq!(json_lines(&buf), vec![json!({"status": -1, "result": 1})]);
    }

    #[test]
    fn close_is_idempotent() {
        let (out, buf) = capture();
        let response = ResponseHandle::new(out);
        let calls = Rc::new(Cell::new(0));
        let counter = calls.clone();
        response.set_on_close(move |status| {
            assert_eq!(status, StatusCode::Success);
            counter.set(counter.get() + 1);
        });
        response.success();
        response.close();
        response.close();
        drop(response);
        assert_eq!(calls.get(), 1);
        assert_eq!(lines(&buf).len(), 1);
    }

    #[test]
    fn setters_refused_after_close() {
        let (out, _buf) = capture();
        let response = ResponseHandle::new(out);
        response.close();
        assert!(!response.set_status_code(StatusCode::Fail));
        assert!(!response.set_command_name("late"));
        assert_eq!(response.status_code(), StatusCode::Success);
    }

    #[test]
    fn drop_of_last_handle_closes() {
        let (out, buf) = capture();
        let response = ResponseHandle::new(out);
        let clone = response.clone();
        response.failure();
        drop(response);
        assert!(lines(&buf).is_empty());
        drop(clone);
        assert_eq!(json_lines(&buf), vec![json!({"status": -1})]);
    }

    #[test]
    fn pending_guard_closes_on_last_release() {
        let (out, buf) = capture();
        let response = ResponseHandle::new(out);
        let first = response.retain();
        let second = response.retain();
        assert_eq!(response.pending(), 2);
        drop(first);
        assert!(!response.is_closed());
        second.success();
        drop(second);
        assert!(response.is_closed());
        assert!(!response.is_pending());
        assert_eq!(json_lines(&buf), vec![json!({"status": 0})]);
    }

    #[test]
    fn incidental_clone_is_not_pending() {
        let (out, _buf) = capture();
        let response = ResponseHandle::new(out);
        let _clone = response.clone();
        assert!(!response.is_pending());
    }

    #[test]
    fn status_code_values() {
        assert_eq!(StatusCode::CommandBusy.code(), 2);
        assert_eq!(StatusCode::ExecutingContinue.code(), 1);
        assert_eq!(StatusCode::NotFound.code(), -5);
        assert_eq!(StatusCode::from_code(-4), Some(StatusCode::CallbackMissing));
        assert_eq!(StatusCode::from_code(7), None);
        assert!(StatusCode::NotImplemented.is_error());
        assert!(!StatusCode::CommandBusy.is_error());
    }
}
