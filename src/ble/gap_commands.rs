/*!
`gap` suite: addresses and connections.

  getAddress                                  own address and its type
  connect <peerAddressType> <peerAddress>     connect as central (40s timeout)
  startConnecting <peerAddressType> <peerAddress>
                                              start connecting, return at once
  cancelConnect <peerAddressType> <peerAddress>
                                              abort a pending connect
  disconnect <handle> <reason>                drop a link
  waitForConnection <timeout>                 wait for a connection complete event
  waitForDisconnection <timeout>              wait for a disconnection complete event

Procedures install themselves as the GAP event handler for their lifetime
(`EventSubscription`); the default printer is restored when they end. The
outcome of `startConnecting` is printed by the default handler as a
`connection_complete` event.
*/

use std::rc::Rc;
use std::time::Duration;

use serde_json::json;

use crate::ble::stack::{Ble, ConnectionCompleteEvent, DisconnectionCompleteEvent, GapEventHandler};
use crate::ble::types::{Address, DisconnectionReason, PeerAddressType};
use crate::ble::{App, report_error_or_success};
use crate::cmd::{
    ArgDescriptor, Command, CommandArgs, CommandResponse, CommandSuite, Context, Procedure,
    ProcedureHandle, ResponseHandle, Step, arg, parse_int, start_procedure,
};
use crate::log_error;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(40);

const ADDRESS_RESULTS: &[ArgDescriptor] = &[
    arg("ble::own_address_type_t", "address_type", "Type of the address"),
    arg("ble::address_t", "address", "The address of the device"),
];
const CONNECT_ARGS: &[ArgDescriptor] = &[
    arg("ble::peer_address_type_t", "peerAddressType", "PUBLIC, RANDOM, PUBLIC_IDENTITY or RANDOM_STATIC_IDENTITY"),
    arg("ble::address_t", "peerAddress", "address of the peer, AA:BB:CC:DD:EE:FF"),
];
const CONNECTION_RESULTS: &[ArgDescriptor] = &[
    arg("string", "status", "BLE_ERROR_NONE or the failure"),
    arg("ble::peer_address_type_t", "peer_address_type", ""),
    arg("ble::address_t", "peer_address", ""),
    arg("uint16_t", "interval", "connection interval, 1.25ms units"),
    arg("uint16_t", "latency", "slave latency"),
    arg("uint16_t", "supervision_timeout", "10ms units"),
    arg("ble::connection_handle_t", "connection_handle", ""),
    arg("string", "own_role", "CENTRAL or PERIPHERAL"),
];
const DISCONNECT_ARGS: &[ArgDescriptor] = &[
    arg("ble::connection_handle_t", "handle", "handle of the link to drop"),
    arg("ble::local_disconnection_reason_t", "reason", "reason sent to the peer"),
];
const DISCONNECTION_RESULTS: &[ArgDescriptor] = &[
    arg("ble::connection_handle_t", "connection_handle", ""),
    arg("ble::disconnection_reason_t", "reason", ""),
];
const WAIT_ARGS: &[ArgDescriptor] = &[arg("uint32_t", "timeout", "time to wait, in ms")];

static COMMANDS: &[Command<App>] = &[
    Command::new(
        "getAddress",
        "Get the address and the type of address of this device.",
        get_address,
    )
    .results(ADDRESS_RESULTS),
    Command::new("connect", "Connect to a peer as central.", connect)
        .args(CONNECT_ARGS)
        .results(CONNECTION_RESULTS),
    Command::new(
        "startConnecting",
        "Start connecting to a peer as central, without waiting for the outcome.",
        start_connecting,
    )
    .args(CONNECT_ARGS),
    Command::new(
        "cancelConnect",
        "Cancel the pending connection attempt to a peer.",
        cancel_connect,
    )
    .args(CONNECT_ARGS),
    Command::new("disconnect", "Terminate a connection.", disconnect).args(DISCONNECT_ARGS),
    Command::new(
        "waitForConnection",
        "Wait for the next connection complete event.",
        wait_for_connection,
    )
    .args(WAIT_ARGS)
    .results(CONNECTION_RESULTS),
    Command::new(
        "waitForDisconnection",
        "Wait for the next disconnection complete event.",
        wait_for_disconnection,
    )
    .args(WAIT_ARGS)
    .results(DISCONNECTION_RESULTS),
];

pub fn suite() -> CommandSuite<App> {
    CommandSuite::new("gap", COMMANDS)
}

/* ---- Synchronous commands ---- */

fn get_address(ctx: &Context<'_, App>, _args: &CommandArgs<'_>, response: &ResponseHandle) {
    match ctx.app.ble.address() {
        Ok((address_type, address)) => response.success_with(json!({
            "address_type": address_type.as_str(),
            "address": address,
        })),
        Err(e) => response.failure_with(e.as_str()),
    };
}

/// Parse `<peerAddressType> <peerAddress>`; writes INVALID_PARAMETERS on error.
fn parse_peer(
    args: &CommandArgs<'_>,
    response: &ResponseHandle,
) -> Option<(PeerAddressType, Address)> {
    let Some(peer_address_type) = PeerAddressType::from_str_ci(&args[0]) else {
        response.invalid_parameters_with("the peer address type is ill formed");
        return None;
    };
    match args[1].parse::<Address>() {
        Ok(peer_address) => Some((peer_address_type, peer_address)),
        Err(e) => {
            response.invalid_parameters_with(e);
            None
        }
    }
}

fn start_connecting(ctx: &Context<'_, App>, args: &CommandArgs<'_>, response: &ResponseHandle) {
    let Some((peer_address_type, peer_address)) = parse_peer(args, response) else {
        return;
    };
    report_error_or_success(response, ctx.app.ble.connect(peer_address_type, peer_address));
}

fn cancel_connect(ctx: &Context<'_, App>, args: &CommandArgs<'_>, response: &ResponseHandle) {
    let Some((peer_address_type, peer_address)) = parse_peer(args, response) else {
        return;
    };
    report_error_or_success(
        response,
        ctx.app.ble.cancel_connect(peer_address_type, peer_address),
    );
}

fn disconnect(ctx: &Context<'_, App>, args: &CommandArgs<'_>, response: &ResponseHandle) {
    let Some(handle) = parse_int::<u16>(&args[0]) else {
        response.invalid_parameters_with("the connection handle is ill formed");
        return;
    };
    let Some(reason) = DisconnectionReason::from_str_ci(&args[1]) else {
        response.invalid_parameters_with("the disconnection reason is ill formed");
        return;
    };
    report_error_or_success(response, ctx.app.ble.disconnect(handle, reason));
}

/* ---- Event routing ---- */

/// Procedure interested in GAP events.
trait GapProcedure: Procedure {
    fn on_connection_complete(
        &mut self,
        _event: &ConnectionCompleteEvent,
        _response: &CommandResponse,
    ) -> Step {
        Step::Continue
    }

    fn on_disconnection_complete(
        &mut self,
        _event: &DisconnectionCompleteEvent,
        _response: &CommandResponse,
    ) -> Step {
        Step::Continue
    }
}

/// Installed handler forwarding events to a running procedure.
struct Forward<P>(ProcedureHandle<P>);

impl<P: GapProcedure> GapEventHandler for Forward<P> {
    fn on_connection_complete(&self, event: &ConnectionCompleteEvent) {
        let event = event.clone();
        self.0
            .update(move |procedure, response| procedure.on_connection_complete(&event, response));
    }

    fn on_disconnection_complete(&self, event: &DisconnectionCompleteEvent) {
        let event = event.clone();
        self.0.update(move |procedure, response| {
            procedure.on_disconnection_complete(&event, response)
        });
    }
}

/// Keeps a procedure installed as the GAP event handler until dropped.
struct EventSubscription {
    ble: Rc<Ble>,
    handler: Rc<dyn GapEventHandler>,
}

impl EventSubscription {
    fn install<P: GapProcedure>(ble: &Rc<Ble>, this: &ProcedureHandle<P>) -> Self {
        let handler: Rc<dyn GapEventHandler> = Rc::new(Forward(this.clone()));
        ble.set_event_handler(handler.clone());
        Self {
            ble: ble.clone(),
            handler,
        }
    }
}

impl Drop for EventSubscription {
    fn drop(&mut self) {
        self.ble.release_event_handler(&self.handler);
    }
}

fn report_connection(event: &ConnectionCompleteEvent, response: &CommandResponse) -> Step {
    if event.status.is_err() {
        response.failure_with(event.status_str());
    } else {
        response.success_with(event.to_json());
    }
    Step::Terminate
}

/* ---- connect ---- */

fn connect(ctx: &Context<'_, App>, args: &CommandArgs<'_>, response: &ResponseHandle) {
    let Some((peer_address_type, peer_address)) = parse_peer(args, response) else {
        return;
    };
    start_procedure(
        &ctx.app.queue,
        response,
        CONNECT_TIMEOUT,
        ConnectProcedure {
            ble: ctx.app.ble.clone(),
            peer_address_type,
            peer_address,
            subscription: None,
        },
    );
}

struct ConnectProcedure {
    ble: Rc<Ble>,
    peer_address_type: PeerAddressType,
    peer_address: Address,
    subscription: Option<EventSubscription>,
}

impl Procedure for ConnectProcedure {
    const NAME: &'static str = "gap connect";

    fn do_start(&mut self, this: &ProcedureHandle<Self>, response: &CommandResponse) -> bool {
        self.subscription = Some(EventSubscription::install(&self.ble, this));
        match self.ble.connect(self.peer_address_type, self.peer_address) {
            Ok(()) => true,
            Err(e) => {
                response.failure_with(e.as_str());
                false
            }
        }
    }

    fn do_when_timeout(&mut self, response: &CommandResponse) {
        // Stop listening first: the cancellation is reported as a stray event.
        self.subscription = None;
        if let Err(e) = self.ble.cancel_connect(self.peer_address_type, self.peer_address) {
            log_error!("gap connect: cannot cancel after timeout: {e}");
        }
        response.failure_with("timeout");
    }
}

impl GapProcedure for ConnectProcedure {
    fn on_connection_complete(
        &mut self,
        event: &ConnectionCompleteEvent,
        response: &CommandResponse,
    ) -> Step {
        report_connection(event, response)
    }
}

/* ---- waitForConnection / waitForDisconnection ---- */

fn wait_timeout(args: &CommandArgs<'_>, response: &ResponseHandle) -> Option<Duration> {
    match parse_int::<u32>(&args[0]) {
        Some(ms) => Some(Duration::from_millis(u64::from(ms))),
        None => {
            response.invalid_parameters_with("the timeout is ill formed");
            None
        }
    }
}

fn wait_for_connection(ctx: &Context<'_, App>, args: &CommandArgs<'_>, response: &ResponseHandle) {
    let Some(timeout) = wait_timeout(args, response) else {
        return;
    };
    start_procedure(
        &ctx.app.queue,
        response,
        timeout,
        WaitForConnection {
            ble: ctx.app.ble.clone(),
            subscription: None,
        },
    );
}

struct WaitForConnection {
    ble: Rc<Ble>,
    subscription: Option<EventSubscription>,
}

impl Procedure for WaitForConnection {
    const NAME: &'static str = "gap waitForConnection";

    fn do_start(&mut self, this: &ProcedureHandle<Self>, _response: &CommandResponse) -> bool {
        self.subscription = Some(EventSubscription::install(&self.ble, this));
        true
    }
}

impl GapProcedure for WaitForConnection {
    fn on_connection_complete(
        &mut self,
        event: &ConnectionCompleteEvent,
        response: &CommandResponse,
    ) -> Step {
        report_connection(event, response)
    }
}

fn wait_for_disconnection(
    ctx: &Context<'_, App>,
    args: &CommandArgs<'_>,
    response: &ResponseHandle,
) {
    let Some(timeout) = wait_timeout(args, response) else {
        return;
    };
    start_procedure(
        &ctx.app.queue,
        response,
        timeout,
        WaitForDisconnection {
            ble: ctx.app.ble.clone(),
            subscription: None,
        },
    );
}

struct WaitForDisconnection {
    ble: Rc<Ble>,
    subscription: Option<EventSubscription>,
}

impl Procedure for WaitForDisconnection {
    const NAME: &'static str = "gap waitForDisconnection";

    fn do_start(&mut self, this: &ProcedureHandle<Self>, _response: &CommandResponse) -> bool {
        self.subscription = Some(EventSubscription::install(&self.ble, this));
        true
    }
}

impl GapProcedure for WaitForDisconnection {
    fn on_disconnection_complete(
        &mut self,
        event: &DisconnectionCompleteEvent,
        response: &CommandResponse,
    ) -> Step {
        response.success_with(event.to_json());
        Step::Terminate
    }
}

/* --------------------------------- Tests ---------------------------------- */
