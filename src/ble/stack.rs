//! Simulated BLE host stack.
//!
//! Stands in for the controller so every command can run on a host: the
//! stack keeps its lifecycle state and connection table, completes
//! operations after configurable latencies through the event queue, and
//! delivers GAP events to a single replaceable handler.
//!
//! The default handler prints every event as a JSON line:
//!   {"type":"event","name":"connection_complete","value":{...}}

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::{Rc, Weak};
use std::time::Duration;

use serde::Deserialize;
use serde_json::{Value, json};

use crate::ble::types::{Address, BleError, ConnectionRole, DisconnectionReason, PeerAddressType};
use crate::cmd::{EventHandle, EventQueue, Output};
use crate::{log_debug, log_trace};

/* ---- Settings ---- */

/// Tunables of the simulated controller (config file / CLI).
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StackSettings {
    /// Public address reported by `gap getAddress`.
    pub address: Address,
    /// Version string reported by `ble getVersion`.
    pub version: String,
    /// Time taken by `init` to complete.
    pub init_latency_ms: u64,
    /// Time between `connect` and the connection complete event.
    pub connect_latency_ms: u64,
}

impl Default for StackSettings {
    fn default() -> Self {
        Self {
            address: Address([0xC0, 0xFF, 0xEE, 0x00, 0x00, 0x01]),
            version: concat!("ble-cliapp-sim/", env!("CARGO_PKG_VERSION")).to_string(),
            init_latency_ms: 10,
            connect_latency_ms: 50,
        }
    }
}

/* ---- Events ---- */

/// Connection parameters used for every simulated link (1.25ms / 10ms units).
const CONNECTION_INTERVAL: u16 = 40;
const SLAVE_LATENCY: u16 = 0;
const SUPERVISION_TIMEOUT: u16 = 500;

#[derive(Clone, Debug, PartialEq)]
pub struct ConnectionCompleteEvent {
    pub status: Result<(), BleError>,
    pub role: ConnectionRole,
    pub connection_handle: u16,
    pub peer_address_type: PeerAddressType,
    pub peer_address: Address,
    pub interval: u16,
    pub latency: u16,
    pub supervision_timeout: u16,
}

impl ConnectionCompleteEvent {
    fn failed(error: BleError, peer_address_type: PeerAddressType, peer_address: Address) -> Self {
        Self {
            status: Err(error),
            role: ConnectionRole::Central,
            connection_handle: 0,
            peer_address_type,
            peer_address,
            interval: 0,
            latency: 0,
            supervision_timeout: 0,
        }
    }

    pub fn status_str(&self) -> &'static str {
        match &self.status {
            Ok(()) => "BLE_ERROR_NONE",
            Err(e) => e.as_str(),
        }
    }

    pub fn to_json(&self) -> Value {
        if self.status.is_err() {
            return json!({ "status": self.status_str() });
        }
        json!({
            "status": self.status_str(),
            "peer_address_type": self.peer_address_type.as_str(),
            "peer_address": self.peer_address,
            "interval": self.interval,
            "latency": self.latency,
            "supervision_timeout": self.supervision_timeout,
            "connection_handle": self.connection_handle,
            "own_role": self.role.as_str(),
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct DisconnectionCompleteEvent {
    pub connection_handle: u16,
    pub reason: DisconnectionReason,
}

impl DisconnectionCompleteEvent {
    pub fn to_json(&self) -> Value {
        json!({
            "connection_handle": self.connection_handle,
            "reason": self.reason.as_str(),
        })
    }
}

#[derive(Clone, Debug)]
enum GapEvent {
    ConnectionComplete(ConnectionCompleteEvent),
    DisconnectionComplete(DisconnectionCompleteEvent),
}

/// Receiver of GAP events. Only one handler is installed at a time.
pub trait GapEventHandler {
    fn on_connection_complete(&self, _event: &ConnectionCompleteEvent) {}
    fn on_disconnection_complete(&self, _event: &DisconnectionCompleteEvent) {}
}

/// Default handler: prints events on the console.
pub struct EventPrinter {
    output: Output,
}

impl EventPrinter {
    pub fn new(output: Output) -> Self {
        Self { output }
    }

    fn print(&self, name: &str, value: Value) {
        self.output.write_json(&json!({
            "type": "event",
            "name": name,
            "value": value,
        }));
    }
}

impl GapEventHandler for EventPrinter {
    fn on_connection_complete(&self, event: &ConnectionCompleteEvent) {
        self.print("connection_complete", event.to_json());
    }

    fn on_disconnection_complete(&self, event: &DisconnectionCompleteEvent) {
        self.print("disconnection_complete", event.to_json());
    }
}

/* ---- Stack ---- */

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Connection {
    role: ConnectionRole,
    peer_address_type: PeerAddressType,
    peer_address: Address,
}

struct PendingConnect {
    peer_address_type: PeerAddressType,
    peer_address: Address,
    event: EventHandle,
}

#[derive(Default)]
struct StackState {
    initialized: bool,
    initializing: Option<EventHandle>,
    connecting: Option<PendingConnect>,
    connections: BTreeMap<u16, Connection>,
    next_handle: u16,
}

pub struct Ble {
    me: Weak<Ble>,
    settings: StackSettings,
    queue: EventQueue,
    state: RefCell<StackState>,
    handler: RefCell<Rc<dyn GapEventHandler>>,
    default_handler: Rc<dyn GapEventHandler>,
}

impl Ble {
    pub fn new(settings: StackSettings, queue: EventQueue, output: Output) -> Rc<Self> {
        let default_handler: Rc<dyn GapEventHandler> = Rc::new(EventPrinter::new(output));
        Rc::new_cyclic(|me| Ble {
            me: me.clone(),
            settings,
            queue,
            state: RefCell::new(StackState {
                next_handle: 1,
                ..StackState::default()
            }),
            handler: RefCell::new(default_handler.clone()),
            default_handler,
        })
    }

    /* ---- Lifecycle ---- */

    pub fn has_initialized(&self) -> bool {
        self.state.borrow().initialized
    }

    /// Start initialization; `on_complete` runs once the stack is up.
    pub fn init<F>(&self, on_complete: F) -> Result<(), BleError>
    where
        F: FnOnce(Result<(), BleError>) + 'static,
    {
        let mut state = self.state.borrow_mut();
        if state.initialized {
            return Err(BleError::AlreadyInitialized);
        }
        if state.initializing.is_some() {
            return Err(BleError::InvalidState);
        }

        let me = self.me.clone();
        let delay = Duration::from_millis(self.settings.init_latency_ms);
        state.initializing = Some(self.queue.post_in(delay, move || {
            let Some(ble) = me.upgrade() else {
                return;
            };
            {
                let mut state = ble.state.borrow_mut();
                state.initializing = None;
                state.initialized = true;
            }
            log_debug!("stack initialized");
            on_complete(Ok(()));
        }));
        Ok(())
    }

    /// Tear the stack down. Links are dropped without events.
    pub fn shutdown(&self) -> Result<(), BleError> {
        let mut state = self.state.borrow_mut();
        if !state.initialized && state.initializing.is_none() {
            return Err(BleError::InitializationIncomplete);
        }
        if let Some(pending) = state.initializing.take() {
            self.queue.cancel(pending);
        }
        if let Some(pending) = state.connecting.take() {
            self.queue.cancel(pending.event);
        }
        state.connections.clear();
        state.initialized = false;
        log_debug!("stack shut down");
        Ok(())
    }

    pub fn version(&self) -> Option<&str> {
        self.has_initialized().then_some(self.settings.version.as_str())
    }

    pub fn address(&self) -> Result<(PeerAddressType, Address), BleError> {
        self.require_initialized()?;
        Ok((PeerAddressType::Public, self.settings.address))
    }

    fn require_initialized(&self) -> Result<(), BleError> {
        if self.has_initialized() {
            Ok(())
        } else {
            Err(BleError::InitializationIncomplete)
        }
    }

    /* ---- GAP ---- */

    pub fn set_event_handler(&self, handler: Rc<dyn GapEventHandler>) {
        *self.handler.borrow_mut() = handler;
    }

    /// Restore the default handler if `handler` is still the installed one.
    pub fn release_event_handler(&self, handler: &Rc<dyn GapEventHandler>) {
        let mut current = self.handler.borrow_mut();
        if Rc::ptr_eq(&*current, handler) {
            *current = self.default_handler.clone();
        }
    }

    pub fn connection_count(&self) -> usize {
        self.state.borrow().connections.len()
    }

    pub fn is_connecting(&self) -> bool {
        self.state.borrow().connecting.is_some()
    }

    /// Initiate a connection; completion is reported as a GAP event.
    pub fn connect(
        &self,
        peer_address_type: PeerAddressType,
        peer_address: Address,
    ) -> Result<(), BleError> {
        self.require_initialized()?;
        let mut state = self.state.borrow_mut();
        if state.connecting.is_some() {
            return Err(BleError::OperationNotPermitted);
        }

        let me = self.me.clone();
        let delay = Duration::from_millis(self.settings.connect_latency_ms);
        let event = self.queue.post_in(delay, move || {
            if let Some(ble) = me.upgrade() {
                ble.complete_connect();
            }
        });
        state.connecting = Some(PendingConnect {
            peer_address_type,
            peer_address,
            event,
        });
        log_debug!("connecting to {peer_address_type} {peer_address}");
        Ok(())
    }

    /// Abort the pending connection attempt to `peer_address`; reported as
    /// a failed connection complete event.
    ///
    /// With nothing pending this succeeds without effect: the attempt may
    /// have completed already. A pending attempt to another peer is left
    /// alone and `InvalidParam` is returned.
    pub fn cancel_connect(
        &self,
        peer_address_type: PeerAddressType,
        peer_address: Address,
    ) -> Result<(), BleError> {
        self.require_initialized()?;
        let pending = {
            let mut state = self.state.borrow_mut();
            if state.connecting.is_none() {
                log_debug!("cancel connect to {peer_address}: nothing pending");
                return Ok(());
            }
            state.connecting.take_if(|pending| {
                pending.peer_address_type == peer_address_type
                    && pending.peer_address == peer_address
            })
        };
        let Some(pending) = pending else {
            return Err(BleError::InvalidParam);
        };
        self.queue.cancel(pending.event);
        self.post_event(GapEvent::ConnectionComplete(ConnectionCompleteEvent::failed(
            BleError::Cancelled,
            pending.peer_address_type,
            pending.peer_address,
        )));
        Ok(())
    }

    pub fn disconnect(&self, handle: u16, reason: DisconnectionReason) -> Result<(), BleError> {
        self.require_initialized()?;
        if !reason.is_local() {
            return Err(BleError::InvalidParam);
        }
        if self.state.borrow_mut().connections.remove(&handle).is_none() {
            return Err(BleError::InvalidParam);
        }
        self.post_event(GapEvent::DisconnectionComplete(DisconnectionCompleteEvent {
            connection_handle: handle,
            reason: DisconnectionReason::LocalHostTerminatedConnection,
        }));
        Ok(())
    }

    fn complete_connect(&self) {
        let event = {
            let mut state = self.state.borrow_mut();
            let Some(pending) = state.connecting.take() else {
                return;
            };
            let connection = Connection {
                role: ConnectionRole::Central,
                peer_address_type: pending.peer_address_type,
                peer_address: pending.peer_address,
            };
            match allocate_handle(&mut state, connection) {
                Some(handle) => connected_event(handle, connection),
                None => ConnectionCompleteEvent::failed(
                    BleError::NoMem,
                    pending.peer_address_type,
                    pending.peer_address,
                ),
            }
        };
        self.deliver(GapEvent::ConnectionComplete(event));
    }

    /// A remote central connects to us.
    #[cfg(test)]
    pub fn simulate_connection(&self, peer_address_type: PeerAddressType, peer_address: Address) -> u16 {
        let connection = Connection {
            role: ConnectionRole::Peripheral,
            peer_address_type,
            peer_address,
        };
        let handle = allocate_handle(&mut self.state.borrow_mut(), connection)
            .expect("connection handles exhausted");
        self.post_event(GapEvent::ConnectionComplete(connected_event(handle, connection)));
        handle
    }

    /// The remote side drops a link.
    #[cfg(test)]
    pub fn simulate_disconnection(&self, handle: u16, reason: DisconnectionReason) -> bool {
        if self.state.borrow_mut().connections.remove(&handle).is_none() {
            return false;
        }
        self.post_event(GapEvent::DisconnectionComplete(DisconnectionCompleteEvent {
            connection_handle: handle,
            reason,
        }));
        true
    }

    fn post_event(&self, event: GapEvent) {
        let me = self.me.clone();
        self.queue.post(move || {
            if let Some(ble) = me.upgrade() {
                ble.deliver(event);
            }
        });
    }

    fn deliver(&self, event: GapEvent) {
        log_trace!("gap event: {event:?}");
        let handler = self.handler.borrow().clone();
        match &event {
            GapEvent::ConnectionComplete(e) => handler.on_connection_complete(e),
            GapEvent::DisconnectionComplete(e) => handler.on_disconnection_complete(e),
        }
    }
}

/// Register `connection` under the next free handle. Handles run from 1 and
/// wrap around, skipping the ones still in use.
fn allocate_handle(state: &mut StackState, connection: Connection) -> Option<u16> {
    let mut candidate = state.next_handle;
    for _ in 0..u16::MAX {
        let next = candidate.wrapping_add(1).max(1);
        if !state.connections.contains_key(&candidate) {
            state.connections.insert(candidate, connection);
            state.next_handle = next;
            return Some(candidate);
        }
        candidate = next;
    }
    None
}

fn connected_event(handle: u16, connection: Connection) -> ConnectionCompleteEvent {
    ConnectionCompleteEvent {
        status: Ok(()),
        role: connection.role,
        connection_handle: handle,
        peer_address_type: connection.peer_address_type,
        peer_address: connection.peer_address,
        interval: CONNECTION_INTERVAL,
        latency: SLAVE_LATENCY,
        supervision_timeout: SUPERVISION_TIMEOUT,
    }
}

/* --------------------------------- Tests ---------------------------------- */

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cmd::response::tests::{capture, json_lines};
    use std::cell::Cell;
    use tokio::task::LocalSet;

    const PEER: Address = Address([1, 2, 3, 4, 5, 6]);

    fn stack(out: Output) -> Rc<Ble> {
        Ble::new(StackSettings::default(), EventQueue::new(), out)
    }

    async fn settle(ms: u64) {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn init_completes_after_latency() {
        LocalSet::new()
            .run_until(async {
                let (out, _buf) = capture();
                let ble = stack(out);
                let done = Rc::new(Cell::new(false));
                let flag = done.clone();
                ble.init(move |r| flag.set(r.is_ok())).unwrap();
                assert_eq!(ble.init(|_| {}), Err(BleError::InvalidState));
                assert!(!ble.has_initialized());
                assert_eq!(ble.version(), None);

                settle(11).await;
                assert!(done.get());
                assert!(ble.has_initialized());
                assert!(ble.version().is_some());
                assert_eq!(ble.init(|_| {}), Err(BleError::AlreadyInitialized));
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_requires_init() {
        LocalSet::new()
            .run_until(async {
                let (out, _buf) = capture();
                let ble = stack(out);
                assert_eq!(ble.shutdown(), Err(BleError::InitializationIncomplete));
                ble.init(|_| {}).unwrap();
                settle(11).await;
                assert_eq!(ble.shutdown(), Ok(()));
                assert!(!ble.has_initialized());
                assert_eq!(ble.address(), Err(BleError::InitializationIncomplete));
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn connect_prints_event_with_default_handler() {
        LocalSet::new()
            .run_until(async {
                let (out, buf) = capture();
                let ble = stack(out);
                assert_eq!(
                    ble.connect(PeerAddressType::Public, PEER),
                    Err(BleError::InitializationIncomplete)
                );
                ble.init(|_| {}).unwrap();
                settle(11).await;

                ble.connect(PeerAddressType::Random, PEER).unwrap();
                assert_eq!(
                    ble.connect(PeerAddressType::Random, PEER),
                    Err(BleError::OperationNotPermitted)
                );
                settle(51).await;
                assert_eq!(ble.connection_count(), 1);
                assert_eq!(
                    json_lines(&buf),
                    vec![json!({
                        "type": "event",
                        "name": "connection_complete",
                        "value": {
                            "status": "BLE_ERROR_NONE",
                            "peer_address_type": "RANDOM",
                            "peer_address": "01:02:03:04:05:06",
                            "interval": 40,
                            "latency": 0,
                            "supervision_timeout": 500,
                            "connection_handle": 1,
                            "own_role": "CENTRAL",
                        }
                    })]
                );

                ble.disconnect(1, DisconnectionReason::RemoteUserTerminatedConnection)
                    .unwrap();
                settle(1).await;
                assert_eq!(ble.connection_count(), 0);
                assert_eq!(
                    json_lines(&buf)[1]["value"],
                    json!({"connection_handle": 1, "reason": "LOCAL_HOST_TERMINATED_CONNECTION"})
                );
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_connect_reports_failed_event() {
        LocalSet::new()
            .run_until(async {
                let (out, buf) = capture();
                let ble = stack(out);
                ble.init(|_| {}).unwrap();
                settle(11).await;

                assert_eq!(ble.cancel_connect(PeerAddressType::Public, PEER), Ok(()));
                ble.connect(PeerAddressType::Public, PEER).unwrap();
                assert_eq!(
                    ble.cancel_connect(PeerAddressType::Random, PEER),
                    Err(BleError::InvalidParam)
                );
                assert_eq!(
                    ble.cancel_connect(PeerAddressType::Public, Address([9; 6])),
                    Err(BleError::InvalidParam)
                );
                assert!(ble.is_connecting());
                ble.cancel_connect(PeerAddressType::Public, PEER).unwrap();
                assert!(!ble.is_connecting());
                settle(100).await;
                assert_eq!(ble.connection_count(), 0);
                assert_eq!(
                    json_lines(&buf),
                    vec![json!({
                        "type": "event",
                        "name": "connection_complete",
                        "value": {"status": "BLE_ERROR_CANCELLED"}
                    })]
                );
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_validates_handle_and_reason() {
        LocalSet::new()
            .run_until(async {
                let (out, _buf) = capture();
                let ble = stack(out);
                ble.init(|_| {}).unwrap();
                settle(11).await;
                let handle = ble.simulate_connection(PeerAddressType::Public, PEER);
                assert_eq!(
                    ble.disconnect(handle, DisconnectionReason::LocalHostTerminatedConnection),
                    Err(BleError::InvalidParam)
                );
                assert_eq!(
                    ble.disconnect(handle + 1, DisconnectionReason::AuthenticationFailure),
                    Err(BleError::InvalidParam)
                );
                assert!(ble.simulate_disconnection(
                    handle,
                    DisconnectionReason::RemoteDevTerminationDueToPowerOff
                ));
                assert!(!ble.simulate_disconnection(
                    handle,
                    DisconnectionReason::RemoteDevTerminationDueToPowerOff
                ));
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_after_connection_completes_has_no_effect() {
        LocalSet::new()
            .run_until(async {
                let (out, buf) = capture();
                let ble = stack(out);
                assert_eq!(
                    ble.cancel_connect(PeerAddressType::Public, PEER),
                    Err(BleError::InitializationIncomplete)
                );
                ble.init(|_| {}).unwrap();
                settle(11).await;

                ble.connect(PeerAddressType::Public, PEER).unwrap();
                settle(51).await;
                assert_eq!(ble.cancel_connect(PeerAddressType::Public, PEER), Ok(()));
                settle(10).await;
                assert_eq!(ble.connection_count(), 1);
                assert_eq!(json_lines(&buf).len(), 1);
            })
            .await;
    }

    fn link() -> Connection {
        Connection {
            role: ConnectionRole::Central,
            peer_address_type: PeerAddressType::Public,
            peer_address: PEER,
        }
    }

    #[test]
    fn handles_skip_live_links_after_wrapping() {
        let mut state = StackState {
            next_handle: u16::MAX,
            ..StackState::default()
        };
        for handle in [u16::MAX, 1, 2] {
            state.connections.insert(handle, link());
        }
        assert_eq!(allocate_handle(&mut state, link()), Some(3));
        assert_eq!(state.next_handle, 4);
        assert_eq!(state.connections.len(), 4);

        state.next_handle = u16::MAX - 1;
        assert_eq!(allocate_handle(&mut state, link()), Some(u16::MAX - 1));
        assert_eq!(allocate_handle(&mut state, link()), Some(4));
    }

    #[test]
    fn handles_exhausted() {
        let mut state = StackState {
            next_handle: 1,
            ..StackState::default()
        };
        for handle in 1..=u16::MAX {
            state.connections.insert(handle, link());
        }
        assert_eq!(allocate_handle(&mut state, link()), None);
        assert_eq!(state.connections.len(), usize::from(u16::MAX));
    }

    struct Counter(Cell<usize>);

    impl GapEventHandler for Counter {
        fn on_connection_complete(&self, _: &ConnectionCompleteEvent) {
            self.0.set(self.0.get() + 1);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn custom_handler_replaces_printer() {
        LocalSet::new()
            .run_until(async {
                let (out, buf) = capture();
                let ble = stack(out);
                let counter = Rc::new(Counter(Cell::new(0)));
                let installed: Rc<dyn GapEventHandler> = counter.clone();
                ble.set_event_handler(installed.clone());
                ble.simulate_connection(PeerAddressType::Public, PEER);
                settle(1).await;
                assert_eq!(counter.0.get(), 1);
                assert!(json_lines(&buf).is_empty());

                let stranger: Rc<dyn GapEventHandler> = Rc::new(Counter(Cell::new(0)));
                ble.release_event_handler(&stranger);
                ble.simulate_connection(PeerAddressType::Public, PEER);
                settle(1).await;
                assert_eq!(counter.0.get(), 2);

                ble.release_event_handler(&installed);
                ble.simulate_connection(PeerAddressType::Public, PEER);
                settle(1).await;
                assert_eq!(counter.0.get(), 2);
                assert_eq!(json_lines(&buf).len(), 1);
            })
            .await;
    }

    #[test]
    fn settings_from_yaml() {
        let settings: StackSettings =
            serde_yaml::from_str("address: \"11:22:33:44:55:66\"\nconnect_latency_ms: 5\n").unwrap();
        assert_eq!(settings.address.to_string(), "11:22:33:44:55:66");
        assert_eq!(settings.connect_latency_ms, 5);
        assert_eq!(settings.init_latency_ms, StackSettings::default().init_latency_ms);
        assert!(serde_yaml::from_str::<StackSettings>("colour: blue\n").is_err());
    }
}
