//! Background task that owns the socket.
//!
//! All transitions, frame dispatch, timers and room bookkeeping run on this
//! one task, so an inbound frame is fully dispatched before the next one is
//! read and rooms are replayed before `Connected` is published.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use bms_shared::{event_types, protocol, ClientFrame, RealtimeEvent, ServerFrame};
use futures_channel::mpsc::UnboundedReceiver;
use futures_channel::oneshot;
use futures_util::StreamExt;
use tokio::sync::watch;
use tokio::time::Instant;

use super::connection::{ConnectionState, ConnectionStatus};
use super::machine::{Action, ConnectionMachine};
use super::registry::{EventRegistry, StateObservers};
use super::rooms::RoomTracker;
use super::transport::{Connector, Endpoint, Transport};
use crate::config::ClientConfig;
use crate::error::{RealtimeError, Result};

const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

type Handshake = Pin<Box<dyn Future<Output = Result<Box<dyn Transport>>> + Send>>;

/// Requests from [`RealtimeClient`](super::RealtimeClient) handles.
pub(crate) enum Command {
    Connect(oneshot::Sender<Result<()>>),
    Reconnect(oneshot::Sender<Result<()>>),
    Disconnect(oneshot::Sender<()>),
    JoinRoom(String),
    LeaveRoom(String),
    Ping,
    QueryRooms(oneshot::Sender<Vec<String>>),
    DesiredRooms(oneshot::Sender<Vec<String>>),
    Shutdown(oneshot::Sender<()>),
}

/// State visible to handles without a round trip through the driver.
pub(crate) struct Shared {
    pub(crate) events: EventRegistry<RealtimeEvent>,
    pub(crate) observers: StateObservers<ConnectionState>,
    pub(crate) status: watch::Sender<ConnectionStatus>,
}

pub(crate) struct Driver {
    config: ClientConfig,
    connector: Arc<dyn Connector>,
    shared: Arc<Shared>,
    machine: ConnectionMachine,
    rooms: RoomTracker,
    transport: Option<Box<dyn Transport>>,
    /// In-flight handshake. Dropping it abandons the attempt.
    handshake: Option<Handshake>,
    transport_lost: bool,
    retry_at: Option<Instant>,
    heartbeat_at: Option<Instant>,
    last_error: Option<RealtimeError>,
    pending_connects: Vec<oneshot::Sender<Result<()>>>,
    room_queries: HashMap<String, oneshot::Sender<Vec<String>>>,
}

impl Driver {
    pub(crate) fn new(config: ClientConfig, connector: Arc<dyn Connector>, shared: Arc<Shared>) -> Self {
        let machine = ConnectionMachine::new(config.reconnect.clone());
        Self {
            config,
            connector,
            shared,
            machine,
            rooms: RoomTracker::new(),
            transport: None,
            handshake: None,
            transport_lost: false,
            retry_at: None,
            heartbeat_at: None,
            last_error: None,
            pending_connects: Vec::new(),
            room_queries: HashMap::new(),
        }
    }

    pub(crate) async fn run(mut self, mut commands: UnboundedReceiver<Command>) {
        loop {
            tokio::select! {
                command = commands.next() => {
                    let Some(command) = command else {
                        // Every handle was dropped.
                        break;
                    };
                    if !self.handle_command(command).await {
                        return;
                    }
                }
                inbound = recv_from(&mut self.transport) => self.handle_inbound(inbound),
                outcome = finish_handshake(&mut self.handshake) => {
                    self.handshake = None;
                    let actions = self.handshake_finished(outcome);
                    self.apply(actions).await;
                }
                _ = wait_for(self.retry_at) => {
                    self.retry_at = None;
                    let actions = self.machine.retry_due();
                    self.apply(actions).await;
                }
                _ = wait_for(self.heartbeat_at) => self.heartbeat().await,
            }

            if self.transport_lost {
                self.on_transport_lost().await;
            }
        }
        self.shutdown().await;
    }

    /// Returns `false` once the driver should stop.
    async fn handle_command(&mut self, command: Command) -> bool {
        match command {
            Command::Connect(reply) => {
                if self.machine.state().is_connected() {
                    let _ = reply.send(Ok(()));
                } else {
                    self.pending_connects.push(reply);
                    let actions = self.machine.connect_requested();
                    self.apply(actions).await;
                }
            }
            Command::Reconnect(reply) => {
                self.pending_connects.push(reply);
                let actions = self.machine.reconnect_requested();
                self.apply(actions).await;
            }
            Command::Disconnect(done) => {
                let actions = self.machine.disconnect_requested();
                self.apply(actions).await;
                let _ = done.send(());
            }
            Command::JoinRoom(room) => {
                if self.rooms.join(&room) {
                    crate::log_debug!("Joining room {}", room);
                    self.send_if_connected(ClientFrame::JoinRoom { room }).await;
                }
            }
            Command::LeaveRoom(room) => {
                if self.rooms.leave(&room) {
                    crate::log_debug!("Leaving room {}", room);
                    self.send_if_connected(ClientFrame::LeaveRoom { room }).await;
                }
            }
            Command::Ping => self.send_if_connected(ClientFrame::Ping).await,
            Command::QueryRooms(reply) => {
                if !self.machine.state().is_connected() {
                    let _ = reply.send(Vec::new());
                    return true;
                }
                // Callers that timed out have dropped their receivers.
                self.room_queries.retain(|_, pending| !pending.is_canceled());
                let request_id = uuid::Uuid::new_v4().to_string();
                self.room_queries.insert(request_id.clone(), reply);
                self.send_frame(ClientFrame::GetRooms { request_id }).await;
            }
            Command::DesiredRooms(reply) => {
                let _ = reply.send(self.rooms.to_vec());
            }
            Command::Shutdown(done) => {
                self.shutdown().await;
                let _ = done.send(());
                return false;
            }
        }
        true
    }

    async fn apply(&mut self, actions: Vec<Action>) {
        let mut queue = VecDeque::from(actions);
        while let Some(action) = queue.pop_front() {
            match action {
                Action::Open => {
                    let follow_up = self.open().await;
                    queue.extend(follow_up);
                }
                Action::Close => self.close_transport().await,
                Action::ScheduleRetry { attempt, delay } => {
                    crate::log_info!(
                        "Reconnecting to {} in {}ms (attempt {})",
                        self.config.namespace,
                        delay.as_millis(),
                        attempt
                    );
                    self.retry_at = Some(Instant::now() + delay);
                }
                Action::CancelRetry => self.retry_at = None,
                Action::ReplayRooms => self.replay_rooms().await,
                Action::Publish(state) => self.publish(state),
            }
        }
    }

    /// Start a handshake. Its outcome arrives through the run loop, so
    /// commands such as `Disconnect` are still served while it is pending.
    async fn open(&mut self) -> Vec<Action> {
        // Exactly one transport per client: drop the old session first.
        self.close_transport().await;

        match self.endpoint() {
            Ok(endpoint) => {
                self.handshake = Some(Box::pin(handshake(
                    self.connector.clone(),
                    endpoint,
                    self.config.connect_timeout,
                )));
                Vec::new()
            }
            Err(e) => self.handshake_finished(Err(e)),
        }
    }

    fn endpoint(&self) -> Result<Endpoint> {
        let token = self.config.token().ok_or(RealtimeError::MissingToken)?;
        Ok(Endpoint {
            url: self.config.endpoint_url()?,
            namespace: self.config.namespace,
            token,
        })
    }

    fn handshake_finished(&mut self, outcome: Result<Box<dyn Transport>>) -> Vec<Action> {
        match outcome {
            Ok(transport) => {
                crate::log_info!("Realtime socket connected to {}", self.config.namespace);
                self.transport = Some(transport);
                self.transport_lost = false;
                self.last_error = None;
                self.machine.opened()
            }
            Err(e) => {
                crate::log_error!("Realtime socket error for {}: {}", self.config.namespace, e);
                let reason = e.to_string();
                self.last_error = Some(e);
                self.machine.open_failed(&reason)
            }
        }
    }

    async fn close_transport(&mut self) {
        self.heartbeat_at = None;
        self.room_queries.clear();
        if self.handshake.take().is_some() {
            crate::log_debug!("Abandoned handshake to {}", self.config.namespace);
        }
        if let Some(mut transport) = self.transport.take() {
            match tokio::time::timeout(CLOSE_TIMEOUT, transport.close()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => crate::log_debug!("Error closing transport: {}", e),
                Err(_) => crate::log_debug!("Transport close timed out"),
            }
        }
    }

    async fn on_transport_lost(&mut self) {
        self.transport_lost = false;
        self.transport = None;
        self.heartbeat_at = None;
        self.room_queries.clear();
        crate::log_warn!("Realtime socket to {} dropped", self.config.namespace);
        let actions = self.machine.dropped();
        self.apply(actions).await;
    }

    async fn replay_rooms(&mut self) {
        if self.rooms.is_empty() {
            return;
        }
        let rooms = self.rooms.to_vec();
        crate::log_info!("Rejoining {} room(s): {:?}", rooms.len(), rooms);
        for room in rooms {
            self.send_frame(ClientFrame::JoinRoom { room }).await;
        }
    }

    async fn send_if_connected(&mut self, frame: ClientFrame) {
        if self.machine.state().is_connected() {
            self.send_frame(frame).await;
        } else {
            crate::log_debug!("Not connected, holding {:?} until next connect", frame);
        }
    }

    async fn send_frame(&mut self, frame: ClientFrame) {
        if self.transport_lost {
            return;
        }
        let Some(transport) = self.transport.as_mut() else {
            return;
        };
        let text = match protocol::encode(&frame) {
            Ok(text) => text,
            Err(e) => {
                crate::log_error!("Serialize failed: {}", e);
                return;
            }
        };
        crate::log_debug!("Sending to {}: {}", self.config.namespace, text);
        if let Err(e) = transport.send(text).await {
            crate::log_error!("Send failed: {}", e);
            self.transport_lost = true;
        }
    }

    fn handle_inbound(&mut self, inbound: Option<Result<String>>) {
        match inbound {
            Some(Ok(text)) => self.dispatch(&text),
            Some(Err(e)) => {
                crate::log_error!("Realtime read error: {}", e);
                self.transport_lost = true;
            }
            None => {
                crate::log_info!("Realtime socket to {} closed by peer", self.config.namespace);
                self.transport_lost = true;
            }
        }
    }

    fn dispatch(&mut self, text: &str) {
        let frame = match protocol::decode::<ServerFrame>(text) {
            Ok(frame) => frame,
            Err(e) => {
                crate::log_error!("Failed to parse frame: {}", e);
                return;
            }
        };

        match frame {
            ServerFrame::Event(event) => {
                let delivered = self.shared.events.emit(&event.event_type, &event);
                crate::log_debug!("Dispatched {} to {} handler(s)", event.event_type, delivered);
            }
            ServerFrame::Rooms { request_id, rooms } => {
                match request_id.and_then(|id| self.room_queries.remove(&id)) {
                    Some(reply) => {
                        let _ = reply.send(rooms);
                    }
                    None => crate::log_debug!("Unsolicited room list: {:?}", rooms),
                }
            }
            ServerFrame::Pong => crate::log_debug!("Received pong"),
            ServerFrame::Error { code, message } => {
                crate::log_warn!("Server error {}: {}", code, message);
                let event = RealtimeEvent::new(event_types::ERROR, "")
                    .with_field("code", serde_json::Value::String(code))
                    .with_field("message", serde_json::Value::String(message));
                self.shared.events.emit(event_types::ERROR, &event);
            }
        }
    }

    fn publish(&mut self, state: ConnectionState) {
        crate::log_info!("Realtime {} connection: {}", self.config.namespace, state);
        self.shared.status.send_replace(ConnectionStatus {
            state: state.clone(),
            reconnect_attempts: self.machine.attempts(),
        });

        match &state {
            ConnectionState::Connected => {
                self.heartbeat_at = self.config.heartbeat_interval.map(|every| Instant::now() + every);
                for reply in self.pending_connects.drain(..) {
                    let _ = reply.send(Ok(()));
                }
            }
            ConnectionState::Error { reason } => {
                let error = self
                    .last_error
                    .clone()
                    .unwrap_or_else(|| RealtimeError::Transport(reason.clone()));
                for reply in self.pending_connects.drain(..) {
                    let _ = reply.send(Err(error.clone()));
                }
            }
            ConnectionState::Disconnected => {
                for reply in self.pending_connects.drain(..) {
                    let _ = reply.send(Err(RealtimeError::Closed));
                }
            }
            ConnectionState::Connecting | ConnectionState::Reconnecting { .. } => {}
        }

        self.shared.observers.notify(&state);
    }

    async fn heartbeat(&mut self) {
        self.heartbeat_at = None;
        if self.machine.state().is_connected() {
            self.send_frame(ClientFrame::Ping).await;
            self.heartbeat_at = self.config.heartbeat_interval.map(|every| Instant::now() + every);
        }
    }

    async fn shutdown(&mut self) {
        let actions = self.machine.disconnect_requested();
        self.apply(actions).await;
        self.close_transport().await;
        for reply in self.pending_connects.drain(..) {
            let _ = reply.send(Err(RealtimeError::Closed));
        }
        crate::log_debug!("Realtime driver for {} stopped", self.config.namespace);
    }
}

async fn recv_from(transport: &mut Option<Box<dyn Transport>>) -> Option<Result<String>> {
    match transport {
        Some(transport) => transport.recv().await,
        None => std::future::pending().await,
    }
}

async fn handshake(
    connector: Arc<dyn Connector>,
    endpoint: Endpoint,
    timeout: Duration,
) -> Result<Box<dyn Transport>> {
    match tokio::time::timeout(timeout, connector.connect(&endpoint)).await {
        Ok(result) => result,
        Err(_) => Err(RealtimeError::Timeout(timeout)),
    }
}

async fn finish_handshake(handshake: &mut Option<Handshake>) -> Result<Box<dyn Transport>> {
    match handshake {
        Some(handshake) => handshake.as_mut().await,
        None => std::future::pending().await,
    }
}

async fn wait_for(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
