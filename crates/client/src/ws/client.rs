//! Public handle to a realtime connection.

use std::sync::Arc;

use bms_shared::RealtimeEvent;
use futures_channel::mpsc::{unbounded, UnboundedSender};
use futures_channel::oneshot;
use tokio::sync::watch;

use super::connection::{ConnectionState, ConnectionStatus};
use super::driver::{Command, Driver, Shared};
use super::registry::{EventRegistry, StateObservers, Subscription, SubscriptionId};
use super::transport::{Connector, WsConnector};
use crate::config::ClientConfig;
use crate::error::{RealtimeError, Result};

/// Handle to one namespace-scoped realtime connection.
///
/// Cheap to clone; every clone drives the same socket. The background driver
/// stops when [`dispose`](Self::dispose) is called or the last clone is
/// dropped.
#[derive(Clone)]
pub struct RealtimeClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    config: ClientConfig,
    commands: UnboundedSender<Command>,
    shared: Arc<Shared>,
}

impl RealtimeClient {
    /// Create a client backed by the native WebSocket connector.
    ///
    /// Spawns the driver task, so it must be called inside a tokio runtime.
    /// Nothing is connected until [`connect`](Self::connect) is called.
    pub fn new(config: ClientConfig) -> Self {
        Self::with_connector(config, WsConnector)
    }

    pub fn with_connector(config: ClientConfig, connector: impl Connector + 'static) -> Self {
        let (commands, receiver) = unbounded();
        let (status, _) = watch::channel(ConnectionStatus::default());
        let shared = Arc::new(Shared {
            events: EventRegistry::new(),
            observers: StateObservers::default(),
            status,
        });

        let driver = Driver::new(config.clone(), Arc::new(connector), shared.clone());
        tokio::spawn(driver.run(receiver));

        Self {
            inner: Arc::new(ClientInner {
                config,
                commands,
                shared,
            }),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    fn send(&self, command: Command) -> Result<()> {
        self.inner
            .commands
            .unbounded_send(command)
            .map_err(|_| RealtimeError::Closed)
    }

    fn require_token(&self) -> Result<()> {
        if self.inner.config.token().is_none() {
            crate::log_warn!(
                "Refusing to connect to {}: no auth token",
                self.inner.config.namespace
            );
            return Err(RealtimeError::MissingToken);
        }
        Ok(())
    }

    /// Open the connection. Resolves once connected and rooms are rejoined.
    ///
    /// Returns immediately when already connected. Without a token this fails
    /// with [`RealtimeError::MissingToken`] and no network attempt is made.
    pub async fn connect(&self) -> Result<()> {
        self.require_token()?;
        let (reply, response) = oneshot::channel();
        self.send(Command::Connect(reply))?;
        response.await.map_err(|_| RealtimeError::Closed)?
    }

    /// Tear down whatever session exists and connect afresh, resetting the
    /// retry counter. This is the way out of the `error` state.
    pub async fn reconnect(&self) -> Result<()> {
        self.require_token()?;
        let (reply, response) = oneshot::channel();
        self.send(Command::Reconnect(reply))?;
        response.await.map_err(|_| RealtimeError::Closed)?
    }

    /// Close the connection and cancel any pending retry. Idempotent.
    pub async fn disconnect(&self) {
        let (done, finished) = oneshot::channel();
        if self.send(Command::Disconnect(done)).is_ok() {
            let _ = finished.await;
        }
    }

    /// Want to be in `room`. Sent now if connected, otherwise on next connect.
    pub fn join_room(&self, room: impl Into<String>) -> Result<()> {
        self.send(Command::JoinRoom(room.into()))
    }

    pub fn leave_room(&self, room: impl Into<String>) -> Result<()> {
        self.send(Command::LeaveRoom(room.into()))
    }

    pub fn ping(&self) -> Result<()> {
        self.send(Command::Ping)
    }

    /// Ask the server which rooms this socket is in.
    ///
    /// Resolves to an empty list when not connected, when the connection goes
    /// away mid-query, or when the server stays silent past the room query
    /// timeout.
    pub async fn current_rooms(&self) -> Vec<String> {
        let (reply, response) = oneshot::channel();
        if self.send(Command::QueryRooms(reply)).is_err() {
            return Vec::new();
        }
        let timeout = self.inner.config.room_query_timeout;
        match tokio::time::timeout(timeout, response).await {
            Ok(Ok(rooms)) => rooms,
            Ok(Err(_)) => Vec::new(),
            Err(_) => {
                crate::log_warn!("Room query timed out after {}ms", timeout.as_millis());
                Vec::new()
            }
        }
    }

    /// Rooms this client wants to be in, connected or not.
    pub async fn desired_rooms(&self) -> Result<Vec<String>> {
        let (reply, response) = oneshot::channel();
        self.send(Command::DesiredRooms(reply))?;
        response.await.map_err(|_| RealtimeError::Closed)
    }

    /// Register `handler` for events of `event_type`.
    pub fn on(
        &self,
        event_type: &str,
        handler: impl Fn(&RealtimeEvent) + Send + Sync + 'static,
    ) -> Subscription {
        self.inner.shared.events.on(event_type, handler)
    }

    /// Remove one handler, or all handlers of `event_type` when `id` is `None`.
    pub fn off(&self, event_type: &str, id: Option<SubscriptionId>) -> usize {
        self.inner.shared.events.off(event_type, id)
    }

    /// Called on every state transition, including repeats of the same state.
    pub fn on_connection_state_change(
        &self,
        listener: impl Fn(&ConnectionState) + Send + Sync + 'static,
    ) -> Subscription {
        self.inner.shared.observers.subscribe(listener)
    }

    pub fn status(&self) -> ConnectionStatus {
        self.inner.shared.status.borrow().clone()
    }

    pub fn state(&self) -> ConnectionState {
        self.status().state
    }

    pub fn is_connected(&self) -> bool {
        self.inner.shared.status.borrow().state.is_connected()
    }

    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.inner.shared.status.subscribe()
    }

    /// Disconnect and stop the driver. Later calls on any clone fail with
    /// [`RealtimeError::Closed`].
    pub async fn dispose(&self) {
        let (done, finished) = oneshot::channel();
        if self.send(Command::Shutdown(done)).is_ok() {
            let _ = finished.await;
        }
        self.inner.commands.close_channel();
    }
}
