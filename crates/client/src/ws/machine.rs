//! Reconnection state machine.
//!
//! `ConnectionMachine` holds no socket and no timer. Each input event is a
//! method that updates the state and returns the [`Action`]s the driver must
//! carry out, in order. That keeps the backoff and cancellation rules
//! testable without a network.
//!
//! ```text
//! disconnected --connect()--> connecting --success--> connected
//! connecting --failure--> error
//! connected --unexpected drop--> reconnecting --success--> connected
//! reconnecting --failure, attempts < max--> reconnecting (after backoff)
//! reconnecting --failure, attempts >= max--> error
//! connected/reconnecting --disconnect()--> disconnected
//! ```

use std::time::Duration;

use super::connection::{ConnectionState, ReconnectConfig};

/// Side effects requested by the machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Open a new transport, tearing down any existing one first.
    Open,
    /// Tear down the current transport.
    Close,
    /// Arm the single retry timer.
    ScheduleRetry { attempt: u32, delay: Duration },
    /// Clear the retry timer if armed.
    CancelRetry,
    /// Send a join frame for every room in the desired set.
    ReplayRooms,
    /// Publish the new state to observers.
    Publish(ConnectionState),
}

#[derive(Debug, Clone)]
pub struct ConnectionMachine {
    config: ReconnectConfig,
    state: ConnectionState,
    attempts: u32,
    intentional: bool,
    retry_pending: bool,
}

impl ConnectionMachine {
    pub fn new(config: ReconnectConfig) -> Self {
        Self {
            config,
            state: ConnectionState::Disconnected,
            attempts: 0,
            intentional: false,
            retry_pending: false,
        }
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn retry_pending(&self) -> bool {
        self.retry_pending
    }

    /// Caller asked to connect. No-op while connected or while an attempt
    /// is already underway; the caller waits on that attempt instead.
    pub fn connect_requested(&mut self) -> Vec<Action> {
        if self.state.is_connected() || self.state.is_connecting() {
            return Vec::new();
        }
        self.start_fresh()
    }

    /// Caller asked for a fresh session regardless of the current state.
    pub fn reconnect_requested(&mut self) -> Vec<Action> {
        let mut actions = vec![Action::Close];
        actions.extend(self.start_fresh());
        actions
    }

    fn start_fresh(&mut self) -> Vec<Action> {
        self.intentional = false;
        self.attempts = 0;
        self.retry_pending = false;
        self.state = ConnectionState::Connecting;
        vec![
            Action::CancelRetry,
            Action::Publish(ConnectionState::Connecting),
            Action::Open,
        ]
    }

    /// The transport finished its handshake.
    ///
    /// Rooms are replayed before `Connected` is published so no observer can
    /// see the connected state with membership missing.
    pub fn opened(&mut self) -> Vec<Action> {
        self.attempts = 0;
        self.retry_pending = false;
        self.state = ConnectionState::Connected;
        vec![Action::ReplayRooms, Action::Publish(ConnectionState::Connected)]
    }

    /// The handshake failed.
    pub fn open_failed(&mut self, reason: &str) -> Vec<Action> {
        match self.state {
            ConnectionState::Reconnecting { attempt } => {
                if self.config.exhausted(attempt) {
                    self.fail(format!(
                        "max reconnect attempts ({}) exceeded: {}",
                        self.config.max_attempts, reason
                    ))
                } else {
                    self.schedule(attempt + 1)
                }
            }
            _ => self.fail(reason.to_string()),
        }
    }

    /// The transport closed without the caller asking for it.
    pub fn dropped(&mut self) -> Vec<Action> {
        if self.intentional || !self.state.is_connected() {
            return Vec::new();
        }
        let mut actions = vec![Action::Close];
        actions.extend(self.schedule(1));
        actions
    }

    /// The retry timer fired.
    pub fn retry_due(&mut self) -> Vec<Action> {
        if self.intentional || !self.retry_pending {
            return Vec::new();
        }
        self.retry_pending = false;
        vec![Action::Open]
    }

    /// Caller asked to disconnect. Safe to call repeatedly.
    pub fn disconnect_requested(&mut self) -> Vec<Action> {
        self.intentional = true;
        if self.state == ConnectionState::Disconnected && !self.retry_pending {
            return Vec::new();
        }
        self.retry_pending = false;
        self.attempts = 0;
        self.state = ConnectionState::Disconnected;
        vec![
            Action::CancelRetry,
            Action::Close,
            Action::Publish(ConnectionState::Disconnected),
        ]
    }

    fn schedule(&mut self, attempt: u32) -> Vec<Action> {
        self.attempts = attempt;
        self.retry_pending = true;
        self.state = ConnectionState::Reconnecting { attempt };
        vec![
            Action::Publish(self.state.clone()),
            Action::ScheduleRetry {
                attempt,
                delay: self.config.delay_for_attempt(attempt),
            },
        ]
    }

    fn fail(&mut self, reason: String) -> Vec<Action> {
        self.retry_pending = false;
        self.state = ConnectionState::Error { reason };
        vec![Action::CancelRetry, Action::Publish(self.state.clone())]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connected_machine(config: ReconnectConfig) -> ConnectionMachine {
        let mut machine = ConnectionMachine::new(config);
        machine.connect_requested();
        machine.opened();
        machine
    }

    fn scheduled(actions: &[Action]) -> Option<(u32, Duration)> {
        actions.iter().find_map(|a| match a {
            Action::ScheduleRetry { attempt, delay } => Some((*attempt, *delay)),
            _ => None,
        })
    }

    #[test]
    fn connect_then_open_reaches_connected() {
        let mut machine = ConnectionMachine::new(ReconnectConfig::default());
        let actions = machine.connect_requested();
        assert_eq!(machine.state(), &ConnectionState::Connecting);
        assert!(actions.contains(&Action::Open));

        let actions = machine.opened();
        assert_eq!(
            actions,
            vec![Action::ReplayRooms, Action::Publish(ConnectionState::Connected)]
        );
        assert_eq!(machine.attempts(), 0);
    }

    #[test]
    fn connect_while_connected_is_a_no_op() {
        let mut machine = connected_machine(ReconnectConfig::default());
        assert!(machine.connect_requested().is_empty());
        assert!(machine.state().is_connected());
    }

    #[test]
    fn connect_during_an_attempt_does_not_restart_it() {
        let mut machine = ConnectionMachine::new(ReconnectConfig::default());
        machine.connect_requested();
        assert!(machine.connect_requested().is_empty());

        let mut machine = connected_machine(ReconnectConfig::default());
        machine.dropped();
        assert!(machine.connect_requested().is_empty());
        assert_eq!(machine.state(), &ConnectionState::Reconnecting { attempt: 1 });
    }

    #[test]
    fn disconnect_during_handshake_closes_and_publishes_disconnected() {
        let mut machine = ConnectionMachine::new(ReconnectConfig::default());
        machine.connect_requested();

        let actions = machine.disconnect_requested();
        assert!(actions.contains(&Action::Close));
        assert_eq!(
            actions.last(),
            Some(&Action::Publish(ConnectionState::Disconnected))
        );
        assert!(machine.retry_due().is_empty());
    }

    #[test]
    fn first_connect_failure_goes_straight_to_error() {
        let mut machine = ConnectionMachine::new(ReconnectConfig::default());
        machine.connect_requested();
        let actions = machine.open_failed("401 Unauthorized");

        assert!(scheduled(&actions).is_none());
        assert!(matches!(machine.state(), ConnectionState::Error { .. }));
    }

    #[test]
    fn consecutive_drops_retry_with_capped_backoff_until_error() {
        let config = ReconnectConfig::default();
        let mut machine = connected_machine(config.clone());

        // One unexpected drop followed by failed retries: N failures in total.
        let mut retries = Vec::new();
        let mut actions = machine.dropped();
        let mut failures = 1;
        while let Some(retry) = scheduled(&actions) {
            retries.push(retry);
            assert!(machine.retry_due().contains(&Action::Open));
            actions = machine.open_failed("connection refused");
            failures += 1;
        }

        assert_eq!(retries.len(), failures - 1);
        assert_eq!(retries.len() as u32, config.max_attempts);
        assert!(matches!(machine.state(), ConnectionState::Error { .. }));

        let delays: Vec<Duration> = retries.iter().map(|(_, d)| *d).collect();
        assert!(delays.windows(2).all(|w| w[0] <= w[1]));
        assert!(delays.iter().all(|d| *d <= Duration::from_millis(config.max_delay_ms)));
        assert_eq!(retries[0], (1, Duration::from_millis(1000)));
    }

    #[test]
    fn success_after_retries_resets_counter() {
        let mut machine = connected_machine(ReconnectConfig::default());
        machine.dropped();
        machine.retry_due();
        machine.open_failed("timeout");
        assert_eq!(machine.attempts(), 2);

        machine.retry_due();
        machine.opened();
        assert_eq!(machine.attempts(), 0);

        let actions = machine.dropped();
        assert_eq!(scheduled(&actions), Some((1, Duration::from_millis(1000))));
    }

    #[test]
    fn disconnect_cancels_pending_retry() {
        let mut machine = connected_machine(ReconnectConfig::default());
        machine.dropped();
        assert!(machine.retry_pending());

        let actions = machine.disconnect_requested();
        assert!(actions.contains(&Action::CancelRetry));
        assert_eq!(machine.state(), &ConnectionState::Disconnected);
        assert!(machine.retry_due().is_empty());
    }

    #[test]
    fn disconnect_is_idempotent() {
        let mut machine = connected_machine(ReconnectConfig::default());
        assert!(!machine.disconnect_requested().is_empty());
        assert!(machine.disconnect_requested().is_empty());
    }

    #[test]
    fn drop_after_intentional_disconnect_is_ignored() {
        let mut machine = connected_machine(ReconnectConfig::default());
        machine.disconnect_requested();
        assert!(machine.dropped().is_empty());
        assert_eq!(machine.state(), &ConnectionState::Disconnected);
    }

    #[test]
    fn reconnect_from_error_starts_over() {
        let mut machine = ConnectionMachine::new(ReconnectConfig::default());
        machine.connect_requested();
        machine.open_failed("refused");

        let actions = machine.reconnect_requested();
        assert_eq!(actions.first(), Some(&Action::Close));
        assert!(actions.contains(&Action::Open));
        assert_eq!(machine.state(), &ConnectionState::Connecting);
        assert_eq!(machine.attempts(), 0);
    }
}
