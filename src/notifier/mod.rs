//! Live-update notifier.
//!
//! One background driver per session owns the connection and walks
//! `Disconnected → Connecting → Connected → Authenticated`. Screens talk to it
//! through the cheap, cloneable [`Notifier`] handle: they add and remove room
//! interest and listeners, never the connection itself.
//!
//! The driver only connects while the session is authenticated. Signing out
//! closes the connection before the driver goes back to waiting, so there is
//! no reconnect loop after logout. Lost connections are retried with a
//! bounded, growing delay; once the attempt budget is spent the notifier
//! stays disconnected until a room subscription or [`Notifier::reconnect`]
//! asks for a fresh attempt.

pub mod events;
pub mod listeners;
pub mod rooms;
pub mod socketio;
pub mod transport;

use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::config::ReconnectConfig;
use crate::identity::Identity;
use crate::session::{Session, SessionStatus};

use events::{Frame, Inbound, Outbound};
use listeners::{Handler, ListenerId, Listeners};
use rooms::Rooms;
use transport::{Connection, Transport};

pub use events::ChangeNotification;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting { attempt: u32 },
    /// Socket open, handshake not yet acknowledged.
    Connected,
    Authenticated,
}

enum Command {
    Join(String),
    Leave(String),
    Reconnect,
    Shutdown,
}

enum Ended {
    SignedOut,
    Dropped,
    Exhausted,
    Shutdown,
}

#[derive(Clone)]
pub struct Notifier {
    commands: mpsc::UnboundedSender<Command>,
    rooms: Arc<Mutex<Rooms>>,
    listeners: Arc<Mutex<Listeners>>,
    state: watch::Receiver<ConnectionState>,
    driver: Arc<tokio::sync::Mutex<Option<JoinHandle<()>>>>,
}

impl Notifier {
    /// Spawns the driver on the current tokio runtime.
    pub fn start(
        session: Arc<Session>,
        transport: Arc<dyn Transport>,
        reconnect: ReconnectConfig,
    ) -> Self {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(ConnectionState::Disconnected);
        let rooms = Arc::new(Mutex::new(Rooms::new()));
        let listeners = Arc::new(Mutex::new(Listeners::new()));

        let driver = Driver {
            session_status: session.watch(),
            session,
            transport,
            reconnect,
            commands: command_rx,
            rooms: Arc::clone(&rooms),
            listeners: Arc::clone(&listeners),
            state: state_tx,
        };

        Self {
            commands,
            rooms,
            listeners,
            state,
            driver: Arc::new(tokio::sync::Mutex::new(Some(tokio::spawn(driver.run())))),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    pub fn is_connected(&self) -> bool {
        matches!(
            self.state(),
            ConnectionState::Connected | ConnectionState::Authenticated
        )
    }

    /// Adds interest in a department room. Reference counted: the room is
    /// joined on the first subscription only.
    pub fn subscribe_room(&self, department_id: &str) {
        let first = lock(&self.rooms).subscribe(department_id);
        if first {
            self.command(Command::Join(department_id.to_string()));
        }
    }

    /// Drops one interest. The room is left once the last one is gone.
    pub fn unsubscribe_room(&self, department_id: &str) {
        let released = lock(&self.rooms).unsubscribe(department_id);
        if released {
            self.command(Command::Leave(department_id.to_string()));
        }
    }

    pub fn room_interest(&self, department_id: &str) -> usize {
        lock(&self.rooms).count(department_id)
    }

    pub fn on<F>(&self, event: &str, handler: F) -> ListenerId
    where
        F: Fn(&Inbound) + Send + Sync + 'static,
    {
        self.on_handler(event, Arc::new(handler))
    }

    pub fn on_handler(&self, event: &str, handler: Handler) -> ListenerId {
        lock(&self.listeners).add(event, handler)
    }

    /// Removes exactly the registration `id`.
    pub fn off(&self, event: &str, id: ListenerId) -> bool {
        lock(&self.listeners).remove(event, id)
    }

    pub fn listener_count(&self, event: &str) -> usize {
        lock(&self.listeners).count(event)
    }

    /// Asks a notifier that gave up reconnecting to try again.
    pub fn reconnect(&self) {
        self.command(Command::Reconnect);
    }

    /// Closes the connection and waits for the driver to stop.
    pub async fn shutdown(&self) {
        self.command(Command::Shutdown);

        let Some(driver) = self.driver.lock().await.take() else {
            return;
        };
        if let Err(e) = driver.await {
            tracing::warn!("notifier driver ended abnormally: {}", e);
        }
    }

    fn command(&self, command: Command) {
        if self.commands.send(command).is_err() {
            tracing::debug!("notifier driver is gone");
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Driver {
    session: Arc<Session>,
    session_status: watch::Receiver<SessionStatus>,
    transport: Arc<dyn Transport>,
    reconnect: ReconnectConfig,
    commands: mpsc::UnboundedReceiver<Command>,
    rooms: Arc<Mutex<Rooms>>,
    listeners: Arc<Mutex<Listeners>>,
    state: watch::Sender<ConnectionState>,
}

impl Driver {
    async fn run(mut self) {
        loop {
            let Some(identity) = self.wait_for_identity().await else {
                break;
            };

            match self.run_session(&identity).await {
                Ended::Shutdown => break,
                Ended::SignedOut | Ended::Dropped => {}
                Ended::Exhausted => {
                    tracing::warn!("live updates unavailable, reconnect budget spent");
                    if !self.wait_for_retry(&identity).await {
                        break;
                    }
                }
            }
        }

        self.set_state(ConnectionState::Disconnected);
        tracing::debug!("notifier driver finished");
    }

    /// Waits until the session is authenticated. `None` means shut down.
    async fn wait_for_identity(&mut self) -> Option<Identity> {
        self.set_state(ConnectionState::Disconnected);

        loop {
            if let Some(identity) = self.session_status.borrow_and_update().identity() {
                return Some(identity.clone());
            }

            tokio::select! {
                changed = self.session_status.changed() => {
                    if changed.is_err() {
                        return None;
                    }
                }
                command = self.commands.recv() => match command {
                    None | Some(Command::Shutdown) => return None,
                    Some(_) => {}
                },
            }
        }
    }

    /// Parks after the retry budget is spent. Returns `false` on shutdown.
    async fn wait_for_retry(&mut self, identity: &Identity) -> bool {
        self.set_state(ConnectionState::Disconnected);

        loop {
            tokio::select! {
                _ = wait_signed_out(&mut self.session_status, &identity.id) => return true,
                command = self.commands.recv() => match command {
                    None | Some(Command::Shutdown) => return false,
                    Some(Command::Join(_)) | Some(Command::Reconnect) => return true,
                    Some(Command::Leave(_)) => {}
                },
            }
        }
    }

    async fn run_session(&mut self, identity: &Identity) -> Ended {
        let mut failures: u32 = 0;

        loop {
            self.set_state(ConnectionState::Connecting {
                attempt: failures + 1,
            });

            let Some(token) = self.session.access_token().await else {
                return Ended::SignedOut;
            };

            let transport = Arc::clone(&self.transport);
            let connect = transport.connect(&token);
            tokio::pin!(connect);

            // Room changes during the attempt are already reflected in `rooms`.
            let connected = loop {
                tokio::select! {
                    result = &mut connect => break result,
                    _ = wait_signed_out(&mut self.session_status, &identity.id) => return Ended::SignedOut,
                    command = self.commands.recv() => match command {
                        None | Some(Command::Shutdown) => return Ended::Shutdown,
                        Some(_) => {}
                    },
                }
            };

            match connected {
                Ok(connection) => {
                    match self.serve(connection, identity).await {
                        Ended::Dropped => {}
                        other => return other,
                    }
                    // Only an acknowledged handshake refills the budget.
                    if *self.state.borrow() == ConnectionState::Authenticated {
                        failures = 0;
                    }
                }
                Err(e) => tracing::warn!("live-update connect failed: {}", e),
            }

            failures += 1;
            if failures > self.reconnect.max_attempts {
                return Ended::Exhausted;
            }

            self.set_state(ConnectionState::Disconnected);
            let delay = self.reconnect.delay_for(failures);
            tracing::debug!(?delay, attempt = failures, "reconnecting");

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = wait_signed_out(&mut self.session_status, &identity.id) => return Ended::SignedOut,
                command = self.commands.recv() => match command {
                    None | Some(Command::Shutdown) => return Ended::Shutdown,
                    Some(_) => {}
                },
            }
        }
    }

    async fn serve(&mut self, mut connection: Box<dyn Connection>, identity: &Identity) -> Ended {
        self.set_state(ConnectionState::Connected);

        // Room changes made while offline are already reflected in `rooms`.
        while let Ok(command) = self.commands.try_recv() {
            if matches!(command, Command::Shutdown) {
                connection.close().await;
                return Ended::Shutdown;
            }
        }

        let mut handshake = vec![Outbound::authenticate(identity)];
        let active = lock(&self.rooms).active();
        handshake.extend(
            active
                .into_iter()
                .map(|department_id| Outbound::JoinDepartment { department_id }),
        );

        for outbound in handshake {
            if let Err(e) = connection.send(outbound.into_frame()).await {
                tracing::warn!("live-update handshake failed: {}", e);
                return Ended::Dropped;
            }
        }

        loop {
            tokio::select! {
                frame = connection.recv() => match frame {
                    Some(Ok(frame)) => self.handle_frame(frame),
                    Some(Err(e)) => {
                        tracing::warn!("live-update connection error: {}", e);
                        return Ended::Dropped;
                    }
                    None => {
                        tracing::info!("live-update connection lost");
                        return Ended::Dropped;
                    }
                },
                command = self.commands.recv() => {
                    let outbound = match command {
                        Some(Command::Join(department_id)) => Outbound::JoinDepartment { department_id },
                        Some(Command::Leave(department_id)) => Outbound::LeaveDepartment { department_id },
                        Some(Command::Reconnect) => continue,
                        None | Some(Command::Shutdown) => {
                            connection.close().await;
                            return Ended::Shutdown;
                        }
                    };
                    tracing::debug!(?outbound, "room change");
                    if let Err(e) = connection.send(outbound.into_frame()).await {
                        tracing::warn!("live-update send failed: {}", e);
                        return Ended::Dropped;
                    }
                },
                _ = wait_signed_out(&mut self.session_status, &identity.id) => {
                    connection.close().await;
                    tracing::info!("live-update connection closed on sign-out");
                    return Ended::SignedOut;
                },
            }
        }
    }

    fn handle_frame(&self, frame: Frame) {
        let inbound = match Inbound::from_frame(frame) {
            Ok(inbound) => inbound,
            Err(e) => {
                tracing::error!("dropping malformed frame: {}", e);
                return;
            }
        };

        match &inbound {
            Inbound::Authenticated { .. } => {
                tracing::info!("live-update channel authenticated");
                self.set_state(ConnectionState::Authenticated);
            }
            Inbound::Error { message } => tracing::warn!("live-update server error: {}", message),
            _ => {}
        }

        let handlers = lock(&self.listeners).handlers(inbound.event_name());
        tracing::debug!(event = inbound.event_name(), listeners = handlers.len(), "dispatching");
        for handler in handlers {
            handler(&inbound);
        }
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
    }
}

/// Resolves once the session no longer belongs to `identity_id`, or the
/// session is gone.
async fn wait_signed_out(status: &mut watch::Receiver<SessionStatus>, identity_id: &str) {
    let _ = status
        .wait_for(|s| !matches!(s, SessionStatus::Authenticated(identity) if identity.id == identity_id))
        .await;
}
