use std::sync::Arc;

use dashmap::{DashMap, Entry};
use nanoid::nanoid;
use sweeper_common::{
    models::GameParams,
    protocol::{Request, ServerMessage},
};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::{
    board::Board,
    config::ServerConfig,
    error::{BoardError, DispatchError},
    session::{Broadcast, ConnectionId, Outbox, PlayerHandle, Session},
};

pub type SharedSession = Arc<Mutex<Session>>;
pub type Sessions = Arc<DashMap<String, SharedSession>>;

/// What the transport should do with a connection after a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Close,
}

/// Routes connections to sessions and fans session output back out.
#[derive(Debug)]
pub struct Dispatcher {
    sessions: Sessions,
    connections: DashMap<ConnectionId, SharedSession>,
    /// Session handed to connections that arrive without an id.
    current: Mutex<Option<String>>,
    config: ServerConfig,
}

impl Dispatcher {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
            connections: DashMap::new(),
            current: Mutex::new(None),
            config,
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn sessions(&self) -> &Sessions {
        &self.sessions
    }

    pub fn session(&self, id: &str) -> Option<SharedSession> {
        self.sessions.get(id).map(|entry| entry.value().clone())
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Creates a session with a freshly generated board.
    #[instrument(level = "trace", skip(self))]
    pub fn create_session(&self, params: GameParams) -> Result<String, DispatchError> {
        let board = self.new_board(params)?;
        Ok(self.add_session(board).0)
    }

    /// Random board for `params`, refusing anything over the configured cell limit.
    fn new_board(&self, params: GameParams) -> Result<Board, BoardError> {
        let GameParams {
            width,
            height,
            mines,
        } = params;
        if width.saturating_mul(height) > self.config.max_board_cells {
            return Err(BoardError::InvalidDimensions {
                width,
                height,
                mines,
            });
        }
        Board::new(width, height, mines, None)
    }

    /// Registers a session around an existing board.
    pub fn insert_board(&self, board: Board) -> String {
        self.add_session(board).0
    }

    fn add_session(&self, board: Board) -> (String, SharedSession) {
        let mut id_length = 5;
        let max_attempts_per_length = 10;

        loop {
            for _ in 0..max_attempts_per_length {
                let id = nanoid!(id_length);
                match self.sessions.entry(id.clone()) {
                    Entry::Occupied(_) => {
                        debug!("Session ID collision, trying another: {}", id);
                        continue;
                    }
                    Entry::Vacant(entry) => {
                        let session = Arc::new(Mutex::new(Session::new(id.clone(), board)));
                        entry.insert(session.clone());
                        return (id, session);
                    }
                }
            }

            warn!(
                "Exhausted ID attempts at length {}, increasing to {}",
                id_length,
                id_length + 1
            );
            id_length += 1;
        }
    }

    /// The most recent auto-created session that is still in progress, or a
    /// new one built from the configured defaults.
    async fn current_open_session(&self) -> Result<SharedSession, DispatchError> {
        let mut current = self.current.lock().await;

        if let Some(session) = current.as_deref().and_then(|id| self.session(id)) {
            let closed = session.lock().await.is_terminal();
            if !closed {
                return Ok(session);
            }
        }

        let board = self.new_board(self.config.default_params)?;
        let (id, session) = self.add_session(board);
        info!("Opened session {} for connections without an id", id);
        *current = Some(id);
        Ok(session)
    }

    #[instrument(level = "trace", skip(self, outbox))]
    pub async fn on_connect(
        &self,
        session_id: Option<&str>,
        outbox: Outbox,
    ) -> Result<PlayerHandle, DispatchError> {
        let session = match session_id {
            Some(id) => self
                .session(id)
                .ok_or_else(|| DispatchError::SessionNotFound(id.to_string()))?,
            None => self.current_open_session().await?,
        };

        let connection = Uuid::new_v4();
        let handle = self
            .with_session(&session, |guard| {
                self.connections.insert(connection, session.clone());
                guard.join(connection, outbox)
            })
            .await;
        Ok(handle)
    }

    /// Handles one line of text from a connection. Malformed input is answered
    /// to that connection only and never touches the board.
    #[instrument(level = "trace", skip(self))]
    pub async fn on_message(
        &self,
        connection: ConnectionId,
        text: &str,
    ) -> Result<Flow, DispatchError> {
        let session = self
            .connections
            .get(&connection)
            .map(|entry| entry.value().clone())
            .ok_or(DispatchError::UnknownConnection(connection))?;

        let request = match text.parse::<Request>() {
            Ok(request) => request,
            Err(e) => {
                warn!("Rejecting command {:?} from {}: {}", text, connection, e);
                self.reply(&session, connection, ServerMessage::error(e))
                    .await;
                return Ok(Flow::Continue);
            }
        };

        match request {
            Request::Command(command) => {
                self.with_session(&session, |guard| match guard.apply(command) {
                    Ok(broadcast) => ((), vec![broadcast]),
                    Err(e) => {
                        warn!("Rejecting {:?} from {}: {}", command, connection, e);
                        let error = guard.direct(&connection, ServerMessage::error(e));
                        ((), error.into_iter().collect())
                    }
                })
                .await;
            }
            Request::Look => {
                self.with_session(&session, |guard| {
                    ((), guard.look(&connection).into_iter().collect())
                })
                .await;
            }
            Request::Help => {
                self.reply(&session, connection, ServerMessage::help())
                    .await;
            }
            Request::Bye => {
                debug!("Connection {} said bye", connection);
                return Ok(Flow::Close);
            }
        }

        Ok(Flow::Continue)
    }

    #[instrument(level = "trace", skip(self))]
    pub async fn on_disconnect(&self, connection: ConnectionId) {
        let Some((_, session)) = self.connections.remove(&connection) else {
            debug!("Connection {} already disconnected", connection);
            return;
        };

        self.with_session(&session, |guard| {
            ((), guard.leave(&connection).into_iter().collect())
        })
        .await;
        self.retire_if_finished(&session).await;
    }

    async fn reply(&self, session: &SharedSession, connection: ConnectionId, message: ServerMessage) {
        self.with_session(session, |guard| {
            ((), guard.direct(&connection, message).into_iter().collect())
        })
        .await;
    }

    /// Runs `f` under the session lock and delivers its broadcasts before the
    /// lock is released. Delivery never waits on a socket, only on the bounded
    /// outboxes, so holding the lock here costs nothing.
    async fn with_session<T>(
        &self,
        session: &SharedSession,
        f: impl FnOnce(&mut Session) -> (T, Vec<Broadcast>),
    ) -> T {
        let (value, dropped_any) = {
            let mut guard = session.lock().await;
            let (value, broadcasts) = f(&mut *guard);
            (value, self.deliver(&mut guard, broadcasts))
        };

        if dropped_any {
            self.retire_if_finished(session).await;
        }
        value
    }

    /// Recipients whose outbox is full or closed are removed from the session,
    /// which may produce further updates. Returns whether anyone was dropped.
    fn deliver(&self, session: &mut Session, mut broadcasts: Vec<Broadcast>) -> bool {
        let mut dropped_any = false;

        while !broadcasts.is_empty() {
            let failed: Vec<ConnectionId> =
                broadcasts.into_iter().flat_map(Broadcast::deliver).collect();
            if failed.is_empty() {
                break;
            }
            dropped_any = true;

            broadcasts = failed
                .iter()
                .filter_map(|id| {
                    self.connections.remove(id);
                    session.leave(id)
                })
                .collect();
        }

        dropped_any
    }

    /// Forgets a session once its game is over and nobody is left to see it.
    async fn retire_if_finished(&self, session: &SharedSession) {
        let id = {
            let guard = session.lock().await;
            if !(guard.is_empty() && guard.is_terminal()) {
                return;
            }
            guard.id().to_string()
        };

        if self
            .sessions
            .remove_if(&id, |_, registered| Arc::ptr_eq(registered, session))
            .is_some()
        {
            info!("Retired finished session {}", id);
        }

        let mut current = self.current.lock().await;
        if current.as_deref() == Some(id.as_str()) {
            *current = None;
        }
    }
}
