use std::{collections::HashMap, time::Instant};

use sweeper_common::protocol::{Command, MessageKind, ServerMessage};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::{
    board::{Board, BoardStatus, DigResult},
    error::{BoardError, DeliveryError},
};

pub type ConnectionId = Uuid;

/// Sending half of a connection's bounded queue. The transport drains the
/// receiving half into the socket.
#[derive(Debug, Clone)]
pub struct Outbox {
    tx: mpsc::Sender<String>,
}

impl Outbox {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    fn try_send(&self, text: String) -> Result<(), DeliveryError> {
        self.tx.try_send(text).map_err(|err| match err {
            TrySendError::Full(_) => DeliveryError::Full,
            TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlayerHandle {
    pub connection: ConnectionId,
    pub ordinal: usize,
}

#[derive(Debug)]
struct Player {
    ordinal: usize,
    outbox: Outbox,
}

/// A message and its recipients, captured while the session is locked.
/// Delivery only queues on outboxes, so it happens under the same lock and
/// players see broadcasts in the order the session produced them.
#[derive(Debug)]
#[must_use]
pub struct Broadcast {
    message: ServerMessage,
    recipients: Vec<(ConnectionId, Outbox)>,
}

impl Broadcast {
    pub fn message(&self) -> &ServerMessage {
        &self.message
    }

    pub fn recipients(&self) -> impl Iterator<Item = ConnectionId> + '_ {
        self.recipients.iter().map(|(id, _)| *id)
    }

    /// Queues the message on every recipient's outbox. Never waits; returns the
    /// connections that could not take it.
    pub fn deliver(self) -> Vec<ConnectionId> {
        let text = match serde_json::to_string(&self.message) {
            Ok(text) => text,
            Err(e) => {
                error!("Failed to serialize {:?} message: {}", self.message.kind(), e);
                return Vec::new();
            }
        };

        self.recipients
            .into_iter()
            .filter_map(|(id, outbox)| match outbox.try_send(text.clone()) {
                Ok(()) => None,
                Err(e) => {
                    warn!("Dropping recipient {}: {}", id, e);
                    Some(id)
                }
            })
            .collect()
    }
}

/// One shared game: the board plus everyone playing on it. All mutation goes
/// through `&mut self`, so the owner's lock is the only serialization point.
#[derive(Debug)]
pub struct Session {
    id: String,
    board: Board,
    players: HashMap<ConnectionId, Player>,
    joined: usize,
    created_at: Instant,
    last_activity: Instant,
}

impl Session {
    pub fn new(id: impl Into<String>, board: Board) -> Self {
        let id = id.into();
        info!(
            "Creating session {}: {}x{} with {} mines",
            id,
            board.width(),
            board.height(),
            board.mine_count()
        );
        let now = Instant::now();
        Self {
            id,
            board,
            players: HashMap::new(),
            joined: 0,
            created_at: now,
            last_activity: now,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn board(&self) -> &Board {
        &self.board
    }

    pub fn status(&self) -> BoardStatus {
        self.board.status()
    }

    pub fn is_terminal(&self) -> bool {
        self.board.status().is_terminal()
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    pub fn has_player(&self, connection: &ConnectionId) -> bool {
        self.players.contains_key(connection)
    }

    pub fn should_cleanup(&self, inactive_timeout_secs: u64, active_timeout_secs: u64) -> bool {
        let now = Instant::now();
        if now.duration_since(self.created_at).as_secs() > active_timeout_secs {
            return true;
        }

        self.is_empty() && now.duration_since(self.last_activity).as_secs() > inactive_timeout_secs
    }

    fn board_message(&self, kind: MessageKind) -> ServerMessage {
        ServerMessage::Board(
            self.board
                .snapshot()
                .into_message(kind, self.players.len()),
        )
    }

    fn to_all_except(&self, message: ServerMessage, skip: Option<&ConnectionId>) -> Broadcast {
        Broadcast {
            message,
            recipients: self
                .players
                .iter()
                .filter(|(id, _)| Some(*id) != skip)
                .map(|(id, player)| (*id, player.outbox.clone()))
                .collect(),
        }
    }

    /// A message for a single player, or `None` if they are no longer here.
    pub fn direct(&self, connection: &ConnectionId, message: ServerMessage) -> Option<Broadcast> {
        let player = self.players.get(connection)?;
        Some(Broadcast {
            message,
            recipients: vec![(*connection, player.outbox.clone())],
        })
    }

    /// Adds a player. The joiner gets a `WELCOME` board; everyone already here
    /// gets an `UPDATE` carrying the new player count.
    #[instrument(level = "trace", skip(self, outbox), fields(session = %self.id))]
    pub fn join(
        &mut self,
        connection: ConnectionId,
        outbox: Outbox,
    ) -> (PlayerHandle, Vec<Broadcast>) {
        self.joined += 1;
        let ordinal = self.joined;
        self.players.insert(connection, Player { ordinal, outbox });
        self.last_activity = Instant::now();
        info!(
            "Player {} ({}) joined session {}, total players: {}",
            ordinal,
            connection,
            self.id,
            self.players.len()
        );

        let mut broadcasts = Vec::with_capacity(2);
        if let Some(welcome) = self.direct(&connection, self.board_message(MessageKind::Welcome)) {
            broadcasts.push(welcome);
        }
        if self.players.len() > 1 {
            broadcasts.push(
                self.to_all_except(self.board_message(MessageKind::Update), Some(&connection)),
            );
        }

        (
            PlayerHandle {
                connection,
                ordinal,
            },
            broadcasts,
        )
    }

    /// Removes a player; the board is untouched. Remaining players get an
    /// `UPDATE` with the new count.
    #[instrument(level = "trace", skip(self), fields(session = %self.id))]
    pub fn leave(&mut self, connection: &ConnectionId) -> Option<Broadcast> {
        let Some(player) = self.players.remove(connection) else {
            debug!("Connection {} already left session {}", connection, self.id);
            return None;
        };
        self.last_activity = Instant::now();
        info!(
            "Player {} ({}) left session {}, remaining players: {}",
            player.ordinal,
            connection,
            self.id,
            self.players.len()
        );

        if self.players.is_empty() {
            None
        } else {
            Some(self.to_all_except(self.board_message(MessageKind::Update), None))
        }
    }

    /// Applies one board action and returns the post-mutation board for every
    /// player. Only the call that ends the game is tagged `BOOM` or `WIN`.
    #[instrument(level = "trace", skip(self), fields(session = %self.id))]
    pub fn apply(&mut self, command: Command) -> Result<Broadcast, BoardError> {
        let kind = match command {
            Command::Dig(pos) => match self.board.dig(pos)? {
                DigResult::Boom => {
                    warn!("Mine dug at {} in session {} - game over", pos, self.id);
                    MessageKind::Boom
                }
                DigResult::Win => {
                    info!("Session {} won, all safe cells revealed", self.id);
                    MessageKind::Win
                }
                result => {
                    debug!("Dig at {} in session {}: {:?}", pos, self.id, result);
                    MessageKind::Update
                }
            },
            Command::Flag(pos) => {
                let result = self.board.flag(pos)?;
                debug!("Flag at {} in session {}: {:?}", pos, self.id, result);
                MessageKind::Update
            }
            Command::Deflag(pos) => {
                let result = self.board.deflag(pos)?;
                debug!("Deflag at {} in session {}: {:?}", pos, self.id, result);
                MessageKind::Update
            }
        };

        self.last_activity = Instant::now();
        Ok(self.to_all_except(self.board_message(kind), None))
    }

    /// Current board for one player, tagged `LOOK`.
    pub fn look(&self, connection: &ConnectionId) -> Option<Broadcast> {
        self.direct(connection, self.board_message(MessageKind::Look))
    }
}

#[cfg(test)]
mod tests {
    use sweeper_common::{
        models::{CellView, Pos},
        protocol::BoardMessage,
    };
    use tokio::sync::mpsc::Receiver;

    use super::*;

    fn center_mine_session() -> Session {
        Session::new(
            "test",
            Board::with_mines(3, 3, &[Pos::new(1, 1)]).unwrap(),
        )
    }

    fn join(session: &mut Session) -> (ConnectionId, Receiver<String>) {
        let (outbox, rx) = Outbox::channel(16);
        let id = Uuid::new_v4();
        let (_, broadcasts) = session.join(id, outbox);
        for broadcast in broadcasts {
            assert!(broadcast.deliver().is_empty());
        }
        (id, rx)
    }

    fn next_board(rx: &mut Receiver<String>) -> BoardMessage {
        let text = rx.try_recv().expect("expected a queued message");
        match serde_json::from_str(&text).unwrap() {
            ServerMessage::Board(board) => board,
            other => panic!("expected board, got {other:?}"),
        }
    }

    #[test]
    fn joiner_is_welcomed_and_others_see_new_count() {
        let mut session = center_mine_session();
        let (_, mut first) = join(&mut session);

        let welcome = next_board(&mut first);
        assert_eq!(welcome.message, MessageKind::Welcome);
        assert_eq!(welcome.player_count, 1);
        assert_eq!((welcome.size_x, welcome.size_y), (3, 3));

        let (_, mut second) = join(&mut session);
        let welcome = next_board(&mut second);
        assert_eq!(welcome.message, MessageKind::Welcome);
        assert_eq!(welcome.player_count, 2);

        let update = next_board(&mut first);
        assert_eq!(update.message, MessageKind::Update);
        assert_eq!(update.player_count, 2);
        assert!(first.try_recv().is_err());
        assert!(second.try_recv().is_err());
    }

    #[test]
    fn ordinals_keep_counting_after_leaves() {
        let mut session = center_mine_session();
        let (a, _) = Outbox::channel(4);
        let (b, _) = Outbox::channel(4);
        let first = Uuid::new_v4();

        let (handle, _) = session.join(first, a);
        assert_eq!(handle.ordinal, 1);
        let _ = session.leave(&first);
        let (handle, _) = session.join(Uuid::new_v4(), b);
        assert_eq!(handle.ordinal, 2);
        assert_eq!(session.player_count(), 1);
    }

    #[test]
    fn every_apply_broadcasts_once_to_everyone() {
        let mut session = center_mine_session();
        let (_, mut first) = join(&mut session);
        let (_, mut second) = join(&mut session);
        while first.try_recv().is_ok() {}
        while second.try_recv().is_ok() {}

        let broadcast = session.apply(Command::Flag(Pos::new(2, 2))).unwrap();
        assert_eq!(broadcast.recipients().count(), 2);
        assert!(broadcast.deliver().is_empty());

        for rx in [&mut first, &mut second] {
            let update = next_board(rx);
            assert_eq!(update.message, MessageKind::Update);
            assert_eq!(update.board[2][2], CellView::Flagged);
            assert!(rx.try_recv().is_err());
        }
    }

    #[test]
    fn noop_still_refreshes_everyone() {
        let mut session = center_mine_session();
        let (_, mut rx) = join(&mut session);
        let _ = next_board(&mut rx);

        let broadcast = session.apply(Command::Deflag(Pos::new(0, 0))).unwrap();
        assert!(broadcast.deliver().is_empty());
        assert_eq!(next_board(&mut rx).message, MessageKind::Update);
    }

    #[test]
    fn digging_the_mine_booms_once() {
        let mut session = center_mine_session();
        let (_, mut rx) = join(&mut session);
        let _ = next_board(&mut rx);

        let _ = session.apply(Command::Dig(Pos::new(1, 1))).unwrap().deliver();
        let boom = next_board(&mut rx);
        assert_eq!(boom.message, MessageKind::Boom);
        assert!(boom.bomb[1][1]);
        assert_eq!(session.status(), BoardStatus::Lost);

        let _ = session.apply(Command::Dig(Pos::new(0, 0))).unwrap().deliver();
        let after = next_board(&mut rx);
        assert_eq!(after.message, MessageKind::Update);
        assert_eq!(after.board[0][0], CellView::Hidden);
        assert!(after.bomb[1][1]);
        assert_eq!(session.status(), BoardStatus::Lost);
    }

    #[test]
    fn cascading_dig_wins_once() {
        let mut session = Session::new(
            "test",
            Board::with_mines(3, 3, &[Pos::new(2, 2)]).unwrap(),
        );
        let (_, mut rx) = join(&mut session);
        let _ = next_board(&mut rx);

        let _ = session.apply(Command::Dig(Pos::new(0, 0))).unwrap().deliver();
        let win = next_board(&mut rx);
        assert_eq!(win.message, MessageKind::Win);
        assert_eq!(session.status(), BoardStatus::Won);
        assert!(win.bomb.iter().flatten().all(|&mine| !mine));

        let _ = session.apply(Command::Flag(Pos::new(2, 2))).unwrap().deliver();
        let after = next_board(&mut rx);
        assert_eq!(after.message, MessageKind::Update);
        assert_eq!(after.board[2][2], CellView::Hidden);
    }

    #[test]
    fn numbered_corner_dig_is_a_plain_update() {
        let mut session = center_mine_session();
        let (_, mut rx) = join(&mut session);
        let _ = next_board(&mut rx);

        let _ = session.apply(Command::Dig(Pos::new(0, 0))).unwrap().deliver();
        let update = next_board(&mut rx);
        assert_eq!(update.message, MessageKind::Update);
        assert_eq!(update.board[0][0], CellView::Revealed(1));
        assert_eq!(update.board[2][2], CellView::Hidden);
        assert_eq!(session.status(), BoardStatus::InProgress);
    }

    #[test]
    fn out_of_bounds_command_is_rejected_without_mutation() {
        let mut session = center_mine_session();
        let before = session.board().snapshot();

        let err = session.apply(Command::Dig(Pos::new(0, 3))).unwrap_err();
        assert_eq!(err, BoardError::OutOfBounds { col: 0, row: 3 });
        assert_eq!(session.board().snapshot(), before);
    }

    #[test]
    fn leave_updates_remaining_players_only() {
        let mut session = center_mine_session();
        let (first_id, _first) = join(&mut session);
        let (_, mut second) = join(&mut session);
        while second.try_recv().is_ok() {}

        let broadcast = session.leave(&first_id).unwrap();
        assert_eq!(broadcast.recipients().count(), 1);
        assert!(broadcast.deliver().is_empty());
        assert_eq!(next_board(&mut second).player_count, 1);

        assert!(session.leave(&first_id).is_none());
        assert_eq!(session.status(), BoardStatus::InProgress);
    }

    #[test]
    fn look_goes_to_the_requester_only() {
        let mut session = center_mine_session();
        let (first_id, mut first) = join(&mut session);
        let (_, mut second) = join(&mut session);
        while first.try_recv().is_ok() {}
        while second.try_recv().is_ok() {}

        let look = session.look(&first_id).unwrap();
        assert_eq!(look.recipients().collect::<Vec<_>>(), vec![first_id]);
        assert!(look.deliver().is_empty());
        assert_eq!(next_board(&mut first).message, MessageKind::Look);
        assert!(second.try_recv().is_err());
    }

    #[test]
    fn delivery_failures_are_isolated_per_recipient() {
        let mut session = center_mine_session();
        let (healthy, mut healthy_rx) = join(&mut session);

        let (full_outbox, _full_rx) = Outbox::channel(1);
        let full = Uuid::new_v4();
        let (_, broadcasts) = session.join(full, full_outbox);
        for broadcast in broadcasts {
            let _ = broadcast.deliver();
        }

        let (closed_outbox, closed_rx) = Outbox::channel(4);
        drop(closed_rx);
        let closed = Uuid::new_v4();
        let (_, broadcasts) = session.join(closed, closed_outbox);
        for broadcast in broadcasts {
            let _ = broadcast.deliver();
        }
        while healthy_rx.try_recv().is_ok() {}

        let mut failed = session
            .apply(Command::Flag(Pos::new(0, 0)))
            .unwrap()
            .deliver();
        failed.sort();
        let mut expected = vec![full, closed];
        expected.sort();
        assert_eq!(failed, expected);

        assert_eq!(next_board(&mut healthy_rx).board[0][0], CellView::Flagged);
        assert!(session.has_player(&healthy));
    }

    #[test]
    fn cleanup_only_targets_idle_empty_sessions() {
        let mut session = center_mine_session();
        assert!(!session.should_cleanup(0, u64::MAX));

        let (id, _rx) = join(&mut session);
        assert!(!session.should_cleanup(0, u64::MAX));
        let _ = session.leave(&id);
        assert!(!session.should_cleanup(600, u64::MAX));
    }
}
