use rocket::http::Status;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BoardError {
    #[error("invalid board: {width}x{height} with {mines} mines")]
    InvalidDimensions {
        width: usize,
        height: usize,
        mines: usize,
    },
    #[error("cell ({col}, {row}) is outside the board")]
    OutOfBounds { col: usize, row: usize },
}

/// Why a queued payload did not reach a connection's outbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DeliveryError {
    #[error("outbox full")]
    Full,
    #[error("connection closed")]
    Closed,
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("session not found: {0}")]
    SessionNotFound(String),
    #[error("unknown connection: {0}")]
    UnknownConnection(Uuid),
    #[error(transparent)]
    Board(#[from] BoardError),
}

impl DispatchError {
    pub fn status(&self) -> Status {
        match self {
            Self::SessionNotFound(_) | Self::UnknownConnection(_) => Status::NotFound,
            Self::Board(_) => Status::BadRequest,
        }
    }
}
