use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{CellView, Pos};

pub const HELP_TEXT: &str = "Commands:\n\
    dig <col> <row>\n\
    flag <col> <row>\n\
    deflag <col> <row>\n\
    look\n\
    help\n\
    bye";

/// A board action. Coordinates are column first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Dig(Pos),
    Flag(Pos),
    Deflag(Pos),
}

/// One line of text sent by a player, parsed. Grammar: `<verb> <col> <row>` for
/// board actions, a bare verb for everything else.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Request {
    Command(Command),
    Look,
    Help,
    Bye,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("empty command")]
    Empty,
    #[error("unknown command: {0}")]
    UnknownVerb(String),
    #[error("{verb} expects <col> <row>")]
    MissingArgument { verb: &'static str },
    #[error("not a coordinate: {0}")]
    InvalidNumber(String),
    #[error("unexpected trailing input: {0}")]
    TrailingTokens(String),
}

impl FromStr for Request {
    type Err = CommandError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut tokens = line.split_whitespace();
        let verb = tokens.next().ok_or(CommandError::Empty)?;

        let request = match verb {
            "dig" => Request::Command(Command::Dig(parse_pos(&mut tokens, "dig")?)),
            "flag" => Request::Command(Command::Flag(parse_pos(&mut tokens, "flag")?)),
            "deflag" => Request::Command(Command::Deflag(parse_pos(&mut tokens, "deflag")?)),
            "look" => Request::Look,
            "help" => Request::Help,
            "bye" => Request::Bye,
            other => return Err(CommandError::UnknownVerb(other.to_string())),
        };

        let rest: Vec<&str> = tokens.collect();
        if !rest.is_empty() {
            return Err(CommandError::TrailingTokens(rest.join(" ")));
        }

        Ok(request)
    }
}

fn parse_pos<'a>(
    tokens: &mut impl Iterator<Item = &'a str>,
    verb: &'static str,
) -> Result<Pos, CommandError> {
    let col = parse_coordinate(tokens.next().ok_or(CommandError::MissingArgument { verb })?)?;
    let row = parse_coordinate(tokens.next().ok_or(CommandError::MissingArgument { verb })?)?;
    Ok(Pos { col, row })
}

fn parse_coordinate(token: &str) -> Result<usize, CommandError> {
    if !token.bytes().all(|b| b.is_ascii_digit()) {
        return Err(CommandError::InvalidNumber(token.to_string()));
    }
    token
        .parse()
        .map_err(|_| CommandError::InvalidNumber(token.to_string()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MessageKind {
    /// Sent to a player when they join.
    Welcome,
    /// Default kind for every broadcast that did not end the game.
    Update,
    Boom,
    Win,
    /// Reply to `look`, sent to the requester only.
    Look,
    Help,
    Error,
}

/// Full board state as seen by every player. `size_x` counts rows and
/// `size_y` counts columns; `board[row][col]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardMessage {
    pub message: MessageKind,
    pub board: Vec<Vec<CellView>>,
    pub bomb: Vec<Vec<bool>>,
    pub size_x: usize,
    pub size_y: usize,
    pub player_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoticeMessage {
    pub message: MessageKind,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServerMessage {
    Board(BoardMessage),
    Notice(NoticeMessage),
}

impl ServerMessage {
    pub fn error(reason: impl ToString) -> Self {
        Self::Notice(NoticeMessage {
            message: MessageKind::Error,
            text: reason.to_string(),
        })
    }

    pub fn help() -> Self {
        Self::Notice(NoticeMessage {
            message: MessageKind::Help,
            text: HELP_TEXT.to_string(),
        })
    }

    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Board(board) => board.message,
            Self::Notice(notice) => notice.message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_board_actions_column_first() {
        assert_eq!(
            "dig 3 7".parse::<Request>(),
            Ok(Request::Command(Command::Dig(Pos::new(3, 7))))
        );
        assert_eq!(
            "flag 0 1".parse::<Request>(),
            Ok(Request::Command(Command::Flag(Pos::new(0, 1))))
        );
        assert_eq!(
            "deflag  2 2\n".parse::<Request>(),
            Ok(Request::Command(Command::Deflag(Pos::new(2, 2))))
        );
    }

    #[test]
    fn parses_bare_verbs() {
        assert_eq!("look".parse::<Request>(), Ok(Request::Look));
        assert_eq!(" help ".parse::<Request>(), Ok(Request::Help));
        assert_eq!("bye".parse::<Request>(), Ok(Request::Bye));
    }

    #[test]
    fn rejects_malformed_lines() {
        assert_eq!("".parse::<Request>(), Err(CommandError::Empty));
        assert_eq!(
            "dig abc 1".parse::<Request>(),
            Err(CommandError::InvalidNumber("abc".into()))
        );
        assert_eq!(
            "dig -1 1".parse::<Request>(),
            Err(CommandError::InvalidNumber("-1".into()))
        );
        assert_eq!(
            "dig 1".parse::<Request>(),
            Err(CommandError::MissingArgument { verb: "dig" })
        );
        assert_eq!(
            "dig 1 2 3".parse::<Request>(),
            Err(CommandError::TrailingTokens("3".into()))
        );
        assert_eq!(
            "look 1".parse::<Request>(),
            Err(CommandError::TrailingTokens("1".into()))
        );
        assert_eq!(
            "DIG 1 2".parse::<Request>(),
            Err(CommandError::UnknownVerb("DIG".into()))
        );
    }

    #[test]
    fn board_message_uses_client_field_names() {
        let message = ServerMessage::Board(BoardMessage {
            message: MessageKind::Boom,
            board: vec![vec![CellView::Revealed(1), CellView::Hidden]],
            bomb: vec![vec![false, true]],
            size_x: 1,
            size_y: 2,
            player_count: 3,
        });

        let value: serde_json::Value = serde_json::to_value(&message).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "message": "BOOM",
                "board": [["1", "-"]],
                "bomb": [[false, true]],
                "size_x": 1,
                "size_y": 2,
                "player_count": 3,
            })
        );
    }

    #[test]
    fn notices_deserialize_separately_from_boards() {
        let text = serde_json::to_string(&ServerMessage::error("nope")).unwrap();
        let parsed: ServerMessage = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed.kind(), MessageKind::Error);
        assert!(matches!(parsed, ServerMessage::Notice(_)));
    }
}
