use std::collections::{HashSet, VecDeque};

use rand::{Rng, SeedableRng, rngs::StdRng};
use sweeper_common::{
    models::{CellView, Pos},
    protocol::{BoardMessage, MessageKind},
};
use tracing::debug;

use crate::error::BoardError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellState {
    Hidden,
    Flagged,
    Revealed,
}

#[derive(Debug, Clone)]
struct Cell {
    mine: bool,
    adjacent: u8,
    state: CellState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoardStatus {
    InProgress,
    Won,
    Lost,
}

impl BoardStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Won | Self::Lost)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigResult {
    Continue,
    Win,
    Boom,
    NoOp,
    GameAlreadyOver,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkResult {
    Changed,
    NoOp,
    GameAlreadyOver,
}

/// One game's minefield. Mines are placed once at construction and never move;
/// there is no safe first click.
#[derive(Debug, Clone)]
pub struct Board {
    width: usize,
    height: usize,
    mines: usize,
    revealed: usize,
    status: BoardStatus,
    cells: Vec<Cell>,
}

/// Read-only projection of a board, copied out of the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoardView {
    pub status: BoardStatus,
    pub cells: Vec<Vec<CellView>>,
    pub mines: Vec<Vec<bool>>,
    pub width: usize,
    pub height: usize,
}

impl BoardView {
    pub fn into_message(self, message: MessageKind, player_count: usize) -> BoardMessage {
        BoardMessage {
            message,
            board: self.cells,
            bomb: self.mines,
            size_x: self.height,
            size_y: self.width,
            player_count,
        }
    }
}

fn validate_dimensions(width: usize, height: usize, mines: usize) -> Result<usize, BoardError> {
    let invalid = BoardError::InvalidDimensions {
        width,
        height,
        mines,
    };
    let length = width.checked_mul(height).ok_or(invalid)?;
    if width == 0 || height == 0 || mines == 0 || mines >= length || u32::try_from(length).is_err()
    {
        return Err(invalid);
    }
    Ok(length)
}

/// Selection sampling: every subset of `mines` cells is equally likely.
fn generate_mines<R: Rng + ?Sized>(rng: &mut R, length: usize, mines: usize) -> Vec<bool> {
    let mut layout = Vec::with_capacity(length);

    let mut mines_left = mines;
    for cells_left in (1..=length).rev() {
        let value = rng.random_ratio(mines_left as u32, cells_left as u32);
        layout.push(value);
        if value {
            mines_left -= 1;
        }
    }

    layout
}

fn neighbors(width: usize, height: usize, index: usize) -> impl Iterator<Item = usize> {
    let col = index % width;
    let row = index / width;

    (-1isize..=1)
        .flat_map(|dy| (-1isize..=1).map(move |dx| (dx, dy)))
        .filter(|&(dx, dy)| dx != 0 || dy != 0)
        .filter_map(move |(dx, dy)| {
            let new_col = col.checked_add_signed(dx)?;
            let new_row = row.checked_add_signed(dy)?;
            (new_col < width && new_row < height).then_some(new_col + new_row * width)
        })
}

impl Board {
    /// Places `mines` mines uniformly at random. A seed makes the layout reproducible.
    pub fn new(
        width: usize,
        height: usize,
        mines: usize,
        seed: Option<u64>,
    ) -> Result<Self, BoardError> {
        let length = validate_dimensions(width, height, mines)?;
        let layout = match seed {
            Some(seed) => generate_mines(&mut StdRng::seed_from_u64(seed), length, mines),
            None => generate_mines(&mut rand::rng(), length, mines),
        };
        Ok(Self::from_layout(width, height, layout))
    }

    /// Builds a board with mines at exactly the given positions. Duplicates count once.
    pub fn with_mines(width: usize, height: usize, mines: &[Pos]) -> Result<Self, BoardError> {
        let unique: HashSet<Pos> = mines.iter().copied().collect();
        let length = validate_dimensions(width, height, unique.len())?;

        let mut layout = vec![false; length];
        for pos in unique {
            if pos.col >= width || pos.row >= height {
                return Err(BoardError::OutOfBounds {
                    col: pos.col,
                    row: pos.row,
                });
            }
            layout[pos.col + pos.row * width] = true;
        }
        Ok(Self::from_layout(width, height, layout))
    }

    fn from_layout(width: usize, height: usize, layout: Vec<bool>) -> Self {
        let cells = layout
            .iter()
            .enumerate()
            .map(|(index, &mine)| Cell {
                mine,
                adjacent: neighbors(width, height, index)
                    .filter(|&neighbor| layout[neighbor])
                    .count() as u8,
                state: CellState::Hidden,
            })
            .collect();

        Self {
            width,
            height,
            mines: layout.iter().filter(|&&mine| mine).count(),
            revealed: 0,
            status: BoardStatus::InProgress,
            cells,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn mine_count(&self) -> usize {
        self.mines
    }

    pub fn revealed_count(&self) -> usize {
        self.revealed
    }

    pub fn status(&self) -> BoardStatus {
        self.status
    }

    pub fn contains(&self, pos: Pos) -> bool {
        pos.col < self.width && pos.row < self.height
    }

    pub fn is_mine(&self, pos: Pos) -> Result<bool, BoardError> {
        let index = self.index(pos)?;
        Ok(self.cells[index].mine)
    }

    pub fn cell_state(&self, pos: Pos) -> Result<CellState, BoardError> {
        let index = self.index(pos)?;
        Ok(self.cells[index].state)
    }

    fn index(&self, pos: Pos) -> Result<usize, BoardError> {
        if self.contains(pos) {
            Ok(pos.col + pos.row * self.width)
        } else {
            Err(BoardError::OutOfBounds {
                col: pos.col,
                row: pos.row,
            })
        }
    }

    fn safe_cells(&self) -> usize {
        self.width * self.height - self.mines
    }

    pub fn dig(&mut self, pos: Pos) -> Result<DigResult, BoardError> {
        let index = self.index(pos)?;

        if self.status.is_terminal() {
            return Ok(DigResult::GameAlreadyOver);
        }

        let cell = &self.cells[index];
        if cell.state != CellState::Hidden {
            debug!("Ignoring dig on {:?} cell {}", cell.state, pos);
            return Ok(DigResult::NoOp);
        }

        if cell.mine {
            self.status = BoardStatus::Lost;
            return Ok(DigResult::Boom);
        }

        let before = self.revealed;
        self.reveal_from(index);
        debug!("Dig at {} revealed {} cells", pos, self.revealed - before);

        if self.revealed == self.safe_cells() {
            self.status = BoardStatus::Won;
            Ok(DigResult::Win)
        } else {
            Ok(DigResult::Continue)
        }
    }

    /// Reveals `start` and, across zero-count cells, every hidden cell reachable
    /// through the eight neighbours. Flagged cells are left alone.
    fn reveal_from(&mut self, start: usize) {
        let (width, height) = (self.width, self.height);
        let mut visited = HashSet::from([start]);
        let mut frontier = VecDeque::from([start]);

        while let Some(index) = frontier.pop_front() {
            let cell = &mut self.cells[index];
            if cell.mine || cell.state != CellState::Hidden {
                continue;
            }

            cell.state = CellState::Revealed;
            let adjacent = cell.adjacent;
            self.revealed += 1;

            if adjacent != 0 {
                continue;
            }

            for neighbor in neighbors(width, height, index) {
                if visited.insert(neighbor) {
                    frontier.push_back(neighbor);
                }
            }
        }
    }

    pub fn flag(&mut self, pos: Pos) -> Result<MarkResult, BoardError> {
        self.mark(pos, CellState::Hidden, CellState::Flagged)
    }

    pub fn deflag(&mut self, pos: Pos) -> Result<MarkResult, BoardError> {
        self.mark(pos, CellState::Flagged, CellState::Hidden)
    }

    fn mark(&mut self, pos: Pos, from: CellState, to: CellState) -> Result<MarkResult, BoardError> {
        let index = self.index(pos)?;

        if self.status.is_terminal() {
            return Ok(MarkResult::GameAlreadyOver);
        }

        let cell = &mut self.cells[index];
        if cell.state == from {
            cell.state = to;
            Ok(MarkResult::Changed)
        } else {
            Ok(MarkResult::NoOp)
        }
    }

    pub fn snapshot(&self) -> BoardView {
        let lost = self.status == BoardStatus::Lost;
        let cells = self
            .cells
            .chunks(self.width)
            .map(|row| {
                row.iter()
                    .map(|cell| match cell.state {
                        CellState::Hidden => CellView::Hidden,
                        CellState::Flagged => CellView::Flagged,
                        CellState::Revealed => CellView::Revealed(cell.adjacent),
                    })
                    .collect()
            })
            .collect();
        let mines = self
            .cells
            .chunks(self.width)
            .map(|row| row.iter().map(|cell| lost && cell.mine).collect())
            .collect();

        BoardView {
            status: self.status,
            cells,
            mines,
            width: self.width,
            height: self.height,
        }
    }
}
