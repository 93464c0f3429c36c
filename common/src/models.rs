use std::fmt;

use serde::{Deserialize, Serialize};

/// Zero-based board coordinate. `col` runs along the width, `row` along the height.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Pos {
    pub col: usize,
    pub row: usize,
}

impl Pos {
    pub const fn new(col: usize, row: usize) -> Self {
        Self { col, row }
    }
}

impl fmt::Display for Pos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.col, self.row)
    }
}

/// What a player sees in one cell. Serialized as a single character string:
/// `"-"` hidden, `"F"` flagged, `"0"`..`"8"` revealed with its adjacent mine count.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum CellView {
    Hidden,
    Flagged,
    Revealed(u8),
}

impl From<CellView> for String {
    fn from(value: CellView) -> Self {
        match value {
            CellView::Hidden => "-".to_string(),
            CellView::Flagged => "F".to_string(),
            CellView::Revealed(adjacent) => adjacent.to_string(),
        }
    }
}

impl TryFrom<String> for CellView {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "-" => Ok(Self::Hidden),
            "F" => Ok(Self::Flagged),
            digit => match digit.parse::<u8>() {
                Ok(adjacent) if adjacent <= 8 && digit.len() == 1 => Ok(Self::Revealed(adjacent)),
                _ => Err(format!("invalid cell value: {value:?}")),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct GameParams {
    pub width: usize,
    pub height: usize,
    pub mines: usize,
}

impl Default for GameParams {
    fn default() -> Self {
        Self {
            width: 10,
            height: 10,
            mines: 10,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateResponse {
    pub id: String,
}
