//! Types shared between the cooperative minesweeper server and its clients:
//! board coordinates and cell views, the line-based command grammar, and the
//! JSON payloads the server pushes to every connection.

pub mod models;
pub mod protocol;
