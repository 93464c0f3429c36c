//! Cooperative minesweeper server.
//!
//! Every session holds one authoritative [`board::Board`]. Players connect over
//! a WebSocket, send line commands (`dig 3 4`, `flag 0 0`, `deflag 0 0`), and
//! after every action each player in the session receives the full board as
//! JSON. The [`dispatcher::Dispatcher`] routes connections to sessions; each
//! [`session::Session`] sits behind its own lock so actions on one board are
//! strictly ordered.

pub mod board;
pub mod cleanup;
pub mod config;
pub mod cors;
pub mod dispatcher;
pub mod error;
pub mod rate_limit;
pub mod routes;
pub mod session;

use std::sync::Arc;

use rocket::{Build, Rocket, routes};

use crate::{
    config::ServerConfig,
    cors::create_cors,
    dispatcher::Dispatcher,
    rate_limit::RateLimiter,
    routes::{create_game, websocket_handler},
};

/// Assembles the server without starting background tasks.
pub fn build_rocket(config: ServerConfig) -> Result<Rocket<Build>, rocket_cors::Error> {
    let cors = create_cors(&config.allowed_origins)?;
    let rate_limiter = RateLimiter::per_minute(config.games_per_minute);
    let dispatcher = Arc::new(Dispatcher::new(config));

    Ok(rocket::build()
        .attach(cors)
        .manage(dispatcher)
        .manage(rate_limiter)
        .mount("/", routes![create_game, websocket_handler]))
}
