use std::{env, str::FromStr, time::Duration};

use sweeper_common::models::GameParams;
use tracing::warn;

/// Server settings read from the environment. Missing or unparsable values
/// fall back to their defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Board used when a connection arrives without a session id.
    pub default_params: GameParams,
    /// Largest board, in cells, a session may be created with.
    pub max_board_cells: usize,
    /// Broadcasts a connection may have queued before it is dropped.
    pub outbox_capacity: usize,
    pub cleanup_interval: Duration,
    pub inactive_timeout_secs: u64,
    pub active_timeout_secs: u64,
    pub games_per_minute: u32,
    pub allowed_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            default_params: GameParams::default(),
            max_board_cells: 10_000,
            outbox_capacity: 64,
            cleanup_interval: Duration::from_secs(60),
            inactive_timeout_secs: 600,
            active_timeout_secs: 86400,
            games_per_minute: 10,
            allowed_origins: vec!["http://localhost:5173".to_string()],
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let read = |key: &str, default| parse_or(&lookup, key, default);

        Self {
            default_params: GameParams {
                width: read("BOARD_WIDTH", defaults.default_params.width),
                height: read("BOARD_HEIGHT", defaults.default_params.height),
                mines: read("BOARD_MINES", defaults.default_params.mines),
            },
            max_board_cells: read("MAX_BOARD_CELLS", defaults.max_board_cells),
            outbox_capacity: read("OUTBOX_CAPACITY", defaults.outbox_capacity),
            cleanup_interval: Duration::from_secs(parse_or(
                &lookup,
                "CLEANUP_INTERVAL_SECONDS",
                defaults.cleanup_interval.as_secs(),
            )),
            inactive_timeout_secs: parse_or(
                &lookup,
                "INACTIVE_GAME_TIMEOUT_SECONDS",
                defaults.inactive_timeout_secs,
            ),
            active_timeout_secs: parse_or(
                &lookup,
                "ACTIVE_GAME_TIMEOUT_SECONDS",
                defaults.active_timeout_secs,
            ),
            games_per_minute: parse_or(
                &lookup,
                "RATE_LIMIT_GAMES_PER_MINUTE",
                defaults.games_per_minute,
            ),
            allowed_origins: lookup("CORS_ALLOWED_ORIGINS")
                .map(|origins| {
                    origins
                        .split(',')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect()
                })
                .unwrap_or(defaults.allowed_origins),
        }
    }
}

fn parse_or<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    match lookup(key) {
        None => default,
        Some(value) => value.trim().parse().unwrap_or_else(|_| {
            warn!("Ignoring invalid {}={:?}, using default", key, value);
            default
        }),
    }
}
