use std::sync::Arc;

use rocket::{
    State,
    futures::{SinkExt, StreamExt},
    get,
    http::Status,
    post,
    serde::json::Json,
};
use rocket_ws::{Channel, Message, WebSocket};
use tracing::{debug, error, info, instrument, warn};

use sweeper_common::models::{CreateResponse, GameParams};

use crate::{
    dispatcher::{Dispatcher, Flow},
    rate_limit::{ClientIp, RateLimiter},
    session::Outbox,
};

#[post("/create", data = "<params>")]
#[instrument(level = "trace", skip(dispatcher, rate_limiter), fields(client_ip = %client_ip.0, width = params.width, height = params.height, mines = params.mines))]
pub fn create_game(
    params: Json<GameParams>,
    dispatcher: &State<Arc<Dispatcher>>,
    rate_limiter: &State<RateLimiter>,
    client_ip: ClientIp,
) -> Result<Json<CreateResponse>, Status> {
    info!(
        "Session creation request from {}: {}x{} with {} mines",
        client_ip.0, params.width, params.height, params.mines
    );

    if let Err(status) = rate_limiter.check(&client_ip) {
        warn!("Rate limit exceeded for client {}", client_ip.0);
        return Err(status);
    }

    match dispatcher.create_session(params.0) {
        Ok(id) => {
            info!("Created session {} for client {}", id, client_ip.0);
            Ok(Json(CreateResponse { id }))
        }
        Err(e) => {
            warn!("Rejected session creation from {}: {}", client_ip.0, e);
            Err(e.status())
        }
    }
}

/// Joins the session named by `id`, or the current open session when absent.
#[get("/ws?<id>")]
#[instrument(level = "trace", skip(ws, dispatcher))]
pub fn websocket_handler(
    ws: WebSocket,
    dispatcher: &State<Arc<Dispatcher>>,
    id: Option<String>,
) -> Result<Channel<'static>, Status> {
    if let Some(id) = &id
        && dispatcher.session(id).is_none()
    {
        warn!("WebSocket connection attempt for non-existent session: {}", id);
        return Err(Status::NotFound);
    }

    let dispatcher = dispatcher.inner().clone();
    Ok(ws.channel(move |stream| {
        Box::pin(async move {
            let (outbox, mut outgoing) = Outbox::channel(dispatcher.config().outbox_capacity);
            let connection = match dispatcher.on_connect(id.as_deref(), outbox).await {
                Ok(handle) => handle.connection,
                Err(e) => {
                    warn!("Could not join session {:?}: {}", id, e);
                    return Ok(());
                }
            };
            info!("Client connected (connection: {})", connection);

            let (mut write, mut read) = stream.split();

            // Ends when the outbox is dropped, which happens when the session lets go of us.
            let mut send_task = tokio::spawn(async move {
                while let Some(text) = outgoing.recv().await {
                    if let Err(e) = write.send(Message::Text(text)).await {
                        debug!("WebSocket send failed for {}: {}", connection, e);
                        break;
                    }
                }
                let _ = write.close().await;
            });

            let reader = dispatcher.clone();
            let mut recv_task = tokio::spawn(async move {
                while let Some(message) = read.next().await {
                    match message {
                        Ok(Message::Text(text)) => match reader.on_message(connection, &text).await {
                            Ok(Flow::Continue) => {}
                            Ok(Flow::Close) => break,
                            Err(e) => {
                                warn!("Dropping connection {}: {}", connection, e);
                                break;
                            }
                        },
                        Ok(Message::Close(_)) => {
                            info!("WebSocket connection closed (connection: {})", connection);
                            break;
                        }
                        Ok(_) => debug!("Ignoring non-text message from {}", connection),
                        Err(e) => {
                            error!("WebSocket error (connection: {}): {}", connection, e);
                            break;
                        }
                    }
                }
            });

            tokio::select! {
                _ = &mut send_task => recv_task.abort(),
                _ = &mut recv_task => send_task.abort(),
            }

            dispatcher.on_disconnect(connection).await;
            info!("Client disconnected (connection: {})", connection);
            Ok(())
        })
    }))
}
