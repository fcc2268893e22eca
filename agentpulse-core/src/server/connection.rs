//! One accepted socket: plain HTTP, or an upgraded `/api/live` session.

use super::http::{self, HttpResponse, RequestError};
use super::routes::{self, ApiState};
use super::websocket::{self, Frame, OpCode};
use crate::types::WindowKey;
use serde::Deserialize;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

/// How long a client may take to send its request head.
const HEADER_TIMEOUT: Duration = Duration::from_secs(10);

const READ_CHUNK: usize = 8 * 1024;

/// Close status codes sent by the server.
const CLOSE_GOING_AWAY: u16 = 1001;
const CLOSE_PROTOCOL_ERROR: u16 = 1002;
const CLOSE_UNSUPPORTED_DATA: u16 = 1003;

/// Client-to-server control message on `/api/live`.
#[derive(Debug, Deserialize)]
struct ControlMessage {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    window: Option<String>,
}

enum FrameAction {
    Continue,
    Push,
    Close,
}

/// Serve a single connection to completion.
pub async fn handle(
    mut stream: TcpStream,
    state: Arc<ApiState>,
    shutdown: watch::Receiver<bool>,
) -> io::Result<()> {
    let mut buf = Vec::with_capacity(READ_CHUNK);
    let parsed = tokio::time::timeout(HEADER_TIMEOUT, read_request(&mut stream, &mut buf)).await;

    let (request, consumed) = match parsed {
        Err(_) => {
            tracing::debug!("Request head timed out");
            return Ok(());
        }
        Ok(Err(e)) => return Err(e),
        Ok(Ok(None)) => return Ok(()),
        Ok(Ok(Some(Err(e)))) => {
            tracing::debug!(error = %e, "Malformed request");
            return respond(&mut stream, HttpResponse::bad_request(&e.to_string())).await;
        }
        Ok(Ok(Some(Ok(parsed)))) => parsed,
    };

    tracing::debug!(method = %request.method, path = %request.path, "Request");

    if request.path == "/api/live" && request.method == "GET" && request.is_websocket_upgrade() {
        let Some(key) = request.header("sec-websocket-key") else {
            return respond(
                &mut stream,
                HttpResponse::bad_request("missing Sec-WebSocket-Key"),
            )
            .await;
        };
        stream.write_all(&websocket::handshake_response(key)).await?;
        let leftover = buf.split_off(consumed);
        return live(stream, leftover, state, shutdown).await;
    }

    let response = routes::route(&state, &request).await;
    respond(&mut stream, response).await
}

/// Read until a full request head is buffered. `None` on EOF.
async fn read_request(
    stream: &mut TcpStream,
    buf: &mut Vec<u8>,
) -> io::Result<Option<Result<(http::HttpRequest, usize), RequestError>>> {
    let mut chunk = [0u8; READ_CHUNK];
    loop {
        match http::parse_request(buf) {
            Ok(Some(parsed)) => return Ok(Some(Ok(parsed))),
            Ok(None) => {}
            Err(e) => return Ok(Some(Err(e))),
        }
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Ok(None);
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}

async fn respond(stream: &mut TcpStream, response: HttpResponse) -> io::Result<()> {
    stream.write_all(&response.to_bytes()).await?;
    stream.shutdown().await
}

async fn send(writer: &mut OwnedWriteHalf, opcode: OpCode, payload: &[u8]) -> io::Result<()> {
    writer
        .write_all(&websocket::encode_frame(opcode, payload, None))
        .await
}

async fn send_close(writer: &mut OwnedWriteHalf, code: u16) -> io::Result<()> {
    send(writer, OpCode::Close, &code.to_be_bytes()).await
}

async fn push(
    writer: &mut OwnedWriteHalf,
    state: &ApiState,
    window: WindowKey,
) -> io::Result<()> {
    let message = routes::snapshot_message(&state.metrics, window).await?;
    send(writer, OpCode::Text, message.as_bytes()).await
}

/// React to one client frame, possibly switching the tracked window.
async fn on_frame(
    frame: Frame,
    writer: &mut OwnedWriteHalf,
    window: &mut WindowKey,
) -> io::Result<FrameAction> {
    match frame.opcode {
        OpCode::Ping => {
            send(writer, OpCode::Pong, &frame.payload).await?;
            Ok(FrameAction::Continue)
        }
        OpCode::Close => {
            // Echo the status code, if any
            let code = frame.payload.get(..2).unwrap_or(&[]);
            send(writer, OpCode::Close, code).await?;
            Ok(FrameAction::Close)
        }
        OpCode::Text if frame.fin => {
            let Ok(message) = serde_json::from_slice::<ControlMessage>(&frame.payload) else {
                tracing::debug!("Ignoring unparseable control message");
                return Ok(FrameAction::Continue);
            };
            if message.kind != "window" {
                return Ok(FrameAction::Continue);
            }
            match message.window.as_deref().map(str::parse::<WindowKey>) {
                Some(Ok(next)) => {
                    *window = next;
                    Ok(FrameAction::Push)
                }
                _ => {
                    tracing::debug!(window = ?message.window, "Ignoring unknown window");
                    Ok(FrameAction::Continue)
                }
            }
        }
        OpCode::Binary => {
            tracing::debug!("Binary frame on live connection, closing");
            send_close(writer, CLOSE_UNSUPPORTED_DATA).await?;
            Ok(FrameAction::Close)
        }
        OpCode::Text | OpCode::Pong | OpCode::Continuation => Ok(FrameAction::Continue),
    }
}

/// The upgraded connection loop.
async fn live(
    stream: TcpStream,
    mut buf: Vec<u8>,
    state: Arc<ApiState>,
    mut shutdown: watch::Receiver<bool>,
) -> io::Result<()> {
    let (mut reader, mut writer) = stream.into_split();
    let mut window = state.default_window;
    let mut chunk = vec![0u8; READ_CHUNK];

    // First tick completes immediately, giving the push on open
    let mut ticker = tokio::time::interval(state.push_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    tracing::debug!(window = %window, "Live connection opened");

    loop {
        loop {
            match websocket::parse_frame(&buf) {
                Ok(Some((frame, used))) => {
                    buf.drain(..used);
                    match on_frame(frame, &mut writer, &mut window).await? {
                        FrameAction::Continue => {}
                        FrameAction::Push => push(&mut writer, &state, window).await?,
                        FrameAction::Close => {
                            tracing::debug!("Live connection closed");
                            return Ok(());
                        }
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::debug!(error = %e, "Frame violation, closing");
                    let _ = send_close(&mut writer, CLOSE_PROTOCOL_ERROR).await;
                    return Ok(());
                }
            }
        }

        tokio::select! {
            _ = ticker.tick() => push(&mut writer, &state, window).await?,
            read = reader.read(&mut chunk) => {
                let n = read?;
                if n == 0 {
                    tracing::debug!("Live connection reached EOF");
                    return Ok(());
                }
                buf.extend_from_slice(&chunk[..n]);
            }
            _ = shutdown.changed() => {
                let _ = send_close(&mut writer, CLOSE_GOING_AWAY).await;
                return Ok(());
            }
        }
    }
}
