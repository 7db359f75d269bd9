//! Per-connection state machine: Greeting -> Registering -> Serving ->
//! Terminating (SPEC_FULL.md §4.7).
//!
//! Reading and writing run as two independent halves of the same
//! connection: this task owns the read half and drives the state machine;
//! a sibling task owns the write half and drains the connection's outbound
//! channel, so a slow reader on the other end never blocks this task (or
//! anyone broadcasting to it) from making progress.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chat_core::{
    AppConfig, Command, ConnectionHandle, ConnectionId, ProtocolError, RateLimitConfig, Registry,
    ServerError,
};
use futures_util::{SinkExt, StreamExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;

use crate::codec::{CodecError, LineCodec};
use crate::shutdown::ShutdownController;

fn client_id(addr: SocketAddr) -> String {
    format!("{}:{}", addr.ip(), addr.port())
}

fn now_iso() -> String {
    chrono::Local::now().to_rfc3339()
}

/// Drives one accepted TCP connection end to end. Returns once the
/// connection is fully torn down (both halves closed, registry entry
/// removed).
pub async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    registry: Arc<Registry>,
    config: Arc<AppConfig>,
    shutdown: Arc<ShutdownController>,
) {
    let _in_flight = shutdown.in_flight_guard();
    let max_frame_size = config.limits.max_message_size;
    let read_timeout = Duration::from_secs_f64(config.limits.read_timeout);
    let rate_limit_config = RateLimitConfig {
        limit: config.limits.rate_limit_messages_per_second,
        window: Duration::from_secs_f64(config.limits.rate_limit_window_seconds),
    };

    let Ok(()) = stream.set_nodelay(true) else {
        tracing::warn!(client_id = %client_id(addr), "failed to set TCP_NODELAY");
        return;
    };
    let (read_half, write_half) = stream.into_split();
    let mut reader = tokio_util::codec::FramedRead::new(read_half, LineCodec::new(max_frame_size));

    let (handle, rx) = registry.connect(addr);
    let id = handle.id;
    let writer_task = spawn_writer(rx, write_half, max_frame_size);

    tracing::info!(client_id = %client_id(addr), "client connected");

    let _ = handle.try_send_line("welcome\nPlease send your name:");

    let name = match tokio::time::timeout(read_timeout, reader.next()).await {
        Ok(Some(Ok(line))) => line.trim().to_string(),
        Ok(Some(Err(err))) => {
            tracing::warn!(client_id = %client_id(addr), error = %err, "error reading name");
            finish(&registry, id, handle, writer_task).await;
            return;
        }
        Ok(None) => {
            finish(&registry, id, handle, writer_task).await;
            return;
        }
        Err(_elapsed) => {
            tracing::warn!(client_id = %client_id(addr), "timed out waiting for name");
            finish(&registry, id, handle, writer_task).await;
            return;
        }
    };

    match registry.register_name(id, &name, config.limits.max_name_length) {
        Ok(()) => {
            tracing::info!(client_id = %client_id(addr), name = %name, "client registered");
            let _ = handle.try_send_line(format!(
                "Name registered: {name}\nCommands: CONNECT:name, DISCONNECT_CHAT, CREATE_GROUP:name, JOIN_GROUP:name, LEAVE_GROUP:name, LIST_GROUPS, LIST_USERS, GROUP:group_name:message"
            ));
        }
        Err(err) => {
            tracing::warn!(client_id = %client_id(addr), error = %err, "name registration rejected");
            let _ = handle.try_send_line(ServerError::from(err).as_wire_message());
            finish(&registry, id, handle, writer_task).await;
            return;
        }
    }

    serve(&mut reader, &handle, &registry, &rate_limit_config).await;

    tracing::info!(client_id = %client_id(addr), name = %name, "client disconnected");
    finish(&registry, id, handle, writer_task).await;
}

async fn finish(registry: &Registry, id: ConnectionId, handle: Arc<ConnectionHandle>, writer_task: JoinHandle<()>) {
    registry.remove(id);
    drop(handle);
    let _ = writer_task.await;
}

fn spawn_writer(mut rx: tokio::sync::mpsc::Receiver<chat_core::OutboundMessage>, write_half: OwnedWriteHalf, max_frame_size: usize) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut writer = tokio_util::codec::FramedWrite::new(write_half, LineCodec::new(max_frame_size));
        while let Some(message) = rx.recv().await {
            match message {
                chat_core::OutboundMessage::Line(line) => {
                    if writer.send(line).await.is_err() {
                        break;
                    }
                }
                chat_core::OutboundMessage::Close => break,
            }
        }
    })
}

async fn serve(
    reader: &mut tokio_util::codec::FramedRead<OwnedReadHalf, LineCodec>,
    handle: &Arc<ConnectionHandle>,
    registry: &Arc<Registry>,
    rate_limit_config: &RateLimitConfig,
) {
    let id = handle.id;

    loop {
        let frame = match reader.next().await {
            Some(Ok(line)) => line.trim().to_string(),
            Some(Err(CodecError::Protocol(err))) => {
                let _ = handle.try_send_line(ServerError::from(err).as_wire_message());
                continue;
            }
            Some(Err(CodecError::Io(_))) | None => break,
        };

        if let Err(err) = handle.rate_limiter.lock().check_and_record(Instant::now(), rate_limit_config) {
            let _ = handle.try_send_line(ServerError::from(err).as_wire_message());
            continue;
        }
        handle.info.lock().messages_received += 1;

        if frame != "LIST_USERS" && frame != "LIST_GROUPS" {
            registry.received_audit_entry(id, &frame, now_iso());
        }

        dispatch(id, &frame, handle, registry);
    }
}

/// Translates one already rate-limited frame into a registry mutation (or a
/// direct reply for the two read-only queries), writing the appropriate
/// `ERROR: ...` line back to the sender on failure.
fn dispatch(id: ConnectionId, frame: &str, handle: &ConnectionHandle, registry: &Registry) {
    match chat_core::parse(frame) {
        Command::ListUsers => {
            let _ = handle.try_send_line(registry.list_users_reply());
        }
        Command::ListGroups => {
            let _ = handle.try_send_line(registry.list_groups_reply());
        }
        Command::CreateGroup(name) => reply_on_err(handle, registry.create_group(id, &name)),
        Command::JoinGroup(name) => reply_on_err(handle, registry.join_group(id, &name)),
        Command::InviteToGroup(Some((group, invitee))) => reply_on_err(handle, registry.invite_to_group(id, &group, &invitee)),
        Command::InviteToGroup(None) => {
            let _ = handle.try_send_line(ServerError::from(ProtocolError::BadInviteShape).as_wire_message());
        }
        Command::LeaveGroup(name) => reply_on_err(handle, registry.leave_group(id, &name)),
        Command::GroupMessage(Some((group, message))) => match registry.group_message(id, &group, &message) {
            Ok(_) => registry.sent_audit_entry(id, &format!("Group message to {group}: {message}"), now_iso()),
            Err(err) => {
                let _ = handle.try_send_line(ServerError::from(err).as_wire_message());
            }
        },
        Command::GroupMessage(None) => {
            let _ = handle.try_send_line(ServerError::from(ProtocolError::BadGroupMessageShape).as_wire_message());
        }
        Command::Connect(target) => reply_on_err(handle, registry.open_chat(id, &target)),
        Command::DisconnectChat => reply_on_err(handle, registry.close_chat(id)),
        Command::Freeform(text) => {
            if registry.partner_of(id).is_some() {
                reply_on_err(handle, registry.forward_chat(id, &text));
            } else {
                let response = format!("server received {}", text.to_uppercase());
                let _ = handle.try_send_line(response.clone());
                handle.info.lock().messages_sent += 1;
                registry.sent_audit_entry(id, &response, now_iso());
            }
        }
    }
}

fn reply_on_err<E: Into<ServerError>>(handle: &ConnectionHandle, result: Result<(), E>) {
    if let Err(err) = result {
        let _ = handle.try_send_line(err.into().as_wire_message());
    }
}
