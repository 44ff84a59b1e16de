//! Packet framing and request handlers.
//!
//! [`PacketDispatcher::drain`] pulls every complete packet out of a session's
//! receive buffer and routes it to a handler. Handlers answer with typed
//! result codes; only framing violations are fatal to the connection.

use crate::error::{FramingError, RegistryError};
use crate::registry::SessionRegistry;
use crate::session::Session;
use crate::store::{CredentialStore, generate_token, hash_password};
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use switchboard_proto::{
    BroadcastRequest, BroadcastResponse, DecodeError, HEADER_SIZE, LoginRequest, LoginResponse,
    MAX_PACKET_SIZE, MessageField, NameField, Packet, PacketHeader, ResultCode, UserJoinNotify,
    UserLeaveNotify, WhisperRequest, WhisperResponse,
};

/// Routes decoded packets to the login, broadcast and whisper handlers.
pub struct PacketDispatcher {
    registry: Arc<SessionRegistry>,
    store: Arc<dyn CredentialStore>,
    token_ttl: Duration,
}

impl PacketDispatcher {
    /// Create a dispatcher over `registry` and `store`.
    pub fn new(
        registry: Arc<SessionRegistry>,
        store: Arc<dyn CredentialStore>,
        token_ttl: Duration,
    ) -> Self {
        Self {
            registry,
            store,
            token_ttl,
        }
    }

    /// Dispatch every complete packet buffered for connection `session_id`.
    ///
    /// Stops when the buffer holds less than a header or less than the
    /// declared packet size, or once the connection no longer owns the
    /// slot. Returns the number of packets consumed.
    ///
    /// # Errors
    ///
    /// Returns `FramingError` when a header declares a size the stream can
    /// never satisfy; the connection must be torn down.
    pub fn drain(&self, session: &Arc<Session>, session_id: u32) -> Result<usize, FramingError> {
        let mut packet = [0u8; MAX_PACKET_SIZE];
        let mut consumed = 0;

        loop {
            let next = session.with_inbound_for(session_id, |ring| {
                let mut raw = [0u8; HEADER_SIZE];
                if !ring.peek(&mut raw) {
                    return Ok(None);
                }

                let size = PacketHeader::from_bytes(&raw).total_size();
                if size > MAX_PACKET_SIZE {
                    return Err(FramingError::Oversized {
                        size,
                        limit: MAX_PACKET_SIZE,
                    });
                }
                if size < HEADER_SIZE {
                    return Err(FramingError::Undersized { size });
                }

                if !ring.peek(&mut packet[..size]) {
                    return Ok(None);
                }
                ring.consume(size);
                Ok(Some(size))
            });

            // An error here means the slot was closed or recycled under us
            let Ok(next) = next else {
                break;
            };
            let Some(size) = next? else {
                break;
            };

            self.dispatch(session, session_id, &packet[..size]);
            consumed += 1;
        }

        Ok(consumed)
    }

    /// Decode one complete packet from connection `session_id` and run its
    /// handler.
    pub fn dispatch(&self, session: &Arc<Session>, session_id: u32, bytes: &[u8]) {
        match Packet::decode(bytes) {
            Ok(Packet::LoginRequest(request)) => self.handle_login(session, session_id, &request),
            Ok(Packet::BroadcastRequest(request)) => {
                self.handle_broadcast(session, session_id, request);
            }
            Ok(Packet::WhisperRequest(request)) => {
                self.handle_whisper(session, session_id, &request);
            }
            Ok(other) => {
                tracing::warn!(
                    session_id,
                    packet_type = %other.packet_type(),
                    "Ignoring server-to-client packet sent by client"
                );
            }
            Err(DecodeError::UnknownType { code }) => {
                tracing::warn!(
                    session_id,
                    code,
                    size = bytes.len(),
                    "Skipping unknown packet type"
                );
            }
            Err(err) => {
                tracing::warn!(session_id, error = %err, "Dropping malformed packet");
            }
        }
    }

    /// Tell every remaining authenticated session that `username` left.
    pub fn announce_departure(&self, username: &str) -> usize {
        let notify = Packet::UserLeaveNotify(UserLeaveNotify {
            user: NameField::truncated(username),
        });
        encode(&notify).map_or(0, |bytes| self.registry.broadcast(None, &bytes))
    }

    fn handle_login(&self, session: &Arc<Session>, session_id: u32, request: &LoginRequest) {
        let result = self.login(session, session_id, request);
        send_packet(
            session,
            session_id,
            &Packet::LoginResponse(LoginResponse { result }),
        );

        if result.is_success() {
            let username = request.username.to_string_lossy();
            tracing::info!(session_id, %username, "User logged in");

            let notify = Packet::UserJoinNotify(UserJoinNotify {
                user: request.username.clone(),
            });
            if let Some(bytes) = encode(&notify) {
                self.registry.broadcast(Some(session.as_ref()), &bytes);
            }
        } else {
            tracing::info!(
                session_id,
                user_id = %request.user_id,
                %result,
                "Login rejected"
            );
        }
    }

    fn login(&self, session: &Arc<Session>, session_id: u32, request: &LoginRequest) -> ResultCode {
        if session.username_for(session_id).is_some() {
            return ResultCode::AlreadyLoggedIn;
        }

        let user_id = request.user_id.to_string_lossy();
        let username = request.username.to_string_lossy();
        if username.is_empty() {
            return ResultCode::InvalidPacket;
        }

        let stored = match self.store.password_hash(&user_id) {
            Ok(Some(hash)) => hash,
            Ok(None) => return ResultCode::UserNotFound,
            Err(err) => {
                tracing::error!(%user_id, error = %err, "Password lookup failed");
                return ResultCode::ServerError;
            }
        };
        if hash_password(&request.password.to_string_lossy()) != stored {
            return ResultCode::AuthFailed;
        }

        if self.registry.find_by_name(&username).is_some() {
            return ResultCode::AlreadyLoggedIn;
        }

        let token = generate_token();
        if let Err(err) = self
            .store
            .create_session_token(&token, &user_id, self.token_ttl)
        {
            tracing::error!(%user_id, error = %err, "Failed to create session token");
            return ResultCode::ServerError;
        }
        if let Err(err) = self.store.set_online_presence(&username, session_id) {
            tracing::error!(%username, error = %err, "Failed to set online presence");
            self.discard_token(&token);
            return ResultCode::ServerError;
        }

        match self
            .registry
            .register_authenticated(session, session_id, &username, token.clone())
        {
            Ok(()) => ResultCode::Success,
            Err(RegistryError::NameTaken(_)) => {
                // Lost a race with a concurrent login of the same name
                self.discard_token(&token);
                if let Some(winner) = self.registry.find_by_name(&username)
                    && let Err(err) = self.store.set_online_presence(&username, winner.id())
                {
                    tracing::warn!(%username, error = %err, "Failed to restore online presence");
                }
                ResultCode::AlreadyLoggedIn
            }
            Err(RegistryError::InvalidSession(_)) => {
                self.discard_token(&token);
                if let Err(err) = self.store.clear_online_presence(&username) {
                    tracing::warn!(%username, error = %err, "Failed to clear online presence");
                }
                ResultCode::ServerError
            }
        }
    }

    fn handle_broadcast(&self, session: &Arc<Session>, session_id: u32, request: BroadcastRequest) {
        let Some(username) = session.username_for(session_id) else {
            tracing::debug!(session_id, "Ignoring broadcast before login");
            return;
        };

        let response = Packet::BroadcastResponse(BroadcastResponse {
            user: NameField::truncated(&username),
            message: request.message,
        });
        if let Some(bytes) = encode(&response) {
            let delivered = self.registry.broadcast(Some(session.as_ref()), &bytes);
            tracing::debug!(session_id, delivered, "Broadcast relayed");
        }
    }

    fn handle_whisper(&self, session: &Arc<Session>, session_id: u32, request: &WhisperRequest) {
        let Some(username) = session.username_for(session_id) else {
            tracing::debug!(session_id, "Ignoring whisper before login");
            return;
        };

        let receiver = request.receiver.to_string_lossy();
        let whisper = Packet::WhisperResponse(WhisperResponse {
            result: ResultCode::Success,
            sender: NameField::truncated(&username),
            message: request.message.clone(),
        });
        let Some(bytes) = encode(&whisper) else {
            return;
        };
        if let Some(delivered) = self.registry.send_to(&receiver, bytes) {
            tracing::debug!(session_id, %receiver, delivered, "Whisper relayed");
            return;
        }

        tracing::debug!(session_id, %receiver, "Whisper target not found");
        send_packet(
            session,
            session_id,
            &Packet::WhisperResponse(WhisperResponse {
                result: ResultCode::UserNotFound,
                sender: NameField::default(),
                message: MessageField::truncated(&format!("User '{receiver}' not found")),
            }),
        );
    }

    fn discard_token(&self, token: &str) {
        if let Err(err) = self.store.delete_session_token(token) {
            tracing::warn!(error = %err, "Failed to delete session token");
        }
    }
}

fn encode(packet: &Packet) -> Option<Bytes> {
    match packet.encode() {
        Ok(bytes) => Some(Bytes::from(bytes)),
        Err(err) => {
            tracing::error!(packet_type = %packet.packet_type(), error = %err, "Failed to encode packet");
            None
        }
    }
}

fn send_packet(session: &Session, session_id: u32, packet: &Packet) -> bool {
    encode(packet).is_some_and(|bytes| session.send_for(session_id, bytes))
}
