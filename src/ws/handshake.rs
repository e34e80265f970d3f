//! Opening handshake, [RFC6455 section 4](https://www.rfc-editor.org/rfc/rfc6455#section-4).
use base64ct::{Base64, Encoding};
use sha1::{Digest, Sha1};

use super::WsError;
use crate::{
    crypto,
    http::{
        Headers, MessageHead,
        headers::standard::{CONNECTION, SEC_WEBSOCKET_ACCEPT, SEC_WEBSOCKET_KEY, SEC_WEBSOCKET_VERSION, UPGRADE},
    },
};

const WS_GUID: &[u8] = b"258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Derive `Sec-WebSocket-Accept` from `Sec-WebSocket-Key`.
pub fn derive_accept(key: &[u8]) -> String {
    let mut sha1 = Sha1::default();
    sha1.update(key);
    sha1.update(WS_GUID);
    Base64::encode_string(&sha1.finalize())
}

/// Random `Sec-WebSocket-Key` nonce.
pub fn generate_key() -> String {
    let mut nonce = [0u8; 16];
    crypto::fill_random(&mut nonce);
    Base64::encode_string(&nonce)
}

/// Add upgrade request headers, returns the accept token the server has to answer with.
pub fn write_request_headers(headers: &mut Headers) -> String {
    let key = generate_key();
    let accept = derive_accept(key.as_bytes());
    headers.insert("Upgrade", "websocket");
    headers.insert("Connection", "Upgrade");
    headers.insert("Sec-WebSocket-Version", "13");
    headers.insert("Sec-WebSocket-Key", key);
    accept
}

/// Returns `true` if the request asks for a websocket upgrade.
pub fn is_upgrade_request(head: &MessageHead) -> bool {
    head.headers.contains_token(UPGRADE, "websocket")
        && head.headers.contains_token(CONNECTION, "upgrade")
}

/// Validate an upgrade request, returns the accept token for the response.
pub fn accept_request(head: &MessageHead) -> Result<String, WsError> {
    if !is_upgrade_request(head) {
        return Err(WsError::Handshake);
    }
    if head.headers.get(SEC_WEBSOCKET_VERSION).map(<[u8]>::trim_ascii) != Some(b"13") {
        return Err(WsError::Handshake);
    }
    match head.headers.get(SEC_WEBSOCKET_KEY).map(<[u8]>::trim_ascii) {
        Some(key) if !key.is_empty() => Ok(derive_accept(key)),
        _ => Err(WsError::Handshake),
    }
}

/// Check a `101` response against the accept token computed for the request.
pub fn verify_response(head: &MessageHead, expected: &str) -> Result<(), WsError> {
    let accept = head.headers.get(SEC_WEBSOCKET_ACCEPT).map(<[u8]>::trim_ascii);
    if accept != Some(expected.as_bytes()) || !head.headers.contains_token(UPGRADE, "websocket") {
        return Err(WsError::Handshake);
    }
    Ok(())
}
