//! Match ticket verification (HS256 JWT presented at the socket handshake)

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::ids::{MatchId, PlayerId};
use crate::util::time::unix_millis;
use crate::ws::protocol::Role;

type HmacSha256 = Hmac<Sha256>;

/// Claims issued by the lobby for one player in one match
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TicketClaims {
    /// Player id
    pub sub: PlayerId,
    pub role: Role,
    pub display_name: String,
    pub match_id: MatchId,
    pub game_id: String,
    /// Expiration time (Unix seconds)
    pub exp: u64,
}

/// Verify a ticket's signature, expiry, and game id, and extract its claims
pub fn verify_ticket(
    token: &str,
    secret: &str,
    expected_game_id: &str,
) -> Result<TicketClaims, AdmissionError> {
    let mut parts = token.split('.');
    let (Some(header_b64), Some(payload_b64), Some(signature_b64), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(AdmissionError::Malformed);
    };

    let provided_signature = URL_SAFE_NO_PAD
        .decode(signature_b64)
        .map_err(|_| AdmissionError::Malformed)?;
    let mut mac = mac_for(secret)?;
    mac.update(header_b64.as_bytes());
    mac.update(b".");
    mac.update(payload_b64.as_bytes());
    mac.verify_slice(&provided_signature)
        .map_err(|_| AdmissionError::BadSignature)?;

    let payload_json = URL_SAFE_NO_PAD
        .decode(payload_b64)
        .map_err(|_| AdmissionError::Malformed)?;
    let claims: TicketClaims =
        serde_json::from_slice(&payload_json).map_err(|_| AdmissionError::Malformed)?;

    if claims.exp < unix_millis() / 1000 {
        return Err(AdmissionError::Expired);
    }

    if claims.game_id != expected_game_id {
        return Err(AdmissionError::WrongGame {
            expected: expected_game_id.to_string(),
            actual: claims.game_id,
        });
    }

    Ok(claims)
}

/// Issue a ticket. Tickets normally come from the lobby service; this exists
/// for tests and local tooling.
pub fn sign_ticket(claims: &TicketClaims, secret: &str) -> Result<String, AdmissionError> {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let payload_json = serde_json::to_vec(claims).map_err(|_| AdmissionError::Malformed)?;
    let payload = URL_SAFE_NO_PAD.encode(payload_json);

    let mut mac = mac_for(secret)?;
    mac.update(header.as_bytes());
    mac.update(b".");
    mac.update(payload.as_bytes());
    let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());

    Ok(format!("{header}.{payload}.{signature}"))
}

fn mac_for(secret: &str) -> Result<HmacSha256, AdmissionError> {
    HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| AdmissionError::BadSignature)
}

/// Why a socket was refused before upgrade
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AdmissionError {
    #[error("Missing ticket")]
    MissingTicket,

    #[error("Malformed ticket")]
    Malformed,

    #[error("Invalid ticket signature")]
    BadSignature,

    #[error("Ticket expired")]
    Expired,

    #[error("Ticket is for game {actual}, expected {expected}")]
    WrongGame { expected: String, actual: String },
}

impl IntoResponse for AdmissionError {
    fn into_response(self) -> Response {
        (StatusCode::UNAUTHORIZED, self.to_string()).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test-secret";

    fn claims() -> TicketClaims {
        TicketClaims {
            sub: "player-1".into(),
            role: Role::Creator,
            display_name: "Ada".to_string(),
            match_id: "room-7".into(),
            game_id: "ballgame".to_string(),
            exp: unix_millis() / 1000 + 3600,
        }
    }

    #[test]
    fn signed_ticket_verifies() {
        let token = sign_ticket(&claims(), SECRET).unwrap();
        let verified = verify_ticket(&token, SECRET, "ballgame").unwrap();
        assert_eq!(verified, claims());
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let token = sign_ticket(&claims(), SECRET).unwrap();
        assert_eq!(
            verify_ticket(&token, "other-secret", "ballgame"),
            Err(AdmissionError::BadSignature)
        );
    }

    #[test]
    fn tampered_payload_is_rejected() {
        let token = sign_ticket(&claims(), SECRET).unwrap();
        let mut forged = claims();
        forged.role = Role::Player;
        let forged_payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&forged).unwrap());

        let parts: Vec<&str> = token.split('.').collect();
        let tampered = format!("{}.{}.{}", parts[0], forged_payload, parts[2]);
        assert_eq!(
            verify_ticket(&tampered, SECRET, "ballgame"),
            Err(AdmissionError::BadSignature)
        );
    }

    #[test]
    fn expired_ticket_is_rejected() {
        let mut expired = claims();
        expired.exp = 1;
        let token = sign_ticket(&expired, SECRET).unwrap();
        assert_eq!(
            verify_ticket(&token, SECRET, "ballgame"),
            Err(AdmissionError::Expired)
        );
    }

    #[test]
    fn ticket_for_another_game_is_rejected() {
        let token = sign_ticket(&claims(), SECRET).unwrap();
        assert!(matches!(
            verify_ticket(&token, SECRET, "othergame"),
            Err(AdmissionError::WrongGame { .. })
        ));
    }

    #[test]
    fn garbage_is_malformed() {
        assert_eq!(
            verify_ticket("not-a-token", SECRET, "ballgame"),
            Err(AdmissionError::Malformed)
        );
        assert_eq!(
            verify_ticket("a.b.c.d", SECRET, "ballgame"),
            Err(AdmissionError::Malformed)
        );
    }
}
