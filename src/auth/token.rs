use base64::Engine;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

use crate::auth::player::{sanitize_display_name, Player};
use crate::error::{KeyclashError, Result};

/// Reason string returned for every token failure. Deliberately generic
/// so callers cannot distinguish a bad signature from an expired token.
const GENERIC_REJECTION: &str = "invalid token";

/// Claims carried by a race token
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (player ID)
    pub sub: String,
    /// Preferred display name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Destination room hint issued alongside an invite
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room: Option<String>,
    /// Expiration time (as UTC timestamp)
    pub exp: usize,
    /// Issued at (as UTC timestamp)
    pub iat: usize,
}

impl Claims {
    /// Creates new claims for a player, valid for 24 hours
    pub fn new(player_id: String, name: Option<String>, room: Option<String>) -> Self {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("Time went backwards")
            .as_secs() as usize;

        Self {
            sub: player_id,
            name,
            room,
            exp: now + 86400,
            iat: now,
        }
    }

    /// Creates claims with custom expiration
    pub fn with_expiration(
        player_id: String,
        name: Option<String>,
        room: Option<String>,
        hours: usize,
    ) -> Self {
        let mut claims = Self::new(player_id, name, room);
        claims.exp = claims.iat + (hours * 3600);
        claims
    }
}

/// Outcome of connection authentication
#[derive(Debug, Clone)]
pub struct AuthGrant {
    pub player: Player,
    /// Room the token was issued for, if any
    pub room_hint: Option<String>,
    /// False when the identity was synthesized for a tokenless connection
    pub verified: bool,
}

impl AuthGrant {
    fn guest() -> Self {
        Self {
            player: Player::guest(),
            room_hint: None,
            verified: false,
        }
    }
}

/// Verifies pre-issued race tokens.
///
/// Verification is deterministic and touches no shared state: the same
/// token against the same key always yields the same outcome. Key
/// issuance and rotation happen elsewhere; this side only holds the
/// verification secret.
pub struct TokenVerifier {
    decoding_key: Option<DecodingKey>,
    validation: Validation,
}

impl TokenVerifier {
    /// Creates a verifier backed by a shared secret
    pub fn new(secret: &str) -> Self {
        Self {
            decoding_key: Some(DecodingKey::from_secret(secret.as_bytes())),
            validation: Validation::default(),
        }
    }

    /// Creates a verifier with no secret. Tokens are decoded without
    /// signature verification; config validation keeps this out of
    /// production deployments.
    pub fn without_secret() -> Self {
        Self {
            decoding_key: None,
            validation: Validation::default(),
        }
    }

    /// Authenticates a connection from its (optional) token.
    ///
    /// A missing token is not an error: the connection proceeds with a
    /// synthesized guest identity. A present-but-invalid token is
    /// rejected with a reason that never reveals which check failed.
    pub fn verify(&self, token: Option<&str>) -> Result<AuthGrant> {
        let token = match token {
            Some(t) if !t.is_empty() => t,
            _ => return Ok(AuthGrant::guest()),
        };

        match &self.decoding_key {
            Some(key) => self.verify_signed(token, key),
            None => Ok(Self::decode_unverified(token)),
        }
    }

    fn verify_signed(&self, token: &str, key: &DecodingKey) -> Result<AuthGrant> {
        let data = decode::<Claims>(token, key, &self.validation)
            .map_err(|_| KeyclashError::AuthRejected(GENERIC_REJECTION.to_string()))?;

        let claims = data.claims;
        if claims.sub.trim().is_empty() {
            return Err(KeyclashError::AuthRejected(GENERIC_REJECTION.to_string()));
        }

        let name = claims
            .name
            .as_deref()
            .map(sanitize_display_name)
            .unwrap_or_else(Player::guest_name);

        Ok(AuthGrant {
            player: Player {
                id: claims.sub,
                name,
            },
            room_hint: claims.room,
            verified: true,
        })
    }

    /// Development-mode decode: reads the payload segment without
    /// checking the signature. Malformed tokens degrade to a guest
    /// identity rather than failing the connection.
    fn decode_unverified(token: &str) -> AuthGrant {
        let mut parts = token.split('.');
        let payload = match (parts.next(), parts.next()) {
            (Some(_header), Some(payload)) => payload,
            _ => return AuthGrant::guest(),
        };

        let bytes = match base64::engine::general_purpose::URL_SAFE_NO_PAD.decode(payload) {
            Ok(b) => b,
            Err(_) => return AuthGrant::guest(),
        };

        let claims: Claims = match serde_json::from_slice(&bytes) {
            Ok(c) => c,
            Err(_) => return AuthGrant::guest(),
        };

        if claims.sub.trim().is_empty() {
            return AuthGrant::guest();
        }

        let name = claims
            .name
            .as_deref()
            .map(sanitize_display_name)
            .unwrap_or_else(Player::guest_name);

        AuthGrant {
            player: Player {
                id: claims.sub,
                name,
            },
            room_hint: claims.room,
            verified: false,
        }
    }
}

/// Signs race tokens. The production issuer lives in the account
/// service; this one backs tests and local development.
pub struct TokenIssuer {
    encoding_key: EncodingKey,
}

impl TokenIssuer {
    pub fn new(secret: &str) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
        }
    }

    pub fn issue(&self, claims: &Claims) -> Result<String> {
        encode(&Header::default(), claims, &self.encoding_key)
            .map_err(|e| KeyclashError::AuthRejected(format!("Failed to issue token: {}", e)))
    }
}

/// Synthesizes a fresh guest identity string
pub fn guest_id() -> String {
    Uuid::new_v4().to_string()
}

/// Strip the Bearer scheme from an Authorization header value
pub fn extract_bearer_token(auth_header: &str) -> Option<String> {
    auth_header
        .strip_prefix("Bearer ")
        .map(|token| token.trim().to_string())
        .filter(|token| !token.is_empty())
}
