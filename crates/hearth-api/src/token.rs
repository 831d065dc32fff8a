// Bearer token construction.
//
// The hub expects a JWT-shaped token on every request:
// `base64url(header).base64url(payload).base64url(hmac-sha256 signature)`,
// signed with the SHA-256 hash of the account password. The raw password
// never leaves the client; the hub stores the same hash.
//
// Tokens are built fresh per call -- the payload carries `iat`, so a token
// is only ever valid around the moment it was minted.

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use sha2::{Digest, Sha256};

const TOKEN_ISSUER: &str = "hearth-client";

#[derive(Serialize)]
struct Header {
    alg: &'static str,
    typ: &'static str,
}

/// Token claims: user, issued-at, origin host, issuer.
#[derive(Serialize)]
struct Claims<'a> {
    usr: &'a str,
    iat: i64,
    ori: &'a str,
    iss: &'static str,
}

/// Derive the signing key from the account password.
///
/// Computed once at client construction so the password itself can be
/// dropped immediately.
pub fn signing_key(password: &SecretString) -> [u8; 32] {
    Sha256::digest(password.expose_secret().as_bytes()).into()
}

/// Mint a bearer token for `username`, signed with `key`.
pub fn bearer_token(username: &str, origin: &str, key: &[u8; 32]) -> String {
    bearer_token_at(username, origin, key, chrono::Utc::now().timestamp())
}

fn bearer_token_at(username: &str, origin: &str, key: &[u8; 32], iat: i64) -> String {
    let header = Header {
        alg: "HS256",
        typ: "JWT",
    };
    let claims = Claims {
        usr: username,
        iat,
        ori: origin,
        iss: TOKEN_ISSUER,
    };

    // Serialization of these two structs cannot fail.
    let header_json = serde_json::to_vec(&header).expect("header serializes");
    let claims_json = serde_json::to_vec(&claims).expect("claims serialize");

    let signing_input = format!(
        "{}.{}",
        URL_SAFE_NO_PAD.encode(header_json),
        URL_SAFE_NO_PAD.encode(claims_json)
    );

    let mut mac =
        Hmac::<Sha256>::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(signing_input.as_bytes());
    let signature = mac.finalize().into_bytes();

    format!("{signing_input}.{}", URL_SAFE_NO_PAD.encode(signature))
}
