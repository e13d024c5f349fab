//! Cookie-backed session stores.
//!
//! Three logically distinct stores share one signing secret but derive an
//! independent key per cookie name, so a value sealed for one store never
//! verifies in another. Cookie names carry a version suffix: rotating the
//! secret bumps the version and old cookies die cleanly instead of failing
//! signature checks under the same name.

use axum::http::{
    HeaderMap, HeaderValue,
    header::{COOKIE, InvalidHeaderValue},
};
use base64ct::{Base64UrlUnpadded, Encoding};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use sha2::Sha256;
use tracing::debug;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

/// Fixed lifetime of the external-token cookie.
pub const EXTERNAL_TOKEN_MAX_AGE: i64 = 60 * 60 * 24 * 7;

const SESSION_MAX_AGE: i64 = 60 * 60 * 24 * 30;

/// Canonical session payload written on successful authentication.
///
/// Immutable once written; re-authentication replaces it wholesale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub user_id: Uuid,
    pub created_at: i64,
}

/// Bearer token obtained from the external commerce identity API, held in a
/// session independent of the primary one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalTokenRecord {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: Option<u64>,
    pub user_id: Uuid,
}

/// One signed cookie store.
#[derive(Clone)]
pub struct CookieStore {
    name: String,
    key: Vec<u8>,
    max_age: i64,
    secure: bool,
}

impl CookieStore {
    #[must_use]
    pub fn new(name: &str, version: &str, secret: &[u8], max_age: i64, secure: bool) -> Self {
        let name = format!("_{name}_{version}");
        // Per-store key: HMAC the cookie name with the shared secret.
        let mut mac =
            HmacSha256::new_from_slice(secret).expect("HMAC accepts any key length");
        mac.update(name.as_bytes());
        let key = mac.finalize().into_bytes().to_vec();
        Self {
            name,
            key,
            max_age,
            secure,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Serialize and sign a value into a `Set-Cookie` header value.
    ///
    /// # Errors
    ///
    /// Returns an error if the value cannot be serialized or the resulting
    /// cookie is not a valid header value.
    pub fn seal<T: Serialize>(&self, value: &T) -> Result<HeaderValue, SealError> {
        let json = serde_json::to_vec(value)?;
        let payload = Base64UrlUnpadded::encode_string(&json);
        let signature = Base64UrlUnpadded::encode_string(&self.mac(&payload));

        let mut cookie = format!(
            "{}={payload}.{signature}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
            self.name, self.max_age
        );
        if self.secure {
            cookie.push_str("; Secure");
        }
        Ok(HeaderValue::from_str(&cookie)?)
    }

    /// Read and verify this store's cookie from request headers.
    ///
    /// Missing, tampered, or undecodable cookies all read as absent.
    #[must_use]
    pub fn open<T: DeserializeOwned>(&self, headers: &HeaderMap) -> Option<T> {
        let raw = cookie_value(headers, &self.name)?;
        let (payload, signature) = raw.split_once('.')?;

        let signature = Base64UrlUnpadded::decode_vec(signature).ok()?;
        let mut mac = HmacSha256::new_from_slice(&self.key).ok()?;
        mac.update(payload.as_bytes());
        if mac.verify_slice(&signature).is_err() {
            debug!("Cookie {} failed signature verification", self.name);
            return None;
        }

        let json = Base64UrlUnpadded::decode_vec(payload).ok()?;
        serde_json::from_slice(&json).ok()
    }

    /// `Set-Cookie` value that expires this store's cookie.
    ///
    /// # Errors
    ///
    /// Returns an error if the cookie name is not a valid header value.
    pub fn clear(&self) -> Result<HeaderValue, InvalidHeaderValue> {
        let mut cookie = format!(
            "{}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0",
            self.name
        );
        if self.secure {
            cookie.push_str("; Secure");
        }
        HeaderValue::from_str(&cookie)
    }

    fn mac(&self, payload: &str) -> Vec<u8> {
        let mut mac = HmacSha256::new_from_slice(&self.key).expect("HMAC accepts any key length");
        mac.update(payload.as_bytes());
        mac.finalize().into_bytes().to_vec()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SealError {
    #[error("failed to serialize cookie payload: {0}")]
    Json(#[from] serde_json::Error),
    #[error("cookie is not a valid header value: {0}")]
    Header(#[from] InvalidHeaderValue),
}

/// The three independently keyed stores of the authentication core.
#[derive(Clone)]
pub struct SessionStores {
    pub primary: CookieStore,
    pub builder: CookieStore,
    pub external: CookieStore,
}

impl SessionStores {
    #[must_use]
    pub fn new(secret: &[u8], version: &str, secure: bool) -> Self {
        Self {
            primary: CookieStore::new("session", version, secret, SESSION_MAX_AGE, secure),
            builder: CookieStore::new("builder_session", version, secret, SESSION_MAX_AGE, secure),
            external: CookieStore::new(
                "external_token",
                version,
                secret,
                EXTERNAL_TOKEN_MAX_AGE,
                secure,
            ),
        }
    }

    /// Read the external token only when it belongs to the given user;
    /// any other record reads as absent.
    #[must_use]
    pub fn external_token_for_user(&self, headers: &HeaderMap, user_id: Uuid) -> Option<String> {
        let record: ExternalTokenRecord = self.external.open(headers)?;
        if record.user_id != user_id {
            return None;
        }
        Some(record.access_token)
    }
}

fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    let header = headers.get(COOKIE)?;
    let value = header.to_str().ok()?;
    for pair in value.split(';') {
        let trimmed = pair.trim();
        let mut parts = trimmed.splitn(2, '=');
        let key = parts.next()?.trim();
        let val = parts.next()?.trim();
        if key == name {
            return Some(val.to_string());
        }
    }
    None
}
