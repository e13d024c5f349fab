//! Project-scoped access tokens.
//!
//! Compact `header.claims.signature` tokens signed with HMAC-SHA256 over a
//! shared secret. A token binds a user to exactly one project; it is never
//! valid against a request addressed to a different project, even for the
//! same user.

use base64ct::{Base64UrlUnpadded, Encoding};
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use sha2::Sha256;
use thiserror::Error;
use tracing::debug;
use url::Url;
use uuid::Uuid;

use crate::auth::error::Error as AuthError;
use crate::auth::origins::parse_builder_url;
use crate::auth::session::SessionRecord;
use crate::auth::users::UserDirectory;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenHeader {
    pub alg: String,
    pub typ: String,
}

impl TokenHeader {
    fn hs256() -> Self {
        Self {
            alg: "HS256".to_string(),
            typ: "JWT".to_string(),
        }
    }
}

/// Claims of a project-scoped access token.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AccessTokenClaims {
    /// User the token was issued to.
    pub sub: Uuid,
    /// Project the token is scoped to.
    pub project_id: Uuid,
    pub iat: i64,
    pub exp: i64,
}

/// Claim types carrying their own expiry, checked during verification.
pub trait Expires {
    fn expires_at(&self) -> i64;
}

impl Expires for AccessTokenClaims {
    fn expires_at(&self) -> i64 {
        self.exp
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid token format")]
    TokenFormat,
    #[error("invalid base64url encoding")]
    Base64,
    #[error("invalid json")]
    Json(#[from] serde_json::Error),
    #[error("unsupported algorithm: {0}")]
    UnsupportedAlg(String),
    #[error("invalid key length")]
    Key,
    #[error("invalid signature")]
    InvalidSignature,
    #[error("token expired")]
    Expired,
}

fn b64e_json<T: Serialize>(value: &T) -> Result<String, Error> {
    let json = serde_json::to_vec(value)?;
    Ok(Base64UrlUnpadded::encode_string(&json))
}

fn b64d_json<T: DeserializeOwned>(s: &str) -> Result<T, Error> {
    let bytes = Base64UrlUnpadded::decode_vec(s).map_err(|_| Error::Base64)?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Create an HS256 signed compact token.
///
/// # Errors
///
/// Returns an error if the claims cannot be encoded or the key is rejected.
pub fn sign_hs256<T: Serialize>(secret: &[u8], claims: &T) -> Result<String, Error> {
    let header_b64 = b64e_json(&TokenHeader::hs256())?;
    let claims_b64 = b64e_json(claims)?;
    let signing_input = format!("{header_b64}.{claims_b64}");

    let mut mac = HmacSha256::new_from_slice(secret).map_err(|_| Error::Key)?;
    mac.update(signing_input.as_bytes());
    let signature = Base64UrlUnpadded::encode_string(&mac.finalize().into_bytes());

    Ok(format!("{signing_input}.{signature}"))
}

/// Verify an HS256 compact token: signature first, then expiry.
///
/// # Errors
///
/// Returns an error on malformed tokens, a wrong or missing signature, an
/// unexpected algorithm, or an expired `exp` claim.
pub fn verify_hs256<T: DeserializeOwned + Expires>(
    token: &str,
    secret: &[u8],
    now: i64,
) -> Result<T, Error> {
    let mut parts = token.split('.');
    let (Some(header_b64), Some(claims_b64), Some(signature_b64), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(Error::TokenFormat);
    };

    let header: TokenHeader = b64d_json(header_b64)?;
    if header.alg != "HS256" {
        return Err(Error::UnsupportedAlg(header.alg));
    }

    let signature = Base64UrlUnpadded::decode_vec(signature_b64).map_err(|_| Error::Base64)?;
    let mut mac = HmacSha256::new_from_slice(secret).map_err(|_| Error::Key)?;
    mac.update(format!("{header_b64}.{claims_b64}").as_bytes());
    mac.verify_slice(&signature)
        .map_err(|_| Error::InvalidSignature)?;

    // Claims are only trusted once the signature holds.
    let claims: T = b64d_json(claims_b64)?;
    if claims.expires_at() <= now {
        return Err(Error::Expired);
    }

    Ok(claims)
}

/// Validate a project-scoped access token against the current request.
///
/// The check order is load-bearing: signature/expiry before any embedded
/// claim is trusted, project match before the authorization lookup.
///
/// # Errors
///
/// Returns [`AuthError::Authorization`] with a stable reason for each failing
/// check, or a directory error from the authorization lookup.
pub fn validate_for_request(
    token: &str,
    secret: &[u8],
    request_url: &Url,
    users: &dyn UserDirectory,
) -> Result<SessionRecord, AuthError> {
    let now = Utc::now().timestamp();
    let claims: AccessTokenClaims = verify_hs256(token, secret, now).map_err(|err| {
        debug!("Access token rejected: {err}");
        AuthError::authorization("invalid or expired access token")
    })?;

    let request_project = parse_builder_url(request_url).project_id;
    if request_project != Some(claims.project_id) {
        return Err(AuthError::authorization(
            "token projectId and request projectId do not match",
        ));
    }

    // The authorization lookup stays enforced even though the token already
    // encodes the project: membership can be revoked after issuance.
    let authorized = users.is_user_authorized_for_project(claims.sub, claims.project_id)?;
    if !authorized {
        return Err(AuthError::authorization(
            "user does not have access to this project",
        ));
    }

    Ok(SessionRecord {
        user_id: claims.sub,
        created_at: now,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::users::MemoryDirectory;

    const SECRET: &[u8] = b"test-shared-secret";

    fn claims(project_id: Uuid, user_id: Uuid, ttl: i64) -> AccessTokenClaims {
        let now = Utc::now().timestamp();
        AccessTokenClaims {
            sub: user_id,
            project_id,
            iat: now,
            exp: now + ttl,
        }
    }

    fn project_request_url(project_id: Uuid) -> Url {
        format!("https://p-{project_id}.apps.pordego.dev/auth/ws/callback")
            .parse()
            .expect("valid URL")
    }

    #[test]
    fn sign_verify_round_trip() {
        let project = Uuid::new_v4();
        let user = Uuid::new_v4();
        let claims = claims(project, user, 3600);

        let token = sign_hs256(SECRET, &claims).expect("sign");
        let decoded: AccessTokenClaims =
            verify_hs256(&token, SECRET, Utc::now().timestamp()).expect("verify");
        assert_eq!(decoded, claims);
    }

    #[test]
    fn tampered_payload_is_rejected() {
        let claims = claims(Uuid::new_v4(), Uuid::new_v4(), 3600);
        let token = sign_hs256(SECRET, &claims).expect("sign");

        let mut parts: Vec<&str> = token.split('.').collect();
        let other = claims.clone();
        let forged_claims = b64e_json(&AccessTokenClaims {
            project_id: Uuid::new_v4(),
            ..other
        })
        .expect("encode");
        parts[1] = &forged_claims;
        let forged = parts.join(".");

        assert!(matches!(
            verify_hs256::<AccessTokenClaims>(&forged, SECRET, Utc::now().timestamp()),
            Err(Error::InvalidSignature)
        ));
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let claims = claims(Uuid::new_v4(), Uuid::new_v4(), 3600);
        let token = sign_hs256(SECRET, &claims).expect("sign");
        assert!(matches!(
            verify_hs256::<AccessTokenClaims>(&token, b"other-secret", Utc::now().timestamp()),
            Err(Error::InvalidSignature)
        ));
    }

    #[test]
    fn expired_token_is_rejected() {
        let claims = claims(Uuid::new_v4(), Uuid::new_v4(), -10);
        let token = sign_hs256(SECRET, &claims).expect("sign");
        assert!(matches!(
            verify_hs256::<AccessTokenClaims>(&token, SECRET, Utc::now().timestamp()),
            Err(Error::Expired)
        ));
    }

    #[test]
    fn garbage_token_is_a_format_error() {
        assert!(matches!(
            verify_hs256::<AccessTokenClaims>("nope", SECRET, 0),
            Err(Error::TokenFormat)
        ));
        assert!(matches!(
            verify_hs256::<AccessTokenClaims>("a.b.c.d", SECRET, 0),
            Err(Error::TokenFormat)
        ));
    }

    #[test]
    fn validate_accepts_matching_project_and_membership() {
        let directory = MemoryDirectory::new();
        let user = directory
            .create_or_login_with_dev_secret("u@pordego.dev")
            .expect("user");
        let project = Uuid::new_v4();
        directory.authorize(user.id, project);

        let token = sign_hs256(SECRET, &claims(project, user.id, 3600)).expect("sign");
        let session = validate_for_request(&token, SECRET, &project_request_url(project), &directory)
            .expect("session");
        assert_eq!(session.user_id, user.id);
    }

    #[test]
    fn validate_rejects_project_mismatch() {
        let directory = MemoryDirectory::new();
        let user = directory
            .create_or_login_with_dev_secret("u@pordego.dev")
            .expect("user");
        let token_project = Uuid::new_v4();
        let request_project = Uuid::new_v4();
        directory.authorize(user.id, token_project);

        let token = sign_hs256(SECRET, &claims(token_project, user.id, 3600)).expect("sign");
        let err = validate_for_request(
            &token,
            SECRET,
            &project_request_url(request_project),
            &directory,
        )
        .expect_err("mismatch");
        assert_eq!(
            err.to_string(),
            "token projectId and request projectId do not match"
        );
    }

    #[test]
    fn validate_rejects_unauthorized_user() {
        let directory = MemoryDirectory::new();
        let user = directory
            .create_or_login_with_dev_secret("u@pordego.dev")
            .expect("user");
        let project = Uuid::new_v4();
        // No membership granted.

        let token = sign_hs256(SECRET, &claims(project, user.id, 3600)).expect("sign");
        let err = validate_for_request(&token, SECRET, &project_request_url(project), &directory)
            .expect_err("unauthorized");
        assert_eq!(err.to_string(), "user does not have access to this project");
    }

    #[test]
    fn validate_rejects_bad_signature_before_claims() {
        let directory = MemoryDirectory::new();
        let project = Uuid::new_v4();
        let token = sign_hs256(b"not-the-secret", &claims(project, Uuid::new_v4(), 3600))
            .expect("sign");
        let err = validate_for_request(&token, SECRET, &project_request_url(project), &directory)
            .expect_err("invalid");
        assert_eq!(err.to_string(), "invalid or expired access token");
    }
}
