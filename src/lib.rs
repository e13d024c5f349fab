//! # Pordego
//!
//! `pordego` is the authentication gateway for the builder platform. One
//! deployment serves two audiences: people signing into the platform (OAuth
//! providers, the commerce password grant, an opt-in dev bypass) and
//! workstations signing into a single project addressed by its builder URL
//! (Authorization Code + PKCE against a per-request authorization server).
//!
//! Sessions are signed cookies, never server-side state; a cross-origin
//! guard keeps them invisible to requests no CORS policy could stop.

pub mod api;
pub mod auth;
pub mod cli;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub static APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);
