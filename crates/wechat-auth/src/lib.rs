//! Client side of the WeChat-style access token API
//!
//! Provides the credential type and a single-shot token fetch against the
//! `cgi-bin/token` endpoint. This crate knows nothing about caching or
//! persistence; the token pool drives it on its own schedule.
//!
//! Fetch flow:
//! 1. Caller builds a `TokenClient` with the endpoint and request timeout
//! 2. `TokenClient::fetch()` issues one GET with the app id and secret
//! 3. A body carrying `access_token` is a success, whatever the HTTP status
//! 4. Anything else maps to `Error::Api`, `Error::Http` or `Error::MalformedResponse`

pub mod constants;
pub mod credentials;
pub mod error;
pub mod token;

pub use constants::*;
pub use credentials::Credential;
pub use error::{Error, Result};
pub use token::{TokenClient, TokenResponse, parse_token_response};
