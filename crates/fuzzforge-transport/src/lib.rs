//! # FuzzForge Transport
//!
//! Thin HTTP/1.1 transport for the FuzzForge engine: a per-worker stream
//! socket that sends rendered request bytes verbatim (TLS optional), the
//! response wrapper with valid/bug status classification, and the auth token
//! provider contract.

pub mod auth;
pub mod error;
pub mod response;
pub mod socket;

pub use auth::{parse_token_response, AuthProvider, StaticTokenProvider, TokenCache, TokenData};
pub use error::{Result, TransportError};
pub use response::{
    BugCodeSettings, HttpResponse, CONNECTION_CLOSED_CODE, NEVER_SENT_CODE, TIMEOUT_CODE,
    VALID_CODES,
};
pub use socket::{ConnectionSettings, HttpSock};
