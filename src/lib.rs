//! Realmgate - authorization-aware stream relay
//!
//! Maps verified bearer credentials onto compact 64-bit authorization tokens
//! (one realm bit plus scope bits) and proxies streams between peers, pairing
//! each reply with the stream that caused it.

pub mod auth;
pub mod config;
pub mod control;
pub mod proxy;

pub use auth::{AuthorizationToken, Claims, CredentialExtractor, HmacVerifier, KeySet, RealmRegistry, Verifier};
pub use config::{bootstrap, RelayConfig};
pub use control::{ControlCommand, ControlReply, Controller};
pub use proxy::{Frame, ProxyFactory, RouteTable, StreamProxy, StreamRelay, Writer};
