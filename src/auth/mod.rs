//! Authentication and authorization
//!
//! - `token`: bit-packed [`AuthorizationToken`] (realm bit + scope bits)
//! - `realms`: [`RealmRegistry`] allocating realm and scope bits
//! - `keys`: signing [`KeySet`] loaded at startup
//! - `credentials`: bearer extraction and [`Verifier`] implementations

mod credentials;
mod keys;
mod realms;
mod token;

pub use credentials::{
    bearer_token, Claims, CredentialExtractor, HmacVerifier, Verifier, VerifyError,
    AUTHORIZATION_HEADER, BEARER_PREFIX, DEFAULT_CHALLENGE_TIMEOUT_CLAIM, HS256,
};
pub use keys::{Key, KeyError, KeySet};
pub use realms::RealmRegistry;
pub use token::{
    AuthorizationToken, MAX_REALMS, MAX_SCOPES, REALM_BITS, REALM_MASK, SCOPE_BITS, SCOPE_MASK,
};
