//! Authenticated session caching

pub mod auth;
pub mod cache;
pub mod store;

pub use auth::{Authenticator, FormAuthenticator, LogoutMethod};
pub use cache::{
    AcquireOutcome, CachePolicy, CacheStats, SessionCache, SessionHandle, SessionRecord,
    VerificationResult,
};
pub use store::{FsSessionStore, PersistedState, SessionStore};
