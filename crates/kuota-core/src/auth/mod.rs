//! Authentication against the SSO provider.
//!
//! This module provides:
//! - `CredentialManager`: the process-wide bearer token cache with
//!   single-flight refresh
//! - `SsoClient`: the two-step login that mints bearer tokens
//! - `Keychain`: OS-level storage for the SSO account password
//! - `SessionFile`: the last bearer token, saved for the next run
//!
//! Bearer tokens are cached for a fixed window (8 hours by default) and
//! replaced wholesale when they expire or the vendor rejects them.

pub mod credential;
pub mod error;
pub mod keychain;
pub mod manager;
pub mod session;
pub mod sso;

pub use credential::Credential;
pub use error::{AuthError, LoginStep};
pub use keychain::Keychain;
pub use manager::CredentialManager;
pub use session::SessionFile;
pub use sso::SsoClient;
