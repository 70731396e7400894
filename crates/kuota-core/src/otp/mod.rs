//! OTP sessions between "send me a code" and "here is the code".
//!
//! A session maps a subscriber number to the `auth_id` the vendor returned
//! when the OTP was sent. Sessions live for five minutes. Expiry is checked
//! when a session is read; an expired session that is never read again stays
//! in memory until [`OtpSessionStore::sweep`] runs, either explicitly or from
//! the task started by [`OtpSessionStore::spawn_sweeper`].

pub mod store;

pub use store::{OtpError, OtpSession, OtpSessionStore};
