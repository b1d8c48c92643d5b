//! porterd — the Porter access-control daemon.
//!
//! Recognizes enrolled identities in submitted frames, keeps the
//! attendance ledger, and walks unrecognized visitors through an
//! asynchronous, human-in-the-loop approval conversation.

pub mod config;
pub mod correlation;
pub mod decision;
pub mod directory;
pub mod engine;
pub mod gatekeeper;
pub mod http;
pub mod messaging;
pub mod session;
