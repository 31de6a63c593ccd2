//! Derive session keys from inbound message context.
//!
//! Resolution never fails: group traffic maps to `<surface>:<kind>:<id>`
//! (or the legacy `group:<id>` when no surface is known), direct traffic to
//! the main key, and everything to `global` under the global scope.

pub mod resolve;

pub use resolve::{
    ResolvedGroup, ResolvedSessionKey, SessionRouting, resolve_group_key, resolve_session_key,
};
