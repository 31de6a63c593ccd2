//! Gateway: session control plane and wiring for the auto-reply engine.
//!
//! Administrative clients call `sessions.*` methods with JSON request frames
//! over an already-authenticated connection. Handlers are registered in
//! `methods.rs` and delegate to the [`services::SessionService`], which
//! operates on the same store and run coordinator as inbound traffic.

pub mod methods;
pub mod server;
pub mod services;
pub mod session;
pub mod session_types;
pub mod state;

pub use {
    methods::{MethodContext, MethodRegistry, MethodResult, authorize_method},
    server::Gateway,
    session::LiveSessionService,
    state::{ConnectedClient, GatewayState},
};
