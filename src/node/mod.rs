//! Node runtime: admin HTTP surface and server lifecycle

pub mod http;
pub mod server;

pub use http::{create_router, AppState, MAX_IDS_PER_REQUEST};
pub use server::{shutdown_signal, NodeServer};
