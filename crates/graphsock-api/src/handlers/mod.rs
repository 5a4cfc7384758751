//! HTTP and WebSocket request handlers.

pub mod query;
pub mod ws;

pub use query::{handle_query, RequestOptions};
pub use ws::handle_upgrade;
