//! Support utilities.

mod backoff;

pub use backoff::{Backoff, BackoffOptions};
