//! Core event stream: typed events, live broadcast, journal-backed replay

mod stream;
mod types;

pub use stream::EventStream;
pub use types::CoreEvent;
