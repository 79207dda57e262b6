//! Task runtime primitives shared by the cadence scheduler crates.
//!
//! Everything that touches the tokio runtime directly lives here: resolving a
//! runtime handle, spawning named tasks, generation-scoped cancellation and
//! turning panic payloads into loggable messages.

mod panic;
mod spawn;
mod token;

pub use panic::{join_error_panic_message, panic_message};
pub use spawn::spawn;
pub use token::{GenerationClock, GenerationToken};
