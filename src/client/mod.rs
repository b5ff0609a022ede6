//! Streaming client: wire decoding, turn state, transport driver, and the
//! interactive REPL built on them.

pub mod decoder;
pub mod driver;
pub mod machine;
pub mod repl;

pub use decoder::{StreamDecoder, WireEvent};
pub use driver::{RenderSink, ResearchClient};
pub use machine::{TurnEvent, TurnMachine, TurnPhase, Update};
