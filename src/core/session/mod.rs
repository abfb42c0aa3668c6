//! Session orchestration: the turn-by-turn machinery between the
//! recognizer, the language model, and the synthesizer.

mod events;
pub mod history;
pub mod mic;
mod orchestrator;
pub mod segmenter;
mod turn;

pub use events::TurnState;
pub use orchestrator::{Session, SessionConfig, SessionError};
