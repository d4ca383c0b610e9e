//! Text helpers shared by the handlers.

pub mod chunking;
pub mod cleaning;
pub mod prompts;
