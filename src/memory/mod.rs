//! In-process conversation state.
//!
//! Two stores, both keyed by chat id and safe to share between update tasks:
//! [`ChatHistory`] holds the messages sent back to the model as context,
//! [`SessionMemory`] holds the bookkeeping of retries and inline buttons.
//! Neither survives a restart.

pub mod history;
pub mod session;

pub use history::ChatHistory;
pub use session::{FailedRequest, RetryDecision, SessionMemory};
