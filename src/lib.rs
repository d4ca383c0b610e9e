//! # yordamchi
//!
//! A Telegram AI assistant bot. Questions arrive by long polling, answers
//! come from a hosted chat-completion API (Mistral or OpenAI) and are
//! streamed back into the chat. Photos are read with OCR first.
//!
//! - [`config`] - Environment configuration
//! - [`llms`] - Providers and the request gate
//! - [`telegram`] - Bot API client and keyboards
//! - [`storage`] - Users, admins and activity (Postgres or in-memory)
//! - [`bot`] - Dispatcher, handlers and background jobs
//! - [`server`] - Health probe

pub mod bot;
pub mod config;
pub mod error;
pub mod llms;
pub mod memory;
pub mod ocr;
pub mod server;
pub mod storage;
pub mod telegram;
pub mod utilities;

pub use bot::{BotContext, Dispatcher};
pub use config::BotConfig;
pub use error::{BotError, BotResult};
