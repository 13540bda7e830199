//! Chat bot: interactive commands, Telegram polling and the daily job.

pub mod commands;
pub mod daily;
pub mod polling;

pub use commands::{Command, CommandRouter, command_specs};
pub use daily::{DailyScheduler, next_fire, parse_schedule, parse_timezone};
pub use polling::{TelegramPoller, UpdateSource};
