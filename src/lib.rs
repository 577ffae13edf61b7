//! Claude Bridge - streaming chat bridge to the Claude Code CLI.

pub mod agent;
pub mod config;
pub mod dispatch;
pub mod display;
pub mod retry;
pub mod session;
