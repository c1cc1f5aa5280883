//! Inbox Assist: unread inbox snapshots and reply dispatch for a personal webmail assistant.

pub mod api;
pub mod config;
pub mod error;
pub mod llm;
pub mod mail;
