//! Integration tests for newlist-bot.
//!
//! These tests drive the service against a local mock ticker feed:
//! - Connection lifecycle and reconnect
//! - Baseline capture and listing detection
//! - Dry-run execution end to end

pub mod common;
