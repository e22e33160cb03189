//! Core components, types, and utilities for the circuit agent.
//!
//! This module contains fundamental building blocks used throughout the application:
//! - Configuration handling and environment variables.
//! - Prompt template loading and fallback prompts.
//! - Common types, result handling, and small text helpers.

pub mod config;
pub mod prompts;
pub mod text;
pub mod types;
