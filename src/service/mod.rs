//! Service integrations for external APIs and local storage.
//!
//! This module contains the building blocks the use cases compose:
//! - LLM transport (OpenAI-compatible HTTP) and text/vision providers
//! - Web search (OpenRouter web plugin)
//! - Artifact, session and progress stores, plus the timeline recorder
//!
//! Services with more than one backend define a generic trait and a
//! cloneable wrapper, allowing for extensibility and easy testing.

pub mod anonymize;
pub mod llm;
pub mod progress;
pub mod provider;
pub mod search;
pub mod storage;
pub mod timeline;
