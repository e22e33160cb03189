//! Flat-file storage: review artifacts and saved sessions.

pub mod artifact;
pub mod session;
