//! Event types published by a live session.
//!
//! All types derive `serde::Serialize` + `serde::Deserialize` so a front end
//! (terminal, web view, or a bridge process) can forward them as JSON.

pub mod events;
