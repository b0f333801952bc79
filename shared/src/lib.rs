//! Types shared by the prompt hub service and its tooling: configuration
//! handling, the error taxonomy and the prompt record shapes exchanged with
//! the front end.

pub mod config;
pub mod dto;
pub mod error;
