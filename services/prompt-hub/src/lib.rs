//! Prompt hub: data access, filter catalog and REST surface for the shared
//! prompt catalog.

pub mod api;
pub mod catalog;
pub mod model;
pub mod prompts;
pub mod schema;
