//! Step definitions for tool gateway BDD scenarios.

#[path = "../in_memory/helpers.rs"]
pub mod helpers;

pub mod then;
pub mod when;
pub mod world;
