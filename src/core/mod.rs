//! Core building blocks: the error taxonomy and environment-driven
//! configuration shared by the server, client, and allocator layers.

pub mod config;
pub mod error;
