//! Anne Bot Library
//!
//! Core components of the Anne Bot chat service: the image payload codec,
//! session identities, thread metadata, agent memory, the persona agent with
//! its image analysis pipeline, the HTTP API and the client-side session logic.

pub mod agent;
pub mod api;
pub mod client;
pub mod codec;
pub mod db;
pub mod memory;
pub mod pipeline;
pub mod session;
pub mod stream;
pub mod threads;
