//! # Playlist Agent
//!
//! Track selection for scheduled radio playlists. A tool-calling reasoning
//! service picks tracks from the station catalog; this crate decides what to
//! ask for, how hard to keep trying, and how much may be spent doing so.
//!
//! ## Architecture
//!
//! - **Criteria**: the constraint snapshot and its relaxation transform
//! - **Agents**: prompt building, the selection transport, scoring and the
//!   relaxation loop
//! - **Budget**: pricing, the durable cost ledger, allocation and retry policy
//! - **LLM**: the reasoning-service client (OpenRouter)
//! - **Tools**: catalog tools offered to the reasoning service

pub mod agents;
pub mod budget;
pub mod config;
pub mod criteria;
pub mod llm;
pub mod tools;

#[cfg(test)]
pub(crate) mod testing;

pub use config::Config;
