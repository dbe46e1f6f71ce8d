//! Orchestrator agents - drive repeated selection attempts for playlists.

mod relaxation;

pub use relaxation::{PlaylistJob, RelaxationController, RelaxationSettings};
