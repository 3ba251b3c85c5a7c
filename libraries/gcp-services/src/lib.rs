//! REST clients for the external services the Binary Authorization demo
//! orchestrates: the GKE control plane, the Binary Authorization policy and
//! attestor registry, Container Analysis notes and occurrences, and the
//! container registry's tag listing.
//!
//! All calls are bearer-token authenticated through [`Auth`]. The seams the
//! workflows are tested against ([`analysis::NoteStore`],
//! [`analysis::OccurrenceStore`], [`binauthz::AttestorStore`],
//! [`registry::ImageRegistry`]) are implemented here by the real clients.

pub mod analysis;
pub mod auth;
pub mod binauthz;
pub mod error;
pub mod gke;
mod http;
pub mod payload;
pub mod registry;

pub use auth::Auth;
pub use error::{ApiError, Result};
