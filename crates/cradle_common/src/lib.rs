//! Cradle Common - shared types for the care reasoning service.
//!
//! Cause taxonomy, care events, guidance artifacts, and the error taxonomy
//! used by the daemon and by the HTTP layer.

pub mod error;
pub mod event;
pub mod guidance;
pub mod labels;

pub use error::*;
pub use event::*;
pub use guidance::*;
pub use labels::*;
