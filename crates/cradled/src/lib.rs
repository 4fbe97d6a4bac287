//! cradled - care event reasoning daemon.
//!
//! Ingests crying events (single-shot or live-streamed audio), delegates
//! cause inference to an external multimodal provider, and calibrates its
//! confidence from caregiver feedback.

pub mod config;
pub mod experiment;
pub mod live;
pub mod metrics;
pub mod priors;
pub mod provider;
pub mod reasoning;
pub mod routes;
pub mod server;
pub mod store;
