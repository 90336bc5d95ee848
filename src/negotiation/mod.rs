//! Offer/answer negotiation against the media relay
//!
//! - [`PipelineProvisioner`] makes sure each room gets exactly one pipeline,
//!   however many offers race for it
//! - [`Negotiator`] creates endpoints, processes offers, routes candidates
//!   and connects the two endpoints of a room once both exist

pub mod orchestrator;
pub mod provisioner;

pub use orchestrator::Negotiator;
pub use provisioner::PipelineProvisioner;
