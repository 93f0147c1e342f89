//! Node-side vault capability.
//!
//! Validates vault CRUD requests, pins every identifier to the authorized owner
//! and bridges each request into the consensus pipeline, correlating the agreed
//! response back to the waiting caller.

pub mod capability;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod request;
pub mod store;

pub use capability::VaultCapability;
pub use config::CapabilityConfig;
pub use error::CapabilityError;
pub use pipeline::{ConsensusPipeline, ConsensusRequest, PipelineError, VaultPayload, VaultResponse};
pub use request::{
    CAPABILITY_ID, CapabilityInfo, CapabilityRequest, CapabilityResponse, CapabilityType,
    RequestMetadata,
};
pub use store::{ResponseStore, StoreError};
