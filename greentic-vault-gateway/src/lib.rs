//! Gateway-side vault handler.
//!
//! Authorizes caller requests, fans them out to every member of the vault DON
//! and answers each caller once a quorum of nodes agrees, the quorum becomes
//! unobtainable, or the request times out.

pub mod active;
pub mod aggregator;
pub mod config;
pub mod don;
pub mod error;
pub mod handler;
pub mod rate_limit;
pub mod telemetry;

pub use active::{ActiveRequest, ActiveRequestTable, UserCallbackPayload, UserReplySlot};
pub use aggregator::{AggregationError, Aggregator, QuorumAggregator};
pub use config::{HandlerConfig, RateLimiterConfig};
pub use don::{
    CapabilitiesRegistry, Don, DonConfig, DonError, DonInfo, NodeConfig, RegistryError,
    StaticRegistry,
};
pub use error::{ErrorCode, GatewayError};
pub use handler::VaultHandler;
pub use rate_limit::NodeRateLimiter;
pub use telemetry::{HandlerMetrics, MetricsSnapshot};
