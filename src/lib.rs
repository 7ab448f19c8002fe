pub mod config;
pub mod error;
pub mod humanize;
pub mod layer;
pub mod observability;
pub mod record;
pub mod service;
pub mod shipper;

pub use config::{ShipperConfig, StreamIdentity};
pub use error::{Result, ShipperError};
pub use layer::ShipperLayer;
pub use record::{LogRecord, WriteToken};
pub use service::{HttpLogService, InMemoryLogService, LogStreamService, ServiceError};
pub use shipper::{LifecycleState, LogShipper};
