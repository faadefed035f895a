//! # Drift Client
//!
//! Client for devices of the Drift platform. Topics produce timestamped binary
//! packages: a time-series index records *when* a package existed, while its
//! content lives in one of several blob stores with different capabilities.
//!
//! ## Features
//!
//! - **Resolution**: topic + time range to the identifiers the store still holds
//! - **Backend fallback**: ReductStore first, MinIO/S3 when it is unreachable
//! - **Walks**: lazy iteration over a streaming range query
//! - **Live data**: MQTT subscriptions that survive reconnects
//! - **Metrics**: per-timestamp records from the time index
//!
//! ## Modules
//!
//! - [`client`]: the synchronous [`DriftClient`] facade
//! - [`index`]: time index trait and the InfluxDB implementation
//! - [`store`]: blob store traits, ReductStore and S3 clients, selection
//! - [`resolver`]: topic + range to package identifiers
//! - [`transport`]: reconnection-durable publish/subscribe
//! - [`walker`]: streaming range queries as an iterator
//! - [`package`]: identifiers and envelope decoding
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use drift_client::{Config, DriftClient};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = DriftClient::connect(Config::new("10.0.0.5", "password"))?;
//!
//!     for id in client.get_package_names("acc-5", "2022-02-03 10:00:00", "2022-02-03 10:00:10")? {
//!         let package = client.get_item(&id.to_string())?;
//!         println!("{id}: status {}", package.status_code());
//!     }
//!
//!     for body in client.walk("acc-5", 1_643_882_400.0, 1_643_882_410.0)? {
//!         println!("{} bytes", body?.len());
//!     }
//!
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod executor;
pub mod index;
pub mod logging;
pub mod package;
pub mod resolver;
pub mod store;
pub mod time;
pub mod transport;
pub mod walker;

pub use client::DriftClient;
pub use config::Config;
pub use error::{DriftError, DriftResult};
pub use package::{DriftPackage, PackageId};
pub use time::{TimeInput, TimeRange};
