//! Keyward Testing Infrastructure
//!
//! Deterministic building blocks for verification tests:
//!
//! - [`ManualTimeSource`]: a clock and timers that only move on request
//! - [`RecordingTransport`]: captures outbound messages for manual delivery
//! - [`TestDevice`]: seeded ed25519 device and master keys
//! - [`TestEnvironment`]: one device's effect system wired from the above
//! - [`init_tracing`]: `RUST_LOG`-filtered test logging
//!
//! # Usage
//!
//! ```toml
//! [dev-dependencies]
//! keyward-testkit = { path = "../keyward-testkit" }
//! ```

pub mod device;
pub mod environment;
pub mod logging;
pub mod time;
pub mod transport;

pub use device::TestDevice;
pub use environment::{TestEnvironment, TEST_EPOCH_MS};
pub use logging::init_tracing;
pub use time::ManualTimeSource;
pub use transport::{RecordedMessage, RecordingTransport};
