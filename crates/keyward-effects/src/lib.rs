//! Keyward Effects
//!
//! Production handlers for the effect interfaces defined in `keyward-core`:
//!
//! - [`RealCryptoHandler`]: X25519, HKDF-SHA256, HMAC-SHA256, OS randomness
//! - [`RealTimeHandler`]: system clock and tokio-backed one-shot timers
//! - [`InMemoryTrustStore`]: device keys, master keys and verified-key records
//! - [`QueuedTransport`]: outbound queue drained by the host's network client
//! - [`VerificationEffectSystem`]: all of the above behind one value
//!
//! Handlers are stateless apart from the state their concern requires (the
//! store's records, the pending timers).

#![forbid(unsafe_code)]

pub mod crypto;
pub mod system;
pub mod time;
pub mod transport;
pub mod trust;

pub use crypto::RealCryptoHandler;
pub use system::VerificationEffectSystem;
pub use time::{RealTimeHandler, TimeoutReceiver};
pub use transport::{OutboundReceiver, QueuedTransport};
pub use trust::InMemoryTrustStore;
