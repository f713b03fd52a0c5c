//! Effect interfaces
//!
//! Pure trait signatures for everything the verification protocol consumes
//! from its environment. Production handlers live in `keyward-effects`,
//! controllable ones in `keyward-testkit`.

pub mod crypto;
pub mod time;
pub mod transport;
pub mod trust;

pub use crypto::{CryptoEffects, CryptoError, RandomEffects, X25519Secret};
pub use time::{PhysicalTimeEffects, TimeError, TimeoutHandle, TimerEffects};
pub use transport::{
    ChannelTarget, InboundMessage, MessageSource, OutboundMessage, SendReceipt, TransportEffects,
    TransportError,
};
pub use trust::{DeviceKeys, TrustStoreEffects, VerifiedKey};
