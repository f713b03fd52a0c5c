//! Effects required by the verification engine

use keyward_core::effects::{
    CryptoEffects, PhysicalTimeEffects, TimerEffects, TransportEffects, TrustStoreEffects,
};

/// Combined effects required for verification sessions.
pub trait VerificationEffects:
    CryptoEffects + PhysicalTimeEffects + TimerEffects + TransportEffects + TrustStoreEffects + Send + Sync
{
}

// Blanket implementation
impl<T> VerificationEffects for T where
    T: CryptoEffects
        + PhysicalTimeEffects
        + TimerEffects
        + TransportEffects
        + TrustStoreEffects
        + Send
        + Sync
{
}
