//! Test effect environments
//!
//! One device's complete effect system with every handler reachable, so a
//! test can move the clock, inspect or break the transport and look into the
//! trust store while a session runs against the composed system.

use keyward_effects::{InMemoryTrustStore, RealCryptoHandler, VerificationEffectSystem};
use std::sync::Arc;

use crate::device::TestDevice;
use crate::time::ManualTimeSource;
use crate::transport::RecordingTransport;

/// Time every test environment starts at (2024-01-01T00:00:00Z)
pub const TEST_EPOCH_MS: u64 = 1_704_067_200_000;

/// Effect handlers of one simulated device
#[derive(Debug, Clone)]
pub struct TestEnvironment {
    /// Manual clock and timers
    pub clock: ManualTimeSource,
    /// Recording transport
    pub transport: RecordingTransport,
    /// Trust store
    pub trust: Arc<InMemoryTrustStore>,
    /// The composed system handed to the code under test
    pub effects: VerificationEffectSystem,
}

impl TestEnvironment {
    /// Environment whose trust store already knows `devices`
    pub fn new(devices: &[&TestDevice]) -> Self {
        let clock = ManualTimeSource::new(TEST_EPOCH_MS);
        let transport = RecordingTransport::new();
        let trust = Arc::new(InMemoryTrustStore::new());
        for device in devices {
            device.publish_to(&trust);
        }

        let effects = VerificationEffectSystem::new(
            Arc::new(RealCryptoHandler::new()),
            Arc::new(clock.clone()),
            Arc::new(clock.clone()),
            Arc::new(transport.clone()),
            trust.clone(),
        );
        Self {
            clock,
            transport,
            trust,
            effects,
        }
    }
}
