//! Post-write verification

use tracing::{debug, warn};

use crate::error::{SpoofError, SpoofResult};
use crate::mac::MacAddress;
use crate::platform::PlatformHandler;

/// Re-reads an interface after a write and compares with the requested value
#[derive(Debug, Clone, Copy)]
pub struct Verifier {
    pub enabled: bool,
}

impl Default for Verifier {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl Verifier {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    /// `Ok(true)` when the read-back matches, `Ok(false)` when verification is
    /// disabled, `VerificationMismatch` otherwise. A failed re-read is
    /// returned as is.
    pub async fn verify(
        &self,
        handler: &dyn PlatformHandler,
        interface_id: &str,
        expected: MacAddress,
    ) -> SpoofResult<bool> {
        if !self.enabled {
            return Ok(false);
        }

        let actual = handler.read_mac(interface_id).await?;
        if actual == expected {
            debug!(interface = interface_id, mac = %actual, "verified");
            Ok(true)
        } else {
            warn!(interface = interface_id, expected = %expected, actual = %actual, "read-back mismatch");
            Err(SpoofError::VerificationMismatch {
                interface: interface_id.to_string(),
                expected: expected.to_string(),
                actual: actual.to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakePlatform;

    #[tokio::test]
    async fn test_verify_match_and_mismatch() {
        let fake = FakePlatform::new().with_interface("eth0", "00:11:22:33:44:55");
        let verifier = Verifier::default();

        assert!(verifier
            .verify(&fake, "eth0", "00:11:22:33:44:55".parse().unwrap())
            .await
            .unwrap());

        let err = verifier
            .verify(&fake, "eth0", "02:00:00:00:00:01".parse().unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, SpoofError::VerificationMismatch { .. }));
    }

    #[tokio::test]
    async fn test_disabled_verifier_does_not_read() {
        let fake = FakePlatform::new().with_interface("eth0", "00:11:22:33:44:55");
        let verified = Verifier::new(false)
            .verify(&fake, "eth0", "02:00:00:00:00:01".parse().unwrap())
            .await
            .unwrap();
        assert!(!verified);
        assert!(fake.calls().is_empty());
    }
}
