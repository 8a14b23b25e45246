// ── Client construction seam ──

use std::sync::Arc;

use crate::endpoint::DeviceEndpoint;
use crate::error::Error;
use crate::legacy::{LegacyAuth, LegacyClient};
use crate::modern::{ModernClient, ModernCredential};

/// Builds the underlying protocol clients for an endpoint.
///
/// The host process provides one implementation, wired to whatever wire
/// libraries it links. Returning [`Error::Unavailable`] is how an
/// implementation signals that a generation cannot be loaded at all; the
/// orchestrator then falls back to the next generation.
pub trait ClientFactory: Send + Sync {
    fn modern(
        &self,
        endpoint: &DeviceEndpoint,
        credential: ModernCredential,
    ) -> Result<Arc<dyn ModernClient>, Error>;

    fn legacy(
        &self,
        endpoint: &DeviceEndpoint,
        auth: LegacyAuth,
    ) -> Result<Arc<dyn LegacyClient>, Error>;
}
