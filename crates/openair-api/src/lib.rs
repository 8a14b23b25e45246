// openair-api: wire-level seam for the ESPHome native API (Modern + Legacy clients)
//
// This crate does not speak the framing itself. It defines the shapes the
// two existing protocol clients produce, the traits they are driven
// through, and the factory a host uses to construct them.

pub mod endpoint;
pub mod error;
pub mod factory;
pub mod generation;
pub mod legacy;
pub mod modern;

#[cfg(any(test, feature = "test-util"))]
pub mod fake;

pub use endpoint::{Credential, DEFAULT_PORT, DeviceEndpoint, DeviceInfo, EndpointIdentity};
pub use error::Error;
pub use factory::ClientFactory;
pub use generation::Generation;
pub use legacy::{LegacyAuth, LegacyClient, LegacyEntity, LegacyEntityKind, LegacyMessage, LegacySession};
pub use modern::{
    ModernClient, ModernCredential, ModernEntity, ModernFanCommand, ModernMessage, ModernSession,
    ModernValveCommand,
};
