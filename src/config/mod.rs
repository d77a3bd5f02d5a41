mod identity;

use std::time::Duration;

use bon::Builder;
use uuid::Uuid;

use crate::protocol::{DEFAULT_DEVICE_INFO_COMMAND, EndpointId};
use crate::transport::CharacteristicRef;

pub use self::identity::{IdentityProvider, IdentityStore, StaticIdentity};

/// Default absolute deadline for a whole exchange.
pub const DEFAULT_OVERALL_TIMEOUT: Duration = Duration::from_secs(25);
/// Default silence window after which buffered chunks are finalised.
pub const DEFAULT_INACTIVITY_TIMEOUT: Duration = Duration::from_secs(3);
/// Default pause between enabling notifications and writing the command.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(500);

/// Timing and addressing for device-info exchanges.
///
/// ```
/// use std::time::Duration;
///
/// use devinfo::ExchangeConfig;
///
/// let config = ExchangeConfig::builder()
///     .inactivity_timeout(Duration::from_secs(5))
///     .build();
/// assert_eq!(Duration::from_secs(25), config.overall_timeout());
/// assert_eq!(Duration::from_secs(5), config.inactivity_timeout());
/// ```
#[derive(Debug, Clone, Copy, Eq, PartialEq, Builder)]
pub struct ExchangeConfig {
    #[builder(default = DEFAULT_OVERALL_TIMEOUT)]
    overall_timeout: Duration,
    #[builder(default = DEFAULT_INACTIVITY_TIMEOUT)]
    inactivity_timeout: Duration,
    #[builder(default = DEFAULT_SETTLE_DELAY)]
    settle_delay: Duration,
    #[builder(default = EndpointId::DeviceInfoService.uuid())]
    service: Uuid,
    #[builder(default = EndpointId::DeviceInfoCharacteristic.uuid())]
    characteristic: Uuid,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl ExchangeConfig {
    #[must_use]
    pub fn overall_timeout(&self) -> Duration {
        self.overall_timeout
    }

    #[must_use]
    pub fn inactivity_timeout(&self) -> Duration {
        self.inactivity_timeout
    }

    #[must_use]
    pub fn settle_delay(&self) -> Duration {
        self.settle_delay
    }

    /// Service and characteristic used when the caller does not name one.
    #[must_use]
    pub fn target(&self) -> CharacteristicRef {
        CharacteristicRef::new(self.service, self.characteristic)
    }
}

/// Supplies the command written to the device-info characteristic.
pub trait CommandProvider: std::fmt::Debug + Send + Sync {
    fn device_info_command(&self) -> String;
}

/// Command provider returning a fixed payload.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct StaticCommand(String);

impl StaticCommand {
    #[must_use]
    pub fn new(command: impl Into<String>) -> Self {
        Self(command.into())
    }
}

impl Default for StaticCommand {
    fn default() -> Self {
        Self::new(DEFAULT_DEVICE_INFO_COMMAND)
    }
}

impl From<&str> for StaticCommand {
    fn from(command: &str) -> Self {
        Self::new(command)
    }
}

impl CommandProvider for StaticCommand {
    fn device_info_command(&self) -> String {
        self.0.clone()
    }
}
