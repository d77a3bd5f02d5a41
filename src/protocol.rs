use strum_macros::Display;
use uuid::Uuid;

/// Command written to the device-info characteristic when no override is configured.
pub const DEFAULT_DEVICE_INFO_COMMAND: &str = r#"{"request":"device_info"}"#;

/// Value written to the client-characteristic-configuration descriptor to enable notifications.
pub const ENABLE_NOTIFICATION_VALUE: [u8; 2] = [0x01, 0x00];

const DEVICE_INFO_SERVICE_UUID: Uuid = Uuid::from_u128(0x4fafc201_1fb5_459e_8fcc_c5c9c331914b);
const DEVICE_INFO_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0xbeb5483e_36e1_4688_b7f5_ea07361b26a8);
const CLIENT_CHARACTERISTIC_CONFIGURATION_UUID: Uuid =
    Uuid::from_u128(0x00002902_0000_1000_8000_00805f9b34fb);

/// Known device-info protocol endpoints.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Display)]
pub enum EndpointId {
    /// Service hosting the device-info exchange.
    #[strum(to_string = "device_info_service")]
    DeviceInfoService,
    /// Characteristic carrying the command and the chunked reply.
    #[strum(to_string = "device_info_characteristic")]
    DeviceInfoCharacteristic,
    /// Standard descriptor used to enable notifications.
    #[strum(to_string = "client_characteristic_configuration")]
    ClientCharacteristicConfiguration,
}

impl EndpointId {
    /// Returns the build-time UUID for this endpoint.
    #[must_use]
    pub fn uuid(self) -> Uuid {
        endpoint_metadata(self).uuid()
    }
}

/// Endpoint category in GATT.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Display)]
pub(crate) enum EndpointKind {
    #[strum(to_string = "service")]
    Service,
    #[strum(to_string = "characteristic")]
    Characteristic,
    #[strum(to_string = "descriptor")]
    Descriptor,
}

/// Descriptive metadata for one protocol endpoint.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub(crate) struct EndpointMetadata {
    name: &'static str,
    uuid: Uuid,
    kind: EndpointKind,
}

impl EndpointMetadata {
    /// Human-readable endpoint name.
    pub(crate) fn name(self) -> &'static str {
        self.name
    }

    pub(crate) fn uuid(self) -> Uuid {
        self.uuid
    }

    pub(crate) fn kind(self) -> EndpointKind {
        self.kind
    }
}

/// Returns metadata for one endpoint.
pub(crate) fn endpoint_metadata(endpoint: EndpointId) -> EndpointMetadata {
    match endpoint {
        EndpointId::DeviceInfoService => EndpointMetadata {
            name: "device-info service",
            uuid: DEVICE_INFO_SERVICE_UUID,
            kind: EndpointKind::Service,
        },
        EndpointId::DeviceInfoCharacteristic => EndpointMetadata {
            name: "device-info exchange",
            uuid: DEVICE_INFO_CHARACTERISTIC_UUID,
            kind: EndpointKind::Characteristic,
        },
        EndpointId::ClientCharacteristicConfiguration => EndpointMetadata {
            name: "client characteristic configuration",
            uuid: CLIENT_CHARACTERISTIC_CONFIGURATION_UUID,
            kind: EndpointKind::Descriptor,
        },
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(EndpointId::DeviceInfoService, EndpointKind::Service)]
    #[case(EndpointId::DeviceInfoCharacteristic, EndpointKind::Characteristic)]
    #[case(EndpointId::ClientCharacteristicConfiguration, EndpointKind::Descriptor)]
    fn endpoint_metadata_reports_kind(#[case] endpoint: EndpointId, #[case] kind: EndpointKind) {
        assert_eq!(kind, endpoint_metadata(endpoint).kind());
    }

    #[test]
    fn cccd_uses_the_bluetooth_base_uuid() {
        assert_eq!(
            "00002902-0000-1000-8000-00805f9b34fb",
            EndpointId::ClientCharacteristicConfiguration
                .uuid()
                .to_string()
        );
    }

    #[test]
    fn default_command_is_valid_json() {
        let value: serde_json::Value = serde_json::from_str(DEFAULT_DEVICE_INFO_COMMAND)
            .expect("default command should be valid JSON");
        assert_eq!(Some("device_info"), value["request"].as_str());
    }
}
