use uuid::Uuid;

/// Service and characteristic pair addressed by a request.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub struct CharacteristicRef {
    pub service: Uuid,
    pub characteristic: Uuid,
}

impl CharacteristicRef {
    #[must_use]
    pub fn new(service: Uuid, characteristic: Uuid) -> Self {
        Self {
            service,
            characteristic,
        }
    }
}

/// A characteristic description discovered on a connected peripheral.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct CharacteristicInfo {
    uuid: Uuid,
    properties: Vec<String>,
    descriptors: Vec<Uuid>,
}

impl CharacteristicInfo {
    /// Creates a characteristic description.
    #[must_use]
    pub fn new(uuid: Uuid, properties: Vec<String>, descriptors: Vec<Uuid>) -> Self {
        Self {
            uuid,
            properties,
            descriptors,
        }
    }

    /// Returns the characteristic UUID.
    #[must_use]
    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    /// Returns property labels for this characteristic.
    #[must_use]
    pub fn properties(&self) -> &[String] {
        &self.properties
    }

    #[must_use]
    pub fn has_descriptor(&self, descriptor: Uuid) -> bool {
        self.descriptors.contains(&descriptor)
    }
}

/// A GATT service with discovered characteristics.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ServiceInfo {
    uuid: Uuid,
    primary: bool,
    characteristics: Vec<CharacteristicInfo>,
}

impl ServiceInfo {
    /// Creates a service description.
    #[must_use]
    pub fn new(uuid: Uuid, primary: bool, characteristics: Vec<CharacteristicInfo>) -> Self {
        Self {
            uuid,
            primary,
            characteristics,
        }
    }

    /// Returns the service UUID.
    #[must_use]
    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    /// Returns whether this is a primary service.
    #[must_use]
    pub fn is_primary(&self) -> bool {
        self.primary
    }

    /// Returns all characteristics in this service.
    #[must_use]
    pub fn characteristics(&self) -> &[CharacteristicInfo] {
        &self.characteristics
    }
}

/// Finds the characteristic addressed by `target` in a discovered service list.
pub(crate) fn find_characteristic<'a>(
    services: &'a [ServiceInfo],
    target: &CharacteristicRef,
) -> Option<&'a CharacteristicInfo> {
    services
        .iter()
        .filter(|service| service.uuid() == target.service)
        .flat_map(ServiceInfo::characteristics)
        .find(|characteristic| characteristic.uuid() == target.characteristic)
}
