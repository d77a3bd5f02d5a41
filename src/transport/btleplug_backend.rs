use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, CharPropFlags, Characteristic, Manager as _, Peripheral as _,
    WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use tokio::sync::OnceCell;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace};
use uuid::Uuid;

use super::model::{CharacteristicInfo, CharacteristicRef, ServiceInfo};
use super::{EventSink, GattConnection, GattStatus, GattTransport, LinkState, TransportEvent};
use crate::error::TransportError;
use crate::protocol::{ENABLE_NOTIFICATION_VALUE, EndpointId};
use crate::utils::format_hex;

/// Transport backed by `btleplug`.
///
/// Only peripherals the adapter already knows about can be addressed; the
/// peer string is matched against the device address and the platform id.
#[derive(Debug, Default)]
pub struct BtleplugTransport {
    manager: OnceCell<Manager>,
}

impl BtleplugTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    async fn manager(&self) -> Result<&Manager, TransportError> {
        Ok(self.manager.get_or_try_init(Manager::new).await?)
    }

    #[instrument(skip(self), level = "debug")]
    async fn find_peripheral(&self, peer: &str) -> Result<(Adapter, Peripheral), TransportError> {
        let adapters = self.manager().await?.adapters().await?;
        if adapters.is_empty() {
            return Err(TransportError::NoAdapters);
        }

        for adapter in adapters {
            let name = adapter.adapter_info().await?;
            for peripheral in adapter.peripherals().await? {
                if matches_peer(&peripheral, peer) {
                    debug!(adapter = %name, "found known peripheral");
                    return Ok((adapter, peripheral));
                }
            }
        }

        Err(TransportError::PeerNotFound {
            address: peer.to_string(),
        })
    }
}

#[async_trait]
impl GattTransport for BtleplugTransport {
    #[instrument(skip(self, events), level = "debug")]
    async fn connect(
        &self,
        peer: &str,
        events: EventSink,
    ) -> Result<Box<dyn GattConnection>, TransportError> {
        let (adapter, peripheral) = self.find_peripheral(peer).await?;
        let tasks = CancellationToken::new();

        spawn_link_watch(&tasks, adapter, peripheral.clone(), events.clone());
        spawn_connect(&tasks, peripheral.clone(), events.clone());

        info!(peer, "connecting to peripheral");
        Ok(Box::new(BtleplugConnection {
            peripheral,
            events,
            tasks,
        }))
    }
}

#[derive(Debug)]
struct BtleplugConnection {
    peripheral: Peripheral,
    events: EventSink,
    tasks: CancellationToken,
}

impl BtleplugConnection {
    fn characteristic_for(
        &self,
        target: &CharacteristicRef,
    ) -> Result<Characteristic, TransportError> {
        self.peripheral
            .services()
            .into_iter()
            .filter(|service| service.uuid == target.service)
            .flat_map(|service| service.characteristics)
            .find(|characteristic| characteristic.uuid == target.characteristic)
            .ok_or(TransportError::UnknownCharacteristic {
                characteristic: target.characteristic,
            })
    }
}

#[async_trait]
impl GattConnection for BtleplugConnection {
    #[instrument(skip(self), level = "trace")]
    async fn discover_services(&self) -> Result<(), TransportError> {
        let peripheral = self.peripheral.clone();
        let sink = self.events.clone();
        spawn_until_cancelled(&self.tasks, async move {
            let event = match peripheral.discover_services().await {
                Ok(()) => TransportEvent::ServicesDiscovered {
                    status: GattStatus::Success,
                    services: collect_services(&peripheral),
                },
                Err(error) => {
                    debug!(?error, "service discovery failed");
                    TransportEvent::ServicesDiscovered {
                        status: GattStatus::GATT_ERROR,
                        services: Vec::new(),
                    }
                }
            };
            sink.emit(event);
        });
        Ok(())
    }

    #[instrument(skip(self, value), level = "trace", fields(%descriptor, value = %format_hex(value)))]
    async fn write_descriptor(
        &self,
        target: &CharacteristicRef,
        descriptor: Uuid,
        value: &[u8],
    ) -> Result<(), TransportError> {
        let characteristic = self.characteristic_for(target)?;

        // The platform stacks own the CCCD; enabling notifications goes through subscribe.
        if descriptor == EndpointId::ClientCharacteristicConfiguration.uuid()
            && value == ENABLE_NOTIFICATION_VALUE
        {
            self.peripheral.subscribe(&characteristic).await?;
            return Ok(());
        }

        let descriptor = characteristic
            .descriptors
            .iter()
            .find(|candidate| candidate.uuid == descriptor)
            .ok_or(TransportError::UnknownDescriptor {
                characteristic: target.characteristic,
                descriptor,
            })?;
        self.peripheral.write_descriptor(descriptor, value).await?;
        Ok(())
    }

    #[instrument(skip(self, value), level = "trace", fields(value_len = value.len()))]
    async fn write_characteristic(
        &self,
        target: &CharacteristicRef,
        value: &[u8],
    ) -> Result<(), TransportError> {
        let characteristic = self.characteristic_for(target)?;
        let peripheral = self.peripheral.clone();
        let sink = self.events.clone();
        let value = value.to_vec();
        spawn_until_cancelled(&self.tasks, async move {
            let status = match peripheral
                .write(&characteristic, &value, WriteType::WithResponse)
                .await
            {
                Ok(()) => GattStatus::Success,
                Err(error) => {
                    debug!(?error, "characteristic write failed");
                    GattStatus::GATT_ERROR
                }
            };
            sink.emit(TransportEvent::CharacteristicWritten {
                characteristic: characteristic.uuid,
                status,
            });
        });
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.tasks.cancel();
        if self.peripheral.is_connected().await? {
            self.peripheral.disconnect().await?;
        }
        Ok(())
    }

    async fn close(self: Box<Self>) {
        self.tasks.cancel();
        trace!(id = %self.peripheral.id(), "released peripheral handle");
    }
}

fn spawn_until_cancelled<F>(tasks: &CancellationToken, work: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    let tasks = tasks.clone();
    tokio::spawn(async move {
        tokio::select! {
            biased;
            () = tasks.cancelled() => {}
            () = work => {}
        }
    });
}

/// Connects, reports the link state, then forwards notifications until cancelled.
fn spawn_connect(tasks: &CancellationToken, peripheral: Peripheral, sink: EventSink) {
    spawn_until_cancelled(tasks, async move {
        let connected = match peripheral.connect().await {
            Ok(()) => true,
            Err(error) => {
                debug!(?error, "peripheral connect failed");
                false
            }
        };
        let (status, state) = if connected {
            (GattStatus::Success, LinkState::Connected)
        } else {
            (GattStatus::GATT_ERROR, LinkState::Disconnected)
        };
        sink.emit(TransportEvent::ConnectionStateChanged { status, state });
        if !connected {
            return;
        }

        let mut notifications = match peripheral.notifications().await {
            Ok(stream) => stream,
            Err(error) => {
                debug!(?error, "failed to open notification stream");
                return;
            }
        };
        while let Some(notification) = notifications.next().await {
            let delivered = sink.emit(TransportEvent::CharacteristicChanged {
                characteristic: notification.uuid,
                value: notification.value,
            });
            if !delivered {
                break;
            }
        }
    });
}

/// Reports an unsolicited link loss for this peripheral.
fn spawn_link_watch(
    tasks: &CancellationToken,
    adapter: Adapter,
    peripheral: Peripheral,
    sink: EventSink,
) {
    spawn_until_cancelled(tasks, async move {
        let mut events = match adapter.events().await {
            Ok(events) => events,
            Err(error) => {
                debug!(?error, "failed to watch adapter events");
                return;
            }
        };
        let id = peripheral.id();
        while let Some(event) = events.next().await {
            if let CentralEvent::DeviceDisconnected(disconnected) = event
                && disconnected == id
            {
                sink.emit(TransportEvent::ConnectionStateChanged {
                    status: GattStatus::Success,
                    state: LinkState::Disconnected,
                });
                return;
            }
        }
    });
}

fn matches_peer(peripheral: &Peripheral, peer: &str) -> bool {
    peripheral.address().to_string().eq_ignore_ascii_case(peer)
        || peripheral.id().to_string().eq_ignore_ascii_case(peer)
}

fn collect_services(peripheral: &Peripheral) -> Vec<ServiceInfo> {
    peripheral
        .services()
        .into_iter()
        .map(|service| {
            let characteristics = service
                .characteristics
                .iter()
                .map(|characteristic| {
                    CharacteristicInfo::new(
                        characteristic.uuid,
                        property_labels(characteristic.properties),
                        descriptor_uuids(
                            characteristic.properties,
                            characteristic
                                .descriptors
                                .iter()
                                .map(|descriptor| descriptor.uuid),
                        ),
                    )
                })
                .collect();
            ServiceInfo::new(service.uuid, service.primary, characteristics)
        })
        .collect()
}

/// Descriptor UUIDs for one characteristic.
///
/// Some platform stacks manage the CCCD themselves and leave it out of the
/// descriptor list, so it is reported for every characteristic that can
/// notify or indicate.
fn descriptor_uuids(flags: CharPropFlags, reported: impl IntoIterator<Item = Uuid>) -> Vec<Uuid> {
    let mut uuids: Vec<Uuid> = reported.into_iter().collect();
    let cccd = EndpointId::ClientCharacteristicConfiguration.uuid();
    if flags.intersects(CharPropFlags::NOTIFY | CharPropFlags::INDICATE) && !uuids.contains(&cccd)
    {
        uuids.push(cccd);
    }
    uuids
}

fn property_labels(flags: CharPropFlags) -> Vec<String> {
    let labels: Vec<String> = flags
        .iter_names()
        .map(|(name, _)| name.to_lowercase())
        .collect();
    if labels.is_empty() {
        vec!["none".to_string()]
    } else {
        labels
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    #[test]
    fn property_labels_are_lowercase_flag_names() {
        assert_eq!(
            vec!["write".to_string(), "notify".to_string()],
            property_labels(CharPropFlags::WRITE | CharPropFlags::NOTIFY)
        );
    }

    const USER_DESCRIPTION: Uuid = Uuid::from_u128(0x00002901_0000_1000_8000_00805f9b34fb);

    #[rstest]
    #[case::notify(CharPropFlags::NOTIFY)]
    #[case::indicate(CharPropFlags::INDICATE | CharPropFlags::READ)]
    fn hidden_cccd_is_reported_for_subscribable_characteristics(#[case] flags: CharPropFlags) {
        let cccd = EndpointId::ClientCharacteristicConfiguration.uuid();

        assert_eq!(
            vec![USER_DESCRIPTION, cccd],
            descriptor_uuids(flags, [USER_DESCRIPTION])
        );
        assert_eq!(vec![cccd], descriptor_uuids(flags, [cccd]));
    }

    #[test]
    fn plain_characteristics_keep_their_descriptor_list() {
        assert_eq!(
            vec![USER_DESCRIPTION],
            descriptor_uuids(CharPropFlags::READ | CharPropFlags::WRITE, [USER_DESCRIPTION])
        );
    }

    #[test]
    fn property_labels_fall_back_to_none() {
        assert_eq!(vec!["none".to_string()], property_labels(CharPropFlags::empty()));
    }
}
