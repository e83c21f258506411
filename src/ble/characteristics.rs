//! Characteristic dispatch.
//!
//! After service discovery, decides which characteristics to discover per
//! service, which to subscribe to, which initial commands to write and which
//! to read. Plans are plain data so the orchestrator can log and execute
//! them through any [`BleTransport`].

use tracing::{debug, trace};
use uuid::Uuid;

use crate::ble::transport::{BleTransport, DiscoveredCharacteristic};
use crate::ble::uuids::{
    characteristic_filter, notify_characteristics, JUMP_ROPE_WRITE_UUID,
    THERMOMETER_QUERY_COMMAND, THERMOMETER_WRITE_UUID,
};
use crate::ble::DeviceType;
use crate::protocol::{DeviceCommand, JumpRopeMode, ProtocolDecoder};

/// One step of the dispatch sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchAction {
    /// Discover characteristics of a service.
    DiscoverCharacteristics {
        /// Service to enumerate.
        service: Uuid,
        /// Allow-list, or `None` for every characteristic.
        filter: Option<&'static [Uuid]>,
    },
    /// Enable notifications.
    EnableNotify(Uuid),
    /// Write a value without waiting for acknowledgment.
    Write {
        /// Target characteristic.
        characteristic: Uuid,
        /// Payload.
        value: Vec<u8>,
    },
    /// Request a read.
    Read(Uuid),
}

/// Characteristic discovery requests for the discovered services.
pub fn plan_services(device_type: DeviceType, services: &[Uuid]) -> Vec<DispatchAction> {
    let filter = characteristic_filter(device_type);
    services
        .iter()
        .map(|service| DispatchAction::DiscoverCharacteristics {
            service: *service,
            filter,
        })
        .collect()
}

/// Subscribe, command and read steps for the discovered characteristics.
///
/// Per characteristic the order is: enable notifications, write the initial
/// command, then read. Characteristics outside the type's allow-list are
/// skipped.
pub fn plan_characteristics(
    device_type: DeviceType,
    characteristics: &[DiscoveredCharacteristic],
    decoder: Option<&dyn ProtocolDecoder>,
) -> Vec<DispatchAction> {
    let allowed = characteristic_filter(device_type);
    let notify = notify_characteristics(device_type);
    let mut actions = Vec::new();

    for characteristic in characteristics {
        let uuid = characteristic.uuid;
        if let Some(allowed) = allowed {
            if !allowed.contains(&uuid) {
                trace!("Skipping characteristic {} for {}", uuid, device_type);
                continue;
            }
        }

        if notify.contains(&uuid) {
            actions.push(DispatchAction::EnableNotify(uuid));
        }

        for value in initial_commands(device_type, uuid, decoder) {
            actions.push(DispatchAction::Write {
                characteristic: uuid,
                value,
            });
        }

        actions.push(DispatchAction::Read(uuid));
    }

    actions
}

fn initial_commands(
    device_type: DeviceType,
    characteristic: Uuid,
    decoder: Option<&dyn ProtocolDecoder>,
) -> Vec<Vec<u8>> {
    match (device_type, characteristic) {
        (DeviceType::Thermometer, uuid) if uuid == THERMOMETER_WRITE_UUID => {
            vec![THERMOMETER_QUERY_COMMAND.to_vec()]
        }
        (DeviceType::JumpRope, uuid) if uuid == JUMP_ROPE_WRITE_UUID => {
            let Some(decoder) = decoder else {
                debug!("No jump rope decoder registered, skipping initial commands");
                return Vec::new();
            };
            [
                DeviceCommand::QueryBattery,
                DeviceCommand::SetJumpRopeMode {
                    mode: JumpRopeMode::Free,
                    setting: 0,
                },
            ]
            .iter()
            .filter_map(|command| decoder.encode_command(command))
            .collect()
        }
        _ => Vec::new(),
    }
}

/// Issue a plan through the transport.
pub fn execute(transport: &dyn BleTransport, identifier: &str, actions: &[DispatchAction]) {
    for action in actions {
        trace!("Dispatch {}: {:?}", identifier, action);
        match action {
            DispatchAction::DiscoverCharacteristics { service, filter } => {
                transport.discover_characteristics(identifier, *service, *filter)
            }
            DispatchAction::EnableNotify(uuid) => transport.set_notify(identifier, *uuid, true),
            DispatchAction::Write {
                characteristic,
                value,
            } => transport.write_value(identifier, *characteristic, value, false),
            DispatchAction::Read(uuid) => transport.read_value(identifier, *uuid),
        }
    }
}
