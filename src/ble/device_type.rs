//! Device type classification.
//!
//! iREd peripherals do not advertise a product type field, so the device
//! type is derived from the advertised local name.

/// The kind of biometric peripheral.
///
/// `None` and `AllDevices` are not real peripherals: `None` marks an
/// unrecognised advertisement and `AllDevices` is the wildcard scan target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DeviceType {
    /// Infrared thermometer.
    Thermometer,
    /// Pulse oximeter (SpO2, pulse rate, perfusion index).
    Oximeter,
    /// Blood-pressure cuff.
    Sphygmometer,
    /// Body scale.
    Scale,
    /// Smart jump rope.
    JumpRope,
    /// Chest heart-rate belt.
    HeartRateBelt,
    /// Unrecognised device.
    #[default]
    None,
    /// Wildcard scan target matching every recognised type.
    AllDevices,
}

/// Name fragments and the device type they identify, in match order.
const NAME_TABLE: &[(&str, DeviceType)] = &[
    ("AOJ-20A", DeviceType::Thermometer),
    ("iREd_THERM", DeviceType::Thermometer),
    ("AAA002", DeviceType::Scale),
    ("AOJ-30B", DeviceType::Sphygmometer),
    ("iREd_BPM", DeviceType::Sphygmometer),
    ("AOJ-70B", DeviceType::Oximeter),
    ("iREd_OXI", DeviceType::Oximeter),
    ("QN-Rope", DeviceType::JumpRope),
    ("CL8", DeviceType::HeartRateBelt),
];

impl DeviceType {
    /// Every concrete peripheral type.
    pub const CONCRETE: [DeviceType; 6] = [
        DeviceType::Thermometer,
        DeviceType::Oximeter,
        DeviceType::Sphygmometer,
        DeviceType::Scale,
        DeviceType::JumpRope,
        DeviceType::HeartRateBelt,
    ];

    /// Classify an advertised peripheral name.
    pub fn from_name(name: &str) -> Self {
        NAME_TABLE
            .iter()
            .find(|(fragment, _)| name.contains(fragment))
            .map(|(_, device_type)| *device_type)
            .unwrap_or(DeviceType::None)
    }

    /// Whether this is a real peripheral type.
    pub fn is_concrete(&self) -> bool {
        !matches!(self, Self::None | Self::AllDevices)
    }

    /// Whether a scan targeting `self` accepts a device of type `other`.
    pub fn accepts(&self, other: DeviceType) -> bool {
        other.is_concrete() && (*self == other || *self == DeviceType::AllDevices)
    }

    /// Clinical devices report to the health observer.
    pub fn is_clinical(&self) -> bool {
        matches!(
            self,
            Self::Thermometer | Self::Oximeter | Self::Sphygmometer | Self::Scale
        )
    }

    /// Activity devices report to the sport observer.
    pub fn is_activity(&self) -> bool {
        matches!(self, Self::JumpRope | Self::HeartRateBelt | Self::Scale)
    }

    /// Whether the device supports a recording session.
    pub fn is_recordable(&self) -> bool {
        matches!(self, Self::JumpRope | Self::HeartRateBelt)
    }
}

impl std::fmt::Display for DeviceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Thermometer => "Thermometer",
            Self::Oximeter => "Oximeter",
            Self::Sphygmometer => "Sphygmometer",
            Self::Scale => "Scale",
            Self::JumpRope => "JumpRope",
            Self::HeartRateBelt => "HeartRate",
            Self::None => "None",
            Self::AllDevices => "All iRED Devices",
        };
        write!(f, "{}", name)
    }
}
