//! Persisted identity of the last paired peripheral per device type.

use parking_lot::RwLock;
use std::collections::HashMap;

use crate::ble::DeviceType;
use crate::error::Result;

/// Identity captured when a peripheral was paired.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PairedIdentity {
    /// Transport identifier used to find the peripheral again.
    pub identifier: String,
    /// Display name.
    pub name: Option<String>,
    /// MAC address, when the device advertises one.
    pub mac_address: Option<String>,
}

impl PairedIdentity {
    /// Create an identity with only an identifier.
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            name: None,
            mac_address: None,
        }
    }
}

/// Storage for one [`PairedIdentity`] per device type.
#[cfg_attr(test, mockall::automock)]
pub trait IdentityStore: Send + Sync {
    /// Stored identity for a device type.
    fn load(&self, device_type: DeviceType) -> Result<Option<PairedIdentity>>;

    /// Store an identity, replacing any previous one.
    fn save(&self, device_type: DeviceType, identity: &PairedIdentity) -> Result<()>;

    /// Forget the identity for a device type.
    fn clear(&self, device_type: DeviceType) -> Result<()>;
}

/// In-memory identity store.
#[derive(Debug, Default)]
pub struct MemoryIdentityStore {
    identities: RwLock<HashMap<DeviceType, PairedIdentity>>,
}

impl MemoryIdentityStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl IdentityStore for MemoryIdentityStore {
    fn load(&self, device_type: DeviceType) -> Result<Option<PairedIdentity>> {
        Ok(self.identities.read().get(&device_type).cloned())
    }

    fn save(&self, device_type: DeviceType, identity: &PairedIdentity) -> Result<()> {
        self.identities.write().insert(device_type, identity.clone());
        Ok(())
    }

    fn clear(&self, device_type: DeviceType) -> Result<()> {
        self.identities.write().remove(&device_type);
        Ok(())
    }
}

#[cfg(feature = "serde")]
pub use json::JsonFileIdentityStore;

#[cfg(feature = "serde")]
mod json {
    use parking_lot::Mutex;
    use std::collections::BTreeMap;
    use std::fs;
    use std::io::ErrorKind;
    use std::path::{Path, PathBuf};
    use tracing::debug;

    use super::{IdentityStore, PairedIdentity};
    use crate::ble::DeviceType;
    use crate::error::Result;

    type Document = BTreeMap<DeviceType, PairedIdentity>;

    /// Identity store backed by one JSON document.
    #[derive(Debug)]
    pub struct JsonFileIdentityStore {
        path: PathBuf,
        lock: Mutex<()>,
    }

    impl JsonFileIdentityStore {
        /// Use the document at `path`. The file is created on first save.
        pub fn new(path: impl Into<PathBuf>) -> Self {
            Self {
                path: path.into(),
                lock: Mutex::new(()),
            }
        }

        /// Location of the document.
        pub fn path(&self) -> &Path {
            &self.path
        }

        fn read(&self) -> Result<Document> {
            match fs::read_to_string(&self.path) {
                Ok(contents) if contents.trim().is_empty() => Ok(Document::new()),
                Ok(contents) => Ok(serde_json::from_str(&contents)?),
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(Document::new()),
                Err(e) => Err(e.into()),
            }
        }

        fn write(&self, document: &Document) -> Result<()> {
            if let Some(parent) = self.path.parent() {
                if !parent.as_os_str().is_empty() {
                    fs::create_dir_all(parent)?;
                }
            }
            let json = serde_json::to_string_pretty(document)?;
            fs::write(&self.path, json)?;
            debug!("Saved paired identities to {}", self.path.display());
            Ok(())
        }
    }

    impl IdentityStore for JsonFileIdentityStore {
        fn load(&self, device_type: DeviceType) -> Result<Option<PairedIdentity>> {
            let _guard = self.lock.lock();
            Ok(self.read()?.remove(&device_type))
        }

        fn save(&self, device_type: DeviceType, identity: &PairedIdentity) -> Result<()> {
            let _guard = self.lock.lock();
            let mut document = self.read()?;
            document.insert(device_type, identity.clone());
            self.write(&document)
        }

        fn clear(&self, device_type: DeviceType) -> Result<()> {
            let _guard = self.lock.lock();
            let mut document = self.read()?;
            if document.remove(&device_type).is_some() {
                self.write(&document)?;
            }
            Ok(())
        }
    }

}
