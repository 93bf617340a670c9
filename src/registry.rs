//! Device registry: one GPU device context per physical adapter.
//!
//! The registry is generic over a [`DeviceHost`] so the creation,
//! monitor→adapter resolution, and removed-state probing can be swapped
//! out (the Windows host in the platform layer, mocks in tests). All map
//! mutation — including recreate-on-loss — happens inside the registry's
//! single lock, since hot-plug or concurrent capture calls can race on
//! first-time creation.

use std::hash::Hash;
use std::sync::{Arc, Mutex};

use log::debug;
use rustc_hash::FxHashMap;

use crate::error::{CaptureError, CaptureResult};
use crate::policy::HdrSettings;

/// Platform hooks the registry needs to manage devices.
pub(crate) trait DeviceHost {
    type AdapterId: Copy + Eq + Hash;
    type Device;

    /// Resolve the adapter driving the given monitor.
    /// Fails `MonitorNotFound` when the handle matches no enumerated
    /// output (stale mapping after a display change).
    fn adapter_for_monitor(
        &self,
        handle: isize,
        device_name: &str,
    ) -> CaptureResult<Self::AdapterId>;

    /// Create a device (plus whatever per-device state the platform
    /// binds to it: shaders, sampler, input layout).
    fn create_device(&self, adapter: Self::AdapterId) -> CaptureResult<Self::Device>;

    /// Whether the device has entered a non-recoverable removed state.
    fn device_removed(&self, device: &Self::Device) -> bool;
}

pub(crate) struct DeviceRegistry<H: DeviceHost> {
    host: H,
    devices: Mutex<FxHashMap<H::AdapterId, Arc<H::Device>>>,
}

impl<H: DeviceHost> DeviceRegistry<H> {
    pub(crate) fn new(host: H) -> Self {
        Self {
            host,
            devices: Mutex::new(FxHashMap::default()),
        }
    }

    pub(crate) fn host(&self) -> &H {
        &self.host
    }

    /// Return the device context for the adapter driving `handle`,
    /// creating it exactly once per adapter. A device observed in the
    /// removed state is disposed and recreated transparently.
    pub(crate) fn device_for_monitor(
        &self,
        handle: isize,
        device_name: &str,
    ) -> CaptureResult<Arc<H::Device>> {
        let adapter = self.host.adapter_for_monitor(handle, device_name)?;
        self.device_for_adapter(adapter)
    }

    pub(crate) fn device_for_adapter(
        &self,
        adapter: H::AdapterId,
    ) -> CaptureResult<Arc<H::Device>> {
        let mut devices = lock_devices(&self.devices)?;

        if let Some(existing) = devices.get(&adapter) {
            if !self.host.device_removed(existing) {
                return Ok(Arc::clone(existing));
            }
            debug!("device registry: recreating removed device");
            devices.remove(&adapter);
        }

        let created = Arc::new(self.host.create_device(adapter)?);
        devices.insert(adapter, Arc::clone(&created));
        Ok(created)
    }

    /// Apply the retention policy after a capture: devices persist only
    /// when the performance mode keeps them.
    pub(crate) fn release_cached(&self, settings: &HdrSettings) -> CaptureResult<()> {
        if !settings.save_devices() {
            self.purge()?;
        }
        Ok(())
    }

    /// Drop every cached device. Used by the retention policy and by the
    /// engine's full reinitialization path.
    pub(crate) fn purge(&self) -> CaptureResult<()> {
        lock_devices(&self.devices)?.clear();
        Ok(())
    }

    #[cfg(test)]
    fn cached_count(&self) -> usize {
        self.devices.lock().unwrap().len()
    }
}

impl<H: DeviceHost> crate::plan::AdapterResolver for DeviceRegistry<H> {
    type AdapterId = H::AdapterId;

    fn adapter_for_monitor(
        &self,
        handle: isize,
        device_name: &str,
    ) -> CaptureResult<Self::AdapterId> {
        self.host.adapter_for_monitor(handle, device_name)
    }
}

fn lock_devices<K, V>(
    devices: &Mutex<FxHashMap<K, V>>,
) -> CaptureResult<std::sync::MutexGuard<'_, FxHashMap<K, V>>> {
    devices
        .lock()
        .map_err(|_| CaptureError::Platform(anyhow::anyhow!("device registry mutex was poisoned")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::PerformanceMode;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct MockDevice {
        id: usize,
        removed: AtomicBool,
    }

    struct MockHost {
        created: AtomicUsize,
        fail_creation: bool,
    }

    impl MockHost {
        fn new() -> Self {
            Self {
                created: AtomicUsize::new(0),
                fail_creation: false,
            }
        }
    }

    impl DeviceHost for MockHost {
        type AdapterId = u64;
        type Device = MockDevice;

        fn adapter_for_monitor(
            &self,
            handle: isize,
            device_name: &str,
        ) -> CaptureResult<Self::AdapterId> {
            // Monitors 1 and 2 share adapter 10, monitor 3 lives on 20,
            // anything else is unknown.
            match handle {
                1 | 2 => Ok(10),
                3 => Ok(20),
                _ => Err(CaptureError::MonitorNotFound(device_name.to_string())),
            }
        }

        fn create_device(&self, _adapter: Self::AdapterId) -> CaptureResult<Self::Device> {
            if self.fail_creation {
                return Err(CaptureError::NoDeviceAvailable);
            }
            let id = self.created.fetch_add(1, Ordering::SeqCst);
            Ok(MockDevice {
                id,
                removed: AtomicBool::new(false),
            })
        }

        fn device_removed(&self, device: &Self::Device) -> bool {
            device.removed.load(Ordering::SeqCst)
        }
    }

    #[test]
    fn one_device_per_adapter() {
        let registry = DeviceRegistry::new(MockHost::new());
        let a = registry.device_for_monitor(1, "\\\\.\\DISPLAY1").unwrap();
        let b = registry.device_for_monitor(2, "\\\\.\\DISPLAY2").unwrap();
        let c = registry.device_for_monitor(3, "\\\\.\\DISPLAY3").unwrap();
        assert_eq!(a.id, b.id);
        assert_ne!(a.id, c.id);
        assert_eq!(registry.cached_count(), 2);
    }

    #[test]
    fn removed_device_is_recreated_transparently() {
        let registry = DeviceRegistry::new(MockHost::new());
        let first = registry.device_for_monitor(1, "\\\\.\\DISPLAY1").unwrap();
        first.removed.store(true, Ordering::SeqCst);

        // Next access must succeed with a fresh device, no caller-visible
        // error.
        let second = registry.device_for_monitor(1, "\\\\.\\DISPLAY1").unwrap();
        assert_ne!(first.id, second.id);
        assert!(!registry.host().device_removed(&second));
    }

    #[test]
    fn unknown_monitor_fails_with_monitor_not_found() {
        let registry = DeviceRegistry::new(MockHost::new());
        assert!(matches!(
            registry.device_for_monitor(99, "\\\\.\\DISPLAY9"),
            Err(CaptureError::MonitorNotFound(_))
        ));
    }

    #[test]
    fn creation_failure_surfaces_no_device_available() {
        let mut host = MockHost::new();
        host.fail_creation = true;
        let registry = DeviceRegistry::new(host);
        assert!(matches!(
            registry.device_for_monitor(1, "\\\\.\\DISPLAY1"),
            Err(CaptureError::NoDeviceAvailable)
        ));
    }

    #[test]
    fn retention_policy_controls_device_persistence() {
        let registry = DeviceRegistry::new(MockHost::new());
        registry.device_for_monitor(1, "\\\\.\\DISPLAY1").unwrap();

        let keep = HdrSettings {
            performance_mode: PerformanceMode::Balanced,
            ..HdrSettings::default()
        };
        registry.release_cached(&keep).unwrap();
        assert_eq!(registry.cached_count(), 1);

        let drop_all = HdrSettings {
            performance_mode: PerformanceMode::LowMemory,
            ..HdrSettings::default()
        };
        registry.release_cached(&drop_all).unwrap();
        assert_eq!(registry.cached_count(), 0);
    }
}
