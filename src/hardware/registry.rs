/*
    fluxvault
    https://github.com/dbalsom/fluxvault

    Copyright 2024 Daniel Balsom

    Permission is hereby granted, free of charge, to any person obtaining a
    copy of this software and associated documentation files (the “Software”),
    to deal in the Software without restriction, including without limitation
    the rights to use, copy, modify, merge, publish, distribute, sublicense,
    and/or sell copies of the Software, and to permit persons to whom the
    Software is furnished to do so, subject to the following conditions:

    The above copyright notice and this permission notice shall be included in
    all copies or substantial portions of the Software.

    THE SOFTWARE IS PROVIDED “AS IS”, WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
    IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
    FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
    AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
    LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
    FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
    DEALINGS IN THE SOFTWARE.

    --------------------------------------------------------------------------

    src/hardware/registry.rs

    A bounded registry of hardware adapters with capability-based selection.
*/

use crate::{
    file_parsers::DiskImageFileFormat,
    hardware::{
        analysis::AnalysisAdapter,
        fluxengine::FluxEngineAdapter,
        greaseweazle::GreaseweazleAdapter,
        kryoflux_dtc::DtcAdapter,
        xum1541::Xum1541Adapter,
        AdapterCaps,
        HardwareAdapter,
    },
    DiskImageError,
};

/// The maximum number of adapters a registry holds.
pub const REGISTRY_CAPACITY: usize = 32;

struct Slot {
    adapter: Box<dyn HardwareAdapter>,
    initialized: bool,
}

/// The registry owns its adapters. Adapters are registered during setup; after that, lookups
/// only read the table. An adapter is initialized the first time it is acquired and cleaned up
/// on [AdapterRegistry::shutdown] or drop.
#[derive(Default)]
pub struct AdapterRegistry {
    slots: Vec<Slot>,
    preferred: Option<String>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry holding every built-in adapter with its default configuration.
    pub fn with_defaults() -> Self {
        let mut registry = AdapterRegistry::new();
        let adapters: Vec<Box<dyn HardwareAdapter>> = vec![
            Box::new(GreaseweazleAdapter::default()),
            Box::new(FluxEngineAdapter::default()),
            Box::new(DtcAdapter::default()),
            Box::new(Xum1541Adapter::default()),
            Box::new(AnalysisAdapter),
        ];
        for adapter in adapters {
            if let Err(e) = registry.register(adapter) {
                log::error!("AdapterRegistry::with_defaults(): {}", e);
            }
        }
        registry
    }

    pub fn register(&mut self, adapter: Box<dyn HardwareAdapter>) -> Result<(), DiskImageError> {
        if self.slots.iter().any(|s| s.adapter.name() == adapter.name()) {
            return Err(DiskImageError::AlreadyExists(crate::bounded_detail(format!(
                "adapter \"{}\"",
                adapter.name()
            ))));
        }
        if self.slots.len() >= REGISTRY_CAPACITY {
            return Err(DiskImageError::ResourceExhausted(format!(
                "adapter registry is full ({} entries)",
                REGISTRY_CAPACITY
            )));
        }
        log::debug!(
            "AdapterRegistry::register(): {} caps {:?} score {}",
            adapter.name(),
            adapter.capabilities(),
            adapter.capabilities().score()
        );
        self.slots.push(Slot {
            adapter,
            initialized: false,
        });
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.slots.iter().map(|s| s.adapter.name())
    }

    pub fn adapters(&self) -> impl Iterator<Item = &dyn HardwareAdapter> {
        self.slots.iter().map(|s| s.adapter.as_ref())
    }

    /// Set the adapter that selection returns whenever it satisfies the request.
    pub fn set_preferred_tool(&mut self, name: Option<&str>) {
        self.preferred = name.map(|n| n.to_string());
    }

    pub fn preferred_tool(&self) -> Option<&str> {
        self.preferred.as_deref()
    }

    /// Return the index of the best available adapter satisfying `pred`.
    fn select(&self, pred: impl Fn(&dyn HardwareAdapter) -> bool) -> Option<usize> {
        if let Some(preferred) = &self.preferred {
            if let Some(i) = self.slots.iter().position(|s| s.adapter.name() == preferred) {
                let adapter = self.slots[i].adapter.as_ref();
                if pred(adapter) && adapter.is_available() {
                    return Some(i);
                }
                log::debug!(
                    "AdapterRegistry::select(): preferred tool {} does not satisfy the request",
                    preferred
                );
            }
        }

        let mut candidates: Vec<usize> = (0..self.slots.len())
            .filter(|&i| pred(self.slots[i].adapter.as_ref()))
            .collect();
        // Highest score first; registration order breaks ties.
        candidates.sort_by_key(|&i| std::cmp::Reverse(self.slots[i].adapter.capabilities().score()));
        candidates.into_iter().find(|&i| self.slots[i].adapter.is_available())
    }

    pub fn find_by_name(&self, name: &str) -> Option<&dyn HardwareAdapter> {
        self.select(|a| a.name() == name).map(|i| self.slots[i].adapter.as_ref())
    }

    pub fn find_for_capability_set(&self, caps: AdapterCaps) -> Option<&dyn HardwareAdapter> {
        self.select(|a| a.capabilities().contains(caps))
            .map(|i| self.slots[i].adapter.as_ref())
    }

    pub fn find_for_format(&self, format: DiskImageFileFormat) -> Option<&dyn HardwareAdapter> {
        self.select(|a| a.formats().contains(&format))
            .map(|i| self.slots[i].adapter.as_ref())
    }

    /// Acquire the named adapter for exclusive use, initializing it if this is its first use.
    pub fn acquire(&mut self, name: &str) -> Result<&mut dyn HardwareAdapter, DiskImageError> {
        let Some(i) = self.select(|a| a.name() == name)
        else {
            return Err(DiskImageError::not_found(format!("adapter \"{}\" is not available", name)));
        };
        self.acquire_index(i)
    }

    /// Acquire the best available adapter with the requested capabilities.
    pub fn acquire_for(&mut self, caps: AdapterCaps) -> Result<&mut dyn HardwareAdapter, DiskImageError> {
        let Some(i) = self.select(|a| a.capabilities().contains(caps))
        else {
            return Err(DiskImageError::not_found(format!("no available adapter provides {:?}", caps)));
        };
        self.acquire_index(i)
    }

    fn acquire_index(&mut self, i: usize) -> Result<&mut dyn HardwareAdapter, DiskImageError> {
        let slot = &mut self.slots[i];
        if !slot.initialized {
            log::debug!("AdapterRegistry::acquire(): initializing {}", slot.adapter.name());
            slot.adapter.init()?;
            slot.initialized = true;
        }
        Ok(slot.adapter.as_mut())
    }

    /// Release every initialized adapter.
    pub fn shutdown(&mut self) {
        for slot in self.slots.iter_mut().filter(|s| s.initialized) {
            log::debug!("AdapterRegistry::shutdown(): releasing {}", slot.adapter.name());
            slot.adapter.cleanup();
            slot.initialized = false;
        }
    }
}

impl Drop for AdapterRegistry {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::AdapterInfo;
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    struct TestAdapter {
        name: String,
        caps: AdapterCaps,
        available: bool,
        inits: Arc<AtomicUsize>,
        cleanups: Arc<AtomicUsize>,
    }

    impl TestAdapter {
        fn new(name: &str, caps: AdapterCaps, available: bool) -> Self {
            TestAdapter {
                name: name.to_string(),
                caps,
                available,
                inits: Arc::new(AtomicUsize::new(0)),
                cleanups: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    impl HardwareAdapter for TestAdapter {
        fn name(&self) -> &str {
            &self.name
        }
        fn capabilities(&self) -> AdapterCaps {
            self.caps
        }
        fn formats(&self) -> Vec<DiskImageFileFormat> {
            vec![DiskImageFileFormat::D64]
        }
        fn init(&mut self) -> Result<(), DiskImageError> {
            self.inits.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        fn cleanup(&mut self) {
            self.cleanups.fetch_add(1, Ordering::SeqCst);
        }
        fn is_available(&self) -> bool {
            self.available
        }
        fn info(&mut self) -> Result<AdapterInfo, DiskImageError> {
            Ok(AdapterInfo {
                name: self.name.clone(),
                caps: self.caps,
                ..AdapterInfo::default()
            })
        }
    }

    fn flux_caps() -> AdapterCaps {
        AdapterCaps::READ | AdapterCaps::FLUX | AdapterCaps::HARDWARE
    }

    #[test]
    fn test_duplicate_and_capacity() {
        let mut registry = AdapterRegistry::new();
        registry
            .register(Box::new(TestAdapter::new("a", AdapterCaps::INFO, true)))
            .unwrap();
        let err = registry
            .register(Box::new(TestAdapter::new("a", AdapterCaps::INFO, true)))
            .unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::AlreadyExists);

        for i in 1..REGISTRY_CAPACITY {
            registry
                .register(Box::new(TestAdapter::new(&format!("t{}", i), AdapterCaps::INFO, true)))
                .unwrap();
        }
        let err = registry
            .register(Box::new(TestAdapter::new("overflow", AdapterCaps::INFO, true)))
            .unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::ResourceExhausted);
    }

    #[test]
    fn test_selection_prefers_score_then_availability() {
        let mut registry = AdapterRegistry::new();
        registry
            .register(Box::new(TestAdapter::new("convert", AdapterCaps::READ | AdapterCaps::CONVERT, true)))
            .unwrap();
        registry
            .register(Box::new(TestAdapter::new("offline", flux_caps() | AdapterCaps::WRITE, false)))
            .unwrap();
        registry
            .register(Box::new(TestAdapter::new("device", flux_caps(), true)))
            .unwrap();

        let found = registry.find_for_capability_set(AdapterCaps::READ).unwrap();
        assert_eq!(found.name(), "device");
        assert!(registry.find_by_name("offline").is_none());
        assert!(registry.find_for_capability_set(AdapterCaps::WRITE).is_none());
        assert_eq!(
            registry.find_for_format(DiskImageFileFormat::D64).unwrap().name(),
            "device"
        );
        assert!(registry.find_for_format(DiskImageFileFormat::G64).is_none());
    }

    #[test]
    fn test_preferred_tool() {
        let mut registry = AdapterRegistry::new();
        registry
            .register(Box::new(TestAdapter::new("device", flux_caps(), true)))
            .unwrap();
        registry
            .register(Box::new(TestAdapter::new("convert", AdapterCaps::READ | AdapterCaps::CONVERT, true)))
            .unwrap();

        registry.set_preferred_tool(Some("convert"));
        assert_eq!(registry.find_for_capability_set(AdapterCaps::READ).unwrap().name(), "convert");
        // The preferred tool is skipped when it cannot satisfy the request.
        assert_eq!(registry.find_for_capability_set(AdapterCaps::FLUX).unwrap().name(), "device");
    }

    #[test]
    fn test_lazy_init_and_shutdown() {
        let adapter = TestAdapter::new("device", flux_caps(), true);
        let inits = adapter.inits.clone();
        let cleanups = adapter.cleanups.clone();
        let mut registry = AdapterRegistry::new();
        registry.register(Box::new(adapter)).unwrap();

        assert_eq!(inits.load(Ordering::SeqCst), 0);
        registry.acquire("device").unwrap();
        registry.acquire_for(AdapterCaps::FLUX).unwrap();
        assert_eq!(inits.load(Ordering::SeqCst), 1);
        assert!(registry.acquire("missing").is_err());

        registry.shutdown();
        assert_eq!(cleanups.load(Ordering::SeqCst), 1);
        drop(registry);
        assert_eq!(cleanups.load(Ordering::SeqCst), 1);
    }
}
