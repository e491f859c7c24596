//! Video backend registry
//!
//! Display backends (DRM, fbdev, ...) register a `VideoModule` under a
//! unique name. The registry is a plain object owned by whoever sets up
//! the console; there is no global list.

use anyhow::{bail, Result};
use log::{debug, info};
use std::path::Path;
use std::rc::Rc;

/// An opened display
pub trait VideoDisplay {
    /// Take over the display (VT switched to us)
    fn wake_up(&mut self) -> Result<()>;

    /// Release the display (VT switched away)
    fn sleep(&mut self);

    fn is_awake(&self) -> bool;
}

/// A display backend
pub trait VideoModule {
    /// Unique backend name, e.g. "drm"
    fn name(&self) -> &str;

    /// Open the display device at `node`
    fn open(&self, node: &Path) -> Result<Box<dyn VideoDisplay>>;
}

/// Registered video backends, in registration order
#[derive(Default)]
pub struct VideoRegistry {
    modules: Vec<Rc<dyn VideoModule>>,
}

impl VideoRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a backend; names must be unique
    pub fn register(&mut self, module: Rc<dyn VideoModule>) -> Result<()> {
        if module.name().is_empty() {
            bail!("video backend without a name");
        }
        if self.find(module.name()).is_some() {
            bail!("video backend \"{}\" already registered", module.name());
        }
        info!("video backend registered: {}", module.name());
        self.modules.push(module);
        Ok(())
    }

    /// Remove the backend called `name`; returns whether it was present
    pub fn unregister(&mut self, name: &str) -> bool {
        match self.modules.iter().position(|m| m.name() == name) {
            Some(pos) => {
                self.modules.remove(pos);
                debug!("video backend unregistered: {}", name);
                true
            }
            None => false,
        }
    }

    pub fn find(&self, name: &str) -> Option<Rc<dyn VideoModule>> {
        self.modules.iter().find(|m| m.name() == name).cloned()
    }

    /// Backend used when none is configured: the first one registered
    pub fn default_module(&self) -> Option<Rc<dyn VideoModule>> {
        self.modules.first().cloned()
    }

    pub fn names(&self) -> Vec<&str> {
        self.modules.iter().map(|m| m.name()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeDisplay {
        awake: bool,
    }

    impl VideoDisplay for FakeDisplay {
        fn wake_up(&mut self) -> Result<()> {
            self.awake = true;
            Ok(())
        }

        fn sleep(&mut self) {
            self.awake = false;
        }

        fn is_awake(&self) -> bool {
            self.awake
        }
    }

    struct FakeModule(&'static str);

    impl VideoModule for FakeModule {
        fn name(&self) -> &str {
            self.0
        }

        fn open(&self, node: &Path) -> Result<Box<dyn VideoDisplay>> {
            if !node.starts_with("/dev") {
                bail!("not a device node: {}", node.display());
            }
            Ok(Box::new(FakeDisplay { awake: false }))
        }
    }

    #[test]
    fn test_register_and_find() {
        let mut registry = VideoRegistry::new();
        assert!(registry.default_module().is_none());

        registry.register(Rc::new(FakeModule("drm"))).unwrap();
        registry.register(Rc::new(FakeModule("fbdev"))).unwrap();
        assert_eq!(registry.names(), vec!["drm", "fbdev"]);
        assert_eq!(registry.default_module().unwrap().name(), "drm");
        assert_eq!(registry.find("fbdev").unwrap().name(), "fbdev");
        assert!(registry.find("vnc").is_none());
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let mut registry = VideoRegistry::new();
        registry.register(Rc::new(FakeModule("drm"))).unwrap();
        assert!(registry.register(Rc::new(FakeModule("drm"))).is_err());
        assert!(registry.register(Rc::new(FakeModule(""))).is_err());
        assert_eq!(registry.names().len(), 1);
    }

    #[test]
    fn test_unregister() {
        let mut registry = VideoRegistry::new();
        registry.register(Rc::new(FakeModule("drm"))).unwrap();
        registry.register(Rc::new(FakeModule("fbdev"))).unwrap();
        assert!(registry.unregister("drm"));
        assert!(!registry.unregister("drm"));
        assert_eq!(registry.default_module().unwrap().name(), "fbdev");
    }

    #[test]
    fn test_open_display() {
        let mut registry = VideoRegistry::new();
        registry.register(Rc::new(FakeModule("drm"))).unwrap();
        let module = registry.default_module().unwrap();

        let mut display = module.open(Path::new("/dev/dri/card0")).unwrap();
        assert!(!display.is_awake());
        display.wake_up().unwrap();
        assert!(display.is_awake());
        display.sleep();
        assert!(!display.is_awake());

        assert!(module.open(Path::new("/tmp/card0")).is_err());
    }
}
