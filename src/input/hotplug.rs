//! Input hotplug
//!
//! Monitors udev for input devices appearing and disappearing and feeds
//! the evdev nodes to the input manager.

use anyhow::{anyhow, Context, Result};
use log::{debug, info};
use std::cell::RefCell;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

use super::manager::InputManager;
use crate::eloop::{FdSource, Readiness};

/// What a udev event means for the manager
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HotplugAction {
    Add(PathBuf),
    Remove(PathBuf),
}

/// Only /dev/input/event* nodes are of interest
fn is_evdev_node(node: &Path) -> bool {
    node.file_name()
        .and_then(|n| n.to_str())
        .map_or(false, |n| n.starts_with("event"))
}

/// Map a udev action + devnode to a manager action
pub fn classify(action: &str, devnode: Option<&Path>) -> Option<HotplugAction> {
    let node = devnode.filter(|n| is_evdev_node(n))?;
    match action {
        "add" => Some(HotplugAction::Add(node.to_path_buf())),
        "remove" => Some(HotplugAction::Remove(node.to_path_buf())),
        _ => None,
    }
}

/// udev monitor attached to a manager's event loop
pub struct InputHotplug {
    _source: FdSource,
}

impl InputHotplug {
    /// Start watching the `input` subsystem. New devices are added with
    /// `allow_mouse`; the monitor stops when the returned value is dropped.
    pub fn attach(manager: &InputManager, allow_mouse: bool) -> Result<Self> {
        let socket = udev::MonitorBuilder::new()
            .context("Failed to create udev monitor builder")?
            .match_subsystem("input")
            .context("Failed to match input subsystem")?
            .listen()
            .context("Failed to start udev monitor")?;
        let fd = socket.as_raw_fd();
        // The registration owns the socket
        let socket = RefCell::new(socket);

        let weak = manager.downgrade();
        let source = manager
            .event_loop()
            .add_fd(fd, Readiness::READABLE, move |_| {
                let Some(manager) = weak.upgrade() else {
                    return;
                };
                let mut socket = socket.borrow_mut();
                for event in socket.iter() {
                    let action = event.action().and_then(|a| a.to_str()).unwrap_or("");
                    match classify(action, event.devnode()) {
                        Some(HotplugAction::Add(node)) => {
                            debug!("udev: input device added: {}", node.display());
                            manager.add_dev(&node, allow_mouse);
                        }
                        Some(HotplugAction::Remove(node)) => {
                            debug!("udev: input device removed: {}", node.display());
                            manager.remove_dev(&node);
                        }
                        None => {}
                    }
                }
            })
            .map_err(|e| anyhow!("Failed to watch udev monitor: {:#}", e))?;

        info!("Input hotplug monitor initialized");
        Ok(Self { _source: source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify() {
        let node = Path::new("/dev/input/event3");
        assert_eq!(classify("add", Some(node)), Some(HotplugAction::Add(node.to_path_buf())));
        assert_eq!(
            classify("remove", Some(node)),
            Some(HotplugAction::Remove(node.to_path_buf()))
        );
        assert_eq!(classify("change", Some(node)), None);
        assert_eq!(classify("add", Some(Path::new("/dev/input/mouse0"))), None);
        assert_eq!(classify("add", None), None);
    }
}
