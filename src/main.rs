//! evcon - evdev input monitor for the Linux console
//!
//! Opens every keyboard (and, unless disabled, every pointer) under
//! /dev/input and logs the events the input manager produces.

use anyhow::{Context, Result};
use log::{info, warn};
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use evcon::config::InputConfig;
use evcon::eloop::EventLoop;
use evcon::input::{
    InputManager, KeyCallback, KeyEvent, PointerCallback, PointerEvent, INPUT_INVALID,
};

/// Pointer bounds until a display reports its size
const POINTER_MAX: (u32, u32) = (1920, 1080);

/// Upper bound for one reactor turn, so signals are noticed
const DISPATCH_TIMEOUT: Duration = Duration::from_millis(500);

static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);

fn shutdown_requested() -> bool {
    SHUTDOWN_REQUESTED.load(Ordering::Relaxed)
}

/// SIGTERM, SIGINT and SIGHUP only set the shutdown flag
fn setup_signal_handlers() {
    unsafe {
        libc::signal(
            libc::SIGTERM,
            shutdown_signal_handler as *const () as libc::sighandler_t,
        );
        libc::signal(
            libc::SIGINT,
            shutdown_signal_handler as *const () as libc::sighandler_t,
        );
        libc::signal(
            libc::SIGHUP,
            shutdown_signal_handler as *const () as libc::sighandler_t,
        );
    }
}

extern "C" fn shutdown_signal_handler(_signo: libc::c_int) {
    SHUTDOWN_REQUESTED.store(true, Ordering::Relaxed);
}

fn print_help() {
    println!(
        r#"evcon {} - evdev input monitor for Linux console

USAGE:
    evcon [OPTIONS]

OPTIONS:
    -h, --help              Print this help message
    -V, --version           Print version information
    --no-mouse              Ignore mice, touchpads and tablets

ENVIRONMENT:
    RUST_LOG                Log filter (default: warn, use info to see events)

Needs read access to /dev/input/event* (root or the input group)."#,
        env!("CARGO_PKG_VERSION")
    );
}

/// /dev/input/event* in name order
fn scan_input_nodes() -> Result<Vec<PathBuf>> {
    let mut nodes: Vec<PathBuf> = std::fs::read_dir("/dev/input")
        .context("Failed to read /dev/input")?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .map_or(false, |n| n.starts_with("event"))
        })
        .collect();
    nodes.sort();
    Ok(nodes)
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let args: Vec<String> = std::env::args().collect();

    // --help
    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_help();
        return Ok(());
    }

    // --version
    if args.iter().any(|a| a == "--version" || a == "-V") {
        println!("evcon {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let config = InputConfig::default();
    let allow_mouse = config.mouse && !args.iter().any(|a| a == "--no-mouse");

    setup_signal_handlers();

    let eloop = EventLoop::new()?;
    let params = config.keymap_params()?;
    let manager = InputManager::new(&eloop, params, config.repeat_delay, config.repeat_rate)
        .context("Failed to create input manager")?;

    for node in scan_input_nodes()? {
        manager.add_dev(&node, allow_mouse);
    }
    info!("{} input devices", manager.device_count());

    #[cfg(target_os = "linux")]
    let _hotplug = match evcon::input::InputHotplug::attach(&manager, allow_mouse) {
        Ok(hotplug) => Some(hotplug),
        Err(e) => {
            warn!("Hotplug disabled: {:#}", e);
            None
        }
    };

    let on_key: KeyCallback = Rc::new(|_: &InputManager, event: &KeyEvent| {
        let text: String = event
            .codepoints
            .iter()
            .filter(|cp| **cp != INPUT_INVALID)
            .filter_map(|cp| char::from_u32(*cp))
            .collect();
        info!(
            "key {:?}: code={} sym={:#x} ascii={:?} mods={:?} text={:?}",
            event.action,
            event.keycode,
            event.keysym(),
            event.ascii,
            event.modifiers,
            text
        );
    });
    let on_pointer: PointerCallback = Rc::new(|_: &InputManager, event: &PointerEvent| match event {
        PointerEvent::Sync => {}
        other => info!("pointer {:?}", other),
    });
    manager.register_key_cb(on_key.clone());
    manager.register_pointer_cb(on_pointer.clone());

    manager.set_pointer_max(POINTER_MAX.0, POINTER_MAX.1);
    manager.wake_up();

    while !shutdown_requested() {
        if let Err(e) = eloop.dispatch(Some(DISPATCH_TIMEOUT)) {
            warn!("Event loop error: {:#}", e);
            break;
        }
    }

    info!("Shutting down");
    manager.sleep();
    manager.unregister_key_cb(&on_key);
    manager.unregister_pointer_cb(&on_pointer);
    Ok(())
}
