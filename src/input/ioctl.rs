//! evdev ioctl wrappers
//!
//! Error-handling wrappers around the evdev query ioctls
//! (EVIOCGBIT / EVIOCGABS) to keep unsafe out of the probing code.

use anyhow::{anyhow, Result};
use std::os::unix::io::RawFd;

/// Bits in one `unsigned long` of an evdev bitmap
const LONG_BITS: usize = libc::c_ulong::BITS as usize;

/// Number of longs needed to hold `bits` bits
pub const fn nlongs(bits: usize) -> usize {
    (bits + LONG_BITS - 1) / LONG_BITS
}

/// EVIOCGBIT(ev, len)
fn eviocgbit(ev: u16, len: usize) -> libc::c_ulong {
    nix::request_code_read!(b'E', 0x20 + ev as usize, len) as libc::c_ulong
}

/// EVIOCGABS(abs)
fn eviocgabs(abs: u16) -> libc::c_ulong {
    nix::request_code_read!(
        b'E',
        0x40 + abs as usize,
        std::mem::size_of::<libc::input_absinfo>()
    ) as libc::c_ulong
}

/// Execute an ioctl command with a mutable buffer argument.
///
/// # Arguments
/// * `fd` - File descriptor
/// * `cmd` - ioctl command number
/// * `arg` - Buffer the kernel writes into
/// * `cmd_name` - Human-readable name for error messages
fn ioctl_with_mut_arg<T>(fd: RawFd, cmd: libc::c_ulong, arg: *mut T, cmd_name: &str) -> Result<()> {
    let ret = unsafe { libc::ioctl(fd, cmd as _, arg) };
    if ret < 0 {
        Err(anyhow!(
            "{} failed on fd {}: {}",
            cmd_name,
            fd,
            std::io::Error::last_os_error()
        ))
    } else {
        Ok(())
    }
}

/// evdev capability bitmap for one event type (or the type bitmap itself)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitSet {
    words: Vec<libc::c_ulong>,
}

impl BitSet {
    pub fn with_bits(bits: usize) -> Self {
        Self {
            words: vec![0; nlongs(bits)],
        }
    }

    pub fn is_set(&self, bit: u16) -> bool {
        let bit = bit as usize;
        self.words
            .get(bit / LONG_BITS)
            .map_or(false, |w| w & (1 << (bit % LONG_BITS)) != 0)
    }

    pub fn set(&mut self, bit: u16) {
        let bit = bit as usize;
        if let Some(w) = self.words.get_mut(bit / LONG_BITS) {
            *w |= 1 << (bit % LONG_BITS);
        }
    }

    /// Whether any bit in `range` is set
    pub fn any_in(&self, range: std::ops::RangeInclusive<u16>) -> bool {
        range.into_iter().any(|bit| self.is_set(bit))
    }
}

/// Read the capability bitmap of event type `ev` (0 = event types)
pub fn read_bits(fd: RawFd, ev: u16, bits: usize) -> Result<BitSet> {
    let mut set = BitSet::with_bits(bits);
    let len = set.words.len() * std::mem::size_of::<libc::c_ulong>();
    ioctl_with_mut_arg(fd, eviocgbit(ev, len), set.words.as_mut_ptr(), "EVIOCGBIT")?;
    Ok(set)
}

/// Read the calibration of absolute axis `abs`
pub fn read_absinfo(fd: RawFd, abs: u16) -> Result<libc::input_absinfo> {
    let mut info: libc::input_absinfo = unsafe { std::mem::zeroed() };
    ioctl_with_mut_arg(fd, eviocgabs(abs), &mut info as *mut _, "EVIOCGABS")?;
    Ok(info)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::codes::*;

    #[test]
    fn test_nlongs() {
        assert_eq!(nlongs(1), 1);
        assert_eq!(nlongs(LONG_BITS), 1);
        assert_eq!(nlongs(LONG_BITS + 1), 2);
        assert_eq!(nlongs(KEY_CNT), KEY_CNT / LONG_BITS);
    }

    #[test]
    fn test_bitset() {
        let mut keys = BitSet::with_bits(KEY_CNT);
        assert!(!keys.is_set(BTN_LEFT));
        keys.set(BTN_LEFT);
        assert!(keys.is_set(BTN_LEFT));
        assert!(!keys.any_in(KEY_RESERVED..=KEY_MIN_INTERESTING));
        keys.set(KEY_A);
        assert!(keys.any_in(KEY_RESERVED..=KEY_MIN_INTERESTING));
        // Out of range bits are ignored, not a panic
        assert!(!keys.is_set(0xffff));
    }

    #[test]
    #[cfg(any(target_arch = "x86_64", target_arch = "aarch64"))]
    fn test_request_codes() {
        // Values from <linux/input.h>
        assert_eq!(eviocgbit(0, 4), 0x8004_4520);
        assert_eq!(eviocgabs(ABS_X), 0x8018_4540);
    }
}
