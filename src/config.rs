//! GT911 configuration block
//!
//! The configuration occupies the register range `CONFIG_VERSION` to
//! `CONFIG_CHECKSUM - 1`.  The byte at `CONFIG_CHECKSUM` holds the two's
//! complement of the sum of the block, and the block is only trusted when
//! that byte matches [`checksum`] over the received bytes.

use crate::registers;

/// Size of the configuration block in bytes
pub const CONFIG_LEN: usize = (registers::CONFIG_CHECKSUM - registers::CONFIG_VERSION) as usize;

const fn offset(reg: u16) -> usize {
    (reg - registers::CONFIG_VERSION) as usize
}

const X_RESOLUTION: usize = offset(registers::X_OUTPUT_MAX);
const Y_RESOLUTION: usize = offset(registers::Y_OUTPUT_MAX);
const TOUCH_NUMBER: usize = offset(registers::TOUCH_NUMBER);
const MODULE_SWITCH_1: usize = offset(registers::MODULE_SWITCH_1);
const REFRESH_RATE: usize = offset(registers::REFRESH_RATE);

/// Checksum used by the configuration block: `~sum + 1` over all bytes
pub fn checksum(bytes: &[u8]) -> u8 {
    let sum = bytes.iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
    (!sum).wrapping_add(1)
}

/// Raw configuration block
///
/// Multi-byte fields are little-endian on the device.
#[derive(Clone, PartialEq, Eq)]
pub struct Config {
    bytes: [u8; CONFIG_LEN],
}

impl Config {
    /// Wrap a block read from the device
    pub fn from_bytes(bytes: [u8; CONFIG_LEN]) -> Config {
        Config { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; CONFIG_LEN] {
        &self.bytes
    }

    /// Checksum over the bytes currently held
    pub fn checksum(&self) -> u8 {
        checksum(&self.bytes)
    }

    pub fn version(&self) -> u8 {
        self.bytes[0]
    }

    /// Maximum X output value
    pub fn x_resolution(&self) -> u16 {
        self.u16_at(X_RESOLUTION)
    }

    pub fn set_x_resolution(&mut self, v: u16) {
        self.set_u16_at(X_RESOLUTION, v)
    }

    /// Maximum Y output value
    pub fn y_resolution(&self) -> u16 {
        self.u16_at(Y_RESOLUTION)
    }

    pub fn set_y_resolution(&mut self, v: u16) {
        self.set_u16_at(Y_RESOLUTION, v)
    }

    /// Number of simultaneous touches reported (low nibble)
    pub fn touch_number(&self) -> u8 {
        self.bytes[TOUCH_NUMBER] & 0x0F
    }

    pub fn set_touch_number(&mut self, n: u8) {
        self.bytes[TOUCH_NUMBER] = (self.bytes[TOUCH_NUMBER] & 0xF0) | (n & 0x0F);
    }

    /// Module switch 1; the low two bits select the INT trigger edge
    pub fn module_switch_1(&self) -> u8 {
        self.bytes[MODULE_SWITCH_1]
    }

    /// Coordinate report period is `5 + refresh_rate` ms
    pub fn refresh_rate(&self) -> u8 {
        self.bytes[REFRESH_RATE] & 0x0F
    }

    fn u16_at(&self, at: usize) -> u16 {
        u16::from_le_bytes([self.bytes[at], self.bytes[at + 1]])
    }

    fn set_u16_at(&mut self, at: usize, v: u16) {
        self.bytes[at..at + 2].copy_from_slice(&v.to_le_bytes());
    }
}

impl core::fmt::Debug for Config {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Config")
            .field("version", &self.version())
            .field("x_resolution", &self.x_resolution())
            .field("y_resolution", &self.y_resolution())
            .field("touch_number", &self.touch_number())
            .field("checksum", &self.checksum())
            .finish()
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for Config {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(
            f,
            "Config {{ version: {}, x_resolution: {}, y_resolution: {}, touch_number: {} }}",
            self.version(),
            self.x_resolution(),
            self.y_resolution(),
            self.touch_number()
        )
    }
}
