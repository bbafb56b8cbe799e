//! GT911 capacitive multi-touch controller device driver
//!
//! This crate provides a device driver for the Goodix GT911 capacitive
//! touch controller, plus a [`TouchSession`] that turns the controller's
//! per-poll contact reports into stable per-finger slot events.
//!
//! The GT911 connects to the target via I2C and two GPIO pins (INT and RST).
//! The [`embedded_hal`](https://docs.rs/embedded-hal) `blocking::i2c`,
//! `blocking::delay` and `digital::v2` interfaces are used, so should work
//! with any target that provides these.
//!
//! A GT911 device is created with:
//!
//! ```rust,ignore
//!     let mut gt = gt911::Gt911::new(i2c, gt911::DEFAULT_I2C_ADDR);
//!     gt.initialize(&mut int_pin, &mut rst_pin, &mut delay)?;
//!     // INT now belongs to the platform: make it a floating input with a
//!     // falling edge interrupt that calls `TOUCH_PENDING.raise()`
//!     let config = gt.read_config()?;
//!     info!("{}x{}", config.x_resolution(), config.y_resolution());
//! ```
//!
//! Most users want the [`TouchSession`], which performs the start-up
//! sequence and forwards finger events to a [`TouchSink`]:
//!
//! ```rust,ignore
//!     static TOUCH_PENDING: gt911::PendingFlag = gt911::PendingFlag::new();
//!
//!     let mut session: gt911::TouchSession<_, _, 2> = gt911::TouchSession::start(
//!         gt,
//!         &mut int_pin,
//!         &mut rst_pin,
//!         &mut delay,
//!         gt911::Trigger::Interrupt(&TOUCH_PENDING),
//!         gt911::SessionConfig::default(),
//!         hid_touchscreen,
//!     )?;
//!     loop {
//!         if session.service(&mut delay).is_err() {
//!             // slots are unchanged, the next trigger retries
//!         }
//!     }
//! ```

#![cfg_attr(not(test), no_std)]

use embedded_hal::blocking::delay::{DelayMs, DelayUs};
use embedded_hal::digital::v2::OutputPin;
use paste;

pub mod config;
pub mod irq;
pub mod registers;
pub mod session;

pub use config::{checksum, Config, CONFIG_LEN};
pub use irq::PendingFlag;
pub use session::{SessionConfig, Slot, TouchSession, TouchSink, Trigger};

/// Errors produced by the GT911 device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// An error accessing the GPIO pins
    GPIOError,
    /// The device did not acknowledge a transmission
    BusError,
    /// A register read failed or returned short
    TransportError,
    /// The configuration block failed checksum validation
    ConfigInvalid,
}

pub type Result<T> = core::result::Result<T, Error>;

/// Default I2C device address (INT held low during reset)
pub const DEFAULT_I2C_ADDR: u8 = 0x5D;

/// Alternate I2C device address (INT held high during reset)
pub const ALT_I2C_ADDR: u8 = 0x14;

/// Maximum number of contacts the device reports
pub const MAX_CONTACTS: u8 = 5;

/// Size of one contact record in the coordinate table
pub const CONTACT_LEN: usize = 8;

/// Budget for waiting on the coordinate status register, in ms
pub const CONTACT_POLL_MS: u32 = 20;

/// Coordinate status: buffer ready
const STATUS_BUFFER_READY: u8 = 1 << 7;
/// Coordinate status: number of touch points
const STATUS_CONTACTS: u8 = 0x0F;

const INFO_LEN: usize = 11;

/// Value written to `CONFIG_FRESH` to make the device load a new block
const CONFIG_FRESH_APPLY: u8 = 1;

const _: () = assert!(registers::CONFIG_FRESH == registers::CONFIG_CHECKSUM + 1);

/// GT911 driver
pub struct Gt911<I2C> {
    i2c: I2C,
    addr: u8,
    config: Option<Config>,
}

/// Product and version information of the GT911 device
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DeviceInfo {
    /// ASCII product id, e.g. `b"911\0"`
    pub product_id: [u8; 4],
    pub firmware_version: u16,
    /// Contents of the X output max register
    pub x_resolution: u16,
    /// Contents of the Y output max register
    pub y_resolution: u16,
    pub vendor_id: u8,
}

/// One entry of the coordinate table
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Contact {
    /// Device assigned track id; reused once a finger lifts
    pub track_id: u8,
    pub x: u16,
    pub y: u16,
    pub area: u16,
}

impl Contact {
    fn from_iter<'a, I: core::iter::Iterator<Item = &'a u8>>(i: &mut I) -> Option<Contact> {
        let contact = Contact {
            track_id: *i.next()?,
            x: u16_le_from_iter(i)?,
            y: u16_le_from_iter(i)?,
            area: u16_le_from_iter(i)?,
        };
        // reserved
        i.next()?;
        Some(contact)
    }
}

/// Contacts read in one pass
#[derive(Debug, Default, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ContactTable {
    len: u8,
    contacts: [Contact; MAX_CONTACTS as usize],
}

impl ContactTable {
    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_slice(&self) -> &[Contact] {
        &self.contacts[..self.len as usize]
    }

    pub fn iter(&self) -> core::slice::Iter<'_, Contact> {
        self.as_slice().iter()
    }

    /// Find the contact carrying `track_id`
    pub fn find(&self, track_id: u8) -> Option<&Contact> {
        self.iter().find(|c| c.track_id == track_id)
    }

    /// Parse `count` records from a coordinate table read
    ///
    /// Returns `None` if `raw` is shorter than `count` records.
    pub fn from_bytes(raw: &[u8], count: u8) -> Option<ContactTable> {
        let count = count.min(MAX_CONTACTS);
        let mut table = ContactTable::default();
        let mut r = raw.iter();
        for slot in table.contacts.iter_mut().take(count as usize) {
            *slot = Contact::from_iter(&mut r)?;
        }
        table.len = count;
        Some(table)
    }
}

impl<I2C> Gt911<I2C> {
    /// Create a new GT911 device
    ///
    /// `addr` must be the address the reset sequence selects, either
    /// [`DEFAULT_I2C_ADDR`] or [`ALT_I2C_ADDR`].
    pub fn new(i2c: I2C, addr: u8) -> Gt911<I2C> {
        Gt911 {
            i2c,
            addr,
            config: None,
        }
    }

    pub fn address(&self) -> u8 {
        self.addr
    }

    /// The last configuration block that passed validation
    pub fn loaded_config(&self) -> Option<&Config> {
        self.config.as_ref()
    }

    /// Release the I2C bus
    pub fn release(self) -> I2C {
        self.i2c
    }

    /// Run the power-on reset sequence, latching the I2C address
    ///
    /// The level of INT on the rising edge of RST selects the address. INT
    /// is left driven low; the caller switches it back to an input.
    pub fn reset<INT, RST, D>(&mut self, int_pin: &mut INT, rst_pin: &mut RST, delay: &mut D) -> Result<()>
    where
        INT: OutputPin,
        RST: OutputPin,
        D: DelayMs<u32> + DelayUs<u32>,
    {
        delay.delay_ms(1);
        int_pin.set_low().map_err(|_| Error::GPIOError)?;
        rst_pin.set_low().map_err(|_| Error::GPIOError)?;
        delay.delay_ms(11);
        if self.addr == ALT_I2C_ADDR {
            int_pin.set_high().map_err(|_| Error::GPIOError)?;
        } else {
            int_pin.set_low().map_err(|_| Error::GPIOError)?;
        }
        delay.delay_us(110);
        rst_pin.set_high().map_err(|_| Error::GPIOError)?;
        delay.delay_ms(6);
        int_pin.set_low().map_err(|_| Error::GPIOError)?;
        delay.delay_ms(51);
        Ok(())
    }
}

impl<I2C> Gt911<I2C>
where
    I2C: embedded_hal::blocking::i2c::Write,
{
    /// Reset the GT911 and check it acknowledges its address
    pub fn initialize<INT, RST, D>(&mut self, int_pin: &mut INT, rst_pin: &mut RST, delay: &mut D) -> Result<()>
    where
        INT: OutputPin,
        RST: OutputPin,
        D: DelayMs<u32> + DelayUs<u32>,
    {
        delay.delay_ms(300);
        self.reset(int_pin, rst_pin, delay)?;
        delay.delay_ms(200);
        self.probe()
    }

    /// Address the device without transferring data
    pub fn probe(&mut self) -> Result<()> {
        let res = self
            .i2c
            .write(self.addr, &registers::PRODUCT_ID.to_be_bytes())
            .map_err(|_| Error::BusError);
        #[cfg(feature = "defmt")]
        {
            if res.is_err() {
                defmt::warn!("GT911 at {=u8:#x} did not acknowledge", self.addr);
            }
        }
        res
    }

    /// Write to a `u8` register
    pub fn write_reg_u8(&mut self, reg_num: u16, value: u8) -> Result<()> {
        self.write_bytes(reg_num, &[value])
    }

    /// Write to a `u16` register
    pub fn write_reg_u16(&mut self, reg_num: u16, value: u16) -> Result<()> {
        self.write_bytes(reg_num, &value.to_le_bytes())
    }

    fn write_bytes(&mut self, reg_num: u16, data: &[u8]) -> Result<()> {
        let mut msg = [0u8; 2 + CONFIG_LEN];
        let len = 2 + data.len();
        msg[0..2].copy_from_slice(&reg_num.to_be_bytes());
        msg[2..len].copy_from_slice(data);
        self.i2c.write(self.addr, &msg[..len]).map_err(|_| Error::BusError)
    }

    /// Write a configuration block to the device
    ///
    /// Only writes when a block has been loaded with
    /// [`read_config`](Self::read_config) and `config` differs from it by
    /// checksum. The block is followed by its checksum and the config-fresh
    /// flag, which makes the device apply it. Returns whether a write
    /// occurred.
    pub fn write_config(&mut self, config: &Config) -> Result<bool> {
        let checksum = config.checksum();
        match &self.config {
            Some(loaded) if loaded.checksum() != checksum => {}
            _ => return Ok(false),
        }
        self.write_bytes(registers::CONFIG_VERSION, config.as_bytes())?;
        // checksum and the fresh flag go out in one transfer
        self.write_bytes(registers::CONFIG_CHECKSUM, &[checksum, CONFIG_FRESH_APPLY])?;
        self.config = Some(config.clone());
        Ok(true)
    }
}

impl<I2C> Gt911<I2C>
where
    I2C: embedded_hal::blocking::i2c::WriteRead,
{
    /// Read a `u8` register
    pub fn read_reg_u8(&mut self, reg_num: u16) -> Result<u8> {
        let mut rd_buf = [0u8; 1];
        self.read_bytes(reg_num, &mut rd_buf)?;
        Ok(rd_buf[0])
    }

    /// Read a `u16` register
    pub fn read_reg_u16(&mut self, reg_num: u16) -> Result<u16> {
        let mut rd_buf = [0u8; 2];
        self.read_bytes(reg_num, &mut rd_buf)?;
        Ok(u16::from_le_bytes(rd_buf))
    }

    fn read_bytes(&mut self, reg_num: u16, rd_buf: &mut [u8]) -> Result<()> {
        self.i2c
            .write_read(self.addr, &reg_num.to_be_bytes(), rd_buf)
            .map_err(|_| Error::TransportError)
    }

    /// Read the product id, e.g. `b"911\0"`
    pub fn read_product_id(&mut self) -> Result<[u8; 4]> {
        let mut rd_buf = [0u8; 4];
        self.read_bytes(registers::PRODUCT_ID, &mut rd_buf)?;
        Ok(rd_buf)
    }

    /// Read the device information registers
    pub fn get_info(&mut self) -> Result<DeviceInfo> {
        let mut rd_buf = [0u8; INFO_LEN];
        self.read_bytes(registers::PRODUCT_ID, &mut rd_buf)?;
        let mut r = rd_buf.iter();
        let mut product_id = [0u8; 4];
        for b in product_id.iter_mut() {
            *b = next_u8(&mut r)?;
        }
        Ok(DeviceInfo {
            product_id,
            firmware_version: u16_le_from_iter(&mut r).ok_or(Error::TransportError)?,
            x_resolution: u16_le_from_iter(&mut r).ok_or(Error::TransportError)?,
            y_resolution: u16_le_from_iter(&mut r).ok_or(Error::TransportError)?,
            vendor_id: next_u8(&mut r)?,
        })
    }

    /// Read and validate the configuration block
    ///
    /// Returns `Err(Error::ConfigInvalid)` unless the checksum register
    /// matches the checksum of the block just read. A valid block is kept
    /// for [`write_config`](Self::write_config).
    pub fn read_config(&mut self) -> Result<Config> {
        let mut rd_buf = [0u8; CONFIG_LEN];
        self.read_bytes(registers::CONFIG_VERSION, &mut rd_buf)?;
        let stored = self.read_config_checksum()?;
        let config = Config::from_bytes(rd_buf);
        if stored != config.checksum() {
            #[cfg(feature = "defmt")]
            defmt::warn!(
                "config checksum mismatch: stored {=u8:#x}, computed {=u8:#x}",
                stored,
                config.checksum()
            );
            return Err(Error::ConfigInvalid);
        }
        self.config = Some(config.clone());
        Ok(config)
    }

    /// Read the number of contacts in the coordinate buffer
    ///
    /// Polls the coordinate status register for up to [`CONTACT_POLL_MS`]
    /// until the buffer is ready with a count below [`MAX_CONTACTS`], then
    /// clears the status so the device reports again. Failed status reads
    /// are retried within the budget and a failed clear still returns the
    /// count. Returns 0 if no report became ready in time.
    pub fn read_contact_count(&mut self, delay: &mut dyn DelayMs<u32>) -> Result<u8>
    where
        I2C: embedded_hal::blocking::i2c::Write,
    {
        for _ in 0..CONTACT_POLL_MS {
            // a failed read counts as not ready
            if let Ok(status) = self.read_coord_status() {
                let contacts = status & STATUS_CONTACTS;
                if status & STATUS_BUFFER_READY != 0 && contacts < MAX_CONTACTS {
                    if self.write_coord_status(0).is_err() {
                        #[cfg(feature = "defmt")]
                        defmt::warn!("failed to clear coordinate status");
                    }
                    return Ok(contacts);
                }
            }
            delay.delay_ms(1);
        }
        Ok(0)
    }

    /// Read `count` records from the coordinate table
    ///
    /// `count` is capped at [`MAX_CONTACTS`].
    pub fn read_contact_table(&mut self, count: u8) -> Result<ContactTable> {
        let count = count.min(MAX_CONTACTS);
        let mut rd_buf = [0u8; CONTACT_LEN * MAX_CONTACTS as usize];
        let rd_buf = &mut rd_buf[..CONTACT_LEN * count as usize];
        if !rd_buf.is_empty() {
            self.read_bytes(registers::POINT_1, rd_buf)?;
        }
        ContactTable::from_bytes(rd_buf, count).ok_or(Error::TransportError)
    }
}

macro_rules! register_read {
    ($name:ident, $sz:tt) => {
        $crate::paste::paste! {
            impl<I2C> Gt911<I2C>
            where
                I2C: embedded_hal::blocking::i2c::WriteRead,
            {
                #[doc="Read the " [<$name:upper>] " register"]
                pub fn [<read_ $name:lower>](&mut self) -> Result<$sz> {
                    self.[<read_reg_ $sz>](registers::[<$name:upper>])
                }
            }
        }
    };
}

macro_rules! register_write {
    ($name:ident, $sz:tt) => {
        $crate::paste::paste! {
            impl<I2C> Gt911<I2C>
            where
                I2C: embedded_hal::blocking::i2c::Write,
            {
                #[doc="Write the " [<$name:upper>] " register"]
                pub fn [<write_ $name:lower>](&mut self, v: $sz) -> Result<()> {
                    self.[<write_reg_ $sz>](registers::[<$name:upper>], v)
                }
            }
        }
    };
}

macro_rules! register_acc {
    ($name:ident, $sz:tt, ro) => {
        register_read!($name, $sz);
    };
    ($name:ident, $sz:tt, rw) => {
        register_read!($name, $sz);
        register_write!($name, $sz);
    };
}

// Configuration registers are read-only here: a single-register write would
// leave the block checksum stale. Use `write_config` instead.
register_acc!(X_OUTPUT_MAX, u16, ro);
register_acc!(Y_OUTPUT_MAX, u16, ro);
register_acc!(TOUCH_NUMBER, u8, ro);
register_acc!(CONFIG_CHECKSUM, u8, ro);
register_acc!(FIRMWARE_VERSION, u16, ro);
register_acc!(VENDOR_ID, u8, ro);
register_acc!(COORD_STATUS, u8, rw);

fn next_u8<'a, I: core::iter::Iterator<Item = &'a u8>>(i: &mut I) -> Result<u8> {
    i.next().copied().ok_or(Error::TransportError)
}

fn u16_le_from_iter<'a, I: core::iter::Iterator<Item = &'a u8>>(i: &mut I) -> Option<u16> {
    let l = *i.next()?;
    let h = *i.next()?;
    Some(u16::from_le_bytes([l, h]))
}
