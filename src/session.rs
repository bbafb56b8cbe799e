//! Multi-touch session
//!
//! A [`TouchSession`] owns the driver and a fixed array of `N` finger slots.
//! Each call to [`TouchSession::service`] that finds a trigger reads the
//! contact table and moves every slot through its press / move / release
//! transitions, forwarding them to a [`TouchSink`] followed by one
//! `commit()`.
//!
//! The device's track id is used directly as the slot index. This holds
//! because the session forces the device's touch number to `N` at start-up.

use embedded_hal::blocking::delay::{DelayMs, DelayUs};
use embedded_hal::blocking::i2c::{Write, WriteRead};
use embedded_hal::digital::v2::OutputPin;

use crate::{Contact, ContactTable, Error, Gt911, PendingFlag, Result, MAX_CONTACTS};

/// Receiver of finger events, e.g. a USB HID multi-touch report builder
pub trait TouchSink {
    /// Finger `slot` is down at (`x`, `y`), already scaled
    fn set_finger(&mut self, slot: u8, x: u16, y: u16, area: u16);
    /// Finger `slot` lifted
    fn release_finger(&mut self, slot: u8);
    /// All events of this pass have been delivered
    fn commit(&mut self);
}

impl<T: TouchSink + ?Sized> TouchSink for &mut T {
    fn set_finger(&mut self, slot: u8, x: u16, y: u16, area: u16) {
        (**self).set_finger(slot, x, y, area)
    }

    fn release_finger(&mut self, slot: u8) {
        (**self).release_finger(slot)
    }

    fn commit(&mut self) {
        (**self).commit()
    }
}

/// What starts a pass
#[derive(Debug, Clone, Copy)]
pub enum Trigger {
    /// Run only when the INT edge handler has raised the flag
    Interrupt(&'static PendingFlag),
    /// Run on every call
    Polling,
}

impl Trigger {
    fn fire(&self) -> bool {
        match self {
            Trigger::Interrupt(flag) => flag.take(),
            Trigger::Polling => true,
        }
    }
}

/// Output coordinate space
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SessionConfig {
    /// Reported X at the device's X resolution
    pub target_width: u16,
    /// Reported Y at the device's Y resolution
    pub target_height: u16,
    /// Multiplier applied to the raw contact area (wraps on overflow)
    pub area_multiplier: u16,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            target_width: 2560,
            target_height: 2560,
            area_multiplier: 4,
        }
    }
}

/// State of one finger as last reported to the sink
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Slot {
    pub pressed: bool,
    pub x: u16,
    pub y: u16,
    pub area: u16,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Scale {
    x: f32,
    y: f32,
    area: u16,
}

impl Scale {
    fn new(config: &SessionConfig, x_resolution: u16, y_resolution: u16) -> Scale {
        Scale {
            x: config.target_width as f32 / x_resolution as f32,
            y: config.target_height as f32 / y_resolution as f32,
            area: config.area_multiplier,
        }
    }

    fn apply(&self, contact: &Contact) -> Slot {
        Slot {
            pressed: true,
            x: (self.x * contact.x as f32) as u16,
            y: (self.y * contact.y as f32) as u16,
            area: contact.area.wrapping_mul(self.area),
        }
    }
}

/// Finger tracking session over a GT911 with `N` slots
pub struct TouchSession<I2C, S, const N: usize> {
    gt: Gt911<I2C>,
    trigger: Trigger,
    sink: S,
    slots: [Slot; N],
    scale: Scale,
}

impl<I2C, S, const N: usize> TouchSession<I2C, S, N> {
    const SLOTS_FIT: () = assert!(
        N > 0 && N <= MAX_CONTACTS as usize,
        "slot count must be between 1 and MAX_CONTACTS"
    );

    pub fn slots(&self) -> &[Slot; N] {
        &self.slots
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    /// Access the driver, e.g. for diagnostics
    pub fn driver_mut(&mut self) -> &mut Gt911<I2C> {
        &mut self.gt
    }

    /// Release the driver and sink
    pub fn release(self) -> (Gt911<I2C>, S) {
        (self.gt, self.sink)
    }
}

impl<I2C, S, const N: usize> TouchSession<I2C, S, N>
where
    I2C: Write + WriteRead,
    S: TouchSink,
{
    /// Reset the device and start a session
    ///
    /// Fails with `BusError` if the device does not answer after reset and
    /// with `ConfigInvalid` if no trusted configuration could be read.
    pub fn start<INT, RST, D>(
        mut gt: Gt911<I2C>,
        int_pin: &mut INT,
        rst_pin: &mut RST,
        delay: &mut D,
        trigger: Trigger,
        config: SessionConfig,
        sink: S,
    ) -> Result<Self>
    where
        INT: OutputPin,
        RST: OutputPin,
        D: DelayMs<u32> + DelayUs<u32>,
    {
        gt.initialize(int_pin, rst_pin, delay)?;
        Self::attach(gt, trigger, config, sink)
    }

    /// Start a session on a device that has already been initialized
    ///
    /// Reads and validates the configuration, forces the device's touch
    /// number to `N` if it differs, and derives the coordinate scale from
    /// the configured resolution.
    pub fn attach(mut gt: Gt911<I2C>, trigger: Trigger, config: SessionConfig, sink: S) -> Result<Self> {
        #[allow(clippy::let_unit_value)]
        let () = Self::SLOTS_FIT;

        let mut device_config = gt.read_config()?;
        let (x_resolution, y_resolution) = (device_config.x_resolution(), device_config.y_resolution());
        if x_resolution == 0 || y_resolution == 0 {
            #[cfg(feature = "defmt")]
            defmt::warn!("config has no resolution: {}x{}", x_resolution, y_resolution);
            return Err(Error::ConfigInvalid);
        }

        if device_config.touch_number() as usize != N {
            #[cfg(feature = "defmt")]
            defmt::info!("setting touch number {} -> {}", device_config.touch_number(), N);
            device_config.set_touch_number(N as u8);
            gt.write_config(&device_config)?;
        }

        Ok(TouchSession {
            gt,
            trigger,
            sink,
            slots: [Slot::default(); N],
            scale: Scale::new(&config, x_resolution, y_resolution),
        })
    }

    /// Run one pass if triggered
    ///
    /// Returns the number of contacts the device reported, 0 when not
    /// triggered. On error the slots are left as they were and nothing is
    /// sent to the sink; the next trigger retries.
    pub fn service(&mut self, delay: &mut dyn DelayMs<u32>) -> Result<u8> {
        if !self.trigger.fire() {
            return Ok(0);
        }

        let count = self.gt.read_contact_count(delay).map_err(aborted)?;
        #[cfg(feature = "defmt")]
        defmt::trace!("contacts: {}", count);

        if count == 0 {
            self.release_all();
        } else {
            let table = self.gt.read_contact_table(count).map_err(aborted)?;
            self.track(&table);
        }
        self.sink.commit();
        Ok(count)
    }

    fn release_all(&mut self) {
        for (i, slot) in self.slots.iter_mut().enumerate() {
            if slot.pressed {
                slot.pressed = false;
                self.sink.release_finger(i as u8);
            }
        }
    }

    fn track(&mut self, table: &ContactTable) {
        #[cfg(feature = "defmt")]
        for contact in table.iter().filter(|c| c.track_id as usize >= N) {
            defmt::debug!("ignoring contact with track id {}", contact.track_id);
        }

        for (i, slot) in self.slots.iter_mut().enumerate() {
            match table.find(i as u8) {
                Some(contact) => {
                    *slot = self.scale.apply(contact);
                    self.sink.set_finger(i as u8, slot.x, slot.y, slot.area);
                }
                None if slot.pressed => {
                    slot.pressed = false;
                    self.sink.release_finger(i as u8);
                }
                None => {}
            }
        }
    }
}

fn aborted(e: Error) -> Error {
    #[cfg(feature = "defmt")]
    defmt::warn!("touch pass aborted: {}", e);
    e
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{checksum, registers, CONFIG_LEN, CONTACT_POLL_MS, DEFAULT_I2C_ADDR};
    use embedded_hal_mock::delay::MockNoop;
    use embedded_hal_mock::i2c::{Mock as I2cMock, Transaction as I2cTransaction};
    use embedded_hal_mock::pin::{Mock as PinMock, State as PinState, Transaction as PinTransaction};
    use embedded_hal_mock::MockError;
    use std::io::ErrorKind;

    const ADDR: u8 = DEFAULT_I2C_ADDR;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Event {
        Set(u8, u16, u16, u16),
        Release(u8),
        Commit,
    }

    #[derive(Default)]
    struct Recorder {
        events: Vec<Event>,
    }

    impl Recorder {
        fn take(&mut self) -> Vec<Event> {
            std::mem::take(&mut self.events)
        }
    }

    impl TouchSink for Recorder {
        fn set_finger(&mut self, slot: u8, x: u16, y: u16, area: u16) {
            self.events.push(Event::Set(slot, x, y, area));
        }

        fn release_finger(&mut self, slot: u8) {
            self.events.push(Event::Release(slot));
        }

        fn commit(&mut self) {
            self.events.push(Event::Commit);
        }
    }

    fn reg(r: u16) -> Vec<u8> {
        r.to_be_bytes().to_vec()
    }

    fn with_reg(r: u16, data: &[u8]) -> Vec<u8> {
        let mut v = reg(r);
        v.extend_from_slice(data);
        v
    }

    fn config_bytes(x_res: u16, y_res: u16, touch_number: u8) -> [u8; CONFIG_LEN] {
        let mut bytes = [0u8; CONFIG_LEN];
        bytes[0] = 0x41;
        bytes[1..3].copy_from_slice(&x_res.to_le_bytes());
        bytes[3..5].copy_from_slice(&y_res.to_le_bytes());
        bytes[5] = touch_number;
        bytes
    }

    fn read_config(bytes: &[u8; CONFIG_LEN]) -> Vec<I2cTransaction> {
        vec![
            I2cTransaction::write_read(ADDR, reg(registers::CONFIG_VERSION), bytes.to_vec()),
            I2cTransaction::write_read(ADDR, reg(registers::CONFIG_CHECKSUM), vec![checksum(bytes)]),
        ]
    }

    /// A pass that finds `contacts` as (track id, x, y, area)
    fn pass(contacts: &[(u8, u16, u16, u16)]) -> Vec<I2cTransaction> {
        let mut t = vec![
            I2cTransaction::write_read(ADDR, reg(registers::COORD_STATUS), vec![0x80 | contacts.len() as u8]),
            I2cTransaction::write(ADDR, with_reg(registers::COORD_STATUS, &[0])),
        ];
        if !contacts.is_empty() {
            let mut raw = Vec::new();
            for &(id, x, y, area) in contacts {
                raw.push(id);
                raw.extend_from_slice(&x.to_le_bytes());
                raw.extend_from_slice(&y.to_le_bytes());
                raw.extend_from_slice(&area.to_le_bytes());
                raw.push(0);
            }
            t.push(I2cTransaction::write_read(ADDR, reg(registers::POINT_1), raw));
        }
        t
    }

    /// A pass where the buffer never becomes ready
    fn idle_pass() -> Vec<I2cTransaction> {
        (0..CONTACT_POLL_MS)
            .map(|_| I2cTransaction::write_read(ADDR, reg(registers::COORD_STATUS), vec![0x00]))
            .collect()
    }

    fn session<const N: usize>(
        passes: Vec<Vec<I2cTransaction>>,
        trigger: Trigger,
    ) -> (TouchSession<I2cMock, Recorder, N>, I2cMock) {
        let mut expectations = read_config(&config_bytes(4096, 4096, N as u8));
        expectations.extend(passes.into_iter().flatten());
        let i2c = I2cMock::new(&expectations);
        let i2c_clone = i2c.clone();
        let session = TouchSession::attach(Gt911::new(i2c, ADDR), trigger, SessionConfig::default(), Recorder::default())
            .unwrap();
        (session, i2c_clone)
    }

    #[test]
    fn press_is_scaled_to_target() {
        let (mut s, mut i2c) = session::<2>(vec![pass(&[(0, 2048, 2048, 10)])], Trigger::Polling);

        assert_eq!(s.service(&mut MockNoop::new()), Ok(1));
        assert_eq!(s.sink_mut().take(), [Event::Set(0, 1280, 1280, 40), Event::Commit]);
        assert_eq!(s.slots()[0], Slot { pressed: true, x: 1280, y: 1280, area: 40 });
        assert!(!s.slots()[1].pressed);

        i2c.done();
    }

    #[test]
    fn repeated_table_updates_with_same_geometry() {
        let contacts = [(1, 1000, 3000, 7)];
        let (mut s, mut i2c) = session::<2>(vec![pass(&contacts), pass(&contacts)], Trigger::Polling);
        let mut delay = MockNoop::new();

        s.service(&mut delay).unwrap();
        let first = s.sink_mut().take();
        s.service(&mut delay).unwrap();
        let second = s.sink_mut().take();

        assert_eq!(first, [Event::Set(1, 625, 1875, 28), Event::Commit]);
        assert_eq!(first, second);

        i2c.done();
    }

    #[test]
    fn missing_contact_releases_its_slot() {
        let (mut s, mut i2c) = session::<2>(
            vec![
                pass(&[(0, 100, 200, 1), (1, 300, 400, 2)]),
                pass(&[(1, 320, 400, 2)]),
            ],
            Trigger::Polling,
        );
        let mut delay = MockNoop::new();

        s.service(&mut delay).unwrap();
        s.sink_mut().take();
        assert_eq!(s.service(&mut delay), Ok(1));
        assert_eq!(s.sink_mut().take(), [Event::Release(0), Event::Set(1, 200, 250, 8), Event::Commit]);
        assert!(!s.slots()[0].pressed);
        assert!(s.slots()[1].pressed);

        i2c.done();
    }

    #[test]
    fn idle_poll_releases_everything_once() {
        let (mut s, mut i2c) = session::<2>(
            vec![pass(&[(0, 100, 200, 1), (1, 300, 400, 2)]), idle_pass(), idle_pass()],
            Trigger::Polling,
        );
        let mut delay = MockNoop::new();

        s.service(&mut delay).unwrap();
        s.sink_mut().take();

        assert_eq!(s.service(&mut delay), Ok(0));
        assert_eq!(s.sink_mut().take(), [Event::Release(0), Event::Release(1), Event::Commit]);

        // nothing pressed: only the commit
        assert_eq!(s.service(&mut delay), Ok(0));
        assert_eq!(s.sink_mut().take(), [Event::Commit]);

        i2c.done();
    }

    #[test]
    fn ready_report_with_no_contacts_releases() {
        let (mut s, mut i2c) = session::<2>(vec![pass(&[(1, 0, 0, 1)]), pass(&[])], Trigger::Polling);
        let mut delay = MockNoop::new();

        s.service(&mut delay).unwrap();
        s.sink_mut().take();
        assert_eq!(s.service(&mut delay), Ok(0));
        assert_eq!(s.sink_mut().take(), [Event::Release(1), Event::Commit]);

        i2c.done();
    }

    #[test]
    fn track_ids_beyond_slots_are_ignored() {
        let (mut s, mut i2c) = session::<2>(vec![pass(&[(3, 100, 100, 1), (1, 4096, 0, 1)])], Trigger::Polling);

        assert_eq!(s.service(&mut MockNoop::new()), Ok(2));
        assert_eq!(s.sink_mut().take(), [Event::Set(1, 2560, 0, 4), Event::Commit]);

        i2c.done();
    }

    #[test]
    fn interrupt_trigger_waits_for_flag() {
        static PENDING: PendingFlag = PendingFlag::new();
        let (mut s, mut i2c) = session::<1>(vec![pass(&[(0, 2048, 1024, 3)])], Trigger::Interrupt(&PENDING));
        let mut delay = MockNoop::new();

        // no bus traffic and no events until the flag is raised
        assert_eq!(s.service(&mut delay), Ok(0));
        assert!(s.sink().events.is_empty());

        PENDING.raise();
        assert_eq!(s.service(&mut delay), Ok(1));
        assert_eq!(s.sink_mut().take(), [Event::Set(0, 1280, 640, 12), Event::Commit]);
        assert!(!PENDING.is_pending());

        assert_eq!(s.service(&mut delay), Ok(0));
        assert!(s.sink().events.is_empty());

        i2c.done();
    }

    #[test]
    fn status_glitch_still_releases() {
        static PENDING: PendingFlag = PendingFlag::new();
        let lift = vec![
            I2cTransaction::write_read(ADDR, reg(registers::COORD_STATUS), vec![0x00])
                .with_error(MockError::Io(ErrorKind::Other)),
            I2cTransaction::write_read(ADDR, reg(registers::COORD_STATUS), vec![0x80]),
            I2cTransaction::write(ADDR, with_reg(registers::COORD_STATUS, &[0])),
        ];
        let (mut s, mut i2c) = session::<2>(vec![pass(&[(0, 2048, 2048, 1)]), lift], Trigger::Interrupt(&PENDING));
        let mut delay = MockNoop::new();

        PENDING.raise();
        s.service(&mut delay).unwrap();
        s.sink_mut().take();
        assert!(s.slots()[0].pressed);

        // last edge after the lift; its first status read fails
        PENDING.raise();
        assert_eq!(s.service(&mut delay), Ok(0));
        assert_eq!(s.sink_mut().take(), [Event::Release(0), Event::Commit]);
        assert!(!s.slots()[0].pressed);

        i2c.done();
    }

    #[test]
    fn trigger_is_debug() {
        static PENDING: PendingFlag = PendingFlag::new();
        assert_eq!(format!("{:?}", Trigger::Polling), "Polling");
        assert!(format!("{:?}", Trigger::Interrupt(&PENDING)).starts_with("Interrupt("));
    }

    #[test]
    fn failed_table_read_keeps_slots() {
        let mut failing = pass(&[(0, 10, 10, 1)]);
        let table = failing.pop().unwrap();
        failing.push(table.with_error(MockError::Io(ErrorKind::UnexpectedEof)));
        let (mut s, mut i2c) = session::<2>(vec![pass(&[(0, 2048, 2048, 1)]), failing], Trigger::Polling);
        let mut delay = MockNoop::new();

        s.service(&mut delay).unwrap();
        s.sink_mut().take();
        let before = *s.slots();

        assert_eq!(s.service(&mut delay), Err(Error::TransportError));
        assert_eq!(s.slots(), &before);
        assert!(s.sink().events.is_empty());

        i2c.done();
    }

    #[test]
    fn start_resets_and_attaches() {
        let mut int_pin = PinMock::new(&[
            PinTransaction::set(PinState::Low),
            PinTransaction::set(PinState::Low),
            PinTransaction::set(PinState::Low),
        ]);
        let mut rst_pin = PinMock::new(&[PinTransaction::set(PinState::Low), PinTransaction::set(PinState::High)]);
        let mut expectations = vec![I2cTransaction::write(ADDR, reg(registers::PRODUCT_ID))];
        expectations.extend(read_config(&config_bytes(1024, 600, 2)));
        let i2c = I2cMock::new(&expectations);

        let s: TouchSession<_, _, 2> = TouchSession::start(
            Gt911::new(i2c, ADDR),
            &mut int_pin,
            &mut rst_pin,
            &mut MockNoop::new(),
            Trigger::Polling,
            SessionConfig::default(),
            Recorder::default(),
        )
        .unwrap();
        assert_eq!(s.slots(), &[Slot::default(); 2]);

        let (gt, recorder) = s.release();
        assert!(recorder.events.is_empty());
        int_pin.done();
        rst_pin.done();
        gt.release().done();
    }

    #[test]
    fn start_fails_without_ack() {
        let mut int_pin = PinMock::new(&[
            PinTransaction::set(PinState::Low),
            PinTransaction::set(PinState::Low),
            PinTransaction::set(PinState::Low),
        ]);
        let mut rst_pin = PinMock::new(&[PinTransaction::set(PinState::Low), PinTransaction::set(PinState::High)]);
        let i2c = I2cMock::new(&[
            I2cTransaction::write(ADDR, reg(registers::PRODUCT_ID)).with_error(MockError::Io(ErrorKind::Other))
        ]);
        let mut i2c_clone = i2c.clone();

        let res: Result<TouchSession<_, _, 2>> = TouchSession::start(
            Gt911::new(i2c, ADDR),
            &mut int_pin,
            &mut rst_pin,
            &mut MockNoop::new(),
            Trigger::Polling,
            SessionConfig::default(),
            Recorder::default(),
        );
        assert!(matches!(res, Err(Error::BusError)));

        int_pin.done();
        rst_pin.done();
        i2c_clone.done();
    }

    #[test]
    fn touch_number_is_forced_to_slot_count() {
        let bytes = config_bytes(4096, 4096, 5);
        let mut fixed = crate::Config::from_bytes(bytes);
        fixed.set_touch_number(2);

        let mut expectations = read_config(&bytes);
        expectations.push(I2cTransaction::write(ADDR, with_reg(registers::CONFIG_VERSION, fixed.as_bytes())));
        expectations.push(I2cTransaction::write(
            ADDR,
            with_reg(registers::CONFIG_CHECKSUM, &[fixed.checksum(), 1]),
        ));
        let i2c = I2cMock::new(&expectations);
        let mut i2c_clone = i2c.clone();

        let mut s: TouchSession<_, _, 2> =
            TouchSession::attach(Gt911::new(i2c, ADDR), Trigger::Polling, SessionConfig::default(), Recorder::default())
                .unwrap();
        assert_eq!(s.driver_mut().loaded_config().map(|c| c.touch_number()), Some(2));

        i2c_clone.done();
    }

    #[test]
    fn bad_checksum_stops_attach() {
        let bytes = config_bytes(4096, 4096, 2);
        let i2c = I2cMock::new(&[
            I2cTransaction::write_read(ADDR, reg(registers::CONFIG_VERSION), bytes.to_vec()),
            I2cTransaction::write_read(ADDR, reg(registers::CONFIG_CHECKSUM), vec![checksum(&bytes) ^ 0x55]),
        ]);
        let mut i2c_clone = i2c.clone();

        let res: Result<TouchSession<_, _, 2>> =
            TouchSession::attach(Gt911::new(i2c, ADDR), Trigger::Polling, SessionConfig::default(), Recorder::default());
        assert!(matches!(res, Err(Error::ConfigInvalid)));

        i2c_clone.done();
    }

    #[test]
    fn zero_resolution_stops_attach() {
        let bytes = config_bytes(0, 4096, 2);
        let i2c = I2cMock::new(&read_config(&bytes));
        let mut i2c_clone = i2c.clone();

        let res: Result<TouchSession<_, _, 2>> =
            TouchSession::attach(Gt911::new(i2c, ADDR), Trigger::Polling, SessionConfig::default(), Recorder::default());
        assert!(matches!(res, Err(Error::ConfigInvalid)));

        i2c_clone.done();
    }

    #[test]
    fn custom_target_and_area() {
        let config = SessionConfig {
            target_width: 1920,
            target_height: 1080,
            area_multiplier: 1,
        };
        let scale = Scale::new(&config, 960, 540);
        let slot = scale.apply(&Contact { track_id: 0, x: 480, y: 270, area: 55 });
        assert_eq!((slot.x, slot.y, slot.area), (960, 540, 55));
    }

    #[test]
    fn scaling_is_linear() {
        let config = SessionConfig::default();
        for k in [1u16, 2, 3, 5] {
            let scale = Scale::new(&config, 800 * k, 480 * k);
            let slot = scale.apply(&Contact { track_id: 0, x: 400 * k, y: 120 * k, area: 1 });
            assert_eq!((slot.x, slot.y), (1280, 640));
        }
    }

    #[test]
    fn area_wraps_on_overflow() {
        let scale = Scale::new(&SessionConfig::default(), 4096, 4096);
        let slot = scale.apply(&Contact { track_id: 0, x: 0, y: 0, area: 0x4001 });
        assert_eq!(slot.area, 4);
    }

    #[test]
    fn sink_by_reference() {
        fn emit<T: TouchSink>(mut sink: T) {
            sink.set_finger(1, 2, 3, 4);
            sink.release_finger(1);
            sink.commit();
        }

        let mut recorder = Recorder::default();
        emit(&mut recorder);
        assert_eq!(recorder.take(), [Event::Set(1, 2, 3, 4), Event::Release(1), Event::Commit]);
    }
}
