#![no_std]

#[macro_use]
mod fmt;

use core::fmt::Write as _;

use embedded_hal::{
    delay::DelayNs,
    digital::{InputPin, OutputPin},
    spi::SpiBus,
};
use registers::{eeprom, IrqClear, IrqStatus, Register, RfStatus, RxStatus};

pub mod commands;
pub mod interface;
pub mod nfc_a;
pub mod presence;
pub mod registers;
#[cfg(test)]
mod sim;

pub use commands::RfConfig;
pub use interface::{BusyInterface, Interface, SharedBus};
pub use nfc_a::Uid;
pub use registers::rf_status::TransceiveState;

/// Millisecond timestamp of a [`Clock`]
pub type Instant = fugit::TimerInstantU32<1_000>;
pub type Millis = fugit::MillisDurationU32;

/// Monotonic millisecond clock used to bound every polling loop
pub trait Clock {
    fn now(&mut self) -> Instant;
}

pub(crate) fn elapsed(start: Instant, now: Instant) -> Millis {
    now.checked_duration_since(start)
        .unwrap_or(Millis::from_ticks(0))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    Spi(embedded_hal::spi::ErrorKind),
    Pin(embedded_hal::digital::ErrorKind),
    /// The BUSY line or a polled status did not settle in time
    Timeout,
    /// The IDLE interrupt did not fire after a hardware reset
    ResetTimeout,
    /// Loading the RF configuration or switching the field on failed
    RadioSetupFailed,
    /// The chip reported a state inconsistent with the last request
    Protocol(ProtocolError),
    /// Frame doesn't fit in the chip's buffers
    FrameTooLong,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ProtocolError {
    /// Transceiver was not ready to send after being put in transceive mode
    NotWaitTransmit(TransceiveState),
    /// The card asked for a second cascade level but the first fragment didn't start with the
    /// cascade tag
    MissingCascadeTag(u8),
}

pub type Result<T, E = Error> = core::result::Result<T, E>;

pub(crate) fn pin_error<E: embedded_hal::digital::Error>(e: E) -> Error {
    Error::Pin(e.kind())
}

pub(crate) fn spi_error<E: embedded_hal::spi::Error>(e: E) -> Error {
    Error::Spi(e.kind())
}

/// Per reader settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Config {
    /// Only used to tell readers apart in logs
    pub reader_id: u8,
    /// Bound of every BUSY line and interrupt wait
    pub timeout: Millis,
    /// Bound of the wait for the transceiver to come back after REQA
    pub state_timeout: Millis,
    /// Reset pulse width, also waited after releasing reset
    pub reset_settle: Millis,
    /// Wait between switching the field on and checking for it
    pub rf_settle: Millis,
    /// Wait between sending a frame and reading the answer
    pub reception_delay: Millis,
    pub rf_config: RfConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            reader_id: 0,
            timeout: Millis::millis(50),
            state_timeout: Millis::millis(20),
            reset_settle: Millis::millis(10),
            rf_settle: Millis::millis(10),
            reception_delay: Millis::millis(5),
            rf_config: RfConfig::ISO_14443A_106,
        }
    }
}

impl Config {
    pub fn new(reader_id: u8) -> Self {
        Self {
            reader_id,
            ..Default::default()
        }
    }
}

/// Version number, the two EEPROM bytes in storage order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Version {
    pub major: u8,
    pub minor: u8,
}

impl Version {
    pub fn from_eeprom(raw: [u8; 2]) -> Self {
        Self {
            major: raw[0],
            minor: raw[1],
        }
    }
}

impl core::fmt::Display for Version {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// `major.minor`, or `error` if the version couldn't be read
pub type VersionString = heapless::String<8>;

/// One PN5180 and its antenna
pub struct Pn5180<I: Interface> {
    iface: I,
    config: Config,
}

impl<SPI, NSS, RST, BUSY, D, C> Pn5180<BusyInterface<SPI, NSS, RST, BUSY, D, C>>
where
    SPI: SpiBus,
    NSS: OutputPin,
    RST: OutputPin,
    BUSY: InputPin,
    D: DelayNs,
    C: Clock,
{
    /// Wires a reader to its bus and pins, the BUSY handshake uses `config.timeout`
    pub fn new(
        spi: SPI,
        nss: NSS,
        rst: RST,
        busy: BUSY,
        delay: D,
        clock: C,
        config: Config,
    ) -> Self {
        let iface = BusyInterface::new(spi, nss, rst, busy, delay, clock, config.timeout);
        Self::from_interface(iface, config)
    }
}

impl<I: Interface> Pn5180<I> {
    pub fn from_interface(iface: I, config: Config) -> Self {
        Self { iface, config }
    }

    /// Run a function with access to the interface
    pub fn with_interface<T>(&mut self, f: impl FnOnce(&mut I) -> T) -> T {
        f(&mut self.iface)
    }

    /// Takes the interface back
    pub fn release(self) -> I {
        self.iface
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn reader_id(&self) -> u8 {
        self.config.reader_id
    }

    /// Deselects the chip and releases it from reset
    pub fn begin(&mut self) -> Result<()> {
        self.iface.select(false)?;
        self.iface.set_reset(true)?;
        debug!("reader {=u8}: initialized", self.config.reader_id);
        Ok(())
    }

    /// Pulses the reset line and waits for the chip to report idle
    pub fn reset(&mut self) -> Result<()> {
        self.iface.set_reset(false)?;
        self.iface.delay(self.config.reset_settle);
        self.iface.set_reset(true)?;
        self.iface.delay(self.config.reset_settle);

        match self.wait_for_irq(IrqStatus::new_idle(), self.config.timeout) {
            Err(Error::Timeout) => {
                warn!("reader {=u8}: timeout waiting for reset", self.config.reader_id);
                Err(Error::ResetTimeout)
            }
            res => res,
        }
    }

    /// Polls IRQ_STATUS until any bit of `irq` is set
    fn wait_for_irq(&mut self, irq: IrqStatus, timeout: Millis) -> Result<()> {
        let start = self.iface.now();
        loop {
            let firing = self.get_irq_status()?;
            if firing.any(irq) {
                return Ok(());
            }
            if elapsed(start, self.iface.now()) > timeout {
                return Err(Error::Timeout);
            }
        }
    }

    pub fn read_register(&mut self, addr: u8) -> Result<u32> {
        self.iface.read_register(addr)
    }

    pub fn write_register(&mut self, addr: u8, value: u32) -> Result<()> {
        self.iface.write_register(addr, value)
    }

    pub fn write_register_or_mask(&mut self, addr: u8, mask: u32) -> Result<()> {
        self.iface.write_register_or_mask(addr, mask)
    }

    pub fn write_register_and_mask(&mut self, addr: u8, mask: u32) -> Result<()> {
        self.iface.write_register_and_mask(addr, mask)
    }

    pub fn read_eeprom(&mut self, addr: u8, buf: &mut [u8]) -> Result<()> {
        self.iface.read_eeprom(addr, buf)
    }

    pub fn get_irq_status(&mut self) -> Result<IrqStatus> {
        IrqStatus::read(&mut self.iface)
    }

    /// Acknowledges the interrupts set in `mask`
    pub fn clear_irq_status(&mut self, mask: IrqStatus) -> Result<()> {
        IrqClear::from(u32::from(mask)).write(&mut self.iface)
    }

    pub fn get_transceive_state(&mut self) -> Result<TransceiveState> {
        RfStatus::read(&mut self.iface).map(|r| r.transceive_state())
    }

    /// Number of bytes in the reception buffer
    pub fn rx_bytes_received(&mut self) -> Result<u16> {
        RxStatus::read(&mut self.iface).map(|r| r.num_bytes().value())
    }

    pub fn load_rf_config(&mut self, config: RfConfig) -> Result<()> {
        self.iface.load_rf_config(config)
    }

    pub fn rf_on(&mut self) -> Result<()> {
        self.iface.rf_on()
    }

    pub fn rf_off(&mut self) -> Result<()> {
        self.iface.rf_off()
    }

    /// Loads the configured RF profile and switches the field on
    pub fn setup_radio(&mut self) -> Result<()> {
        self.try_setup_radio().map_err(|e| {
            warn!(
                "reader {=u8}: radio setup failed: {}",
                self.config.reader_id,
                e
            );
            Error::RadioSetupFailed
        })
    }

    fn try_setup_radio(&mut self) -> Result<()> {
        self.iface.load_rf_config(self.config.rf_config)?;
        self.iface.rf_on()?;
        self.iface.delay(self.config.rf_settle);

        let rf_on = IrqStatus::new_tx_rfon();
        self.wait_for_irq(rf_on, self.config.timeout)?;
        self.clear_irq_status(rf_on)?;
        trace!("reader {=u8}: field on", self.config.reader_id);
        Ok(())
    }

    fn read_version(&mut self, addr: u8) -> Result<Version> {
        let mut raw = [0u8; 2];
        self.iface.read_eeprom(addr, &mut raw)?;
        Ok(Version::from_eeprom(raw))
    }

    pub fn firmware_version(&mut self) -> Result<Version> {
        self.read_version(eeprom::FIRMWARE_VERSION)
    }

    pub fn product_version(&mut self) -> Result<Version> {
        self.read_version(eeprom::PRODUCT_VERSION)
    }

    pub fn eeprom_version(&mut self) -> Result<Version> {
        self.read_version(eeprom::EEPROM_VERSION)
    }

    pub fn get_firmware(&mut self) -> VersionString {
        version_string(self.firmware_version())
    }

    pub fn get_product_version(&mut self) -> VersionString {
        version_string(self.product_version())
    }

    pub fn get_eeprom_version(&mut self) -> VersionString {
        version_string(self.eeprom_version())
    }

    /// Unique 16 byte die identifier
    pub fn die_identifier(&mut self) -> Result<[u8; 16]> {
        let mut id = [0u8; 16];
        self.iface.read_eeprom(eeprom::DIE_IDENTIFIER, &mut id)?;
        Ok(id)
    }
}

fn version_string(version: Result<Version>) -> VersionString {
    let mut s = VersionString::new();
    // both fit, "255.255" is the longest version
    let _ = match version {
        Ok(v) => write!(s, "{}", v),
        Err(_) => s.push_str("error").map_err(|_| core::fmt::Error),
    };
    s
}
