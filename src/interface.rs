use core::cell::RefCell;

use embedded_hal::{
    delay::DelayNs,
    digital::{InputPin, OutputPin, PinState},
    spi::{ErrorType, SpiBus},
};
use heapless::Vec;

use crate::{
    commands::{self, Command, RfConfig},
    pin_error, spi_error, Clock, Error, Instant, Millis, Result,
};

/// Longest frame accepted by the host interface, instruction and parameter byte included
pub const MAX_FRAME_LEN: usize = commands::TX_BUFFER_LEN + 2;

pub trait Interface {
    /// Runs one busy line gated exchange with the chip
    ///
    /// `send` is clocked out in a first NSS frame, then `recv.len()` bytes are read back in a
    /// second one. An empty `recv` skips the read phase.
    fn transceive(&mut self, send: &[u8], recv: &mut [u8]) -> Result<()>;
    /// Drives NSS, `true` selects the chip
    fn select(&mut self, active: bool) -> Result<()>;
    /// Drives the active low reset line
    fn set_reset(&mut self, high: bool) -> Result<()>;
    /// Blocks for at least `d`
    fn delay(&mut self, d: Millis);
    fn now(&mut self) -> Instant;

    /// Write one 32 bit register
    fn write_register(&mut self, addr: u8, value: u32) -> Result<()> {
        trace!("Register {=u8:#X}, write {=u32:#X}", addr, value);
        self.transceive(
            &commands::register_frame(Command::WriteRegister, addr, value),
            &mut [],
        )
    }
    /// Set the bits of `mask` in a register, in a single chip operation
    fn write_register_or_mask(&mut self, addr: u8, mask: u32) -> Result<()> {
        trace!("Register {=u8:#X}, or {=u32:#X}", addr, mask);
        self.transceive(
            &commands::register_frame(Command::WriteRegisterOrMask, addr, mask),
            &mut [],
        )
    }
    /// Keep only the bits of `mask` in a register, in a single chip operation
    fn write_register_and_mask(&mut self, addr: u8, mask: u32) -> Result<()> {
        trace!("Register {=u8:#X}, and {=u32:#X}", addr, mask);
        self.transceive(
            &commands::register_frame(Command::WriteRegisterAndMask, addr, mask),
            &mut [],
        )
    }
    /// Read one 32 bit register
    fn read_register(&mut self, addr: u8) -> Result<u32> {
        let mut buf = [0u8; 4];
        self.transceive(&[Command::ReadRegister as u8, addr], &mut buf)?;
        let value = u32::from_le_bytes(buf);
        trace!("Register {=u8:#X}, read {=u32:#X}", addr, value);
        Ok(value)
    }
    /// Fill `buf` with EEPROM contents starting at `addr`
    fn read_eeprom(&mut self, addr: u8, buf: &mut [u8]) -> Result<()> {
        let len = u8::try_from(buf.len()).map_err(|_| Error::FrameTooLong)?;
        self.transceive(&[Command::ReadEeprom as u8, addr, len], buf)
    }
    /// Load `data` into the transmission buffer and start sending
    ///
    /// `valid_bits` is the number of bits sent from the last byte, 0 sends all of them
    fn send_data(&mut self, valid_bits: u8, data: &[u8]) -> Result<()> {
        let mut frame: Vec<u8, MAX_FRAME_LEN> = Vec::new();
        frame
            .extend_from_slice(&[Command::SendData as u8, valid_bits])
            .and_then(|_| frame.extend_from_slice(data))
            .map_err(|_| Error::FrameTooLong)?;
        trace!("Send {=[u8]:02X}, {=u8} bits in last byte", data, valid_bits);
        self.transceive(&frame, &mut [])
    }
    /// Read the reception buffer
    fn read_data(&mut self, buf: &mut [u8]) -> Result<()> {
        self.transceive(&[Command::ReadData as u8, 0x00], buf)?;
        trace!("Received {=[u8]:02X}", buf);
        Ok(())
    }
    fn load_rf_config(&mut self, config: RfConfig) -> Result<()> {
        self.transceive(
            &[Command::LoadRfConfig as u8, config.tx, config.rx],
            &mut [],
        )
    }
    fn rf_on(&mut self) -> Result<()> {
        self.transceive(&[Command::RfOn as u8, 0x00], &mut [])
    }
    fn rf_off(&mut self) -> Result<()> {
        self.transceive(&[Command::RfOff as u8, 0x00], &mut [])
    }
}

/// PN5180 host interface over a SPI bus, with NSS driven manually and the BUSY handshake
///
/// Every wait on the BUSY line is bounded by `timeout`.
pub struct BusyInterface<SPI, NSS, RST, BUSY, D, C> {
    spi: SPI,
    nss: NSS,
    rst: RST,
    busy: BUSY,
    delay: D,
    clock: C,
    timeout: Millis,
}

impl<SPI, NSS, RST, BUSY, D, C> BusyInterface<SPI, NSS, RST, BUSY, D, C>
where
    SPI: SpiBus,
    NSS: OutputPin,
    RST: OutputPin,
    BUSY: InputPin,
    D: DelayNs,
    C: Clock,
{
    pub fn new(
        spi: SPI,
        nss: NSS,
        rst: RST,
        busy: BUSY,
        delay: D,
        clock: C,
        timeout: Millis,
    ) -> Self {
        Self {
            spi,
            nss,
            rst,
            busy,
            delay,
            clock,
            timeout,
        }
    }

    /// Gives back the bus, the pins, the delay and the clock
    pub fn free(self) -> (SPI, NSS, RST, BUSY, D, C) {
        (
            self.spi, self.nss, self.rst, self.busy, self.delay, self.clock,
        )
    }

    fn wait_busy(&mut self, high: bool) -> Result<()> {
        let start = self.clock.now();
        loop {
            if self.busy.is_high().map_err(pin_error)? == high {
                return Ok(());
            }
            if crate::elapsed(start, self.clock.now()) > self.timeout {
                debug!("Timeout waiting for BUSY {=bool}", high);
                return Err(Error::Timeout);
            }
            core::hint::spin_loop()
        }
    }

    /// One NSS frame: select, clock, wait for BUSY high, deselect, wait for BUSY low
    fn frame(
        &mut self,
        f: impl FnOnce(&mut SPI) -> core::result::Result<(), SPI::Error>,
    ) -> Result<()> {
        self.nss.set_low().map_err(pin_error)?;
        if let Err(e) = self.clock_frame(f) {
            // leave the chip deselected for the next exchange
            self.nss.set_high().ok();
            return Err(e);
        }
        self.nss.set_high().map_err(pin_error)?;
        self.wait_busy(false)
    }

    fn clock_frame(
        &mut self,
        f: impl FnOnce(&mut SPI) -> core::result::Result<(), SPI::Error>,
    ) -> Result<()> {
        f(&mut self.spi).map_err(spi_error)?;
        self.spi.flush().map_err(spi_error)?;
        self.wait_busy(true)
    }
}

impl<SPI, NSS, RST, BUSY, D, C> Interface for BusyInterface<SPI, NSS, RST, BUSY, D, C>
where
    SPI: SpiBus,
    NSS: OutputPin,
    RST: OutputPin,
    BUSY: InputPin,
    D: DelayNs,
    C: Clock,
{
    fn transceive(&mut self, send: &[u8], recv: &mut [u8]) -> Result<()> {
        self.wait_busy(false)?;
        self.frame(|spi| spi.write(send))?;
        if recv.is_empty() {
            return Ok(());
        }
        self.frame(|spi| spi.read(recv))
    }

    fn select(&mut self, active: bool) -> Result<()> {
        self.nss
            .set_state(PinState::from(!active))
            .map_err(pin_error)
    }

    fn set_reset(&mut self, high: bool) -> Result<()> {
        self.rst.set_state(PinState::from(high)).map_err(pin_error)
    }

    fn delay(&mut self, d: Millis) {
        self.delay.delay_ms(d.to_millis())
    }

    fn now(&mut self) -> Instant {
        self.clock.now()
    }
}

/// Lends one SPI bus to several readers
///
/// Each call borrows the bus for its duration, readers sharing it must be polled one after the
/// other.
pub struct SharedBus<'a, B> {
    bus: &'a RefCell<B>,
}

impl<'a, B> SharedBus<'a, B> {
    pub fn new(bus: &'a RefCell<B>) -> Self {
        Self { bus }
    }
}

impl<B: ErrorType> ErrorType for SharedBus<'_, B> {
    type Error = B::Error;
}

impl<B: SpiBus> SpiBus for SharedBus<'_, B> {
    fn read(&mut self, words: &mut [u8]) -> core::result::Result<(), Self::Error> {
        self.bus.borrow_mut().read(words)
    }

    fn write(&mut self, words: &[u8]) -> core::result::Result<(), Self::Error> {
        self.bus.borrow_mut().write(words)
    }

    fn transfer(&mut self, read: &mut [u8], write: &[u8]) -> core::result::Result<(), Self::Error> {
        self.bus.borrow_mut().transfer(read, write)
    }

    fn transfer_in_place(&mut self, words: &mut [u8]) -> core::result::Result<(), Self::Error> {
        self.bus.borrow_mut().transfer_in_place(words)
    }

    fn flush(&mut self) -> core::result::Result<(), Self::Error> {
        self.bus.borrow_mut().flush()
    }
}
