//! Simulated PN5180 and ISO14443A card for host tests
extern crate std;

use core::{cell::RefCell, convert::Infallible};
use std::{rc::Rc, vec, vec::Vec};

use embedded_hal::{
    delay::DelayNs,
    digital::{self, InputPin, OutputPin},
    spi::{self, SpiBus},
};

use crate::{
    commands::{Command, RfConfig},
    interface::BusyInterface,
    nfc_a::bcc,
    registers::addr,
    Clock, Config, Instant, Pn5180,
};

const IRQ_IDLE: u32 = 1 << 2;
const IRQ_TX: u32 = 1 << 1;
const IRQ_RX: u32 = 1 << 0;
const IRQ_TX_RFOFF: u32 = 1 << 8;
const IRQ_TX_RFON: u32 = 1 << 9;

const STATE_IDLE: u32 = 0;
const STATE_WAIT_TRANSMIT: u32 = 1;
const STATE_WAIT_RECEIVE: u32 = 3;

/// What the card in the field answers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Card {
    pub atqa: [u8; 2],
    /// Cascade level 1 answer, UID bytes and BCC
    pub cl1: [u8; 5],
    /// Byte count reported after the cascade level 1 anticollision
    pub cl1_len: u32,
    pub sak: u8,
    pub cl2: [u8; 5],
}

impl Card {
    pub fn single(uid: [u8; 4]) -> Self {
        Self {
            atqa: [0x04, 0x00],
            cl1: [uid[0], uid[1], uid[2], uid[3], bcc(&uid)],
            cl1_len: 5,
            sak: 0x08,
            cl2: [0; 5],
        }
    }

    pub fn double(uid: [u8; 7]) -> Self {
        let cl1 = [0x88, uid[0], uid[1], uid[2]];
        let cl2 = [uid[3], uid[4], uid[5], uid[6]];
        Self {
            atqa: [0x44, 0x00],
            cl1: [cl1[0], cl1[1], cl1[2], cl1[3], bcc(&cl1)],
            cl1_len: 5,
            sak: 0x04,
            cl2: [cl2[0], cl2[1], cl2[2], cl2[3], bcc(&cl2)],
        }
    }
}

/// Handshake step where BUSY stops following the host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusyStall {
    /// BUSY never rises while the response is clocked out
    ReadFrame,
    /// BUSY stays high once the instruction frame is deselected
    AfterWrite,
    /// BUSY stays high once the response frame is deselected
    AfterRead,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Select,
    Deselect,
    Write(Vec<u8>),
    Read(usize),
    /// BUSY level seen by the host, only recorded when it changes
    Busy(bool),
}

pub struct Chip {
    pub regs: [u32; 0x30],
    pub eeprom: [u8; 256],
    pub card: Option<Card>,
    pub rf_on: bool,
    pub rf_config: Option<RfConfig>,
    pub reset_count: usize,
    pub events: Vec<Event>,
    /// `SEND_DATA` frames, valid bits byte first
    pub sent: Vec<Vec<u8>>,

    pub busy_stuck_high: bool,
    pub busy_never_rises: bool,
    pub busy_stall: Option<BusyStall>,
    pub never_idle: bool,
    pub rf_on_fails: bool,
    /// Transceive command never reaches WaitTransmit
    pub refuse_transceive: bool,
    /// Same, but only once the cascade level 1 anticollision was answered
    pub stall_after_cl1: bool,

    stalled: bool,
    now_ms: u32,
    sub_ms_ns: u32,
    nss_low: bool,
    rst_high: bool,
    clocked: bool,
    reading: bool,
    busy_latched: bool,
    frame: Vec<u8>,
    response: Vec<u8>,
    rx: Vec<u8>,
    last_busy: Option<bool>,
}

impl Chip {
    pub fn new(card: Option<Card>) -> Self {
        let mut chip = Self {
            regs: [0; 0x30],
            eeprom: [0; 256],
            card,
            rf_on: false,
            rf_config: None,
            reset_count: 0,
            events: Vec::new(),
            sent: Vec::new(),
            busy_stuck_high: false,
            busy_never_rises: false,
            busy_stall: None,
            never_idle: false,
            rf_on_fails: false,
            refuse_transceive: false,
            stall_after_cl1: false,
            stalled: false,
            now_ms: 0,
            sub_ms_ns: 0,
            nss_low: false,
            rst_high: true,
            clocked: false,
            reading: false,
            busy_latched: false,
            frame: Vec::new(),
            response: Vec::new(),
            rx: Vec::new(),
            last_busy: None,
        };
        chip.regs[addr::IRQ_STATUS as usize] = IRQ_IDLE;
        chip
    }

    /// Current time, without advancing it
    pub fn now(&self) -> u32 {
        self.now_ms
    }

    pub fn selected(&self) -> bool {
        self.nss_low
    }

    fn advance_ns(&mut self, ns: u32) {
        let total = self.sub_ms_ns as u64 + ns as u64;
        self.now_ms += (total / 1_000_000) as u32;
        self.sub_ms_ns = (total % 1_000_000) as u32;
    }

    fn busy(&mut self) -> bool {
        let level = if self.busy_stuck_high || self.busy_latched {
            true
        } else if self.busy_never_rises
            || (self.reading && self.busy_stall == Some(BusyStall::ReadFrame))
        {
            false
        } else {
            self.nss_low && self.clocked
        };
        if self.last_busy != Some(level) {
            self.events.push(Event::Busy(level));
            self.last_busy = Some(level);
        }
        level
    }

    fn set_nss(&mut self, high: bool) {
        if high == !self.nss_low {
            return;
        }
        self.nss_low = !high;
        if high {
            self.events.push(Event::Deselect);
            let stall = if self.reading {
                BusyStall::AfterRead
            } else {
                BusyStall::AfterWrite
            };
            if self.clocked && self.busy_stall == Some(stall) {
                self.busy_latched = true;
            }
            let frame = core::mem::take(&mut self.frame);
            if !frame.is_empty() {
                self.execute(&frame);
            }
        } else {
            self.events.push(Event::Select);
            self.frame.clear();
            self.clocked = false;
            self.reading = false;
        }
    }

    fn set_rst(&mut self, high: bool) {
        if high && !self.rst_high {
            self.reset_count += 1;
            self.regs = [0; 0x30];
            self.rf_on = false;
            self.stalled = false;
            self.rx.clear();
            if !self.never_idle {
                self.regs[addr::IRQ_STATUS as usize] = IRQ_IDLE;
            }
        }
        self.rst_high = high;
    }

    fn spi_write(&mut self, words: &[u8]) {
        if self.nss_low {
            self.frame.extend_from_slice(words);
            self.clocked = true;
        }
        self.events.push(Event::Write(words.to_vec()));
    }

    fn spi_read(&mut self, words: &mut [u8]) {
        let available = self.response.len().min(words.len());
        words[..available].copy_from_slice(&self.response[..available]);
        words[available..].fill(0xFF);
        self.response.clear();
        if self.nss_low {
            self.clocked = true;
            self.reading = true;
        }
        self.events.push(Event::Read(words.len()));
    }

    fn reg(&self, address: u8) -> u32 {
        self.regs[address as usize]
    }

    fn set_state(&mut self, state: u32) {
        let rf_status = &mut self.regs[addr::RF_STATUS as usize];
        *rf_status = (*rf_status & !(0b111 << 24)) | (state << 24);
    }

    fn state(&self) -> u32 {
        (self.reg(addr::RF_STATUS) >> 24) & 0b111
    }

    fn store(&mut self, address: u8, value: u32) {
        if address == addr::IRQ_CLEAR {
            self.regs[addr::IRQ_STATUS as usize] &= !value;
            return;
        }
        self.regs[address as usize] = value;
        if address == addr::SYSTEM_CONFIG {
            match value & 0b111 {
                0 => self.set_state(STATE_IDLE),
                3 if self.refuse_transceive || self.stalled => self.set_state(STATE_IDLE),
                3 => self.set_state(STATE_WAIT_TRANSMIT),
                _ => {}
            }
        }
    }

    fn execute(&mut self, frame: &[u8]) {
        let value = |f: &[u8]| u32::from_le_bytes([f[2], f[3], f[4], f[5]]);
        match frame[0] {
            op if op == Command::WriteRegister as u8 => self.store(frame[1], value(frame)),
            op if op == Command::WriteRegisterOrMask as u8 => {
                let v = self.reg(frame[1]) | value(frame);
                self.store(frame[1], v)
            }
            op if op == Command::WriteRegisterAndMask as u8 => {
                let v = self.reg(frame[1]) & value(frame);
                self.store(frame[1], v)
            }
            op if op == Command::ReadRegister as u8 => {
                self.response = self.reg(frame[1]).to_le_bytes().to_vec()
            }
            op if op == Command::ReadEeprom as u8 => {
                let start = frame[1] as usize;
                let end = (start + frame[2] as usize).min(self.eeprom.len());
                self.response = self.eeprom[start..end].to_vec();
            }
            op if op == Command::SendData as u8 => self.transmit(frame[1], &frame[2..]),
            op if op == Command::ReadData as u8 => self.response = self.rx.clone(),
            op if op == Command::LoadRfConfig as u8 => {
                self.rf_config = Some(RfConfig {
                    tx: frame[1],
                    rx: frame[2],
                })
            }
            op if op == Command::RfOn as u8 => {
                if !self.rf_on_fails {
                    self.rf_on = true;
                    self.regs[addr::IRQ_STATUS as usize] |= IRQ_TX_RFON;
                }
            }
            op if op == Command::RfOff as u8 => {
                self.rf_on = false;
                self.regs[addr::IRQ_STATUS as usize] |= IRQ_TX_RFOFF;
            }
            _ => {}
        }
    }

    fn crc(&self) -> (bool, bool) {
        (
            self.reg(addr::CRC_TX_CONFIG) & 1 != 0,
            self.reg(addr::CRC_RX_CONFIG) & 1 != 0,
        )
    }

    fn transmit(&mut self, valid_bits: u8, data: &[u8]) {
        let mut sent = vec![valid_bits];
        sent.extend_from_slice(data);
        self.sent.push(sent);

        if self.state() != STATE_WAIT_TRANSMIT || !self.rf_on {
            return;
        }
        self.regs[addr::IRQ_STATUS as usize] |= IRQ_TX;

        let crc_off = self.crc() == (false, false);
        let crc_on = self.crc() == (true, true);
        let answer = match (self.card, valid_bits, data) {
            (Some(card), 7, [0x26]) => Some((card.atqa.to_vec(), 2)),
            (Some(card), 0, [0x93, 0x20]) if crc_off => {
                if self.stall_after_cl1 {
                    self.stalled = true;
                }
                Some((card.cl1.to_vec(), card.cl1_len))
            }
            (Some(card), 0, [0x93, 0x70, uid @ ..]) if crc_on && *uid == card.cl1[..] => {
                Some((vec![card.sak], 1))
            }
            (Some(card), 0, [0x95, 0x20]) if crc_off => Some((card.cl2.to_vec(), 5)),
            (Some(card), 0, [0x95, 0x70, uid @ ..]) if crc_on && *uid == card.cl2[..] => {
                Some((vec![0x08], 1))
            }
            _ => None,
        };

        match answer {
            Some((rx, len)) => {
                self.rx = rx;
                self.regs[addr::RX_STATUS as usize] = len;
                self.regs[addr::IRQ_STATUS as usize] |= IRQ_RX;
                self.set_state(STATE_WAIT_TRANSMIT);
            }
            None => {
                self.rx.clear();
                self.regs[addr::RX_STATUS as usize] = 0;
                self.set_state(STATE_WAIT_RECEIVE);
            }
        }
    }
}

pub type SharedChip = Rc<RefCell<Chip>>;

/// SPI bus reaching every chip wired to it, only the selected one listens
pub struct SimBus {
    chips: Vec<SharedChip>,
}

impl SimBus {
    pub fn new(chips: &[SharedChip]) -> Self {
        Self {
            chips: chips.to_vec(),
        }
    }

    fn selected(&self) -> impl Iterator<Item = &SharedChip> {
        self.chips.iter().filter(|c| c.borrow().nss_low)
    }
}

impl spi::ErrorType for SimBus {
    type Error = Infallible;
}

impl SpiBus for SimBus {
    fn read(&mut self, words: &mut [u8]) -> Result<(), Infallible> {
        words.fill(0xFF);
        for chip in self.selected() {
            chip.borrow_mut().spi_read(words);
        }
        Ok(())
    }

    fn write(&mut self, words: &[u8]) -> Result<(), Infallible> {
        for chip in self.selected() {
            chip.borrow_mut().spi_write(words);
        }
        Ok(())
    }

    fn transfer(&mut self, read: &mut [u8], write: &[u8]) -> Result<(), Infallible> {
        self.write(write)?;
        self.read(read)
    }

    fn transfer_in_place(&mut self, words: &mut [u8]) -> Result<(), Infallible> {
        let sent = words.to_vec();
        self.transfer(words, &sent)
    }

    fn flush(&mut self) -> Result<(), Infallible> {
        Ok(())
    }
}

pub struct Nss(SharedChip);
pub struct Rst(SharedChip);
pub struct Busy(SharedChip);
pub struct Delay(SharedChip);
pub struct SimClock(SharedChip);

impl digital::ErrorType for Nss {
    type Error = Infallible;
}

impl OutputPin for Nss {
    fn set_low(&mut self) -> Result<(), Infallible> {
        self.0.borrow_mut().set_nss(false);
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Infallible> {
        self.0.borrow_mut().set_nss(true);
        Ok(())
    }
}

impl digital::ErrorType for Rst {
    type Error = Infallible;
}

impl OutputPin for Rst {
    fn set_low(&mut self) -> Result<(), Infallible> {
        self.0.borrow_mut().set_rst(false);
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Infallible> {
        self.0.borrow_mut().set_rst(true);
        Ok(())
    }
}

impl digital::ErrorType for Busy {
    type Error = Infallible;
}

impl InputPin for Busy {
    fn is_high(&mut self) -> Result<bool, Infallible> {
        Ok(self.0.borrow_mut().busy())
    }

    fn is_low(&mut self) -> Result<bool, Infallible> {
        self.is_high().map(|high| !high)
    }
}

impl DelayNs for Delay {
    fn delay_ns(&mut self, ns: u32) {
        self.0.borrow_mut().advance_ns(ns)
    }

    fn delay_us(&mut self, us: u32) {
        let mut chip = self.0.borrow_mut();
        chip.now_ms += us / 1_000;
        chip.advance_ns((us % 1_000) * 1_000);
    }

    fn delay_ms(&mut self, ms: u32) {
        self.0.borrow_mut().now_ms += ms
    }
}

/// Every reading moves time forward by a millisecond
impl Clock for SimClock {
    fn now(&mut self) -> Instant {
        let mut chip = self.0.borrow_mut();
        let now = chip.now_ms;
        chip.now_ms += 1;
        Instant::from_ticks(now)
    }
}

pub type SimInterface<B = SimBus> = BusyInterface<B, Nss, Rst, Busy, Delay, SimClock>;

/// Reader driving `chip` through `bus`
pub fn reader_on<B: SpiBus>(bus: B, chip: &SharedChip, config: Config) -> Pn5180<SimInterface<B>> {
    Pn5180::new(
        bus,
        Nss(chip.clone()),
        Rst(chip.clone()),
        Busy(chip.clone()),
        Delay(chip.clone()),
        SimClock(chip.clone()),
        config,
    )
}

/// Reader alone on its bus, with `card` in the field
pub fn reader(config: Config, card: Option<Card>) -> (Pn5180<SimInterface>, SharedChip) {
    let chip = Rc::new(RefCell::new(Chip::new(card)));
    let bus = SimBus::new(&[chip.clone()]);
    (reader_on(bus, &chip, config), chip)
}
