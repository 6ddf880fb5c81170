use bilge::prelude::*;

use crate::{interface::Interface, Result};

/// Register addresses
pub mod addr {
    pub const SYSTEM_CONFIG: u8 = 0x00;
    pub const IRQ_ENABLE: u8 = 0x01;
    pub const IRQ_STATUS: u8 = 0x02;
    pub const IRQ_CLEAR: u8 = 0x03;
    pub const TRANSCEIVE_CONTROL: u8 = 0x04;
    pub const TIMER1_RELOAD: u8 = 0x0C;
    pub const TIMER1_CONFIG: u8 = 0x0F;
    pub const RX_WAIT_CONFIG: u8 = 0x11;
    pub const CRC_RX_CONFIG: u8 = 0x12;
    pub const RX_STATUS: u8 = 0x13;
    pub const TX_WAIT_CONFIG: u8 = 0x17;
    pub const TX_CONFIG: u8 = 0x18;
    pub const CRC_TX_CONFIG: u8 = 0x19;
    pub const RF_STATUS: u8 = 0x1D;
    pub const SYSTEM_STATUS: u8 = 0x24;
    pub const TEMP_CONTROL: u8 = 0x25;
}

/// EEPROM addresses
pub mod eeprom {
    /// 16 bytes
    pub const DIE_IDENTIFIER: u8 = 0x00;
    pub const PRODUCT_VERSION: u8 = 0x10;
    pub const FIRMWARE_VERSION: u8 = 0x12;
    pub const EEPROM_VERSION: u8 = 0x14;
    pub const IRQ_PIN_CONFIG: u8 = 0x1A;
}

/// A 32 bit chip register
///
/// Registers are never cached, every read goes to the chip.
pub trait Register: Copy + Sized + From<u32> + Into<u32> {
    const ADDRESS: u8;
    fn read<I: Interface>(iface: &mut I) -> Result<Self> {
        iface.read_register(Self::ADDRESS).map(Self::from)
    }
    fn write<I: Interface>(self, iface: &mut I) -> Result<()> {
        iface.write_register(Self::ADDRESS, self.into())
    }
    /// Sets the bits of `mask` with the chip's OR mask instruction
    fn set_bits<I: Interface>(iface: &mut I, mask: Self) -> Result<()> {
        iface.write_register_or_mask(Self::ADDRESS, mask.into())
    }
    /// Clears the bits of `mask` with the chip's AND mask instruction
    fn clear_bits<I: Interface>(iface: &mut I, mask: Self) -> Result<()> {
        let mask: u32 = mask.into();
        iface.write_register_and_mask(Self::ADDRESS, !mask)
    }
}

macro_rules! register_impl {
    ($type:ty, $addr:expr) => {
        impl Register for $type {
            const ADDRESS: u8 = $addr;
        }
    };
}

pub mod system_config {
    use bilge::prelude::*;

    /// Command executed by the transceive state machine
    #[bitsize(3)]
    #[derive(FromBits, Debug, Clone, Copy, Default, PartialEq, Eq)]
    pub enum SystemCommand {
        /// Idle / StopCom
        #[default]
        Idle = 0b000,
        Transmit = 0b001,
        Receive = 0b010,
        Transceive = 0b011,
        KeepCommand = 0b100,
        LoopBack = 0b101,
        Prbs = 0b110,
        Reserved = 0b111,
    }
}

register_impl!(SystemConfig, addr::SYSTEM_CONFIG);
/// System configuration register
#[bitsize(32)]
#[derive(FromBits, DebugBits, Clone, Copy, Default, PartialEq, Eq)]
pub struct SystemConfig {
    pub command: system_config::SystemCommand,
    /// Starts the transmission, set automatically by SEND_DATA
    pub start_send: bool,
    reserved: u2,
    /// Enables the Mifare Classic crypto unit
    pub mfc_crypto_on: bool,
    reserved: u25,
}

impl SystemConfig {
    /// Covers the whole command field
    pub fn command_mask() -> Self {
        Self::from(0b111u32)
    }
    pub fn new_command(cmd: system_config::SystemCommand) -> Self {
        let mut reg = Self::default();
        reg.set_command(cmd);
        reg
    }
    pub fn new_mfc_crypto_on() -> Self {
        let mut reg = Self::default();
        reg.set_mfc_crypto_on(true);
        reg
    }
}

register_impl!(IrqStatus, addr::IRQ_STATUS);
/// Interrupt status register
///
/// The same layout is used to acknowledge interrupts through `IRQ_CLEAR`
#[bitsize(32)]
#[derive(FromBits, DebugBits, Clone, Copy, Default, PartialEq, Eq)]
pub struct IrqStatus {
    /// End of RF reception
    pub rx: bool,
    /// End of RF transmission
    pub tx: bool,
    /// Command finished, chip idle
    pub idle: bool,
    pub mode_detected: bool,
    pub card_activated: bool,
    pub state_change: bool,
    /// External RF field switched off
    pub rfoff_det: bool,
    /// External RF field switched on
    pub rfon_det: bool,
    /// Own RF field switched off
    pub tx_rfoff: bool,
    /// Own RF field switched on
    pub tx_rfon: bool,
    pub rf_active_error: bool,
    pub timer0: bool,
    pub timer1: bool,
    pub timer2: bool,
    /// Start of frame detected
    pub rx_sof_det: bool,
    /// Subcarrier detected
    pub rx_sc_det: bool,
    pub tempsens_error: bool,
    pub general_error: bool,
    pub hv_error: bool,
    /// Low power card detection
    pub lpcd: bool,
    reserved: u12,
}

impl IrqStatus {
    pub fn new_idle() -> Self {
        let mut irq = Self::default();
        irq.set_idle(true);
        irq
    }
    pub fn new_tx_rfon() -> Self {
        let mut irq = Self::default();
        irq.set_tx_rfon(true);
        irq
    }
    pub fn all() -> Self {
        Self::from(u32::MAX)
    }
    /// Any bit of `mask` set in `self`
    pub fn any(&self, mask: Self) -> bool {
        u32::from(*self) & u32::from(mask) != 0
    }
}

register_impl!(IrqClear, addr::IRQ_CLEAR);
/// Writing a bit acknowledges the matching [`IrqStatus`] bit
#[bitsize(32)]
#[derive(FromBits, DebugBits, Clone, Copy, Default, PartialEq, Eq)]
pub struct IrqClear(pub IrqStatus);

register_impl!(CrcRxConfig, addr::CRC_RX_CONFIG);
#[bitsize(32)]
#[derive(FromBits, DebugBits, Clone, Copy, Default, PartialEq, Eq)]
pub struct CrcRxConfig {
    /// Check and strip the CRC of received frames
    pub enable: bool,
    reserved: u31,
}

register_impl!(CrcTxConfig, addr::CRC_TX_CONFIG);
#[bitsize(32)]
#[derive(FromBits, DebugBits, Clone, Copy, Default, PartialEq, Eq)]
pub struct CrcTxConfig {
    /// Append a CRC to transmitted frames
    pub enable: bool,
    reserved: u31,
}

impl CrcRxConfig {
    pub fn new_enable() -> Self {
        Self::from(1u32)
    }
}

impl CrcTxConfig {
    pub fn new_enable() -> Self {
        Self::from(1u32)
    }
}

register_impl!(RxStatus, addr::RX_STATUS);
/// Reception status register
#[bitsize(32)]
#[derive(FromBits, DebugBits, Clone, Copy, Default, PartialEq, Eq)]
pub struct RxStatus {
    /// Bytes received in the last frame
    pub num_bytes: u9,
    pub num_frames: u4,
    /// Valid bits in the last byte, 0 means all of them
    pub num_last_bits: u3,
    pub data_integrity_error: bool,
    pub protocol_error: bool,
    pub collision_detected: bool,
    pub collision_position: u7,
    reserved: u6,
}

pub mod rf_status {
    use bilge::prelude::*;

    /// State of the transceive state machine
    #[bitsize(3)]
    #[derive(FromBits, Debug, Clone, Copy, Default, PartialEq, Eq)]
    pub enum TransceiveState {
        #[default]
        Idle = 0,
        WaitTransmit = 1,
        Transmitting = 2,
        WaitReceive = 3,
        WaitForData = 4,
        Receiving = 5,
        LoopBack = 6,
        Reserved = 7,
    }

    #[cfg(feature = "defmt")]
    impl defmt::Format for TransceiveState {
        fn format(&self, fmt: defmt::Formatter) {
            let name = match self {
                Self::Idle => "Idle",
                Self::WaitTransmit => "WaitTransmit",
                Self::Transmitting => "Transmitting",
                Self::WaitReceive => "WaitReceive",
                Self::WaitForData => "WaitForData",
                Self::Receiving => "Receiving",
                Self::LoopBack => "LoopBack",
                Self::Reserved => "Reserved",
            };
            defmt::write!(fmt, "{=str}", name)
        }
    }
}

register_impl!(RfStatus, addr::RF_STATUS);
/// RF status register
#[bitsize(32)]
#[derive(FromBits, DebugBits, Clone, Copy, Default, PartialEq, Eq)]
pub struct RfStatus {
    reserved: u24,
    pub transceive_state: rf_status::TransceiveState,
    reserved: u5,
}
