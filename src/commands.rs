/// Host interface instructions
///
/// First byte of every frame sent to the PN5180, see the datasheet section 11.4.3
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Command {
    /// Writes one 32 bit register value
    WriteRegister = 0x00,
    /// Sets one 32 bit register value using a 32 bit OR mask
    WriteRegisterOrMask = 0x01,
    /// Sets one 32 bit register value using a 32 bit AND mask
    WriteRegisterAndMask = 0x02,
    /// Reads one 32 bit register value
    ReadRegister = 0x04,
    /// Reads a byte array from the EEPROM, starting at an address
    ReadEeprom = 0x07,
    /// Writes data into the transmission buffer, `START_SEND` is set automatically
    SendData = 0x09,
    /// Reads data from the reception buffer after a successful reception
    ReadData = 0x0A,
    /// Loads the RF configuration from EEPROM into the configuration registers
    LoadRfConfig = 0x11,
    /// Switches the RF field on
    RfOn = 0x16,
    /// Switches the RF field off
    RfOff = 0x17,
}

/// RF configuration profiles for [`Command::LoadRfConfig`]
pub mod rf_config {
    pub const ISO_14443A_106_TX: u8 = 0x00;
    pub const ISO_14443A_106_RX: u8 = 0x80;
}

/// Pair of TX and RX configuration indices loaded together
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RfConfig {
    pub tx: u8,
    pub rx: u8,
}

impl RfConfig {
    pub const ISO_14443A_106: Self = Self {
        tx: rf_config::ISO_14443A_106_TX,
        rx: rf_config::ISO_14443A_106_RX,
    };
}

impl Default for RfConfig {
    fn default() -> Self {
        Self::ISO_14443A_106
    }
}

/// Size of the PN5180 transmission buffer
pub const TX_BUFFER_LEN: usize = 260;

/// Encodes a single register write instruction, the value is sent little endian
pub fn register_frame(cmd: Command, addr: u8, value: u32) -> [u8; 6] {
    let v = value.to_le_bytes();
    [cmd as u8, addr, v[0], v[1], v[2], v[3]]
}
