use core::fmt::Write as _;

use heapless::String;

use crate::{
    elapsed,
    interface::Interface,
    registers::{
        system_config::SystemCommand, CrcRxConfig, CrcTxConfig, IrqStatus, Register, SystemConfig,
    },
    Error, Pn5180, ProtocolError, Result, TransceiveState,
};

/// Short frame waking idle cards, sent with 7 valid bits
pub const REQA: u8 = 0x26;
/// First byte of a cascade level 1 answer when the UID continues on the next level
pub const CASCADE_TAG: u8 = 0x88;
/// NVB of an anticollision frame, no UID bits known yet
pub const NVB_ANTICOLLISION: u8 = 0x20;
/// NVB of a SELECT frame, the whole UID fragment and BCC follow
pub const NVB_SELECT: u8 = 0x70;
/// SAK bit set while the UID isn't complete
pub const SAK_CASCADE_BIT: u8 = 0x04;

/// Valid bits of the REQA short frame
const SHORT_FRAME_BITS: u8 = 7;
/// UID fragment and BCC answered to an anticollision frame
const FRAGMENT_LEN: u16 = 5;

/// Select command byte of each cascade level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum CascadeLevel {
    One = 0x93,
    Two = 0x95,
}

impl CascadeLevel {
    pub fn anticollision_frame(self) -> [u8; 2] {
        [self as u8, NVB_ANTICOLLISION]
    }

    pub fn select_frame(self, fragment: &[u8; 5]) -> [u8; 7] {
        let f = fragment;
        [self as u8, NVB_SELECT, f[0], f[1], f[2], f[3], f[4]]
    }
}

/// Block check character, XOR of the UID fragment bytes
pub fn bcc(fragment: &[u8]) -> u8 {
    fragment.iter().fold(0, |acc, b| acc ^ b)
}

/// UID of an ISO14443A card
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Uid {
    /// Single size, one cascade level
    Single([u8; 4]),
    /// Double size, two cascade levels
    Double([u8; 7]),
}

impl Uid {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Single(b) => b,
            Self::Double(b) => b,
        }
    }

    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        match bytes.len() {
            4 => bytes.try_into().ok().map(Self::Single),
            7 => bytes.try_into().ok().map(Self::Double),
            _ => None,
        }
    }

    /// Lower case hex, two digits per byte
    pub fn to_hex(&self) -> String<14> {
        let mut s = String::new();
        for b in self.as_bytes() {
            // at most 14 digits
            let _ = write!(s, "{:02x}", b);
        }
        s
    }
}

impl core::fmt::Display for Uid {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl<I: Interface> Pn5180<I> {
    /// Reads the UID of the card in the field, if there's one
    ///
    /// Failures are logged with the reader id and reported as no card.
    pub fn read_card_serial(&mut self) -> Option<Uid> {
        match self.try_read_card_serial() {
            Ok(uid) => uid,
            Err(e) => {
                warn!("reader {=u8}: card read failed: {}", self.config.reader_id, e);
                None
            }
        }
    }

    /// Resets the chip, switches the field on and runs REQA and the anticollision loop
    ///
    /// `Ok(None)` means no card answered.
    pub fn try_read_card_serial(&mut self) -> Result<Option<Uid>> {
        self.reset()?;
        self.setup_radio()?;
        let uid = self.activate_type_a()?;
        if let Some(uid) = uid {
            debug!("reader {=u8}: card {=[u8]:02x}", self.config.reader_id, uid.as_bytes());
        }
        Ok(uid)
    }

    fn activate_type_a(&mut self) -> Result<Option<Uid>> {
        SystemConfig::clear_bits(&mut self.iface, SystemConfig::new_mfc_crypto_on())?;
        self.set_crc(false)?;
        self.start_transceive()?;
        self.expect_wait_transmit()?;

        self.iface.send_data(SHORT_FRAME_BITS, &[REQA])?;
        self.iface.delay(self.config.reception_delay);
        let mut atqa = [0u8; 2];
        self.iface.read_data(&mut atqa)?;
        if !self.wait_for_wait_transmit()? {
            trace!("reader {=u8}: no answer to REQA", self.config.reader_id);
            return Ok(None);
        }
        self.clear_irq_status(IrqStatus::all())?;

        let Some(cl1) = self.anticollision(CascadeLevel::One)? else {
            return Ok(None);
        };

        self.set_crc(true)?;
        match self.send_frame(&CascadeLevel::One.select_frame(&cl1)) {
            Err(Error::Protocol(ProtocolError::NotWaitTransmit(state))) => {
                // no SAK to tell the UID size, keep the fragment
                debug!(
                    "reader {=u8}: not ready for SELECT ({}), single size UID assumed",
                    self.config.reader_id,
                    state
                );
                return Ok(Some(Uid::Single([cl1[1], cl1[2], cl1[3], cl1[4]])));
            }
            res => res?,
        }
        self.iface.delay(self.config.reception_delay);
        let mut sak = [0u8; 1];
        self.iface.read_data(&mut sak)?;

        if sak[0] & SAK_CASCADE_BIT == 0 {
            return Ok(Some(Uid::Single([cl1[0], cl1[1], cl1[2], cl1[3]])));
        }
        if cl1[0] != CASCADE_TAG {
            return Err(Error::Protocol(ProtocolError::MissingCascadeTag(cl1[0])));
        }

        self.set_crc(false)?;
        let Some(cl2) = self.anticollision(CascadeLevel::Two)? else {
            return Ok(None);
        };
        Ok(Some(Uid::Double([
            cl1[1], cl1[2], cl1[3], cl2[0], cl2[1], cl2[2], cl2[3],
        ])))
    }

    /// Sends the anticollision frame of `level` and reads back the UID fragment and BCC
    fn anticollision(&mut self, level: CascadeLevel) -> Result<Option<[u8; 5]>> {
        self.send_frame(&level.anticollision_frame())?;
        self.iface.delay(self.config.reception_delay);

        let received = self.rx_bytes_received()?;
        if received != FRAGMENT_LEN {
            trace!(
                "reader {=u8}: {} answer of {=u16} bytes",
                self.config.reader_id,
                level,
                received
            );
            return Ok(None);
        }
        let mut fragment = [0u8; 5];
        self.iface.read_data(&mut fragment)?;
        if bcc(&fragment[..4]) != fragment[4] {
            warn!(
                "reader {=u8}: BCC mismatch in {=[u8]:02x}",
                self.config.reader_id,
                &fragment[..]
            );
        }
        Ok(Some(fragment))
    }

    /// Puts the transceiver back in transceive mode and sends `data`, all bits of the last
    /// byte valid
    fn send_frame(&mut self, data: &[u8]) -> Result<()> {
        self.start_transceive()?;
        self.expect_wait_transmit()?;
        self.iface.send_data(0, data)
    }

    fn start_transceive(&mut self) -> Result<()> {
        SystemConfig::clear_bits(&mut self.iface, SystemConfig::command_mask())?;
        SystemConfig::set_bits(
            &mut self.iface,
            SystemConfig::new_command(SystemCommand::Transceive),
        )
    }

    fn expect_wait_transmit(&mut self) -> Result<()> {
        match self.get_transceive_state()? {
            TransceiveState::WaitTransmit => Ok(()),
            state => {
                debug!("reader {=u8}: transceiver in {}", self.config.reader_id, state);
                Err(Error::Protocol(ProtocolError::NotWaitTransmit(state)))
            }
        }
    }

    /// Polls the transceive state for WaitTransmit, `false` if it never came back
    fn wait_for_wait_transmit(&mut self) -> Result<bool> {
        let start = self.iface.now();
        loop {
            if self.get_transceive_state()? == TransceiveState::WaitTransmit {
                return Ok(true);
            }
            if elapsed(start, self.iface.now()) > self.config.state_timeout {
                return Ok(false);
            }
        }
    }

    fn set_crc(&mut self, enable: bool) -> Result<()> {
        if enable {
            CrcRxConfig::set_bits(&mut self.iface, CrcRxConfig::new_enable())?;
            CrcTxConfig::set_bits(&mut self.iface, CrcTxConfig::new_enable())
        } else {
            CrcTxConfig::clear_bits(&mut self.iface, CrcTxConfig::new_enable())?;
            CrcRxConfig::clear_bits(&mut self.iface, CrcRxConfig::new_enable())
        }
    }
}
