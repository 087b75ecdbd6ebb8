#[cfg(test)]
#[path = "chandata_test.rs"]
mod chandata_test;

use super::channum::*;
use crate::error::*;
use crate::stun::attributes::nearest_padded_value_length;

// ChannelData represents The ChannelData Message.
//
// See RFC 5766 Section 11.4
#[derive(Default, Debug, PartialEq, Eq, Clone)]
pub struct ChannelData {
    pub data: Vec<u8>,
    pub number: ChannelNumber,
    pub raw: Vec<u8>,
}

pub(crate) const CHANNEL_DATA_LENGTH_SIZE: usize = 2;
pub(crate) const CHANNEL_DATA_NUMBER_SIZE: usize = CHANNEL_DATA_LENGTH_SIZE;
pub(crate) const CHANNEL_DATA_HEADER_SIZE: usize =
    CHANNEL_DATA_LENGTH_SIZE + CHANNEL_DATA_NUMBER_SIZE;

impl ChannelData {
    // reset resets length, data and raw length.
    pub fn reset(&mut self) {
        self.raw.clear();
        self.data.clear();
    }

    // encode encodes ChannelData Message to raw.
    pub fn encode(&mut self) {
        self.raw = Vec::with_capacity(CHANNEL_DATA_HEADER_SIZE + self.data.len());
        self.raw.extend_from_slice(&[0; CHANNEL_DATA_HEADER_SIZE]);
        self.write_header();
        self.raw.extend_from_slice(&self.data);

        // The ChannelData message is padded to a multiple of four bytes
        // to align on 32-bit boundaries, but the length field reflects
        // only the application data.
        let padded = nearest_padded_value_length(self.raw.len());
        let bytes_to_add = padded - self.raw.len();
        if bytes_to_add > 0 {
            self.raw.extend_from_slice(&vec![0; bytes_to_add]);
        }
    }

    // decode decodes The ChannelData Message from raw.
    pub fn decode(&mut self) -> Result<()> {
        let buf = &self.raw;
        if buf.len() < CHANNEL_DATA_HEADER_SIZE {
            return Err(Error::ErrUnexpectedEof);
        }

        let num = u16::from_be_bytes([buf[0], buf[1]]);
        if !is_channel_number_valid(num) {
            return Err(Error::ErrInvalidChannelNumber);
        }
        self.number = ChannelNumber(num);

        let l = u16::from_be_bytes([buf[2], buf[3]]) as usize;
        if l > buf[CHANNEL_DATA_HEADER_SIZE..].len() {
            return Err(Error::ErrBadChannelDataLength);
        }
        self.data = buf[CHANNEL_DATA_HEADER_SIZE..CHANNEL_DATA_HEADER_SIZE + l].to_vec();

        Ok(())
    }

    // write_header writes channel number and length to raw.
    pub fn write_header(&mut self) {
        if self.raw.len() < CHANNEL_DATA_HEADER_SIZE {
            // e.g. when raw is nil
            self.raw
                .extend_from_slice(&vec![0; CHANNEL_DATA_HEADER_SIZE - self.raw.len()]);
        }
        self.raw[..CHANNEL_DATA_NUMBER_SIZE].copy_from_slice(&self.number.0.to_be_bytes());
        self.raw[CHANNEL_DATA_NUMBER_SIZE..CHANNEL_DATA_HEADER_SIZE]
            .copy_from_slice(&(self.data.len() as u16).to_be_bytes());
    }

    // is_channel_data returns true if buf looks like the ChannelData Message.
    pub fn is_channel_data(buf: &[u8]) -> bool {
        if buf.len() < CHANNEL_DATA_HEADER_SIZE {
            return false;
        }

        if u16::from_be_bytes([buf[2], buf[3]]) as usize > buf[CHANNEL_DATA_HEADER_SIZE..].len() {
            return false;
        }

        // Quick check for channel number.
        let num = u16::from_be_bytes([buf[0], buf[1]]);
        is_channel_number_valid(num)
    }
}

// is_channel_number_valid returns true if c in [0x4000, 0x7FFF].
fn is_channel_number_valid(c: u16) -> bool {
    (MIN_CHANNEL_NUMBER..=MAX_CHANNEL_NUMBER).contains(&c)
}
