#[cfg(test)]
#[path = "integrity_test.rs"]
mod integrity_test;

use crate::stun::attributes::*;
use crate::stun::error::*;
use crate::stun::message::*;

use hmac::{Hmac, Mac, NewMac};
use md5::{Digest, Md5};
use sha1::Sha1;

use std::fmt;

type HmacSha1 = Hmac<Sha1>;

// separator for credentials.
pub(crate) const CREDENTIALS_SEP: &str = ":";

pub(crate) const MESSAGE_INTEGRITY_SIZE: usize = 20;

// MessageIntegrity represents MESSAGE-INTEGRITY attribute.
//
// The value is the HMAC-SHA1 over the message up to and including the
// attribute preceding MESSAGE-INTEGRITY, with the header length field
// adjusted to point past MESSAGE-INTEGRITY.
//
// RFC 5389 Section 15.4
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct MessageIntegrity(pub Vec<u8>);

fn new_hmac_sha1(key: &[u8], message: &[u8]) -> Result<Vec<u8>> {
    let mut mac = HmacSha1::new_varkey(key).map_err(|e| Error::Other(e.to_string()))?;
    mac.update(message);
    Ok(mac.finalize().into_bytes().to_vec())
}

impl fmt::Display for MessageIntegrity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KEY: 0x{:x?}", self.0)
    }
}

impl MessageIntegrity {
    // new_long_term_integrity returns new MessageIntegrity with key for long-term
    // credentials. Password, username, and realm must be SASL-prepped.
    pub fn new_long_term_integrity(username: String, realm: String, password: String) -> Self {
        let s = [username, realm, password].join(CREDENTIALS_SEP);

        let mut h = Md5::new();
        h.update(s.as_bytes());

        MessageIntegrity(h.finalize().as_slice().to_vec())
    }

    // new_short_term_integrity returns new MessageIntegrity with key for
    // short-term credentials. Password must be SASL-prepped.
    pub fn new_short_term_integrity(password: String) -> Self {
        MessageIntegrity(password.as_bytes().to_vec())
    }
}

impl Setter for MessageIntegrity {
    // add_to adds MESSAGE-INTEGRITY attribute to message.
    fn add_to(&self, m: &mut Message) -> Result<()> {
        for a in &m.attributes.0 {
            // message should not contain FINGERPRINT attribute
            // before MESSAGE-INTEGRITY
            if a.typ == ATTR_FINGERPRINT {
                return Err(Error::ErrFingerprintBeforeIntegrity);
            }
        }

        // The text used as input to HMAC is the STUN message,
        // including the header, up to and including the attribute preceding
        // the MESSAGE-INTEGRITY attribute. The length field of the STUN message
        // header is adjusted to point to the end of the MESSAGE-INTEGRITY
        // attribute.
        let length = m.length;

        // grow m.raw to fit re-calculated header
        m.length += (MESSAGE_INTEGRITY_SIZE + ATTRIBUTE_HEADER_SIZE) as u32;
        m.write_length(); // writing length to m.raw
        let v = new_hmac_sha1(&self.0, &m.raw)?; // calculating HMAC for adjusted m.raw
        m.length = length; // changing m.length back
        m.write_length();

        m.add(ATTR_MESSAGE_INTEGRITY, &v);

        Ok(())
    }
}
