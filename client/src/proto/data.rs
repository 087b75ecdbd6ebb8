use crate::stun::attributes::*;
use crate::stun::message::*;

// Data represents DATA attribute.
//
// The DATA attribute is present in all Send and Data indications. The
// value portion of this attribute is variable length and consists of
// the application data (that is, the data that would immediately follow
// the UDP header if the data was sent directly between the client and
// the peer).
//
// RFC 5766 Section 14.4
#[derive(Default, Debug, PartialEq, Eq, Clone)]
pub struct Data(pub Vec<u8>);

impl Setter for Data {
    // add_to adds DATA to message.
    fn add_to(&self, m: &mut Message) -> Result<(), crate::stun::Error> {
        m.add(ATTR_DATA, &self.0);
        Ok(())
    }
}

impl Getter for Data {
    // get_from decodes DATA from message.
    fn get_from(&mut self, m: &Message) -> Result<(), crate::stun::Error> {
        self.0 = m.get(ATTR_DATA)?;
        Ok(())
    }
}
