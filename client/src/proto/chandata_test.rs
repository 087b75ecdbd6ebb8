use super::*;

#[test]
fn test_channel_data_encode_decode() -> Result<()> {
    let mut c = ChannelData {
        data: vec![1, 2, 3],
        number: ChannelNumber(MIN_CHANNEL_NUMBER + 1),
        raw: vec![],
    };
    c.encode();

    // header + data, padded to a multiple of 4
    assert_eq!(c.raw.len(), CHANNEL_DATA_HEADER_SIZE + 4);
    // length field counts only application data
    assert_eq!(u16::from_be_bytes([c.raw[2], c.raw[3]]), 3);
    assert!(
        ChannelData::is_channel_data(&c.raw),
        "encoded message should be detected"
    );

    let mut decoded = ChannelData {
        raw: c.raw.clone(),
        ..Default::default()
    };
    decoded.decode()?;
    assert_eq!(decoded.number, c.number);
    assert_eq!(decoded.data, c.data);

    Ok(())
}

#[test]
fn test_channel_data_decode_invalid() {
    // truncated header
    let mut c = ChannelData {
        raw: vec![0x40],
        ..Default::default()
    };
    assert_eq!(c.decode(), Err(Error::ErrUnexpectedEof));

    // channel number outside 0x4000..=0x7FFF
    let mut c = ChannelData {
        raw: vec![0x3f, 0xff, 0x00, 0x00],
        ..Default::default()
    };
    assert_eq!(c.decode(), Err(Error::ErrInvalidChannelNumber));

    // length larger than remaining buffer
    let mut c = ChannelData {
        raw: vec![0x40, 0x00, 0x00, 0x05, 0x01, 0x02],
        ..Default::default()
    };
    assert_eq!(c.decode(), Err(Error::ErrBadChannelDataLength));
}

#[test]
fn test_is_channel_data_rejects_stun() {
    use crate::stun::agent::TransactionId;
    use crate::stun::message::*;

    let mut m = Message::new();
    m.build(&[
        Box::new(TransactionId::new()),
        Box::new(MessageType::new(METHOD_DATA, CLASS_INDICATION)),
    ])
    .unwrap();

    // STUN message types start 0b00, outside the channel number range.
    assert!(!ChannelData::is_channel_data(&m.raw));
    assert!(is_message(&m.raw));
}
