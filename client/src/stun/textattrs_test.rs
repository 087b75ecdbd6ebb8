use super::*;
use crate::stun::agent::TransactionId;

#[test]
fn test_text_attribute_add_get() -> Result<()> {
    let mut m = Message::new();
    m.build(&[
        Box::new(TransactionId::new()),
        Box::new(TextAttribute::new(ATTR_USERNAME, "user".to_owned())),
        Box::new(TextAttribute::new(ATTR_NONCE, "example-nonce".to_owned())),
    ])?;

    let username = TextAttribute::get_from_as(&m, ATTR_USERNAME)?;
    assert_eq!(username.text, "user");

    let nonce = TextAttribute::get_from_as(&m, ATTR_NONCE)?;
    assert_eq!(nonce.text, "example-nonce");

    Ok(())
}

#[test]
fn test_text_attribute_missing() {
    let m = Message::new();
    let result = TextAttribute::get_from_as(&m, ATTR_REALM);
    assert_eq!(result.err(), Some(Error::ErrAttributeNotFound));
}

#[test]
fn test_text_attribute_overflow() {
    let mut m = Message::new();
    let attr = TextAttribute::new(ATTR_NONCE, String::from_utf8(vec![b'a'; 1024]).unwrap());
    let result = attr.add_to(&mut m);
    assert_eq!(result, Err(Error::ErrAttributeSizeOverflow));
}
