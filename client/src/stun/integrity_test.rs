use super::*;
use crate::stun::agent::TransactionId;
use crate::stun::fingerprint::FINGERPRINT;

#[test]
fn test_message_integrity_long_term_key() {
    let i = MessageIntegrity::new_long_term_integrity(
        "user".to_owned(),
        "realm".to_owned(),
        "pass".to_owned(),
    );
    assert_eq!(16, i.0.len(), "long-term key should be an md5 digest");

    let same = MessageIntegrity::new_long_term_integrity(
        "user".to_owned(),
        "realm".to_owned(),
        "pass".to_owned(),
    );
    assert_eq!(i, same, "should be deterministic");

    let other = MessageIntegrity::new_long_term_integrity(
        "user".to_owned(),
        "realm".to_owned(),
        "other".to_owned(),
    );
    assert_ne!(i, other, "should depend on the password");
}

#[test]
fn test_message_integrity_short_term_key() {
    let i = MessageIntegrity::new_short_term_integrity("pass".to_owned());
    assert_eq!(b"pass".to_vec(), i.0, "should use the raw password");
}

#[test]
fn test_message_integrity_add_to() -> Result<()> {
    let mut m = Message::new();
    m.build(&[
        Box::new(TransactionId::new()),
        Box::new(MessageIntegrity::new_short_term_integrity("pass".to_owned())),
    ])?;

    let v = m.get(ATTR_MESSAGE_INTEGRITY)?;
    assert_eq!(
        MESSAGE_INTEGRITY_SIZE,
        v.len(),
        "should be an hmac-sha1 digest"
    );

    let mut decoded = Message::new();
    decoded.raw = m.raw.clone();
    decoded.decode()?;
    let v = decoded.get(ATTR_MESSAGE_INTEGRITY)?;
    assert_eq!(MESSAGE_INTEGRITY_SIZE, v.len(), "should survive a decode");

    Ok(())
}

#[test]
fn test_message_integrity_rejects_fingerprint_first() {
    let mut m = Message::new();
    let result = m.build(&[
        Box::new(TransactionId::new()),
        Box::new(FINGERPRINT),
        Box::new(MessageIntegrity::new_short_term_integrity("pass".to_owned())),
    ]);
    assert_eq!(result, Err(Error::ErrFingerprintBeforeIntegrity));
}
