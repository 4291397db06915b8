mod common;

use common::{class_key, key_bag_blob, FILE_CLASS, PASSCODE};
use ibackup::keybag::{protection_class_bytes, KeyBag};
use ibackup::{Error, ErrorKind};

fn wrapped_file_key(key: &[u8; 32]) -> Vec<u8> {
    let mut out = vec![0u8; 40];
    aes_kw::KekAes256::from(class_key(FILE_CLASS))
        .wrap(key, &mut out)
        .unwrap();
    out
}

#[test]
fn test_parse_fixture_key_bag() {
    let bag = KeyBag::parse(&key_bag_blob()).unwrap();
    assert!(bag.is_locked());
    for class in 1..=4 {
        let key = bag.class_key(&protection_class_bytes(class)).unwrap();
        assert!(key.is_passcode_wrapped());
        assert!(!key.has_key());
    }
    assert!(!bag.class_key(&protection_class_bytes(11)).unwrap().is_passcode_wrapped());
    assert!(bag.attrs.contains_key("HMCK"));
}

#[test]
fn test_unlock_with_passcode() {
    let mut bag = KeyBag::parse(&key_bag_blob()).unwrap();
    bag.unlock(PASSCODE).unwrap();
    assert!(!bag.is_locked());
    for class in 1..=4 {
        assert!(bag.class_key(&protection_class_bytes(class)).unwrap().has_key());
    }
    assert!(!bag.class_key(&protection_class_bytes(11)).unwrap().has_key());
}

#[test]
fn test_wrong_passcode_keeps_bag_locked() {
    let mut bag = KeyBag::parse(&key_bag_blob()).unwrap();
    let err = bag.unlock("not the passcode").unwrap_err();
    assert!(matches!(err, Error::WrongPassword));
    assert_eq!(err.kind(), ErrorKind::InvalidCredential);
    assert!(bag.is_locked());

    // A failed attempt does not prevent a later one.
    bag.unlock(PASSCODE).unwrap();
    assert!(!bag.is_locked());
}

#[test]
fn test_failed_unlock_drops_earlier_keys() {
    let mut bag = KeyBag::parse(&key_bag_blob()).unwrap();
    let class = protection_class_bytes(FILE_CLASS);
    let wrapped = wrapped_file_key(&[0x5A; 32]);
    bag.unlock(PASSCODE).unwrap();
    bag.unwrap_key_for_class(&class, &wrapped).unwrap();

    let err = bag.unlock("not the passcode").unwrap_err();
    assert!(matches!(err, Error::WrongPassword));
    assert!(bag.is_locked());
    assert!(matches!(
        bag.unwrap_key_for_class(&class, &wrapped).unwrap_err(),
        Error::NotUnlocked
    ));
}

#[test]
fn test_unwrap_file_key() {
    let mut bag = KeyBag::parse(&key_bag_blob()).unwrap();
    let class = protection_class_bytes(FILE_CLASS);
    let file_key = [0x5A; 32];
    let wrapped = wrapped_file_key(&file_key);

    let err = bag.unwrap_key_for_class(&class, &wrapped).unwrap_err();
    assert!(matches!(err, Error::NotUnlocked));

    bag.unlock(PASSCODE).unwrap();
    let key = bag.unwrap_key_for_class(&class, &wrapped).unwrap();
    assert_eq!(*key, file_key);
}

#[test]
fn test_unwrap_errors() {
    let mut bag = KeyBag::parse(&key_bag_blob()).unwrap();
    bag.unlock(PASSCODE).unwrap();
    let wrapped = wrapped_file_key(&[1; 32]);

    let err = bag
        .unwrap_key_for_class(&protection_class_bytes(9), &wrapped)
        .unwrap_err();
    assert!(matches!(err, Error::MissingClass(_)));

    let err = bag
        .unwrap_key_for_class(&protection_class_bytes(11), &wrapped)
        .unwrap_err();
    assert!(matches!(err, Error::MissingClassKey(_)));

    let err = bag
        .unwrap_key_for_class(&protection_class_bytes(FILE_CLASS), &wrapped[..39])
        .unwrap_err();
    assert!(matches!(
        err,
        Error::InvalidKeyLength {
            expected: 40,
            actual: 39
        }
    ));

    // Wrapped under another class key, so the integrity check fails.
    let err = bag
        .unwrap_key_for_class(&protection_class_bytes(1), &wrapped)
        .unwrap_err();
    assert!(matches!(err, Error::KeyUnwrapFailed(_)));
}

#[test]
fn test_stream_round_trip_through_bag() {
    let mut bag = KeyBag::parse(&key_bag_blob()).unwrap();
    bag.unlock(PASSCODE).unwrap();
    let class = protection_class_bytes(FILE_CLASS);
    let wrapped = wrapped_file_key(&[9; 32]);
    let plaintext: Vec<u8> = (0..1000u32).map(|i| (i % 251) as u8).collect();

    let mut ciphertext = Vec::new();
    bag.encrypt_stream(&class, &wrapped, plaintext.as_slice(), &mut ciphertext)
        .unwrap();
    assert_eq!(ciphertext.len(), 1008);

    let mut decrypted = Vec::new();
    bag.decrypt_stream(
        &class,
        &wrapped,
        ciphertext.as_slice(),
        &mut decrypted,
        Some(plaintext.len() as u64),
    )
    .unwrap();
    assert_eq!(decrypted, plaintext);
}
