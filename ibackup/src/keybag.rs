//! Key bag parsing and unlocking
//!
//! The key bag is embedded in the top-level manifest of an encrypted container.
//! It carries one wrapped content key per protection class plus the salts and
//! iteration counts needed to turn a passcode into the key-encryption key.
//!
//! ## Layout
//!
//! The blob is a flat TLV stream (see [`tlv`]). The first `UUID` and `WRAP`
//! records describe the bag itself. Every later `UUID` starts a new class key
//! record; `CLAS`, `WRAP`, `WPKY`, `KTYP` and `PBKY` attach to the record being
//! built. Any other tag is a bag-level attribute (`VERS`, `SALT`, `ITER`, `DPSL`,
//! `DPIC`, `HMCK`, ...).
//!
//! ```text
//! VERS TYPE UUID HMCK WRAP SALT ITER DPWT DPIC DPSL
//! UUID CLAS WRAP KTYP WPKY      <- class key 1
//! UUID CLAS WRAP KTYP WPKY      <- class key 2
//! ...
//! ```
//!
//! ## Unlocking
//!
//! 1. PBKDF2-HMAC-SHA256(passcode, `DPSL`, `DPIC`) -> 32 bytes
//! 2. PBKDF2-HMAC-SHA1(step 1, `SALT`, `ITER`) -> 32 byte key-encryption key
//! 3. AES key unwrap (RFC 3394) of every passcode-wrapped `WPKY`
//!
//! Bags written by older devices have no `DPSL`/`DPIC`; step 1 is skipped for them.

pub mod tlv;

use crate::cipher::StreamCipher;
use crate::error::{Error, Result};
use std::collections::HashMap;
use std::io::{Read, Write};
use std::num::NonZeroU32;
use std::path::Path;
use tracing::{debug, warn};
use zeroize::Zeroizing;

pub const WRAP_DEVICE: u32 = 1;
pub const WRAP_PASSCODE: u32 = 2;

/// Length of an AES-wrapped 256-bit key.
pub const WRAPPED_KEY_LENGTH: usize = 40;

const CLASS_KEY_TAGS: [&[u8; 4]; 5] = [b"CLAS", b"WRAP", b"WPKY", b"KTYP", b"PBKY"];

/// Big endian byte form of a numeric protection class, as stored in `CLAS`.
pub fn protection_class_bytes(class: u32) -> [u8; 4] {
    class.to_be_bytes()
}

/// One per-protection-class record of the bag.
#[derive(Clone)]
pub struct ClassKey {
    pub uuid: Vec<u8>,
    pub clas: Vec<u8>,
    pub wrap: Option<Vec<u8>>,
    pub wpky: Option<Vec<u8>>,
    pub ktyp: Option<Vec<u8>>,
    pub pbky: Option<Vec<u8>>,
    key: Option<Zeroizing<Vec<u8>>>,
}

impl std::fmt::Debug for ClassKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClassKey")
            .field("clas", &self.clas)
            .field("wrap", &self.wrap)
            .field("ktyp", &self.ktyp)
            .field("unlocked", &self.key.is_some())
            .finish()
    }
}

impl ClassKey {
    fn new(uuid: Vec<u8>) -> Self {
        ClassKey {
            clas: uuid.clone(),
            uuid,
            wrap: None,
            wpky: None,
            ktyp: None,
            pbky: None,
            key: None,
        }
    }

    fn set(&mut self, tag: &[u8; 4], value: Vec<u8>) {
        match tag {
            b"CLAS" => self.clas = value,
            b"WRAP" => self.wrap = Some(value),
            b"WPKY" => self.wpky = Some(value),
            b"KTYP" => self.ktyp = Some(value),
            b"PBKY" => self.pbky = Some(value),
            _ => {}
        }
    }

    /// Wrap flags, if the record has a 4-byte `WRAP` value.
    pub fn wrap_flags(&self) -> Option<u32> {
        self.wrap.as_deref().and_then(|w| tlv::be_u32(w).ok())
    }

    pub fn is_passcode_wrapped(&self) -> bool {
        self.wrap_flags()
            .map(|flags| flags & WRAP_PASSCODE != 0)
            .unwrap_or(false)
    }

    pub fn has_key(&self) -> bool {
        self.key.is_some()
    }
}

/// The key bag of an encrypted container.
#[derive(Debug, Clone)]
pub struct KeyBag {
    pub bag_type: u32,
    pub uuid: Option<Vec<u8>>,
    pub wrap: Option<Vec<u8>>,
    /// Class key records, keyed by the exact bytes of their `CLAS` value.
    pub class_keys: HashMap<Vec<u8>, ClassKey>,
    pub attrs: HashMap<String, Vec<u8>>,
    unlocked: bool,
}

impl KeyBag {
    pub fn parse(data: &[u8]) -> Result<KeyBag> {
        let mut bag = KeyBag {
            bag_type: 0,
            uuid: None,
            wrap: None,
            class_keys: HashMap::new(),
            attrs: HashMap::new(),
            unlocked: false,
        };
        let mut current: Option<ClassKey> = None;

        for record in tlv::read_records(data)? {
            match &record.tag {
                b"TYPE" => {
                    if record.value.len() != 4 {
                        return Err(Error::InvalidFormat(format!(
                            "expected integer in key bag but got {} bytes",
                            record.value.len()
                        )));
                    }
                    bag.bag_type = tlv::be_u32(&record.value)?;
                    if bag.bag_type > 3 {
                        return Err(Error::InvalidFormat(format!(
                            "expected key bag type <= 3 but got {}",
                            bag.bag_type
                        )));
                    }
                }
                b"UUID" if bag.uuid.is_none() => {
                    if record.value.len() != 16 {
                        return Err(Error::InvalidFormat(format!(
                            "expected 16 byte uuid in key bag but got {} bytes",
                            record.value.len()
                        )));
                    }
                    bag.uuid = Some(record.value);
                }
                b"WRAP" if bag.wrap.is_none() => bag.wrap = Some(record.value),
                b"UUID" => {
                    if let Some(finished) = current.take() {
                        bag.commit(finished);
                    }
                    current = Some(ClassKey::new(record.value));
                }
                tag if CLASS_KEY_TAGS.contains(&tag) => match current.as_mut() {
                    Some(class_key) => class_key.set(tag, record.value),
                    None => debug!(tag = record.tag_str(), "class key tag outside a class record"),
                },
                _ => {
                    bag.attrs
                        .insert(record.tag_str().to_string(), record.value);
                }
            }
        }
        if let Some(finished) = current.take() {
            bag.commit(finished);
        }

        debug!(classes = bag.class_keys.len(), "parsed key bag");
        Ok(bag)
    }

    fn commit(&mut self, class_key: ClassKey) {
        self.class_keys.insert(class_key.clas.clone(), class_key);
    }

    pub fn is_locked(&self) -> bool {
        !self.unlocked
    }

    /// Forget every unwrapped class key.
    fn lock(&mut self) {
        self.unlocked = false;
        for class_key in self.class_keys.values_mut() {
            class_key.key = None;
        }
    }

    pub fn class_key(&self, protection_class: &[u8]) -> Option<&ClassKey> {
        self.class_keys.get(protection_class)
    }

    fn attr(&self, name: &str) -> Option<&[u8]> {
        self.attrs.get(name).map(Vec::as_slice)
    }

    fn iterations(&self, name: &str) -> Result<NonZeroU32> {
        let value = self
            .attr(name)
            .ok_or_else(|| Error::InvalidFormat(format!("key bag has no {name}")))?;
        NonZeroU32::new(tlv::be_u32(value)?)
            .ok_or_else(|| Error::InvalidFormat(format!("key bag {name} is zero")))
    }

    /// Derive the key-encryption key for `passcode`.
    fn derive_kek(&self, passcode: &str) -> Result<Zeroizing<[u8; 32]>> {
        let salt = self
            .attr("SALT")
            .ok_or_else(|| Error::InvalidFormat("key bag has no SALT".to_string()))?;
        let iterations = self.iterations("ITER")?;

        let mut stage_one = Zeroizing::new([0u8; 32]);
        let secret: &[u8] = match self.attr("DPSL") {
            Some(dpsl) => {
                let dpic = self.iterations("DPIC")?;
                ring::pbkdf2::derive(
                    ring::pbkdf2::PBKDF2_HMAC_SHA256,
                    dpic,
                    dpsl,
                    passcode.as_bytes(),
                    &mut stage_one[..],
                );
                &stage_one[..]
            }
            None => passcode.as_bytes(),
        };

        let mut kek = Zeroizing::new([0u8; 32]);
        ring::pbkdf2::derive(
            ring::pbkdf2::PBKDF2_HMAC_SHA1,
            iterations,
            salt,
            secret,
            &mut kek[..],
        );
        Ok(kek)
    }

    /// Unlock the bag with `passcode`.
    ///
    /// Every passcode-wrapped class key that unwraps becomes usable. Classes that
    /// fail to unwrap stay inaccessible without blocking the others. If no class
    /// key unwraps the passcode is rejected with [`Error::WrongPassword`] and the
    /// bag stays locked. Keys from an earlier unlock are dropped first, so a failed
    /// attempt always leaves the bag locked.
    pub fn unlock(&mut self, passcode: &str) -> Result<()> {
        self.lock();
        let kek = self.derive_kek(passcode)?;
        let kek = aes_kw::KekAes256::from(*kek);

        let mut candidates = 0usize;
        let mut unwrapped = 0usize;
        for class_key in self.class_keys.values_mut() {
            let wpky = match &class_key.wpky {
                Some(wpky) if class_key.is_passcode_wrapped() => wpky,
                _ => continue,
            };
            candidates += 1;
            if wpky.len() < 16 {
                warn!(class = ?class_key.clas, "wrapped class key too short");
                continue;
            }
            let mut key = Zeroizing::new(vec![0u8; wpky.len() - 8]);
            match kek.unwrap(wpky, &mut key) {
                Ok(()) => {
                    class_key.key = Some(key);
                    unwrapped += 1;
                }
                Err(e) => debug!(class = ?class_key.clas, "class key did not unwrap: {e}"),
            }
        }

        if candidates == 0 {
            return Err(Error::InvalidFormat(
                "key bag has no passcode-wrapped class keys".to_string(),
            ));
        }
        if unwrapped == 0 {
            return Err(Error::WrongPassword);
        }

        debug!(unwrapped, candidates, "key bag unlocked");
        self.unlocked = true;
        Ok(())
    }

    /// Unwrap a per-file persistent key with the key of `protection_class`.
    pub fn unwrap_key_for_class(
        &self,
        protection_class: &[u8],
        persistent_key: &[u8],
    ) -> Result<Zeroizing<[u8; 32]>> {
        if self.is_locked() {
            return Err(Error::NotUnlocked);
        }
        let class_key = self
            .class_keys
            .get(protection_class)
            .ok_or_else(|| Error::MissingClass(protection_class.to_vec()))?;
        let key = class_key
            .key
            .as_ref()
            .ok_or_else(|| Error::MissingClassKey(protection_class.to_vec()))?;
        if persistent_key.len() != WRAPPED_KEY_LENGTH {
            return Err(Error::InvalidKeyLength {
                expected: WRAPPED_KEY_LENGTH,
                actual: persistent_key.len(),
            });
        }

        let kek = aes_kw::KekAes256::try_from(key.as_slice())
            .map_err(|_| Error::UnsupportedCrypto(format!("AES key wrap with a {} byte key", key.len())))?;
        let mut out = Zeroizing::new([0u8; 32]);
        kek.unwrap(persistent_key, &mut out[..])
            .map_err(Error::KeyUnwrapFailed)?;
        Ok(out)
    }

    fn cipher_for(&self, protection_class: &[u8], persistent_key: &[u8]) -> Result<StreamCipher> {
        let key = self.unwrap_key_for_class(protection_class, persistent_key)?;
        StreamCipher::new(&key[..])
    }

    pub fn decrypt_stream<R: Read, W: Write>(
        &self,
        protection_class: &[u8],
        persistent_key: &[u8],
        reader: R,
        writer: W,
        size: Option<u64>,
    ) -> Result<u64> {
        self.cipher_for(protection_class, persistent_key)?
            .decrypt(reader, writer, size)
    }

    pub fn encrypt_stream<R: Read, W: Write>(
        &self,
        protection_class: &[u8],
        persistent_key: &[u8],
        reader: R,
        writer: W,
    ) -> Result<u64> {
        self.cipher_for(protection_class, persistent_key)?
            .encrypt(reader, writer)
    }

    pub fn decrypt_file(
        &self,
        protection_class: &[u8],
        persistent_key: &[u8],
        source: &Path,
        destination: &Path,
        size: Option<u64>,
    ) -> Result<u64> {
        self.cipher_for(protection_class, persistent_key)?
            .decrypt_file(source, destination, size)
    }

    pub fn encrypt_file(
        &self,
        protection_class: &[u8],
        persistent_key: &[u8],
        source: &Path,
        destination: &Path,
    ) -> Result<u64> {
        self.cipher_for(protection_class, persistent_key)?
            .encrypt_file(source, destination)
    }
}
