//! The top-level `Manifest.plist` of a container.

use crate::date::Date;
use crate::error::{Error, Result};
use crate::keybag::KeyBag;
use byteorder::{ByteOrder, LittleEndian};
use plist::{Dictionary, Value};
use std::path::Path;

pub(crate) fn required<'a>(dict: &'a Dictionary, key: &str) -> Result<&'a Value> {
    dict.get(key)
        .ok_or_else(|| Error::InvalidFormat(format!("missing {}", key)))
}

fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Integer(i) => Some(i.to_string()),
        Value::Real(r) => Some(r.to_string()),
        Value::Boolean(b) => Some(b.to_string()),
        _ => None,
    }
}

/// A scalar field rendered as text, whatever its stored type.
pub(crate) fn required_text(dict: &Dictionary, key: &str) -> Result<String> {
    let value = required(dict, key)?;
    value_text(value).ok_or_else(|| Error::InvalidFormat(format!("{} is not a scalar", key)))
}

pub(crate) fn optional_text(dict: &Dictionary, key: &str) -> Option<String> {
    dict.get(key).and_then(value_text)
}

pub(crate) fn required_dictionary<'a>(dict: &'a Dictionary, key: &str) -> Result<&'a Dictionary> {
    required(dict, key)?
        .as_dictionary()
        .ok_or_else(|| Error::InvalidFormat(format!("{} is not a dictionary", key)))
}

pub(crate) fn required_bool(dict: &Dictionary, key: &str) -> Result<bool> {
    required(dict, key)?
        .as_boolean()
        .ok_or_else(|| Error::InvalidFormat(format!("{} is not a boolean", key)))
}

pub(crate) fn required_date(dict: &Dictionary, key: &str) -> Result<Date> {
    required(dict, key)?
        .as_date()
        .map(Date::from_plist)
        .ok_or_else(|| Error::InvalidFormat(format!("{} is not a date", key)))
}

/// The wrapped key of the metadata database.
///
/// Stored as `[u32 little endian: protection class][wrapped key]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestKey {
    pub protection_class: u32,
    pub wrapped_key: Vec<u8>,
}

impl ManifestKey {
    pub fn parse(data: &[u8]) -> Result<ManifestKey> {
        if data.len() < 4 {
            return Err(Error::InvalidFormat(format!(
                "manifest key is only {} bytes",
                data.len()
            )));
        }
        Ok(ManifestKey {
            protection_class: LittleEndian::read_u32(&data[..4]),
            wrapped_key: data[4..].to_vec(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct Manifest {
    pub encrypted: bool,
    pub version: String,
    pub date: Date,
    pub passcode_set: bool,
    pub product_version: String,
    pub product_type: String,
    pub build_version: String,
    pub unique_device_id: String,
    pub serial_number: String,
    pub device_name: String,
    /// Installed application inventory, kept as stored.
    pub applications: Dictionary,
    /// Present exactly when `encrypted` is set.
    pub manifest_key: Option<ManifestKey>,
    key_bag: Option<KeyBag>,
}

impl Manifest {
    pub fn from_file(path: &Path) -> Result<Manifest> {
        let value = Value::from_file(path)?;
        Self::from_value(&value)
    }

    pub fn from_value(value: &Value) -> Result<Manifest> {
        let data = value
            .as_dictionary()
            .ok_or_else(|| Error::InvalidFormat("manifest is not a dictionary".to_string()))?;
        let lockdown = required_dictionary(data, "Lockdown")?;
        let encrypted = required_bool(data, "IsEncrypted")?;

        let (manifest_key, key_bag) = if encrypted {
            let key = required(data, "ManifestKey")?
                .as_data()
                .ok_or_else(|| Error::InvalidFormat("ManifestKey is not data".to_string()))?;
            let bag = data
                .get("BackupKeyBag")
                .and_then(Value::as_data)
                .ok_or_else(|| {
                    Error::InvalidFormat("backup is encrypted but no key bag was found".to_string())
                })?;
            (Some(ManifestKey::parse(key)?), Some(KeyBag::parse(bag)?))
        } else {
            (None, None)
        };

        Ok(Manifest {
            encrypted,
            version: required_text(data, "Version")?,
            date: required_date(data, "Date")?,
            passcode_set: required_bool(data, "WasPasscodeSet")?,
            product_version: required_text(lockdown, "ProductVersion")?,
            product_type: required_text(lockdown, "ProductType")?,
            build_version: required_text(lockdown, "BuildVersion")?,
            unique_device_id: required_text(lockdown, "UniqueDeviceID")?,
            serial_number: required_text(lockdown, "SerialNumber")?,
            device_name: required_text(lockdown, "DeviceName")?,
            applications: data
                .get("Applications")
                .and_then(Value::as_dictionary)
                .cloned()
                .unwrap_or_default(),
            manifest_key,
            key_bag,
        })
    }

    pub fn key_bag(&self) -> Option<&KeyBag> {
        self.key_bag.as_ref()
    }

    pub fn key_bag_mut(&mut self) -> Option<&mut KeyBag> {
        self.key_bag.as_mut()
    }
}
