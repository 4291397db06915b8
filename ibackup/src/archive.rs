//! Keyed-archive object graphs.
//!
//! Every row of the metadata database stores its properties as a binary plist in
//! `NSKeyedArchiver` form:
//!
//! ```text
//! {
//!   "$archiver": "NSKeyedArchiver",
//!   "$top":      { "root": Uid(1) },
//!   "$objects":  [ "$null", { "Size": 42, "Digest": Uid(3), ... }, ..., <data> ]
//! }
//! ```
//!
//! Values that are not stored inline are references (`Uid`) into the `$objects`
//! table. [`KeyedArchive`] follows those references and checks the shape of what
//! it finds, and can write modified values back in place.

use crate::error::{Error, Result};
use plist::{Dictionary, Uid, Value};
use std::io::Cursor;

#[derive(Debug, Clone)]
pub struct KeyedArchive {
    archive: Value,
    root_index: usize,
    narrow: bool,
}

/// Index of `uid` as read by tools that only looked at the first byte of its
/// big-endian encoding.
fn narrow_index(value: u64) -> usize {
    let width = match value {
        0..=0xff => 1,
        0x100..=0xffff => 2,
        0x1_0000..=0xffff_ffff => 4,
        _ => 8,
    };
    value.to_be_bytes()[8 - width] as usize
}

fn shape_name(value: &Value) -> &'static str {
    match value {
        Value::Array(_) => "array",
        Value::Dictionary(_) => "dictionary",
        Value::Boolean(_) => "boolean",
        Value::Data(_) => "data",
        Value::Date(_) => "date",
        Value::Real(_) => "real",
        Value::Integer(_) => "integer",
        Value::String(_) => "string",
        Value::Uid(_) => "uid",
        _ => "unknown value",
    }
}

fn unexpected(expected: &str, found: &Value) -> Error {
    Error::InvalidFormat(format!("expected {} but found {}", expected, shape_name(found)))
}

impl KeyedArchive {
    pub fn parse(data: &[u8], narrow: bool) -> Result<KeyedArchive> {
        let value = Value::from_reader(Cursor::new(data))?;
        Self::from_value(value, narrow)
    }

    pub fn from_value(archive: Value, narrow: bool) -> Result<KeyedArchive> {
        let dict = archive
            .as_dictionary()
            .ok_or_else(|| unexpected("archive dictionary", &archive))?;
        match dict.get("$objects") {
            Some(Value::Array(_)) => {}
            Some(other) => return Err(unexpected("$objects array", other)),
            None => return Err(Error::InvalidFormat("archive has no $objects".to_string())),
        }
        let root = dict
            .get("$top")
            .and_then(Value::as_dictionary)
            .and_then(|top| top.get("root"))
            .ok_or_else(|| Error::InvalidFormat("archive has no $top.root".to_string()))?
            .clone();

        let mut keyed = KeyedArchive {
            archive,
            root_index: 0,
            narrow,
        };
        keyed.root_index = keyed.index_of_reference(&root)?;
        keyed.properties()?;
        Ok(keyed)
    }

    /// Index into `$objects` for `uid`, honouring the narrow resolution mode.
    pub fn index_of(&self, uid: Uid) -> usize {
        if self.narrow {
            narrow_index(uid.get())
        } else {
            uid.get() as usize
        }
    }

    fn index_of_reference(&self, reference: &Value) -> Result<usize> {
        let index = match reference {
            Value::Uid(uid) => self.index_of(*uid),
            other => return Err(unexpected("object reference", other)),
        };
        if index >= self.objects().len() {
            return Err(Error::InvalidFormat(format!(
                "object reference {} is outside a table of {} objects",
                index,
                self.objects().len()
            )));
        }
        Ok(index)
    }

    pub fn objects(&self) -> &[Value] {
        match self
            .archive
            .as_dictionary()
            .and_then(|dict| dict.get("$objects"))
        {
            Some(Value::Array(objects)) => objects,
            _ => &[],
        }
    }

    fn objects_mut(&mut self) -> Result<&mut Vec<Value>> {
        match self
            .archive
            .as_dictionary_mut()
            .and_then(|dict| dict.get_mut("$objects"))
        {
            Some(Value::Array(objects)) => Ok(objects),
            _ => Err(Error::InvalidFormat("archive has no $objects".to_string())),
        }
    }

    pub fn resolve(&self, reference: &Value) -> Result<&Value> {
        let index = self.index_of_reference(reference)?;
        Ok(&self.objects()[index])
    }

    pub fn resolve_dictionary(&self, reference: &Value) -> Result<&Dictionary> {
        let value = self.resolve(reference)?;
        value
            .as_dictionary()
            .ok_or_else(|| unexpected("dictionary", value))
    }

    pub fn resolve_string(&self, reference: &Value) -> Result<&str> {
        let value = self.resolve(reference)?;
        value.as_string().ok_or_else(|| unexpected("string", value))
    }

    pub fn resolve_data(&self, reference: &Value) -> Result<&[u8]> {
        let value = self.resolve(reference)?;
        value.as_data().ok_or_else(|| unexpected("data", value))
    }

    /// The root property dictionary.
    pub fn properties(&self) -> Result<&Dictionary> {
        let value = &self.objects()[self.root_index];
        value
            .as_dictionary()
            .ok_or_else(|| unexpected("root property dictionary", value))
    }

    fn properties_mut(&mut self) -> Result<&mut Dictionary> {
        let index = self.root_index;
        self.objects_mut()?[index]
            .as_dictionary_mut()
            .ok_or_else(|| Error::InvalidFormat("root is not a dictionary".to_string()))
    }

    pub fn property(&self, key: &str) -> Option<&Value> {
        self.properties().ok().and_then(|properties| properties.get(key))
    }

    /// An inline integer property. `None` if absent, an error if present with
    /// another shape.
    pub fn integer(&self, key: &str) -> Result<Option<i64>> {
        match self.property(key) {
            None => Ok(None),
            Some(value) => value
                .as_signed_integer()
                .map(Some)
                .ok_or_else(|| unexpected(&format!("integer {key}"), value)),
        }
    }

    /// Follow the reference stored under `key` to a dictionary.
    pub fn referenced_dictionary(&self, key: &str) -> Result<Option<&Dictionary>> {
        self.property(key)
            .map(|reference| self.resolve_dictionary(reference))
            .transpose()
    }

    pub fn referenced_string(&self, key: &str) -> Result<Option<&str>> {
        self.property(key)
            .map(|reference| self.resolve_string(reference))
            .transpose()
    }

    pub fn referenced_data(&self, key: &str) -> Result<Option<&[u8]>> {
        self.property(key)
            .map(|reference| self.resolve_data(reference))
            .transpose()
    }

    /// Store an inline value in the root property dictionary.
    pub fn set_property(&mut self, key: &str, value: Value) -> Result<()> {
        self.properties_mut()?.insert(key.to_string(), value);
        Ok(())
    }

    /// Replace the object the reference under `key` points at, leaving the
    /// reference itself untouched. Returns `false` if there is no such property.
    pub fn set_referenced(&mut self, key: &str, value: Value) -> Result<bool> {
        let reference = match self.property(key) {
            Some(reference) => reference.clone(),
            None => return Ok(false),
        };
        let index = self.index_of_reference(&reference)?;
        self.objects_mut()?[index] = value;
        Ok(true)
    }

    /// Serialize the whole graph back to a binary plist.
    pub fn to_binary(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        self.archive.to_writer_binary(&mut out)?;
        Ok(out)
    }
}
