//! Device information from the optional `Info.plist` of a container.

use crate::date::Date;
use crate::error::{Error, Result};
use crate::manifest::{optional_text, required, required_date, required_dictionary, required_text};
use plist::Value;
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ApplicationInfo {
    pub placeholder_icon: Option<Vec<u8>>,
    pub itunes_metadata: Option<Vec<u8>>,
    pub is_demoted: bool,
    pub application_sinf: Option<Vec<u8>>,
}

#[derive(Debug, Clone)]
pub struct BackupInfo {
    pub applications: BTreeMap<String, ApplicationInfo>,
    pub installed_applications: Vec<String>,
    pub last_backup_date: Date,
    pub build_version: String,
    pub device_name: String,
    pub display_name: String,
    pub product_name: String,
    pub product_type: String,
    pub product_version: String,
    pub serial_number: String,

    pub phone_number: Option<String>,
    pub guid: Option<String>,
    pub iccid: Option<String>,
    pub imei: Option<String>,
    pub imei2: Option<String>,
    pub meid: Option<String>,
    pub target_identifier: Option<String>,
    pub target_type: Option<String>,
    pub unique_identifier: Option<String>,
}

fn data_field(dict: &plist::Dictionary, key: &str) -> Option<Vec<u8>> {
    dict.get(key).and_then(Value::as_data).map(<[u8]>::to_vec)
}

impl BackupInfo {
    pub fn from_file(path: &Path) -> Result<BackupInfo> {
        Self::from_value(&Value::from_file(path)?)
    }

    pub fn from_value(value: &Value) -> Result<BackupInfo> {
        let data = value
            .as_dictionary()
            .ok_or_else(|| Error::InvalidFormat("Info.plist is not a dictionary".to_string()))?;

        let mut applications = BTreeMap::new();
        for (id, app) in required_dictionary(data, "Applications")? {
            let app = app
                .as_dictionary()
                .ok_or_else(|| Error::InvalidFormat(format!("application {} is not a dictionary", id)))?;
            applications.insert(
                id.clone(),
                ApplicationInfo {
                    placeholder_icon: data_field(app, "PlaceholderIcon"),
                    itunes_metadata: data_field(app, "iTunesMetadata"),
                    is_demoted: app
                        .get("IsDemotedApp")
                        .and_then(Value::as_boolean)
                        .unwrap_or(false),
                    application_sinf: data_field(app, "ApplicationSINF"),
                },
            );
        }

        let installed_applications = required(data, "Installed Applications")?
            .as_array()
            .ok_or_else(|| Error::InvalidFormat("Installed Applications is not an array".to_string()))?
            .iter()
            .filter_map(|v| v.as_string().map(str::to_string))
            .collect();

        Ok(BackupInfo {
            applications,
            installed_applications,
            last_backup_date: required_date(data, "Last Backup Date")?,
            build_version: required_text(data, "Build Version")?,
            device_name: required_text(data, "Device Name")?,
            display_name: required_text(data, "Display Name")?,
            product_name: required_text(data, "Product Name")?,
            product_type: required_text(data, "Product Type")?,
            product_version: required_text(data, "Product Version")?,
            serial_number: required_text(data, "Serial Number")?,
            phone_number: optional_text(data, "Phone Number"),
            guid: optional_text(data, "GUID"),
            iccid: optional_text(data, "ICCID"),
            imei: optional_text(data, "IMEI"),
            imei2: optional_text(data, "IMEI2"),
            meid: optional_text(data, "MEID"),
            target_identifier: optional_text(data, "Target Identifier"),
            target_type: optional_text(data, "Target Type"),
            unique_identifier: optional_text(data, "Unique Identifier"),
        })
    }
}
