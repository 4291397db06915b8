//! Builds small backups on disk for the integration tests.
#![allow(dead_code)]

use ibackup::cipher::StreamCipher;
use ibackup::keybag::tlv::encode;
use plist::{Dictionary, Uid, Value};
use rusqlite::{params, Connection};
use sha1::{Digest, Sha1};
use std::num::NonZeroU32;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

pub const PASSCODE: &str = "correct horse";
pub const DEVICE_NAME: &str = "Fixture Phone";

/// Protection class of the metadata database.
pub const DATABASE_CLASS: u32 = 4;
/// Protection class of the encrypted content files.
pub const FILE_CLASS: u32 = 3;

const DPSL: [u8; 20] = [0x11; 20];
const SALT: [u8; 20] = [0x22; 20];
const DATABASE_KEY: [u8; 32] = [0x44; 32];

pub fn class_key(class: u32) -> [u8; 32] {
    [0x30 + class as u8; 32]
}

pub fn file_key(file_id: &str) -> [u8; 32] {
    let digest = Sha1::digest(file_id.as_bytes());
    let mut key = [0u8; 32];
    key[..20].copy_from_slice(&digest);
    key
}

pub fn file_id(domain: &str, relative_path: &str) -> String {
    Sha1::digest(format!("{}-{}", domain, relative_path).as_bytes())
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

pub fn sha1(data: &[u8]) -> Vec<u8> {
    Sha1::digest(data).to_vec()
}

fn wrap(kek: &[u8; 32], key: &[u8; 32]) -> Vec<u8> {
    let mut out = vec![0u8; 40];
    aes_kw::KekAes256::from(*kek).wrap(key, &mut out).unwrap();
    out
}

fn derive_kek(passcode: &str) -> [u8; 32] {
    let one = NonZeroU32::new(1).unwrap();
    let mut stage_one = [0u8; 32];
    ring::pbkdf2::derive(ring::pbkdf2::PBKDF2_HMAC_SHA256, one, &DPSL, passcode.as_bytes(), &mut stage_one);
    let mut kek = [0u8; 32];
    ring::pbkdf2::derive(ring::pbkdf2::PBKDF2_HMAC_SHA1, one, &SALT, &stage_one, &mut kek);
    kek
}

/// A key bag whose classes 1 to 4 are passcode-wrapped under [`PASSCODE`], plus
/// a device-only class 11 that must be ignored by unlock.
pub fn key_bag_blob() -> Vec<u8> {
    let kek = derive_kek(PASSCODE);
    let mut data = encode(b"VERS", &4u32.to_be_bytes());
    data.extend(encode(b"TYPE", &1u32.to_be_bytes()));
    data.extend(encode(b"UUID", &[0xB0; 16]));
    data.extend(encode(b"HMCK", &[0xCC; 40]));
    data.extend(encode(b"WRAP", &2u32.to_be_bytes()));
    data.extend(encode(b"SALT", &SALT));
    data.extend(encode(b"ITER", &1u32.to_be_bytes()));
    data.extend(encode(b"DPWT", &1u32.to_be_bytes()));
    data.extend(encode(b"DPIC", &1u32.to_be_bytes()));
    data.extend(encode(b"DPSL", &DPSL));
    for class in 1u32..=4 {
        data.extend(encode(b"UUID", &[class as u8; 16]));
        data.extend(encode(b"CLAS", &class.to_be_bytes()));
        data.extend(encode(b"WRAP", &2u32.to_be_bytes()));
        data.extend(encode(b"KTYP", &0u32.to_be_bytes()));
        data.extend(encode(b"WPKY", &wrap(&kek, &class_key(class))));
    }
    data.extend(encode(b"UUID", &[11u8; 16]));
    data.extend(encode(b"CLAS", &11u32.to_be_bytes()));
    data.extend(encode(b"WRAP", &1u32.to_be_bytes()));
    data.extend(encode(b"WPKY", &[0xEE; 40]));
    data
}

/// Serialize `properties` as a keyed archive whose root is object 1 and whose
/// extra objects start at index 2.
pub fn keyed_archive(properties: Dictionary, extra: Vec<Value>) -> Vec<u8> {
    let mut objects = vec![Value::String("$null".to_string()), Value::Dictionary(properties)];
    objects.extend(extra);
    let mut top = Dictionary::new();
    top.insert("root".to_string(), Value::Uid(Uid::new(1)));
    let mut archive = Dictionary::new();
    archive.insert("$version".to_string(), Value::Integer(100000i64.into()));
    archive.insert("$archiver".to_string(), Value::String("NSKeyedArchiver".to_string()));
    archive.insert("$top".to_string(), Value::Dictionary(top));
    archive.insert("$objects".to_string(), Value::Array(objects));
    let mut out = Vec::new();
    Value::Dictionary(archive).to_writer_binary(&mut out).unwrap();
    out
}

#[derive(Debug, Clone)]
enum Kind {
    File {
        content: Vec<u8>,
        store_blob: bool,
        bad_key: bool,
    },
    Directory,
    Symlink(String),
}

#[derive(Debug, Clone)]
struct PendingRow {
    domain: String,
    relative_path: String,
    kind: Kind,
}

pub struct FixtureBuilder {
    encrypted: bool,
    legacy_padding: bool,
    date: u64,
    rows: Vec<PendingRow>,
}

pub struct Fixture {
    pub dir: tempfile::TempDir,
    pub encrypted: bool,
}

impl Fixture {
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn blob_path(&self, domain: &str, relative_path: &str) -> PathBuf {
        let id = file_id(domain, relative_path);
        self.path().join(&id[..2]).join(id)
    }

    pub fn recovery_dir(&self) -> PathBuf {
        self.path().join("_BackupExplorer")
    }
}

impl FixtureBuilder {
    pub fn new(encrypted: bool) -> Self {
        FixtureBuilder {
            encrypted,
            legacy_padding: false,
            date: 1_700_000_000,
            rows: Vec::new(),
        }
    }

    /// Store the database the way older tools did: encrypted with its padding
    /// still part of the plaintext.
    pub fn legacy_padding(mut self) -> Self {
        self.legacy_padding = true;
        self
    }

    /// Backup date in seconds since the epoch.
    pub fn date(mut self, seconds: u64) -> Self {
        self.date = seconds;
        self
    }

    pub fn file(mut self, domain: &str, relative_path: &str, content: &[u8]) -> Self {
        self.rows.push(PendingRow {
            domain: domain.to_string(),
            relative_path: relative_path.to_string(),
            kind: Kind::File {
                content: content.to_vec(),
                store_blob: true,
                bad_key: false,
            },
        });
        self
    }

    /// A file row without its content blob on disk.
    pub fn file_without_blob(mut self, domain: &str, relative_path: &str) -> Self {
        self.rows.push(PendingRow {
            domain: domain.to_string(),
            relative_path: relative_path.to_string(),
            kind: Kind::File {
                content: Vec::new(),
                store_blob: false,
                bad_key: false,
            },
        });
        self
    }

    /// A file whose per-file key is wrapped under a key the bag does not hold.
    pub fn file_with_bad_key(mut self, domain: &str, relative_path: &str, content: &[u8]) -> Self {
        self.rows.push(PendingRow {
            domain: domain.to_string(),
            relative_path: relative_path.to_string(),
            kind: Kind::File {
                content: content.to_vec(),
                store_blob: true,
                bad_key: true,
            },
        });
        self
    }

    pub fn directory(mut self, domain: &str, relative_path: &str) -> Self {
        self.rows.push(PendingRow {
            domain: domain.to_string(),
            relative_path: relative_path.to_string(),
            kind: Kind::Directory,
        });
        self
    }

    pub fn symlink(mut self, domain: &str, relative_path: &str, target: &str) -> Self {
        self.rows.push(PendingRow {
            domain: domain.to_string(),
            relative_path: relative_path.to_string(),
            kind: Kind::Symlink(target.to_string()),
        });
        self
    }

    pub fn build(self) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let encrypted = self.encrypted;
        self.build_at(dir.path());
        Fixture { dir, encrypted }
    }

    /// Write the backup into the existing directory `root`.
    pub fn build_at(self, root: &Path) {
        let plain_db = root.join("plain.db");
        let connection = Connection::open(&plain_db).unwrap();
        connection
            .execute_batch(
                "CREATE TABLE Files (fileID TEXT PRIMARY KEY, domain TEXT, relativePath TEXT, flags INTEGER, file BLOB);
                 CREATE INDEX FilesDomainIdx ON Files(domain);
                 CREATE TABLE Properties (key TEXT PRIMARY KEY, value BLOB);",
            )
            .unwrap();

        for row in &self.rows {
            let id = file_id(&row.domain, &row.relative_path);
            let (flags, record) = self.record(root, &id, row);
            connection
                .execute(
                    "INSERT INTO Files VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![id, row.domain, row.relative_path, flags, record],
                )
                .unwrap();
        }
        connection.close().unwrap();

        let database = root.join("Manifest.db");
        if self.encrypted {
            let mut plaintext = std::fs::read(&plain_db).unwrap();
            let cipher = StreamCipher::new(&DATABASE_KEY).unwrap();
            if self.legacy_padding {
                let pad = 16 - plaintext.len() % 16;
                plaintext.extend(std::iter::repeat(pad as u8).take(pad));
            }
            let mut ciphertext = cipher.encrypt_bytes(&plaintext).unwrap();
            if self.legacy_padding {
                // Old writers padded by hand and encrypted without a pad of their own.
                ciphertext.truncate(plaintext.len());
            }
            std::fs::write(&database, ciphertext).unwrap();
            std::fs::remove_file(&plain_db).unwrap();
        } else {
            std::fs::rename(&plain_db, &database).unwrap();
        }

        self.write_manifest(root);
        write_info(root);
    }

    fn record(&self, root: &Path, id: &str, row: &PendingRow) -> (i64, Vec<u8>) {
        let mut properties = Dictionary::new();
        properties.insert("RelativePath".to_string(), Value::Uid(Uid::new(2)));
        properties.insert("LastModified".to_string(), Value::Integer(1_650_000_000i64.into()));
        properties.insert("Birth".to_string(), Value::Integer(1_600_000_000i64.into()));
        let mut extra = vec![Value::String(row.relative_path.clone())];

        match &row.kind {
            Kind::Directory => {
                properties.insert("Mode".to_string(), Value::Integer(0o40755i64.into()));
                properties.insert("Size".to_string(), Value::Integer(0i64.into()));
                (2, keyed_archive(properties, extra))
            }
            Kind::Symlink(target) => {
                properties.insert("Mode".to_string(), Value::Integer(0o120755i64.into()));
                properties.insert("Target".to_string(), Value::Uid(Uid::new(3)));
                extra.push(Value::String(target.clone()));
                (4, keyed_archive(properties, extra))
            }
            Kind::File {
                content,
                store_blob,
                bad_key,
            } => {
                properties.insert("Mode".to_string(), Value::Integer(0o100644i64.into()));
                properties.insert("Size".to_string(), Value::Integer((content.len() as i64).into()));

                let blob = if self.encrypted {
                    let key = file_key(id);
                    let mut key_data = FILE_CLASS.to_le_bytes().to_vec();
                    let kek = if *bad_key { [0x99; 32] } else { class_key(FILE_CLASS) };
                    key_data.extend(wrap(&kek, &key));
                    let mut key_dict = Dictionary::new();
                    key_dict.insert("NS.data".to_string(), Value::Data(key_data));
                    key_dict.insert("$class".to_string(), Value::Uid(Uid::new(0)));

                    properties.insert(
                        "ProtectionClass".to_string(),
                        Value::Integer((FILE_CLASS as i64).into()),
                    );
                    properties.insert("EncryptionKey".to_string(), Value::Uid(Uid::new(3)));
                    extra.push(Value::Dictionary(key_dict));
                    StreamCipher::new(&key).unwrap().encrypt_bytes(content).unwrap()
                } else {
                    properties.insert("ProtectionClass".to_string(), Value::Integer(0i64.into()));
                    content.clone()
                };

                properties.insert("Digest".to_string(), Value::Uid(Uid::new(extra.len() as u64 + 2)));
                extra.push(Value::Data(sha1(&blob)));

                if *store_blob {
                    let shard = root.join(&id[..2]);
                    std::fs::create_dir_all(&shard).unwrap();
                    std::fs::write(shard.join(id), &blob).unwrap();
                }
                (1, keyed_archive(properties, extra))
            }
        }
    }

    fn write_manifest(&self, root: &Path) {
        let mut lockdown = Dictionary::new();
        for (key, value) in [
            ("ProductVersion", "17.4.1"),
            ("ProductType", "iPhone15,2"),
            ("BuildVersion", "21E236"),
            ("UniqueDeviceID", "00008120-0011223344556677"),
            ("SerialNumber", "FIXTURE0001"),
            ("DeviceName", DEVICE_NAME),
        ] {
            lockdown.insert(key.to_string(), Value::String(value.to_string()));
        }

        let mut manifest = Dictionary::new();
        manifest.insert("Lockdown".to_string(), Value::Dictionary(lockdown));
        manifest.insert("IsEncrypted".to_string(), Value::Boolean(self.encrypted));
        manifest.insert("Version".to_string(), Value::String("10.0".to_string()));
        manifest.insert(
            "Date".to_string(),
            Value::Date((SystemTime::UNIX_EPOCH + Duration::from_secs(self.date)).into()),
        );
        manifest.insert("WasPasscodeSet".to_string(), Value::Boolean(true));
        manifest.insert("Applications".to_string(), Value::Dictionary(Dictionary::new()));
        if self.encrypted {
            let mut manifest_key = DATABASE_CLASS.to_le_bytes().to_vec();
            manifest_key.extend(wrap(&class_key(DATABASE_CLASS), &DATABASE_KEY));
            manifest.insert("ManifestKey".to_string(), Value::Data(manifest_key));
            manifest.insert("BackupKeyBag".to_string(), Value::Data(key_bag_blob()));
        }
        Value::Dictionary(manifest)
            .to_file_xml(root.join("Manifest.plist"))
            .unwrap();
    }
}

fn write_info(root: &Path) {
    let mut info = Dictionary::new();
    info.insert("Applications".to_string(), Value::Dictionary(Dictionary::new()));
    info.insert("Installed Applications".to_string(), Value::Array(Vec::new()));
    info.insert(
        "Last Backup Date".to_string(),
        Value::Date((SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000)).into()),
    );
    for (key, value) in [
        ("Build Version", "21E236"),
        ("Device Name", DEVICE_NAME),
        ("Display Name", DEVICE_NAME),
        ("Product Name", "iPhone 14 Pro"),
        ("Product Type", "iPhone15,2"),
        ("Product Version", "17.4.1"),
        ("Serial Number", "FIXTURE0001"),
    ] {
        info.insert(key.to_string(), Value::String(value.to_string()));
    }
    Value::Dictionary(info).to_file_xml(root.join("Info.plist")).unwrap();
}

/// The fixture used by most tests: two domains, nested directories, a link and
/// a look-alike sibling of `Documents`.
pub fn sample(encrypted: bool) -> Fixture {
    FixtureBuilder::new(encrypted)
        .directory("AppDomain-com.example.notes", "")
        .directory("AppDomain-com.example.notes", "Documents")
        .file("AppDomain-com.example.notes", "Documents/a.txt", b"alpha")
        .directory("AppDomain-com.example.notes", "Documents/sub")
        .file("AppDomain-com.example.notes", "Documents/sub/b.txt", &[7u8; 5000])
        .file("AppDomain-com.example.notes", "DocumentsOther/x", b"other")
        .symlink("AppDomain-com.example.notes", "Documents/link", "a.txt")
        .directory("HomeDomain", "")
        .file("HomeDomain", "Library/Preferences/com.apple.x.plist", b"<plist/>")
        .build()
}
