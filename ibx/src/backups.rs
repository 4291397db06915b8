use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::error::Result;
use crate::utils;

use ibackup::config::default_backup_roots;
use ibackup::paths::DomainGroup;
use ibackup::{Backup, BackupConfig};

/// Roots given with `--root`, or the default MobileSync folders of the current user.
pub fn roots(cmd: &clap::ArgMatches) -> Vec<PathBuf> {
    match cmd.values_of("root") {
        Some(values) => values.map(PathBuf::from).collect(),
        None => utils::home_dir()
            .map(|home| default_backup_roots(&home))
            .unwrap_or_default(),
    }
}

pub fn list(roots: &[PathBuf], config: &BackupConfig) -> Result<()> {
    println!("Backups\n-------");
    let mut found = 0;
    for root in roots {
        for backup in Backup::discover(root, config)? {
            found += 1;
            println!(
                "{}\n   - device: {} ({}, iOS {})\n   - date: {}\n   - encrypted: {}\n",
                backup.directory.display(),
                backup.manifest.device_name,
                backup.manifest.product_type,
                backup.manifest.product_version,
                backup.manifest.date,
                backup.is_encrypted()
            );
        }
    }
    if found == 0 {
        println!("No backups found.");
    }
    Ok(())
}

pub fn show_info(backup: &Backup) -> Result<()> {
    let manifest = &backup.manifest;
    println!("Backup {}\n----------------", backup.directory.display());
    println!("Device name: {}", manifest.device_name);
    println!("Product: {} ({})", manifest.product_type, manifest.product_version);
    println!("Build: {}", manifest.build_version);
    println!("Serial number: {}", manifest.serial_number);
    println!("Device id: {}", manifest.unique_device_id);
    println!("Date: {}", manifest.date);
    println!("Version: {}", manifest.version);
    println!("Encrypted: {}", manifest.encrypted);
    println!("Passcode set: {}", manifest.passcode_set);
    println!("Applications: {}", manifest.applications.len());

    if let Some(info) = &backup.info {
        println!("\nDevice info\n-----------");
        println!("Display name: {}", info.display_name);
        println!("Product name: {}", info.product_name);
        println!("Last backup: {}", info.last_backup_date);
        println!("Installed applications: {}", info.installed_applications.len());
        let optional = [
            ("Phone number", &info.phone_number),
            ("ICCID", &info.iccid),
            ("IMEI", &info.imei),
            ("IMEI 2", &info.imei2),
            ("MEID", &info.meid),
        ];
        for (label, value) in optional {
            if let Some(value) = value {
                println!("{}: {}", label, value);
            }
        }
    }
    Ok(())
}

pub fn show_domains(backup: &mut Backup) -> Result<()> {
    let mut groups: BTreeMap<DomainGroup, Vec<String>> = BTreeMap::new();
    for root in backup.domain_roots()? {
        groups
            .entry(DomainGroup::of(&root.domain))
            .or_default()
            .push(root.domain);
    }

    println!("Domains for {}\n----------------", backup.manifest.device_name);
    for (group, domains) in groups {
        println!("{}:", group.label());
        for domain in domains {
            let identifier = DomainGroup::identifier(&domain);
            if identifier == domain {
                println!("   - {}", domain);
            } else {
                println!("   - {} ({})", identifier, domain);
            }
        }
    }
    Ok(())
}
