extern crate ibx;

use std::path::Path;

use ibx::error::Error;

fn main() -> Result<(), Error> {
    let matches = ibx::cli::parse_flags();

    ibx::utils::initialize_logging_from_args(&matches);

    match matches.subcommand() {
        ("backups", Some(cmd)) => {
            let config = ibx::utils::load_config(&matches)?;
            let roots = ibx::backups::roots(cmd);
            ibx::backups::list(&roots, &config)?;
        }
        ("info", Some(_)) => {
            let backup = ibackup::Backup::open(
                ibx::utils::backup_path(&matches)?,
                ibx::utils::load_config(&matches)?,
            )?;
            ibx::backups::show_info(&backup)?;
        }
        ("domains", Some(_)) => {
            let mut backup = ibx::utils::open_backup(&matches)?;
            ibx::backups::show_domains(&mut backup)?;
        }
        ("list", Some(cmd)) => {
            let mut backup = ibx::utils::open_backup(&matches)?;
            let domain = cmd
                .value_of("domain")
                .ok_or_else(|| Error::CliInputError("--domain is required.".to_string()))?;
            ibx::entries::list(&mut backup, domain, cmd.value_of("relative-path"))?;
        }
        ("search", Some(cmd)) => {
            let mut backup = ibx::utils::open_backup(&matches)?;
            ibx::entries::search(
                &mut backup,
                cmd.value_of("domain").unwrap_or("%"),
                cmd.value_of("relative-path").unwrap_or("%"),
            )?;
        }
        ("extract", Some(cmd)) => {
            let mut backup = ibx::utils::open_backup(&matches)?;
            ibx::entries::extract(&mut backup, cmd)?;
        }
        ("replace", Some(cmd)) => {
            let mut backup = ibx::utils::open_backup(&matches)?;
            let file_id = cmd
                .value_of("file-id")
                .ok_or_else(|| Error::CliInputError("--file-id is required.".to_string()))?;
            let source = cmd
                .value_of("source")
                .ok_or_else(|| Error::CliInputError("--source is required.".to_string()))?;
            ibx::edit::replace(&mut backup, file_id, Path::new(source))?;
        }
        ("delete", Some(cmd)) => {
            let mut backup = ibx::utils::open_backup(&matches)?;
            let file_id = cmd
                .value_of("file-id")
                .ok_or_else(|| Error::CliInputError("--file-id is required.".to_string()))?;
            ibx::edit::delete(&mut backup, file_id, cmd.is_present("recursive"))?;
        }
        _ => {
            println!("No command specified or unknown command. Use --help for available commands.");
        }
    }
    Ok(())
}
