use clap;

pub fn parse_flags<'a>() -> clap::ArgMatches<'a> {
    app().get_matches()
}

pub fn app<'a, 'b>() -> clap::App<'a, 'b> {
    clap::App::new("ibx")
        .version(clap::crate_version!())
        .author(clap::crate_authors!())
        .about("Command line interface to iOS device backups")
        .setting(clap::AppSettings::SubcommandRequiredElseHelp)
        .arg(
            clap::Arg::from_usage("-d --debug 'Enable debug output'")
                .global(true)
        )
        .arg(
            clap::Arg::from_usage("-p, --path [path] 'Path to the backup directory'")
                .global(true),
        )
        .arg(
            clap::Arg::from_usage("--password [password] 'Passcode for encrypted backups (prompted when missing)'")
                .global(true)
        )
        .arg(
            clap::Arg::from_usage("-c, --config [config] 'JSON file with backup settings'")
                .global(true)
        )
        .subcommand(
            clap::SubCommand::with_name("backups")
                .about("List the backups found under one or more backup roots")
                .arg(
                    clap::Arg::from_usage("-r, --root [root]... 'Backup root to scan (defaults to the MobileSync folders)'")
                        .number_of_values(1),
                ),
        )
        .subcommand(
            clap::SubCommand::with_name("info")
                .about("Show device and manifest details of a backup"),
        )
        .subcommand(
            clap::SubCommand::with_name("domains")
                .about("List the domains of a backup, grouped by kind"),
        )
        .subcommand(
            clap::SubCommand::with_name("list")
                .about("List the entries below a path of a domain")
                .arg(clap::Arg::from_usage("--domain <domain> 'Domain to list'").required(true))
                .arg(clap::Arg::from_usage("--relative-path [relative_path] 'Directory inside the domain (the whole domain when omitted)'")),
        )
        .subcommand(
            clap::SubCommand::with_name("search")
                .about("Search entries with SQL LIKE patterns")
                .arg(clap::Arg::from_usage("--domain [domain_like] 'Pattern for the domain'").default_value("%"))
                .arg(clap::Arg::from_usage("--relative-path [path_like] 'Pattern for the relative path'").default_value("%")),
        )
        .subcommand(
            clap::SubCommand::with_name("extract")
                .about("Extract entries into a folder")
                .arg(clap::Arg::from_usage("--destination <output_folder> 'Folder to extract into'").required(true))
                .arg(
                    clap::Arg::from_usage("--domain [domain]... 'Domain to extract'")
                        .number_of_values(1),
                )
                .arg(clap::Arg::from_usage("--relative-path [relative_path] 'Only extract below this path (requires a single --domain)'"))
                .arg(clap::Arg::from_usage("--file-id [file_id] 'Extract a single entry'").conflicts_with("domain"))
                .arg(clap::Arg::from_usage("--flat 'Write files by name instead of domain/relative path'"))
                .arg(clap::Arg::from_usage("--skip-existing 'Skip entries whose destination exists'"))
                .arg(clap::Arg::from_usage("--overwrite 'Replace existing destinations'").conflicts_with("skip-existing")),
        )
        .subcommand(
            clap::SubCommand::with_name("replace")
                .about("Replace the content of a file entry")
                .arg(clap::Arg::from_usage("--file-id <file_id> 'Entry to replace'").required(true))
                .arg(clap::Arg::from_usage("--source <source_file> 'File with the new content'").required(true)),
        )
        .subcommand(
            clap::SubCommand::with_name("delete")
                .about("Delete an entry from the backup database")
                .arg(clap::Arg::from_usage("--file-id <file_id> 'Entry to delete'").required(true))
                .arg(clap::Arg::from_usage("--recursive 'Also delete every entry below a directory'")),
        )
}
