extern crate clap;
extern crate ibackup;
extern crate rpassword;

pub mod backups;
pub mod cli;
pub mod edit;
pub mod entries;
pub mod error;
pub mod utils;
