//-
// Copyright (c) 2020, the ocmigrate authors
//
// This file is part of ocmigrate.
//
// Ocmigrate is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free
// Software Foundation, either version 3 of the License, or (at your option)
// any later version.
//
// Ocmigrate is distributed in the hope that it will be useful, but WITHOUT ANY
// WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more
// details.
//
// You should have received a copy of the GNU General Public License along with
// ocmigrate. If not, see <http://www.gnu.org/licenses/>.

use std::fs;
use std::io::Read;
use std::mem;
use std::path::{Path, PathBuf};

use structopt::StructOpt;

use crate::support::sysexits::*;
use crate::support::system_config::SystemConfig;

#[derive(StructOpt)]
#[structopt(max_term_width = 80)]
enum Command {
    /// Run the migration control daemon.
    ///
    /// The daemon connects to the configured AMQP broker, declares the
    /// control queue, and serves migration commands until told to exit.
    Serve(ServeSubcommand),
    /// Load the configuration, print the resolved settings, and exit.
    CheckConfig(CommonOptions),
}

#[derive(StructOpt, Default)]
pub(super) struct CommonOptions {
    /// The directory containing `ocmigrate.toml`
    /// [default: /etc/ocmigrate or /usr/local/etc/ocmigrate]
    #[structopt(long, parse(from_os_str))]
    root: Option<PathBuf>,
}

#[derive(StructOpt)]
pub(super) struct ServeSubcommand {
    #[structopt(flatten)]
    pub(super) common: CommonOptions,

    /// Log to standard error even when not attached to a terminal.
    #[structopt(long)]
    pub(super) foreground: bool,
}

impl Command {
    fn common_options(&mut self) -> CommonOptions {
        match *self {
            Command::Serve(ref mut c) => mem::take(&mut c.common),
            Command::CheckConfig(ref mut c) => mem::take(c),
        }
    }
}

pub fn main() {
    // Clap exits with status 1 instead of EX_USAGE if we use the more concise
    // API
    let mut cmd = Command::from_clap(&match Command::clap().get_matches_safe()
    {
        Ok(matches) => matches,
        Err(
            e @ clap::Error {
                kind: clap::ErrorKind::HelpDisplayed,
                ..
            },
        )
        | Err(
            e @ clap::Error {
                kind: clap::ErrorKind::VersionDisplayed,
                ..
            },
        ) => {
            println!("{}", e.message);
            return;
        }
        Err(e) => {
            eprintln!("{}", e.message);
            EX_USAGE.exit()
        }
    });

    let common = cmd.common_options();
    let root = common.root.unwrap_or_else(|| {
        if Path::new("/etc/ocmigrate/ocmigrate.toml").is_file() {
            "/etc/ocmigrate".to_owned().into()
        } else if Path::new("/usr/local/etc/ocmigrate/ocmigrate.toml")
            .is_file()
        {
            "/usr/local/etc/ocmigrate".to_owned().into()
        } else {
            eprintln!(
                "Neither /etc/ocmigrate nor /usr/local/etc/ocmigrate looks\n\
                 like the ocmigrate root; use --root=/path/to/ocmigrate if\n\
                 your installation is elsewhere."
            );
            EX_CONFIG.exit()
        }
    });

    let system_config_path = root.join("ocmigrate.toml");
    let mut system_config_toml = Vec::new();
    if let Err(e) = fs::File::open(&system_config_path)
        .and_then(|mut f| f.read_to_end(&mut system_config_toml))
    {
        eprintln!("Error reading '{}': {}", system_config_path.display(), e);
        EX_CONFIG.exit();
    }

    let system_config: SystemConfig =
        match toml::from_slice(&system_config_toml) {
            Ok(config) => config,
            Err(e) => {
                eprintln!(
                    "Error in config file at '{}': {}",
                    system_config_path.display(),
                    e
                );
                EX_CONFIG.exit()
            }
        };

    match cmd {
        Command::Serve(ref serve) => {
            init_logging(&root, serve.foreground);
            super::serve::serve(system_config);
        }
        Command::CheckConfig(_) => check_config(system_config),
    }
}

fn check_config(system_config: SystemConfig) {
    match toml::to_string_pretty(&system_config) {
        Ok(rendered) => println!("{}", rendered),
        Err(e) => {
            eprintln!("Error rendering configuration: {}", e);
            EX_SOFTWARE.exit()
        }
    }
}

fn init_logging(root: &Path, foreground: bool) {
    if foreground || Ok(true) == nix::unistd::isatty(2) {
        // Running interactively; ignore logging configuration and just write
        // to stderr.
        crate::init_simple_log();
        return;
    }

    // Right now we have this awkward situation where you can use log4rs *or*
    // syslog, because log4rs-syslog hasn't been updated in quite a while.
    //
    // If anything goes wrong, we don't really have a way to recover since
    // nothing is watching stderr once detached from a terminal.
    let log_config_file = root.join("logging.toml");
    if log_config_file.is_file() {
        log4rs::init_file(
            log_config_file,
            log4rs::file::Deserializers::new(),
        )
        .expect("Failed to initialise logging");
    } else {
        let formatter = syslog::Formatter3164 {
            facility: syslog::Facility::LOG_DAEMON,
            hostname: None,
            process: env!("CARGO_PKG_NAME").to_owned(),
            pid: nix::unistd::getpid().as_raw(),
        };

        let logger =
            syslog::unix(formatter).expect("Failed to connect to syslog");
        log::set_boxed_logger(Box::new(syslog::BasicLogger::new(logger)))
            .map(|_| log::set_max_level(log::LevelFilter::Info))
            .expect("Failed to initialise logging");
    }
}
