//-
// Copyright (c) 2026, Jason Lingle
//
// This file is part of Crysms.
//
// Crysms is free software: you can  redistribute it and/or modify it under the
// terms of  the GNU General Public  License as published by  the Free Software
// Foundation, either version  3 of the License, or (at  your option) any later
// version.
//
// Crysms is distributed  in the hope that  it will be useful,  but WITHOUT ANY
// WARRANTY; without  even the implied  warranty of MERCHANTABILITY  or FITNESS
// FOR  A PARTICULAR  PURPOSE.  See the  GNU General  Public  License for  more
// details.
//
// You should have received a copy of the GNU General Public License along with
// Crysms. If not, see <http://www.gnu.org/licenses/>.

use std::path::{Path, PathBuf};

use log::LevelFilter;
use structopt::StructOpt;

use crate::support::sysexits::*;

#[derive(StructOpt)]
#[structopt(max_term_width = 80)]
enum Command {
    /// Create a new storage file and its configuration.
    ///
    /// A new master key is generated and protected with a password you will
    /// be prompted for. The password can later be changed with `passwd`
    /// without re-encrypting the storage file; the master key itself can
    /// never change.
    Init(InitSubcommand),
    /// Verify the structural integrity of the storage file.
    ///
    /// Every entry is read and authenticated, and the free list and the
    /// conversation forest are walked to make sure every entry is reachable
    /// exactly once and that all links agree with each other. Nothing is
    /// ever repaired. Exits with EX_DATAERR if a problem is found.
    Check(CommonOptions),
    /// Print statistics about the storage file and its conversations.
    Stats(CommonOptions),
    /// Change the password protecting the master key.
    Passwd(CommonOptions),
}

#[derive(StructOpt)]
pub(super) struct CommonOptions {
    /// The configuration file describing the storage.
    #[structopt(long, short, parse(from_os_str))]
    pub(super) config: PathBuf,
}

#[derive(StructOpt)]
pub(super) struct InitSubcommand {
    #[structopt(flatten)]
    pub(super) common: CommonOptions,

    /// Where to put the storage file. Relative paths are relative to the
    /// directory containing the configuration.
    #[structopt(long, short, parse(from_os_str), default_value = "crysms.dat")]
    pub(super) storage: PathBuf,
}

pub fn main() {
    // Clap exits with status 1 instead of EX_USAGE if we use the more concise
    // API
    let cmd = Command::from_clap(&match Command::clap().get_matches_safe() {
        Ok(matches) => matches,
        Err(
            e @ clap::Error {
                kind: clap::ErrorKind::HelpDisplayed,
                ..
            }
        )
        | Err(
            e @ clap::Error {
                kind: clap::ErrorKind::VersionDisplayed,
                ..
            }
        ) => {
            println!("{}", e.message);
            return;
        }
        Err(e) => {
            eprintln!("{}", e.message);
            EX_USAGE.exit()
        }
    });

    match cmd {
        Command::Init(cmd) => {
            init_logging(&cmd.common.config);
            super::storage::init(cmd);
        }
        Command::Check(cmd) => {
            init_logging(&cmd.config);
            super::storage::check(cmd);
        }
        Command::Stats(cmd) => {
            init_logging(&cmd.config);
            super::storage::stats(cmd);
        }
        Command::Passwd(cmd) => {
            init_logging(&cmd.config);
            super::storage::passwd(cmd);
        }
    }
}

/// Set up logging.
///
/// If there is a `logging.toml` next to the configuration file, it is used
/// as the log4rs configuration. Otherwise, informational messages and above
/// go to standard error.
fn init_logging(config: &Path) {
    let log_config_file = config
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join("logging.toml");

    if log_config_file.is_file() {
        if let Err(e) = log4rs::init_file(
            &log_config_file,
            log4rs::file::Deserializers::new(),
        ) {
            die!(
                EX_CONFIG,
                "Failed to initialise logging from '{}': {}",
                log_config_file.display(),
                e
            );
        }
    } else {
        use log4rs::append::console::{ConsoleAppender, Target};
        use log4rs::config::{Appender, Config, Root};
        use log4rs::encode::pattern::PatternEncoder;

        let stderr = ConsoleAppender::builder()
            .target(Target::Stderr)
            .encoder(Box::new(PatternEncoder::new("[{l}] {m}{n}")))
            .build();
        let config = Config::builder()
            .appender(Appender::builder().build("stderr", Box::new(stderr)))
            .build(Root::builder().appender("stderr").build(LevelFilter::Info));

        match config {
            Ok(config) => {
                if let Err(e) = log4rs::init_config(config) {
                    die!(EX_SOFTWARE, "Failed to initialise logging: {}", e);
                }
            }
            Err(e) => die!(EX_SOFTWARE, "Bad logging configuration: {}", e),
        }
    }
}
