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

//! Implementations of the storage subcommands.

use std::io;
use std::path::Path;

use crate::crypt::master_key::MasterKey;
use crate::store::{summarise_conversations, EntryKind, Storage};
use crate::support::error::Error;
use crate::support::file_ops;
use crate::support::storage_config::{IoConfig, StorageConfig};
use crate::support::sysexits::*;

use super::main::{CommonOptions, InitSubcommand};

pub(super) fn init(cmd: InitSubcommand) {
    let config_path = cmd.common.config;
    if config_path.exists() {
        die!(
            EX_CANTCREAT,
            "Configuration '{}' already exists",
            config_path.display()
        );
    }

    let storage_path = match config_path.parent() {
        Some(parent) if cmd.storage.is_relative() => parent.join(&cmd.storage),
        _ => cmd.storage.clone(),
    };
    if storage_path.exists() {
        die!(
            EX_CANTCREAT,
            "Storage file '{}' already exists",
            storage_path.display()
        );
    }

    let password = prompt_new_password();
    let master_key = MasterKey::new();
    let key = master_key
        .make_config(password.as_bytes())
        .unwrap_or_else(|e| {
            die!(EX_SOFTWARE, "Failed to derive master key: {}", e)
        });

    let io = IoConfig::default();
    let storage = Storage::open(&storage_path, &master_key, io)
        .unwrap_or_else(|e| die_storage(&storage_path, e));
    drop(storage);

    let config = StorageConfig {
        path: cmd.storage,
        io,
        key,
    };
    write_config(&config_path, &config, false);

    println!("Created '{}'", storage_path.display());
}

pub(super) fn check(cmd: CommonOptions) {
    let storage = open(&cmd.config);
    let report = storage
        .lock()
        .check_integrity()
        .unwrap_or_else(|e| die_storage(&cmd.config, e));

    print!("{}", report);
    if report.is_ok() {
        println!("OK");
    } else {
        die!(EX_DATAERR, "Storage file is structurally damaged");
    }
}

pub(super) fn stats(cmd: CommonOptions) {
    let storage = open(&cmd.config);
    let mut st = storage.lock();

    let free = st
        .free_list_len()
        .unwrap_or_else(|e| die_storage(&cmd.config, e));
    let report = st
        .check_integrity()
        .unwrap_or_else(|e| die_storage(&cmd.config, e));
    let summaries = summarise_conversations(&mut st)
        .unwrap_or_else(|e| die_storage(&cmd.config, e));

    println!("Chunks:           {}", st.entry_count());
    println!("Free entries:     {}", free);
    println!(
        "Conversations:    {}",
        report.count(EntryKind::Conversation)
    );
    println!("Session keys:     {}", report.count(EntryKind::SessionKeys));
    println!("Messages:         {}", report.count(EntryKind::Message));
    println!("Message parts:    {}", report.count(EntryKind::MessagePart));

    for summary in summaries {
        let latest = summary
            .latest
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "never".to_owned());
        println!(
            "{:>6} {:<32} {:>6} messages {:>6} unread, latest {}",
            summary.index,
            summary.peer,
            summary.message_count,
            summary.unread_count,
            latest
        );
    }
}

pub(super) fn passwd(cmd: CommonOptions) {
    let mut config = load_config(&cmd.config, StorageConfig::read);

    let old_password = prompt_password("Current password: ");
    let master_key =
        MasterKey::from_config(&config.key, old_password.as_bytes())
            .unwrap_or_else(|| die!(EX_NOPERM, "Incorrect password"));

    let new_password = prompt_new_password();
    config.key = master_key
        .make_config(new_password.as_bytes())
        .unwrap_or_else(|e| {
            die!(EX_SOFTWARE, "Failed to derive master key: {}", e)
        });

    write_config(&cmd.config, &config, true);

    println!("Password changed");
}

fn load_config(
    path: &Path,
    load: impl FnOnce(&Path) -> Result<StorageConfig, Error>,
) -> StorageConfig {
    load(path).unwrap_or_else(|e| match e {
        Error::Io(e) if io::ErrorKind::NotFound == e.kind() => die!(
            EX_NOINPUT,
            "Configuration '{}' does not exist",
            path.display()
        ),
        e => die!(
            EX_CONFIG,
            "Failed to load configuration '{}': {}",
            path.display(),
            e
        ),
    })
}

fn open(config_path: &Path) -> Storage {
    let config = load_config(config_path, StorageConfig::load);
    if !config.path.is_file() {
        die!(
            EX_NOINPUT,
            "Storage file '{}' does not exist",
            config.path.display()
        );
    }

    let password = prompt_password("Password: ");
    let master_key = MasterKey::from_config(&config.key, password.as_bytes())
        .unwrap_or_else(|| die!(EX_NOPERM, "Incorrect password"));

    Storage::open(&config.path, &master_key, config.io)
        .unwrap_or_else(|e| die_storage(&config.path, e))
}

fn write_config(path: &Path, config: &StorageConfig, overwrite: bool) {
    let data = toml::to_string_pretty(config).unwrap_or_else(|e| {
        die!(EX_SOFTWARE, "Failed to serialise configuration: {}", e)
    });
    if let Err(e) = file_ops::spit(path, overwrite, 0o600, data.as_bytes()) {
        die!(
            EX_CANTCREAT,
            "Failed to write configuration '{}': {}",
            path.display(),
            e
        );
    }
}

fn prompt_password(prompt: &str) -> String {
    match rpassword::read_password_from_tty(Some(prompt)) {
        Ok(password) => password,
        Err(e) => die!(EX_NOINPUT, "Failed to read password: {}", e),
    }
}

fn prompt_new_password() -> String {
    let a = prompt_password("New password: ");
    let b = prompt_password("Confirm: ");
    if a != b {
        die!(EX_DATAERR, "Passwords don't match");
    }
    if a.is_empty() {
        die!(EX_NOINPUT, "No password given");
    }
    a
}

/// Report `e`, which came from the storage file at `path`, and exit.
fn die_storage(path: &Path, e: Error) -> ! {
    let ex = exit_code(&e);
    die!(ex, "{}: {}", path.display(), e)
}

fn exit_code(e: &Error) -> Sysexit {
    match *e {
        _ if e.is_format_error() => EX_DATAERR,
        Error::AuthenticationFailed | Error::Corrupt(..) => EX_DATAERR,
        Error::Io(..) => EX_IOERR,
        Error::ConfigSyntax(..) => EX_CONFIG,
        _ => EX_SOFTWARE,
    }
}
