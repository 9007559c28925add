//! The interactive prompt loop and command dispatch.
//!
//! Commands map to engine operations through a static dispatch table; each
//! handler validates its argument count, translates engine errors into the
//! shell's wording, and keeps the loop alive. Only I/O failure of the
//! prompt itself ends the session.

use crate::token::{self, CommandLine};
use anyhow::{Context, Result};
use fsh_core::{OpenMode, Volume};
use fsh_error::FshError;
use std::io::{BufRead, Write};

type Handler = fn(&mut Shell, &[String]);

/// Dispatch table, alphabetical. `help` walks this same table.
const COMMANDS: &[(&str, Handler)] = &[
    ("cd", Shell::cmd_cd),
    ("close", Shell::cmd_close),
    ("create", Shell::cmd_create),
    ("fsinfo", Shell::cmd_fsinfo),
    ("help", Shell::cmd_help),
    ("ls", Shell::cmd_ls),
    ("mkdir", Shell::cmd_mkdir),
    ("open", Shell::cmd_open),
    ("read", Shell::cmd_read),
    ("rm", Shell::cmd_rm),
    ("rmdir", Shell::cmd_rmdir),
    ("size", Shell::cmd_size),
    ("undelete", Shell::cmd_undelete),
    ("write", Shell::cmd_write),
];

pub struct Shell {
    volume: Volume,
}

impl Shell {
    #[must_use]
    pub fn new(volume: Volume) -> Self {
        Self { volume }
    }

    /// Run the prompt loop until `exit` or end of input.
    pub fn run(&mut self, input: impl BufRead) -> Result<()> {
        let mut lines = input.lines();
        loop {
            let mut stdout = std::io::stdout();
            write!(stdout, "Enter command or exit : {} > ", self.volume.location())
                .context("writing prompt")?;
            stdout.flush().context("flushing prompt")?;

            let Some(line) = lines.next() else {
                return Ok(());
            };
            let line = line.context("reading command input")?;
            if line == "exit" {
                return Ok(());
            }

            match token::tokenize(&line) {
                Err(_) => println!("Error: Unclosed Quote"),
                Ok(None) => {}
                Ok(Some(command)) => self.dispatch(&command),
            }
        }
    }

    fn dispatch(&mut self, command: &CommandLine) {
        match COMMANDS
            .iter()
            .find(|(name, _)| *name == command.name)
        {
            Some((_, handler)) => handler(self, &command.argv),
            None => println!("Invalid command"),
        }
    }

    // ── command handlers ────────────────────────────────────────────────

    fn cmd_fsinfo(&mut self, argv: &[String]) {
        if !argv.is_empty() {
            println!("usage: fsinfo");
            return;
        }
        match self.volume.summary() {
            Ok(info) => {
                println!("  Bytes Per Sector:       {}", info.bytes_per_sector);
                println!("  Sectors Per Cluster:    {}", info.sectors_per_cluster);
                println!("  Total Sectors:          {}", info.total_sectors);
                println!("  Number of FATs:         {}", info.num_fats);
                println!("  Sectors Per Fat:        {}", info.fat_size_sectors);
                println!("  Number of Free Sectors: {}", info.free_sectors);
            }
            Err(err) => println!("Error: {err}"),
        }
    }

    fn cmd_ls(&mut self, argv: &[String]) {
        if argv.len() > 1 {
            println!("usage: ls [directory_name]");
            return;
        }
        match self.volume.list_dir(argv.first().map(String::as_str)) {
            Ok(names) => {
                if !names.is_empty() {
                    println!("{} ", names.join(" "));
                }
            }
            Err(FshError::NoSuchPath) => println!("Error: Invalid Directory"),
            Err(err) => println!("Error: {err}"),
        }
    }

    fn cmd_cd(&mut self, argv: &[String]) {
        if argv.len() > 1 {
            println!("usage: cd [directory_name]");
            return;
        }
        match self.volume.change_dir(argv.first().map(String::as_str)) {
            Ok(()) => {}
            Err(FshError::NoSuchPath) => println!("Error: Invalid Directory"),
            Err(err) => println!("Error: {err}"),
        }
    }

    fn cmd_size(&mut self, argv: &[String]) {
        let [name] = argv else {
            println!("usage: size <entry_name>");
            return;
        };
        match self.volume.entry_size(name) {
            Ok(size) => println!("{size}"),
            Err(FshError::NoSuchPath | FshError::NameInvalid) => println!("Invalid Filename"),
            Err(err) => println!("Error: {err}"),
        }
    }

    fn cmd_create(&mut self, argv: &[String]) {
        let [name] = argv else {
            println!("Usage: create <file_name>");
            return;
        };
        let result = self.volume.create_file(name);
        Self::report_create(result);
    }

    fn cmd_mkdir(&mut self, argv: &[String]) {
        let [name] = argv else {
            println!("Usage: mkdir <dir_name>");
            return;
        };
        let result = self.volume.make_dir(name);
        Self::report_create(result);
    }

    fn report_create(result: std::result::Result<(), FshError>) {
        match result {
            Ok(()) => {}
            Err(FshError::NameInvalid) => println!("Invalid Filename"),
            Err(FshError::AlreadyExists) => println!("File Already Exists"),
            Err(FshError::NoSuchPath) => println!("Invalid location"),
            Err(FshError::NoSpace) => println!("Filesystem out of space"),
            Err(err) => println!("Error: {err}"),
        }
    }

    fn cmd_open(&mut self, argv: &[String]) {
        let [name, mode] = argv else {
            println!("usage: open <file_name> <mode>");
            return;
        };
        let Ok(mode) = mode.parse::<OpenMode>() else {
            println!("Invalid Permission");
            return;
        };
        match self.volume.open_file(name, mode) {
            Ok(()) => {}
            Err(FshError::AlreadyOpen) => println!("File Already Open"),
            Err(FshError::IsADirectory) => println!("Error: Cannot Open Directory"),
            Err(FshError::NoSuchPath) => println!("Invalid Filename"),
            Err(err) => println!("Error: {err}"),
        }
    }

    fn cmd_close(&mut self, argv: &[String]) {
        let [name] = argv else {
            println!("Usage: Close <file_name>");
            return;
        };
        match self.volume.close_file(name) {
            Ok(()) => {}
            Err(FshError::NotOpen) => println!("File not open"),
            Err(err) => println!("Error: {err}"),
        }
    }

    fn cmd_read(&mut self, argv: &[String]) {
        let [name, start, nbytes] = argv else {
            println!("Usage: Read <file_name> <start> <num_bytes>");
            return;
        };
        let (Ok(start), Ok(nbytes)) = (start.parse::<u32>(), nbytes.parse::<u32>()) else {
            println!("Usage: Read <file_name> <start> <num_bytes>");
            return;
        };
        match self.volume.read_file(name, start, nbytes) {
            Ok(bytes) => {
                let mut stdout = std::io::stdout();
                let _ = stdout.write_all(&bytes);
                let _ = stdout.flush();
            }
            Err(FshError::NotOpen) => println!("Error: File not open"),
            Err(FshError::BadMode) => println!("Error: File not open for reading"),
            Err(FshError::OutOfBounds) => println!("Error: Start Parameter out of bounds"),
            Err(err) => println!("Error: {err}"),
        }
    }

    fn cmd_write(&mut self, argv: &[String]) {
        let [name, start, data] = argv else {
            println!("Usage: Write <file_name> <start> <quoted_data>");
            return;
        };
        let Ok(start) = start.parse::<u32>() else {
            println!("Usage: Write <file_name> <start> <quoted_data>");
            return;
        };
        match self.volume.write_file(name, start, data.as_bytes()) {
            Ok(_) => {}
            Err(FshError::NotOpen) => println!("Error: File not open"),
            Err(FshError::BadMode) => println!("Error: File not open for writing"),
            Err(FshError::NoSpace) => println!("Filesystem out of space"),
            Err(FshError::OutOfBounds) => println!("Error: Start Parameter out of bounds"),
            Err(err) => println!("Error: {err}"),
        }
    }

    fn cmd_rm(&mut self, argv: &[String]) {
        if argv.is_empty() {
            println!("Usage: rm <file_name>");
            return;
        }
        for name in argv {
            if self.volume.remove_file(name).is_err() {
                println!("File {name} not found!");
                return;
            }
        }
    }

    fn cmd_rmdir(&mut self, argv: &[String]) {
        let [name] = argv else {
            println!("usage: rmdir <dir_name>");
            return;
        };
        match self.volume.remove_dir(name) {
            Ok(()) => {}
            Err(FshError::NoSuchPath | FshError::NotADirectory) => println!("Invalid Filename"),
            Err(FshError::DirNotEmpty) => println!("Directory must be empty"),
            Err(err) => println!("Error: {err}"),
        }
    }

    fn cmd_undelete(&mut self, _argv: &[String]) {
        if let Err(err) = self.volume.undelete() {
            println!("Error: {err}");
        }
    }

    fn cmd_help(&mut self, _argv: &[String]) {
        println!(" Enter any of the following commands:");
        for (name, _) in COMMANDS {
            println!("   {name}");
        }
    }
}
