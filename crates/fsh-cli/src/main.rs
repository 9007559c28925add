#![forbid(unsafe_code)]

mod shell;
mod token;

use clap::Parser;
use fsh_core::Volume;
use fsh_error::FshError;
use shell::Shell;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "fsh", about = "Interactive FAT32 filesystem image shell")]
struct Cli {
    /// Path to the FAT32 filesystem image, opened read-write.
    image: PathBuf,
}

fn main() {
    std::process::exit(run());
}

fn run() -> i32 {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let _ = err.print();
            return 1;
        }
    };

    let volume = match Volume::mount(&cli.image) {
        Ok(volume) => volume,
        Err(FshError::Io(_)) => {
            println!("Error: Unrecognized file name");
            return 1;
        }
        Err(_) => {
            println!("Invalid image");
            return 1;
        }
    };

    let stdin = std::io::stdin();
    match Shell::new(volume).run(stdin.lock()) {
        Ok(()) => 0,
        Err(err) => {
            eprintln!("error: {err:#}");
            1
        }
    }
}
