use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
pub struct Cli {
    /// Image file
    #[arg(long, short, default_value = "fs.img")]
    pub image: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Create an empty volume, overwriting the image
    Format {
        /// Volume size in MiB
        #[arg(long, default_value_t = 64)]
        size_mib: u64,

        /// Allocation unit in bytes
        #[arg(long, short, default_value_t = 512)]
        alignment: u64,
    },

    /// Store a host file, printing its id
    Put { path: PathBuf },

    /// Write a file's contents to stdout
    Get { id: u64 },

    /// Store a host file and register it as the boot kernel
    Kernel { path: PathBuf },

    /// Look the kernel up the way the boot loader does
    Locate,

    /// List files with their lengths
    List,

    Stat { id: u64 },

    /// Delete a file
    Rm { id: u64 },
}
