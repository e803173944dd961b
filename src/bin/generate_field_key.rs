//! AES-256 field key generation utility.
//!
//! Writes a fresh base64-encoded 32-byte key for encrypting persisted
//! prediction fields. Point `HEPACHECK_FIELD_KEY_FILE` at the output (or mount
//! it as the `hepacheck_field_key` Docker secret).
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin generate_field_key -- --out <path> [--force]
//! ```
//!
//! # Security
//!
//! - Key bytes come from OS entropy
//! - The encoded key is zeroized from memory after use
//! - Output file has restricted permissions (Unix only)

use std::io::Write;
#[cfg(unix)]
use std::os::unix::fs::OpenOptionsExt;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};

use hepacheck::domain::field_crypto::{generate_key, FIELD_KEY_FILE_ENV};

const USAGE: &str = "Usage: generate_field_key --out <path> [--force]";

fn main() -> Result<()> {
    let mut args = std::env::args().skip(1);
    let mut out_path: Option<PathBuf> = None;
    let mut force = false;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--out" => match args.next().filter(|p| !p.is_empty()) {
                Some(p) => out_path = Some(PathBuf::from(p)),
                None => bail!("--out requires a path\n{USAGE}"),
            },
            "--force" => force = true,
            "-h" | "--help" => {
                println!(
                    "{USAGE}\n\nWrites a base64 AES-256 field key to <path> with 0600 permissions. Prints only the path."
                );
                return Ok(());
            }
            _ => bail!("Unknown arg: {arg}\n{USAGE}"),
        }
    }

    let Some(out_path) = out_path else {
        bail!("{USAGE}");
    };

    if out_path.exists() && !force {
        bail!(
            "Refusing to overwrite existing file {}. Use --force.",
            out_path.display()
        );
    }

    if let Some(parent) = out_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }

    let mut opts = std::fs::OpenOptions::new();
    opts.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        opts.mode(0o600);
    }

    let key = generate_key();
    let mut file = opts
        .open(&out_path)
        .with_context(|| format!("Failed to open {}", out_path.display()))?;
    file.write_all(key.as_bytes())
        .and_then(|()| file.write_all(b"\n"))
        .with_context(|| format!("Failed to write {}", out_path.display()))?;

    println!("Wrote field key (base64) to {}", out_path.display());
    println!("Use it with {FIELD_KEY_FILE_ENV}={}", out_path.display());
    Ok(())
}
