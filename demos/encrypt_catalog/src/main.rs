//! Catalog encrypt/decrypt tool, grounded on `original_source/src/tools/encrypt.cpp`.
//!
//! The keystream XOR is self-inverse, so one code path serves both
//! directions — unlike the original, which only ever encrypted, this
//! also doubles as the decrypting counterpart spec.md §4.K reads.

use retina_core::crypt;

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

#[derive(Parser, Debug)]
struct Args {
    /// Catalog file to read (plaintext to encrypt, or ciphertext to decrypt).
    infile: PathBuf,
    /// Destination for the transformed file.
    outfile: PathBuf,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let key = crypt::prompt_key().context("reading encryption key")?;
    let plaintext_or_ciphertext =
        fs::read(&args.infile).with_context(|| format!("reading {:?}", args.infile))?;
    let transformed = crypt::xor_with_keystream(&plaintext_or_ciphertext, &key);
    fs::write(&args.outfile, transformed).with_context(|| format!("writing {:?}", args.outfile))?;

    println!("wrote {:?}", &args.outfile);
    Ok(())
}
