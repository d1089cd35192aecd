// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Distortion routines.
//!
//! Pure file-to-file transforms: text filtering drops short words into a
//! `<input>_distorted` sibling; media compression decimates the file in
//! place. Callers treat these as black boxes — the transfer machinery never
//! looks inside.

use std::fs::File;
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use mangle_core::{MediaKind, MediaSubkind};

/// Distort `input` with the given factor and return the output path.
pub fn apply(input: &Path, factor: u32) -> io::Result<PathBuf> {
    match MediaKind::from_path(input) {
        Some(MediaKind::Text) => {
            let output = output_path(input);
            distort_text(input, &output, factor)?;
            Ok(output)
        }
        Some(MediaKind::Media) => {
            match MediaSubkind::from_path(input) {
                Some(MediaSubkind::Audio) => debug!("compressing audio {}", input.display()),
                Some(MediaSubkind::Image) => debug!("compressing image {}", input.display()),
                None => {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidInput,
                        format!("unsupported media file {}", input.display()),
                    ))
                }
            }
            compress_in_place(input, factor)?;
            Ok(input.to_path_buf())
        }
        None => Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("unsupported file {}", input.display()),
        )),
    }
}

/// Where the distorted output for `input` lands: text gets a sibling file,
/// media is overwritten in place.
pub fn output_path(input: &Path) -> PathBuf {
    match MediaKind::from_path(input) {
        Some(MediaKind::Media) => input.to_path_buf(),
        _ => {
            let mut name = input.as_os_str().to_os_string();
            name.push("_distorted");
            PathBuf::from(name)
        }
    }
}

/// Keep words of at least `factor` letters. Words are maximal runs of ASCII
/// alphabetic bytes; every other byte passes through unchanged.
fn distort_text(input: &Path, output: &Path, factor: u32) -> io::Result<()> {
    let factor = factor.max(1) as usize;
    let mut src = File::open(input)?;
    let mut dst = BufWriter::new(File::create(output)?);

    let mut word: Vec<u8> = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        let n = src.read(&mut buf)?;
        if n == 0 {
            break;
        }
        for &byte in &buf[..n] {
            if byte.is_ascii_alphabetic() {
                word.push(byte);
            } else {
                if word.len() >= factor {
                    dst.write_all(&word)?;
                }
                word.clear();
                dst.write_all(&[byte])?;
            }
        }
    }
    if word.len() >= factor {
        dst.write_all(&word)?;
    }
    dst.flush()
}

/// Lossy decimation: drop every `factor`-th byte. A factor of 0 or 1 leaves
/// the file unchanged.
fn compress_in_place(path: &Path, factor: u32) -> io::Result<()> {
    if factor <= 1 {
        return Ok(());
    }
    let factor = factor as usize;
    let bytes = std::fs::read(path)?;
    let kept: Vec<u8> = bytes
        .iter()
        .enumerate()
        .filter(|(i, _)| (i + 1) % factor != 0)
        .map(|(_, &b)| b)
        .collect();
    std::fs::write(path, kept)
}

#[cfg(test)]
#[path = "distort_tests.rs"]
mod tests;
