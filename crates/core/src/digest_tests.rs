// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::io::Write;

use super::*;

#[test]
fn known_digest() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(b"hello world\n").unwrap();
    // md5sum of "hello world\n"
    assert_eq!(md5_hex(file.path()).unwrap(), "6f5902ac237024bdd0c176cb93063dc4");
}

#[test]
fn empty_file_digest() {
    let file = tempfile::NamedTempFile::new().unwrap();
    assert_eq!(md5_hex(file.path()).unwrap(), "d41d8cd98f00b204e9800998ecf8427e");
}

#[test]
fn digest_spans_buffer_boundaries() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(&vec![0x42u8; 20_000]).unwrap();
    let whole = md5_hex(file.path()).unwrap();
    assert_eq!(whole.len(), 32);

    let mut hasher = md5::Md5::new();
    md5::Digest::update(&mut hasher, vec![0x42u8; 20_000]);
    let expected: String = md5::Digest::finalize(hasher)
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect();
    assert_eq!(whole, expected);
}

#[test]
fn missing_file_is_an_io_error() {
    assert!(md5_hex(std::path::Path::new("/nonexistent/file")).is_err());
}
