// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn join_and_split_are_inverses() {
    let payload = join_fields(&["Text", "127.0.0.1", "9200"]);
    assert_eq!(payload, "Text&127.0.0.1&9200");
    assert_eq!(split_fields(&payload), vec!["Text", "127.0.0.1", "9200"]);
}

#[test]
fn split_n_requires_exact_arity() {
    assert_eq!(split_n::<3>("a&b&c"), Some(["a", "b", "c"]));
    assert_eq!(split_n::<3>("a&b"), None);
    assert_eq!(split_n::<3>("a&b&c&d"), None);
}

#[test]
fn empty_fields_survive() {
    assert_eq!(split_n::<3>("u&&9"), Some(["u", "", "9"]));
    assert_eq!(split_fields(""), vec![""]);
}
