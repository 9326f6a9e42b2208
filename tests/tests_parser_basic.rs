//! Parser Tests - Basic Shapes
//!
//! Full parses of the arithmetic fixture grammar: tree shapes,
//! extents, padding, extras and encodings.

mod helpers;

use helpers::{arith_language, leaves, parse_str};
use once_cell::sync::Lazy;
use rstest::rstest;

use coppice::{Input, Language, Parser};

static ARITH: Lazy<Language> = Lazy::new(arith_language);

#[rstest]
#[case("id", "(E id)")]
#[case("id+id", "(E (E id) + (E id))")]
#[case("id+id+id", "(E (E (E id) + (E id)) + (E id))")]
#[case("\"abc\"", "(E str)")]
#[case("a+\"b\"+c", "(E (E (E id) + (E str)) + (E id))")]
fn test_tree_shape(#[case] input: &str, #[case] expected: &str) {
    let tree = parse_str(&ARITH, input);
    assert_eq!(tree.to_sexp(&ARITH), expected, "shape mismatch for: {input}");
    tree.check_invariants();
}

#[test]
fn test_left_associativity() {
    // Four operands still nest to the left
    let tree = parse_str(&ARITH, "a+b+c+d");
    assert_eq!(
        tree.to_sexp(&ARITH),
        "(E (E (E (E id) + (E id)) + (E id)) + (E id))"
    );
}

#[test]
fn test_root_extent_covers_input() {
    let input = "alpha + beta + gamma";
    let tree = parse_str(&ARITH, input);
    let total = tree.total_size();
    assert_eq!(total.chars, input.chars().count());
    assert_eq!(total.bytes, input.len());
    assert_eq!(total.rows, 0);
}

#[test]
fn test_leaf_extents_reconstruct_input() {
    let input = "aa + /*note*/ bb+cc";
    let tree = parse_str(&ARITH, input);
    let total: usize = leaves(&tree).iter().map(|leaf| leaf.total_chars()).sum();
    assert_eq!(total, input.chars().count());
    tree.check_invariants();
}

#[test]
fn test_padding_attaches_to_following_token() {
    let tree = parse_str(&ARITH, "a  + b");
    // (E (E id) + (E id)): the plus carries the two spaces before it
    let root = tree.root();
    let plus = root.child(1).unwrap();
    assert_eq!(plus.padding().chars, 2);
    assert_eq!(plus.size().chars, 1);
    let right = root.child(2).unwrap();
    assert_eq!(right.padding().chars, 1);
}

#[test]
fn test_newlines_count_rows() {
    let tree = parse_str(&ARITH, "a+\nb+c");
    let total = tree.total_size();
    assert_eq!(total.rows, 1);
    // Column count restarts after the newline: "b+c" is three columns
    assert_eq!(total.columns, 3);
}

#[test]
fn test_comment_attaches_as_extra() {
    let tree = parse_str(&ARITH, "a /*c*/ + b");
    assert_eq!(tree.to_sexp(&ARITH), "(E (E id) comment + (E id))");
    let comment = tree.root().child(1).unwrap();
    assert!(comment.is_extra());
    assert_eq!(comment.padding().chars, 1);
    assert_eq!(comment.size().chars, 5);
    tree.check_invariants();
}

#[test]
fn test_trailing_comment_folds_into_root() {
    let tree = parse_str(&ARITH, "a /*c*/");
    assert_eq!(tree.to_sexp(&ARITH), "(E id comment)");
    assert_eq!(tree.total_size().chars, 7);
}

#[test]
fn test_unicode_identifiers() {
    let input = "héllo+wörld";
    let tree = parse_str(&ARITH, input);
    assert_eq!(tree.to_sexp(&ARITH), "(E (E id) + (E id))");
    let total = tree.total_size();
    assert_eq!(total.chars, 11);
    assert_eq!(total.bytes, 13);
}

#[test]
fn test_utf16_input_matches_utf8() {
    let text = "ab+cd";
    let utf8_tree = parse_str(&ARITH, text);

    let units: Vec<u16> = text.encode_utf16().collect();
    let mut parser = Parser::new(&ARITH);
    let utf16_tree = parser.parse(Input::from_utf16(&units), None).unwrap();

    assert_eq!(utf16_tree.to_sexp(&ARITH), utf8_tree.to_sexp(&ARITH));
    assert_eq!(utf16_tree.total_size().chars, 5);
    assert_eq!(utf16_tree.total_size().bytes, 10);
}

#[test]
fn test_small_chunks_do_not_change_result() {
    let input = "alpha + /*x*/ beta";
    let whole = parse_str(&ARITH, input);
    let mut parser = Parser::new(&ARITH);
    let chunked = parser
        .parse(Input::from_str_chunked(input, 2), None)
        .unwrap();
    assert_eq!(chunked.to_sexp(&ARITH), whole.to_sexp(&ARITH));
    assert_eq!(chunked.total_size(), whole.total_size());
}

#[test]
fn test_parse_is_deterministic() {
    let input = "a+b+/*k*/c";
    let first = parse_str(&ARITH, input);
    let second = parse_str(&ARITH, input);
    assert_eq!(first.to_sexp(&ARITH), second.to_sexp(&ARITH));
    assert_eq!(first.total_size(), second.total_size());
}

#[test]
fn test_tree_cursor_visits_leaves_in_order() {
    let tree = parse_str(&ARITH, "a+b");
    let mut cursor = tree.walk();
    // Descend to the first leaf
    while cursor.descend() {}
    let mut seen = Vec::new();
    loop {
        let node = cursor.node().unwrap().clone();
        if node.child_count() == 0 {
            seen.push((node.symbol(), cursor.position().chars));
        }
        if !cursor.advance() {
            break;
        }
        while cursor.descend() {}
    }
    let expected: Vec<(coppice::Symbol, usize)> =
        vec![(helpers::ID, 0), (helpers::PLUS, 1), (helpers::ID, 2)];
    assert_eq!(seen, expected);
}
