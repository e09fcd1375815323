use proptest::prelude::*;
use std::io::Cursor;
use wikitransp::{ReverseLines, ScanOptions};

fn scan(text: &str, options: ScanOptions) -> Vec<String> {
    ReverseLines::new(Cursor::new(text.as_bytes().to_vec()), options)
        .expect("Scanner should open")
        .collect::<std::io::Result<Vec<_>>>()
        .expect("Scan should succeed")
}

fn forward_reversed(text: &str, eol: &str) -> Vec<String> {
    let mut v: Vec<String> = text.split_inclusive(eol).map(str::to_string).collect();
    v.reverse();
    v
}

proptest! {
    #[test]
    fn prop_matches_forward_split(text in "[a-cé\n]{0,80}", chunk in 1usize..24) {
        let lines = scan(&text, ScanOptions::default().with_chunk_size(chunk));
        prop_assert_eq!(lines, forward_reversed(&text, "\n"));
    }

    #[test]
    fn prop_filter_keeps_matching_lines(text in "[abx\n]{0,80}", chunk in 1usize..24) {
        let lines = scan(&text, ScanOptions::matching("x").with_chunk_size(chunk));
        let expected: Vec<String> = forward_reversed(&text, "\n")
            .into_iter()
            .filter(|line| line.contains('x'))
            .collect();
        prop_assert_eq!(lines, expected);
    }

    #[test]
    fn prop_crlf_terminators(text in "[ab\r\n]{0,60}", chunk in 1usize..12) {
        let options = ScanOptions::default()
            .with_line_ending("\r\n")
            .with_chunk_size(chunk);
        prop_assert_eq!(scan(&text, options), forward_reversed(&text, "\r\n"));
    }

    #[test]
    fn prop_strip_eol_drops_only_the_terminator(text in "[ab\n]{0,60}", chunk in 1usize..12) {
        let options = ScanOptions::default().with_strip_eol(true).with_chunk_size(chunk);
        let expected: Vec<String> = forward_reversed(&text, "\n")
            .into_iter()
            .map(|line| line.strip_suffix('\n').unwrap_or(&line).to_string())
            .collect();
        prop_assert_eq!(scan(&text, options), expected);
    }
}

#[test]
fn test_chunk_size_does_not_change_results() {
    let text: String = (0..500).map(|i| format!("line {i} {}\n", "pad".repeat(i % 7))).collect();
    let reference = scan(&text, ScanOptions::default().with_chunk_size(4096));
    for chunk in [1, 4, 7, 64] {
        assert_eq!(scan(&text, ScanOptions::default().with_chunk_size(chunk)), reference);
    }
    assert_eq!(reference.len(), 500);
    assert_eq!(reference[0], format!("line 499 {}\n", "pad".repeat(499 % 7)));
}
