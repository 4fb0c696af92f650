#![allow(clippy::unwrap_used, clippy::expect_used, missing_docs)]

use storefs::fs::flat::codec::{decode, encode};

#[test]
fn round_trip_recovers_lowercased_path() {
    let paths = [
        "/",
        "/a/b.txt",
        "/File Name (1)!.txt",
        "/UPPER/Mixed Case",
        "/under_score/file",
        "/per%cent",
        "/данные/файл.txt",
        "/日本語/テスト.md",
        "/dash-dot.~tilde'quote",
    ];
    for path in paths {
        let token = encode(path);
        assert_eq!(
            decode(&token).unwrap(),
            path.to_lowercase(),
            "round trip failed for {path:?}"
        );
    }
}

#[test]
fn tokens_use_only_the_restricted_alphabet() {
    for path in ["/a/B c!", "/данные", "/x_y-z.txt"] {
        let token = encode(path);
        assert!(
            token
                .bytes()
                .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_'),
            "token {token:?} leaves the restricted alphabet"
        );
    }
}

#[test]
fn token_length_is_deterministic_in_escape_count() {
    for path in ["/a/b.txt", "/File (1)", "/файл", "/abc"] {
        let lower = path.to_lowercase();
        let escaped = lower
            .bytes()
            .filter(|b| !(b.is_ascii_lowercase() || b.is_ascii_digit()))
            .count();
        assert_eq!(encode(path).len(), lower.len() + 2 * escaped);
    }
}

#[test]
fn encoding_is_prefix_preserving() {
    let dir = encode("/docs/");
    for child in ["/docs/a.txt", "/docs/sub/b.txt", "/docs/файл"] {
        assert!(encode(child).starts_with(&dir));
    }
    // A sibling must not match the directory prefix.
    assert!(!encode("/docs2/a.txt").starts_with(&dir));
}

#[test]
fn known_encodings() {
    assert_eq!(encode("/"), "_2f");
    assert_eq!(encode("/ab"), "_2fab");
    assert_eq!(encode("A"), "a");
    // The sentinel itself must be escaped to stay invertible.
    assert_eq!(encode("_"), "_5f");
    assert_eq!(decode("_5f").unwrap(), "_");
}

#[test]
fn decode_rejects_tokens_outside_the_image() {
    // Truncated escape.
    assert_eq!(decode("_2"), None);
    assert_eq!(decode("ab_"), None);
    // Non-hex escape digits.
    assert_eq!(decode("_zz"), None);
    // Unescapes to invalid UTF-8.
    assert_eq!(decode("_ff"), None);
}
