//! Corpus fixtures and compressed test content generators

use bzip2::write::BzEncoder;
use flate2::Compression;
use flate2::write::GzEncoder;
use std::io::Write;

/// Small corpus covering every filter outcome
///
/// Two records are kept, one is too short, one has a bad label and one line
/// is not JSON.
pub const MIXED_CORPUS: &str = concat!(
    r#"{"comment": "Oh great, another Monday", "label": 1, "author": "a"}"#,
    "\n",
    r#"{"comment": "short", "label": 1}"#,
    "\n",
    r#"{"comment": "I genuinely enjoyed\nthis film", "label": 0}"#,
    "\n",
    r#"{"comment": "label is out of range here", "label": 2}"#,
    "\n",
    "{this is not json\n",
);

/// Table expected from [`MIXED_CORPUS`] with the default minimum length
pub const MIXED_TABLE: &str = "text,label\r\n\
    \"Oh great, another Monday\",1\r\n\
    I genuinely enjoyed this film,0\r\n";

/// Gzip-compress `data` as a single member
pub fn gzip_bytes(data: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

/// Bzip2-compress `data`
pub fn bzip2_bytes(data: &[u8]) -> Vec<u8> {
    let mut encoder = BzEncoder::new(Vec::new(), bzip2::Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

/// Generate `count` accepted records with alternating labels
pub fn generate_corpus(count: usize) -> String {
    let mut corpus = String::with_capacity(count * 64);
    for i in 0..count {
        corpus.push_str(&format!(
            "{{\"comment\": \"generated comment number {}\", \"label\": {}}}\n",
            i,
            i % 2
        ));
    }
    corpus
}
