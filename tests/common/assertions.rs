//! Custom test assertions for integration tests

use corpus_dl::Event;
use std::path::Path;
use tokio::sync::broadcast;

/// Drain every event already sent on `rx`
pub fn drain_events(rx: &mut broadcast::Receiver<Event>) -> Vec<Event> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Assert that a directory holds exactly the given file names
pub fn assert_dir_contains(dir: &Path, expected: &[&str]) {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();

    let mut expected: Vec<String> = expected.iter().map(|s| s.to_string()).collect();
    expected.sort();

    assert_eq!(names, expected, "unexpected contents of {}", dir.display());
}

/// Parse a written table back into `(text, label)` rows
pub fn read_table(path: &Path) -> Vec<(String, u8)> {
    let mut reader = csv::Reader::from_path(path).unwrap();
    assert_eq!(reader.headers().unwrap().iter().collect::<Vec<_>>(), vec!["text", "label"]);
    reader
        .records()
        .map(|record| {
            let record = record.unwrap();
            (record[0].to_string(), record[1].parse().unwrap())
        })
        .collect()
}
