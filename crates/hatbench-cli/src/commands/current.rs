//! `hatbench current` — print the current-state document.

use std::path::Path;

use hatbench_core::SnapshotStore;
use hatbench_core::store::read_json;

pub fn run(state_dir: Option<&Path>) {
    let store = SnapshotStore::new(super::state_dir(state_dir));
    let path = store.current_path();
    let Some(doc) = read_json(&path) else {
        eprintln!("No current state at {}", path.display());
        std::process::exit(1);
    };
    match serde_json::to_string_pretty(&doc) {
        Ok(s) => println!("{s}"),
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    }
}
