use std::fs;
use std::path::{Path, PathBuf};

fn main() {
    let manifest_dir = std::env::var("CARGO_MANIFEST_DIR").expect("CARGO_MANIFEST_DIR missing");
    let failure_dir = Path::new(&manifest_dir).join("src").join("failure");
    println!("cargo:rerun-if-changed={}", failure_dir.display());
    if failure_dir.exists() {
        let mut files = Vec::new();
        collect_rs_files(&failure_dir, &mut files);
        for path in files {
            let contents = fs::read_to_string(&path)
                .unwrap_or_else(|e| panic!("Failed to read {}: {}", path.display(), e));
            enforce_classification_guards(&contents, &path);
        }
    }
}

fn collect_rs_files(dir: &Path, files: &mut Vec<PathBuf>) {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => return,
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_rs_files(&path, files);
        } else if path.extension().and_then(|s| s.to_str()) == Some("rs") {
            files.push(path);
        }
    }
}

// Classification must go through error types and errno values, never
// through rendered messages.
fn enforce_classification_guards(contents: &str, path: &Path) {
    let forbidden = [
        ".to_string()",
        "format!(",
        ".contains(\"",
        "starts_with(",
        "ends_with(",
        "println!(",
    ];

    for token in forbidden {
        if contents.contains(token) {
            panic!(
                "Forbidden token `{}` in failure classification module: {}",
                token,
                path.display()
            );
        }
    }
}
