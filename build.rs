use std::path::{Path, PathBuf};
use std::process::Command;

const MAX_LINES: usize = 750;

const CHECKED_EXTENSIONS: &[&str] = &["rs", "yaml", "toml"];

const EXCLUDED_DIRS: &[&str] = &["target", ".git", "examples"];

const EXCLUDED_FILES: &[&str] = &["Cargo.lock"];

fn main() {
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/refs/heads/main");

    let sha = git_output(&["rev-parse", "HEAD"]).unwrap_or_else(|| "unknown".to_string());
    println!("cargo:rustc-env=ARCHFLOW_GIT_SHA={}", sha);

    let root = PathBuf::from(
        std::env::var("CARGO_MANIFEST_DIR").expect("CARGO_MANIFEST_DIR must be set"),
    );
    let files = collect_files_to_check(&root);
    for file in &files {
        println!("cargo:rerun-if-changed={}", file.display());
    }

    let rust_files: Vec<PathBuf> = files
        .iter()
        .filter(|p| {
            p.extension().and_then(|e| e.to_str()) == Some("rs")
                && p.file_name().and_then(|n| n.to_str()) != Some("build.rs")
        })
        .cloned()
        .collect();

    enforce_line_limits(&root, &files);
    enforce_no_dead_code_allows(&root, &rust_files);
    enforce_no_test_skips(&root, &rust_files);
    enforce_serial_for_env_mutations(&root, &rust_files);
}

fn git_output(args: &[&str]) -> Option<String> {
    let output = Command::new("git").args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    String::from_utf8(output.stdout)
        .ok()
        .map(|s| s.trim().to_string())
}

fn collect_files_to_check(root: &Path) -> Vec<PathBuf> {
    if let Some(listing) = git_output(&["ls-files"]) {
        let files: Vec<PathBuf> = listing
            .lines()
            .map(|line| root.join(line))
            .filter(|path| should_check_file(path, root))
            .collect();
        if !files.is_empty() {
            return files;
        }
    }

    let mut files = Vec::new();
    walk_directory(root, root, &mut files);
    files
}

fn walk_directory(dir: &Path, root: &Path, files: &mut Vec<PathBuf>) {
    let entries = match std::fs::read_dir(dir) {
        Ok(e) => e,
        Err(_) => return,
    };

    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            let excluded = path
                .file_name()
                .and_then(|n| n.to_str())
                .map(|name| EXCLUDED_DIRS.contains(&name))
                .unwrap_or(false);
            if !excluded {
                walk_directory(&path, root, files);
            }
        } else if should_check_file(&path, root) {
            files.push(path);
        }
    }
}

fn should_check_file(path: &Path, root: &Path) -> bool {
    let ext = match path.extension().and_then(|e| e.to_str()) {
        Some(e) => e,
        None => return false,
    };
    if !CHECKED_EXTENSIONS.contains(&ext) {
        return false;
    }

    let Ok(rel_path) = path.strip_prefix(root) else {
        return true;
    };
    if EXCLUDED_FILES.contains(&rel_path.to_string_lossy().as_ref()) {
        return false;
    }
    !rel_path.components().any(|component| {
        component
            .as_os_str()
            .to_str()
            .map(|name| EXCLUDED_DIRS.contains(&name))
            .unwrap_or(false)
    })
}

fn report_and_fail(title: &str, violations: &[(PathBuf, usize, String)], advice: &[&str]) {
    if violations.is_empty() {
        return;
    }
    eprintln!("\n========================================");
    eprintln!("{}", title);
    eprintln!("========================================");
    for (path, line, message) in violations {
        eprintln!("  {}:{}", path.display(), line);
        eprintln!("    {}", message.trim());
    }
    eprintln!("========================================");
    for line in advice {
        eprintln!("{}", line);
    }
    eprintln!();
    panic!("Build failed: {} ({} occurrence(s))", title, violations.len());
}

fn relative(root: &Path, file: &Path) -> PathBuf {
    file.strip_prefix(root).unwrap_or(file).to_path_buf()
}

fn enforce_line_limits(root: &Path, files: &[PathBuf]) {
    let mut violations = Vec::new();
    for file in files {
        let Ok(content) = std::fs::read_to_string(file) else {
            println!("cargo:warning=Could not read file {}", file.display());
            continue;
        };
        let count = content.lines().filter(|l| !l.trim().is_empty()).count();
        if count > MAX_LINES {
            violations.push((
                relative(root, file),
                count,
                format!("{} non-empty lines (max {})", count, MAX_LINES),
            ));
        }
    }
    report_and_fail(
        "FILE LINE LIMIT EXCEEDED",
        &violations,
        &["Please split these files into smaller modules."],
    );
}

fn enforce_no_dead_code_allows(root: &Path, rust_files: &[PathBuf]) {
    let mut violations = Vec::new();
    for file in rust_files {
        let Ok(content) = std::fs::read_to_string(file) else {
            continue;
        };
        for (idx, line) in content.lines().enumerate() {
            let trimmed = line.trim();
            if (trimmed.starts_with("#[allow(") || trimmed.starts_with("#![allow("))
                && trimmed.contains("dead_code")
            {
                violations.push((relative(root, file), idx + 1, line.to_string()));
            }
        }
    }
    report_and_fail(
        "#[allow(dead_code)] IS NOT ALLOWED",
        &violations,
        &[
            "DELETE unused code entirely, or gate test-only code behind #[cfg(test)].",
        ],
    );
}

/// Finds test functions and yields (start line, name, body lines).
fn test_functions(content: &str) -> Vec<(usize, String, Vec<String>)> {
    let lines: Vec<&str> = content.lines().collect();
    let mut found = Vec::new();
    let mut i = 0;
    while i < lines.len() {
        let trimmed = lines[i].trim();
        if trimmed == "#[test]" || trimmed.starts_with("#[tokio::test") {
            let start = i + 1;
            let mut name = String::new();
            let mut body = Vec::new();
            let mut depth: i32 = 0;
            let mut opened = false;
            let mut j = i + 1;
            while j < lines.len() {
                let line = lines[j];
                if name.is_empty() {
                    if let Some(pos) = line.find("fn ") {
                        let after = line.get(pos + 3..).unwrap_or("");
                        name = after.split('(').next().unwrap_or("").trim().to_string();
                    }
                }
                for c in line.chars() {
                    match c {
                        '{' => {
                            depth += 1;
                            opened = true;
                        }
                        '}' => depth -= 1,
                        _ => {}
                    }
                }
                body.push(format!("{}\u{0}{}", depth, line));
                if opened && depth == 0 {
                    break;
                }
                j += 1;
            }
            found.push((start, name, body));
            i = j;
        }
        i += 1;
    }
    found
}

/// Bans tests that silently skip instead of failing.
fn enforce_no_test_skips(root: &Path, rust_files: &[PathBuf]) {
    const SKIP_PATTERNS: &[&str] = &["Skipping test", "skipping test", "Test skipped"];

    let mut violations = Vec::new();
    for file in rust_files {
        let Ok(content) = std::fs::read_to_string(file) else {
            continue;
        };
        for (start, name, body) in test_functions(&content) {
            let skipped = body.iter().any(|entry| {
                let (depth, line) = entry.split_once('\u{0}').unwrap_or(("0", entry));
                let depth: i32 = depth.parse().unwrap_or(0);
                SKIP_PATTERNS.iter().any(|p| line.contains(p))
                    || (line.trim() == "return;" && depth > 1)
            });
            if skipped {
                violations.push((
                    relative(root, file),
                    start,
                    format!("test `{}` silently skips", name),
                ));
            }
        }
    }
    report_and_fail(
        "SILENT TEST SKIPS ARE NOT ALLOWED",
        &violations,
        &["Tests must FAIL if they cannot run, not silently pass."],
    );
}

/// Requires #[serial] for tests that mutate environment variables.
fn enforce_serial_for_env_mutations(root: &Path, rust_files: &[PathBuf]) {
    let mut violations = Vec::new();
    for file in rust_files {
        let Ok(content) = std::fs::read_to_string(file) else {
            continue;
        };
        let lines: Vec<&str> = content.lines().collect();
        for (start, name, body) in test_functions(&content) {
            let attrs_start = start.saturating_sub(1);
            let has_serial = lines
                .iter()
                .skip(attrs_start)
                .take(4)
                .any(|l| l.trim() == "#[serial]" || l.trim() == "#[serial_test::serial]");
            let mutates_env = body.iter().any(|entry| {
                let line = entry.split_once('\u{0}').map(|(_, l)| l).unwrap_or(entry);
                !line.trim_start().starts_with("//")
                    && (line.contains("env::set_var") || line.contains("env::remove_var"))
            });
            if mutates_env && !has_serial {
                violations.push((
                    relative(root, file),
                    start,
                    format!("test `{}` mutates env without #[serial]", name),
                ));
            }
        }
    }
    report_and_fail(
        "ENV MUTATIONS REQUIRE #[serial]",
        &violations,
        &["Add #[serial] from the serial_test crate to the test."],
    );
}
