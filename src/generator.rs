//! Aggregated context document rendering.
//!
//! The document has three parts: a generation timestamp, a references
//! section grouping `@path` lines by source directory, and a contents
//! section with one fenced block per file. Apart from the timestamp line
//! the output depends only on the file set and the file contents.
//!
//! A file that cannot be read or is not valid UTF-8 renders as an inline
//! `[Error reading file: ...]` placeholder; the rest of the document is
//! unaffected.

use chrono::{DateTime, Local};
use std::collections::BTreeMap;
use std::path::Path;

use crate::models::TrackedFile;

/// One file as it appears in the document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentEntry {
    /// Directory header the reference line is grouped under.
    pub group: String,
    /// Path shown in the reference line and the source label.
    pub display_path: String,
    pub name: String,
    /// File text, or a description of why it could not be read.
    pub content: Result<String, String>,
}

/// Read every file and compute how it is displayed relative to `base`.
pub fn load_entries(files: &[TrackedFile], base: &Path) -> Vec<DocumentEntry> {
    files
        .iter()
        .map(|f| {
            let display = display_path(&f.path, base);
            let group = match display.rsplit_once('/') {
                Some((dir, _)) => dir.to_string(),
                None => ".".to_string(),
            };
            DocumentEntry {
                group,
                display_path: display,
                name: f.name.clone(),
                content: read_text(&f.path),
            }
        })
        .collect()
}

/// Render the document. `entries` are expected in scan order.
pub fn render(entries: &[DocumentEntry], generated_at: DateTime<Local>) -> String {
    let mut lines: Vec<String> = vec![
        "# Project Context".to_string(),
        String::new(),
        format!(
            "*Auto-generated on {}*",
            generated_at.format("%Y-%m-%d %H:%M:%S")
        ),
        String::new(),
        "## Context Files".to_string(),
        String::new(),
        "The following text files are automatically included in the project context:".to_string(),
        String::new(),
    ];

    let mut groups: BTreeMap<&str, Vec<&DocumentEntry>> = BTreeMap::new();
    for entry in entries {
        groups.entry(entry.group.as_str()).or_default().push(entry);
    }
    for (group, mut members) in groups {
        members.sort_by(|a, b| a.name.cmp(&b.name));
        lines.push(format!("### {}", group));
        for entry in members {
            lines.push(format!("@{}", entry.display_path));
            lines.push(String::new());
        }
    }

    lines.extend([
        String::new(),
        "---".to_string(),
        String::new(),
        "## File Contents".to_string(),
        String::new(),
        "The following sections contain the actual content of the context files:".to_string(),
        String::new(),
    ]);

    for entry in entries {
        lines.push(format!("### {}", entry.name));
        lines.push(format!("*Source: {}*", entry.display_path));
        lines.push(String::new());
        lines.push("```".to_string());
        match &entry.content {
            Ok(text) => lines.push(text.clone()),
            Err(e) => lines.push(format!("[Error reading file: {}]", e)),
        }
        lines.extend([
            "```".to_string(),
            String::new(),
            "---".to_string(),
            String::new(),
        ]);
    }

    lines.join("\n")
}

/// Load and render in one step.
pub fn generate(files: &[TrackedFile], base: &Path, generated_at: DateTime<Local>) -> String {
    render(&load_entries(files, base), generated_at)
}

fn read_text(path: &Path) -> Result<String, String> {
    let bytes = std::fs::read(path).map_err(|e| e.to_string())?;
    String::from_utf8(bytes).map_err(|_| "stream did not contain valid UTF-8".to_string())
}

/// `path` relative to `base` when it lies underneath, `/`-separated.
fn display_path(path: &Path, base: &Path) -> String {
    path.strip_prefix(base)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WatchConfig;
    use crate::scanner::Scanner;
    use chrono::TimeZone;
    use std::fs;
    use tempfile::TempDir;

    fn ts(h: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 6, 1, h, 0, 0).unwrap()
    }

    fn setup() -> (TempDir, Vec<TrackedFile>) {
        let tmp = TempDir::new().unwrap();
        let root = std::path::absolute(tmp.path()).unwrap();
        fs::create_dir_all(root.join("docs")).unwrap();
        fs::create_dir_all(root.join("notes")).unwrap();
        fs::write(root.join("docs/api.txt"), "hello").unwrap();
        fs::write(root.join("notes/n1.txt"), "world").unwrap();
        let files = Scanner::new(&WatchConfig::default())
            .unwrap()
            .scan(&[root.join("docs"), root.join("notes")])
            .files;
        (tmp, files)
    }

    #[test]
    fn groups_and_blocks_per_file() {
        let (tmp, files) = setup();
        let base = std::path::absolute(tmp.path()).unwrap();
        let doc = generate(&files, &base, ts(9));

        assert!(doc.contains("### docs\n@docs/api.txt\n"));
        assert!(doc.contains("### notes\n@notes/n1.txt\n"));
        assert!(doc.contains("### api.txt\n*Source: docs/api.txt*\n\n```\nhello\n```"));
        assert!(doc.contains("### n1.txt\n*Source: notes/n1.txt*\n\n```\nworld\n```"));
        assert!(doc.contains("*Auto-generated on 2024-06-01 09:00:00*"));
    }

    #[test]
    fn output_is_deterministic_apart_from_timestamp() {
        let (tmp, files) = setup();
        let base = std::path::absolute(tmp.path()).unwrap();
        let a = generate(&files, &base, ts(9));
        let b = generate(&files, &base, ts(9));
        assert_eq!(a, b);

        let c = generate(&files, &base, ts(17));
        let strip = |s: &str| {
            s.lines()
                .filter(|l| !l.starts_with("*Auto-generated"))
                .collect::<Vec<_>>()
                .join("\n")
        };
        assert_ne!(a, c);
        assert_eq!(strip(&a), strip(&c));
    }

    #[test]
    fn undecodable_file_gets_placeholder() {
        let (tmp, mut files) = setup();
        let base = std::path::absolute(tmp.path()).unwrap();
        let bad = base.join("docs/bad.txt");
        fs::write(&bad, [0xff, 0xfe, 0x00, 0x9f]).unwrap();
        files.extend(
            Scanner::new(&WatchConfig::default())
                .unwrap()
                .scan(&[base.join("docs")])
                .files
                .into_iter()
                .filter(|f| f.name == "bad.txt"),
        );

        let doc = generate(&files, &base, ts(9));
        assert!(doc.contains("[Error reading file: stream did not contain valid UTF-8]"));
        assert!(doc.contains("hello"));
        assert!(doc.contains("world"));
    }

    #[test]
    fn missing_file_gets_placeholder() {
        let (tmp, files) = setup();
        let base = std::path::absolute(tmp.path()).unwrap();
        fs::remove_file(base.join("notes/n1.txt")).unwrap();
        let doc = generate(&files, &base, ts(9));
        assert!(doc.contains("[Error reading file:"));
    }

    #[test]
    fn empty_set_still_renders_sections() {
        let doc = render(&[], ts(9));
        assert!(doc.contains("## Context Files"));
        assert!(doc.contains("## File Contents"));
    }
}
