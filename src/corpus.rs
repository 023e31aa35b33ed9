//! Corpus enumeration.
//!
//! Walks the configured corpus root and returns every file that matches the
//! include globs and none of the exclude globs, sorted by filename so that
//! scans (and therefore run summaries) are deterministic.

use anyhow::{Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::config::CorpusConfig;
use crate::fingerprint;
use crate::models::Document;

/// A file discovered in the corpus, not yet read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorpusFile {
    /// Path relative to the corpus root, `/`-separated.
    pub filename: String,
    pub path: PathBuf,
}

pub fn scan(config: &CorpusConfig) -> Result<Vec<CorpusFile>> {
    let root = &config.root;
    let include_set = build_globset(&config.include_globs)?;

    // Hidden files and directories at any depth.
    let mut default_excludes = vec![
        "**/.git/**".to_string(),
        "**/.*".to_string(),
        "**/.*/**".to_string(),
    ];
    default_excludes.extend(config.exclude_globs.clone());
    let exclude_set = build_globset(&default_excludes)?;

    let mut files = Vec::new();

    let walker = WalkDir::new(root).follow_links(config.follow_symlinks);
    for entry in walker {
        let entry = entry.with_context(|| format!("Failed to walk {}", root.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let filename = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        if exclude_set.is_match(&filename) || !include_set.is_match(&filename) {
            continue;
        }

        files.push(CorpusFile {
            filename,
            path: path.to_path_buf(),
        });
    }

    files.sort_by(|a, b| a.filename.cmp(&b.filename));
    Ok(files)
}

/// Read a corpus file once and build a [`Document`] whose hash describes
/// exactly the bytes that were read.
pub fn load_document(file: &CorpusFile) -> Result<Document> {
    let bytes = std::fs::read(&file.path)
        .with_context(|| format!("Failed to read {}", file.path.display()))?;
    let hash = fingerprint::fingerprint_bytes(&bytes);
    let mtime = fingerprint::modified_secs(&file.path)?;
    let text = String::from_utf8(bytes)
        .with_context(|| format!("{} is not valid UTF-8", file.filename))?;

    Ok(Document {
        filename: file.filename.clone(),
        source: file.path.clone(),
        title: derive_title(&file.path),
        text,
        hash,
        mtime,
    })
}

/// File stem with underscores turned into spaces: `Luke_Skywalker.txt`
/// becomes `Luke Skywalker`.
pub fn derive_title(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().replace('_', " "))
        .unwrap_or_default()
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).with_context(|| format!("Invalid glob: {}", pattern))?);
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn corpus_config(root: &Path) -> CorpusConfig {
        CorpusConfig {
            root: root.to_path_buf(),
            include_globs: vec!["*.txt".to_string()],
            exclude_globs: vec![],
            follow_symlinks: false,
        }
    }

    #[test]
    fn test_scan_filters_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("Yoda.txt"), "Yoda").unwrap();
        fs::write(dir.path().join("Anakin_Skywalker.txt"), "Anakin").unwrap();
        fs::write(dir.path().join("terms_map.json"), "{}").unwrap();
        fs::write(dir.path().join(".hidden.txt"), "hidden").unwrap();

        let files = scan(&corpus_config(dir.path())).unwrap();
        let names: Vec<&str> = files.iter().map(|f| f.filename.as_str()).collect();
        assert_eq!(names, vec!["Anakin_Skywalker.txt", "Yoda.txt"]);
    }

    #[test]
    fn test_scan_skips_nested_hidden_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("sub")).unwrap();
        fs::create_dir_all(dir.path().join(".drafts")).unwrap();
        fs::write(dir.path().join("sub").join("Leia_Organa.txt"), "Leia").unwrap();
        fs::write(dir.path().join("sub").join(".draft.txt"), "draft").unwrap();
        fs::write(dir.path().join(".drafts").join("Rey.txt"), "Rey").unwrap();

        let files = scan(&corpus_config(dir.path())).unwrap();
        let names: Vec<&str> = files.iter().map(|f| f.filename.as_str()).collect();
        assert_eq!(names, vec!["sub/Leia_Organa.txt"]);
    }

    #[test]
    fn test_exclude_globs() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("Yoda.txt"), "Yoda").unwrap();
        fs::write(dir.path().join("draft_notes.txt"), "wip").unwrap();

        let mut config = corpus_config(dir.path());
        config.exclude_globs = vec!["draft_*".to_string()];
        let files = scan(&config).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].filename, "Yoda.txt");
    }

    #[test]
    fn test_load_document_title_and_hash() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Luke_Skywalker.txt");
        fs::write(&path, "Luke Skywalker was a Jedi.").unwrap();

        let file = CorpusFile {
            filename: "Luke_Skywalker.txt".to_string(),
            path: path.clone(),
        };
        let doc = load_document(&file).unwrap();
        assert_eq!(doc.title, "Luke Skywalker");
        assert_eq!(doc.text, "Luke Skywalker was a Jedi.");
        assert_eq!(
            doc.hash,
            fingerprint::fingerprint_file(&path).unwrap().hash
        );
    }

    #[test]
    fn test_load_document_rejects_invalid_utf8() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.txt");
        fs::write(&path, [0xff, 0xfe, 0xfd]).unwrap();
        let file = CorpusFile {
            filename: "broken.txt".to_string(),
            path,
        };
        assert!(load_document(&file).is_err());
    }
}
