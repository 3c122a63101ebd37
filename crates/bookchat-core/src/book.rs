use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum BookError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("No Markdown chapters found in {0}")]
    Empty(PathBuf),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Chapter {
    pub title: String,
    pub path: PathBuf,
    /// Markdown body with any front matter removed
    pub lines: Vec<String>,
}

/// A book made of Markdown chapter files, in file-name order
#[derive(Debug, Clone, Default)]
pub struct Book {
    chapters: Vec<Chapter>,
}

impl Book {
    pub fn from_chapters(chapters: Vec<Chapter>) -> Self {
        Self { chapters }
    }

    /// Load every `.md`/`.mdx` file under `dir`, recursively, sorted by path
    pub fn load_from_dir(dir: &Path) -> Result<Self, BookError> {
        let mut files = Vec::new();
        collect_markdown_files(dir, &mut files)?;
        files.sort();

        let mut chapters = Vec::with_capacity(files.len());
        for path in files {
            let content = fs::read_to_string(&path).map_err(|source| BookError::Io {
                path: path.clone(),
                source,
            })?;
            chapters.push(parse_chapter(&path, &content));
        }

        if chapters.is_empty() {
            return Err(BookError::Empty(dir.to_path_buf()));
        }

        info!(chapters = chapters.len(), dir = %dir.display(), "book loaded");
        Ok(Self { chapters })
    }

    pub fn chapters(&self) -> &[Chapter] {
        &self.chapters
    }

    pub fn chapter(&self, idx: usize) -> Option<&Chapter> {
        self.chapters.get(idx)
    }

    pub fn len(&self) -> usize {
        self.chapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chapters.is_empty()
    }

    /// Find the chapter a cited source belongs to. Exact title match wins,
    /// otherwise either title containing the other (case-insensitive).
    pub fn find_chapter(&self, title: &str) -> Option<usize> {
        let wanted = title.trim().to_lowercase();
        if wanted.is_empty() {
            return None;
        }

        self.chapters
            .iter()
            .position(|c| c.title.to_lowercase() == wanted)
            .or_else(|| {
                self.chapters.iter().position(|c| {
                    let have = c.title.to_lowercase();
                    have.contains(&wanted) || wanted.contains(&have)
                })
            })
    }
}

fn collect_markdown_files(dir: &Path, out: &mut Vec<PathBuf>) -> Result<(), BookError> {
    let entries = fs::read_dir(dir).map_err(|source| BookError::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    for entry in entries {
        let path = entry
            .map_err(|source| BookError::Io {
                path: dir.to_path_buf(),
                source,
            })?
            .path();
        if path.is_dir() {
            collect_markdown_files(&path, out)?;
        } else if matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("md") | Some("mdx")
        ) {
            out.push(path);
        }
    }
    Ok(())
}

fn parse_chapter(path: &Path, content: &str) -> Chapter {
    let mut front_matter_title = None;
    let mut body: Vec<&str> = content.lines().collect();

    // YAML front matter: only `title:` is of interest
    if body.first().map(|l| l.trim()) == Some("---") {
        if let Some(end) = body.iter().skip(1).position(|l| l.trim() == "---") {
            for line in &body[1..=end] {
                if let Some(value) = line.trim().strip_prefix("title:") {
                    front_matter_title =
                        Some(value.trim().trim_matches(|c| c == '"' || c == '\'').to_string());
                }
            }
            body.drain(..end + 2);
        }
    }

    let heading_title = body
        .iter()
        .find_map(|l| l.strip_prefix("# ").map(|t| t.trim().to_string()));

    let title = heading_title
        .or(front_matter_title)
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| {
            path.file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("Untitled")
                .to_string()
        });

    Chapter {
        title,
        path: path.to_path_buf(),
        lines: body.into_iter().map(str::to_string).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_title_from_heading() {
        let chapter = parse_chapter(
            Path::new("01-intro.md"),
            "# Chapter 1: Introduction\n\nRobots are machines.\n",
        );
        assert_eq!(chapter.title, "Chapter 1: Introduction");
        assert_eq!(chapter.lines.len(), 3);
    }

    #[test]
    fn test_front_matter_is_stripped_and_used_as_fallback_title() {
        let chapter = parse_chapter(
            Path::new("kinematics.md"),
            "---\nsidebar_position: 3\ntitle: \"Kinematics\"\n---\nJoint space and task space.\n",
        );
        assert_eq!(chapter.title, "Kinematics");
        assert_eq!(chapter.lines, vec!["Joint space and task space.".to_string()]);
    }

    #[test]
    fn test_file_stem_is_last_resort_title() {
        let chapter = parse_chapter(Path::new("docs/appendix-a.md"), "Plain text only.");
        assert_eq!(chapter.title, "appendix-a");
    }

    #[test]
    fn test_load_from_dir_sorts_and_recurses() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("02-locomotion.md"), "# Chapter 2: Robot Locomotion\n").unwrap();
        fs::write(dir.path().join("01-intro.md"), "# Chapter 1: Introduction\n").unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();
        fs::create_dir(dir.path().join("03-part")).unwrap();
        fs::write(
            dir.path().join("03-part").join("kinematics.mdx"),
            "# Chapter 3: Kinematics\n",
        )
        .unwrap();

        let book = Book::load_from_dir(dir.path()).unwrap();
        let titles: Vec<&str> = book.chapters().iter().map(|c| c.title.as_str()).collect();
        assert_eq!(
            titles,
            vec![
                "Chapter 1: Introduction",
                "Chapter 2: Robot Locomotion",
                "Chapter 3: Kinematics"
            ]
        );
    }

    #[test]
    fn test_empty_dir_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            Book::load_from_dir(dir.path()),
            Err(BookError::Empty(_))
        ));
    }

    #[test]
    fn test_missing_dir_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        assert!(matches!(
            Book::load_from_dir(&missing),
            Err(BookError::Io { .. })
        ));
    }

    #[test]
    fn test_find_chapter_prefers_exact_then_partial() {
        let book = Book::from_chapters(vec![
            parse_chapter(Path::new("a.md"), "# Chapter 2: Robot Locomotion"),
            parse_chapter(Path::new("b.md"), "# Locomotion"),
            parse_chapter(Path::new("c.md"), "# Chapter 3: Kinematics"),
        ]);

        assert_eq!(book.find_chapter("locomotion"), Some(1));
        assert_eq!(book.find_chapter("Chapter 3"), Some(2));
        assert_eq!(book.find_chapter("Chapter 3: Kinematics and Dynamics"), Some(2));
        assert_eq!(book.find_chapter("Perception"), None);
        assert_eq!(book.find_chapter("  "), None);
    }
}
