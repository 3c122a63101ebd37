//! Reader pane layout and text selection geometry
//!
//! Chapter text is wrapped here rather than by ratatui so that a screen cell
//! maps to exactly one character of the chapter, which mouse selection needs.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    Heading,
    Body,
    Code,
    Blank,
}

/// One display row of the reader
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReaderLine {
    pub text: String,
    pub kind: LineKind,
    /// The next row is a wrap of the same source line
    pub continues: bool,
}

/// Wrap text to fit within a given width, returning multiple lines
/// Uses word boundaries for wrapping (doesn't break mid-word)
pub fn wrap_text_to_width(text: &str, width: usize) -> Vec<String> {
    if width == 0 {
        return vec![text.to_string()];
    }

    let mut lines = Vec::new();
    let mut current_line = String::new();
    let mut current_len = 0;

    for word in text.split_whitespace() {
        let word_len = word.chars().count();

        if current_len == 0 {
            // First word on line
            current_line = word.to_string();
            current_len = word_len;
        } else if current_len + 1 + word_len <= width {
            current_line.push(' ');
            current_line.push_str(word);
            current_len += 1 + word_len;
        } else {
            lines.push(std::mem::take(&mut current_line));
            current_line = word.to_string();
            current_len = word_len;
        }
    }

    if !current_line.is_empty() {
        lines.push(current_line);
    }

    if lines.is_empty() {
        lines.push(String::new());
    }

    lines
}

/// Turn Markdown chapter lines into display rows for the given width
pub fn layout_chapter(source: &[String], width: usize) -> Vec<ReaderLine> {
    let mut rows = Vec::new();
    let mut in_code = false;

    for line in source {
        let trimmed = line.trim();

        if trimmed.starts_with("```") {
            in_code = !in_code;
            continue;
        }

        if in_code {
            rows.push(ReaderLine {
                text: line.replace('\t', "    "),
                kind: LineKind::Code,
                continues: false,
            });
            continue;
        }

        if trimmed.is_empty() {
            // Collapse runs of blank lines
            if rows.last().is_some_and(|r: &ReaderLine| r.kind != LineKind::Blank) {
                rows.push(ReaderLine {
                    text: String::new(),
                    kind: LineKind::Blank,
                    continues: false,
                });
            }
            continue;
        }

        let (kind, text) = match trimmed.strip_prefix('#') {
            Some(rest) => (LineKind::Heading, rest.trim_start_matches('#').trim()),
            None => (LineKind::Body, trimmed),
        };

        let wrapped = wrap_text_to_width(text, width);
        let count = wrapped.len();
        for (i, text) in wrapped.into_iter().enumerate() {
            rows.push(ReaderLine {
                text,
                kind,
                continues: i + 1 < count,
            });
        }
    }

    rows
}

/// Row count as a scroll offset, saturating for very long chapters
pub fn rows_u16(rows: usize) -> u16 {
    u16::try_from(rows).unwrap_or(u16::MAX)
}

/// Position in the reader: display row and character column
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct TextPoint {
    pub line: usize,
    pub col: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextSelection {
    pub anchor: TextPoint,
    pub focus: TextPoint,
}

impl TextSelection {
    pub fn at(point: TextPoint) -> Self {
        Self {
            anchor: point,
            focus: point,
        }
    }

    /// Whole rows `a..=b`, in either order
    pub fn lines(a: usize, b: usize) -> Self {
        Self {
            anchor: TextPoint {
                line: a.min(b),
                col: 0,
            },
            focus: TextPoint {
                line: a.max(b),
                col: usize::MAX,
            },
        }
    }

    pub fn normalized(&self) -> (TextPoint, TextPoint) {
        if self.anchor <= self.focus {
            (self.anchor, self.focus)
        } else {
            (self.focus, self.anchor)
        }
    }

    pub fn is_empty(&self) -> bool {
        self.anchor == self.focus
    }

    pub fn contains(&self, line: usize, col: usize) -> bool {
        let (start, end) = self.normalized();
        let point = TextPoint { line, col };
        point >= start && point < end
    }

    /// Selected text; wrapped rows rejoin with a space, source lines with a newline
    pub fn text(&self, rows: &[ReaderLine]) -> Option<String> {
        if self.is_empty() || rows.is_empty() {
            return None;
        }
        let (start, end) = self.normalized();
        let last = end.line.min(rows.len() - 1);

        let mut out = String::new();
        for idx in start.line..=last {
            let row = &rows[idx];
            let len = row.text.chars().count();
            let from = if idx == start.line { start.col.min(len) } else { 0 };
            let to = if idx == end.line { end.col.min(len) } else { len };
            if from < to {
                out.extend(row.text.chars().skip(from).take(to - from));
            }
            if idx != last {
                out.push(if row.continues { ' ' } else { '\n' });
            }
        }

        if out.trim().is_empty() {
            None
        } else {
            Some(out)
        }
    }
}
