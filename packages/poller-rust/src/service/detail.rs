//! Text rendering of a change-set for the detail pane.
//!
//! Layout: created documents (every line emphasized), modified documents
//! (only lines that differ from the previous version emphasized), a
//! separator of 80 `=`, then unchanged documents.

use std::fmt;

use docwatch_core::{ChangeSet, Document, Value};

const INDENT: &str = "    ";

/// One rendered line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetailLine {
    /// Line text without a trailing newline.
    pub text: String,
    /// Whether the line is new or changed.
    pub emphasized: bool,
}

/// Rendered detail pane.
///
/// `Display` prefixes emphasized lines with `* ` and others with two spaces.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Detail {
    /// Lines in display order.
    pub lines: Vec<DetailLine>,
}

impl Detail {
    fn push_all(&mut self, lines: Vec<String>, emphasized: bool) {
        self.lines.extend(
            lines
                .into_iter()
                .map(|text| DetailLine { text, emphasized }),
        );
    }

    /// Number of emphasized lines.
    #[must_use]
    pub fn emphasized_count(&self) -> usize {
        self.lines.iter().filter(|l| l.emphasized).count()
    }
}

impl fmt::Display for Detail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for line in &self.lines {
            let marker = if line.emphasized { "* " } else { "  " };
            writeln!(f, "{marker}{}", line.text)?;
        }
        Ok(())
    }
}

/// Renders documents as indented `"key": "value",` blocks.
#[must_use]
pub fn render_documents<'a, I>(documents: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a Document>,
{
    let mut lines = Vec::new();
    for doc in documents {
        render_block(doc, 1, "{".to_string(), &mut lines);
    }
    lines
}

fn render_block(doc: &Document, depth: usize, opener: String, lines: &mut Vec<String>) {
    lines.push(opener);
    let indent = INDENT.repeat(depth);
    for (key, value) in doc {
        match value {
            Value::Document(nested) => {
                render_block(nested, depth + 1, format!("{indent}\"{key}\": {{"), lines);
            }
            scalar => lines.push(format!("{indent}\"{key}\": \"{scalar}\",")),
        }
    }
    lines.push(format!("{}}}", INDENT.repeat(depth - 1)));
}

/// Renders a change-set for the detail pane.
#[must_use]
pub fn render_detail(changes: &ChangeSet) -> Detail {
    let mut detail = Detail::default();
    detail.push_all(
        render_documents(changes.created.iter().map(|d| &**d)),
        true,
    );
    for modification in &changes.modified {
        let previous = render_documents([&*modification.previous]);
        for text in render_documents([&*modification.current]) {
            let emphasized = !previous.contains(&text);
            detail.lines.push(DetailLine { text, emphasized });
        }
    }
    detail.push_all(vec!["=".repeat(80)], false);
    detail.push_all(
        render_documents(changes.unchanged.iter().map(|d| &**d)),
        false,
    );
    detail
}
