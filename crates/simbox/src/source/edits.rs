use std::ops::Range;

/// Pending replacements over byte ranges of one source text.
#[derive(Debug, Default)]
pub struct SourceEdits {
    edits: Vec<(Range<usize>, String)>,
}

impl SourceEdits {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.edits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edits.is_empty()
    }

    pub fn replace(&mut self, range: Range<usize>, replacement: impl Into<String>) {
        self.edits.push((range, replacement.into()));
    }

    /// Removes `range`, keeping its line breaks so line numbers survive.
    pub fn remove(&mut self, range: Range<usize>, source: &str) {
        let line_breaks = source[range.clone()].matches('\n').count();
        self.edits.push((range, "\n".repeat(line_breaks)));
    }

    pub fn overlaps(&self, range: &Range<usize>) -> bool {
        self.edits
            .iter()
            .any(|(edit, _)| edit.start < range.end && range.start < edit.end)
    }

    /// Applies the edits in source order; an edit overlapping an earlier one is skipped.
    pub fn apply(mut self, source: &str) -> String {
        self.edits.sort_by_key(|(range, _)| (range.start, range.end));
        let mut output = String::with_capacity(source.len());
        let mut cursor = 0;
        for (range, replacement) in self.edits {
            if range.start < cursor {
                continue;
            }
            output.push_str(&source[cursor..range.start]);
            output.push_str(&replacement);
            cursor = range.end;
        }
        output.push_str(&source[cursor..]);
        output
    }
}
