//! Line/column translation for diagnostics.
//!
//! The scanner and parser work in byte offsets; diagnostics are reported in
//! 1-based line/column pairs. `LineMap` records the byte offset of every line
//! start so translation is a binary search.

use serde::Serialize;

/// A 1-based line/column pair.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct LineCol {
    pub line: u32,
    pub col: u32,
}

/// Maps byte offsets to line/column positions.
#[derive(Clone, Debug)]
pub struct LineMap {
    /// Byte offset of the start of each line. `line_starts[0] == 0`.
    line_starts: Vec<u32>,
}

impl LineMap {
    pub fn new(source: &str) -> Self {
        let mut line_starts = vec![0u32];
        for (i, b) in source.bytes().enumerate() {
            if b == b'\n' {
                line_starts.push(i as u32 + 1);
            }
        }
        LineMap { line_starts }
    }

    /// The 1-based line containing `offset`.
    pub fn line(&self, offset: u32) -> u32 {
        match self.line_starts.binary_search(&offset) {
            Ok(idx) => idx as u32 + 1,
            Err(idx) => idx as u32,
        }
    }

    /// The 1-based line/column of `offset`.
    ///
    /// Column counts bytes from the line start; multi-byte characters count
    /// their byte width, matching how the scanner reports offsets.
    pub fn line_col(&self, offset: u32) -> LineCol {
        let line = self.line(offset);
        let line_start = self.line_starts[line as usize - 1];
        LineCol {
            line,
            col: offset - line_start + 1,
        }
    }

    pub fn line_count(&self) -> u32 {
        self.line_starts.len() as u32
    }

    /// The byte offset at which the given 1-based line starts.
    pub fn line_start(&self, line: u32) -> u32 {
        let idx = (line.saturating_sub(1) as usize).min(self.line_starts.len() - 1);
        self.line_starts[idx]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_line() {
        let map = LineMap::new("let x = 1;");
        assert_eq!(map.line_col(0), LineCol { line: 1, col: 1 });
        assert_eq!(map.line_col(4), LineCol { line: 1, col: 5 });
    }

    #[test]
    fn multi_line() {
        let map = LineMap::new("a\nbb\nccc\n");
        assert_eq!(map.line(0), 1);
        assert_eq!(map.line(2), 2);
        assert_eq!(map.line_col(5), LineCol { line: 3, col: 1 });
        assert_eq!(map.line_col(7), LineCol { line: 3, col: 3 });
    }

    #[test]
    fn offset_at_line_start() {
        let map = LineMap::new("x\ny");
        assert_eq!(map.line_col(2), LineCol { line: 2, col: 1 });
    }
}
