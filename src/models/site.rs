use serde::{Deserialize, Serialize};

/// 0-based line and character offset (in chars) within a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Position {
    pub line: u32,
    pub character: u32,
}

impl Position {
    pub fn new(line: u32, character: u32) -> Self {
        Self { line, character }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Range {
    pub start: Position,
    pub end: Position,
}

impl Range {
    pub fn new(start: Position, end: Position) -> Self {
        Self { start, end }
    }

    /// A whole-line range anchored at column 0 of `line`.
    pub fn line(line: u32) -> Self {
        Self::lines(line, line)
    }

    /// A range covering `start..=end`, both 0-based.
    pub fn lines(start: u32, end: u32) -> Self {
        Self {
            start: Position::new(start, 0),
            end: Position::new(end.max(start), 0),
        }
    }

    pub fn contains_line(&self, line: u32) -> bool {
        self.start.line <= line && line <= self.end.line
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SiteKind {
    Suite,
    Test,
}

/// A statically detected test declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestSite {
    pub name: String,
    pub kind: SiteKind,
    /// 0-based line of the declaration.
    pub line: u32,
    pub range: Range,
}
