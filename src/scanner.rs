//! Lexical detection of test declarations.
//!
//! Each supported language has an ordered list of patterns. Every pattern is
//! run over the whole document; when two patterns match at the same offset
//! the earlier one wins. No parsing is attempted, so unusual test styles are
//! simply missed.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::{Captures, Regex};
use tracing::debug;

use crate::models::{Position, Range, SiteKind, TestSite};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Language {
    JavaScript,
    Python,
    Rust,
    Go,
}

impl Language {
    /// Map an editor language identifier to a scanner family.
    pub fn from_id(id: &str) -> Option<Self> {
        match id.to_ascii_lowercase().as_str() {
            "javascript" | "typescript" | "javascriptreact" | "typescriptreact" | "js" | "ts"
            | "jsx" | "tsx" | "mjs" | "cjs" => Some(Language::JavaScript),
            "python" | "py" => Some(Language::Python),
            "rust" | "rs" => Some(Language::Rust),
            "go" => Some(Language::Go),
            _ => None,
        }
    }

    fn patterns(&self) -> &'static [SitePattern] {
        match self {
            Language::JavaScript => &JS_PATTERNS,
            Language::Python => &PYTHON_PATTERNS,
            Language::Rust => &RUST_PATTERNS,
            Language::Go => &GO_PATTERNS,
        }
    }
}

struct SitePattern {
    regex: Regex,
    extract: fn(&Captures<'_>) -> Option<(SiteKind, String)>,
}

impl SitePattern {
    fn new(pattern: &str, extract: fn(&Captures<'_>) -> Option<(SiteKind, String)>) -> Self {
        Self {
            regex: Regex::new(pattern).expect("scanner pattern must compile"),
            extract,
        }
    }
}

fn test_named(caps: &Captures<'_>) -> Option<(SiteKind, String)> {
    caps.get(1).map(|m| (SiteKind::Test, m.as_str().to_string()))
}

fn suite_named(caps: &Captures<'_>) -> Option<(SiteKind, String)> {
    caps.get(1).map(|m| (SiteKind::Suite, m.as_str().to_string()))
}

static JS_PATTERNS: LazyLock<Vec<SitePattern>> = LazyLock::new(|| {
    vec![SitePattern::new(
        r#"\b(describe|suite|test|it)(?:\.(?:only|skip|todo|concurrent))*\s*\(\s*(?:'([^'\n]*)'|"([^"\n]*)"|`([^`]*)`)"#,
        |caps| {
            let kind = match caps.get(1)?.as_str() {
                "describe" | "suite" => SiteKind::Suite,
                _ => SiteKind::Test,
            };
            let name = caps.get(2).or(caps.get(3)).or(caps.get(4))?;
            Some((kind, name.as_str().to_string()))
        },
    )]
});

static PYTHON_PATTERNS: LazyLock<Vec<SitePattern>> = LazyLock::new(|| {
    vec![
        SitePattern::new(
            r"(?m)^[ \t]*(?:async[ \t]+)?def[ \t]+(test_\w*)[ \t]*\(",
            test_named,
        ),
        SitePattern::new(r"(?m)^[ \t]*class[ \t]+(Test\w*)", suite_named),
    ]
});

static RUST_PATTERNS: LazyLock<Vec<SitePattern>> = LazyLock::new(|| {
    vec![
        SitePattern::new(
            r"#\[(?:[\w:]+::)?test\b[^\]]*\]\s*(?:#\[[^\]]*\]\s*)*(?:pub(?:\([^)]*\))?\s+)?(?:async\s+)?fn\s+(\w+)",
            test_named,
        ),
        SitePattern::new(r"(?m)^[ \t]*(?:pub[ \t]+)?mod[ \t]+(tests?)\b", suite_named),
    ]
});

static GO_PATTERNS: LazyLock<Vec<SitePattern>> = LazyLock::new(|| {
    vec![SitePattern::new(r"(?m)^func[ \t]+(Test\w*)[ \t]*\(", test_named)]
});

/// Find candidate test sites in `text`. Unknown languages yield nothing.
pub fn scan(text: &str, language: &str) -> Vec<TestSite> {
    let Some(lang) = Language::from_id(language) else {
        debug!(language, "no test patterns for language");
        return Vec::new();
    };
    scan_language(text, lang)
}

pub fn scan_language(text: &str, language: Language) -> Vec<TestSite> {
    let index = LineIndex::new(text);
    // Keyed by match start so the first pattern to claim an offset wins.
    let mut found: BTreeMap<usize, TestSite> = BTreeMap::new();

    for pattern in language.patterns() {
        for caps in pattern.regex.captures_iter(text) {
            let Some(whole) = caps.get(0) else { continue };
            if found.contains_key(&whole.start()) {
                continue;
            }
            let Some((kind, name)) = (pattern.extract)(&caps) else {
                continue;
            };
            let name = name.trim().to_string();
            if name.is_empty() {
                debug!(offset = whole.start(), "skipping test site with empty name");
                continue;
            }
            let start = index.position(text, whole.start());
            let end = index.position(text, whole.end());
            found.insert(
                whole.start(),
                TestSite {
                    name,
                    kind,
                    line: start.line,
                    range: Range::new(start, end),
                },
            );
        }
    }

    debug!(?language, sites = found.len(), "scanned document");
    found.into_values().collect()
}

/// Byte offsets of line starts, for offset to position conversion.
struct LineIndex {
    starts: Vec<usize>,
}

impl LineIndex {
    fn new(text: &str) -> Self {
        let mut starts = vec![0];
        starts.extend(text.match_indices('\n').map(|(i, _)| i + 1));
        Self { starts }
    }

    fn position(&self, text: &str, offset: usize) -> Position {
        let line = match self.starts.binary_search(&offset) {
            Ok(line) => line,
            Err(next) => next - 1,
        };
        let line_start = self.starts[line];
        let character = text[line_start..offset].chars().count();
        Position::new(line as u32, character as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn names_and_lines(sites: &[TestSite]) -> Vec<(String, u32)> {
        sites.iter().map(|s| (s.name.clone(), s.line)).collect()
    }

    const TS_SOURCE: &str = r#"import { total } from './cart';

describe('cart', () => {
  it("computesTotal", () => {
    expect(total([])).toBe(0);
  });

  test.skip(`handles discounts`, async () => {});
  it.only('applies tax', () => {});
});
"#;

    #[test]
    fn finds_javascript_suites_and_tests() {
        let sites = scan(TS_SOURCE, "typescript");
        assert_eq!(
            names_and_lines(&sites),
            vec![
                ("cart".to_string(), 2),
                ("computesTotal".to_string(), 3),
                ("handles discounts".to_string(), 7),
                ("applies tax".to_string(), 8),
            ]
        );
        assert_eq!(sites[0].kind, SiteKind::Suite);
        assert_eq!(sites[1].kind, SiteKind::Test);
        assert_eq!(sites[1].range.start, Position::new(3, 2));
    }

    #[test]
    fn ignores_identifiers_ending_in_it() {
        let sites = scan("submit('form');\nawait commit(\"x\");\n", "javascript");
        assert!(sites.is_empty());
    }

    #[test]
    fn finds_python_tests_and_classes() {
        let src = "import pytest\n\nclass TestCart:\n    def test_total(self):\n        pass\n\n    async def test_async_total(self):\n        pass\n\ndef helper():\n    pass\n";
        let sites = scan(src, "python");
        assert_eq!(
            names_and_lines(&sites),
            vec![
                ("TestCart".to_string(), 2),
                ("test_total".to_string(), 3),
                ("test_async_total".to_string(), 6),
            ]
        );
    }

    #[test]
    fn finds_rust_tests_across_attribute_lines() {
        let src = "#[cfg(test)]\nmod tests {\n    #[test]\n    fn adds() {}\n\n    #[tokio::test(start_paused = true)]\n    async fn waits() {}\n}\n";
        let sites = scan(src, "rust");
        assert_eq!(
            names_and_lines(&sites),
            vec![
                ("tests".to_string(), 1),
                ("adds".to_string(), 2),
                ("waits".to_string(), 5),
            ]
        );
    }

    #[test]
    fn finds_go_tests() {
        let src = "package cart\n\nfunc TestTotal(t *testing.T) {}\nfunc helper() {}\n";
        assert_eq!(
            names_and_lines(&scan(src, "go")),
            vec![("TestTotal".to_string(), 2)]
        );
    }

    #[test]
    fn unknown_language_yields_nothing() {
        assert!(scan(TS_SOURCE, "cobol").is_empty());
    }

    #[test]
    fn empty_names_are_skipped() {
        assert!(scan("it('', () => {})", "javascript").is_empty());
    }

    #[test]
    fn rescanning_unchanged_text_is_stable() {
        let first = scan(TS_SOURCE, "typescript");
        let second = scan(TS_SOURCE, "typescript");
        assert_eq!(names_and_lines(&first), names_and_lines(&second));
    }

    #[test]
    fn columns_count_characters_not_bytes() {
        let sites = scan("/* ü */ it('x', () => {})", "javascript");
        assert_eq!(sites[0].range.start, Position::new(0, 8));
    }
}
