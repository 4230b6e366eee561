//! Language Detection Module
//!
//! Maps source files to a [`Language`] and a language to the tags a model
//! may put on a fenced block. Also owns the line counting used for metrics.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use debloater::analyzer::{Language, count_lines};
//!
//! let lang = Language::from_path("src/main.rs");
//! assert_eq!(lang.fence_tag(), "rust");
//! assert!(lang.matches_fence_tag("RS"));
//! assert_eq!(count_lines("a\nb\n"), 2);
//! ```

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// =============================================================================
// Language Metadata Table
// =============================================================================

struct LanguageMeta {
    /// Display name (human-readable)
    display_name: &'static str,
    /// Canonical tag written after an opening fence
    fence_tag: &'static str,
    /// File extensions that map to this language
    extensions: &'static [&'static str],
    /// Other tags models use for this language (matched case-insensitively)
    aliases: &'static [&'static str],
}

macro_rules! lang_meta {
    ($display:literal, $tag:literal, [$($ext:literal),*], [$($alias:literal),*]) => {
        LanguageMeta {
            display_name: $display,
            fence_tag: $tag,
            extensions: &[$($ext),*],
            aliases: &[$($alias),*],
        }
    };
}

impl Language {
    fn meta(&self) -> LanguageMeta {
        match self {
            // Systems Languages
            Language::Rust => lang_meta!("Rust", "rust", ["rs"], ["rust", "rs"]),
            Language::Go => lang_meta!("Go", "go", ["go"], ["go", "golang"]),
            Language::C => lang_meta!("C", "c", ["c", "h"], ["c", "h"]),
            Language::Cpp => lang_meta!("C++", "cpp", ["cpp", "cc", "cxx", "hpp", "hh", "hxx"], ["cpp", "c++", "cxx", "cc", "hpp"]),
            Language::Zig => lang_meta!("Zig", "zig", ["zig"], ["zig"]),

            // JVM Languages
            Language::Java => lang_meta!("Java", "java", ["java"], ["java"]),
            Language::Kotlin => lang_meta!("Kotlin", "kotlin", ["kt", "kts"], ["kotlin", "kt"]),
            Language::Scala => lang_meta!("Scala", "scala", ["scala", "sc"], ["scala"]),

            // Web Languages
            Language::TypeScript => lang_meta!("TypeScript", "typescript", ["ts", "mts", "cts"], ["typescript", "ts"]),
            Language::JavaScript => lang_meta!("JavaScript", "javascript", ["js", "mjs", "cjs"], ["javascript", "js", "node"]),
            Language::Tsx => lang_meta!("TSX", "tsx", ["tsx"], ["tsx"]),
            Language::Jsx => lang_meta!("JSX", "jsx", ["jsx"], ["jsx"]),

            // Scripting Languages
            Language::Python => lang_meta!("Python", "python", ["py", "pyi", "pyw"], ["python", "py", "python3", "py3"]),
            Language::Ruby => lang_meta!("Ruby", "ruby", ["rb", "rake"], ["ruby", "rb"]),
            Language::Php => lang_meta!("PHP", "php", ["php"], ["php"]),
            Language::Perl => lang_meta!("Perl", "perl", ["pl", "pm"], ["perl", "pl"]),
            Language::Lua => lang_meta!("Lua", "lua", ["lua"], ["lua"]),
            Language::R => lang_meta!("R", "r", ["r"], ["r"]),
            Language::Bash => lang_meta!("Bash", "bash", ["sh", "bash", "zsh"], ["bash", "sh", "shell", "zsh"]),

            // Mobile / .NET
            Language::Swift => lang_meta!("Swift", "swift", ["swift"], ["swift"]),
            Language::ObjectiveC => lang_meta!("Objective-C", "objectivec", ["m", "mm"], ["objectivec", "objc", "objective-c"]),
            Language::Dart => lang_meta!("Dart", "dart", ["dart"], ["dart"]),
            Language::CSharp => lang_meta!("C#", "csharp", ["cs"], ["csharp", "c#", "cs"]),

            // Functional
            Language::Elixir => lang_meta!("Elixir", "elixir", ["ex", "exs"], ["elixir", "ex"]),
            Language::Haskell => lang_meta!("Haskell", "haskell", ["hs"], ["haskell", "hs"]),

            Language::Sql => lang_meta!("SQL", "sql", ["sql"], ["sql"]),

            Language::Unknown => lang_meta!("Unknown", "text", [], []),
        }
    }
}

// =============================================================================
// Language Enum Definition
// =============================================================================

/// Source languages recognized by extension and fence tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Language {
    Rust,
    Go,
    C,
    Cpp,
    Zig,
    Java,
    Kotlin,
    Scala,
    TypeScript,
    JavaScript,
    Tsx,
    Jsx,
    Python,
    Ruby,
    Php,
    Perl,
    Lua,
    R,
    Bash,
    Swift,
    ObjectiveC,
    Dart,
    CSharp,
    Elixir,
    Haskell,
    Sql,
    #[default]
    Unknown,
}

impl Language {
    /// Display name (human-readable)
    pub fn as_str(&self) -> &'static str {
        self.meta().display_name
    }

    /// Tag written after the opening fence when sending code to a model
    pub fn fence_tag(&self) -> &'static str {
        self.meta().fence_tag
    }

    /// Check whether a fence info string names this language
    ///
    /// Only the first word of the info string is considered, so
    /// `python title="x.py"` still matches Python. `Unknown` matches nothing.
    pub fn matches_fence_tag(&self, info: &str) -> bool {
        if !self.is_known() {
            return false;
        }
        let Some(word) = info.split_whitespace().next() else {
            return false;
        };
        let word = word.to_lowercase();
        let meta = self.meta();
        meta.fence_tag == word || meta.aliases.iter().any(|a| *a == word)
    }

    /// Detect language from file extension
    pub fn from_extension(ext: &str) -> Self {
        let ext_lower = ext.to_lowercase();
        Self::all_variants()
            .iter()
            .copied()
            .find(|lang| lang.meta().extensions.iter().any(|e| *e == ext_lower))
            .unwrap_or(Language::Unknown)
    }

    /// Detect language from file path
    pub fn from_path<P: AsRef<Path>>(path: P) -> Self {
        path.as_ref()
            .extension()
            .and_then(|e| e.to_str())
            .map(Self::from_extension)
            .unwrap_or(Language::Unknown)
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, Language::Unknown)
    }

    /// Language the code is presented as in a prompt; unrecognized sources
    /// are sent as Python
    pub fn prompt_language(self) -> Language {
        if self.is_known() { self } else { Language::Python }
    }

    fn all_variants() -> &'static [Language] {
        &[
            Language::Rust, Language::Go, Language::C, Language::Cpp,
            Language::Zig, Language::Java, Language::Kotlin, Language::Scala,
            Language::TypeScript, Language::JavaScript, Language::Tsx,
            Language::Jsx, Language::Python, Language::Ruby, Language::Php,
            Language::Perl, Language::Lua, Language::R, Language::Bash,
            Language::Swift, Language::ObjectiveC, Language::Dart,
            Language::CSharp, Language::Elixir, Language::Haskell, Language::Sql,
        ]
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Language {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() || s.eq_ignore_ascii_case("unknown") || s.eq_ignore_ascii_case("text") {
            return Ok(Language::Unknown);
        }
        Self::all_variants()
            .iter()
            .copied()
            .find(|lang| lang.matches_fence_tag(s))
            .ok_or(())
    }
}

// =============================================================================
// Line Counting
// =============================================================================

/// Count lines of code, blanks and comments included
///
/// A trailing newline does not open an extra line; empty text has zero lines.
pub fn count_lines(code: &str) -> usize {
    code.lines().count()
}
