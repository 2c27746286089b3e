use std::fmt;

use crate::scanner::matcher::{MatchOutcome, SearchType};
use crate::scanner::types::SearchOptions;

/// What part of a file a slot inspects
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Subject {
    Name,
    Path,
    Content,
}

/// How a pattern has to match its subject for the slot to count it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchMode {
    /// The whole subject equals the pattern
    Exact,
    /// Literal substring anywhere in the subject
    Contains,
    /// Regex hit anywhere in the subject
    Regex,
}

impl MatchMode {
    pub fn is_satisfied(self, outcome: &MatchOutcome) -> bool {
        match self {
            MatchMode::Exact => outcome.exact,
            MatchMode::Contains | MatchMode::Regex => outcome.matched,
        }
    }
}

/// One criterion of [`SearchOptions`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    Name,
    NameContains,
    NameRegex,
    Path,
    PathContains,
    PathRegex,
    Content,
    ContentRegex,
    SopsKey,
    ExcludeName,
    ExcludeNameContains,
    ExcludePath,
    ExcludePathContains,
    ExcludeContent,
}

impl Slot {
    /// Evaluation order of the exclusion rules
    pub const EXCLUSIONS: &'static [Slot] = &[
        Slot::ExcludeName,
        Slot::ExcludeNameContains,
        Slot::ExcludePath,
        Slot::ExcludePathContains,
        Slot::ExcludeContent,
    ];

    /// Evaluation order of the inclusion rules. The SOPS key rule runs
    /// separately against ciphertext.
    pub const INCLUSIONS: &'static [Slot] = &[
        Slot::Name,
        Slot::NameContains,
        Slot::NameRegex,
        Slot::Path,
        Slot::PathContains,
        Slot::PathRegex,
        Slot::Content,
        Slot::ContentRegex,
    ];

    pub fn patterns(self, options: &SearchOptions) -> &[String] {
        match self {
            Slot::Name => &options.name,
            Slot::NameContains => &options.name_contains,
            Slot::NameRegex => &options.name_regex,
            Slot::Path => &options.path,
            Slot::PathContains => &options.path_contains,
            Slot::PathRegex => &options.path_regex,
            Slot::Content => &options.content,
            Slot::ContentRegex => &options.content_regex,
            Slot::SopsKey => &options.sops_key,
            Slot::ExcludeName => &options.exclude_name,
            Slot::ExcludeNameContains => &options.exclude_name_contains,
            Slot::ExcludePath => &options.exclude_path,
            Slot::ExcludePathContains => &options.exclude_path_contains,
            Slot::ExcludeContent => &options.exclude_content,
        }
    }

    pub fn subject(self) -> Subject {
        match self {
            Slot::Name | Slot::NameContains | Slot::NameRegex => Subject::Name,
            Slot::ExcludeName | Slot::ExcludeNameContains => Subject::Name,
            Slot::Path | Slot::PathContains | Slot::PathRegex => Subject::Path,
            Slot::ExcludePath | Slot::ExcludePathContains => Subject::Path,
            Slot::Content | Slot::ContentRegex | Slot::SopsKey | Slot::ExcludeContent => {
                Subject::Content
            }
        }
    }

    pub fn mode(self) -> MatchMode {
        match self {
            Slot::Name | Slot::Path | Slot::ExcludeName | Slot::ExcludePath => MatchMode::Exact,
            Slot::NameRegex | Slot::PathRegex | Slot::ContentRegex => MatchMode::Regex,
            Slot::NameContains
            | Slot::PathContains
            | Slot::Content
            | Slot::SopsKey
            | Slot::ExcludeNameContains
            | Slot::ExcludePathContains
            | Slot::ExcludeContent => MatchMode::Contains,
        }
    }

    pub fn search_type(self) -> SearchType {
        match self.mode() {
            MatchMode::Regex => SearchType::Regex,
            MatchMode::Exact | MatchMode::Contains => SearchType::Text,
        }
    }

    pub fn is_exclusion(self) -> bool {
        Self::EXCLUSIONS.contains(&self)
    }

    /// Command-line flag that fills this slot
    pub fn flag(self) -> &'static str {
        match self {
            Slot::Name => "--name",
            Slot::NameContains => "--name-contains",
            Slot::NameRegex => "--name-regex",
            Slot::Path => "--path",
            Slot::PathContains => "--path-contains",
            Slot::PathRegex => "--path-regex",
            Slot::Content => "--content",
            Slot::ContentRegex => "--content-regex",
            Slot::SopsKey => "--sops-key",
            Slot::ExcludeName => "--exclude-name",
            Slot::ExcludeNameContains => "--exclude-name-contains",
            Slot::ExcludePath => "--exclude-path",
            Slot::ExcludePathContains => "--exclude-path-contains",
            Slot::ExcludeContent => "--exclude-content",
        }
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.flag())
    }
}
