//! Search predicate over file metadata, content and SOPS keys
//!
//! Every criterion of [`SearchOptions`] is a [`Slot`]: a pattern list tied to
//! one subject (name, path or content) and one match mode. Exclusion slots
//! reject as soon as any of their patterns matches; inclusion slots require
//! every pattern to match. Empty slots are not applied.

mod slot;

pub use slot::{MatchMode, Slot, Subject};

use std::sync::Arc;

use crate::scanner::matcher::{MatchResult, TextMatcher};
use crate::scanner::types::{File, FileType, SearchOptions};

/// Accept/reject decision plus the evidence gathered while reaching it.
///
/// On reject the evidence covers the rules evaluated up to and including the
/// rejecting one; traversal engines drop it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterOutcome {
    pub accepted: bool,
    pub evidence: Vec<MatchResult>,
}

impl FilterOutcome {
    fn accept(evidence: Vec<MatchResult>) -> Self {
        Self {
            accepted: true,
            evidence,
        }
    }

    fn reject(evidence: Vec<MatchResult>) -> Self {
        Self {
            accepted: false,
            evidence,
        }
    }
}

/// Stateless predicate evaluator
#[derive(Debug, Clone)]
pub struct SearchFilter {
    matcher: Arc<TextMatcher>,
    context_width: usize,
}

impl SearchFilter {
    pub fn new(matcher: Arc<TextMatcher>, context_width: usize) -> Self {
        Self {
            matcher,
            context_width,
        }
    }

    /// Full evaluation: SOPS-only gate, then every exclusion, then every inclusion.
    pub fn evaluate(&self, file: &File, content: &str, options: &SearchOptions) -> FilterOutcome {
        if options.sops_only && file.file_type != FileType::Secret {
            return FilterOutcome::reject(Vec::new());
        }
        self.apply(Slot::EXCLUSIONS.iter().chain(Slot::INCLUSIONS.iter()), file, content, options)
    }

    /// Name and path rules only. A reject here is final, so callers use it to
    /// skip reading content.
    pub fn evaluate_metadata(&self, file: &File, options: &SearchOptions) -> FilterOutcome {
        let slots = Slot::EXCLUSIONS
            .iter()
            .chain(Slot::INCLUSIONS.iter())
            .filter(|slot| slot.subject() != Subject::Content);
        self.apply(slots, file, "", options)
    }

    /// SOPS key rule against the still-encrypted content
    pub fn evaluate_secret_key(&self, content: &str, options: &SearchOptions) -> FilterOutcome {
        let mut evidence = Vec::new();
        if self.check_inclusion(Slot::SopsKey, content, options, &mut evidence) {
            FilterOutcome::accept(evidence)
        } else {
            FilterOutcome::reject(evidence)
        }
    }

    fn apply<'s>(
        &self,
        slots: impl Iterator<Item = &'s Slot>,
        file: &File,
        content: &str,
        options: &SearchOptions,
    ) -> FilterOutcome {
        let mut evidence = Vec::new();

        for &slot in slots {
            let subject = match slot.subject() {
                Subject::Name => file.name.as_str(),
                Subject::Path => file.path.as_str(),
                Subject::Content => content,
            };
            let passed = if slot.is_exclusion() {
                self.check_exclusion(slot, subject, options, &mut evidence)
            } else {
                self.check_inclusion(slot, subject, options, &mut evidence)
            };
            if !passed {
                tracing::trace!("{} rejected by {}", file.location().display(), slot);
                return FilterOutcome::reject(evidence);
            }
        }

        FilterOutcome::accept(evidence)
    }

    /// Passes unless any pattern matches
    fn check_exclusion(
        &self,
        slot: Slot,
        subject: &str,
        options: &SearchOptions,
        evidence: &mut Vec<MatchResult>,
    ) -> bool {
        for pattern in slot.patterns(options) {
            let outcome = self
                .matcher
                .match_text(subject, pattern, slot.search_type(), self.context_width);
            if slot.mode().is_satisfied(&outcome) {
                evidence.extend(outcome.results);
                return false;
            }
        }
        true
    }

    /// Passes only if every pattern matches
    fn check_inclusion(
        &self,
        slot: Slot,
        subject: &str,
        options: &SearchOptions,
        evidence: &mut Vec<MatchResult>,
    ) -> bool {
        for pattern in slot.patterns(options) {
            let outcome = self
                .matcher
                .match_text(subject, pattern, slot.search_type(), self.context_width);
            let satisfied = slot.mode().is_satisfied(&outcome);
            evidence.extend(outcome.results);
            if !satisfied {
                return false;
            }
        }
        true
    }
}
