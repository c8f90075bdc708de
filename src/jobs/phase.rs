//! Workflow phases and the rules for moving between them.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::record::DownloadMode;
use crate::scraping::automation::{CourtCandidates, DocketEntry};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    Initializing,
    LoggingIn,
    Searching,
    AwaitingCourtSelection,
    ProcessingResults,
    NavigatingToDocument,
    ExtractingEntries,
    AwaitingTranscriptSelection,
    Downloading,
    ReturningToResults,
    Completed,
    Error,
    Cancelled,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::Initializing => "initializing",
            Phase::LoggingIn => "logging_in",
            Phase::Searching => "searching",
            Phase::AwaitingCourtSelection => "awaiting_court_selection",
            Phase::ProcessingResults => "processing_results",
            Phase::NavigatingToDocument => "navigating_to_document",
            Phase::ExtractingEntries => "extracting_entries",
            Phase::AwaitingTranscriptSelection => "awaiting_transcript_selection",
            Phase::Downloading => "downloading",
            Phase::ReturningToResults => "returning_to_results",
            Phase::Completed => "completed",
            Phase::Error => "error",
            Phase::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Completed | Phase::Error | Phase::Cancelled)
    }

    /// Phases in which the job is suspended on an operator decision.
    pub fn is_checkpoint(&self) -> bool {
        matches!(
            self,
            Phase::AwaitingCourtSelection | Phase::AwaitingTranscriptSelection
        )
    }

    /// Transition table. ERROR and CANCELLED are reachable from every
    /// non-terminal phase; terminal phases have no successors.
    pub fn can_transition_to(&self, next: Phase) -> bool {
        use Phase::*;

        if self.is_terminal() {
            return false;
        }
        if matches!(next, Error | Cancelled) {
            return true;
        }
        matches!(
            (self, next),
            (Idle, Initializing)
                | (Initializing, LoggingIn)
                | (LoggingIn, Searching)
                | (Searching, AwaitingCourtSelection)
                | (Searching, ProcessingResults)
                | (AwaitingCourtSelection, ProcessingResults)
                | (ProcessingResults, NavigatingToDocument)
                | (ProcessingResults, Completed)
                | (NavigatingToDocument, ExtractingEntries)
                | (ExtractingEntries, AwaitingTranscriptSelection)
                | (ExtractingEntries, Downloading)
                | (ExtractingEntries, ReturningToResults)
                | (AwaitingTranscriptSelection, Downloading)
                | (AwaitingTranscriptSelection, ReturningToResults)
                | (Downloading, ReturningToResults)
                | (ReturningToResults, NavigatingToDocument)
                | (ReturningToResults, Completed)
        )
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How much the operator is involved at the two checkpoints.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScrapingMode {
    #[default]
    FullyInteractive,
    SemiAutomated,
    FullyAutomated,
}

impl ScrapingMode {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().replace('-', "_").as_str() {
            "FULLY_INTERACTIVE" | "INTERACTIVE" => Some(Self::FullyInteractive),
            "SEMI_AUTOMATED" | "SEMI" => Some(Self::SemiAutomated),
            "FULLY_AUTOMATED" | "AUTOMATED" => Some(Self::FullyAutomated),
            _ => None,
        }
    }
}

/// What to do after the operator says the court was picked in the browser.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CourtSkipTrust {
    /// Proceed with whatever the page currently holds.
    #[default]
    Trust,
    /// Read the court back from the page and require it to be a candidate.
    Verify,
}

impl CourtSkipTrust {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "trust" => Some(Self::Trust),
            "verify" => Some(Self::Verify),
            _ => None,
        }
    }
}

/// Outcome of the court checkpoint policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CourtResolution {
    Prompt,
    Auto(String),
    /// FULLY_AUTOMATED with nothing it may pick on its own.
    NoDefault,
}

/// Outcome of the entry checkpoint policy. Indices refer to the entry list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryResolution {
    Prompt,
    Auto(Vec<usize>),
}

#[derive(Debug, Clone)]
pub struct CheckpointPolicy {
    pub mode: ScrapingMode,
    pub court_skip_trust: CourtSkipTrust,
    /// `None` waits for the operator indefinitely.
    pub interaction_timeout: Option<Duration>,
}

impl Default for CheckpointPolicy {
    fn default() -> Self {
        Self {
            mode: ScrapingMode::FullyInteractive,
            court_skip_trust: CourtSkipTrust::Trust,
            interaction_timeout: Some(Duration::from_secs(300)),
        }
    }
}

impl CheckpointPolicy {
    /// Callers must not ask about an empty candidate list.
    pub fn resolve_court(&self, candidates: &CourtCandidates) -> CourtResolution {
        let unambiguous = match candidates.exact_matches.as_slice() {
            [only] => Some(only.clone()),
            [] if candidates.options.len() == 1 => Some(candidates.options[0].clone()),
            _ => None,
        };

        match self.mode {
            ScrapingMode::FullyInteractive => CourtResolution::Prompt,
            ScrapingMode::SemiAutomated => match unambiguous {
                Some(court) => CourtResolution::Auto(court),
                None => CourtResolution::Prompt,
            },
            ScrapingMode::FullyAutomated => match candidates.exact_matches.first() {
                Some(court) => CourtResolution::Auto(court.clone()),
                None => CourtResolution::NoDefault,
            },
        }
    }

    /// Callers must not ask about an empty entry list.
    pub fn resolve_entries(
        &self,
        download_mode: DownloadMode,
        entries: &[DocketEntry],
    ) -> EntryResolution {
        let defaults = default_entry_selection(download_mode, entries);
        match self.mode {
            ScrapingMode::FullyInteractive => EntryResolution::Prompt,
            ScrapingMode::SemiAutomated if defaults.is_empty() => EntryResolution::Prompt,
            ScrapingMode::SemiAutomated | ScrapingMode::FullyAutomated => {
                EntryResolution::Auto(defaults)
            }
        }
    }
}

/// Entries picked without the operator: everything under `All`, pattern
/// matches under `Selected`.
pub fn default_entry_selection(download_mode: DownloadMode, entries: &[DocketEntry]) -> Vec<usize> {
    match download_mode {
        DownloadMode::All => (0..entries.len()).collect(),
        DownloadMode::Selected => entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.matches_pattern())
            .map(|(i, _)| i)
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidates(options: &[&str], exact: &[&str]) -> CourtCandidates {
        CourtCandidates {
            user_input: "nevada".into(),
            options: options.iter().map(|s| s.to_string()).collect(),
            exact_matches: exact.iter().map(|s| s.to_string()).collect(),
            fuzzy_matches: Vec::new(),
        }
    }

    fn entry(num: &str, pattern: Option<&str>) -> DocketEntry {
        DocketEntry {
            entry_num: num.into(),
            filed_date: "2024-01-02".into(),
            description: format!("Entry {num}"),
            matched_pattern: pattern.map(str::to_string),
            download_url: None,
        }
    }

    fn policy(mode: ScrapingMode) -> CheckpointPolicy {
        CheckpointPolicy {
            mode,
            ..Default::default()
        }
    }

    #[test]
    fn happy_path_is_a_valid_walk() {
        use Phase::*;
        let path = [
            Idle,
            Initializing,
            LoggingIn,
            Searching,
            AwaitingCourtSelection,
            ProcessingResults,
            NavigatingToDocument,
            ExtractingEntries,
            AwaitingTranscriptSelection,
            Downloading,
            ReturningToResults,
            NavigatingToDocument,
            ExtractingEntries,
            Downloading,
            ReturningToResults,
            Completed,
        ];
        for pair in path.windows(2) {
            assert!(
                pair[0].can_transition_to(pair[1]),
                "{} -> {} should be legal",
                pair[0],
                pair[1]
            );
        }
    }

    #[test]
    fn no_skipping_ahead_or_backwards() {
        assert!(!Phase::Idle.can_transition_to(Phase::Searching));
        assert!(!Phase::Downloading.can_transition_to(Phase::ExtractingEntries));
        assert!(!Phase::Searching.can_transition_to(Phase::LoggingIn));
        assert!(!Phase::ProcessingResults.can_transition_to(Phase::AwaitingCourtSelection));
    }

    #[test]
    fn error_and_cancel_reachable_from_every_live_phase() {
        use Phase::*;
        for p in [
            Idle,
            Initializing,
            LoggingIn,
            Searching,
            AwaitingCourtSelection,
            ProcessingResults,
            NavigatingToDocument,
            ExtractingEntries,
            AwaitingTranscriptSelection,
            Downloading,
            ReturningToResults,
        ] {
            assert!(p.can_transition_to(Error));
            assert!(p.can_transition_to(Cancelled));
        }
    }

    #[test]
    fn terminal_phases_are_sinks() {
        for t in [Phase::Completed, Phase::Error, Phase::Cancelled] {
            assert!(t.is_terminal());
            assert!(!t.can_transition_to(Phase::Error));
            assert!(!t.can_transition_to(Phase::Cancelled));
            assert!(!t.can_transition_to(Phase::Initializing));
        }
    }

    #[test]
    fn phase_serializes_snake_case() {
        let v = serde_json::to_value(Phase::AwaitingTranscriptSelection).unwrap();
        assert_eq!(v, "awaiting_transcript_selection");
        assert_eq!(Phase::LoggingIn.to_string(), "logging_in");
    }

    #[test]
    fn interactive_always_prompts_for_court() {
        let c = candidates(&["District of Nevada"], &["District of Nevada"]);
        assert_eq!(
            policy(ScrapingMode::FullyInteractive).resolve_court(&c),
            CourtResolution::Prompt
        );
    }

    #[test]
    fn semi_automated_skips_unambiguous_court() {
        let p = policy(ScrapingMode::SemiAutomated);
        let single_exact = candidates(&["D. Nev.", "Nevada Bankruptcy"], &["D. Nev."]);
        assert_eq!(p.resolve_court(&single_exact), CourtResolution::Auto("D. Nev.".into()));

        let single_option = candidates(&["D. Nev."], &[]);
        assert_eq!(p.resolve_court(&single_option), CourtResolution::Auto("D. Nev.".into()));

        let two_exact = candidates(&["A", "B"], &["A", "B"]);
        assert_eq!(p.resolve_court(&two_exact), CourtResolution::Prompt);
    }

    #[test]
    fn automated_takes_first_exact_or_gives_up() {
        let p = policy(ScrapingMode::FullyAutomated);
        let two_exact = candidates(&["A", "B", "C"], &["B", "C"]);
        assert_eq!(p.resolve_court(&two_exact), CourtResolution::Auto("B".into()));

        let fuzzy_only = candidates(&["A", "B"], &[]);
        assert_eq!(p.resolve_court(&fuzzy_only), CourtResolution::NoDefault);
    }

    #[test]
    fn entry_defaults_follow_download_mode() {
        let entries = vec![entry("1", None), entry("2", Some("transcript")), entry("3", None)];
        assert_eq!(default_entry_selection(DownloadMode::All, &entries), vec![0, 1, 2]);
        assert_eq!(default_entry_selection(DownloadMode::Selected, &entries), vec![1]);
    }

    #[test]
    fn semi_automated_prompts_only_when_nothing_matches() {
        let p = policy(ScrapingMode::SemiAutomated);
        let none_match = vec![entry("1", None), entry("2", None)];
        assert_eq!(
            p.resolve_entries(DownloadMode::Selected, &none_match),
            EntryResolution::Prompt
        );
        assert_eq!(
            p.resolve_entries(DownloadMode::All, &none_match),
            EntryResolution::Auto(vec![0, 1])
        );
    }

    #[test]
    fn automated_never_prompts_for_entries() {
        let p = policy(ScrapingMode::FullyAutomated);
        let none_match = vec![entry("1", None)];
        assert_eq!(
            p.resolve_entries(DownloadMode::Selected, &none_match),
            EntryResolution::Auto(vec![])
        );
    }

    #[test]
    fn parses_mode_and_trust_strings() {
        assert_eq!(ScrapingMode::parse("semi-automated"), Some(ScrapingMode::SemiAutomated));
        assert_eq!(ScrapingMode::parse("FULLY_AUTOMATED"), Some(ScrapingMode::FullyAutomated));
        assert_eq!(ScrapingMode::parse("bogus"), None);
        assert_eq!(CourtSkipTrust::parse(" Verify "), Some(CourtSkipTrust::Verify));
    }
}
