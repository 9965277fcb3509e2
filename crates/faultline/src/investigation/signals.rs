//! Rule-based reading of user text: problem signals, consent replies,
//! solution-phase reports and anomaly-frame fields.
//!
//! These rules are the deterministic path. A reasoning-backed frame
//! assessment may replace the extracted fields, never the signal rules.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::model::{SignalStrength, Severity, Strategy, Urgency};

const PROBLEM_WORDS: &[&str] = &[
    "error", "fail", "broken", "slow", "bug", "issue", "crash", "500", "502", "503", "504",
    "timeout", "exception", "wrong", "down", "outage", "latency", "degraded", "not working",
];

const URGENT_WORDS: &[&str] = &[
    "outage", "urgent", "critical", "sev1", "sev-1", "p0", "p1", "emergency", "asap",
    "production is down", "prod is down", "site is down", "data loss",
];

const INCIDENT_FRAMING: &[&str] = &[
    "incident",
    "investigate",
    "root cause",
    "on-call",
    "on call",
    "paged",
    "postmortem",
    "post-mortem",
];

const IMPACT_QUANTIFIERS: &[&str] = &["all", "every", "everyone", "entire", "whole"];

const PARTIAL_QUANTIFIERS: &[&str] = &["some", "few", "several", "intermittent", "sporadic"];

const CRITICAL_MARKERS: &[&str] = &[
    "outage", "sev1", "sev-1", "p0", "data loss", "completely down", "is down",
];

const DEGRADED_MARKERS: &[&str] = &["slow", "latency", "degraded"];

const SCOPE_NOUNS: &[&str] = &[
    "users", "customers", "clients", "tenants", "regions", "requests", "accounts", "devices",
    "merchants", "orders", "sessions", "traffic",
];

const COMPONENT_WORDS: &[&str] = &[
    "api", "database", "db", "gateway", "cache", "queue", "auth", "login", "checkout",
    "payments", "payment", "search", "frontend", "backend", "cdn", "dns", "redis", "postgres",
    "mysql", "kafka", "worker", "scheduler", "webhook", "webhooks",
];

const PAST_MARKERS: &[&str] = &[
    "postmortem",
    "post-mortem",
    "retro",
    "last week",
    "yesterday",
    "was resolved",
    "got resolved",
    "after the fact",
    "what happened",
];

const AFFIRMATIVE: &[&str] = &[
    "yes", "yeah", "yep", "sure", "ok", "okay", "go ahead", "please do", "do it", "let's",
    "lets", "investigate", "start",
];

const NEGATIVE: &[&str] = &["no", "nope", "not now", "don't", "dont", "stop", "later"];

const FIX_MARKERS: &[&str] = &[
    "fix deployed",
    "deployed the fix",
    "applied the fix",
    "fix applied",
    "rolled back",
    "rollback done",
    "mitigated",
    "patched",
    "hotfix",
];

const REGRESSION_MARKERS: &[&str] = &[
    "still failing",
    "errors are back",
    "came back",
    "regression",
    "happening again",
    "still broken",
    "not fixed",
];

/// How a user message reads as a problem report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProblemSignal {
    pub strength: SignalStrength,
    pub urgency: Urgency,
    pub strategy: Strategy,
    /// Rules that fired, for logging and directives.
    pub reasons: Vec<String>,
}

/// Lowercase words of `text`, keeping digits and intra-word hyphens.
fn words(text: &str) -> Vec<String> {
    text.split(|c: char| !(c.is_alphanumeric() || c == '-' || c == '\''))
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
        .collect()
}

/// Whether `term` occurs in `lower`: phrases by substring, single words on
/// word boundaries.
fn mentions(lower: &str, tokens: &[String], term: &str) -> bool {
    if term.contains(' ') {
        lower.contains(term)
    } else {
        tokens.iter().any(|t| t == term || (term.len() > 3 && t.starts_with(term)))
    }
}

fn any_of(lower: &str, tokens: &[String], terms: &[&str]) -> Option<String> {
    terms
        .iter()
        .find(|t| mentions(lower, tokens, t))
        .map(|t| t.to_string())
}

/// Classify a consultant-mode message.
///
/// Strong: urgency keywords, an attached artifact, explicit incident framing,
/// or a problem word combined with an impact quantifier over a scope noun.
/// Weak: problem words alone.
pub fn detect_signal(text: &str, has_attachment: bool) -> ProblemSignal {
    let lower = text.to_lowercase();
    let tokens = words(text);
    let mut reasons = Vec::new();

    let problem = any_of(&lower, &tokens, PROBLEM_WORDS);
    let urgent = any_of(&lower, &tokens, URGENT_WORDS);
    let framing = any_of(&lower, &tokens, INCIDENT_FRAMING);
    let wide_impact = problem.is_some() && has_wide_impact(&tokens);

    if let Some(word) = &urgent {
        reasons.push(format!("urgency keyword '{word}'"));
    }
    if has_attachment {
        reasons.push("evidence artifact attached".to_string());
    }
    if let Some(word) = &framing {
        reasons.push(format!("incident framing '{word}'"));
    }
    if wide_impact {
        reasons.push("problem affecting a whole population".to_string());
    }
    if let Some(word) = &problem
        && reasons.is_empty()
    {
        reasons.push(format!("problem word '{word}'"));
    }

    let strength = if urgent.is_some() || has_attachment || framing.is_some() || wide_impact {
        SignalStrength::Strong
    } else if problem.is_some() {
        SignalStrength::Weak
    } else {
        SignalStrength::None
    };

    let urgency = if urgent.is_some() {
        Urgency::Critical
    } else if wide_impact {
        Urgency::High
    } else if strength > SignalStrength::None {
        Urgency::Medium
    } else {
        Urgency::Low
    };

    let strategy = if any_of(&lower, &tokens, PAST_MARKERS).is_some() {
        Strategy::PostMortem
    } else {
        Strategy::ActiveIncident
    };

    ProblemSignal {
        strength,
        urgency,
        strategy,
        reasons,
    }
}

fn has_wide_impact(tokens: &[String]) -> bool {
    tokens.iter().enumerate().any(|(i, t)| {
        IMPACT_QUANTIFIERS.contains(&t.as_str())
            && tokens
                .iter()
                .skip(i + 1)
                .take(4)
                .any(|n| SCOPE_NOUNS.contains(&n.as_str()))
    }) || tokens.iter().any(|t| t == "everyone" || t == "nobody")
}

/// Consent reply: `Some(true)` to engage, `Some(false)` to decline, `None`
/// when the message does not answer the offer.
pub fn consent_reply(text: &str) -> Option<bool> {
    let lower = text.to_lowercase();
    let tokens = words(text);
    if any_of(&lower, &tokens, NEGATIVE).is_some() {
        return Some(false);
    }
    any_of(&lower, &tokens, AFFIRMATIVE).map(|_| true)
}

/// The user reports a fix has been applied.
pub fn reports_fix(text: &str) -> bool {
    let lower = text.to_lowercase();
    FIX_MARKERS.iter().any(|m| lower.contains(m))
}

/// The user reports the problem came back after a fix.
pub fn reports_regression(text: &str) -> bool {
    let lower = text.to_lowercase();
    REGRESSION_MARKERS.iter().any(|m| lower.contains(m))
}

// ── Anomaly frame extraction ──────────────────────────────────────

/// Frame fields found in one piece of text.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
pub struct FrameFields {
    /// Who or what is affected, e.g. "EU users".
    #[serde(default)]
    pub scope: Option<String>,
    /// Affected systems, e.g. "API", "checkout".
    #[serde(default)]
    pub components: Vec<String>,
    /// When the problem started, as stated.
    #[serde(default)]
    pub started_at: Option<String>,
    #[serde(default)]
    pub severity: Option<Severity>,
}

impl FrameFields {
    pub fn is_empty(&self) -> bool {
        self.scope.is_none()
            && self.components.is_empty()
            && self.started_at.is_none()
            && self.severity.is_none()
    }
}

/// Extract scope, components, start time and severity from free text.
pub fn extract_frame_fields(text: &str) -> FrameFields {
    let original: Vec<&str> = text
        .split(|c: char| c.is_whitespace() || c == ',' || c == ';' || c == '(' || c == ')')
        .filter(|w| !w.is_empty())
        .collect();
    let normalized: Vec<String> = original
        .iter()
        .map(|w| {
            w.trim_matches(|c: char| !c.is_alphanumeric() && c != ':')
                .to_lowercase()
        })
        .collect();

    FrameFields {
        scope: extract_scope(&original, &normalized),
        components: extract_components(&original, &normalized),
        started_at: extract_start(&original, &normalized),
        severity: extract_severity(text, &normalized),
    }
}

fn clean(word: &str) -> &str {
    word.trim_matches(|c: char| !c.is_alphanumeric() && c != '-')
}

/// "all EU users" → "EU users"; "for EU users" → "EU users".
fn extract_scope(original: &[&str], normalized: &[String]) -> Option<String> {
    for (i, word) in normalized.iter().enumerate() {
        let opener = IMPACT_QUANTIFIERS.contains(&word.as_str())
            || PARTIAL_QUANTIFIERS.contains(&word.as_str())
            || word == "for"
            || word == "only"
            || word == "affecting";
        if !opener {
            continue;
        }
        let window = normalized.iter().enumerate().skip(i + 1).take(4);
        for (j, candidate) in window {
            if SCOPE_NOUNS.contains(&candidate.as_str()) {
                let phrase: Vec<&str> = original[i + 1..=j]
                    .iter()
                    .map(|w| clean(w))
                    .skip_while(|w| {
                        let w = w.to_lowercase();
                        IMPACT_QUANTIFIERS.contains(&w.as_str())
                            || PARTIAL_QUANTIFIERS.contains(&w.as_str())
                            || w == "the"
                            || w == "our"
                    })
                    .collect();
                if !phrase.is_empty() {
                    return Some(phrase.join(" "));
                }
            }
        }
    }
    None
}

fn extract_components(original: &[&str], normalized: &[String]) -> Vec<String> {
    let mut components: Vec<String> = Vec::new();
    for (word, lower) in original.iter().zip(normalized) {
        let is_component = COMPONENT_WORDS.contains(&lower.as_str())
            || lower.ends_with("-service")
            || lower.ends_with("-api");
        let name = clean(word).to_string();
        if is_component && !components.iter().any(|c| c.eq_ignore_ascii_case(&name)) {
            components.push(name);
        }
    }
    components
}

fn looks_like_clock(word: &str) -> bool {
    let mut parts = word.split(':');
    match (parts.next(), parts.next()) {
        (Some(h), Some(m)) => {
            !h.is_empty()
                && h.len() <= 2
                && m.len() >= 2
                && h.chars().all(|c| c.is_ascii_digit())
                && m.chars().take(2).all(|c| c.is_ascii_digit())
        }
        _ => false,
    }
}

/// "since 14:02", "started yesterday at 9am", "began after the 3pm deploy".
fn extract_start(original: &[&str], normalized: &[String]) -> Option<String> {
    const MARKERS: &[&str] = &["since", "started", "starting", "began", "beginning"];
    for (i, word) in normalized.iter().enumerate() {
        if !MARKERS.contains(&word.as_str()) {
            continue;
        }
        let tail: Vec<&str> = original
            .iter()
            .skip(i + 1)
            .take(4)
            .take_while(|w| !w.ends_with('.'))
            .map(|w| clean(w))
            .filter(|w| !w.is_empty())
            .collect();
        let tail: Vec<&str> = match tail.first() {
            Some(&"at") | Some(&"around") | Some(&"on") => tail.into_iter().skip(1).collect(),
            _ => tail,
        };
        if !tail.is_empty() {
            return Some(tail.join(" "));
        }
    }
    normalized
        .iter()
        .position(|w| looks_like_clock(w))
        .map(|i| clean(original[i]).to_string())
}

fn extract_severity(text: &str, normalized: &[String]) -> Option<Severity> {
    let lower = text.to_lowercase();
    let has = |terms: &[&str]| terms.iter().any(|t| mentions(&lower, normalized, t));
    if has(CRITICAL_MARKERS) {
        Some(Severity::Critical)
    } else if has_wide_impact(normalized) {
        Some(Severity::High)
    } else if has(PARTIAL_QUANTIFIERS) || has(DEGRADED_MARKERS) {
        Some(Severity::Medium)
    } else if has(PROBLEM_WORDS) {
        Some(Severity::Low)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strong_signals() {
        let s = detect_signal("API 500 errors, all EU users", false);
        assert_eq!(s.strength, SignalStrength::Strong);
        assert_eq!(s.urgency, Urgency::High);
        assert_eq!(s.strategy, Strategy::ActiveIncident);

        let s = detect_signal("we have an outage on checkout", false);
        assert_eq!(s.strength, SignalStrength::Strong);
        assert_eq!(s.urgency, Urgency::Critical);

        assert_eq!(
            detect_signal("here are the logs", true).strength,
            SignalStrength::Strong
        );
    }

    #[test]
    fn weak_and_no_signal() {
        let s = detect_signal("I sometimes get an error when saving", false);
        assert_eq!(s.strength, SignalStrength::Weak);
        assert_eq!(s.urgency, Urgency::Medium);
        assert_eq!(
            detect_signal("how do I configure retries?", false).strength,
            SignalStrength::None
        );
    }

    #[test]
    fn post_mortem_strategy() {
        let s = detect_signal("write a postmortem for yesterday's checkout errors", false);
        assert_eq!(s.strategy, Strategy::PostMortem);
    }

    #[test]
    fn consent_replies() {
        assert_eq!(consent_reply("yes please"), Some(true));
        assert_eq!(consent_reply("Sure, go ahead"), Some(true));
        assert_eq!(consent_reply("no, not now"), Some(false));
        assert_eq!(consent_reply("what is a CDN?"), None);
    }

    #[test]
    fn fix_and_regression_reports() {
        assert!(reports_fix("We rolled back the release"));
        assert!(reports_regression("errors are back after an hour"));
        assert!(!reports_fix("still looking"));
    }

    #[test]
    fn frame_fields_from_scenario_text() {
        let f = extract_frame_fields("API 500 errors, all EU users");
        assert_eq!(f.scope.as_deref(), Some("EU users"));
        assert_eq!(f.components, vec!["API".to_string()]);
        assert!(f.severity.unwrap() >= Severity::High);
    }

    #[test]
    fn start_time_and_partial_scope() {
        let f = extract_frame_fields("checkout is slow for some mobile customers since 14:02 today");
        assert_eq!(f.scope.as_deref(), Some("mobile customers"));
        assert_eq!(f.started_at.as_deref(), Some("14:02 today"));
        assert_eq!(f.severity, Some(Severity::Medium));
        assert_eq!(f.components, vec!["checkout".to_string()]);

        let f = extract_frame_fields("errors began at 09:30.");
        assert_eq!(f.started_at.as_deref(), Some("09:30"));
        assert!(extract_frame_fields("hello there").is_empty());
    }
}
