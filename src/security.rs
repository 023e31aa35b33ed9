//! Retrieval-time screening of chunks for prompt injection.
//!
//! Corpus text is untrusted: a document can carry instructions aimed at the
//! model that will later read it as context. Every retrieved chunk is run
//! through a closed, versioned [`RuleSet`] before it reaches prompt
//! assembly. Each [`Rule`] has a kind and an action:
//!
//! | Action    | Effect on a matching chunk                                 |
//! |-----------|------------------------------------------------------------|
//! | `Drop`    | removed from the result; a [`DropRecord`] is kept          |
//! | `Scrub`   | matching spans cut out; chunk flagged `cleaned`            |
//! | `Observe` | text untouched; rule name listed on the chunk and logged   |
//!
//! Injection rules always drop: a chunk [`SecurityFilter::is_injected`]
//! reports as injected never survives screening. Markup rules cut
//! chat-template control tokens out of otherwise ordinary text.
//! Sensitive-vocabulary rules take their action from
//! `security.sensitive_action`. With protection disabled the filter passes
//! every chunk through as-is.

use anyhow::{Context, Result};
use regex::Regex;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::{SecurityConfig, SensitiveAction};
use crate::models::RetrievedChunk;

/// Bumped whenever a rule is added, removed, or its pattern changes.
pub const RULESET_VERSION: &str = "2026.10.2";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleKind {
    Injection,
    /// Model control tokens embedded in text. Scrubbed, not classified as
    /// injection.
    Markup,
    Sensitive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleAction {
    Drop,
    Scrub,
    Observe,
}

impl From<SensitiveAction> for RuleAction {
    fn from(action: SensitiveAction) -> Self {
        match action {
            SensitiveAction::Observe => RuleAction::Observe,
            SensitiveAction::Scrub => RuleAction::Scrub,
            SensitiveAction::Drop => RuleAction::Drop,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Rule {
    pub name: &'static str,
    pub kind: RuleKind,
    pub action: RuleAction,
    matcher: Regex,
}

impl Rule {
    fn new(name: &'static str, kind: RuleKind, action: RuleAction, pattern: &str) -> Result<Self> {
        let matcher = Regex::new(pattern)
            .with_context(|| format!("Invalid pattern for security rule '{}'", name))?;
        Ok(Self {
            name,
            kind,
            action,
            matcher,
        })
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.matcher.is_match(text)
    }
}

const INJECTION_DROP: &[(&str, &str)] = &[
    (
        "instruction_override",
        r"(?i)\b(?:ignore|forget|disregard)\s+(?:all\s+)?(?:(?:the|your|any)\s+)?(?:(?:previous|prior|above|earlier)\s+)?(?:instructions?|prompts?|rules)\b",
    ),
    ("role_reassignment", r"(?i)\byou\s+are\s+now\b"),
    // Also drops headings like "Solar system: ...". Accepted false positive.
    ("role_marker", r"(?i)\b(?:system|assistant)\s*:"),
    ("new_instructions", r"(?i)\bnew\s+instructions?\b"),
    (
        "output_demand",
        r"(?i)\b(?:output|print|say)\s*:|\brespond\s+with\b",
    ),
    ("evasion_vocabulary", r"(?i)\b(?:override|bypass|jailbreak)\w*"),
];

const MARKUP_SCRUB: &[(&str, &str)] = &[(
    "template_token",
    r"(?i)<\|[a-z_]+\|>|\[/?INST\]|<</?SYS>>",
)];

const SENSITIVE: &[(&str, &str)] = &[
    ("sensitive_password", r"(?i)password|суперпароль|пароль"),
    ("sensitive_secret", r"(?i)secret|секретн\w*|секрет"),
    ("sensitive_api_key", r"(?i)api\s*key|ключ\s*api"),
    ("sensitive_token", r"(?i)token|токен"),
    ("sensitive_credential", r"(?i)credential|учетные\s+данные"),
];

/// The fixed rule set, in evaluation order.
#[derive(Debug, Clone)]
pub struct RuleSet {
    rules: Vec<Rule>,
}

impl RuleSet {
    /// Built-in rules with sensitive rules bound to `sensitive_action`.
    pub fn builtin(sensitive_action: SensitiveAction) -> Result<Self> {
        let mut rules = Vec::new();
        for &(name, pattern) in INJECTION_DROP {
            rules.push(Rule::new(name, RuleKind::Injection, RuleAction::Drop, pattern)?);
        }
        for &(name, pattern) in MARKUP_SCRUB {
            rules.push(Rule::new(name, RuleKind::Markup, RuleAction::Scrub, pattern)?);
        }
        let action = RuleAction::from(sensitive_action);
        for &(name, pattern) in SENSITIVE {
            rules.push(Rule::new(name, RuleKind::Sensitive, action, pattern)?);
        }
        Ok(Self { rules })
    }

    pub fn version(&self) -> &'static str {
        RULESET_VERSION
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Every rule that matches `text`.
    pub fn matches<'a>(&'a self, text: &'a str) -> impl Iterator<Item = &'a Rule> + 'a {
        self.rules.iter().filter(move |r| r.is_match(text))
    }
}

/// A chunk that survived screening.
#[derive(Debug, Clone, Serialize)]
pub struct ScreenedChunk {
    #[serde(flatten)]
    pub chunk: RetrievedChunk,
    /// Text was altered by a scrub rule.
    pub cleaned: bool,
    /// Names of observed sensitive rules.
    pub sensitive: Vec<String>,
}

/// A chunk removed by screening.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DropRecord {
    pub id: String,
    pub filename: String,
    pub rule: String,
}

#[derive(Debug, Clone, Default)]
pub struct Screening {
    pub kept: Vec<ScreenedChunk>,
    pub dropped: Vec<DropRecord>,
}

pub struct SecurityFilter {
    enabled: bool,
    rules: RuleSet,
}

impl SecurityFilter {
    pub fn new(config: &SecurityConfig) -> Result<Self> {
        Ok(Self {
            enabled: config.enable_protection,
            rules: RuleSet::builtin(config.sensitive_action)?,
        })
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    /// True if any injection rule matches, regardless of whether protection
    /// is enabled.
    pub fn is_injected(&self, text: &str) -> bool {
        self.rules
            .matches(text)
            .any(|r| r.kind == RuleKind::Injection)
    }

    /// Screen retrieved chunks, preserving their order.
    pub fn screen(&self, chunks: Vec<RetrievedChunk>) -> Screening {
        let mut screening = Screening::default();

        for chunk in chunks {
            if !self.enabled {
                screening.kept.push(ScreenedChunk {
                    chunk,
                    cleaned: false,
                    sensitive: Vec::new(),
                });
                continue;
            }

            match self.screen_one(chunk) {
                Ok(kept) => screening.kept.push(kept),
                Err(record) => {
                    warn!(
                        id = %record.id,
                        file = %record.filename,
                        rule = %record.rule,
                        "dropped retrieved chunk"
                    );
                    screening.dropped.push(record);
                }
            }
        }

        screening
    }

    fn screen_one(&self, mut chunk: RetrievedChunk) -> Result<ScreenedChunk, DropRecord> {
        let drop_record = |chunk: &RetrievedChunk, rule: &str| DropRecord {
            id: chunk.id.clone(),
            filename: chunk.metadata.filename.clone(),
            rule: rule.to_string(),
        };

        if let Some(rule) = self
            .rules
            .matches(&chunk.text)
            .find(|r| r.action == RuleAction::Drop)
        {
            return Err(drop_record(&chunk, rule.name));
        }

        let mut sensitive = Vec::new();
        let mut scrubbed = chunk.text.clone();
        let mut last_scrub = None;
        for rule in self.rules.rules() {
            match rule.action {
                RuleAction::Scrub => {
                    let replaced = rule.matcher.replace_all(&scrubbed, "");
                    if replaced != scrubbed {
                        scrubbed = replaced.into_owned();
                        last_scrub = Some(rule.name);
                    }
                }
                RuleAction::Observe if rule.is_match(&chunk.text) => {
                    sensitive.push(rule.name.to_string());
                }
                _ => {}
            }
        }

        let cleaned = scrubbed != chunk.text;
        if cleaned {
            let trimmed = scrubbed.trim();
            if trimmed.is_empty() {
                return Err(drop_record(&chunk, last_scrub.unwrap_or("scrub")));
            }
            info!(id = %chunk.id, file = %chunk.metadata.filename, "scrubbed retrieved chunk");
            chunk.text = trimmed.to_string();
        }
        if !sensitive.is_empty() {
            info!(
                id = %chunk.id,
                file = %chunk.metadata.filename,
                rules = %sensitive.join(","),
                "sensitive vocabulary in retrieved chunk"
            );
        }

        Ok(ScreenedChunk {
            chunk,
            cleaned,
            sensitive,
        })
    }
}
