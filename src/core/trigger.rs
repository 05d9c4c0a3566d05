//! Job trigger predicates.
//!
//! A trigger is a pure function of the run context. It is evaluated at
//! most once per job per run, and never for a job whose dependencies did
//! not all succeed.

use std::fmt;
use std::sync::Arc;

use glob::Pattern;
use serde::{Deserialize, Serialize};

use crate::domain::{EventKind, RunContext};

/// Eligibility predicate over the run context
///
/// YAML forms:
/// - `trigger: always` / `trigger: never`
/// - `trigger: { branch: ["main", "release/*"] }`
/// - `trigger: { not_branch: ["main"] }`
/// - `trigger: { event: [push, manual] }`
/// - `trigger: { all: [...] }`, `{ any: [...] }`, `{ not: ... }`
///
/// Variants carrying data are single-key maps rather than YAML `!tags`, so
/// fields holding a trigger go through `singleton_map_recursive`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    Always,
    Never,

    /// Branch matches any of the glob patterns
    Branch(Vec<String>),

    /// Branch matches none of the glob patterns
    NotBranch(Vec<String>),

    /// Run was started by one of these events
    Event(Vec<EventKind>),

    All(Vec<Trigger>),
    Any(Vec<Trigger>),
    Not(Box<Trigger>),

    /// Programmatic predicate (library callers only)
    #[serde(skip)]
    Custom(CustomTrigger),
}

impl Default for Trigger {
    fn default() -> Self {
        Self::Always
    }
}

/// Wrapper for caller-supplied predicates
#[derive(Clone)]
pub struct CustomTrigger(Arc<dyn Fn(&RunContext) -> bool + Send + Sync>);

impl fmt::Debug for CustomTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CustomTrigger(..)")
    }
}

impl Trigger {
    /// Parse a trigger in its YAML map form (`{ branch: [...] }`)
    pub fn from_yaml(yaml: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::with::singleton_map_recursive::deserialize(serde_yaml::Deserializer::from_str(yaml))
    }

    /// Wrap a closure as a trigger
    pub fn custom<F>(predicate: F) -> Self
    where
        F: Fn(&RunContext) -> bool + Send + Sync + 'static,
    {
        Self::Custom(CustomTrigger(Arc::new(predicate)))
    }

    /// Evaluate against a run context
    pub fn evaluate(&self, ctx: &RunContext) -> bool {
        match self {
            Self::Always => true,
            Self::Never => false,
            Self::Branch(patterns) => branch_matches(patterns, &ctx.branch),
            Self::NotBranch(patterns) => !branch_matches(patterns, &ctx.branch),
            Self::Event(kinds) => kinds.contains(&ctx.event_kind),
            Self::All(triggers) => triggers.iter().all(|t| t.evaluate(ctx)),
            Self::Any(triggers) => triggers.iter().any(|t| t.evaluate(ctx)),
            Self::Not(inner) => !inner.evaluate(ctx),
            Self::Custom(CustomTrigger(f)) => f(ctx),
        }
    }

    /// Check that every branch pattern compiles
    pub fn validate(&self) -> Result<(), (String, String)> {
        match self {
            Self::Branch(patterns) | Self::NotBranch(patterns) => {
                for p in patterns {
                    Pattern::new(p).map_err(|e| (p.clone(), e.to_string()))?;
                }
                Ok(())
            }
            Self::All(triggers) | Self::Any(triggers) => {
                triggers.iter().try_for_each(Trigger::validate)
            }
            Self::Not(inner) => inner.validate(),
            Self::Always | Self::Never | Self::Event(_) | Self::Custom(_) => Ok(()),
        }
    }
}

fn branch_matches(patterns: &[String], branch: &str) -> bool {
    patterns.iter().any(|p| match Pattern::new(p) {
        Ok(pattern) => pattern.matches(branch),
        Err(_) => p == branch,
    })
}
