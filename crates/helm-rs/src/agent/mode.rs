//! Operating modes and their tool-call gating.
//!
//! | Mode | Read-only | Mutating | Confirm-required |
//! |------|-----------|----------|------------------|
//! | ASK  | run       | reject   | reject           |
//! | PLAN | run       | simulate | simulate         |
//! | CODE | run       | confirm  | confirm          |
//! | AUTO | run       | run      | confirm          |
//!
//! Forbidden calls never reach the gate; the executor refuses them during
//! resolution.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::tools::core::Danger;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Ask,
    Plan,
    #[default]
    Code,
    Auto,
}

/// What the controller does with one resolved call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Gate {
    Execute,
    /// Run only after the user approves.
    Confirm(String),
    /// Record a `not_permitted` failure.
    Reject(String),
    /// Describe the effect without running (PLAN).
    Simulate,
}

impl Mode {
    pub const ALL: [Mode; 4] = [Mode::Ask, Mode::Plan, Mode::Code, Mode::Auto];

    /// ASK → PLAN → CODE → AUTO → ASK.
    pub fn next(self) -> Mode {
        match self {
            Mode::Ask => Mode::Plan,
            Mode::Plan => Mode::Code,
            Mode::Code => Mode::Auto,
            Mode::Auto => Mode::Ask,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Ask => "ask",
            Mode::Plan => "plan",
            Mode::Code => "code",
            Mode::Auto => "auto",
        }
    }

    /// Gate a call. `confirm_mutations` controls whether CODE asks before
    /// every mutating call or only before confirm-required ones.
    pub fn gate(self, mutating: bool, danger: &Danger, confirm_mutations: bool) -> Gate {
        let confirm_reason = match danger {
            Danger::ConfirmRequired(reason) | Danger::Forbidden(reason) => Some(reason.as_str()),
            Danger::Safe => None,
        };
        match self {
            Mode::Ask if mutating || confirm_reason.is_some() => Gate::Reject(format!(
                "not permitted in ASK mode: this call {}. Switch to CODE or AUTO mode to run it.",
                if mutating {
                    "modifies the project"
                } else {
                    "needs confirmation"
                }
            )),
            Mode::Plan if mutating || confirm_reason.is_some() => Gate::Simulate,
            Mode::Code => match confirm_reason {
                Some(reason) => Gate::Confirm(reason.to_string()),
                None if mutating && confirm_mutations => {
                    Gate::Confirm("modifies the project".to_string())
                }
                None => Gate::Execute,
            },
            Mode::Auto => match confirm_reason {
                Some(reason) => Gate::Confirm(reason.to_string()),
                None => Gate::Execute,
            },
            Mode::Ask | Mode::Plan => Gate::Execute,
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_str().to_uppercase())
    }
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "ask" => Ok(Mode::Ask),
            "plan" => Ok(Mode::Plan),
            "code" => Ok(Mode::Code),
            "auto" => Ok(Mode::Auto),
            other => Err(format!(
                "unknown mode '{other}' (expected ask, plan, code or auto)"
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn confirm() -> Danger {
        Danger::ConfirmRequired("runs rm".into())
    }

    #[test]
    fn cycle_visits_every_mode() {
        let mut mode = Mode::Ask;
        let mut seen = Vec::new();
        for _ in 0..4 {
            seen.push(mode);
            mode = mode.next();
        }
        assert_eq!(seen, Mode::ALL);
        assert_eq!(mode, Mode::Ask);
    }

    #[test]
    fn parse_and_display() {
        assert_eq!("Plan".parse::<Mode>(), Ok(Mode::Plan));
        assert_eq!(" auto ".parse::<Mode>(), Ok(Mode::Auto));
        assert!("yolo".parse::<Mode>().is_err());
        assert_eq!(Mode::Code.to_string(), "CODE");
    }

    #[test]
    fn read_only_calls_run_everywhere() {
        for mode in Mode::ALL {
            assert_eq!(mode.gate(false, &Danger::Safe, true), Gate::Execute, "{mode}");
        }
    }

    #[test]
    fn ask_rejects_mutations_and_dangerous_calls() {
        assert!(matches!(Mode::Ask.gate(true, &Danger::Safe, true), Gate::Reject(r) if r.contains("ASK mode")));
        assert!(matches!(Mode::Ask.gate(false, &confirm(), true), Gate::Reject(_)));
    }

    #[test]
    fn plan_simulates() {
        assert_eq!(Mode::Plan.gate(true, &Danger::Safe, true), Gate::Simulate);
        assert_eq!(Mode::Plan.gate(true, &confirm(), false), Gate::Simulate);
    }

    #[test]
    fn code_confirms_mutations_unless_disabled() {
        assert!(matches!(Mode::Code.gate(true, &Danger::Safe, true), Gate::Confirm(_)));
        assert_eq!(Mode::Code.gate(true, &Danger::Safe, false), Gate::Execute);
        assert_eq!(
            Mode::Code.gate(true, &confirm(), false),
            Gate::Confirm("runs rm".into())
        );
    }

    #[test]
    fn auto_still_confirms_dangerous_calls() {
        assert_eq!(Mode::Auto.gate(true, &Danger::Safe, true), Gate::Execute);
        assert_eq!(
            Mode::Auto.gate(true, &confirm(), true),
            Gate::Confirm("runs rm".into())
        );
    }
}
