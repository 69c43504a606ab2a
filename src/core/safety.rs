//! Denylist of destructive command signatures.
//!
//! This is an advisory heuristic. It catches the obvious ways a suggested
//! command could wreck a machine; it is not a sandbox and a determined
//! command can always get past it.

use std::fmt;

use regex::Regex;

use crate::core::lib::{TaiError, TaiResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleCategory {
    RecursiveDelete,
    DiskWrite,
    DiskFormat,
    PowerState,
    DeviceRedirect,
    PermissionWipe,
    ForkBomb,
}

impl RuleCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RecursiveDelete => "recursive-delete",
            Self::DiskWrite => "disk-write",
            Self::DiskFormat => "disk-format",
            Self::PowerState => "power-state",
            Self::DeviceRedirect => "device-redirect",
            Self::PermissionWipe => "permission-wipe",
            Self::ForkBomb => "fork-bomb",
        }
    }
}

impl fmt::Display for RuleCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Signatures are matched against the lower-cased command, in order.
const RULES: &[(&str, RuleCategory)] = &[
    // rm -rf /, rm -fr ~, rm -r -f *, rm --recursive --force /
    (
        r"\brm\s+(?:-[a-z]*r[a-z]*f[a-z]*|-[a-z]*f[a-z]*r[a-z]*|(?:-[a-z]+\s+)*-r\s+-f|(?:-[a-z]+\s+)*-f\s+-r|--recursive\s+--force|--force\s+--recursive)\s+(?:--no-preserve-root\s+)?(?:/|~|\*|\$home\b)",
        RuleCategory::RecursiveDelete,
    ),
    (r"--no-preserve-root", RuleCategory::RecursiveDelete),
    (r"\b(?:rd|rmdir)\s+/s\b", RuleCategory::RecursiveDelete),
    (r"\bdel\s+(?:/[a-z]\s+)*/s\b", RuleCategory::RecursiveDelete),
    (r"\bdd\s+", RuleCategory::DiskWrite),
    (r"\bshred\s+.*?/dev/", RuleCategory::DiskWrite),
    (r"\bfdisk\b", RuleCategory::DiskFormat),
    (r"\bparted\b", RuleCategory::DiskFormat),
    (r"\bwipefs\b", RuleCategory::DiskFormat),
    (r"\bmkfs(?:\.[a-z0-9]+)?\b", RuleCategory::DiskFormat),
    // Command position only: start of line, after a separator, or after sudo.
    (r"(?:^\s*|[;&|]\s*|\bsudo\s+)format(?:\s|$)", RuleCategory::DiskFormat),
    (
        r"(?:^\s*|[;&|]\s*|\bsudo\s+)(?:shutdown|reboot|halt|poweroff)(?:\s|$)",
        RuleCategory::PowerState,
    ),
    (r"\bsystemctl\s+(?:reboot|poweroff|halt)\b", RuleCategory::PowerState),
    (r"\binit\s+[06]\b", RuleCategory::PowerState),
    (
        r">\s*/dev/(?:sd|hd|vd|xvd|nvme|mmcblk|disk|md|mapper)",
        RuleCategory::DeviceRedirect,
    ),
    (r"\bchmod\s+(?:-[a-z]*r[a-z]*\s+)[0-7]*7{3}\s+/", RuleCategory::PermissionWipe),
    (r":\(\)\s*\{\s*:\s*\|\s*:\s*&\s*\}\s*;\s*:", RuleCategory::ForkBomb),
];

pub struct SafetyValidator {
    rules: Vec<(Regex, RuleCategory)>,
}

impl SafetyValidator {
    pub fn new() -> TaiResult<Self> {
        Self::with_rules(RULES.iter().copied())
    }

    /// Builds a validator from custom `(pattern, category)` rules.
    pub fn with_rules<'a>(
        rules: impl IntoIterator<Item = (&'a str, RuleCategory)>,
    ) -> TaiResult<Self> {
        let rules = rules
            .into_iter()
            .map(|(pattern, category)| {
                Regex::new(pattern)
                    .map(|re| (re, category))
                    .map_err(|e| TaiError::Config(format!("bad safety rule '{}': {}", pattern, e)))
            })
            .collect::<TaiResult<Vec<_>>>()?;
        Ok(Self { rules })
    }

    /// First rule the command trips, if any.
    pub fn check(&self, command: &str) -> Option<RuleCategory> {
        let lowered = command.to_lowercase();
        self.rules
            .iter()
            .find(|(re, _)| re.is_match(&lowered))
            .map(|(_, category)| *category)
    }

    pub fn is_safe(&self, command: &str) -> bool {
        self.check(command).is_none()
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }
}
