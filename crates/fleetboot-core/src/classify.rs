//! Turning raw command output into a verdict

use std::fmt;

use fleetboot_exec::CommandOutput;
use serde::{Deserialize, Serialize};

/// What a command's output means for the bootstrap
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Success,
    RetryableFailure,
    FatalFailure,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Verdict::Success => "success",
            Verdict::RetryableFailure => "retryable_failure",
            Verdict::FatalFailure => "fatal_failure",
        };
        f.write_str(s)
    }
}

/// A verdict with its reason and any informational warnings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub verdict: Verdict,
    pub reason: Option<String>,
    pub warnings: Vec<String>,
}

impl Classification {
    #[must_use]
    pub fn success() -> Self {
        Self {
            verdict: Verdict::Success,
            reason: None,
            warnings: Vec::new(),
        }
    }

    pub fn retryable(reason: impl Into<String>) -> Self {
        Self {
            verdict: Verdict::RetryableFailure,
            reason: Some(reason.into()),
            warnings: Vec::new(),
        }
    }

    pub fn fatal(reason: impl Into<String>) -> Self {
        Self {
            verdict: Verdict::FatalFailure,
            reason: Some(reason.into()),
            warnings: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_warnings(mut self, warnings: Vec<String>) -> Self {
        self.warnings = warnings;
        self
    }
}

/// Maps command output to a classification
///
/// Any `Fn(&CommandOutput) -> Classification` is a classifier.
pub trait Classify: Send + Sync {
    fn classify(&self, output: &CommandOutput) -> Classification;
}

impl<F> Classify for F
where
    F: Fn(&CommandOutput) -> Classification + Send + Sync,
{
    fn classify(&self, output: &CommandOutput) -> Classification {
        self(output)
    }
}

/// Exit-status classifier refined by known output signatures
///
/// Rules, first match wins:
/// 1. a fatal signature anywhere in the output is fatal, even with exit 0
/// 2. exit 0 is success
/// 3. a retryable signature is a retryable failure
/// 4. an already-satisfied signature is success
/// 5. anything else uses `unmatched_failure`
///
/// Lines starting with a warning prefix never affect the verdict and are
/// reported as warnings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignatureClassifier {
    pub fatal: Vec<String>,
    pub retryable: Vec<String>,
    pub satisfied: Vec<String>,
    pub warning_prefixes: Vec<String>,
    pub unmatched_failure: Verdict,
}

impl Default for SignatureClassifier {
    fn default() -> Self {
        Self::apt()
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| (*s).to_string()).collect()
}

impl SignatureClassifier {
    /// Signatures for apt/dpkg on Debian and Ubuntu
    #[must_use]
    pub fn apt() -> Self {
        Self {
            fatal: strings(&[
                "has no installation candidate",
                "Unable to locate package",
                "dpkg was interrupted",
            ]),
            retryable: strings(&[
                "Could not get lock",
                "Temporary failure resolving",
                "Failed to fetch",
                "Hash Sum mismatch",
                "is not valid yet",
            ]),
            satisfied: strings(&["is already the newest version"]),
            warning_prefixes: strings(&["WARNING:", "W: "]),
            unmatched_failure: Verdict::RetryableFailure,
        }
    }

    /// No signatures: exit status alone decides
    #[must_use]
    pub fn exit_status_only() -> Self {
        Self {
            fatal: Vec::new(),
            retryable: Vec::new(),
            satisfied: Vec::new(),
            warning_prefixes: Vec::new(),
            unmatched_failure: Verdict::RetryableFailure,
        }
    }

    /// Add signatures on top of the current ones
    #[must_use]
    pub fn extended_with(mut self, extra: &SignatureClassifier) -> Self {
        self.fatal.extend(extra.fatal.iter().cloned());
        self.retryable.extend(extra.retryable.iter().cloned());
        self.satisfied.extend(extra.satisfied.iter().cloned());
        self.warning_prefixes
            .extend(extra.warning_prefixes.iter().cloned());
        self
    }

    fn is_warning(&self, line: &str) -> bool {
        let line = line.trim_start();
        self.warning_prefixes.iter().any(|p| line.starts_with(p.as_str()))
    }

    /// Find the first line (outside warnings) containing one of `signatures`
    fn find_line<'a>(&self, lines: &[&'a str], signatures: &[String]) -> Option<&'a str> {
        lines
            .iter()
            .filter(|line| !self.is_warning(line))
            .find(|line| signatures.iter().any(|sig| line.contains(sig.as_str())))
            .map(|line| line.trim())
    }
}

impl Classify for SignatureClassifier {
    fn classify(&self, output: &CommandOutput) -> Classification {
        let lines: Vec<&str> = output
            .stdout
            .lines()
            .chain(output.stderr.lines())
            .collect();

        let warnings: Vec<String> = lines
            .iter()
            .filter(|line| self.is_warning(line))
            .map(|line| line.trim().to_string())
            .collect();

        let classification = if let Some(line) = self.find_line(&lines, &self.fatal) {
            Classification::fatal(line)
        } else if output.success() {
            Classification::success()
        } else if let Some(line) = self.find_line(&lines, &self.retryable) {
            Classification::retryable(line)
        } else if self.find_line(&lines, &self.satisfied).is_some() {
            Classification::success()
        } else {
            let reason = last_meaningful_line(&lines, |l| self.is_warning(l))
                .map_or_else(
                    || format!("exit status {}", output.status),
                    |line| format!("exit status {}: {line}", output.status),
                );
            Classification {
                verdict: self.unmatched_failure,
                reason: Some(reason),
                warnings: Vec::new(),
            }
        };

        classification.with_warnings(warnings)
    }
}

fn last_meaningful_line<'a>(lines: &[&'a str], is_warning: impl Fn(&str) -> bool) -> Option<&'a str> {
    lines
        .iter()
        .rev()
        .map(|l| l.trim())
        .find(|l| !l.is_empty() && !is_warning(*l))
}

#[cfg(test)]
mod tests {
    use super::*;

    const APT_CLI_WARNING: &str =
        "WARNING: apt does not have a stable CLI interface. Use with caution in scripts.";

    #[test]
    fn test_clean_exit_is_success() {
        let classifier = SignatureClassifier::apt();
        let out = CommandOutput::new(0, "Setting up tomcat9 (9.0.58-1) ...", APT_CLI_WARNING);

        let c = classifier.classify(&out);
        assert_eq!(c.verdict, Verdict::Success);
        assert_eq!(c.warnings, vec![APT_CLI_WARNING.to_string()]);
    }

    #[test]
    fn test_no_installation_candidate_is_fatal() {
        let classifier = SignatureClassifier::apt();
        let out = CommandOutput::new(
            100,
            "Reading package lists...",
            format!("{APT_CLI_WARNING}\nE: Package 'tomcat9' has no installation candidate"),
        );

        let c = classifier.classify(&out);
        assert_eq!(c.verdict, Verdict::FatalFailure);
        assert_eq!(
            c.reason.as_deref(),
            Some("E: Package 'tomcat9' has no installation candidate")
        );
    }

    #[test]
    fn test_fatal_signature_wins_over_zero_exit() {
        let classifier = SignatureClassifier::apt();
        let out = CommandOutput::new(0, "", "E: Unable to locate package tomcat99");

        assert_eq!(classifier.classify(&out).verdict, Verdict::FatalFailure);
    }

    #[test]
    fn test_lock_contention_is_retryable() {
        let classifier = SignatureClassifier::apt();
        let out = CommandOutput::new(
            100,
            "",
            "E: Could not get lock /var/lib/dpkg/lock-frontend. It is held by process 1234 (apt)",
        );

        assert_eq!(classifier.classify(&out).verdict, Verdict::RetryableFailure);
    }

    #[test]
    fn test_already_newest_is_success() {
        let classifier = SignatureClassifier::apt();
        let out = CommandOutput::new(1, "wget is already the newest version (1.21.2).", "");

        assert_eq!(classifier.classify(&out).verdict, Verdict::Success);
    }

    #[test]
    fn test_warning_lines_never_decide() {
        let classifier = SignatureClassifier::apt();
        // a fatal signature inside a warning line is ignored
        let out = CommandOutput::new(
            0,
            "",
            "W: Package 'tomcat9' has no installation candidate in cache mirror",
        );
        let c = classifier.classify(&out);
        assert_eq!(c.verdict, Verdict::Success);
        assert_eq!(c.warnings.len(), 1);

        let out = CommandOutput::new(2, "", APT_CLI_WARNING);
        let c = classifier.classify(&out);
        assert_eq!(c.verdict, Verdict::RetryableFailure);
        assert_eq!(c.reason.as_deref(), Some("exit status 2"));
    }

    #[test]
    fn test_unmatched_failure_is_configurable() {
        let classifier = SignatureClassifier {
            unmatched_failure: Verdict::FatalFailure,
            ..SignatureClassifier::exit_status_only()
        };
        let out = CommandOutput::new(1, "", "systemctl: unit not found");

        let c = classifier.classify(&out);
        assert_eq!(c.verdict, Verdict::FatalFailure);
        assert_eq!(
            c.reason.as_deref(),
            Some("exit status 1: systemctl: unit not found")
        );
    }

    #[test]
    fn test_closure_classifier() {
        let classifier = |out: &CommandOutput| {
            if out.stdout.contains("active (running)") {
                Classification::success()
            } else {
                Classification::retryable("service not active yet")
            }
        };

        let c = classifier.classify(&CommandOutput::new(0, "Active: active (running)", ""));
        assert_eq!(c.verdict, Verdict::Success);
        let c = classifier.classify(&CommandOutput::new(3, "Active: activating (start)", ""));
        assert_eq!(c.verdict, Verdict::RetryableFailure);
    }
}
