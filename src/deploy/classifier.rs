//! Outcome classifier for deployment logs
//!
//! The git push exit code alone is not trustworthy: a push can exit
//! zero while the build failed inside the remote buildpack, and remote
//! output arrives on stderr either way. The final verdict is read from
//! the accumulated log against an ordered rule table.

/// Verdict a single rule contributes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verdict {
    Failure,
    Success,
}

/// One rule: a lowercase pattern and the verdict it implies.
/// `requires` narrows a rule to logs that also contain a second marker.
struct Rule {
    pattern: &'static str,
    requires: Option<&'static str>,
    verdict: Verdict,
}

/// Ordered rule table. Failure rules are listed first and always win:
/// classification scans for any failure before considering success.
const RULES: &[Rule] = &[
    Rule {
        pattern: "permission denied (publickey)",
        requires: None,
        verdict: Verdict::Failure,
    },
    Rule {
        pattern: "could not read from remote repository",
        requires: None,
        verdict: Verdict::Failure,
    },
    Rule {
        pattern: "src refspec",
        requires: None,
        verdict: Verdict::Failure,
    },
    Rule {
        pattern: "[remote rejected]",
        requires: None,
        verdict: Verdict::Failure,
    },
    Rule {
        pattern: "deployment failed",
        requires: None,
        verdict: Verdict::Failure,
    },
    Rule {
        pattern: "build failed",
        requires: None,
        verdict: Verdict::Failure,
    },
    Rule {
        pattern: "app is running on dokku",
        requires: None,
        verdict: Verdict::Success,
    },
    Rule {
        pattern: "deployment verified successfully",
        requires: None,
        verdict: Verdict::Success,
    },
    // A completed push only counts once verification actually started
    Rule {
        pattern: "git push completed",
        requires: Some("verifying deployment"),
        verdict: Verdict::Success,
    },
];

/// Classify an attempt from its full log text.
///
/// `pipeline_reported_success` is the pipeline's own view (every step
/// returned ok); it is consulted only when the log matches no rule.
/// Ambiguity defaults to failed.
pub fn classify(log_text: &str, pipeline_reported_success: bool) -> bool {
    let log = log_text.to_lowercase();

    for rule in RULES {
        if rule.verdict != Verdict::Failure {
            continue;
        }
        if log.contains(rule.pattern) {
            return false;
        }
    }

    for rule in RULES {
        if rule.verdict != Verdict::Success {
            continue;
        }
        let extra_ok = rule.requires.map_or(true, |marker| log.contains(marker));
        if log.contains(rule.pattern) && extra_ok {
            return true;
        }
    }

    pipeline_reported_success
}
