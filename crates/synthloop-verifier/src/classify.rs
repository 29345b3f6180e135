use regex::Regex;
use std::sync::OnceLock;

const INVALID_COMMAND_SIGNATURES: &[&str] = &[
    "command not found",
    "Missing script:",
    "missing script:",
    "is not recognized as an internal or external command",
];

fn shell_not_found_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        // dash: "sh: 1: foo: not found", yarn: `error Command "foo" not found.`
        Regex::new(r#"(?m)^(?:\S*/)?(?:sh|bash|dash|ash)(?::| \d+:)(?: \d+:)? \S+: not found|error Command "[^"]*" not found"#)
            .expect("valid shell signature regex")
    })
}

/// Whether check output shows the command itself could not be run
pub fn is_invalid_command(stderr: &str) -> bool {
    INVALID_COMMAND_SIGNATURES
        .iter()
        .any(|signature| stderr.contains(signature))
        || shell_not_found_regex().is_match(stderr)
}
