use std::sync::LazyLock;

use regex::Regex;

static ANSI: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\x1b\[[0-9;?]*[ -/]*[@-~]|\x1b\][^\x07]*\x07")
        .expect("ansi escape pattern is a valid literal")
});

static NPM_SUMMARY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(added|removed|changed|audited|up to date)\b.*\b(packages?|in \d)")
        .expect("npm summary pattern is a valid literal")
});

/// Line prefixes emitted by package installers rather than by tests.
const NOISE_PREFIXES: &[&str] = &[
    "Collecting ",
    "Downloading ",
    "Using cached ",
    "Installing collected packages",
    "Requirement already satisfied",
    "Successfully installed",
    "Successfully built",
    "Building wheel",
    "Created wheel",
    "Stored in directory",
    "Preparing metadata",
    "WARNING: You are using pip",
    "WARNING: Running pip as the 'root' user",
    "[notice]",
    "npm WARN",
    "npm notice",
    "npm warn",
    "found 0 vulnerabilities",
    "Run `npm audit",
    "To address all issues",
];

/// Strip ANSI escapes, carriage-return progress redraws and installer
/// banners. Test output is left untouched.
pub fn clean_log(raw: &str) -> String {
    let without_ansi = ANSI.replace_all(raw, "");
    let mut lines = Vec::new();
    for line in without_ansi.lines() {
        // Keep only the last redraw of a progress line.
        let line = line.rsplit('\r').next().unwrap_or(line);
        let trimmed = line.trim_start();
        if NOISE_PREFIXES.iter().any(|p| trimmed.starts_with(p)) {
            continue;
        }
        if NPM_SUMMARY.is_match(trimmed) {
            continue;
        }
        if is_progress_bar(trimmed) {
            continue;
        }
        lines.push(line.trim_end());
    }

    // Collapse runs of blank lines left behind by removed banners.
    let mut out = String::with_capacity(raw.len());
    let mut blank = false;
    for line in lines {
        if line.is_empty() {
            if blank {
                continue;
            }
            blank = true;
        } else {
            blank = false;
        }
        out.push_str(line);
        out.push('\n');
    }
    out.trim_start_matches('\n').to_string()
}

fn is_progress_bar(line: &str) -> bool {
    let bar_chars = line.chars().filter(|c| matches!(c, '━' | '█' | '░' | '▕' | '▏')).count();
    bar_chars >= 10
}
