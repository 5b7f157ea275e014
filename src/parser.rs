//! Access-log line parser.
//!
//! Input may come from a terminal-attached pipe, so every line is stripped of
//! escape sequences and mouse-report noise before it is matched against the
//! Combined Log Format. A line that does not match is passed through as
//! [`ParsedLine::Raw`]; nothing is ever dropped.

use std::sync::LazyLock;

use chrono::{DateTime, FixedOffset, Utc};
use regex::Regex;

use crate::models::{LogEvent, ParsedLine};

/// CLF timestamp layout, e.g. `10/Oct/2023:13:55:36 -0700`.
const CLF_TIME_FORMAT: &str = "%d/%b/%Y:%H:%M:%S %z";

/// X10 mouse reports carry three raw bytes after `ESC [ M`.
static X10_MOUSE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\x1b\[M[\s\S]{0,3}").expect("valid X10 mouse regex"));

static CSI_SEQUENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\x1b\[[0-9;:?<>=]*[ -/]*[@-~]").expect("valid CSI regex")
});

static OSC_SEQUENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\x1b\][^\x07\x1b]*(?:\x07|\x1b\\)?").expect("valid OSC regex")
});

static SHORT_ESCAPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\x1b[@-Z\\-_()#%][0-9A-Za-z]?").expect("valid escape regex"));

/// SGR mouse reports whose ESC byte was already lost, e.g. `[<35;12;40M`.
static SGR_MOUSE_RESIDUE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[<\d+;\d+;\d+[mM]").expect("valid SGR mouse regex"));

static CONTROL_BYTES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\x00-\x08\x0b-\x1f\x7f]").expect("valid control regex"));

static COMBINED_LOG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r#"^(?P<addr>\S+) \S+ \S+ \[(?P<time>[^\]]+)\] "(?P<request>(?:[^"\\]|\\.)*)" "#,
        r#"(?P<status>\d{3}) (?P<bytes>\d+|-)"#,
        r#"(?: "(?P<referrer>(?:[^"\\]|\\.)*)" "(?P<agent>(?:[^"\\]|\\.)*)")?\s*$"#,
    ))
    .expect("valid combined log regex")
});

/// Remove terminal escape sequences, mouse-report fragments and control bytes.
pub fn sanitize(line: &str) -> String {
    let cleaned = X10_MOUSE.replace_all(line, "");
    let cleaned = CSI_SEQUENCE.replace_all(&cleaned, "");
    let cleaned = OSC_SEQUENCE.replace_all(&cleaned, "");
    let cleaned = SHORT_ESCAPE.replace_all(&cleaned, "");
    let cleaned = SGR_MOUSE_RESIDUE.replace_all(&cleaned, "");
    let cleaned = CONTROL_BYTES.replace_all(&cleaned, "");
    cleaned.trim().to_string()
}

/// Parse one raw line. Always returns exactly one record.
pub fn parse_line(line: &str) -> ParsedLine {
    let clean = sanitize(line);
    match parse_combined(&clean) {
        Some(event) => ParsedLine::Event(event),
        None => {
            tracing::debug!("Unparsed log line passed through raw: {:?}", clean);
            ParsedLine::Raw(clean)
        }
    }
}

fn parse_combined(line: &str) -> Option<LogEvent> {
    let caps = COMBINED_LOG.captures(line)?;

    let status: i32 = caps.name("status")?.as_str().parse().ok()?;
    let bytes = match caps.name("bytes").map(|m| m.as_str()) {
        Some("-") | None => 0,
        Some(n) => n.parse().unwrap_or(0),
    };

    let (method, path, protocol) = split_request(&unescape(&caps["request"]));

    Some(LogEvent {
        address: caps["addr"].to_string(),
        agent: caps
            .name("agent")
            .map(|m| unescape(m.as_str()))
            .unwrap_or_else(|| "-".to_string()),
        method,
        path,
        protocol,
        status,
        bytes,
        referrer: caps
            .name("referrer")
            .map(|m| unescape(m.as_str()))
            .unwrap_or_else(|| "-".to_string()),
        timestamp: parse_timestamp(&caps["time"]),
    })
}

/// Split `"GET /path HTTP/1.1"`. Anything that is not a method/path pair keeps the
/// whole request text as the path so binary probes stay countable.
fn split_request(request: &str) -> (String, String, String) {
    let parts: Vec<&str> = request.split(' ').filter(|p| !p.is_empty()).collect();
    match parts.as_slice() {
        [method, path, protocol] => (method.to_string(), path.to_string(), protocol.to_string()),
        [method, path] => (method.to_string(), path.to_string(), String::new()),
        [] => ("-".to_string(), "-".to_string(), String::new()),
        _ => ("-".to_string(), request.to_string(), String::new()),
    }
}

fn unescape(field: &str) -> String {
    field.replace("\\\"", "\"").replace("\\\\", "\\")
}

fn parse_timestamp(raw: &str) -> DateTime<FixedOffset> {
    DateTime::parse_from_str(raw, CLF_TIME_FORMAT).unwrap_or_else(|_| {
        tracing::debug!("Unparseable log timestamp {:?}, using ingest time", raw);
        Utc::now().fixed_offset()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const LINE: &str = r#"203.0.113.9 - - [10/Oct/2023:13:55:36 -0700] "GET /futureproof/index.md HTTP/1.1" 200 5120 "https://example.com/" "ExampleBot/2.1 (+http://example.com/bot)""#;

    fn event(parsed: ParsedLine) -> LogEvent {
        match parsed {
            ParsedLine::Event(e) => e,
            ParsedLine::Raw(raw) => panic!("expected event, got raw {raw:?}"),
        }
    }

    #[test]
    fn parses_combined_log_format() {
        let e = event(parse_line(LINE));
        assert_eq!(e.address, "203.0.113.9");
        assert_eq!(e.method, "GET");
        assert_eq!(e.path, "/futureproof/index.md");
        assert_eq!(e.protocol, "HTTP/1.1");
        assert_eq!(e.status, 200);
        assert_eq!(e.bytes, 5120);
        assert_eq!(e.referrer, "https://example.com/");
        assert_eq!(e.agent, "ExampleBot/2.1 (+http://example.com/bot)");
        assert_eq!(e.date().to_string(), "2023-10-10");
    }

    #[test]
    fn strips_terminal_noise_before_matching() {
        let noisy = format!("\x1b[32m\x1b[<35;12;40M{}\x1b[0m\r", LINE);
        let e = event(parse_line(&noisy));
        assert_eq!(e.address, "203.0.113.9");

        let residue = format!("[<64;80;23M{}", LINE);
        assert!(parse_line(&residue).is_event());
    }

    #[test]
    fn unmatched_lines_fall_back_to_raw() {
        for garbage in ["", "hello world", "\x1b[2J", "203.0.113.9 - - [10/Oct/2023"] {
            match parse_line(garbage) {
                ParsedLine::Raw(_) => {}
                other => panic!("expected raw for {garbage:?}, got {other:?}"),
            }
        }
        assert_eq!(parse_line("\x1b[1mboot ok\x1b[0m"), ParsedLine::Raw("boot ok".into()));
    }

    #[test]
    fn tolerates_odd_requests_and_missing_fields() {
        let probe = r#"198.51.100.4 - - [10/Oct/2023:13:55:36 +0000] "\x16\x03\x01" 400 - "-" "-""#;
        let e = event(parse_line(probe));
        assert_eq!(e.method, "-");
        assert_eq!(e.status, 400);
        assert_eq!(e.bytes, 0);

        let common = r#"198.51.100.4 - frank [10/Oct/2023:13:55:36 +0000] "HEAD /" 204 0"#;
        let e = event(parse_line(common));
        assert_eq!(e.method, "HEAD");
        assert_eq!(e.path, "/");
        assert_eq!(e.agent, "-");
    }

    #[test]
    fn cut_off_lines_are_not_events() {
        let cut = r#"203.0.113.9 - - [10/Oct/2023:13:55:36 -0700] "GET /x HTTP/1.1" 200 5120 "-" "Mozilla/5.0 (compat"#;
        assert!(!parse_line(cut).is_event());

        let cut_referrer = r#"203.0.113.9 - - [10/Oct/2023:13:55:36 -0700] "GET /x HTTP/1.1" 200 5120 "https://exa"#;
        assert!(!parse_line(cut_referrer).is_event());
    }

    #[test]
    fn keeps_escaped_quotes_inside_agent() {
        let line = r#"192.0.2.1 - - [10/Oct/2023:13:55:36 +0000] "GET / HTTP/1.1" 200 12 "-" "Weird \"Agent\" 1.0""#;
        assert_eq!(event(parse_line(line)).agent, "Weird \"Agent\" 1.0");
    }

    #[test]
    fn bad_timestamp_uses_ingest_time() {
        let line = r#"192.0.2.1 - - [yesterday-ish] "GET / HTTP/1.1" 200 12 "-" "curl/8.0""#;
        let e = event(parse_line(line));
        assert_eq!(e.date(), Utc::now().fixed_offset().date_naive());
    }
}
