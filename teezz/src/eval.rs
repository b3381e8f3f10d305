//! Evaluation / reporting (spec.md §4.7). Promoted to a full module by
//! SPEC_FULL.md §4.7 since it is ambient reporting infrastructure, not a
//! fuzzing feature. Parses device-side log lines of the form
//! `hh:mm:ss:ns;<cmd>;<ioctl_ret>;<status>;<origin>;<smc_flag>` and
//! aggregates per-TEE per-command `{ioctl_total, ioctl_success, smc_total,
//! smc_valid}` counts.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Which validity predicate applies to `smc_valid` for a logged line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TeeVariant {
    Triangle,
    TriangleLite,
    Optee,
    Qsee,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogLine {
    pub timestamp: String,
    pub cmd: String,
    pub ioctl_ret: i64,
    pub status: i64,
    pub origin: i64,
    pub smc_flag: i64,
}

/// Parses one `hh:mm:ss:ns;<cmd>;<ioctl_ret>;<status>;<origin>;<smc_flag>`
/// line. Returns `None` for malformed lines (wrong field count, or a
/// non-numeric field where one is expected) and for sentinel lines
/// (`cmd` empty or `"-"`), both silently filtered per spec.md §4.7.
pub fn parse_line(line: &str) -> Option<LogLine> {
    let fields: Vec<&str> = line.trim().split(';').collect();
    if fields.len() != 6 {
        return None;
    }
    let [timestamp, cmd, ioctl_ret, status, origin, smc_flag] = fields[..] else {
        return None;
    };
    if cmd.is_empty() || cmd == "-" {
        return None;
    }
    Some(LogLine {
        timestamp: timestamp.to_string(),
        cmd: cmd.to_string(),
        ioctl_ret: ioctl_ret.parse().ok()?,
        status: status.parse().ok()?,
        origin: origin.parse().ok()?,
        smc_flag: smc_flag.parse().ok()?,
    })
}

/// Per-command aggregate counters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommandStats {
    pub ioctl_total: u64,
    pub ioctl_success: u64,
    pub smc_total: u64,
    pub smc_valid: u64,
}

/// `origin ∈ {0,3,4}` and `status ∉ {1,2,3}` (Triangle / Triangle-lite).
fn smc_valid_triangle(line: &LogLine) -> bool {
    matches!(line.origin, 0 | 3 | 4) && !matches!(line.status, 1 | 2 | 3)
}

/// `origin ∈ {0,3,4}` (Optee).
fn smc_valid_optee(line: &LogLine) -> bool {
    matches!(line.origin, 0 | 3 | 4)
}

/// `origin == 0 && status == 0` (Qsee).
fn smc_valid_qsee(line: &LogLine) -> bool {
    line.origin == 0 && line.status == 0
}

fn smc_valid(variant: TeeVariant, line: &LogLine) -> bool {
    match variant {
        TeeVariant::Triangle | TeeVariant::TriangleLite => smc_valid_triangle(line),
        TeeVariant::Optee => smc_valid_optee(line),
        TeeVariant::Qsee => smc_valid_qsee(line),
    }
}

/// Folds a stream of log lines into per-command stats for one TEE
/// variant, skipping lines that fail to parse.
pub fn aggregate<'a>(variant: TeeVariant, lines: impl IntoIterator<Item = &'a str>) -> HashMap<String, CommandStats> {
    let mut by_cmd: HashMap<String, CommandStats> = HashMap::new();
    for raw in lines {
        let Some(parsed) = parse_line(raw) else {
            continue;
        };
        let entry = by_cmd.entry(parsed.cmd.clone()).or_default();
        entry.ioctl_total += 1;
        if parsed.ioctl_ret == 0 {
            entry.ioctl_success += 1;
        }
        entry.smc_total += 1;
        if smc_valid(variant, &parsed) {
            entry.smc_valid += 1;
        }
    }
    by_cmd
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_and_sentinel_lines_are_filtered() {
        assert!(parse_line("not;enough;fields").is_none());
        assert!(parse_line("12:00:00:0;-;0;0;0;0").is_none());
        assert!(parse_line("12:00:00:0;open;oops;0;0;0").is_none());
    }

    #[test]
    fn well_formed_line_parses_every_field() {
        let line = parse_line("08:15:30:123;open_session;0;0;3;1").unwrap();
        assert_eq!(line.cmd, "open_session");
        assert_eq!(line.ioctl_ret, 0);
        assert_eq!(line.origin, 3);
    }

    #[test]
    fn triangle_validity_excludes_the_blacklisted_statuses() {
        let valid = LogLine { timestamp: "".into(), cmd: "c".into(), ioctl_ret: 0, status: 0, origin: 0, smc_flag: 0 };
        let invalid = LogLine { status: 2, ..valid.clone() };
        assert!(smc_valid_triangle(&valid));
        assert!(!smc_valid_triangle(&invalid));
    }

    #[test]
    fn qsee_validity_requires_both_origin_and_status_zero() {
        let valid = LogLine { timestamp: "".into(), cmd: "c".into(), ioctl_ret: 0, status: 0, origin: 0, smc_flag: 0 };
        let bad_status = LogLine { status: 1, ..valid.clone() };
        assert!(smc_valid_qsee(&valid));
        assert!(!smc_valid_qsee(&bad_status));
    }

    #[test]
    fn aggregate_counts_per_command_across_a_mixed_log() {
        let lines = vec![
            "00:00:00:0;invoke;0;0;0;0",
            "00:00:00:1;invoke;1;0;0;0",
            "00:00:00:2;open;0;2;0;0",
            "garbage",
        ];
        let stats = aggregate(TeeVariant::Optee, lines);
        let invoke = &stats["invoke"];
        assert_eq!(invoke.ioctl_total, 2);
        assert_eq!(invoke.ioctl_success, 1);
        assert_eq!(invoke.smc_valid, 2);

        let open = &stats["open"];
        assert_eq!(open.smc_valid, 1);
    }
}
