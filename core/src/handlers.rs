//! Requirement handlers.
//!
//! Every requirement kind maps to one predicate over the active frame, the
//! journal, the audit trail and the target project's files. Handlers are pure
//! reads. Each failure carries a reason the operator can act on.
//!
//! Timestamps written by the filesystem and by the engine come from
//! different clocks, so file and journal checks accept anything within the
//! grace window before the last transition.

use std::fs;
use std::path::{Path, PathBuf};

use globset::GlobBuilder;
use regex::Regex;
use warden_types::{AuditTrail, GovernanceInstance, JournalEntry, Requirement, RequirementCheck};

/// Inputs every handler may read.
#[derive(Debug, Clone, Copy)]
pub struct GateContext<'a> {
    pub frame: &'a GovernanceInstance,
    pub entries: &'a [JournalEntry],
    pub audit: Option<&'a AuditTrail>,
    /// Relative requirement paths resolve against this directory.
    pub target_root: &'a Path,
    pub grace_ms: i64,
}

impl GateContext<'_> {
    fn threshold(&self) -> i64 {
        self.frame.last_transition - self.grace_ms
    }

    fn resolve(&self, path: &str) -> PathBuf {
        self.target_root.join(path)
    }

    fn is_fresh(&self, path: &Path) -> bool {
        modified_ms(path).is_some_and(|mtime| mtime >= self.threshold())
    }

    fn recent_entries(&self) -> impl Iterator<Item = &JournalEntry> {
        let since = self.threshold();
        self.entries.iter().filter(move |e| e.timestamp > since)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Pass,
    Fail(String),
}

impl Verdict {
    #[must_use]
    pub fn is_pass(&self) -> bool {
        matches!(self, Self::Pass)
    }

    #[must_use]
    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Pass => None,
            Self::Fail(reason) => Some(reason),
        }
    }

    fn fail(reason: impl Into<String>) -> Self {
        Self::Fail(reason.into())
    }
}

fn modified_ms(path: &Path) -> Option<i64> {
    let modified = fs::metadata(path).and_then(|m| m.modified()).ok()?;
    Some(warden_utils::system_time_ms(modified))
}

#[must_use]
pub fn evaluate(requirement: &Requirement, ctx: &GateContext<'_>) -> Verdict {
    match &requirement.check {
        RequirementCheck::FileFreshness { target } => file_freshness(target, ctx),
        RequirementCheck::FileExists { path, freshness } => file_exists(path, *freshness, ctx),
        RequirementCheck::CommandLog { pattern } => command_log(pattern, ctx),
        RequirementCheck::RegexMatchOutput { pattern } => regex_match_output(pattern, ctx),
        RequirementCheck::SubProtocolComplete { protocol_id } => {
            sub_protocol_complete(protocol_id, ctx)
        }
        RequirementCheck::Unsupported { kind, reason } => {
            tracing::warn!(kind = %kind, "Unsupported requirement fails closed: {reason}");
            Verdict::fail(reason.clone())
        }
    }
}

/// Evaluates in iteration order and returns `(id, reason)` for each failure.
pub fn evaluate_all<'r, I>(requirements: I, ctx: &GateContext<'_>) -> Vec<(String, String)>
where
    I: IntoIterator<Item = (&'r str, &'r Requirement)>,
{
    requirements
        .into_iter()
        .filter_map(|(id, req)| match evaluate(req, ctx) {
            Verdict::Pass => None,
            Verdict::Fail(reason) => Some((id.to_string(), reason)),
        })
        .collect()
}

fn file_freshness(target: &str, ctx: &GateContext<'_>) -> Verdict {
    if ctx.is_fresh(&ctx.resolve(target)) {
        Verdict::Pass
    } else {
        Verdict::fail(format!("File {target} is stale or missing."))
    }
}

fn has_glob_meta(path: &str) -> bool {
    path.contains(['*', '?', '['])
}

fn file_exists(pattern: &str, freshness: bool, ctx: &GateContext<'_>) -> Verdict {
    if !has_glob_meta(pattern) {
        let path = ctx.resolve(pattern);
        if !path.exists() {
            return Verdict::fail(format!("File {pattern} missing."));
        }
        if freshness && !ctx.is_fresh(&path) {
            return Verdict::fail(format!("File {pattern} is stale."));
        }
        return Verdict::Pass;
    }

    let components: Vec<&str> = pattern.split('/').filter(|c| !c.is_empty()).collect();
    let split = components
        .iter()
        .position(|c| has_glob_meta(c))
        .unwrap_or(components.len());
    let (base, rest) = components.split_at(split);
    let mut base_rel = if pattern.starts_with('/') {
        PathBuf::from("/")
    } else {
        PathBuf::new()
    };
    base_rel.extend(base);
    let glob = rest.join("/");
    let matcher = match GlobBuilder::new(&glob).literal_separator(true).build() {
        Ok(glob) => glob.compile_matcher(),
        Err(e) => return Verdict::fail(format!("Invalid pattern '{pattern}': {e}")),
    };
    let depth = if rest.contains(&"**") {
        usize::MAX
    } else {
        rest.len()
    };

    let dir = ctx.target_root.join(&base_rel);
    if !dir.is_dir() {
        return Verdict::fail(format!("Directory {} missing.", base_rel.display()));
    }
    let mut matches = Vec::new();
    collect_files(&dir, Path::new(""), depth, &mut |rel, path| {
        if matcher.is_match(rel) {
            matches.push(path.to_path_buf());
        }
    });

    if matches.is_empty() {
        return Verdict::fail(format!("No files matching {pattern} found."));
    }
    if freshness && !matches.iter().any(|p| ctx.is_fresh(p)) {
        return Verdict::fail(format!("No fresh files matching {pattern} found."));
    }
    Verdict::Pass
}

/// Visits regular files under `dir` at most `depth` levels down, passing the
/// path relative to `dir`. Symlinked directories are not followed.
fn collect_files(dir: &Path, rel: &Path, depth: usize, visit: &mut dyn FnMut(&Path, &Path)) {
    if depth == 0 {
        return;
    }
    let Ok(read_dir) = fs::read_dir(dir) else {
        return;
    };
    for entry in read_dir.filter_map(Result::ok) {
        let Ok(file_type) = entry.file_type() else {
            continue;
        };
        let path = entry.path();
        let child_rel = rel.join(entry.file_name());
        if file_type.is_file() {
            visit(&child_rel, &path);
        } else if file_type.is_dir() {
            collect_files(&path, &child_rel, depth - 1, visit);
        }
    }
}

fn command_log(pattern: &str, ctx: &GateContext<'_>) -> Verdict {
    if ctx.recent_entries().any(|e| e.command.contains(pattern)) {
        Verdict::Pass
    } else {
        Verdict::fail(format!(
            "Command matching pattern '{pattern}' not found in recent session log."
        ))
    }
}

fn regex_match_output(pattern: &str, ctx: &GateContext<'_>) -> Verdict {
    let regex = match Regex::new(pattern) {
        Ok(regex) => regex,
        Err(e) => return Verdict::fail(format!("Invalid output pattern '{pattern}': {e}")),
    };
    if ctx.recent_entries().any(|e| regex.is_match(&e.output)) {
        Verdict::Pass
    } else {
        Verdict::fail(format!(
            "Required output pattern '{pattern}' not found in recent session logs."
        ))
    }
}

fn sub_protocol_complete(protocol_id: &str, ctx: &GateContext<'_>) -> Verdict {
    let Some(audit) = ctx.audit else {
        return Verdict::fail("No audit trail.");
    };
    if audit.initialized_after(protocol_id, ctx.frame.start_time) {
        Verdict::Pass
    } else {
        Verdict::fail(format!("Mandatory sub-protocol '{protocol_id}' not executed."))
    }
}

#[cfg(test)]
mod tests {
    use std::fs::{self, File, FileTimes};
    use std::path::Path;
    use std::time::{Duration, SystemTime};

    use warden_types::{
        AuditRecord, AuditTrail, EntrySource, GovernanceInstance, JournalEntry, Requirement,
        RequirementCheck,
    };

    use super::{GateContext, Verdict, evaluate, evaluate_all};

    const GRACE: i64 = 2000;

    fn touch(path: &Path, mtime_ms: i64) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        let file = File::create(path).unwrap();
        let at = SystemTime::UNIX_EPOCH + Duration::from_millis(mtime_ms as u64);
        file.set_times(FileTimes::new().set_modified(at)).unwrap();
    }

    fn frame(start: i64, last_transition: i64) -> GovernanceInstance {
        let mut frame = GovernanceInstance::new("P", "A", "o", start);
        frame.last_transition = last_transition;
        frame
    }

    fn ctx<'a>(
        frame: &'a GovernanceInstance,
        entries: &'a [JournalEntry],
        audit: Option<&'a AuditTrail>,
        root: &'a Path,
    ) -> GateContext<'a> {
        GateContext {
            frame,
            entries,
            audit,
            target_root: root,
            grace_ms: GRACE,
        }
    }

    fn req(check: RequirementCheck) -> Requirement {
        Requirement::new(check)
    }

    #[test]
    fn freshness_respects_grace_window() {
        let dir = tempfile::tempdir().unwrap();
        let m = 1_700_000_000_000;
        touch(&dir.path().join("PLAN.md"), m);
        let check = req(RequirementCheck::FileFreshness {
            target: "PLAN.md".to_string(),
        });

        let late = frame(0, m + 5000);
        assert!(!evaluate(&check, &ctx(&late, &[], None, dir.path())).is_pass());

        let close = frame(0, m + 500);
        assert_eq!(evaluate(&check, &ctx(&close, &[], None, dir.path())), Verdict::Pass);
    }

    #[test]
    fn freshness_fails_for_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let f = frame(0, 0);
        let verdict = evaluate(
            &req(RequirementCheck::FileFreshness {
                target: "nope.md".to_string(),
            }),
            &ctx(&f, &[], None, dir.path()),
        );
        assert_eq!(verdict.reason(), Some("File nope.md is stale or missing."));
    }

    #[test]
    fn file_exists_glob_needs_a_match() {
        let dir = tempfile::tempdir().unwrap();
        let f = frame(0, 10_000);
        let check = req(RequirementCheck::FileExists {
            path: "docs/*.md".to_string(),
            freshness: false,
        });
        assert!(
            evaluate(&check, &ctx(&f, &[], None, dir.path()))
                .reason()
                .unwrap()
                .contains("missing")
        );

        touch(&dir.path().join("docs/notes.txt"), 10_000);
        assert!(!evaluate(&check, &ctx(&f, &[], None, dir.path())).is_pass());

        touch(&dir.path().join("docs/guide.md"), 1_000);
        assert!(evaluate(&check, &ctx(&f, &[], None, dir.path())).is_pass());
    }

    #[test]
    fn file_exists_glob_with_freshness() {
        let dir = tempfile::tempdir().unwrap();
        let f = frame(0, 100_000);
        touch(&dir.path().join("out/old.json"), 1_000);
        let check = req(RequirementCheck::FileExists {
            path: "out/*.json".to_string(),
            freshness: true,
        });
        assert!(!evaluate(&check, &ctx(&f, &[], None, dir.path())).is_pass());

        touch(&dir.path().join("out/new.json"), 99_000);
        assert!(evaluate(&check, &ctx(&f, &[], None, dir.path())).is_pass());
    }

    #[test]
    fn file_exists_glob_in_directory_part() {
        let dir = tempfile::tempdir().unwrap();
        let f = frame(0, 10_000);
        let nested = req(RequirementCheck::FileExists {
            path: "docs/**/*.md".to_string(),
            freshness: false,
        });
        let one_level = req(RequirementCheck::FileExists {
            path: "pkg/*/README.md".to_string(),
            freshness: false,
        });
        assert!(!evaluate(&nested, &ctx(&f, &[], None, dir.path())).is_pass());

        touch(&dir.path().join("docs/api/v1/endpoints.md"), 1_000);
        assert!(evaluate(&nested, &ctx(&f, &[], None, dir.path())).is_pass());

        touch(&dir.path().join("pkg/a/b/README.md"), 1_000);
        assert!(!evaluate(&one_level, &ctx(&f, &[], None, dir.path())).is_pass());
        touch(&dir.path().join("pkg/core/README.md"), 1_000);
        assert!(evaluate(&one_level, &ctx(&f, &[], None, dir.path())).is_pass());
    }

    #[test]
    fn plain_file_exists() {
        let dir = tempfile::tempdir().unwrap();
        let f = frame(0, 0);
        let check = req(RequirementCheck::FileExists {
            path: "PLAN.md".to_string(),
            freshness: false,
        });
        assert!(!evaluate(&check, &ctx(&f, &[], None, dir.path())).is_pass());
        touch(&dir.path().join("PLAN.md"), 0);
        assert!(evaluate(&check, &ctx(&f, &[], None, dir.path())).is_pass());
    }

    #[test]
    fn journal_checks_only_see_recent_entries() {
        let dir = tempfile::tempdir().unwrap();
        let f = frame(0, 10_000);
        let entries = [
            JournalEntry::new(1_000, "cargo test", EntrySource::AgentExec, "P")
                .with_output("test result: ok"),
            JournalEntry::new(9_000, "cargo fmt", EntrySource::AgentExec, "P")
                .with_output("formatted 3 files"),
        ];
        let c = ctx(&f, &entries, None, dir.path());

        let test_log = req(RequirementCheck::CommandLog {
            pattern: "cargo test".to_string(),
        });
        assert!(!evaluate(&test_log, &c).is_pass());
        let fmt_log = req(RequirementCheck::CommandLog {
            pattern: "fmt".to_string(),
        });
        assert!(evaluate(&fmt_log, &c).is_pass());

        let output = req(RequirementCheck::RegexMatchOutput {
            pattern: r"formatted \d+ files".to_string(),
        });
        assert!(evaluate(&output, &c).is_pass());
        let invalid = req(RequirementCheck::RegexMatchOutput {
            pattern: "(".to_string(),
        });
        assert!(evaluate(&invalid, &c).reason().unwrap().contains("Invalid"));
    }

    #[test]
    fn sub_protocol_must_start_during_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let f = frame(5_000, 5_000);
        let check = req(RequirementCheck::SubProtocolComplete {
            protocol_id: "REVIEW".to_string(),
        });
        assert_eq!(
            evaluate(&check, &ctx(&f, &[], None, dir.path())).reason(),
            Some("No audit trail.")
        );

        let before = AuditTrail {
            history: vec![AuditRecord::initialize(4_000, "REVIEW", "o", 2)],
        };
        assert!(!evaluate(&check, &ctx(&f, &[], Some(&before), dir.path())).is_pass());

        let during = AuditTrail {
            history: vec![AuditRecord::initialize(6_000, "REVIEW", "o", 2)],
        };
        assert!(evaluate(&check, &ctx(&f, &[], Some(&during), dir.path())).is_pass());
    }

    #[test]
    fn unsupported_fails_closed() {
        let dir = tempfile::tempdir().unwrap();
        let f = frame(0, 0);
        let check = req(RequirementCheck::Unsupported {
            kind: "telepathy".to_string(),
            reason: "unknown requirement type 'telepathy'".to_string(),
        });
        let failures = evaluate_all([("mind", &check)], &ctx(&f, &[], None, dir.path()));
        assert_eq!(
            failures,
            [(
                "mind".to_string(),
                "unknown requirement type 'telepathy'".to_string()
            )]
        );
    }
}
