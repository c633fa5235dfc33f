//! Filesystem evaluator.

use async_trait::async_trait;
use tracing::{debug, error, info};

use super::matching::parse_timestamp;
use super::{CheckResult, EvaluationReport, Evaluator};
use crate::connectors::filesystem::parse_octal_mode;
use crate::connectors::FilesystemConnector;
use crate::error::EvalError;
use crate::task::{EvalKind, FileKind, FileMetadata, FsAction, FsCheck, FsStep};

/// Runs an ordered list of filesystem steps. Mutating steps touch the
/// filesystem; assertion steps contribute one 0/1 check per entry.
pub struct FilesystemEvaluator {
    connector: FilesystemConnector,
    steps: Vec<FsStep>,
    reset_actions: Vec<FsAction>,
}

impl FilesystemEvaluator {
    pub fn new(
        connector: FilesystemConnector,
        steps: Vec<FsStep>,
        reset_actions: Vec<FsAction>,
    ) -> Self {
        Self {
            connector,
            steps,
            reset_actions,
        }
    }

    fn run(&self, report: &mut EvaluationReport) -> Result<(), EvalError> {
        for step in &self.steps {
            match step {
                FsStep::Action(action) => self.connector.apply(action)?,
                FsStep::Check(check) => self.check(check, report)?,
            }
        }
        Ok(())
    }

    fn check(&self, check: &FsCheck, report: &mut EvaluationReport) -> Result<(), EvalError> {
        match check {
            FsCheck::Exists(entries) => {
                for (path, expected) in entries {
                    let actual = self.connector.exists(path);
                    report.record(CheckResult::from_bool(actual == *expected, "exists", path, || {
                        format!("expected exists={}, found exists={}", expected, actual)
                    }));
                }
            }
            FsCheck::TypeCheck(entries) => {
                for (path, kind) in entries {
                    let passed = match kind {
                        FileKind::File => self.connector.is_file(path),
                        FileKind::Folder => self.connector.is_dir(path),
                    };
                    report.record(CheckResult::from_bool(passed, "type_check", path, || {
                        format!("expected a {:?}", kind).to_lowercase()
                    }));
                }
            }
            FsCheck::PermissionsCheck(entries) => {
                for (path, expected) in entries {
                    let actual = self.permissions(path, expected);
                    report.record(CheckResult::from_bool(
                        actual.as_deref() == Some(expected.as_str()),
                        "permissions_check",
                        path,
                        || {
                            let found = actual.as_deref().unwrap_or("nothing");
                            format!("expected {}, found {}", expected, found)
                        },
                    ));
                }
            }
            FsCheck::ContentCheck(entries) => {
                for (path, expected) in entries {
                    let passed = match self.connector.read_to_string(path) {
                        Ok(content) => content == *expected,
                        Err(e) => {
                            debug!("content_check could not read {}: {}", path, e);
                            false
                        }
                    };
                    report.record(CheckResult::from_bool(passed, "content_check", path, || {
                        "content does not match".to_string()
                    }));
                }
            }
            FsCheck::MetadataCheck(entries) => {
                for (path, expected) in entries {
                    let mismatch = self.metadata_mismatch(path, expected)?;
                    report.record(CheckResult::from_bool(
                        mismatch.is_none(),
                        "metadata_check",
                        path,
                        || mismatch.unwrap_or_default(),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Current permissions rendered in the same notation as `expected`.
    fn permissions(&self, path: &str, expected: &str) -> Option<String> {
        let stat = self.connector.stat(path).ok()?;
        match parse_octal_mode(expected) {
            Ok(bits) if stat.permissions() == bits => Some(expected.to_string()),
            Ok(_) => Some(format!("{:o}", stat.permissions())),
            Err(_) => Some(stat.symbolic_mode()),
        }
    }

    /// Describes the first metadata field that differs, if any.
    fn metadata_mismatch(
        &self,
        path: &str,
        expected: &FileMetadata,
    ) -> Result<Option<String>, EvalError> {
        let stat = match self.connector.stat(path) {
            Ok(stat) => stat,
            Err(e) => return Ok(Some(e.to_string())),
        };

        if let Some(value) = &expected.last_modified {
            if parse_timestamp(value)? != stat.modified.fixed_offset() {
                return Ok(Some(format!("last_modified is {}", stat.modified.to_rfc3339())));
            }
        }
        if let Some(value) = &expected.creation_time {
            if parse_timestamp(value)? != stat.changed.fixed_offset() {
                return Ok(Some(format!("creation_time is {}", stat.changed.to_rfc3339())));
            }
        }
        if let Some(size) = expected.size {
            if stat.size != size {
                return Ok(Some(format!("size is {}", stat.size)));
            }
        }
        if let Some(owner) = &expected.owner {
            if stat.owner.as_ref() != Some(owner) {
                return Ok(Some(format!("owner is {:?}", stat.owner)));
            }
        }
        if let Some(group) = &expected.group {
            if stat.group.as_ref() != Some(group) {
                return Ok(Some(format!("group is {:?}", stat.group)));
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl Evaluator for FilesystemEvaluator {
    fn kind(&self) -> EvalKind {
        EvalKind::Filesystem
    }

    async fn reset(&self) -> bool {
        for action in &self.reset_actions {
            if let Err(e) = self.connector.apply(action) {
                error!("Filesystem reset action {:?} failed: {}", action, e);
                return false;
            }
        }
        true
    }

    async fn evaluate(&self) -> EvaluationReport {
        let mut report = EvaluationReport::new();
        if let Err(e) = self.run(&mut report) {
            error!("An error occurred in Filesystem env: {}", e);
            report.abort(e);
        }
        info!("Filesystem evaluation score: {}", report.score);
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    fn evaluator(dir: &TempDir, steps: serde_json::Value) -> FilesystemEvaluator {
        let steps: Vec<FsStep> = serde_json::from_value(steps).unwrap();
        FilesystemEvaluator::new(
            FilesystemConnector::new(Some(dir.path().to_path_buf())),
            steps,
            Vec::new(),
        )
    }

    fn fixture() -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("tmp")).unwrap();
        fs::write(dir.path().join("tmp/test.txt"), "Hello World!").unwrap();
        fs::set_permissions(dir.path().join("tmp/test.txt"), fs::Permissions::from_mode(0o644))
            .unwrap();
        dir
    }

    #[tokio::test]
    async fn test_all_checks_pass() {
        let dir = fixture();
        let eval = evaluator(
            &dir,
            json!([
                {"exists": {"tmp/test.txt": true, "tmp/missing.txt": false}},
                {"type_check": {"tmp": "folder", "tmp/test.txt": "file"}},
                {"permissions_check": {"tmp/test.txt": "644"}},
                {"permissions_check": {"tmp/test.txt": "-rw-r--r--"}},
                {"content_check": {"tmp/test.txt": "Hello World!"}},
                {"metadata_check": {"tmp/test.txt": {"size": 12}}}
            ]),
        );
        let report = eval.evaluate().await;
        assert_eq!(report.score, 1.0, "{:?}", report.feedback());
        assert_eq!(report.checks.len(), 8);
    }

    #[tokio::test]
    async fn test_symbolic_permissions_render_special_bits() {
        let dir = fixture();
        fs::create_dir(dir.path().join("shared")).unwrap();
        fs::set_permissions(dir.path().join("shared"), fs::Permissions::from_mode(0o1777)).unwrap();
        fs::write(dir.path().join("tmp/run.sh"), "#!/bin/sh\n").unwrap();
        fs::set_permissions(dir.path().join("tmp/run.sh"), fs::Permissions::from_mode(0o4755))
            .unwrap();

        let eval = evaluator(
            &dir,
            json!([
                {"permissions_check": {"shared": "drwxrwxrwt", "tmp/run.sh": "-rwsr-xr-x"}},
                {"permissions_check": {"shared": "777", "tmp/run.sh": "755"}}
            ]),
        );
        let report = eval.evaluate().await;
        assert_eq!(report.score, 1.0, "{:?}", report.feedback());

        let plain = evaluator(&dir, json!([{"permissions_check": {"shared": "drwxrwxrwx"}}]));
        let report = plain.evaluate().await;
        assert_eq!(report.score, 0.0);
        assert!(report.checks[0].message.as_deref().unwrap_or_default().contains("drwxrwxrwt"));
    }

    /// Looks up the name for `id` in an `/etc/passwd` style database.
    fn name_for_id(db: &str, id: u32) -> Option<String> {
        fs::read_to_string(db).ok()?.lines().find_map(|line| {
            let fields: Vec<&str> = line.split(':').collect();
            (fields.get(2)?.parse::<u32>().ok()? == id).then(|| fields[0].to_string())
        })
    }

    #[tokio::test]
    async fn test_metadata_check_owner_group_and_times() {
        use chrono::{Local, SecondsFormat, TimeZone, Utc};
        use std::os::unix::fs::MetadataExt;
        use std::time::{Duration, UNIX_EPOCH};

        let dir = fixture();
        let file = dir.path().join("tmp/test.txt");
        fs::File::options()
            .write(true)
            .open(&file)
            .unwrap()
            .set_modified(UNIX_EPOCH + Duration::from_secs(1_700_000_000))
            .unwrap();

        let meta = fs::metadata(&file).unwrap();
        let owner = name_for_id("/etc/passwd", meta.uid());
        let group = name_for_id("/etc/group", meta.gid());
        let changed = Utc
            .timestamp_opt(meta.ctime(), (meta.ctime_nsec() / 1_000 * 1_000) as u32)
            .unwrap()
            .to_rfc3339_opts(SecondsFormat::Micros, true);
        let modified_local = Local
            .timestamp_opt(1_700_000_000, 0)
            .unwrap()
            .naive_local()
            .format("%Y-%m-%dT%H:%M:%S")
            .to_string();

        let stat = FilesystemConnector::new(Some(dir.path().to_path_buf()))
            .stat("tmp/test.txt")
            .unwrap();
        assert_eq!(stat.owner, owner);
        assert_eq!(stat.group, group);

        let mut expected = json!({
            "last_modified": "2023-11-14T22:13:20Z",
            "creation_time": changed,
            "size": 12
        });
        if let Some(owner) = &owner {
            expected["owner"] = json!(owner);
        }
        if let Some(group) = &group {
            expected["group"] = json!(group);
        }
        let eval = evaluator(
            &dir,
            json!([
                {"metadata_check": {"tmp/test.txt": expected}},
                {"metadata_check": {"tmp/test.txt": {"last_modified": modified_local}}}
            ]),
        );
        let report = eval.evaluate().await;
        assert_eq!(report.score, 1.0, "{:?}", report.feedback());

        let wrong = evaluator(
            &dir,
            json!([
                {"metadata_check": {"tmp/test.txt": {"last_modified": "2023-11-14T22:13:21Z"}}},
                {"metadata_check": {"tmp/test.txt": {"owner": "no-such-user-here"}}}
            ]),
        );
        let report = wrong.evaluate().await;
        assert_eq!(report.score, 0.0);
        assert!(report.checks.iter().all(|c| !c.passed));
    }

    #[tokio::test]
    async fn test_single_failure_zeroes_score() {
        let dir = fixture();
        let eval = evaluator(
            &dir,
            json!([
                {"exists": {"tmp/test.txt": true}},
                {"content_check": {"tmp/test.txt": "Goodbye"}},
                {"type_check": {"tmp": "folder"}}
            ]),
        );
        let report = eval.evaluate().await;
        assert_eq!(report.score, 0.0);
        let failed: Vec<_> = report.checks.iter().filter(|c| !c.passed).collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].check_type, "content_check");
    }

    #[tokio::test]
    async fn test_deleting_file_flips_only_its_check() {
        let dir = fixture();
        let steps = json!([
            {"exists": {"tmp/test.txt": true}},
            {"type_check": {"tmp": "folder"}}
        ]);
        assert_eq!(evaluator(&dir, steps.clone()).evaluate().await.score, 1.0);

        fs::remove_file(dir.path().join("tmp/test.txt")).unwrap();
        let report = evaluator(&dir, steps).evaluate().await;
        assert_eq!(report.score, 0.0);
        assert!(!report.checks[0].passed);
        assert!(report.checks[1].passed);
    }

    #[tokio::test]
    async fn test_steps_mutate_before_checks() {
        let dir = TempDir::new().unwrap();
        let eval = evaluator(
            &dir,
            json!([
                {"mkdir": {"path": "out"}},
                {"create_file": {"path": "out/a.txt", "content": "x"}},
                {"chmod": {"path": "out/a.txt", "mode": "600"}},
                {"permissions_check": {"out/a.txt": "600"}},
                {"content_check": {"out/a.txt": "x"}}
            ]),
        );
        assert_eq!(eval.evaluate().await.score, 1.0);
    }

    #[tokio::test]
    async fn test_execution_error_aborts_with_zero() {
        let dir = TempDir::new().unwrap();
        let eval = evaluator(
            &dir,
            json!([
                {"exists": {"anything": false}},
                {"rename": {"old_name": "nope.txt", "new_name": "other.txt"}},
                {"exists": {"other.txt": false}}
            ]),
        );
        let report = eval.evaluate().await;
        assert_eq!(report.score, 0.0);
        assert_eq!(report.errors.len(), 1);
        // the check after the failing step never ran
        assert_eq!(report.checks.len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_chmod_mode_aborts() {
        let dir = fixture();
        let eval = evaluator(&dir, json!([{"chmod": {"path": "tmp/test.txt", "mode": "rwx"}}]));
        let report = eval.evaluate().await;
        assert_eq!(report.score, 0.0);
        assert!(report.errors[0].contains("Invalid file mode"));
    }

    #[tokio::test]
    async fn test_reset_replays_actions() {
        let dir = fixture();
        let eval = FilesystemEvaluator::new(
            FilesystemConnector::new(Some(dir.path().to_path_buf())),
            Vec::new(),
            vec![
                FsAction::Rmdir { path: "tmp".into() },
                FsAction::Mkdir { path: "fresh".into() },
            ],
        );
        assert!(eval.reset().await);
        assert!(!dir.path().join("tmp").exists());
        assert!(dir.path().join("fresh").is_dir());

        let failing = FilesystemEvaluator::new(
            FilesystemConnector::new(Some(dir.path().to_path_buf())),
            Vec::new(),
            vec![FsAction::Rename {
                old_name: "ghost".into(),
                new_name: "x".into(),
            }],
        );
        assert!(!failing.reset().await);
    }
}
