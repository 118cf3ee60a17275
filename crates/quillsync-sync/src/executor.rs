//! Plan executor
//!
//! Drives the planned actions through the drivers, strictly in plan
//! order. Every action is logged with its verb and subject path; in
//! dry-run mode that log line is all that happens. The first failure
//! stops the run and is surfaced with the subject path attached -
//! nothing is retried, the next run reconciles whatever state the
//! device was left in.

use std::sync::Arc;

use quillsync_core::ports::Driver;
use quillsync_core::SyncError;

use crate::planner::{Action, ActionVerb, Target};

pub struct Executor {
    source: Arc<dyn Driver>,
    destination: Arc<dyn Driver>,
}

impl Executor {
    pub fn new(source: Arc<dyn Driver>, destination: Arc<dyn Driver>) -> Self {
        Self {
            source,
            destination,
        }
    }

    /// Runs the whole plan, or logs it when `dry_run` is set.
    pub async fn run(&self, actions: &[Action], dry_run: bool) -> Result<(), SyncError> {
        for action in actions {
            let driver = match action.target {
                Target::Source => &self.source,
                Target::Destination => &self.destination,
            };
            let subject = if action.object.is_dir { "directory" } else { "file" };
            tracing::info!(
                actor = driver.name(),
                action = action.verb.as_str(),
                subject,
                path = %action.object.full_path,
                "Executing"
            );
            if dry_run {
                continue;
            }

            let result = match action.verb {
                ActionVerb::MkDir => driver.mkdir(&action.object).await,
                ActionVerb::Remove => driver.remove(&action.object).await,
                ActionVerb::Copy => driver.copy(&action.object).await,
            };
            if let Err(source) = result {
                return Err(SyncError::Transport {
                    operation: action.verb.as_str(),
                    path: action.object.full_path.clone(),
                    source,
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::Mutex;

    use quillsync_core::{ObjectInfo, ObjectSet};

    #[derive(Default)]
    struct RecordingDriver {
        calls: Mutex<Vec<String>>,
        fail_on: Option<String>,
    }

    impl RecordingDriver {
        fn record(&self, verb: &str, obj: &ObjectInfo) -> anyhow::Result<()> {
            self.calls.lock().unwrap().push(format!("{verb} {}", obj.full_path));
            if self.fail_on.as_deref() == Some(obj.full_path.as_str()) {
                anyhow::bail!("simulated failure");
            }
            Ok(())
        }
    }

    #[async_trait]
    impl Driver for RecordingDriver {
        fn name(&self) -> &'static str {
            "recording"
        }
        fn unique_id(&self) -> String {
            "recording".to_string()
        }
        async fn enumerate(&self) -> anyhow::Result<ObjectSet> {
            Ok(ObjectSet::new())
        }
        async fn mkdir(&self, obj: &ObjectInfo) -> anyhow::Result<()> {
            self.record("mkdir", obj)
        }
        async fn remove(&self, obj: &ObjectInfo) -> anyhow::Result<()> {
            self.record("remove", obj)
        }
        async fn copy(&self, obj: &ObjectInfo) -> anyhow::Result<()> {
            self.record("copy", obj)
        }
        async fn disconnect(&self) {}
    }

    fn action(target: Target, verb: ActionVerb, path: &str) -> Action {
        Action {
            target,
            verb,
            object: ObjectInfo::file(path, 1, Utc::now()),
        }
    }

    fn plan() -> Vec<Action> {
        vec![
            action(Target::Destination, ActionVerb::MkDir, "documents/mybooks"),
            action(Target::Destination, ActionVerb::Copy, "documents/mybooks/a.azw3"),
            action(Target::Source, ActionVerb::Remove, "/books/b.azw3"),
        ]
    }

    #[tokio::test]
    async fn actions_run_in_order_on_the_right_driver() {
        let source = Arc::new(RecordingDriver::default());
        let destination = Arc::new(RecordingDriver::default());
        let executor = Executor::new(source.clone(), destination.clone());

        executor.run(&plan(), false).await.unwrap();

        assert_eq!(
            *destination.calls.lock().unwrap(),
            vec!["mkdir documents/mybooks", "copy documents/mybooks/a.azw3"]
        );
        assert_eq!(*source.calls.lock().unwrap(), vec!["remove /books/b.azw3"]);
    }

    #[tokio::test]
    async fn dry_run_touches_nothing() {
        let source = Arc::new(RecordingDriver::default());
        let destination = Arc::new(RecordingDriver::default());
        let executor = Executor::new(source.clone(), destination.clone());

        executor.run(&plan(), true).await.unwrap();

        assert!(source.calls.lock().unwrap().is_empty());
        assert!(destination.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn first_failure_halts_the_run() {
        let source = Arc::new(RecordingDriver::default());
        let destination = Arc::new(RecordingDriver {
            fail_on: Some("documents/mybooks/a.azw3".to_string()),
            ..RecordingDriver::default()
        });
        let executor = Executor::new(source.clone(), destination.clone());

        let err = executor.run(&plan(), false).await.unwrap_err();
        match err {
            SyncError::Transport { operation, path, .. } => {
                assert_eq!(operation, "Copy");
                assert_eq!(path, "documents/mybooks/a.azw3");
            }
            other => panic!("unexpected error: {other}"),
        }
        // the action after the failure never ran
        assert!(source.calls.lock().unwrap().is_empty());
    }
}
