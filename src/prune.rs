//! Prune: delete local objects that nothing needs any more.
//!
//! A run has three barrier groups. The producers (local enumeration, the
//! four retention sources and, when verifying, the remote reachability
//! scan) run in parallel and feed a bounded retention channel. A single
//! collector drains that channel into the retained set, and a single
//! progress task counts what happens. The collector only finishes after
//! every producer has been joined and the last sender dropped.
//!
//! Objects that are local but not retained are prunable. When verifying
//! with the remote, every prunable object is checked with a check-only
//! transfer queue; a prunable object that the remote can reach but did not
//! confirm aborts the run before anything is deleted.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::thread;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use crate::git::{GitRef, GitScanner, WrappedPointer};
use crate::pool::{TaskGroup, QUEUE_CAPACITY};
use crate::progress::humanize_bytes;
use crate::store::{LocalObject, LocalStore};
use crate::transfer::DownloadCheckable;
use crate::{ApiClient, Config, Error, Result, TransferQueue};

/// Options for one prune run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PruneOptions {
    /// Confirm prunable objects exist on the remote before deleting.
    pub verify_remote: bool,
    /// Report what would be deleted without deleting it.
    pub dry_run: bool,
    /// List every prunable object in the report.
    pub verbose: bool,
}

impl PruneOptions {
    /// Combine command-line flags with `lfs.pruneverifyremotealways`.
    pub fn resolve(
        verify_remote: bool,
        no_verify_remote: bool,
        dry_run: bool,
        verbose: bool,
        config: &Config,
    ) -> Result<Self> {
        if verify_remote && no_verify_remote {
            return Err(Error::Config(
                "cannot specify both --verify-remote and --no-verify-remote".into(),
            ));
        }
        Ok(PruneOptions {
            verify_remote: !no_verify_remote
                && (verify_remote || config.fetch_prune().prune_verify_remote_always),
            dry_run,
            verbose,
        })
    }
}

/// What a prune run found and did.
#[derive(Debug, Default)]
pub struct PruneReport {
    pub dry_run: bool,
    pub local_count: usize,
    /// Local objects kept because some retention source needs them.
    pub retained_count: usize,
    pub verified_count: usize,
    pub prunable: Vec<LocalObject>,
    pub prunable_size: u64,
    pub deleted: usize,
    /// Per-file delete failures.
    pub failures: Vec<String>,
    /// `Prune <oid>, <size>` lines, filled in verbose runs.
    pub verbose_lines: Vec<String>,
}

impl PruneReport {
    /// Human-readable summary of the run.
    pub fn summary_lines(&self) -> Vec<String> {
        let mut lines = Vec::new();
        if self.dry_run {
            lines.push(format!(
                "{} files would be pruned, {}",
                self.prunable.len(),
                humanize_bytes(self.prunable_size)
            ));
        } else {
            lines.push(format!(
                "Pruning {} files, {}",
                self.prunable.len(),
                humanize_bytes(self.prunable_size)
            ));
            lines.push(format!("Deleted {} files", self.deleted));
        }
        lines.extend(self.verbose_lines.iter().cloned());
        lines
    }

    /// Turn delete failures into an error.
    pub fn into_result(self) -> Result<Self> {
        if self.failures.is_empty() {
            Ok(self)
        } else {
            Err(Error::DeleteFailed {
                failures: self.failures,
            })
        }
    }
}

/// Split local objects into those some source retains and the prunable rest.
pub fn partition(local: &[LocalObject], retained: &HashSet<String>) -> (Vec<LocalObject>, Vec<LocalObject>) {
    local
        .iter()
        .cloned()
        .partition(|obj| retained.contains(&obj.oid.to_hex()))
}

/// Fail if any prunable object is reachable on the remote but was not
/// verified there. Objects the remote cannot reach need no verification.
pub fn check_verified(
    prunable: &[String],
    reachable: &HashSet<String>,
    verified: &HashSet<String>,
) -> Result<()> {
    let problems: Vec<String> = prunable
        .iter()
        .filter(|oid| !verified.contains(*oid) && reachable.contains(*oid))
        .cloned()
        .collect();

    if problems.is_empty() {
        Ok(())
    } else {
        Err(Error::RetentionSafetyViolation { oids: problems })
    }
}

/// Delete objects, continuing past failures.
///
/// Returns the number deleted and a message per failure.
pub fn delete_objects(store: &LocalStore, objects: &[LocalObject]) -> (usize, Vec<String>) {
    let mut deleted = 0;
    let mut failures = Vec::new();

    for (i, obj) in objects.iter().enumerate() {
        let path: PathBuf = store.object_path(&obj.oid);
        debug!("Deleting object {}/{}", i + 1, objects.len());
        match store.remove(&obj.oid) {
            Ok(true) => deleted += 1,
            Ok(false) => failures.push(format!("Failed to remove file {}: not found", path.display())),
            Err(e) => failures.push(format!("Failed to remove file {}: {}", path.display(), e)),
        }
    }

    for failure in &failures {
        warn!("{}", failure);
    }
    (deleted, failures)
}

#[derive(Debug, Clone, Copy)]
enum Progress {
    Local,
    Retain,
    Verify,
}

#[derive(Debug, Clone, Copy)]
enum RetentionSource {
    CurrentCheckout,
    RecentRefs,
    Unpushed,
    Worktree,
}

impl RetentionSource {
    const ALL: [RetentionSource; 4] = [
        RetentionSource::CurrentCheckout,
        RetentionSource::RecentRefs,
        RetentionSource::Unpushed,
        RetentionSource::Worktree,
    ];

    fn task_name(self) -> &'static str {
        match self {
            RetentionSource::CurrentCheckout => "prune-retain-current",
            RetentionSource::RecentRefs => "prune-retain-recent",
            RetentionSource::Unpushed => "prune-retain-unpushed",
            RetentionSource::Worktree => "prune-retain-worktree",
        }
    }
}

enum SourceOutput {
    Local(Result<Vec<LocalObject>>),
    Retained(Result<usize>),
    Reachable(Result<HashSet<String>>),
}

/// Runs prune against one store and repository.
pub struct Pruner<'a> {
    store: &'a LocalStore,
    scanner: &'a dyn GitScanner,
    client: &'a ApiClient,
    config: &'a Config,
    now: DateTime<Utc>,
}

impl<'a> Pruner<'a> {
    pub fn new(
        store: &'a LocalStore,
        scanner: &'a dyn GitScanner,
        client: &'a ApiClient,
        config: &'a Config,
    ) -> Self {
        Pruner {
            store,
            scanner,
            client,
            config,
            now: Utc::now(),
        }
    }

    /// Evaluate day windows against `now` instead of the current time.
    pub fn at(mut self, now: DateTime<Utc>) -> Self {
        self.now = now;
        self
    }

    pub fn run(&self, options: &PruneOptions) -> Result<PruneReport> {
        let remote = self.config.fetch_prune().prune_remote_name.as_str();
        info!(remote, verify = options.verify_remote, dry_run = options.dry_run, "prune starting");

        let (retain_tx, retain_rx) = sync_channel::<String>(QUEUE_CAPACITY);
        let (progress_tx, progress_rx) = sync_channel::<Progress>(QUEUE_CAPACITY);

        let (mut report, prunable_oids, reachable, verified) = thread::scope(|s| -> Result<_> {
            let mut progress = TaskGroup::new(s);
            progress.spawn("prune-progress", move || report_progress(progress_rx))?;

            let mut collector = TaskGroup::new(s);
            let collector_progress = progress_tx.clone();
            collector.spawn("prune-collect", move || collect_retained(retain_rx, collector_progress))?;

            let mut sources = TaskGroup::new(s);
            let local_progress = progress_tx.clone();
            sources.spawn("prune-local", move || {
                SourceOutput::Local(self.local_objects(&local_progress))
            })?;
            for source in RetentionSource::ALL {
                let tx = retain_tx.clone();
                sources.spawn(source.task_name(), move || {
                    SourceOutput::Retained(self.retain(source, remote, &tx))
                })?;
            }
            if options.verify_remote {
                sources.spawn("prune-reachable", move || {
                    SourceOutput::Reachable(self.reachable(remote))
                })?;
            }
            // the collector stops once the producers' clones are gone too
            drop(retain_tx);

            let mut local = Ok(Vec::new());
            let mut reachable = Ok(HashSet::new());
            for (name, output) in sources.wait() {
                match output {
                    SourceOutput::Local(result) => local = result,
                    SourceOutput::Retained(Ok(count)) => debug!(source = %name, count, "retention source done"),
                    SourceOutput::Retained(Err(e)) => {
                        warn!(source = %name, error = %e, "retention source failed, continuing")
                    }
                    SourceOutput::Reachable(result) => reachable = result,
                }
            }

            let retained = collector
                .wait()
                .pop()
                .map(|(_, set)| set)
                .unwrap_or_default();
            let local = local?;
            let reachable = reachable?;

            let (kept, prunable) = partition(&local, &retained);
            let prunable_oids: Vec<String> = prunable.iter().map(|o| o.oid.to_hex()).collect();

            let verified = if options.verify_remote && !options.dry_run && !prunable.is_empty() {
                self.verify(remote, &prunable, progress_tx.clone())?
            } else {
                HashSet::new()
            };

            drop(progress_tx);
            progress.wait();

            let report = PruneReport {
                dry_run: options.dry_run,
                local_count: local.len(),
                retained_count: kept.len(),
                verified_count: verified.len(),
                prunable_size: prunable.iter().map(|o| o.size).sum(),
                prunable,
                ..Default::default()
            };
            Ok((report, prunable_oids, reachable, verified))
        })?;

        if options.verify_remote && !options.dry_run {
            check_verified(&prunable_oids, &reachable, &verified)?;
        }

        if options.verbose {
            report.verbose_lines = report
                .prunable
                .iter()
                .map(|o| format!("Prune {}, {}", o.oid, humanize_bytes(o.size)))
                .collect();
        }

        if !options.dry_run {
            let (deleted, failures) = delete_objects(self.store, &report.prunable);
            report.deleted = deleted;
            report.failures = failures;
        }

        info!(
            local = report.local_count,
            retained = report.retained_count,
            prunable = report.prunable.len(),
            deleted = report.deleted,
            failed = report.failures.len(),
            "prune finished"
        );
        Ok(report)
    }

    fn local_objects(&self, progress: &SyncSender<Progress>) -> Result<Vec<LocalObject>> {
        let objects = self.store.scan()?;
        for _ in &objects {
            let _ = progress.send(Progress::Local);
        }
        Ok(objects)
    }

    fn retain(&self, source: RetentionSource, remote: &str, tx: &SyncSender<String>) -> Result<usize> {
        let pointers = match source {
            RetentionSource::CurrentCheckout => self.current_checkout()?,
            RetentionSource::RecentRefs => self.recent_refs()?,
            RetentionSource::Unpushed => self.scanner.scan_unpushed(remote)?,
            RetentionSource::Worktree => self.scanner.scan_worktree()?,
        };

        let count = pointers.len();
        for p in pointers {
            if tx.send(p.oid()).is_err() {
                break;
            }
        }
        Ok(count)
    }

    fn current_checkout(&self) -> Result<Vec<WrappedPointer>> {
        let head = self.scanner.current_ref()?;
        let mut pointers = self.scanner.scan_tree(&head.sha)?;
        pointers.extend(self.previous_versions(&head)?);
        Ok(pointers)
    }

    fn recent_refs(&self) -> Result<Vec<WrappedPointer>> {
        let fp = self.config.fetch_prune();
        if fp.fetch_recent_refs_days == 0 {
            return Ok(vec![]);
        }

        let since = self.now - days(fp.fetch_recent_refs_days + fp.prune_offset_days);
        let current = self.scanner.current_ref().ok();
        let mut pointers = Vec::new();
        for r in self
            .scanner
            .recent_refs(since, fp.fetch_recent_refs_include_remotes)?
        {
            if current.as_ref().is_some_and(|c| c.name == r.name) {
                continue;
            }
            if r.is_remote() && !fp.fetch_recent_refs_include_remotes {
                continue;
            }
            pointers.extend(self.scanner.scan_tree(&r.sha)?);
            pointers.extend(self.previous_versions(&r)?);
        }
        Ok(pointers)
    }

    fn previous_versions(&self, r: &GitRef) -> Result<Vec<WrappedPointer>> {
        let fp = self.config.fetch_prune();
        if fp.fetch_recent_commits_days == 0 {
            return Ok(vec![]);
        }
        let since = r.commit_date - days(fp.fetch_recent_commits_days + fp.prune_offset_days);
        self.scanner.scan_previous_versions(&r.sha, since)
    }

    fn reachable(&self, remote: &str) -> Result<HashSet<String>> {
        Ok(self
            .scanner
            .scan_remote_refs(remote)?
            .iter()
            .map(WrappedPointer::oid)
            .collect())
    }

    /// Ask the remote which prunable objects it has.
    fn verify(
        &self,
        remote: &str,
        prunable: &[LocalObject],
        progress: SyncSender<Progress>,
    ) -> Result<HashSet<String>> {
        let client = self.client.for_remote(remote);
        let mut queue = TransferQueue::download_check(client, self.config.concurrent_transfers());
        for obj in prunable {
            queue.add(Box::new(DownloadCheckable::new(&obj.oid.to_hex(), obj.size, "")))?;
        }
        let verified_rx = queue.watch();

        thread::scope(|s| {
            let mut drain = TaskGroup::new(s);
            drain.spawn("prune-verify", move || {
                let mut verified = HashSet::new();
                for oid in verified_rx {
                    let _ = progress.send(Progress::Verify);
                    verified.insert(oid);
                }
                verified
            })?;

            // the drain ends when the queue closes its watchers
            let summary = queue.wait();
            let verified = drain.wait().pop().map(|(_, v)| v).unwrap_or_default();

            for e in &summary?.errors {
                debug!(error = %e, "object not verified on remote");
            }
            Ok(verified)
        })
    }
}

fn collect_retained(rx: Receiver<String>, progress: SyncSender<Progress>) -> HashSet<String> {
    let mut retained = HashSet::new();
    for oid in rx {
        retained.insert(oid);
        let _ = progress.send(Progress::Retain);
    }
    retained
}

fn report_progress(rx: Receiver<Progress>) {
    let (mut local, mut retained, mut verified) = (0usize, 0usize, 0usize);
    for event in rx {
        match event {
            Progress::Local => local += 1,
            Progress::Retain => retained += 1,
            Progress::Verify => verified += 1,
        }
        if (local + retained + verified) % 100 == 0 {
            debug!(local, retained, verified, "prune progress");
        }
    }
    info!("{} local objects, {} retained, {} verified with remote", local, retained, verified);
}

fn days(n: u32) -> Duration {
    Duration::days(i64::from(n))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Oid;
    use proptest::prelude::*;

    fn obj(n: u8) -> LocalObject {
        LocalObject {
            oid: Oid::from_content(&[n]),
            size: n as u64,
        }
    }

    #[test]
    fn test_resolve_options() {
        let config = Config::default();
        assert!(PruneOptions::resolve(true, true, false, false, &config).is_err());
        assert!(PruneOptions::resolve(true, false, false, false, &config).unwrap().verify_remote);
        assert!(!PruneOptions::resolve(false, false, false, false, &config).unwrap().verify_remote);

        let always = Config::default().with_fetch_prune(crate::FetchPruneConfig {
            prune_verify_remote_always: true,
            ..Default::default()
        });
        assert!(PruneOptions::resolve(false, false, false, false, &always).unwrap().verify_remote);
        assert!(!PruneOptions::resolve(false, true, false, false, &always).unwrap().verify_remote);
    }

    #[test]
    fn test_safety_gate() {
        let prunable = vec!["abc".to_string()];
        let reachable: HashSet<String> = ["abc".to_string()].into();
        let verified = HashSet::new();

        match check_verified(&prunable, &reachable, &verified) {
            Err(Error::RetentionSafetyViolation { oids }) => assert_eq!(oids, vec!["abc"]),
            other => panic!("unexpected: {other:?}"),
        }

        // unreachable and unverified is fine
        assert!(check_verified(&prunable, &HashSet::new(), &verified).is_ok());
        // reachable and verified is fine
        assert!(check_verified(&prunable, &reachable, &reachable).is_ok());
    }

    #[test]
    fn test_delete_continues_past_failures() {
        let td = tempfile::TempDir::new().unwrap();
        let store = LocalStore::for_repo(td.path());

        let present = Oid::from_content(b"present");
        let mut w = store.writer(&present, 7).unwrap();
        std::io::Write::write_all(&mut w, b"present").unwrap();
        w.finish(&store).unwrap();

        let objects = vec![
            obj(1),
            LocalObject {
                oid: present.clone(),
                size: 7,
            },
        ];
        let (deleted, failures) = delete_objects(&store, &objects);
        assert_eq!(deleted, 1);
        assert_eq!(failures.len(), 1);
        assert!(!store.contains(&present));

        let report = PruneReport {
            failures,
            ..Default::default()
        };
        let err = report.into_result().unwrap_err();
        assert!(matches!(err, Error::DeleteFailed { .. }));
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn test_summary_lines() {
        let report = PruneReport {
            dry_run: true,
            prunable: vec![obj(1), obj(2)],
            prunable_size: 2048,
            ..Default::default()
        };
        assert_eq!(report.summary_lines(), vec!["2 files would be pruned, 2.0 KB"]);
    }

    proptest! {
        #[test]
        fn partition_is_exact(local_ids in proptest::collection::hash_set(0u8..64, 0..40),
                              retained_ids in proptest::collection::hash_set(0u8..96, 0..40)) {
            let local: Vec<LocalObject> = local_ids.iter().map(|n| obj(*n)).collect();
            let retained: HashSet<String> = retained_ids.iter().map(|n| obj(*n).oid.to_hex()).collect();

            let (kept, prunable) = partition(&local, &retained);

            let kept: HashSet<String> = kept.iter().map(|o| o.oid.to_hex()).collect();
            let prunable: HashSet<String> = prunable.iter().map(|o| o.oid.to_hex()).collect();
            let all: HashSet<String> = local.iter().map(|o| o.oid.to_hex()).collect();

            prop_assert!(kept.is_disjoint(&prunable));
            prop_assert_eq!(kept.union(&prunable).cloned().collect::<HashSet<_>>(), all);
            prop_assert!(kept.iter().all(|oid| retained.contains(oid)));
        }
    }
}
