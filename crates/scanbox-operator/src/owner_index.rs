//! Owner index: which jobs belong to which scan.
//!
//! Jobs created by the operator carry a controller owner reference naming the
//! scan that caused them. The index maps each scan's UID to the jobs whose
//! controller reference names it, ignoring references to any other kind or API
//! group.
//!
//! ## Maintenance
//!
//! The index is written only by the surrounding infrastructure:
//!
//! - [`OwnerIndex::rebuild`] once at startup from a full job listing,
//! - [`OwnerIndexWriter`] for the job watch stream afterwards,
//! - the job submission layer, which records the job it just created.
//!
//! A re-list snapshot can be older than a job the submission layer recorded
//! while the list was running. Jobs applied between
//! [`OwnerIndex::begin_relist`] and the following rebuild are therefore kept
//! when the snapshot does not contain them.
//!
//! The reconciliation engine only reads through [`OwnerLookup`], and every
//! lookup fails with [`Error::IndexNotReady`] until the first rebuild.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use k8s_openapi::api::batch::v1::Job;
use kube::ResourceExt;
use kube::runtime::watcher;

use crate::crd::{Scan, scan_api_version, scan_kind};
use crate::error::{Error, Result};

/// Identity of an owning scan (its UID).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OwnerKey(String);

impl OwnerKey {
    /// Creates an owner key from a scan UID.
    #[must_use]
    pub fn new(uid: impl Into<String>) -> Self {
        Self(uid.into())
    }

    /// Returns the key of a scan, or `None` if the scan has no UID yet.
    #[must_use]
    pub fn of_scan(scan: &Scan) -> Option<Self> {
        scan.uid().filter(|uid| !uid.is_empty()).map(Self)
    }

    /// Returns the key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for OwnerKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Extracts the owning scan of a job.
///
/// Returns `None` unless the job has a controller owner reference whose kind
/// and API version identify a [`Scan`].
#[must_use]
pub fn owner_key(job: &Job) -> Option<OwnerKey> {
    let owner = job
        .metadata
        .owner_references
        .as_ref()?
        .iter()
        .find(|owner| owner.controller == Some(true))?;

    if owner.api_version != scan_api_version() || owner.kind != scan_kind() {
        return None;
    }
    Some(OwnerKey::new(owner.uid.clone()))
}

/// Read capability handed to the reconciliation engine.
#[async_trait]
pub trait OwnerLookup: Send + Sync {
    /// Returns the jobs owned by `owner`, ordered by namespace and name.
    async fn owned_jobs(&self, owner: &OwnerKey) -> Result<Vec<Arc<Job>>>;
}

/// Namespace and name of an indexed job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
struct JobRef {
    namespace: String,
    name: String,
}

impl JobRef {
    fn of(job: &Job) -> Option<Self> {
        Some(Self {
            namespace: job.namespace().unwrap_or_default(),
            name: job.metadata.name.clone()?,
        })
    }
}

#[derive(Debug, Default)]
struct IndexState {
    by_owner: HashMap<OwnerKey, BTreeMap<JobRef, Arc<Job>>>,
    owner_of: HashMap<JobRef, OwnerKey>,
    // Jobs applied since the current re-list started, if one is running.
    applied_during_relist: Option<HashMap<JobRef, Job>>,
}

impl IndexState {
    fn insert(&mut self, job: Job) {
        let Some(job_ref) = JobRef::of(&job) else {
            return;
        };
        self.evict(&job_ref);

        if let Some(owner) = owner_key(&job) {
            self.owner_of.insert(job_ref.clone(), owner.clone());
            self.by_owner
                .entry(owner)
                .or_default()
                .insert(job_ref, Arc::new(job));
        }
    }

    fn evict(&mut self, job_ref: &JobRef) {
        let Some(owner) = self.owner_of.remove(job_ref) else {
            return;
        };
        if let Some(jobs) = self.by_owner.get_mut(&owner) {
            jobs.remove(job_ref);
            if jobs.is_empty() {
                self.by_owner.remove(&owner);
            }
        }
    }
}

/// Shared, concurrency-safe owner index.
#[derive(Debug, Default)]
pub struct OwnerIndex {
    state: RwLock<IndexState>,
    ready: AtomicBool,
}

/// Converts a lock poison error to an internal error.
fn poison_err<T>(_: PoisonError<T>) -> Error {
    Error::internal("owner index lock poisoned")
}

impl OwnerIndex {
    /// Creates an empty, uninitialized index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts recording applied jobs for the next [`rebuild`](Self::rebuild).
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn begin_relist(&self) -> Result<()> {
        self.state.write().map_err(poison_err)?.applied_during_relist = Some(HashMap::new());
        Ok(())
    }

    /// Replaces the index with the given jobs and marks it ready.
    ///
    /// Jobs applied since [`begin_relist`](Self::begin_relist) that are not
    /// part of `jobs` are carried over.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn rebuild(&self, jobs: impl IntoIterator<Item = Job>) -> Result<()> {
        let mut fresh = IndexState::default();
        let mut listed = HashSet::new();
        for job in jobs {
            if let Some(job_ref) = JobRef::of(&job) {
                listed.insert(job_ref);
            }
            fresh.insert(job);
        }

        let mut state = self.state.write().map_err(poison_err)?;
        if let Some(applied) = state.applied_during_relist.take() {
            for (job_ref, job) in applied {
                if !listed.contains(&job_ref) {
                    tracing::debug!(job = %job_ref.name, "keeping job created during re-list");
                    fresh.insert(job);
                }
            }
        }
        *state = fresh;
        drop(state);

        self.ready.store(true, Ordering::Release);
        Ok(())
    }

    /// Inserts or updates a job.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn apply(&self, job: Job) -> Result<()> {
        let mut state = self.state.write().map_err(poison_err)?;
        if let (Some(applied), Some(job_ref)) =
            (state.applied_during_relist.as_mut(), JobRef::of(&job))
        {
            applied.insert(job_ref, job.clone());
        }
        state.insert(job);
        Ok(())
    }

    /// Removes a job.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn remove(&self, job: &Job) -> Result<()> {
        if let Some(job_ref) = JobRef::of(job) {
            let mut state = self.state.write().map_err(poison_err)?;
            if let Some(applied) = state.applied_during_relist.as_mut() {
                applied.remove(&job_ref);
            }
            state.evict(&job_ref);
        }
        Ok(())
    }

    /// Returns true once the initial rebuild has completed.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Returns the number of indexed jobs.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn len(&self) -> Result<usize> {
        Ok(self.state.read().map_err(poison_err)?.owner_of.len())
    }

    /// Returns true if no jobs are indexed.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Returns the jobs owned by `owner`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IndexNotReady`] before the first rebuild, or an error
    /// if the lock is poisoned.
    pub fn owned_by(&self, owner: &OwnerKey) -> Result<Vec<Arc<Job>>> {
        if !self.is_ready() {
            return Err(Error::IndexNotReady);
        }
        let state = self.state.read().map_err(poison_err)?;
        Ok(state
            .by_owner
            .get(owner)
            .map(|jobs| jobs.values().cloned().collect())
            .unwrap_or_default())
    }
}

#[async_trait]
impl OwnerLookup for OwnerIndex {
    async fn owned_jobs(&self, owner: &OwnerKey) -> Result<Vec<Arc<Job>>> {
        self.owned_by(owner)
    }
}

/// Applies job watch events to an [`OwnerIndex`].
///
/// Re-lists are buffered between `Init` and `InitDone` and swapped in as a
/// whole, so readers never observe a half-populated index. Jobs recorded by
/// the submission layer while the re-list runs survive the swap.
#[derive(Debug)]
pub struct OwnerIndexWriter {
    index: Arc<OwnerIndex>,
    relist: Option<Vec<Job>>,
}

impl OwnerIndexWriter {
    /// Creates a writer for the given index.
    #[must_use]
    pub fn new(index: Arc<OwnerIndex>) -> Self {
        Self {
            index,
            relist: None,
        }
    }

    /// Applies one watch event.
    ///
    /// # Errors
    ///
    /// Returns an error if the index lock is poisoned.
    pub fn handle(&mut self, event: watcher::Event<Job>) -> Result<()> {
        match event {
            watcher::Event::Apply(job) => self.index.apply(job),
            watcher::Event::Delete(job) => self.index.remove(&job),
            watcher::Event::Init => {
                self.relist = Some(Vec::new());
                self.index.begin_relist()
            }
            watcher::Event::InitApply(job) => {
                match self.relist.as_mut() {
                    Some(buffer) => buffer.push(job),
                    None => self.index.apply(job)?,
                }
                Ok(())
            }
            watcher::Event::InitDone => {
                let jobs = self.relist.take().unwrap_or_default();
                tracing::debug!(jobs = jobs.len(), "owner index re-listed");
                self.index.rebuild(jobs)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};

    fn scan_owner(uid: &str) -> OwnerReference {
        OwnerReference {
            api_version: scan_api_version(),
            kind: scan_kind(),
            name: "nmap-weekly".into(),
            uid: uid.into(),
            controller: Some(true),
            block_owner_deletion: Some(true),
        }
    }

    fn job(name: &str, owners: Vec<OwnerReference>) -> Job {
        Job {
            metadata: ObjectMeta {
                name: Some(name.into()),
                namespace: Some("default".into()),
                owner_references: Some(owners),
                ..ObjectMeta::default()
            },
            ..Job::default()
        }
    }

    #[test]
    fn owner_key_reads_controller_reference() {
        let job = job("nmap-abcde", vec![scan_owner("uid-1")]);
        assert_eq!(owner_key(&job), Some(OwnerKey::new("uid-1")));
    }

    #[test]
    fn owner_key_ignores_other_kinds_and_groups() {
        let mut cronjob_owner = scan_owner("uid-1");
        cronjob_owner.kind = "CronJob".into();
        cronjob_owner.api_version = "batch/v1".into();
        assert_eq!(owner_key(&job("a", vec![cronjob_owner])), None);

        let mut foreign_group = scan_owner("uid-1");
        foreign_group.api_version = "scans.example.com/v1".into();
        assert_eq!(owner_key(&job("b", vec![foreign_group])), None);
    }

    #[test]
    fn owner_key_requires_controller_flag() {
        let mut owner = scan_owner("uid-1");
        owner.controller = None;
        assert_eq!(owner_key(&job("a", vec![owner])), None);
        assert_eq!(owner_key(&Job::default()), None);
    }

    #[test]
    fn lookups_fail_until_rebuilt() {
        let index = OwnerIndex::new();
        assert!(matches!(
            index.owned_by(&OwnerKey::new("uid-1")),
            Err(Error::IndexNotReady)
        ));

        index.rebuild(Vec::new()).unwrap();
        assert!(index.owned_by(&OwnerKey::new("uid-1")).unwrap().is_empty());
    }

    #[test]
    fn rebuild_groups_jobs_by_owner() {
        let index = OwnerIndex::new();
        index
            .rebuild(vec![
                job("nmap-b", vec![scan_owner("uid-1")]),
                job("nmap-a", vec![scan_owner("uid-1")]),
                job("zap-a", vec![scan_owner("uid-2")]),
                job("unrelated", Vec::new()),
            ])
            .unwrap();

        let owned = index.owned_by(&OwnerKey::new("uid-1")).unwrap();
        let names: Vec<_> = owned.iter().map(|j| j.name_any()).collect();
        assert_eq!(names, vec!["nmap-a", "nmap-b"]);
        assert_eq!(index.len().unwrap(), 3);
    }

    #[test]
    fn apply_and_remove_keep_index_current() {
        let index = OwnerIndex::new();
        index.rebuild(Vec::new()).unwrap();

        let owned = job("nmap-abcde", vec![scan_owner("uid-1")]);
        index.apply(owned.clone()).unwrap();
        index.apply(owned.clone()).unwrap();
        assert_eq!(index.owned_by(&OwnerKey::new("uid-1")).unwrap().len(), 1);

        index.remove(&owned).unwrap();
        assert!(index.owned_by(&OwnerKey::new("uid-1")).unwrap().is_empty());
        assert!(index.is_empty().unwrap());
    }

    #[test]
    fn apply_moves_job_when_owner_changes() {
        let index = OwnerIndex::new();
        index.rebuild(Vec::new()).unwrap();

        index.apply(job("nmap-abcde", vec![scan_owner("uid-1")])).unwrap();
        index.apply(job("nmap-abcde", vec![scan_owner("uid-2")])).unwrap();

        assert!(index.owned_by(&OwnerKey::new("uid-1")).unwrap().is_empty());
        assert_eq!(index.owned_by(&OwnerKey::new("uid-2")).unwrap().len(), 1);
    }

    #[test]
    fn writer_swaps_in_relist_atomically() {
        let index = Arc::new(OwnerIndex::new());
        let mut writer = OwnerIndexWriter::new(index.clone());

        writer.handle(watcher::Event::Init).unwrap();
        writer
            .handle(watcher::Event::InitApply(job("nmap-a", vec![scan_owner("uid-1")])))
            .unwrap();
        assert!(!index.is_ready());

        writer.handle(watcher::Event::InitDone).unwrap();
        assert_eq!(index.owned_by(&OwnerKey::new("uid-1")).unwrap().len(), 1);

        // A later re-list drops jobs that disappeared while the watch was down.
        writer.handle(watcher::Event::Init).unwrap();
        writer.handle(watcher::Event::InitDone).unwrap();
        assert!(index.owned_by(&OwnerKey::new("uid-1")).unwrap().is_empty());
    }

    #[test]
    fn relist_keeps_jobs_created_while_listing() {
        let index = Arc::new(OwnerIndex::new());
        index.rebuild(Vec::new()).unwrap();
        let mut writer = OwnerIndexWriter::new(index.clone());

        writer.handle(watcher::Event::Init).unwrap();
        // Recorded by the submission layer after the list snapshot was taken.
        index.apply(job("nmap-fresh", vec![scan_owner("uid-1")])).unwrap();
        writer.handle(watcher::Event::InitDone).unwrap();

        let owned = index.owned_by(&OwnerKey::new("uid-1")).unwrap();
        assert_eq!(owned.len(), 1);
        assert_eq!(owned[0].name_any(), "nmap-fresh");
    }

    #[test]
    fn relist_prefers_listed_copy_of_created_job() {
        let index = Arc::new(OwnerIndex::new());
        index.rebuild(Vec::new()).unwrap();
        let mut writer = OwnerIndexWriter::new(index.clone());

        writer.handle(watcher::Event::Init).unwrap();
        index.apply(job("nmap-fresh", vec![scan_owner("uid-1")])).unwrap();
        writer
            .handle(watcher::Event::InitApply(job("nmap-fresh", vec![scan_owner("uid-2")])))
            .unwrap();
        writer.handle(watcher::Event::InitDone).unwrap();

        assert!(index.owned_by(&OwnerKey::new("uid-1")).unwrap().is_empty());
        assert_eq!(index.owned_by(&OwnerKey::new("uid-2")).unwrap().len(), 1);
        assert_eq!(index.len().unwrap(), 1);
    }

    #[test]
    fn recording_stops_after_rebuild() {
        let index = Arc::new(OwnerIndex::new());
        index.begin_relist().unwrap();
        index.apply(job("nmap-a", vec![scan_owner("uid-1")])).unwrap();
        index.rebuild(Vec::new()).unwrap();
        assert_eq!(index.len().unwrap(), 1);

        // A later rebuild without a re-list in progress is authoritative.
        index.rebuild(Vec::new()).unwrap();
        assert!(index.is_empty().unwrap());
    }

    #[test]
    fn writer_applies_live_events() {
        let index = Arc::new(OwnerIndex::new());
        index.rebuild(Vec::new()).unwrap();
        let mut writer = OwnerIndexWriter::new(index.clone());

        let owned = job("nmap-a", vec![scan_owner("uid-1")]);
        writer.handle(watcher::Event::Apply(owned.clone())).unwrap();
        assert_eq!(index.len().unwrap(), 1);

        writer.handle(watcher::Event::Delete(owned)).unwrap();
        assert_eq!(index.len().unwrap(), 0);
    }
}
