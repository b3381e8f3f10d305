//! The fuzz loop proper (spec.md §4.6). Grounded on `original_source/
//! fuzz/runner/fuzzrunner.py`: a campaign directory holding `queue/`,
//! `crashes/`, `timeouts/`, `cov/`, and `stats.json`, a seeding phase that
//! drains `in_dir` before switching to mutation of the in-memory
//! population, and device-reset escalation driven by `DeviceLifecycle`
//! (`device.rs`).

use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use log::{info, warn};
use rand::Rng;

use crate::call::Call;
use crate::device::{DeviceController, DeviceLifecycle};
use crate::error::{Result, TeezzError};
use crate::eventlog::{CampaignEvent, EventLog};
use crate::fuzz::population::Population;
use crate::fuzz::stats::CampaignStats;
use crate::mutate::sequence_mutator::SeedSequenceMutator;
use crate::mutate::template_mutator::TemplateMutator;
use crate::runner::{RunnerStatus, SequenceRunner};
use crate::sequence::SeedSequence;

fn dir_entry_count(dir: &Path) -> u64 {
    if !dir.is_dir() {
        return 0;
    }
    fs::read_dir(dir)
        .map(|rd| rd.filter_map(|e| e.ok()).count() as u64)
        .unwrap_or(0)
}

fn candidate_name(id: u64, elapsed: u64, seq_run: Option<(u64, u64)>) -> String {
    match seq_run {
        Some((seq, run)) => format!("id:{id:08},time:{elapsed:08},seq:{seq:06},run:{run:08}"),
        None => format!("id:{id:08},time:{elapsed:08}"),
    }
}

pub struct FuzzCampaign<S> {
    runner: SequenceRunner<S>,
    load_raw: fn(&Path) -> Result<Box<dyn Call>>,
    queue_dir: PathBuf,
    crashes_dir: PathBuf,
    timeouts_dir: PathBuf,
    cov_dir: PathBuf,
    stats_path: PathBuf,
    queue_id: u64,
    crash_id: u64,
    hang_id: u64,
    cov_id: u64,
    population: Population,
    stats: CampaignStats,
    device: DeviceLifecycle,
    template_mutator: TemplateMutator,
    seq_mutator: SeedSequenceMutator,
    rng: rand::rngs::ThreadRng,
    pending_seeds: VecDeque<SeedSequence>,
    is_seeding: bool,
    needs_reset: bool,
    start: Instant,
    resumed_elapsed: u64,
    event_log: Option<EventLog>,
}

impl<S> FuzzCampaign<S>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send,
{
    /// Sets up (or re-opens) a campaign directory under `out_dir` for
    /// `target` (`"triangle"`/`"optee"`/`"qsee"`). Resumes from an
    /// existing `stats.json` + `queue/` when present; otherwise seeds
    /// from `in_dir`.
    pub fn bootstrap(
        runner: SequenceRunner<S>,
        target: &str,
        out_dir: impl Into<PathBuf>,
        in_dir: Option<&Path>,
        event_log_path: Option<&Path>,
    ) -> Result<Self> {
        let out_dir = out_dir.into();
        let queue_dir = out_dir.join("queue");
        let crashes_dir = out_dir.join("crashes");
        let timeouts_dir = out_dir.join("timeouts");
        let cov_dir = out_dir.join("cov");
        for dir in [&queue_dir, &crashes_dir, &timeouts_dir, &cov_dir] {
            fs::create_dir_all(dir).map_err(|e| TeezzError::io(dir.as_path(), e))?;
        }
        let event_log = event_log_path.map(EventLog::open).transpose()?;
        let load_raw = crate::call::load_raw_fn(target)?;
        let stats_path = out_dir.join("stats.json");
        let stats = CampaignStats::load(&stats_path)?;
        let resuming = stats.elapsed_time > 0;
        let resumed_elapsed = stats.elapsed_time;

        let mut campaign = FuzzCampaign {
            runner,
            load_raw,
            queue_id: dir_entry_count(&queue_dir),
            crash_id: dir_entry_count(&crashes_dir),
            hang_id: dir_entry_count(&timeouts_dir),
            cov_id: dir_entry_count(&cov_dir),
            queue_dir,
            crashes_dir,
            timeouts_dir,
            cov_dir,
            stats_path,
            population: Population::new(),
            stats,
            device: DeviceLifecycle::new(),
            template_mutator: TemplateMutator::new(),
            seq_mutator: SeedSequenceMutator::new(),
            rng: rand::thread_rng(),
            pending_seeds: VecDeque::new(),
            is_seeding: false,
            needs_reset: false,
            start: Instant::now(),
            resumed_elapsed,
            event_log,
        };

        if resuming {
            campaign.load_queue()?;
        } else if let Some(in_dir) = in_dir {
            campaign.seed_from(in_dir)?;
        }
        Ok(campaign)
    }

    pub fn stats(&self) -> &CampaignStats {
        &self.stats
    }

    pub fn population_len(&self) -> usize {
        self.population.len()
    }

    fn seed_from(&mut self, in_dir: &Path) -> Result<()> {
        let mut entries: Vec<PathBuf> = fs::read_dir(in_dir)
            .map_err(|e| TeezzError::io(in_dir, e))?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_dir())
            .collect();
        entries.sort();
        for dir in entries {
            self.pending_seeds.push_back(SeedSequence::load_sequence(&dir, self.load_raw)?);
        }
        self.is_seeding = !self.pending_seeds.is_empty();
        Ok(())
    }

    /// L3: rehydrates the population from `queue/` on resume.
    fn load_queue(&mut self) -> Result<()> {
        let mut entries: Vec<PathBuf> = fs::read_dir(&self.queue_dir)
            .map_err(|e| TeezzError::io(&self.queue_dir, e))?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_dir())
            .collect();
        entries.sort();
        for dir in entries {
            self.population.push(SeedSequence::load_sequence(&dir, self.load_raw)?);
        }
        self.is_seeding = false;
        Ok(())
    }

    fn elapsed_secs(&self) -> u64 {
        self.resumed_elapsed + self.start.elapsed().as_secs()
    }

    fn persist(&self, dir: &Path, id: u64, seq_run: Option<(u64, u64)>, candidate: &SeedSequence) -> Result<()> {
        let name = candidate_name(id, self.elapsed_secs(), seq_run);
        candidate.store_sequence(&dir.join(name), |call, p| call.serialize_to_path(p))
    }

    /// Next candidate and whether it came straight from the seed corpus
    /// (always kept, per spec.md §4.6 step 3) rather than being mutated
    /// from the population.
    fn next_candidate(&mut self) -> Option<(SeedSequence, bool)> {
        if self.is_seeding {
            if let Some(seq) = self.pending_seeds.pop_front() {
                if self.pending_seeds.is_empty() {
                    self.is_seeding = false;
                }
                return Some((seq, true));
            }
            self.is_seeding = false;
        }
        let base = self.population.random_member()?;
        Some((self.mutate_candidate(&base), false))
    }

    /// `_create_candidate`: deep-clone a population member, with low
    /// probability prune a handful of value dependencies, then mutate
    /// between 1 and `len` seeds, each time touching at most one header
    /// and exactly one parameter.
    fn mutate_candidate(&mut self, base: &SeedSequence) -> SeedSequence {
        let mut candidate = base.clone();
        let len = candidate.len().max(1);

        if candidate.len() > 1 && self.rng.gen_bool(0.1) {
            let times = self.rng.gen_range(1..candidate.len());
            for _ in 0..times {
                self.seq_mutator.force_delete_one(&mut candidate);
            }
        }

        let nmutations = self.rng.gen_range(1..=len);
        for _ in 0..nmutations {
            if candidate.is_empty() {
                break;
            }
            let seed_idx = self.rng.gen_range(0..candidate.len());
            let seed = candidate.seed_mut(seed_idx);
            if self.rng.gen_bool(0.1) {
                seed.input.mutate_header(&mut self.template_mutator);
            }
            let params_len = seed.input.params().len();
            if params_len > 0 {
                let param_idx = self.rng.gen_range(0..params_len);
                let param = &mut seed.input.params_mut()[param_idx];
                param.buffer = self.template_mutator.mutate(&param.buffer, param.template.as_ref());
            }
        }
        candidate.reset_cursor();
        candidate
    }

    /// Runs exactly one candidate to completion and classifies the
    /// outcome (spec.md §4.6 steps 2-4). A no-op, `Ok(())`, when there is
    /// nothing left to seed and the population is still empty.
    pub async fn run_one_iteration(&mut self, device: Option<&dyn DeviceController>) -> Result<()> {
        let Some((mut candidate, from_seed)) = self.next_candidate() else {
            return Ok(());
        };
        candidate.reset_cursor();
        let result = self.runner.run(&mut candidate).await?;

        self.stats.sequences += 1;
        self.stats.interactions += result.seeds_run as u64;

        match result.final_status {
            RunnerStatus::Timeout => {
                let device_absent = match device {
                    Some(ctrl) => ctrl.is_in_recovery_or_tmpfs().await.unwrap_or(true),
                    None => false,
                };
                self.hang_id += 1;
                let name = candidate_name(self.hang_id, self.elapsed_secs(), None);
                self.persist(&self.timeouts_dir, self.hang_id, None, &candidate)?;
                if device_absent {
                    self.stats.crashtimeouts += 1;
                    self.needs_reset = true;
                    if let Some(log) = &self.event_log {
                        log.record(&CampaignEvent::CrashTimeout { candidate: &name }).await;
                    }
                } else {
                    self.stats.timeouts += 1;
                    if self.device.record_run(true) {
                        self.needs_reset = true;
                    }
                }
            }
            RunnerStatus::Error => {
                self.stats.errors += 1;
                self.device.record_run(false);
            }
            RunnerStatus::Success => {
                if self.device.record_run(false) {
                    self.needs_reset = true;
                }
                let new_cov = self.stats.record_coverage(&result.coverage);
                for &ok in &result.status_codes {
                    if ok {
                        self.stats.ta_successes += 1;
                    } else {
                        self.stats.ta_fails += 1;
                    }
                }
                if result.crashed {
                    self.stats.crashes += 1;
                    self.crash_id += 1;
                    let name = candidate_name(self.crash_id, self.elapsed_secs(), None);
                    self.persist(&self.crashes_dir, self.crash_id, None, &candidate)?;
                    if let Some(log) = &self.event_log {
                        log.record(&CampaignEvent::Crash { candidate: &name, sequences: self.stats.sequences }).await;
                    }
                } else {
                    self.stats.successes += 1;
                    if new_cov || from_seed {
                        self.queue_id += 1;
                        self.persist(&self.queue_dir, self.queue_id, None, &candidate)?;
                    }
                }
                // L2: a crash is appended to the population only when it
                // is also new-cov; a seeded candidate always is.
                if new_cov || from_seed {
                    self.cov_id += 1;
                    let seq_run = Some((self.stats.sequences, self.stats.interactions));
                    let name = candidate_name(self.cov_id, self.elapsed_secs(), seq_run);
                    self.persist(&self.cov_dir, self.cov_id, seq_run, &candidate)?;
                    if new_cov {
                        if let Some(log) = &self.event_log {
                            log.record(&CampaignEvent::NewCoverage { candidate: &name, tuples: result.coverage.len() }).await;
                        }
                    }
                    self.population.push(candidate);
                }
            }
        }
        Ok(())
    }

    pub fn checkpoint(&mut self) -> Result<()> {
        self.stats.elapsed_time = self.elapsed_secs();
        self.stats.save(&self.stats_path)
    }

    /// Drives the reset escalation ladder to completion when a run has
    /// flagged `needs_reset`, bucketing the outcome into `resets` /
    /// `factoryresets` / `hardresets`.
    async fn ensure_device_healthy(&mut self, device: &dyn DeviceController) -> Result<()> {
        let was_recovery = device.is_in_recovery_or_tmpfs().await.unwrap_or(false);
        match self.device.ensure_healthy(device).await {
            Ok(()) => {
                self.stats.resets += 1;
                let outcome = if was_recovery {
                    self.stats.factoryresets += 1;
                    "factory_reset"
                } else {
                    "reboot"
                };
                if let Some(log) = &self.event_log {
                    log.record(&CampaignEvent::DeviceReset { outcome }).await;
                }
                Ok(())
            }
            Err(err @ TeezzError::DeviceUnresponsive { .. }) => {
                self.stats.hardresets += 1;
                if let Some(log) = &self.event_log {
                    log.record(&CampaignEvent::DeviceReset { outcome: "hard_reset" }).await;
                }
                self.checkpoint()?;
                Err(err)
            }
            Err(e) => Err(e),
        }
    }

    /// Main loop (spec.md §4.6, §5): runs until `duration` elapses
    /// (counting time already spent in a prior, checkpointed run), until
    /// `nruns` candidates have been run in this invocation (`None` is
    /// unbounded), or until a cooperative `ctrl_c` asks for a clean
    /// shutdown. Either way stats are checkpointed before returning.
    pub async fn run_for(&mut self, duration: Duration, nruns: Option<u64>, device: Option<&dyn DeviceController>) -> Result<()> {
        let mut shutdown = Box::pin(tokio::signal::ctrl_c());
        let mut run_this_invocation = 0u64;
        loop {
            if self.elapsed_secs() >= duration.as_secs() {
                break;
            }
            if let Some(cap) = nruns {
                if run_this_invocation >= cap {
                    break;
                }
            }
            if self.needs_reset {
                if let Some(ctrl) = device {
                    self.ensure_device_healthy(ctrl).await?;
                }
                self.needs_reset = false;
            }

            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    warn!("shutdown requested, checkpointing and exiting");
                    break;
                }
                result = self.run_one_iteration(device) => {
                    result?;
                    run_this_invocation += 1;
                }
            }
        }
        info!(
            "checkpointing campaign: {} sequences, {} crashes, {} new coverage tuples",
            self.stats.sequences, self.stats.crashes, self.stats.newcov
        );
        self.checkpoint()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call::triangle::TriangleCall;
    use crate::runner::Runner;
    use crate::seed::Seed;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    /// Writes one recorded sequence (a single ordinal-0 seed) under
    /// `seq_dir`, the shape `seed_from` expects each `in_dir` entry to be.
    fn write_one_seed_sequence(seq_dir: &Path) {
        let seed = Seed::new(0, Box::new(TriangleCall::new(1)), Box::new(TriangleCall::new(1)));
        seed.store_seed(&seq_dir.join("0"), |call, p| call.serialize_to_path(p)).unwrap();
    }

    fn test_campaign(out_dir: &Path, in_dir: Option<&Path>) -> FuzzCampaign<tokio::io::DuplexStream> {
        let (client, _server) = tokio::io::duplex(1 << 16);
        let runner = SequenceRunner::new(Runner::new(client));
        FuzzCampaign::bootstrap(runner, "triangle", out_dir, in_dir, None).unwrap()
    }

    #[test]
    fn bootstrap_initializes_counters_from_directory_listing_length() {
        let out = tempfile::tempdir().unwrap();
        fs::create_dir_all(out.path().join("queue").join("existing-a")).unwrap();
        fs::create_dir_all(out.path().join("queue").join("existing-b")).unwrap();

        let campaign = test_campaign(out.path(), None);
        assert_eq!(campaign.queue_id, 2);
        assert_eq!(campaign.crash_id, 0);
    }

    #[test]
    fn candidate_name_formats_the_seq_run_suffix_only_when_given() {
        assert_eq!(candidate_name(3, 10, None), "id:00000003,time:00000010");
        assert_eq!(
            candidate_name(3, 10, Some((5, 12))),
            "id:00000003,time:00000010,seq:000005,run:00000012"
        );
    }

    #[tokio::test]
    async fn seeding_phase_drains_in_dir_before_switching_to_mutation() {
        let out = tempfile::tempdir().unwrap();
        let in_dir = tempfile::tempdir().unwrap();
        write_one_seed_sequence(&in_dir.path().join("0"));

        let mut campaign = test_campaign(out.path(), Some(in_dir.path()));
        assert!(campaign.is_seeding);
        assert_eq!(campaign.pending_seeds.len(), 1);

        let (seq, from_seed) = campaign.next_candidate().unwrap();
        assert!(from_seed);
        assert_eq!(seq.len(), 1);
        assert!(!campaign.is_seeding);
    }

    #[tokio::test]
    async fn a_seeded_candidate_with_new_coverage_lands_in_queue_and_population() {
        let out = tempfile::tempdir().unwrap();
        let in_dir = tempfile::tempdir().unwrap();
        write_one_seed_sequence(&in_dir.path().join("0"));

        let (client, mut server) = tokio::io::duplex(1 << 16);
        let server_task = tokio::spawn(async move {
            let mut cmd = [0u8; 1];
            server.read_exact(&mut cmd).await.unwrap();
            let mut len = [0u8; 4];
            server.read_exact(&mut len).await.unwrap();
            let n = u32::from_le_bytes(len) as usize;
            let mut payload = vec![0u8; n];
            server.read_exact(&mut payload).await.unwrap();

            server.write_all(&42u32.to_le_bytes()).await.unwrap();
            let call = TriangleCall::new(1);
            let wire = call.serialize();
            server.write_all(&(wire.len() as u32).to_le_bytes()).await.unwrap();
            server.write_all(&wire).await.unwrap();
        });

        let runner = SequenceRunner::new(Runner::new(client));
        let mut campaign = FuzzCampaign::bootstrap(runner, "triangle", out.path(), Some(in_dir.path()), None).unwrap();
        campaign.run_one_iteration(None).await.unwrap();
        server_task.await.unwrap();

        assert_eq!(campaign.stats().sequences, 1);
        assert_eq!(campaign.stats().successes, 1);
        assert_eq!(campaign.population_len(), 1);
        assert_eq!(dir_entry_count(&campaign.queue_dir), 1);
        assert_eq!(dir_entry_count(&campaign.cov_dir), 1);
    }

    #[tokio::test]
    async fn checkpoint_persists_elapsed_time_and_cov_seen_for_resume() {
        let out = tempfile::tempdir().unwrap();
        let mut campaign = test_campaign(out.path(), None);
        campaign.stats.sequences = 5;
        campaign.checkpoint().unwrap();

        let reloaded = CampaignStats::load(&out.path().join("stats.json")).unwrap();
        assert_eq!(reloaded.sequences, 5);
    }
}
