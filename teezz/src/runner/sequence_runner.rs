//! Drives one `SeedSequence` through the executor connection (spec.md
//! §4.5). Grounded on `original_source/fuzz/runner/seqrunner.py`'s
//! `SequenceRunner.run`: iterate the (dependency-resolving) sequence,
//! send each seed's input, classify the response, accumulate coverage,
//! stop on crash/timeout/error.

use crate::call::{Call, CoverageTuple};
use crate::error::Result;
use crate::runner::runner::Runner;
use crate::runner::wire::RunnerStatus;
use crate::sequence::SeedSequence;

#[derive(Debug, Clone)]
pub struct SequenceRunResult {
    pub coverage: Vec<CoverageTuple>,
    pub crashed: bool,
    /// False when an observed `is_success()` differs from the
    /// previously-recorded one at the same position — the candidate is
    /// still useful but should not be trusted for deterministic replay.
    pub replayable: bool,
    pub seeds_run: usize,
    pub final_status: RunnerStatus,
    /// `is_success()` of each completed seed's response, in order. Used
    /// by value-dependency probing to detect a behavior change after a
    /// dependency is removed (`ValDepRunner._probe`'s `seq_status_codes`).
    pub status_codes: Vec<bool>,
}

pub struct SequenceRunner<S> {
    runner: Runner<S>,
}

impl<S> SequenceRunner<S>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send,
{
    pub fn new(runner: Runner<S>) -> Self {
        SequenceRunner { runner }
    }

    pub async fn run(&mut self, seq: &mut SeedSequence) -> Result<SequenceRunResult> {
        let mut coverage = Vec::new();
        let mut crashed = false;
        let mut replayable = true;
        let mut seeds_run = 0usize;
        let mut final_status = RunnerStatus::Success;
        let mut status_codes = Vec::new();

        while let Some(idx) = seq.advance() {
            let prev_success = seq.seed(idx).output.is_success();
            let (status, resp) = {
                let input_ref: &dyn Call = seq.seed(idx).input.as_ref();
                self.runner.run(input_ref).await?
            };
            seeds_run += 1;
            final_status = status;

            match status {
                RunnerStatus::Success => {
                    let resp_bytes = resp.expect("SUCCESS status always carries a response");
                    let decoded = seq.seed(idx).input.deserialize_response(&resp_bytes)?;
                    if decoded.is_success() != prev_success {
                        replayable = false;
                    }
                    status_codes.push(decoded.is_success());
                    coverage.push(decoded.coverage());
                    let is_crash = decoded.is_crash();
                    seq.seed_mut(idx).output = decoded;
                    if is_crash {
                        crashed = true;
                        break;
                    }
                }
                RunnerStatus::Timeout | RunnerStatus::Error => break,
            }
        }

        Ok(SequenceRunResult {
            coverage,
            crashed,
            replayable,
            seeds_run,
            final_status,
            status_codes,
        })
    }
}
