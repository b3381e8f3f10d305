//! Crash reproduction (spec.md §6.4 `triage`). Grounded on
//! `original_source/fuzz/runner/triagerunner.py`'s `TriageRunner`: load a
//! recorded crash sequence and replay it through a fresh connection.

use std::path::Path;

use log::{info, warn};

use crate::error::Result;
use crate::runner::{SequenceRunResult, SequenceRunner};
use crate::sequence::SeedSequence;

/// Replays `crash_seq_dir` (a `FuzzCampaign`-style sequence directory, as
/// written under `crashes/`) to completion and reports whether the
/// target crashed again.
pub async fn triage<S>(
    runner: &mut SequenceRunner<S>,
    target: &str,
    crash_seq_dir: &Path,
) -> Result<SequenceRunResult>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send,
{
    let load_raw = crate::call::load_raw_fn(target)?;
    let mut seq = SeedSequence::load_sequence(crash_seq_dir, load_raw)?;
    let result = runner.run(&mut seq).await?;
    if result.crashed {
        info!("crash reproduced after {} seeds", result.seeds_run);
    } else {
        warn!("crash did not reproduce ({:?} after {} seeds)", result.final_status, result.seeds_run);
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call::triangle::TriangleCall;
    use crate::call::Call;
    use crate::runner::Runner;
    use crate::seed::Seed;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn a_crashing_response_is_reported_as_reproduced() {
        let dir = tempfile::tempdir().unwrap();
        let seed = Seed::new(0, Box::new(TriangleCall::new(1)), Box::new(TriangleCall::new(1)));
        seed.store_seed(&dir.path().join("0"), |call, p| call.serialize_to_path(p)).unwrap();

        let (client, mut server) = tokio::io::duplex(1 << 16);
        tokio::spawn(async move {
            let mut cmd = [0u8; 1];
            server.read_exact(&mut cmd).await.unwrap();
            let mut len = [0u8; 4];
            server.read_exact(&mut len).await.unwrap();
            let n = u32::from_le_bytes(len) as usize;
            let mut payload = vec![0u8; n];
            server.read_exact(&mut payload).await.unwrap();

            server.write_all(&42u32.to_le_bytes()).await.unwrap();
            let mut call = TriangleCall::new(1);
            call.return_code = crate::call::triangle::TARGET_DEAD;
            let wire = call.serialize();
            server.write_all(&(wire.len() as u32).to_le_bytes()).await.unwrap();
            server.write_all(&wire).await.unwrap();
        });

        let mut seq_runner = SequenceRunner::new(Runner::new(client));
        let result = triage(&mut seq_runner, "triangle", dir.path()).await.unwrap();
        assert!(result.crashed);
    }
}
