use std::{collections::HashSet, io::Write, sync::Arc};

use anyhow::bail;
use leaseflake::{BitLayout, Generator, GeneratorConfig, Lease, MemoryStore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// IDs produced by one generator instance, in issue order.
#[derive(Debug)]
pub struct Batch {
    pub owner_label: String,
    pub lease: Lease,
    pub ids: Vec<u64>,
}

/// Starts `instances` generators on one in-process store and draws `count`
/// IDs from each concurrently.
///
/// Stops early, returning what was produced so far, when `cancel` fires.
///
/// # Errors
///
/// Fails if a generator cannot start or errors while generating, or if the
/// produced IDs are not unique and per-instance increasing.
pub async fn generate(
    config: &GeneratorConfig,
    count: usize,
    instances: usize,
    cancel: CancellationToken,
) -> anyhow::Result<Vec<Batch>> {
    let store = Arc::new(MemoryStore::new(&config.layout));

    let mut generators = Vec::with_capacity(instances);
    for index in 0..instances {
        let config = GeneratorConfig {
            owner_label: format!("{}-{index}", config.owner_label),
            ..config.clone()
        };
        let owner_label = config.owner_label.clone();
        let generator = Generator::start(config, Arc::clone(&store)).await?;
        generators.push((owner_label, Arc::new(generator)));
    }

    let mut tasks = JoinSet::new();
    for (index, (_, generator)) in generators.iter().enumerate() {
        let generator = Arc::clone(generator);
        let cancel = cancel.clone();
        tasks.spawn(async move {
            let mut ids = Vec::with_capacity(count);
            while ids.len() < count {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    id = generator.next_id() => ids.push(id?),
                }
            }
            Ok::<_, leaseflake::Error>((index, ids))
        });
    }

    let mut produced = vec![Vec::new(); instances];
    let mut failure = None;
    while let Some(joined) = tasks.join_next().await {
        match joined? {
            Ok((index, ids)) => produced[index] = ids,
            Err(e) => {
                warn!(error = %e, "generation failed");
                failure.get_or_insert(e);
            }
        }
    }

    let mut batches = Vec::with_capacity(instances);
    for ((owner_label, generator), ids) in generators.into_iter().zip(produced) {
        let lease = generator.lease();
        if let Err(e) = generator.shutdown().await {
            warn!(owner = %owner_label, error = %e, "generator shutdown failed");
        }
        batches.push(Batch {
            owner_label,
            lease,
            ids,
        });
    }

    if let Some(e) = failure {
        return Err(e.into());
    }
    check_batches(&batches)?;

    let total: usize = batches.iter().map(|b| b.ids.len()).sum();
    info!(
        total,
        instances,
        cancelled = cancel.is_cancelled(),
        "generation finished"
    );
    Ok(batches)
}

fn check_batches(batches: &[Batch]) -> anyhow::Result<()> {
    let mut seen = HashSet::new();
    for batch in batches {
        if let Some(pair) = batch.ids.windows(2).find(|w| w[0] >= w[1]) {
            bail!(
                "{} issued {} after {}: IDs are not increasing",
                batch.owner_label,
                pair[1],
                pair[0]
            );
        }
        for &id in &batch.ids {
            if !seen.insert(id) {
                bail!("duplicate ID {id} issued by {}", batch.owner_label);
            }
        }
    }
    Ok(())
}

/// Writes one line per ID: owner, lease-id and the ID itself.
///
/// # Errors
///
/// Propagates write failures.
pub fn print_batches(out: &mut impl Write, batches: &[Batch]) -> std::io::Result<()> {
    for batch in batches {
        for id in &batch.ids {
            writeln!(out, "{}\t{}\t{id}", batch.owner_label, batch.lease.lease_id)?;
        }
    }
    Ok(())
}

/// Writes the decoded fields of every ID, one per line.
///
/// # Errors
///
/// Propagates write failures.
pub fn decode(out: &mut impl Write, layout: &BitLayout, ids: &[u64]) -> std::io::Result<()> {
    for &id in ids {
        if id >> 63 != 0 {
            warn!(id, "sign bit set, not an ID from this layout");
        }
        let parts = layout.decode(id);
        writeln!(
            out,
            "{id}\ttime_unit={}\tlease_id={}\tsequence={}\ttimestamp_ms={}",
            parts.time_unit,
            parts.lease_id,
            parts.sequence,
            layout.timestamp_millis(id)
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use leaseflake::ClockMode;

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn instances_hold_distinct_leases_and_ids() {
        let config = GeneratorConfig {
            owner_label: "test".to_string(),
            ..GeneratorConfig::default()
        };
        let batches = generate(&config, 500, 4, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(batches.len(), 4);
        let leases: HashSet<_> = batches.iter().map(|b| b.lease.lease_id).collect();
        assert_eq!(leases.len(), 4);
        for (index, batch) in batches.iter().enumerate() {
            assert_eq!(batch.owner_label, format!("test-{index}"));
            assert_eq!(batch.ids.len(), 500);
            for &id in &batch.ids {
                assert_eq!(config.layout.decode(id).lease_id, batch.lease.lease_id);
            }
        }
    }

    #[tokio::test]
    async fn wall_clock_mode_generates() {
        let config = GeneratorConfig {
            clock_mode: ClockMode::WallClockFallback,
            ..GeneratorConfig::default()
        };
        let batches = generate(&config, 100, 2, CancellationToken::new())
            .await
            .unwrap();
        assert!(batches.iter().all(|b| b.ids.len() == 100));
    }

    #[tokio::test]
    async fn cancelled_generation_returns_early() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let batches = generate(&GeneratorConfig::default(), 1_000, 1, cancel)
            .await
            .unwrap();
        assert!(batches[0].ids.is_empty());
    }

    #[test]
    fn duplicate_ids_are_reported() {
        let lease = Lease {
            lease_id: 1,
            effective_time: 0,
            expiry_time: 10,
        };
        let batches = [
            Batch {
                owner_label: "a".to_string(),
                lease,
                ids: vec![1, 2],
            },
            Batch {
                owner_label: "b".to_string(),
                lease,
                ids: vec![2, 3],
            },
        ];
        let err = check_batches(&batches).unwrap_err();
        assert!(err.to_string().contains("duplicate ID 2"));

        let unordered = [Batch {
            owner_label: "a".to_string(),
            lease,
            ids: vec![5, 4],
        }];
        assert!(check_batches(&unordered).is_err());
    }

    #[test]
    fn decode_prints_fields() {
        let layout = BitLayout::TIME_CHANNEL;
        let id = layout.encode(1_000, 7, 3);
        let mut out = Vec::new();
        decode(&mut out, &layout, &[id]).unwrap();
        let line = String::from_utf8(out).unwrap();
        assert_eq!(
            line,
            format!("{id}\ttime_unit=1000\tlease_id=7\tsequence=3\ttimestamp_ms=1000\n")
        );
    }
}
