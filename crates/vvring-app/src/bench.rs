//! Throughput comparison against `rtrb`

use anyhow::Result;

use crate::config::BenchSettings;
use crate::report::{BenchReport, SequenceRun};
use crate::stress::{drive, queue_run};

pub fn run(settings: &BenchSettings) -> Result<BenchReport> {
    tracing::info!(
        capacity = settings.capacity,
        iterations = settings.iterations,
        "Starting throughput comparison"
    );

    let runs = vec![
        queue_run(settings.capacity, settings.iterations)?,
        rtrb_run(settings.capacity, settings.iterations)?,
    ];

    Ok(BenchReport {
        capacity: settings.capacity,
        runs,
    })
}

/// Same sequence through `rtrb`, draining with read chunks
fn rtrb_run(capacity: usize, iterations: u64) -> Result<SequenceRun> {
    let (mut tx, mut rx) = rtrb::RingBuffer::<u64>::new(capacity);

    drive(
        "rtrb",
        iterations,
        move |value| tx.push(value).is_ok(),
        move |sink| {
            let available = rx.slots();
            let Ok(chunk) = rx.read_chunk(available) else {
                return 0;
            };
            for value in chunk {
                sink(value);
            }
            available
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bench_runs_both_queues() {
        let report = run(&BenchSettings {
            capacity: 64,
            iterations: 10_000,
        })
        .unwrap();

        assert_eq!(report.runs.len(), 2);
        assert_eq!(report.runs[1].structure, "rtrb");
        assert!(report.runs.iter().all(|r| r.items == 10_000));
    }
}
