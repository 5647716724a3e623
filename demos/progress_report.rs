//! Example demonstrating a pipeline run with live progress.
//!
//! This example shows how to:
//! - Build a chain of map, flat-map and reduce-by-key stages
//! - Run it on a background thread
//! - Poll per-stage status and the estimated completion while it runs
//! - Save the final status snapshot to a JSON file

use anyhow::Result;
use parade::{Config, Pipeline, from_iter_fn_with_len};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn main() -> Result<()> {
    println!("=== Parade Progress Example ===\n");

    let config = Config::default().with_target_batch_time(Duration::from_millis(200));
    let p = Pipeline::with_config(config);

    // Pretend every record is a sentence that needs some work to clean up.
    let sentences = from_iter_fn_with_len(&p, 200_000, || {
        (0..200_000u32).map(|i| format!("record {} of batch {}", i, i % 17))
    })
    .named("sentences");

    let counts = sentences
        .map(|s: String| {
            thread::sleep(Duration::from_micros(20));
            s.to_lowercase()
        })
        .named("clean")
        .flat_map(|s: String| {
            s.split_whitespace()
                .map(|w| (w.to_string(), 1u64))
                .collect::<Vec<_>>()
        })
        .named("tokenize")
        .reduce_by_key(|a, b| a + b)
        .named("count");

    let runner = Arc::new(counts.runner()?);
    let handle = {
        let runner = Arc::clone(&runner);
        thread::spawn(move || runner.collect())
    };

    while !handle.is_finished() {
        thread::sleep(Duration::from_millis(250));
        let status = runner.status();
        let line: Vec<String> = status
            .stages
            .iter()
            .map(|s| format!("{}={}", s.name, s.processed))
            .collect();
        println!("{}  eta: {:?}", line.join("  "), runner.estimated_completion());
    }

    let words = handle.join().map_err(|_| anyhow::anyhow!("runner thread panicked"))??;
    println!("\n{} distinct words; top entries:", words.len());
    for (word, n) in words.iter().take(5) {
        println!("  {word}: {n}");
    }

    let path = std::env::temp_dir().join("parade_status.json");
    runner.status().save_to_file(&path.to_string_lossy())?;
    println!("\nStatus saved to {}", path.display());
    Ok(())
}
