use anyhow::{Result, bail};
use parade::testing::*;
use parade::*;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

#[test]
fn stages_and_edges_are_registered() {
    let p = TestPipeline::new();
    let src = from_vec(&p, vec![1u8, 2, 3]);
    let doubled = src.map(|x| x * 2);
    let _branch = src.map(|x| x + 1);
    let _folded = doubled.fold(0, |a, b| a + b);

    assert_eq!(p.stage_count(), 4);
    assert_eq!(p.edge_count(), 3);
}

#[test]
fn runner_walks_back_to_the_source() -> Result<()> {
    let p = TestPipeline::new();
    let src = from_vec(&p, vec![1u32]);
    let _unrelated = from_vec(&p, vec![9u32]).map(|x| x);
    let tail = src.map(|x| x + 1).flat_map(|x| vec![x, x]);

    let runner = tail.runner()?;
    let ids = runner.stage_ids();
    assert_eq!(ids.len(), 3);
    assert_eq!(ids[0], src.id());
    assert_eq!(ids[2], tail.id());
    assert_eq!(runner.collect()?, vec![2, 2]);
    Ok(())
}

#[test]
fn declared_lengths() {
    let p = TestPipeline::new();
    let src = from_vec(&p, vec![1u32, 2, 3, 4]);
    assert_eq!(src.len().unwrap(), 4);
    assert_eq!(src.map(|x| x * 10).len().unwrap(), 4);
    assert!(matches!(
        src.flat_map(|x| vec![x; 2]).len(),
        Err(PipelineError::LengthUnknown)
    ));
    assert_eq!(src.fold(0, |a, b| a + b).len().unwrap(), 1);

    let generated = from_iter_fn(&p, || 0..10u32);
    assert!(matches!(generated.len(), Err(PipelineError::LengthUnknown)));
    let declared = from_iter_fn_with_len(&p, 10, || 0..10u32);
    assert_eq!(declared.map(|x| x).len().unwrap(), 10);

    let keyed = from_vec(&p, vec![(1u8, 1u8)]);
    assert!(matches!(keyed.group_by_key().len(), Err(PipelineError::LengthUnknown)));
}

#[test]
fn empty_source_yields_nothing() -> Result<()> {
    let p = TestPipeline::new();
    let src = from_vec(&p, Vec::<u32>::new());
    assert!(src.map(|x| x + 1).collect()?.is_empty());

    let keyed = from_iter_fn(&p, Vec::<(u8, u8)>::new);
    assert!(keyed.group_by_key().collect()?.is_empty());

    let folded = from_vec(&p, Vec::<i64>::new()).fold(7, |a, b| a + b);
    assert_eq!(folded.collect()?, vec![7]);
    Ok(())
}

#[test]
fn generator_is_called_when_the_chain_runs() -> Result<()> {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let p = TestPipeline::new();
    let src = from_iter_fn(&p, move || {
        counter.fetch_add(1, Ordering::SeqCst);
        0..5u8
    });
    let out = src.map(|x| x * 2);
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    assert_eq!(out.collect()?, vec![0, 2, 4, 6, 8]);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    Ok(())
}

#[test]
fn group_by_key_collects_every_value() -> Result<()> {
    let p = TestPipeline::new();
    let data: Vec<(String, u32)> = (0..1_000u32).map(|i| (format!("k{}", i % 7), i)).collect();
    let grouped = from_vec(&p, data.clone()).group_by_key().collect()?;

    let mut expected: Vec<(String, Vec<u32>)> = Vec::new();
    for k in 0..7 {
        let key = format!("k{k}");
        let values = data.iter().filter(|(dk, _)| *dk == key).map(|(_, v)| *v).collect();
        expected.push((key, values));
    }
    assert_keys_strictly_sorted(&grouped);
    assert_grouped_kv_equal(grouped, expected);
    Ok(())
}

#[test]
fn reduce_is_a_left_fold_in_arrival_order() -> Result<()> {
    let p = TestPipeline::new();
    let data: Vec<(u8, String)> = (0..300u32)
        .map(|i| ((i % 3) as u8, char::from(b'a' + (i % 26) as u8).to_string()))
        .collect();
    let mut expected: Vec<(u8, String)> = (0..3u8).map(|k| (k, String::new())).collect();
    for (k, s) in &data {
        expected[*k as usize].1.push_str(s);
    }

    let out = from_vec(&p, data)
        .map(|kv| kv)
        .reduce_by_key(|mut acc: String, s| {
            acc.push_str(&s);
            acc
        })
        .collect()?;
    assert_collections_equal(&out, &expected);
    Ok(())
}

#[test]
fn partial_grouping_repeats_keys_but_keeps_every_value() -> Result<()> {
    // flush every 10 * 2 = 20 values
    let config = TestPipeline::config().with_workers(2).with_partial_chunk_size(10);
    let p = TestPipeline::with_config(config);
    let src = from_iter_fn(&p, || (0..100u32).map(|i| (i % 3, i)));

    let partial = src.group_by_key_partial().collect()?;
    assert_eq!(partial.len(), 15, "5 flushes of 3 keys each");
    let flattened: Vec<(u32, u32)> = partial
        .into_iter()
        .flat_map(|(k, vs)| vs.into_iter().map(move |v| (k, v)))
        .collect();
    let expected: Vec<(u32, u32)> = (0..100u32).map(|i| (i % 3, i)).collect();
    assert_collections_unordered_equal(&flattened, &expected);
    Ok(())
}

#[test]
fn partial_reduce_followed_by_full_reduce() -> Result<()> {
    let config = TestPipeline::config().with_workers(2).with_partial_chunk_size(50);
    let p = TestPipeline::with_config(config);
    let totals = from_iter_fn(&p, || (0..10_000u64).map(|i| (i % 4, i)))
        .reduce_by_key_partial(|a, b| a + b)
        .reduce_by_key(|a, b| a + b)
        .collect()?;

    let expected: Vec<(u64, u64)> = (0..4u64)
        .map(|k| (k, (0..10_000u64).filter(|i| i % 4 == k).sum()))
        .collect();
    assert_kv_collections_equal(totals, expected);
    Ok(())
}

#[test]
fn map_with_context_builds_one_context_per_worker() -> Result<()> {
    let inits = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&inits);
    let p = TestPipeline::with_config(TestPipeline::config().with_workers(3));
    let out = from_vec(&p, (0..5_000u64).collect::<Vec<u64>>())
        .map_with_context(
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(Vec::<u64>::with_capacity(16))
            },
            |scratch: &mut Vec<u64>, x: u64| {
                scratch.clear();
                scratch.extend([x, x]);
                Ok(scratch.iter().sum::<u64>())
            },
        )
        .collect()?;

    assert_collections_equal(&out, &(0..5_000u64).map(|x| 2 * x).collect::<Vec<_>>());
    assert_eq!(inits.load(Ordering::SeqCst), 3);
    Ok(())
}

#[test]
fn failing_context_initializer_fails_the_run() -> Result<()> {
    let p = TestPipeline::new();
    let out = from_vec(&p, vec![1u32, 2, 3]).map_with_context(
        || -> Result<u32> { bail!("database unavailable") },
        |_: &mut u32, x: u32| Ok(x),
    );

    let err = out.collect().unwrap_err();
    assert!(matches!(
        err.downcast_ref::<PipelineError>(),
        Some(PipelineError::WorkerInit(msg)) if msg.contains("database unavailable")
    ));
    Ok(())
}

#[test]
fn panicking_function_is_reported_as_failure() -> Result<()> {
    let p = TestPipeline::new();
    let out = from_vec(&p, (0..100u32).collect::<Vec<u32>>()).map(|x| {
        assert!(x != 42, "no answers here");
        x
    });
    let err = out.collect().unwrap_err();
    assert!(format!("{err:#}").contains("no answers here"));
    Ok(())
}

#[test]
fn panicking_combiner_fails_the_run() -> Result<()> {
    let p = TestPipeline::new();
    let out = from_vec(&p, vec![(1u8, 1u32), (1, 2)]).reduce_by_key(|a, b| {
        assert!(a + b < 3, "bucket overflow");
        a + b
    });
    let err = out.collect().unwrap_err();
    assert!(matches!(
        err.downcast_ref::<PipelineError>(),
        Some(PipelineError::Panicked(msg)) if msg.contains("bucket overflow")
    ));
    Ok(())
}

#[test]
fn failing_flat_map_names_the_stage() -> Result<()> {
    let p = TestPipeline::new();
    let out = from_vec(&p, vec!["1", "2", "x", "4"])
        .named("numbers")
        .try_flat_map(|s: &str| -> Result<Vec<u32>> { Ok(vec![s.parse()?]) })
        .named("parse");
    let err = out.collect().unwrap_err();
    let rendered = format!("{err:#}");
    assert!(rendered.contains("(parse) failed"), "{rendered}");
    Ok(())
}

#[test]
fn a_stage_runs_only_once() -> Result<()> {
    let p = TestPipeline::new();
    let out = from_vec(&p, vec![1u8, 2]).map(|x| x + 1);
    assert_eq!(out.collect()?, vec![2, 3]);

    let err = out.collect().unwrap_err();
    assert!(matches!(
        err.downcast_ref::<PipelineError>(),
        Some(PipelineError::AlreadyStarted(_))
    ));
    Ok(())
}

#[test]
fn rerunning_a_finished_source_fails_at_start() -> Result<()> {
    let p = TestPipeline::new();
    let src = from_vec(&p, (0..100u32).collect::<Vec<u32>>()).named("numbers");
    assert_eq!(src.collect()?.len(), 100);

    let doubled = src.map(|x| x * 2);
    let runner = doubled.runner()?;
    let err = runner.collect().unwrap_err();
    let rendered = format!("{err:#}");
    assert!(rendered.contains(&format!("starting stage {}", src.id())), "{rendered}");
    assert!(matches!(
        err.downcast_ref::<PipelineError>(),
        Some(PipelineError::AlreadyStarted(id)) if *id == src.id()
    ));
    runner.stop();
    assert!(doubled.status().stop_requested);
    assert!(!doubled.status().running);
    Ok(())
}

#[test]
fn status_after_a_run() -> Result<()> {
    let p = TestPipeline::new();
    let out = from_vec(&p, (0..1_000u32).collect::<Vec<u32>>())
        .named("numbers")
        .map(|x| x % 10)
        .named("digits")
        .flat_map(|x| vec![x; 2]);
    let runner = out.runner()?;
    let values = runner.collect()?;
    assert_eq!(values.len(), 2_000);

    let status = runner.status();
    assert_all_finished(&status);
    let names: Vec<_> = status.stages.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, ["numbers", "digits", "flat_map"]);
    let kinds: Vec<_> = status.stages.iter().map(|s| s.kind).collect();
    assert_eq!(kinds, [StageKind::Source, StageKind::Map, StageKind::FlatMap]);
    assert!(status.stages.iter().all(|s| s.processed == 1_000));
    assert!(status.stages.iter().all(|s| !s.stop_requested));
    assert_eq!(runner.processed(), 1_000);
    assert_eq!(runner.estimated_completion(), Some(Duration::ZERO));
    Ok(())
}

#[test]
fn status_is_saved_as_json() -> Result<()> {
    let p = TestPipeline::new();
    let runner = from_vec(&p, (0..50u32).collect::<Vec<u32>>()).map(|x| x + 1).runner()?;
    runner.collect()?;

    let dir = tempfile::tempdir()?;
    let path = dir.path().join("status.json");
    runner.status().save_to_file(path.to_str().unwrap())?;

    let json: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path)?)?;
    assert_eq!(json["processed"], 50);
    assert_eq!(json["finished"], true);
    assert_eq!(json["stages"].as_array().map(Vec::len), Some(2));
    assert_eq!(json["stages"][0]["declared_len"], 50);
    assert_eq!(json["stages"][1]["kind"], "Map");
    assert!(json["stages"][1]["elapsed_ms"].is_number());
    Ok(())
}

#[test]
fn estimated_completion_needs_a_declared_length() -> Result<()> {
    let p = TestPipeline::new();
    let runner = from_iter_fn(&p, || 0..10u32).map(|x| x).runner()?;
    assert_eq!(runner.estimated_completion(), None);
    runner.collect()?;
    assert_eq!(runner.estimated_completion(), None);
    Ok(())
}
