use anyhow::{Result, bail};
use parade::testing::*;
use parade::*;
use std::collections::BTreeMap;

#[test]
fn word_count_with_flat_map_and_reduce() -> Result<()> {
    let p = TestPipeline::new();
    let text = vec![
        "abc test abc test test xyz".to_string(),
        "abc test2 abc test cde xyz".to_string(),
    ];

    let counts = from_vec(&p, text)
        .flat_map(|line: String| {
            line.split(' ')
                .map(|w| (w.to_string(), 1u64))
                .collect::<Vec<_>>()
        })
        .reduce_by_key(|a, b| a + b)
        .collect()?;

    let expected: Vec<(String, u64)> = [
        ("abc", 4),
        ("test", 4),
        ("xyz", 2),
        ("test2", 1),
        ("cde", 1),
    ]
    .into_iter()
    .map(|(w, n)| (w.to_string(), n))
    .collect();
    assert_keys_strictly_sorted(&counts);
    assert_collections_unordered_equal(&counts, &expected);
    Ok(())
}

#[test]
fn word_count_over_uneven_lines() -> Result<()> {
    let p = TestPipeline::new();
    let text = vec![
        "the quick brown fox".to_string(),
        "jumps over the lazy dog".to_string(),
        "the dog sleeps".to_string(),
        String::new(),
        "quick quick".to_string(),
    ];

    let mut expected: BTreeMap<String, u64> = BTreeMap::new();
    for word in text.iter().flat_map(|l| l.split_whitespace()) {
        *expected.entry(word.to_string()).or_default() += 1;
    }

    let counts = from_vec(&p, text)
        .flat_map(|line: String| {
            line.split_whitespace()
                .map(|w| (w.to_string(), 1u64))
                .collect::<Vec<_>>()
        })
        .reduce_by_key(|a, b| a + b)
        .collect()?;

    assert_collections_equal(&counts, &expected.into_iter().collect::<Vec<_>>());
    Ok(())
}

#[test]
fn chained_maps_preserve_order() -> Result<()> {
    let p = TestPipeline::new();
    let out = from_iter_fn_with_len(&p, 100_000, || 0..100_000u64)
        .map(|x| x + 1)
        .map(|x| x + 1)
        .collect()?;

    assert_collections_equal(&out, &(2..100_002).collect::<Vec<_>>());
    Ok(())
}

#[test]
fn group_by_key_means() -> Result<()> {
    let p = TestPipeline::new();
    let means = from_iter_fn(&p, || 0..1_000_000u64)
        .map(|a| ((a + 1) % 10, a + 1))
        .group_by_key()
        .map(|(key, values): (u64, Vec<u64>)| {
            #[allow(clippy::cast_precision_loss)]
            let mean = values.iter().sum::<u64>() as f64 / values.len() as f64;
            (key, mean)
        })
        .collect()?;

    assert_eq!(means.len(), 10);
    for &(key, mean) in &means {
        assert!((mean - 500_000.0).abs() < 10.0, "key {key}: mean {mean}");
    }
    let keys: Vec<u64> = means.iter().map(|(k, _)| *k).collect();
    assert_eq!(keys, (0..10).collect::<Vec<u64>>());
    Ok(())
}

#[test]
fn fold_sums_a_million_values() -> Result<()> {
    let p = TestPipeline::new();
    let sum = from_iter_fn(&p, || 0..1_000_000u64)
        .map(|a| ((a + 1) % 100_000, a + 1))
        .map(|(_, v): (u64, u64)| v)
        .fold(0, |a, b| a + b);

    assert_eq!(sum.len()?, 1);
    assert_eq!(sum.collect()?, vec![(1..=1_000_000u64).sum::<u64>()]);
    Ok(())
}

#[test]
fn error_among_sixteen_workers_follows_every_earlier_result() {
    const BAD: u64 = 654_321;
    let exec = ParMap::new(16, |x: u64| {
        if x == BAD {
            bail!("cannot handle {x}");
        }
        Ok(x * 2)
    });

    let mut values = Vec::new();
    let mut errors = Vec::new();
    for result in exec.map(0..1_000_000u64) {
        match result {
            Ok(v) => {
                assert!(errors.is_empty(), "value {v} yielded after the error");
                values.push(v);
            }
            Err(e) => errors.push(e),
        }
    }

    assert_eq!(errors.len(), 1);
    let PipelineError::Transformation { source, .. } = &errors[0] else {
        panic!("unexpected error: {:?}", errors[0]);
    };
    assert!(source.to_string().contains("cannot handle 654321"));
    // every element of the batches before the failing one, in order
    assert!(!values.is_empty());
    assert!(values.len() as u64 <= BAD);
    assert_eq!(values, (0..values.len() as u64).map(|x| x * 2).collect::<Vec<_>>());
}

#[test]
fn error_among_sixteen_workers_is_reported_once() -> Result<()> {
    let p = TestPipeline::with_config(TestPipeline::config().with_workers(16));
    let seen = from_vec(&p, (0..200_000u32).collect::<Vec<u32>>()).try_map(|x| {
        if x == 123_456 {
            bail!("cannot handle {x}");
        }
        Ok(x)
    });

    let runner = seen.runner()?;
    let err = runner.collect().unwrap_err();
    assert!(matches!(
        err.downcast_ref::<PipelineError>(),
        Some(PipelineError::Transformation { .. })
    ));
    let rendered = format!("{err:#}");
    assert!(rendered.contains("cannot handle 123456"), "{rendered}");
    assert_eq!(rendered.matches("transformation failed").count(), 1);
    assert_all_finished(&runner.status());
    Ok(())
}
