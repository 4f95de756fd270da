use parking_lot::Mutex;
use probewire_core::ProbeWireError;
use probewire_streams::{Observable, Observer, QueryCompiler, QueryConfig, Subject};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::time::{sleep, Duration};

fn sample(probe: &str, timestamp: i64, args: Value) -> Value {
    json!({"provider": "host", "module": "os", "probe": probe, "timestamp": timestamp, "hits": 1, "args": args})
}

fn run(config: QueryConfig, records: Vec<Value>) -> Vec<Value> {
    let results = Arc::new(Mutex::new(Vec::new()));
    let sink = results.clone();
    let query = QueryCompiler::compile(&config.with_callback(move |r| sink.lock().push(r))).unwrap();
    query.subscribe(&Observable::of(records));
    let results = results.lock().clone();
    results
}

fn config_error(config: &QueryConfig) -> bool {
    matches!(QueryCompiler::compile(config), Err(ProbeWireError::Configuration(_)))
}

#[test]
fn test_without_stages_passes_through() {
    let records = vec![sample("cpu", 0, json!([1])), sample("cpu", 1, json!([2]))];
    assert_eq!(run(QueryConfig::new(), records.clone()), records);
}

#[test]
fn test_plain_aggregates() {
    let records: Vec<Value> = (1..=4).map(|i| sample("cpu", i, json!([i]))).collect();
    assert_eq!(run(QueryConfig::new().aggregate("sum(args[0])"), records.clone()), vec![json!({"sum": 10})]);
    assert_eq!(run(QueryConfig::new().aggregate("count()"), records.clone()), vec![json!({"count": 4})]);
    assert_eq!(run(QueryConfig::new().aggregate("average(args[0])"), records.clone()), vec![json!({"average": 2.5})]);
    assert_eq!(run(QueryConfig::new().aggregate("max(args[0] * 10)"), records), vec![json!({"max": 40})]);
}

#[test]
fn test_before_and_after_stages() {
    let records: Vec<Value> = (1..=6).map(|i| sample("cpu", i, json!([i]))).collect();
    let config = QueryConfig::new()
        .filter_before("args[0] % 2 == 0")
        .unwrap()
        .map_before("{v: args[0] * 100}")
        .unwrap()
        .aggregate("sum(v)")
        .filter_after("sum > 100")
        .unwrap()
        .map_after("sum / 100")
        .unwrap();
    assert_eq!(run(config, records), vec![json!(12)]);
}

#[test]
fn test_failing_stages_degrade_per_record() {
    let records = vec![
        sample("cpu", 0, json!([1])),
        sample("cpu", 1, json!(["oops"])),
        sample("cpu", 2, json!([3])),
    ];
    let config = QueryConfig::new().filter_before("args[0] * 1 >= 0").unwrap();
    assert_eq!(run(config, records.clone()).len(), 2);

    let config = QueryConfig::new().aggregate("sum(args[0] * 1)");
    assert_eq!(run(config, records.clone()), vec![json!({"sum": 4})]);

    let config = QueryConfig::new().map_before("args[0] * 2").unwrap();
    let results = run(config, records);
    assert_eq!(results[0], json!(2));
    assert!(results[1]["error"].is_string());
}

#[test]
fn test_group_by_key() {
    let records = vec![
        sample("cpu", 0, json!([1])),
        sample("mem", 1, json!([5])),
        sample("cpu", 2, json!([3])),
    ];
    let config = QueryConfig::new().group("probe").unwrap().aggregate("sum(args[0])");
    assert_eq!(
        run(config, records.clone()),
        vec![json!([{"key": "cpu", "sum": 4}, {"key": "mem", "sum": 5}])]
    );

    let config = QueryConfig::new()
        .group("probe")
        .unwrap()
        .aggregate("count()")
        .filter_after("count > 1")
        .unwrap();
    assert_eq!(run(config, records.clone()), vec![json!([{"key": "cpu", "count": 2}])]);

    let config = QueryConfig::new().group("probe").unwrap();
    let results = run(config, records);
    assert_eq!(results[0][0]["key"], json!("cpu"));
    assert_eq!(results[0][0]["sample"]["timestamp"], json!(0));
    assert_eq!(results[0][1]["sample"]["probe"], json!("mem"));
}

#[test]
fn test_pair_formulas() {
    let records = vec![
        sample("io", 1_000, json!([10, 100])),
        sample("io", 2_000, json!([20, 200])),
    ];
    let cases = [
        ("delta(args[0])", json!({"delta": 10})),
        ("elapsed_time()", json!({"elapsed_time": 1000})),
        ("fraction(args[0]; args[1])", json!({"fraction": 0.1})),
        ("rate_per_second(args[0])", json!({"rate_per_second": 10})),
    ];
    for (aggregate, expected) in cases {
        let config = QueryConfig::new().pair(true).aggregate(aggregate);
        assert_eq!(run(config, records.clone()), vec![expected], "{aggregate}");
    }
}

#[test]
fn test_pair_then_reduce() {
    let records: Vec<Value> = [0, 10, 30, 60].iter().enumerate()
        .map(|(i, n)| sample("io", i as i64 * 1_000, json!([n])))
        .collect();
    let config = QueryConfig::new().pair(true).aggregate("delta(args[0])");
    assert_eq!(
        run(config, records.clone()),
        vec![json!({"delta": 10}), json!({"delta": 20}), json!({"delta": 30})]
    );

    let config = QueryConfig::new().pair(true).aggregate("delta(args[0])").aggregate2("average");
    assert_eq!(run(config, records), vec![json!({"average delta": 20})]);
}

#[test]
fn test_quantize_aggregates() {
    let records: Vec<Value> = [1, 1, 3, 40].iter().map(|n| sample("lat", 0, json!([n]))).collect();
    let results = run(QueryConfig::new().aggregate("quantize(args[0])"), records.clone());
    let histogram = &results[0]["quantize"];
    assert_eq!(histogram["minIndex"], json!(1));
    assert_eq!(histogram["maxIndex"], json!(6));
    assert_eq!(histogram["maxCount"], json!(2));
    assert_eq!(histogram["buckets"][0]["count"], json!(2));

    let results = run(QueryConfig::new().aggregate("lquantize(args[0]; 0; 10; 5)"), records);
    let histogram = &results[0]["lquantize"];
    assert_eq!(histogram["minIndex"], json!(1));
    assert_eq!(histogram["buckets"][0]["count"], json!(3));
}

#[test]
fn test_invalid_combinations_rejected() {
    assert!(config_error(&QueryConfig::new().pair(true).aggregate("delta(args[0])").window("1000").unwrap()));
    assert!(config_error(&QueryConfig::new().pair(true).aggregate("delta(args[0])").group("probe").unwrap()));
    assert!(config_error(&QueryConfig::new().pair(true)));
    assert!(config_error(&QueryConfig::new().aggregate("sum(args[0])").aggregate2("average")));
    assert!(config_error(&QueryConfig::new().aggregate("delta(args[0])")));
    assert!(config_error(&QueryConfig::new().pair(true).aggregate("sum(args[0])")));
    assert!(config_error(&QueryConfig::new().pair(true).aggregate("delta()")));
    assert!(config_error(&QueryConfig::new().pair(true).aggregate("fraction(args[0])")));
    assert!(config_error(&QueryConfig::new().aggregate("median(args[0])")));
    assert!(config_error(&QueryConfig::new().aggregate("sum args[0]")));
    assert!(config_error(&QueryConfig::new().aggregate("sum(args[0")));
    assert!(config_error(&QueryConfig::new().aggregate("lquantize(args[0]; 10; 0; 1)")));
    assert!(config_error(&QueryConfig::new().aggregate("lquantize(args[0]; 0; 10; 0)")));
    assert!(QueryConfig::new().window("0").is_err());
    assert!(QueryConfig::new().group("probe ==").is_err());
}

#[tokio::test(start_paused = true)]
async fn test_windowed_count() {
    let source = Subject::new();
    let results = Arc::new(Mutex::new(Vec::new()));
    let sink = results.clone();
    let config = QueryConfig::new()
        .window("1000")
        .unwrap()
        .aggregate("count()")
        .with_callback(move |r| sink.lock().push(r));
    let query = QueryCompiler::compile(&config).unwrap();
    let _subscription = query.subscribe(&source.as_observable());

    for i in 0..6 {
        source.on_next(sample("cpu", i * 400, json!([i])));
        sleep(Duration::from_millis(400)).await;
    }
    source.on_completed();

    assert_eq!(
        *results.lock(),
        vec![json!({"count": 3}), json!({"count": 2}), json!({"count": 1})]
    );
}

#[tokio::test(start_paused = true)]
async fn test_windowed_groups_and_first_samples() {
    let source = Subject::new();
    let results = Arc::new(Mutex::new(Vec::new()));
    let sink = results.clone();
    let config = QueryConfig::new()
        .window("1000")
        .unwrap()
        .group("probe")
        .unwrap()
        .aggregate("max(args[0])")
        .with_callback(move |r| sink.lock().push(r));
    let query = QueryCompiler::compile(&config).unwrap();
    let _grouped = query.subscribe(&source.as_observable());

    let firsts = Arc::new(Mutex::new(Vec::new()));
    let sink = firsts.clone();
    let config = QueryConfig::new().window("1000").unwrap().with_callback(move |r| sink.lock().push(r));
    let _first = QueryCompiler::compile(&config).unwrap().subscribe(&source.as_observable());

    source.on_next(sample("cpu", 0, json!([1])));
    source.on_next(sample("mem", 0, json!([7])));
    source.on_next(sample("cpu", 0, json!([4])));
    sleep(Duration::from_millis(1_100)).await;
    source.on_next(sample("cpu", 1_100, json!([2])));
    sleep(Duration::from_millis(1_000)).await;

    assert_eq!(
        *results.lock(),
        vec![
            json!([{"key": "cpu", "max": 4}, {"key": "mem", "max": 7}]),
            json!([{"key": "cpu", "max": 2}]),
        ]
    );
    let firsts = firsts.lock();
    assert_eq!(firsts.len(), 2);
    assert_eq!(firsts[0]["args"], json!([1]));
    assert_eq!(firsts[1]["timestamp"], json!(1_100));
}
