//! Declarative queries compiled into stream pipelines.
//!
//! A [`QueryConfig`] describes what a consumer wants from a sample stream:
//! filtering and mapping before and after aggregation, grouping, time
//! windows and pair formulas. [`QueryCompiler::compile`] validates the
//! combination up front; the resulting [`CompiledQuery`] can then be attached
//! to any `Observable<Value>`.
//!
//! Stage order:
//!
//! 1. `filter_before`, `map_before`
//! 2. `window` wraps `group` or the plain aggregate
//! 3. `group`: per-key aggregate as `{key, <name>: result}`, all keys of a
//!    window folded into one array (`filter_after` applies per key)
//! 4. `pair`: formula over consecutive samples as `{<name>: result}`,
//!    optionally reduced again by `aggregate2`
//! 5. plain aggregate: `{<name>: result}`
//! 6. `filter_after` (without `group`), `map_after`, then the callback

use crate::expr::{number_value, Expr};
use crate::observable::Observable;
use crate::observer::FunctionObserver;
use crate::pair::{PairFormula, PairPoint};
use crate::quantize::{Linear, Pow2, Quantizer, Scale};
use crate::subscription::Subscription;
use probewire_core::{ProbeWireError, ProbeWireResult};
use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Receives every query result
pub type QueryCallback = Arc<dyn Fn(Value) + Send + Sync>;

/// Label of the first sample taken from a group without an aggregate
pub const SAMPLE_LABEL: &str = "sample";

/// Time window of a query, written `"span"` or `"span,shift"` in ms
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSpec {
    /// How long each window collects
    pub span: Duration,
    /// Distance between window openings
    pub shift: Duration,
}

impl WindowSpec {
    /// Contiguous windows of `span_ms`
    pub fn new(span_ms: u64) -> ProbeWireResult<Self> {
        Self::with_shift(span_ms, span_ms)
    }

    /// Windows of `span_ms` opening every `shift_ms`
    pub fn with_shift(span_ms: u64, shift_ms: u64) -> ProbeWireResult<Self> {
        if span_ms == 0 || shift_ms == 0 {
            return Err(ProbeWireError::config("window span and shift must be greater than 0"));
        }
        Ok(Self {
            span: Duration::from_millis(span_ms),
            shift: Duration::from_millis(shift_ms),
        })
    }
}

impl FromStr for WindowSpec {
    type Err = ProbeWireError;

    fn from_str(s: &str) -> ProbeWireResult<Self> {
        let parse = |part: &str| {
            part.trim()
                .parse::<u64>()
                .map_err(|_| ProbeWireError::config(format!("Invalid window '{s}'")))
        };
        match s.split(',').collect::<Vec<_>>().as_slice() {
            [span] => Self::new(parse(*span)?),
            [span, shift] => Self::with_shift(parse(*span)?, parse(*shift)?),
            _ => Err(ProbeWireError::config(format!("Invalid window '{s}'"))),
        }
    }
}

impl<'de> Deserialize<'de> for WindowSpec {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Millis(u64),
            Text(String),
        }
        let spec = match Raw::deserialize(deserializer)? {
            Raw::Millis(span) => WindowSpec::new(span),
            Raw::Text(text) => text.parse(),
        };
        spec.map_err(serde::de::Error::custom)
    }
}

/// What a consumer wants computed from its samples
#[derive(Clone, Default, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    /// Drop samples before anything else
    #[serde(alias = "filterBefore", alias = "filterbefore")]
    pub filter_before: Option<Expr>,
    /// Replace each sample before aggregation
    #[serde(alias = "mapBefore", alias = "mapbefore")]
    pub map_before: Option<Expr>,
    /// `name(expr[; expr2 ...])`
    pub aggregate: Option<String>,
    /// Reducer applied to pair results
    pub aggregate2: Option<String>,
    /// Group key
    pub group: Option<Expr>,
    /// Time window
    pub window: Option<WindowSpec>,
    /// Treat `aggregate` as a pair formula
    pub pair: bool,
    /// Drop results
    #[serde(alias = "filterAfter", alias = "filterafter")]
    pub filter_after: Option<Expr>,
    /// Replace each result
    #[serde(alias = "mapAfter", alias = "mapafter")]
    pub map_after: Option<Expr>,
    /// Result sink; set in code
    #[serde(skip)]
    pub callback: Option<QueryCallback>,
}

impl fmt::Debug for QueryConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryConfig")
            .field("filter_before", &self.filter_before)
            .field("map_before", &self.map_before)
            .field("aggregate", &self.aggregate)
            .field("aggregate2", &self.aggregate2)
            .field("group", &self.group)
            .field("window", &self.window)
            .field("pair", &self.pair)
            .field("filter_after", &self.filter_after)
            .field("map_after", &self.map_after)
            .field("callback", &self.callback.is_some())
            .finish()
    }
}

impl QueryConfig {
    /// Empty query: every sample passes through
    #[must_use] pub fn new() -> Self {
        Self::default()
    }

    /// Decode from JSON
    pub fn from_json(value: Value) -> ProbeWireResult<Self> {
        serde_json::from_value(value).map_err(|e| ProbeWireError::config(format!("Invalid query: {e}")))
    }

    /// Decode from TOML
    pub fn from_toml_str(content: &str) -> ProbeWireResult<Self> {
        toml_value(content).and_then(Self::from_json)
    }

    /// Set `filter_before`
    pub fn filter_before(mut self, expr: &str) -> ProbeWireResult<Self> {
        self.filter_before = Some(expr.parse()?);
        Ok(self)
    }

    /// Set `map_before`
    pub fn map_before(mut self, expr: &str) -> ProbeWireResult<Self> {
        self.map_before = Some(expr.parse()?);
        Ok(self)
    }

    /// Set `aggregate`
    #[must_use] pub fn aggregate(mut self, aggregate: &str) -> Self {
        self.aggregate = Some(aggregate.to_string());
        self
    }

    /// Set `aggregate2`
    #[must_use] pub fn aggregate2(mut self, aggregate: &str) -> Self {
        self.aggregate2 = Some(aggregate.to_string());
        self
    }

    /// Set `group`
    pub fn group(mut self, expr: &str) -> ProbeWireResult<Self> {
        self.group = Some(expr.parse()?);
        Ok(self)
    }

    /// Set `window` from its string form
    pub fn window(mut self, window: &str) -> ProbeWireResult<Self> {
        self.window = Some(window.parse()?);
        Ok(self)
    }

    /// Set `pair`
    #[must_use] pub fn pair(mut self, pair: bool) -> Self {
        self.pair = pair;
        self
    }

    /// Set `filter_after`
    pub fn filter_after(mut self, expr: &str) -> ProbeWireResult<Self> {
        self.filter_after = Some(expr.parse()?);
        Ok(self)
    }

    /// Set `map_after`
    pub fn map_after(mut self, expr: &str) -> ProbeWireResult<Self> {
        self.map_after = Some(expr.parse()?);
        Ok(self)
    }

    /// Set the result callback
    #[must_use] pub fn with_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        self.callback = Some(Arc::new(callback));
        self
    }
}

fn toml_value(content: &str) -> ProbeWireResult<Value> {
    let value: toml::Value = toml::from_str(content).map_err(|e| ProbeWireError::config(format!("Invalid query: {e}")))?;
    serde_json::to_value(value).map_err(ProbeWireError::from)
}

/// Reducer over a stream of values
#[derive(Debug, Clone, PartialEq)]
pub enum Reducer {
    /// Number of values
    Count,
    /// Sum of values
    Sum,
    /// Smallest value
    Min,
    /// Largest value
    Max,
    /// Arithmetic mean
    Average,
    /// Power-of-two histogram
    Quantize,
    /// Linear histogram
    LinearQuantize(Linear),
}

impl Reducer {
    /// Resolve a reducer by name with its extra arguments
    pub fn parse(name: &str, args: &[String]) -> ProbeWireResult<Self> {
        let simple = |reducer: Reducer| {
            if args.is_empty() {
                Ok(reducer)
            } else {
                Err(ProbeWireError::config(format!("Aggregate '{name}' takes a single expression")))
            }
        };
        match name {
            "count" => simple(Reducer::Count),
            "sum" => simple(Reducer::Sum),
            "min" => simple(Reducer::Min),
            "max" => simple(Reducer::Max),
            "average" => simple(Reducer::Average),
            "quantize" => simple(Reducer::Quantize),
            "lquantize" => {
                let [lower, upper, step] = args else {
                    return Err(ProbeWireError::config(
                        "lquantize needs lower bound, upper bound and step",
                    ));
                };
                let bound = |raw: &String| {
                    raw.trim()
                        .parse::<f64>()
                        .map_err(|_| ProbeWireError::config(format!("Invalid lquantize bound '{raw}'")))
                };
                Ok(Reducer::LinearQuantize(Linear::new(bound(lower)?, bound(upper)?, bound(step)?)?))
            }
            other if other.parse::<PairFormula>().is_ok() => Err(ProbeWireError::config(format!(
                "Aggregate '{other}' is a pair aggregate and requires pair"
            ))),
            other => Err(ProbeWireError::config(format!("Unknown aggregate '{other}'"))),
        }
    }

    /// Reduce `values` into one result emitted on completion
    #[must_use] pub fn apply(&self, values: &Observable<Value>) -> Observable<Value> {
        let numbers = || values.filter_map(|v: Value| v.as_f64());
        match self {
            Reducer::Count => values.count().map(Value::from),
            Reducer::Sum => numbers().sum().map(number_value),
            Reducer::Min => numbers().min().map(number_value),
            Reducer::Max => numbers().max().map(number_value),
            Reducer::Average => numbers().average().map(number_value),
            Reducer::Quantize => histogram(&numbers(), Pow2),
            Reducer::LinearQuantize(scale) => histogram(&numbers(), *scale),
        }
    }
}

fn histogram<S>(numbers: &Observable<f64>, scale: S) -> Observable<Value>
where
    S: Scale + Clone + 'static,
{
    numbers
        .reduce(Quantizer::new(scale), |mut q, v| {
            q.add(v);
            q
        })
        .map(|q| serde_json::to_value(q.histogram()).unwrap_or(Value::Null))
}

/// `name(arg; arg; ...)`
#[derive(Debug, Clone, PartialEq)]
struct Call {
    name: String,
    args: Vec<String>,
}

impl Call {
    fn parse(raw: &str) -> ProbeWireResult<Self> {
        let invalid = || ProbeWireError::config(format!("Invalid aggregate format '{raw}'"));
        let trimmed = raw.trim();
        let open = trimmed.find('(').ok_or_else(invalid)?;
        let inner = trimmed[open + 1..].strip_suffix(')').ok_or_else(invalid)?;
        let name = trimmed[..open].trim();
        if name.is_empty() {
            return Err(invalid());
        }
        Ok(Self {
            name: name.to_string(),
            args: inner.split(';').map(|a| a.trim().to_string()).collect(),
        })
    }

    /// First argument as a projection; the rest stay raw
    fn projection(&self) -> ProbeWireResult<(Option<Expr>, &[String])> {
        let (first, rest) = self.args.split_first().map_or(("", &[][..]), |(f, r)| (f.as_str(), r));
        let projection = if first.is_empty() { None } else { Some(first.parse()?) };
        Ok((projection, rest))
    }
}

#[derive(Debug, Clone)]
enum Aggregate {
    Reduce {
        name: String,
        projection: Option<Expr>,
        reducer: Reducer,
    },
    Pair {
        formula: PairFormula,
        numerator: Option<Expr>,
        denominator: Option<Expr>,
        then: Option<(String, Reducer)>,
    },
}

#[derive(Debug, Clone)]
struct Plan {
    filter_before: Option<Expr>,
    map_before: Option<Expr>,
    aggregate: Option<Aggregate>,
    group: Option<Expr>,
    window: Option<WindowSpec>,
    filter_after: Option<Expr>,
    map_after: Option<Expr>,
}

/// Validates query configs
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryCompiler;

impl QueryCompiler {
    /// Check `config` and turn it into an attachable pipeline
    pub fn compile(config: &QueryConfig) -> ProbeWireResult<CompiledQuery> {
        if config.pair {
            if config.aggregate.is_none() {
                return Err(ProbeWireError::config("pair requires an aggregate"));
            }
            if config.group.is_some() {
                return Err(ProbeWireError::config("pair cannot be combined with group"));
            }
            if config.window.is_some() {
                return Err(ProbeWireError::config("pair cannot be combined with window"));
            }
        } else if config.aggregate2.is_some() {
            return Err(ProbeWireError::config("aggregate2 requires pair"));
        }

        let aggregate = match &config.aggregate {
            None => None,
            Some(raw) if config.pair => Some(Self::pair_aggregate(raw, config.aggregate2.as_deref())?),
            Some(raw) => {
                let call = Call::parse(raw)?;
                let (projection, rest) = call.projection()?;
                let reducer = Reducer::parse(&call.name, rest)?;
                Some(Aggregate::Reduce { name: call.name.clone(), projection, reducer })
            }
        };

        let plan = Plan {
            filter_before: config.filter_before.clone(),
            map_before: config.map_before.clone(),
            aggregate,
            group: config.group.clone(),
            window: config.window,
            filter_after: config.filter_after.clone(),
            map_after: config.map_after.clone(),
        };
        debug!(?plan, "query compiled");
        Ok(CompiledQuery { plan: Arc::new(plan), callback: config.callback.clone() })
    }

    fn pair_aggregate(raw: &str, aggregate2: Option<&str>) -> ProbeWireResult<Aggregate> {
        let call = Call::parse(raw)?;
        let formula: PairFormula = call.name.parse()?;
        let (numerator, rest) = call.projection()?;
        let denominator = match rest {
            [] => None,
            [d] if d.is_empty() => None,
            [d] => Some(d.parse::<Expr>()?),
            _ => {
                return Err(ProbeWireError::config(format!(
                    "Pair aggregate '{formula}' takes at most two expressions"
                )))
            }
        };
        if formula.needs_numerator() && numerator.is_none() {
            return Err(ProbeWireError::config(format!("Pair aggregate '{formula}' needs an expression")));
        }
        if formula.needs_denominator() && denominator.is_none() {
            return Err(ProbeWireError::config(format!(
                "Pair aggregate '{formula}' needs a second expression"
            )));
        }
        let then = match aggregate2.map(str::trim) {
            None => None,
            Some(label) if label.contains('(') => {
                let call = Call::parse(label)?;
                let args: Vec<String> = call.args.into_iter().filter(|a| !a.is_empty()).collect();
                Some((label.to_string(), Reducer::parse(&call.name, &args)?))
            }
            Some(label) => Some((label.to_string(), Reducer::parse(label, &[])?)),
        };
        Ok(Aggregate::Pair { formula, numerator, denominator, then })
    }
}

/// Validated query, ready to be attached to sample streams
#[derive(Clone)]
pub struct CompiledQuery {
    plan: Arc<Plan>,
    callback: Option<QueryCallback>,
}

impl fmt::Debug for CompiledQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledQuery").field("plan", &self.plan).finish()
    }
}

impl CompiledQuery {
    /// Result stream over `source`
    #[must_use] pub fn build(&self, source: &Observable<Value>) -> Observable<Value> {
        let plan = self.plan.clone();
        let mut stream = source.clone();

        if let Some(filter) = plan.filter_before.clone() {
            stream = stream.filter(move |record| passes(&filter, record));
        }
        if let Some(map) = plan.map_before.clone() {
            stream = stream.map(move |record| map_record(&map, record));
        }

        let windowed = plan.window.is_some();
        let grouped = plan.group.is_some();
        let reduce = matches!(plan.aggregate, Some(Aggregate::Reduce { .. }));
        if windowed || grouped || reduce {
            let per_window = {
                let plan = plan.clone();
                move |records: Observable<Value>| plan.per_window(&records)
            };
            stream = match plan.window {
                Some(window) => stream
                    .window_with_time_and_shift(window.span, window.shift)
                    .flat_map(per_window),
                None => per_window(stream),
            };
        }

        if let Some(Aggregate::Pair { formula, numerator, denominator, then }) = plan.aggregate.clone() {
            let pairs = stream.zip(&stream.skip(1), move |old, new| {
                pair_value(formula, numerator.as_ref(), denominator.as_ref(), &old, &new)
            });
            stream = match then {
                Some((label, reducer)) => {
                    let label = format!("{label} {formula}");
                    reducer.apply(&pairs).map(move |result| labeled(&label, result))
                }
                None => pairs.map(move |result| labeled(formula.name(), result)),
            };
        }

        if !grouped {
            if let Some(filter) = plan.filter_after.clone() {
                stream = stream.filter(move |record| passes(&filter, record));
            }
        }
        if let Some(map) = plan.map_after.clone() {
            stream = stream.map(move |record| map_record(&map, record));
        }
        stream
    }

    /// Build over `source` and deliver results to the callback
    pub fn subscribe(&self, source: &Observable<Value>) -> Subscription {
        let callback = self.callback.clone();
        let observer = FunctionObserver::new(move |result: Value| {
            if let Some(callback) = &callback {
                callback(result);
            }
        })
        .with_error(|e| warn!("query failed: {e}"));
        self.build(source).subscribe(observer.shared())
    }
}

impl Plan {
    fn per_window(&self, records: &Observable<Value>) -> Observable<Value> {
        match &self.group {
            Some(key) => {
                let key = key.clone();
                let aggregate = self.aggregate.clone();
                let filter_after = self.filter_after.clone();
                let mut results = records
                    .group_by(move |record| match key.evaluate(record) {
                        Ok(k) => k,
                        Err(e) => {
                            warn!("group key failed: {e}");
                            Value::Null
                        }
                    })
                    .flat_map(move |group| {
                        let (label, result) = reduce_or_first(aggregate.as_ref(), &group.observable);
                        let key = group.key;
                        result.map(move |r| {
                            let mut record = Map::new();
                            record.insert("key".to_string(), key.clone());
                            record.insert(label.clone(), r);
                            Value::Object(record)
                        })
                    });
                if let Some(filter) = filter_after {
                    results = results.filter(move |record| passes(&filter, record));
                }
                results.to_vec().map(Value::Array)
            }
            None => {
                let (label, result) = reduce_or_first(self.aggregate.as_ref(), records);
                if label == SAMPLE_LABEL {
                    result
                } else {
                    result.map(move |r| labeled(&label, r))
                }
            }
        }
    }
}

fn reduce_or_first(aggregate: Option<&Aggregate>, records: &Observable<Value>) -> (String, Observable<Value>) {
    match aggregate {
        Some(Aggregate::Reduce { name, projection, reducer }) => {
            let values = match projection.clone() {
                Some(projection) => records.filter_map(move |record: Value| match projection.evaluate(&record) {
                    Ok(value) => Some(value),
                    Err(e) => {
                        warn!("aggregate projection failed: {e}");
                        None
                    }
                }),
                None => records.clone(),
            };
            (name.clone(), reducer.apply(&values))
        }
        _ => (SAMPLE_LABEL.to_string(), records.take(1)),
    }
}

fn labeled(label: &str, result: Value) -> Value {
    let mut record = Map::new();
    record.insert(label.to_string(), result);
    Value::Object(record)
}

fn passes(filter: &Expr, record: &Value) -> bool {
    filter.evaluate_bool(record).unwrap_or_else(|e| {
        warn!("filter dropped record: {e}");
        false
    })
}

fn map_record(map: &Expr, record: Value) -> Value {
    match map.evaluate(&record) {
        Ok(mapped) => mapped,
        Err(e) => {
            warn!("map failed: {e}");
            match record {
                Value::Object(mut fields) => {
                    fields.insert("error".to_string(), Value::String(e.to_string()));
                    Value::Object(fields)
                }
                other => {
                    let mut fields = Map::new();
                    fields.insert("value".to_string(), other);
                    fields.insert("error".to_string(), Value::String(e.to_string()));
                    Value::Object(fields)
                }
            }
        }
    }
}

fn pair_value(
    formula: PairFormula,
    numerator: Option<&Expr>,
    denominator: Option<&Expr>,
    old: &Value,
    new: &Value,
) -> Value {
    let point = |record: &Value| -> ProbeWireResult<PairPoint> {
        let project = |expr: Option<&Expr>| expr.map_or(Ok(0.0), |e| e.evaluate_f64(record));
        let t = record
            .get("timestamp")
            .and_then(Value::as_f64)
            .ok_or_else(|| ProbeWireError::evaluation("sample has no timestamp"))?;
        Ok(PairPoint { n: project(numerator)?, d: project(denominator)?, t })
    };
    match (point(old), point(new)) {
        (Ok(old), Ok(new)) => number_value(formula.compute(old, new)),
        (Err(e), _) | (_, Err(e)) => {
            warn!("pair projection failed: {e}");
            Value::Null
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_call_grammar() {
        let call = Call::parse(" lquantize(args[0]; 0; 100; 10) ").unwrap();
        assert_eq!(call.name, "lquantize");
        assert_eq!(call.args, vec!["args[0]", "0", "100", "10"]);

        let call = Call::parse("count()").unwrap();
        assert_eq!(call.projection().unwrap().0.map(|e| e.source().to_string()), None);

        assert!(Call::parse("count").is_err());
        assert!(Call::parse("(x)").is_err());
        assert!(Call::parse("sum(x").is_err());
    }

    #[test]
    fn test_window_spec() {
        assert_eq!("1000".parse::<WindowSpec>().unwrap(), WindowSpec::new(1000).unwrap());
        let spec: WindowSpec = "1000, 250".parse().unwrap();
        assert_eq!(spec.shift, Duration::from_millis(250));
        assert!("0".parse::<WindowSpec>().is_err());
        assert!("abc".parse::<WindowSpec>().is_err());
        assert!("1,2,3".parse::<WindowSpec>().is_err());

        let spec: WindowSpec = serde_json::from_value(json!(500)).unwrap();
        assert_eq!(spec.span, Duration::from_millis(500));
    }

    #[test]
    fn test_reducer_names() {
        assert_eq!(Reducer::parse("sum", &[]).unwrap(), Reducer::Sum);
        assert!(matches!(
            Reducer::parse("lquantize", &["0".into(), "10".into(), "5".into()]).unwrap(),
            Reducer::LinearQuantize(_)
        ));
        assert!(Reducer::parse("lquantize", &["0".into(), "10".into()]).is_err());
        assert!(Reducer::parse("lquantize", &["10".into(), "0".into(), "5".into()]).is_err());
        assert!(Reducer::parse("sum", &["1".into()]).is_err());
        assert!(Reducer::parse("delta", &[]).is_err());
        assert!(Reducer::parse("median", &[]).is_err());
    }

    #[test]
    fn test_config_aliases() {
        let config = QueryConfig::from_json(json!({
            "filterBefore": "hits > 0",
            "mapafter": "_",
            "aggregate": "count()",
            "window": "1000,500",
        }))
        .unwrap();
        assert!(config.filter_before.is_some());
        assert!(config.map_after.is_some());
        assert_eq!(config.window.unwrap().shift, Duration::from_millis(500));

        let config = QueryConfig::from_toml_str("filter_after = \"count > 1\"\npair = false\n").unwrap();
        assert!(config.filter_after.is_some());

        assert!(QueryConfig::from_json(json!({"filterBefore": "hits >"})).is_err());
    }

    #[test]
    fn test_pair_value_projection_failure_is_null() {
        let n: Expr = "args[0]".parse().unwrap();
        let old = json!({"timestamp": 0, "args": [1]});
        let new = json!({"timestamp": 10, "args": ["x"]});
        assert_eq!(pair_value(PairFormula::Delta, Some(&n), None, &old, &new), Value::Null);

        let new = json!({"timestamp": 10, "args": [6]});
        assert_eq!(pair_value(PairFormula::Delta, Some(&n), None, &old, &new), json!(5));
        assert_eq!(pair_value(PairFormula::ElapsedTime, None, None, &old, &new), json!(10));
    }

    #[test]
    fn test_map_error_attaches_to_record() {
        let map: Expr = "probe * 2".parse().unwrap();
        let mapped = map_record(&map, json!({"probe": "cpu"}));
        assert_eq!(mapped["probe"], json!("cpu"));
        assert!(mapped["error"].as_str().unwrap().contains("needs numbers"));
    }
}
