//! End-to-end scenarios covering compile -> wire round-trip -> execute.

use std::collections::BTreeMap;

use hogtrace::{
    coerce_bool, compile, execute_probe, CaptureBatch, Dispatcher, DispatcherError, ExecutorLimits, Program, RequestStore, RunContext,
    Value,
};

#[derive(Debug, Clone, PartialEq)]
enum Obj {
    List(Vec<Value<Obj>>),
    Map(BTreeMap<String, Value<Obj>>),
}

impl std::fmt::Display for Obj {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

struct TestHost {
    frame: BTreeMap<String, Value<Obj>>,
    sample_ok: bool,
}

impl TestHost {
    fn new() -> Self {
        Self {
            frame: BTreeMap::new(),
            sample_ok: true,
        }
    }

    fn with(mut self, name: &str, value: Value<Obj>) -> Self {
        self.frame.insert(name.to_owned(), value);
        self
    }
}

impl Dispatcher for TestHost {
    type Object = Obj;

    fn load_variable(&mut self, name: &str) -> Result<Value<Obj>, DispatcherError> {
        if name == hogtrace::SAMPLE_OK_IDENT {
            return Ok(Value::Bool(self.sample_ok));
        }
        self.frame.get(name).cloned().ok_or_else(|| DispatcherError::new(format!("unbound: {name}")))
    }

    fn get_attribute(&mut self, obj: &Value<Obj>, field: &str) -> Result<Value<Obj>, DispatcherError> {
        match obj {
            Value::Object(Obj::Map(m)) => m.get(field).cloned().ok_or_else(|| DispatcherError::new(format!("no field {field}"))),
            _ => Err(DispatcherError::new("attribute access on non-map value")),
        }
    }

    fn get_item(&mut self, obj: &Value<Obj>, key: &Value<Obj>) -> Result<Value<Obj>, DispatcherError> {
        match (obj, key) {
            (Value::Object(Obj::List(items)), Value::Int(i)) => {
                items.get(*i as usize).cloned().ok_or_else(|| DispatcherError::new("index out of range"))
            }
            (Value::Object(Obj::Map(m)), Value::String(k)) => m.get(k).cloned().ok_or_else(|| DispatcherError::new("missing key")),
            _ => Err(DispatcherError::new("unsupported index operation")),
        }
    }

    fn call_function(&mut self, name: &str, args: &[Value<Obj>]) -> Result<Value<Obj>, DispatcherError> {
        match name {
            "timestamp" => Ok(Value::Float(1000.0)),
            "rand" => Ok(Value::Float(0.0)),
            "len" => match args.first() {
                Some(Value::Object(Obj::List(items))) => Ok(Value::Int(items.len() as i64)),
                Some(Value::String(s)) => Ok(Value::Int(s.len() as i64)),
                _ => Err(DispatcherError::new("len: unsupported argument")),
            },
            other => Err(DispatcherError::new(format!("unknown function {other}"))),
        }
    }

    fn truthy(&mut self, _obj: &Obj) -> bool {
        true
    }
}

fn run_once(src: &str, host: TestHost) -> Option<CaptureBatch<Obj>> {
    let program = compile(src).unwrap();
    let bytes = program.serialize();
    let program = Program::deserialize(&bytes).unwrap();
    let mut host = host;
    let mut store = RequestStore::new();
    let ctx = RunContext {
        session_id: "s".into(),
        request_id: "r".into(),
        timestamp: 0.0,
    };
    execute_probe(&program, &program.probes[0], &mut host, &mut store, &ctx, &ExecutorLimits::default())
}

#[test]
fn scenario_basic_capture() {
    let batch = run_once("fn:m.f:entry { capture(arg0); }", TestHost::new().with("arg0", Value::Int(42))).unwrap();
    assert_eq!(batch.events.len(), 1);
    assert_eq!(batch.events[0].values.get("arg0"), Some(&Value::Int(42)));
}

#[test]
fn scenario_predicate_filters() {
    let src = "fn:m.f:entry / arg0 == \"admin\" / { capture(arg0); }";
    assert!(run_once(src, TestHost::new().with("arg0", Value::String("user".into()))).is_none());
    let batch = run_once(src, TestHost::new().with("arg0", Value::String("admin".into()))).unwrap();
    assert_eq!(batch.events[0].values.get("arg0"), Some(&Value::String("admin".into())));
}

#[test]
fn scenario_request_scope_across_probes() {
    let program_a = compile("fn:m.f:entry { $req.t = timestamp(); }").unwrap();
    let program_b = compile("fn:m.f:exit { capture(dur = timestamp() - $req.t); }").unwrap();
    let mut host = TestHost::new();
    let mut store = RequestStore::new();
    let ctx = RunContext {
        session_id: "s".into(),
        request_id: "r".into(),
        timestamp: 0.0,
    };
    let limits = ExecutorLimits::default();

    execute_probe(&program_a, &program_a.probes[0], &mut host, &mut store, &ctx, &limits);
    let batch = execute_probe(&program_b, &program_b.probes[0], &mut host, &mut store, &ctx, &limits).unwrap();
    assert_eq!(batch.events.len(), 1);
    match batch.events[0].values.get("dur") {
        Some(Value::Float(dur)) => assert!(*dur >= 0.0),
        other => panic!("expected a float duration, got {other:?}"),
    }
}

#[test]
fn scenario_request_scope_alone_produces_type_mismatch() {
    let program_b = compile("fn:m.f:exit { capture(dur = timestamp() - $req.t); }").unwrap();
    let mut host = TestHost::new();
    let mut store = RequestStore::new();
    let ctx = RunContext {
        session_id: "s".into(),
        request_id: "r".into(),
        timestamp: 0.0,
    };
    let batch = execute_probe(&program_b, &program_b.probes[0], &mut host, &mut store, &ctx, &ExecutorLimits::default()).unwrap();
    assert!(batch.events.is_empty());
    assert!(!batch.errors.is_empty());
}

#[test]
fn scenario_nested_access() {
    let src = "fn:m.f:entry / len(args) > 2 && arg0.data[0][\"v\"] >= 100 / { capture(v = arg0.data[0][\"v\"]); }";
    let mut inner_map = BTreeMap::new();
    inner_map.insert("v".to_owned(), Value::Int(150));
    let data = Obj::List(vec![Value::Object(Obj::Map(inner_map))]);
    let mut arg0_map = BTreeMap::new();
    arg0_map.insert("data".to_owned(), Value::Object(data));
    let args = Obj::List(vec![Value::Int(1), Value::Int(2), Value::Int(3)]);

    let host = TestHost::new()
        .with("args", Value::Object(args))
        .with("arg0", Value::Object(Obj::Map(arg0_map)));
    let batch = run_once(src, host).unwrap();
    assert_eq!(batch.events[0].values.get("v"), Some(&Value::Int(150)));
}

#[test]
fn scenario_nested_access_filtered_out_when_structure_mismatches() {
    let src = "fn:m.f:entry / len(args) > 2 && arg0.data[0][\"v\"] >= 100 / { capture(v = arg0.data[0][\"v\"]); }";
    let args = Obj::List(vec![Value::Int(1)]); // len(args) == 1, predicate fails
    let host = TestHost::new().with("args", Value::Object(args)).with("arg0", Value::None);
    assert!(run_once(src, host).is_none());
}

#[test]
fn scenario_per_request_sampling_applies_uniformly() {
    let program_a = compile("fn:m.f:entry / __sample_ok__ / { capture(arg0); }").unwrap();
    let mut store = RequestStore::new();
    let ctx = RunContext {
        session_id: "s".into(),
        request_id: "r".into(),
        timestamp: 0.0,
    };
    let limits = ExecutorLimits::default();

    let mut sampled_out = TestHost::new().with("arg0", Value::Int(1));
    sampled_out.sample_ok = false;
    assert!(execute_probe(&program_a, &program_a.probes[0], &mut sampled_out, &mut store, &ctx, &limits).is_none());

    let mut sampled_in = TestHost::new().with("arg0", Value::Int(1));
    sampled_in.sample_ok = true;
    assert!(execute_probe(&program_a, &program_a.probes[0], &mut sampled_in, &mut store, &ctx, &limits).is_some());
}

#[test]
fn scenario_pathological_input_hits_instruction_cap() {
    let mut src = String::from("fn:m.f:entry { ");
    for _ in 0..10_001 {
        src.push_str("capture(1); ");
    }
    src.push('}');
    let batch = run_once(&src, TestHost::new()).unwrap();
    assert!(!batch.events.is_empty());
    assert!(batch.events.len() < 10_001);
    assert!(!batch.errors.is_empty());
}

#[test]
fn empty_predicate_coerces_true_via_coerce_bool_helper() {
    // Exercises the public coerce_bool re-export directly, matching spec
    // §4.6's truthiness table for each Value kind.
    let mut host = TestHost::new();
    assert!(coerce_bool(&Value::Bool(true), &mut host));
    assert!(!coerce_bool(&Value::None, &mut host));
    assert!(coerce_bool(&Value::Int(1), &mut host));
    assert!(!coerce_bool(&Value::Int(0), &mut host));
    assert!(coerce_bool(&Value::String("x".into()), &mut host));
    assert!(!coerce_bool(&Value::String(String::new()), &mut host));
}
