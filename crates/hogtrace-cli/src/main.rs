//! Reference host binding for HogTrace.
//!
//! Compiles a probe source file, builds a frame from `name=value` literal
//! pairs given on the command line, and runs every probe in the program
//! against that single frame once. This exists to exercise the public API
//! end-to-end (compile → serialize → deserialize → execute_probe) — it is
//! not a production host integration.

use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};
use std::{env, fs, process::ExitCode};

use hogtrace::{compile, execute_probe, Dispatcher, DispatcherError, ExecutorLimits, Program, RequestStore, RunContext, Value, SAMPLE_OK_IDENT};

fn main() -> ExitCode {
    let args: Vec<String> = env::args().collect();
    let Some(source_path) = args.get(1) else {
        eprintln!("usage: hogtrace <probe-source-file> [name=value ...]");
        return ExitCode::FAILURE;
    };

    let source = match fs::read_to_string(source_path) {
        Ok(s) => s,
        Err(err) => {
            eprintln!("error: couldn't read {source_path}: {err}");
            return ExitCode::FAILURE;
        }
    };

    let program = match compile(&source) {
        Ok(p) => p,
        Err(err) => {
            eprintln!("error: {err}");
            return ExitCode::FAILURE;
        }
    };

    // Round-trip through the wire format so the CLI exercises the same
    // path a real host would (compile once, ship bytes, run many times).
    let bytes = program.serialize();
    let program = match Program::deserialize(&bytes) {
        Ok(p) => p,
        Err(err) => {
            eprintln!("error: failed to decode serialized program: {err}");
            return ExitCode::FAILURE;
        }
    };

    let mut frame = BTreeMap::new();
    for assignment in &args[2..] {
        let Some((name, literal)) = assignment.split_once('=') else {
            eprintln!("error: expected name=value, got '{assignment}'");
            return ExitCode::FAILURE;
        };
        frame.insert(name.to_owned(), parse_literal(literal));
    }

    let mut dispatcher = FrameDispatcher { frame };
    let mut request_store = RequestStore::new();
    let ctx = RunContext {
        session_id: "cli-session".to_owned(),
        request_id: "cli-request".to_owned(),
        timestamp: now_seconds(),
    };
    let limits = ExecutorLimits::default();

    for probe in &program.probes {
        match execute_probe(&program, probe, &mut dispatcher, &mut request_store, &ctx, &limits) {
            None => println!("{}: predicate false, no capture", probe.id),
            Some(batch) => {
                for event in &batch.events {
                    println!("{}: capture {:?}", probe.id, event.values);
                }
                for error in &batch.errors {
                    eprintln!("{}: runtime error (non-fatal): {error}", probe.id);
                }
            }
        }
    }

    ExitCode::SUCCESS
}

fn now_seconds() -> f64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs_f64()).unwrap_or(0.0)
}

fn parse_literal(s: &str) -> Value<NoObject> {
    match s {
        "True" => Value::Bool(true),
        "False" => Value::Bool(false),
        "None" => Value::None,
        _ => {
            if let Ok(n) = s.parse::<i64>() {
                Value::Int(n)
            } else if let Ok(f) = s.parse::<f64>() {
                Value::Float(f)
            } else {
                Value::String(s.to_owned())
            }
        }
    }
}

/// The reference binding has no host object model, so `Object` is this
/// empty marker — `get_attribute`/`get_item` always fail against it.
#[derive(Debug, Clone, PartialEq)]
struct NoObject;

impl std::fmt::Display for NoObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "<object>")
    }
}

/// A toy dispatcher over a flat `name -> literal` frame.
struct FrameDispatcher {
    frame: BTreeMap<String, Value<NoObject>>,
}

impl Dispatcher for FrameDispatcher {
    type Object = NoObject;

    fn load_variable(&mut self, name: &str) -> Result<Value<NoObject>, DispatcherError> {
        if name == SAMPLE_OK_IDENT {
            return Ok(Value::Bool(true));
        }
        self.frame
            .get(name)
            .cloned()
            .ok_or_else(|| DispatcherError::new(format!("unknown frame variable '{name}'")))
    }

    fn get_attribute(&mut self, _obj: &Value<NoObject>, field: &str) -> Result<Value<NoObject>, DispatcherError> {
        Err(DispatcherError::new(format!("no attributes on literal frame values (field '{field}')")))
    }

    fn get_item(&mut self, _obj: &Value<NoObject>, _key: &Value<NoObject>) -> Result<Value<NoObject>, DispatcherError> {
        Err(DispatcherError::new("no indexing on literal frame values"))
    }

    fn call_function(&mut self, name: &str, args: &[Value<NoObject>]) -> Result<Value<NoObject>, DispatcherError> {
        match name {
            "timestamp" => Ok(Value::Float(now_seconds())),
            "rand" => Ok(Value::Float(0.0)),
            "len" => match args.first() {
                Some(Value::String(s)) => Ok(Value::Int(s.len() as i64)),
                other => Err(DispatcherError::new(format!("len: unsupported argument {other:?}"))),
            },
            "str" => Ok(Value::String(match args.first() {
                Some(Value::String(s)) => s.clone(),
                Some(Value::Int(n)) => n.to_string(),
                Some(Value::Float(f)) => f.to_string(),
                Some(Value::Bool(b)) => b.to_string(),
                Some(Value::None) | None => "None".to_owned(),
                Some(Value::Object(obj)) => obj.to_string(),
            })),
            "int" => match args.first() {
                Some(Value::Int(n)) => Ok(Value::Int(*n)),
                Some(Value::Float(f)) => Ok(Value::Int(*f as i64)),
                Some(Value::String(s)) => s.parse().map(Value::Int).map_err(|_| DispatcherError::new("int: bad literal")),
                other => Err(DispatcherError::new(format!("int: unsupported argument {other:?}"))),
            },
            "float" => match args.first() {
                Some(Value::Int(n)) => Ok(Value::Float(*n as f64)),
                Some(Value::Float(f)) => Ok(Value::Float(*f)),
                other => Err(DispatcherError::new(format!("float: unsupported argument {other:?}"))),
            },
            other => Err(DispatcherError::new(format!("unknown function '{other}'"))),
        }
    }

    fn truthy(&mut self, _obj: &NoObject) -> bool {
        true
    }
}
