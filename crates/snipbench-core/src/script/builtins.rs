//! The global library available to snippets: `Math`, `JSON`, `Object`,
//! `Array`, `Map`, `Set`, `Promise`, timers and friends, plus the methods
//! reachable on primitive and built-in receivers.

use std::cell::{Cell, RefCell};
use std::cmp::Ordering;
use std::rc::Rc;
use std::time::{SystemTime, UNIX_EPOCH};

use super::ast::Name;
use super::interp::{js_pow, number_index, to_int32, to_uint32, Interpreter, MAX_ARRAY_LENGTH};
use super::value::*;

const ARRAY_METHODS: &[&str] = &[
    "at", "concat", "entries", "every", "fill", "filter", "find", "findIndex", "findLast",
    "findLastIndex", "flat", "flatMap", "forEach", "includes", "indexOf", "join", "keys",
    "lastIndexOf", "map", "pop", "push", "reduce", "reduceRight", "reverse", "shift", "slice",
    "some", "sort", "splice", "toString", "unshift", "values",
];

const STRING_METHODS: &[&str] = &[
    "at", "charAt", "charCodeAt", "codePointAt", "concat", "endsWith", "includes", "indexOf",
    "lastIndexOf", "localeCompare", "padEnd", "padStart", "repeat", "replace", "replaceAll",
    "slice", "split", "startsWith", "substr", "substring", "toLowerCase", "toString",
    "toUpperCase", "trim", "trimEnd", "trimStart", "valueOf",
];

const NUMBER_METHODS: &[&str] = &["toFixed", "toString", "valueOf"];
const BOOLEAN_METHODS: &[&str] = &["toString", "valueOf"];
const MAP_METHODS: &[&str] = &[
    "clear", "delete", "entries", "forEach", "get", "has", "keys", "set", "values",
];
const SET_METHODS: &[&str] = &[
    "add", "clear", "delete", "entries", "forEach", "has", "keys", "values",
];
const PROMISE_METHODS: &[&str] = &["catch", "finally", "then"];
const OBJECT_METHODS: &[&str] = &["hasOwnProperty", "toString", "valueOf"];
const FUNCTION_METHODS: &[&str] = &["apply", "bind", "call", "toString"];

/// Nesting limit for `JSON.stringify`; deeper input is treated as circular.
const MAX_JSON_DEPTH: usize = 256;

/// Longest string `repeat`/`padStart`/`padEnd` will build.
const MAX_STRING_LENGTH: usize = 1 << 28;

fn native(
    name: &str,
    call: impl Fn(&mut Interpreter, &Value, &[Value]) -> JsResult<Value> + 'static,
) -> Value {
    NativeFunction::new(name, call).into_value()
}

fn reaction(f: impl Fn(&mut Interpreter, Result<Value, Value>) -> JsResult<()> + 'static) -> Reaction {
    Reaction::Native(Rc::new(f))
}

fn arg(args: &[Value], i: usize) -> Value {
    args.get(i).cloned().unwrap_or_default()
}

fn num_arg(args: &[Value], i: usize) -> f64 {
    args.get(i).map_or(f64::NAN, Value::to_number)
}

fn to_integer(n: f64) -> f64 {
    if n.is_nan() {
        0.0
    } else {
        n.trunc()
    }
}

/// Resolve a possibly negative index against `len`, clamped to `0..=len`.
fn relative_index(value: Option<&Value>, len: usize, default: usize) -> usize {
    match value {
        None | Some(Value::Undefined) => default,
        Some(value) => {
            let n = to_integer(value.to_number());
            let len = len as f64;
            let index = if n < 0.0 { (len + n).max(0.0) } else { n.min(len) };
            index as usize
        }
    }
}

fn callback(interp: &Interpreter, args: &[Value]) -> JsResult<Value> {
    let callback = arg(args, 0);
    if callback.is_callable() {
        Ok(callback)
    } else {
        Err(interp.type_error(format!("{} is not a function", inspect(&callback))))
    }
}

fn set_static(target: &Value, name: &str, value: Value) {
    if let Value::Native(function) = target {
        function.props.borrow_mut().set(name, value);
    }
}

fn object_with(entries: Vec<(&str, Value)>) -> Value {
    let mut object = Object::new();
    for (key, value) in entries {
        object.set(key, value);
    }
    Value::object(object)
}

// ---- realm setup ----

/// Populate the global scope of a fresh realm.
pub(crate) fn install(interp: &mut Interpreter) {
    let global = interp.global().clone();
    let global_object = Value::Object(interp.global_object().clone());

    global.declare("undefined", Value::Undefined, false);
    global.declare("NaN", Value::Number(f64::NAN), false);
    global.declare("Infinity", Value::Number(f64::INFINITY), false);
    global.declare("this", global_object.clone(), false);
    for alias in ["globalThis", "self", "window"] {
        global.declare(alias, global_object.clone(), true);
    }

    global.declare("Math", math(), true);
    global.declare("JSON", json(), true);
    global.declare("console", console(), true);
    global.declare(
        "performance",
        object_with(vec![(
            "now",
            native("now", |interp, _, _| Ok(Value::Number(interp.elapsed_ms()))),
        )]),
        true,
    );

    global.declare("Object", object_constructor(), true);
    global.declare("Array", array_constructor(), true);
    global.declare("Number", number_constructor(), true);
    global.declare("String", string_constructor(), true);
    global.declare(
        "Boolean",
        native("Boolean", |_, _, args| Ok(Value::Bool(arg(args, 0).truthy()))),
        true,
    );
    global.declare("Map", collection_constructor("Map"), true);
    global.declare("Set", collection_constructor("Set"), true);
    global.declare("Promise", promise_constructor(), true);
    global.declare("Date", date_constructor(), true);
    for name in ["Error", "TypeError", "RangeError", "SyntaxError", "ReferenceError"] {
        global.declare(name, error_constructor(name), true);
    }

    global.declare(
        "parseInt",
        native("parseInt", |_, _, args| {
            let radix = args.get(1).filter(|v| !v.is_nullish()).map(Value::to_number);
            Ok(Value::Number(parse_int(&arg(args, 0).to_js_string(), radix)))
        }),
        true,
    );
    global.declare(
        "parseFloat",
        native("parseFloat", |_, _, args| {
            Ok(Value::Number(parse_float(&arg(args, 0).to_js_string())))
        }),
        true,
    );
    global.declare(
        "isNaN",
        native("isNaN", |_, _, args| Ok(Value::Bool(num_arg(args, 0).is_nan()))),
        true,
    );
    global.declare(
        "isFinite",
        native("isFinite", |_, _, args| Ok(Value::Bool(num_arg(args, 0).is_finite()))),
        true,
    );

    global.declare(
        "setTimeout",
        native("setTimeout", |interp, _, args| {
            let callback = callback(interp, args)?;
            let delay = args.get(1).map_or(0.0, Value::to_number);
            let extra = args.get(2..).map(<[Value]>::to_vec).unwrap_or_default();
            Ok(Value::Number(interp.add_timer(callback, delay, extra) as f64))
        }),
        true,
    );
    global.declare(
        "clearTimeout",
        native("clearTimeout", |interp, _, args| {
            let id = num_arg(args, 0);
            if id.is_finite() && id > 0.0 {
                interp.clear_timer(id as u64);
            }
            Ok(Value::Undefined)
        }),
        true,
    );
    global.declare(
        "queueMicrotask",
        native("queueMicrotask", |interp, _, args| {
            let callback = callback(interp, args)?;
            interp.enqueue_callback(callback, Vec::new());
            Ok(Value::Undefined)
        }),
        true,
    );
}

fn math() -> Value {
    fn unary(name: &str, op: fn(f64) -> f64) -> Value {
        native(name, move |_, _, args| Ok(Value::Number(op(num_arg(args, 0)))))
    }

    let mut math = Object::new();
    math.set("PI", Value::Number(std::f64::consts::PI));
    math.set("E", Value::Number(std::f64::consts::E));
    math.set("LN2", Value::Number(std::f64::consts::LN_2));
    math.set("LN10", Value::Number(std::f64::consts::LN_10));
    math.set("LOG2E", Value::Number(std::f64::consts::LOG2_E));
    math.set("LOG10E", Value::Number(std::f64::consts::LOG10_E));
    math.set("SQRT2", Value::Number(std::f64::consts::SQRT_2));

    math.set("abs", unary("abs", f64::abs));
    math.set("floor", unary("floor", f64::floor));
    math.set("ceil", unary("ceil", f64::ceil));
    math.set("trunc", unary("trunc", f64::trunc));
    math.set("sqrt", unary("sqrt", f64::sqrt));
    math.set("cbrt", unary("cbrt", f64::cbrt));
    math.set("exp", unary("exp", f64::exp));
    math.set("log", unary("log", f64::ln));
    math.set("log2", unary("log2", f64::log2));
    math.set("log10", unary("log10", f64::log10));
    math.set("sin", unary("sin", f64::sin));
    math.set("cos", unary("cos", f64::cos));
    math.set("tan", unary("tan", f64::tan));
    math.set("asin", unary("asin", f64::asin));
    math.set("acos", unary("acos", f64::acos));
    math.set("atan", unary("atan", f64::atan));
    math.set("fround", unary("fround", |x| x as f32 as f64));
    math.set(
        "sign",
        unary("sign", |x| {
            if x.is_nan() || x == 0.0 {
                x
            } else {
                x.signum()
            }
        }),
    );
    math.set(
        "round",
        unary("round", |x| {
            let floor = x.floor();
            if x - floor >= 0.5 {
                floor + 1.0
            } else {
                floor
            }
        }),
    );
    math.set(
        "pow",
        native("pow", |_, _, args| {
            Ok(Value::Number(js_pow(num_arg(args, 0), num_arg(args, 1))))
        }),
    );
    math.set(
        "atan2",
        native("atan2", |_, _, args| {
            Ok(Value::Number(num_arg(args, 0).atan2(num_arg(args, 1))))
        }),
    );
    math.set(
        "hypot",
        native("hypot", |_, _, args| {
            let sum: f64 = args.iter().map(|v| v.to_number().powi(2)).sum();
            Ok(Value::Number(sum.sqrt()))
        }),
    );
    math.set(
        "max",
        native("max", |_, _, args| {
            let mut best = f64::NEG_INFINITY;
            for value in args {
                let n = value.to_number();
                if n.is_nan() {
                    return Ok(Value::Number(f64::NAN));
                }
                best = best.max(n);
            }
            Ok(Value::Number(best))
        }),
    );
    math.set(
        "min",
        native("min", |_, _, args| {
            let mut best = f64::INFINITY;
            for value in args {
                let n = value.to_number();
                if n.is_nan() {
                    return Ok(Value::Number(f64::NAN));
                }
                best = best.min(n);
            }
            Ok(Value::Number(best))
        }),
    );
    math.set(
        "random",
        native("random", |_, _, _| Ok(Value::Number(rand::random::<f64>()))),
    );
    Value::object(math)
}

fn console() -> Value {
    fn line(args: &[Value]) -> String {
        args.iter().map(inspect).collect::<Vec<_>>().join(" ")
    }

    let log = |name: &str| {
        native(name, |_, _, args| {
            tracing::debug!(target: "snipbench::console", "{}", line(args));
            Ok(Value::Undefined)
        })
    };
    let warn = |name: &str| {
        native(name, |_, _, args| {
            tracing::warn!(target: "snipbench::console", "{}", line(args));
            Ok(Value::Undefined)
        })
    };
    object_with(vec![
        ("log", log("log")),
        ("info", log("info")),
        ("debug", log("debug")),
        ("warn", warn("warn")),
        ("error", warn("error")),
    ])
}

fn json() -> Value {
    object_with(vec![
        (
            "stringify",
            native("stringify", |interp, _, args| {
                let indent = match args.get(2) {
                    Some(Value::Number(n)) if *n >= 1.0 => " ".repeat(n.min(10.0) as usize),
                    Some(Value::Str(s)) => s.chars().take(10).collect(),
                    _ => String::new(),
                };
                let mut out = String::new();
                let written = write_json(interp, &arg(args, 0), &indent, 0, &mut out)?;
                Ok(if written { Value::from(out) } else { Value::Undefined })
            }),
        ),
        (
            "parse",
            native("parse", |interp, _, args| {
                let text = arg(args, 0).to_js_string();
                match serde_json::from_str::<serde_json::Value>(&text) {
                    Ok(parsed) => Ok(from_json(&parsed)),
                    Err(e) => Err(interp.make_error("SyntaxError", e.to_string())),
                }
            }),
        ),
    ])
}

/// Serialize `value` as JSON text. Returns `false` when the value has no
/// JSON representation (`undefined`, functions).
fn write_json(
    interp: &Interpreter,
    value: &Value,
    indent: &str,
    depth: usize,
    out: &mut String,
) -> JsResult<bool> {
    if depth > MAX_JSON_DEPTH {
        return Err(interp.type_error("Converting circular structure to JSON"));
    }
    let newline = |out: &mut String, level: usize| {
        if !indent.is_empty() {
            out.push('\n');
            for _ in 0..level {
                out.push_str(indent);
            }
        }
    };

    match value {
        Value::Undefined | Value::Function(_) | Value::Native(_) => return Ok(false),
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) if n.is_finite() => out.push_str(&number_to_string(*n)),
        Value::Number(_) => out.push_str("null"),
        Value::Str(s) => out.push_str(&serde_json::to_string(&**s).unwrap_or_default()),
        Value::Array(items) => {
            let items = items.borrow().clone();
            if items.is_empty() {
                out.push_str("[]");
                return Ok(true);
            }
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                newline(out, depth + 1);
                if !write_json(interp, item, indent, depth + 1, out)? {
                    out.push_str("null");
                }
            }
            newline(out, depth);
            out.push(']');
        }
        Value::Object(object) => {
            let entries: Vec<(Name, Value)> = object
                .borrow()
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            out.push('{');
            let mut first = true;
            for (key, item) in &entries {
                let mut encoded = String::new();
                if !write_json(interp, item, indent, depth + 1, &mut encoded)? {
                    continue;
                }
                if !first {
                    out.push(',');
                }
                first = false;
                newline(out, depth + 1);
                out.push_str(&serde_json::to_string(&**key).unwrap_or_default());
                out.push(':');
                if !indent.is_empty() {
                    out.push(' ');
                }
                out.push_str(&encoded);
            }
            if !first {
                newline(out, depth);
            }
            out.push('}');
        }
        Value::Map(_) | Value::Set(_) | Value::Promise(_) => out.push_str("{}"),
    }
    Ok(true)
}

fn from_json(value: &serde_json::Value) -> Value {
    match value {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(*b),
        serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
        serde_json::Value::String(s) => Value::from(s.as_str()),
        serde_json::Value::Array(items) => Value::array(items.iter().map(from_json).collect()),
        serde_json::Value::Object(map) => {
            let mut object = Object::new();
            for (key, item) in map {
                object.set(key.as_str(), from_json(item));
            }
            Value::object(object)
        }
    }
}

fn object_constructor() -> Value {
    let wrap = |_: &mut Interpreter, _: &Value, args: &[Value]| {
        Ok(match arg(args, 0) {
            Value::Undefined | Value::Null | Value::Bool(_) | Value::Number(_) | Value::Str(_) => {
                Value::object(Object::new())
            }
            object => object,
        })
    };
    let constructor = NativeFunction::new("Object", wrap)
        .with_constructor(wrap)
        .into_value();

    set_static(
        &constructor,
        "keys",
        native("keys", |_, _, args| {
            Ok(Value::array(
                own_entries(&arg(args, 0)).into_iter().map(|(k, _)| Value::Str(k)).collect(),
            ))
        }),
    );
    set_static(
        &constructor,
        "values",
        native("values", |_, _, args| {
            Ok(Value::array(
                own_entries(&arg(args, 0)).into_iter().map(|(_, v)| v).collect(),
            ))
        }),
    );
    set_static(
        &constructor,
        "entries",
        native("entries", |_, _, args| {
            Ok(Value::array(
                own_entries(&arg(args, 0))
                    .into_iter()
                    .map(|(k, v)| Value::array(vec![Value::Str(k), v]))
                    .collect(),
            ))
        }),
    );
    set_static(
        &constructor,
        "assign",
        native("assign", |interp, _, args| {
            let target = arg(args, 0);
            for source in args.iter().skip(1) {
                for (key, value) in own_entries(source) {
                    interp.set_property(&target, &key, value)?;
                }
            }
            Ok(target)
        }),
    );
    set_static(
        &constructor,
        "fromEntries",
        native("fromEntries", |interp, _, args| {
            let mut object = Object::new();
            for entry in interp.iterate(&arg(args, 0))? {
                let (key, value) = entry_pair(interp, &entry)?;
                object.set(key.to_property_key(), value);
            }
            Ok(Value::object(object))
        }),
    );
    set_static(
        &constructor,
        "create",
        native("create", |_, _, args| {
            let proto = match arg(args, 0) {
                Value::Object(proto) => Some(proto),
                _ => None,
            };
            Ok(Value::object(Object::with_proto(proto)))
        }),
    );
    set_static(&constructor, "freeze", native("freeze", |_, _, args| Ok(arg(args, 0))));
    constructor
}

/// Own enumerable `(key, value)` pairs, as `Object.entries` sees them.
fn own_entries(value: &Value) -> Vec<(Name, Value)> {
    match value {
        Value::Object(object) => object
            .borrow()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
        Value::Array(items) => items
            .borrow()
            .iter()
            .enumerate()
            .map(|(i, v)| (Name::from(i.to_string()), v.clone()))
            .collect(),
        Value::Str(s) => s
            .chars()
            .enumerate()
            .map(|(i, c)| (Name::from(i.to_string()), Value::from(c.to_string())))
            .collect(),
        Value::Function(closure) => closure
            .props
            .borrow()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
        _ => Vec::new(),
    }
}

fn entry_pair(interp: &Interpreter, entry: &Value) -> JsResult<(Value, Value)> {
    match entry {
        Value::Array(pair) => {
            let pair = pair.borrow();
            Ok((
                pair.first().cloned().unwrap_or_default(),
                pair.get(1).cloned().unwrap_or_default(),
            ))
        }
        other => Err(interp.type_error(format!(
            "Iterator value {} is not an entry object",
            inspect(other)
        ))),
    }
}

fn array_constructor() -> Value {
    let build = |interp: &mut Interpreter, _: &Value, args: &[Value]| {
        if let [Value::Number(n)] = args {
            return match number_index(*n) {
                Some(len) if len <= MAX_ARRAY_LENGTH => Ok(Value::array(vec![Value::Undefined; len])),
                _ => Err(interp.range_error("Invalid array length")),
            };
        }
        Ok(Value::array(args.to_vec()))
    };
    let constructor = NativeFunction::new("Array", build)
        .with_constructor(build)
        .into_value();

    set_static(
        &constructor,
        "isArray",
        native("isArray", |_, _, args| {
            Ok(Value::Bool(matches!(arg(args, 0), Value::Array(_))))
        }),
    );
    set_static(
        &constructor,
        "of",
        native("of", |_, _, args| Ok(Value::array(args.to_vec()))),
    );
    set_static(
        &constructor,
        "from",
        native("from", |interp, _, args| {
            let source = arg(args, 0);
            let items = match &source {
                Value::Undefined | Value::Null => {
                    return Err(interp.type_error(format!(
                        "{} is not iterable",
                        to_display_string(&source)
                    )));
                }
                Value::Object(_) => {
                    let length = interp.get_property(&source, "length")?.to_number();
                    let length = match number_index(to_integer(length)) {
                        Some(len) if len <= MAX_ARRAY_LENGTH => len,
                        Some(_) => return Err(interp.range_error("Invalid array length")),
                        None => 0,
                    };
                    let mut items = Vec::with_capacity(length);
                    for i in 0..length {
                        items.push(interp.get_property(&source, &i.to_string())?);
                    }
                    items
                }
                Value::Array(_) | Value::Str(_) | Value::Map(_) | Value::Set(_) => {
                    interp.iterate(&source)?
                }
                _ => Vec::new(),
            };
            let mapper = arg(args, 1);
            if !mapper.is_callable() {
                return Ok(Value::array(items));
            }
            let mut mapped = Vec::with_capacity(items.len());
            for (i, item) in items.into_iter().enumerate() {
                mapped.push(interp.call(&mapper, &Value::Undefined, &[item, Value::Number(i as f64)])?);
            }
            Ok(Value::array(mapped))
        }),
    );
    constructor
}

fn number_constructor() -> Value {
    let convert = |_: &mut Interpreter, _: &Value, args: &[Value]| {
        Ok(Value::Number(args.first().map_or(0.0, Value::to_number)))
    };
    let constructor = NativeFunction::new("Number", convert)
        .with_constructor(convert)
        .into_value();

    for (name, value) in [
        ("MAX_SAFE_INTEGER", 9_007_199_254_740_991.0),
        ("MIN_SAFE_INTEGER", -9_007_199_254_740_991.0),
        ("EPSILON", f64::EPSILON),
        ("MAX_VALUE", f64::MAX),
        ("MIN_VALUE", 5e-324),
        ("POSITIVE_INFINITY", f64::INFINITY),
        ("NEGATIVE_INFINITY", f64::NEG_INFINITY),
        ("NaN", f64::NAN),
    ] {
        set_static(&constructor, name, Value::Number(value));
    }

    let number_test = |name: &str, test: fn(f64) -> bool| {
        native(name, move |_, _, args| {
            Ok(Value::Bool(match arg(args, 0) {
                Value::Number(n) => test(n),
                _ => false,
            }))
        })
    };
    set_static(
        &constructor,
        "isInteger",
        number_test("isInteger", |n| n.is_finite() && n.trunc() == n),
    );
    set_static(
        &constructor,
        "isSafeInteger",
        number_test("isSafeInteger", |n| {
            n.is_finite() && n.trunc() == n && n.abs() <= 9_007_199_254_740_991.0
        }),
    );
    set_static(&constructor, "isFinite", number_test("isFinite", f64::is_finite));
    set_static(&constructor, "isNaN", number_test("isNaN", f64::is_nan));
    set_static(
        &constructor,
        "parseFloat",
        native("parseFloat", |_, _, args| {
            Ok(Value::Number(parse_float(&arg(args, 0).to_js_string())))
        }),
    );
    set_static(
        &constructor,
        "parseInt",
        native("parseInt", |_, _, args| {
            let radix = args.get(1).filter(|v| !v.is_nullish()).map(Value::to_number);
            Ok(Value::Number(parse_int(&arg(args, 0).to_js_string(), radix)))
        }),
    );
    constructor
}

fn string_constructor() -> Value {
    let convert = |_: &mut Interpreter, _: &Value, args: &[Value]| {
        Ok(match args.first() {
            Some(value) => Value::Str(value.to_js_string()),
            None => Value::from(""),
        })
    };
    let constructor = NativeFunction::new("String", convert)
        .with_constructor(convert)
        .into_value();
    set_static(
        &constructor,
        "fromCharCode",
        native("fromCharCode", |_, _, args| {
            let text: String = args
                .iter()
                .filter_map(|code| char::from_u32(to_uint32(code.to_number()) & 0xFFFF))
                .collect();
            Ok(Value::from(text))
        }),
    );
    constructor
}

fn collection_constructor(kind: &'static str) -> Value {
    NativeFunction::new(kind, move |interp, _, _| {
        Err(interp.type_error(format!("Constructor {} requires 'new'", kind)))
    })
    .with_constructor(move |interp, _, args| {
        let store = Rc::new(RefCell::new(MapStore::new()));
        let source = arg(args, 0);
        if !source.is_nullish() {
            for item in interp.iterate(&source)? {
                if kind == "Map" {
                    let (key, value) = entry_pair(interp, &item)?;
                    store.borrow_mut().set(key, value);
                } else {
                    store.borrow_mut().set(item, Value::Undefined);
                }
            }
        }
        Ok(if kind == "Map" {
            Value::Map(store)
        } else {
            Value::Set(store)
        })
    })
    .into_value()
}

fn date_constructor() -> Value {
    let constructor = native("Date", |interp, _, _| {
        Err(interp.type_error("Date objects are not supported; use Date.now()"))
    });
    set_static(
        &constructor,
        "now",
        native("now", |_, _, _| Ok(Value::Number(epoch_ms().floor()))),
    );
    constructor
}

fn epoch_ms() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0.0, |d| d.as_secs_f64() * 1000.0)
}

fn error_constructor(name: &'static str) -> Value {
    let build = move |interp: &mut Interpreter, _: &Value, args: &[Value]| {
        let message = match args.first() {
            None | Some(Value::Undefined) => String::new(),
            Some(message) => to_display_string(message),
        };
        Ok(interp.make_error(name, message))
    };
    NativeFunction::new(name, build)
        .with_constructor(build)
        .into_value()
}

fn promise_constructor() -> Value {
    let constructor = NativeFunction::new("Promise", |interp, _, _| {
        Err(interp.type_error("Promise constructor cannot be invoked without 'new'"))
    })
    .with_constructor(|interp, _, args| {
        let executor = arg(args, 0);
        if !executor.is_callable() {
            return Err(interp.type_error(format!(
                "Promise resolver {} is not a function",
                inspect(&executor)
            )));
        }
        let promise = PromiseCell::pending();
        let done = Rc::new(Cell::new(false));
        let resolve = {
            let (promise, done) = (promise.clone(), done.clone());
            native("resolve", move |interp, _, args| {
                if !done.replace(true) {
                    interp.resolve_promise(&promise, arg(args, 0));
                }
                Ok(Value::Undefined)
            })
        };
        let reject = {
            let (promise, done) = (promise.clone(), done.clone());
            native("reject", move |interp, _, args| {
                if !done.replace(true) {
                    interp.reject_promise(&promise, arg(args, 0));
                }
                Ok(Value::Undefined)
            })
        };
        if let Err(reason) = interp.call(&executor, &Value::Undefined, &[resolve, reject]) {
            if !done.replace(true) {
                interp.reject_promise(&promise, reason);
            }
        }
        Ok(Value::Promise(promise))
    })
    .into_value();

    set_static(
        &constructor,
        "resolve",
        native("resolve", |interp, _, args| {
            Ok(Value::Promise(interp.resolved_promise(arg(args, 0))))
        }),
    );
    set_static(
        &constructor,
        "reject",
        native("reject", |interp, _, args| {
            let promise = PromiseCell::pending();
            interp.reject_promise(&promise, arg(args, 0));
            Ok(Value::Promise(promise))
        }),
    );
    set_static(
        &constructor,
        "all",
        native("all", |interp, _, args| promise_all(interp, &arg(args, 0), false)),
    );
    set_static(
        &constructor,
        "allSettled",
        native("allSettled", |interp, _, args| promise_all(interp, &arg(args, 0), true)),
    );
    set_static(
        &constructor,
        "race",
        native("race", |interp, _, args| {
            let result = PromiseCell::pending();
            for item in interp.iterate(&arg(args, 0))? {
                let promise = interp.resolved_promise(item);
                let result = result.clone();
                interp.subscribe(
                    &promise,
                    reaction(move |interp, outcome| {
                        match outcome {
                            Ok(value) => interp.resolve_promise(&result, value),
                            Err(reason) => interp.reject_promise(&result, reason),
                        }
                        Ok(())
                    }),
                );
            }
            Ok(Value::Promise(result))
        }),
    );
    constructor
}

fn promise_all(interp: &mut Interpreter, iterable: &Value, settle_all: bool) -> JsResult<Value> {
    let items = interp.iterate(iterable)?;
    let result = PromiseCell::pending();
    if items.is_empty() {
        interp.resolve_promise(&result, Value::array(Vec::new()));
        return Ok(Value::Promise(result));
    }

    let values = Rc::new(RefCell::new(vec![Value::Undefined; items.len()]));
    let remaining = Rc::new(Cell::new(items.len()));
    for (i, item) in items.into_iter().enumerate() {
        let promise = interp.resolved_promise(item);
        let (values, remaining, result) = (values.clone(), remaining.clone(), result.clone());
        interp.subscribe(
            &promise,
            reaction(move |interp, outcome| {
                let value = match (outcome, settle_all) {
                    (Ok(value), false) => value,
                    (Err(reason), false) => {
                        interp.reject_promise(&result, reason);
                        return Ok(());
                    }
                    (Ok(value), true) => object_with(vec![
                        ("status", Value::from("fulfilled")),
                        ("value", value),
                    ]),
                    (Err(reason), true) => object_with(vec![
                        ("status", Value::from("rejected")),
                        ("reason", reason),
                    ]),
                };
                values.borrow_mut()[i] = value;
                remaining.set(remaining.get() - 1);
                if remaining.get() == 0 {
                    let all = values.borrow().clone();
                    interp.resolve_promise(&result, Value::array(all));
                }
                Ok(())
            }),
        );
    }
    Ok(Value::Promise(result))
}

// ---- receivers ----

/// Whether method calls on `target` dispatch straight to [`call_method`].
pub(crate) fn has_intrinsic_methods(target: &Value) -> bool {
    matches!(
        target,
        Value::Array(_)
            | Value::Str(_)
            | Value::Number(_)
            | Value::Bool(_)
            | Value::Map(_)
            | Value::Set(_)
            | Value::Promise(_)
    )
}

fn has_method(target: &Value, name: &str) -> bool {
    let table = match target {
        Value::Array(_) => ARRAY_METHODS,
        Value::Str(_) => STRING_METHODS,
        Value::Number(_) => NUMBER_METHODS,
        Value::Bool(_) => BOOLEAN_METHODS,
        Value::Map(_) => MAP_METHODS,
        Value::Set(_) => SET_METHODS,
        Value::Promise(_) => PROMISE_METHODS,
        Value::Object(_) => OBJECT_METHODS,
        Value::Function(_) | Value::Native(_) => FUNCTION_METHODS,
        Value::Undefined | Value::Null => return false,
    };
    table.contains(&name)
}

/// A built-in method read as a value (`const push = arr.push`), bound to
/// its receiver.
pub(crate) fn bound_method(target: &Value, name: &str) -> Option<Value> {
    if !has_method(target, name) {
        return None;
    }
    let receiver = target.clone();
    let method: Name = name.into();
    Some(native(name, move |interp, _, args| {
        call_method(interp, &receiver, &method, args).unwrap_or(Ok(Value::Undefined))
    }))
}

/// Invoke built-in method `name` on `target`; `None` if there is none.
pub(crate) fn call_method(
    interp: &mut Interpreter,
    target: &Value,
    name: &str,
    args: &[Value],
) -> Option<JsResult<Value>> {
    if !has_method(target, name) {
        return None;
    }
    Some(match target {
        Value::Array(items) => array_method(interp, target, items, name, args),
        Value::Str(s) => string_method(interp, s, name, args),
        Value::Number(n) => number_method(interp, *n, name, args),
        Value::Bool(b) => Ok(match name {
            "toString" => Value::from(b.to_string()),
            _ => Value::Bool(*b),
        }),
        Value::Map(store) => map_method(interp, target, store, name, args),
        Value::Set(store) => set_method(interp, target, store, name, args),
        Value::Promise(promise) => promise_method(interp, promise, name, args),
        Value::Object(object) => Ok(match name {
            "hasOwnProperty" => Value::Bool(
                object
                    .borrow()
                    .has_own(&arg(args, 0).to_property_key()),
            ),
            "toString" => Value::from(to_display_string(target)),
            _ => target.clone(),
        }),
        Value::Function(_) | Value::Native(_) => function_method(interp, target, name, args),
        Value::Undefined | Value::Null => Ok(Value::Undefined),
    })
}

/// `value instanceof <built-in constructor>`.
pub(crate) fn native_instance_of(constructor: &str, value: &Value) -> bool {
    match constructor {
        "Array" => matches!(value, Value::Array(_)),
        "Map" => matches!(value, Value::Map(_)),
        "Set" => matches!(value, Value::Set(_)),
        "Promise" => matches!(value, Value::Promise(_)),
        "Function" => value.is_callable(),
        "Object" => !matches!(
            value,
            Value::Undefined | Value::Null | Value::Bool(_) | Value::Number(_) | Value::Str(_)
        ),
        "Error" => matches!(value, Value::Object(o) if o.borrow().class == ObjectClass::Error),
        "TypeError" | "RangeError" | "SyntaxError" | "ReferenceError" => match value {
            Value::Object(object) => {
                let object = object.borrow();
                object.class == ObjectClass::Error
                    && matches!(object.get("name"), Some(Value::Str(n)) if &*n == constructor)
            }
            _ => false,
        },
        _ => false,
    }
}

fn element(items: &Rc<RefCell<Vec<Value>>>, i: usize) -> Option<Value> {
    items.borrow().get(i).cloned()
}

fn array_method(
    interp: &mut Interpreter,
    this: &Value,
    items: &Rc<RefCell<Vec<Value>>>,
    name: &str,
    args: &[Value],
) -> JsResult<Value> {
    let len = items.borrow().len();
    match name {
        "push" => {
            if len + args.len() > MAX_ARRAY_LENGTH {
                return Err(interp.range_error("Invalid array length"));
            }
            let mut items = items.borrow_mut();
            items.extend_from_slice(args);
            Ok(Value::Number(items.len() as f64))
        }
        "pop" => Ok(items.borrow_mut().pop().unwrap_or_default()),
        "shift" => {
            let mut items = items.borrow_mut();
            Ok(if items.is_empty() {
                Value::Undefined
            } else {
                items.remove(0)
            })
        }
        "unshift" => {
            let mut items = items.borrow_mut();
            items.splice(0..0, args.iter().cloned());
            Ok(Value::Number(items.len() as f64))
        }
        "slice" => {
            let start = relative_index(args.first(), len, 0);
            let end = relative_index(args.get(1), len, len).max(start);
            Ok(Value::array(items.borrow()[start..end].to_vec()))
        }
        "splice" => {
            let start = relative_index(args.first(), len, 0);
            let count = match args.get(1) {
                None => len - start,
                Some(n) => (to_integer(n.to_number()).max(0.0) as usize).min(len - start),
            };
            let inserted = args.get(2..).unwrap_or(&[]).iter().cloned();
            let removed: Vec<Value> = items.borrow_mut().splice(start..start + count, inserted).collect();
            Ok(Value::array(removed))
        }
        "concat" => {
            let mut out = items.borrow().clone();
            for value in args {
                match value {
                    Value::Array(other) => out.extend(other.borrow().iter().cloned()),
                    other => out.push(other.clone()),
                }
            }
            Ok(Value::array(out))
        }
        "join" | "toString" => {
            let separator = match args.first() {
                Some(sep) if name == "join" && !matches!(sep, Value::Undefined) => sep.to_js_string(),
                _ => ",".into(),
            };
            let items = items.borrow().clone();
            let mut out = String::new();
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push_str(&separator);
                }
                if !item.is_nullish() {
                    out.push_str(&item.to_js_string());
                }
            }
            Ok(Value::from(out))
        }
        "indexOf" => {
            let needle = arg(args, 0);
            let from = relative_index(args.get(1), len, 0);
            let items = items.borrow();
            Ok(Value::Number(
                items[from..]
                    .iter()
                    .position(|item| strict_equals(item, &needle))
                    .map_or(-1.0, |i| (i + from) as f64),
            ))
        }
        "lastIndexOf" => {
            let needle = arg(args, 0);
            let items = items.borrow();
            Ok(Value::Number(
                items
                    .iter()
                    .rposition(|item| strict_equals(item, &needle))
                    .map_or(-1.0, |i| i as f64),
            ))
        }
        "includes" => {
            let needle = arg(args, 0);
            let from = relative_index(args.get(1), len, 0);
            Ok(Value::Bool(
                items.borrow()[from..]
                    .iter()
                    .any(|item| same_value_zero(item, &needle)),
            ))
        }
        "at" => {
            let n = to_integer(num_arg(args, 0));
            let index = if n < 0.0 { len as f64 + n } else { n };
            Ok(if index < 0.0 {
                Value::Undefined
            } else {
                element(items, index as usize).unwrap_or_default()
            })
        }
        "reverse" => {
            items.borrow_mut().reverse();
            Ok(this.clone())
        }
        "fill" => {
            let value = arg(args, 0);
            let start = relative_index(args.get(1), len, 0);
            let end = relative_index(args.get(2), len, len);
            let mut items = items.borrow_mut();
            for slot in items.iter_mut().take(end).skip(start) {
                *slot = value.clone();
            }
            Ok(this.clone())
        }
        "keys" => Ok(Value::array((0..len).map(|i| Value::Number(i as f64)).collect())),
        "values" => Ok(Value::array(items.borrow().clone())),
        "entries" => Ok(Value::array(
            items
                .borrow()
                .iter()
                .enumerate()
                .map(|(i, v)| Value::array(vec![Value::Number(i as f64), v.clone()]))
                .collect(),
        )),
        "flat" => {
            let depth = match args.first() {
                None | Some(Value::Undefined) => 1.0,
                Some(depth) => to_integer(depth.to_number()),
            };
            let mut out = Vec::new();
            flatten_into(&items.borrow(), depth, &mut out);
            Ok(Value::array(out))
        }
        "sort" => {
            let comparator = arg(args, 0);
            if !comparator.is_nullish() && !comparator.is_callable() {
                return Err(interp.type_error(
                    "The comparison function must be either a function or undefined",
                ));
            }
            let values = items.borrow().clone();
            let sorted = sort_values(interp, values, &comparator)?;
            *items.borrow_mut() = sorted;
            Ok(this.clone())
        }
        _ => iterate_with_callback(interp, this, items, len, name, args),
    }
}

/// Array methods that call back into script for each element.
fn iterate_with_callback(
    interp: &mut Interpreter,
    this: &Value,
    items: &Rc<RefCell<Vec<Value>>>,
    len: usize,
    name: &str,
    args: &[Value],
) -> JsResult<Value> {
    let callback = callback(interp, args)?;
    let this_arg = arg(args, 1);
    let invoke = |interp: &mut Interpreter, item: Value, i: usize| {
        interp.call(&callback, &this_arg, &[item, Value::Number(i as f64), this.clone()])
    };

    match name {
        "forEach" => {
            for i in 0..len {
                let Some(item) = element(items, i) else { break };
                invoke(interp, item, i)?;
            }
            Ok(Value::Undefined)
        }
        "map" => {
            let mut out = Vec::with_capacity(len);
            for i in 0..len {
                let Some(item) = element(items, i) else { break };
                out.push(invoke(interp, item, i)?);
            }
            Ok(Value::array(out))
        }
        "filter" => {
            let mut out = Vec::new();
            for i in 0..len {
                let Some(item) = element(items, i) else { break };
                if invoke(interp, item.clone(), i)?.truthy() {
                    out.push(item);
                }
            }
            Ok(Value::array(out))
        }
        "flatMap" => {
            let mut out = Vec::with_capacity(len);
            for i in 0..len {
                let Some(item) = element(items, i) else { break };
                match invoke(interp, item, i)? {
                    Value::Array(inner) => out.extend(inner.borrow().iter().cloned()),
                    other => out.push(other),
                }
            }
            Ok(Value::array(out))
        }
        "find" | "findIndex" => {
            for i in 0..len {
                let item = element(items, i).unwrap_or_default();
                if invoke(interp, item.clone(), i)?.truthy() {
                    return Ok(if name == "find" { item } else { Value::Number(i as f64) });
                }
            }
            Ok(if name == "find" { Value::Undefined } else { Value::Number(-1.0) })
        }
        "findLast" | "findLastIndex" => {
            for i in (0..len).rev() {
                let item = element(items, i).unwrap_or_default();
                if invoke(interp, item.clone(), i)?.truthy() {
                    return Ok(if name == "findLast" { item } else { Value::Number(i as f64) });
                }
            }
            Ok(if name == "findLast" { Value::Undefined } else { Value::Number(-1.0) })
        }
        "some" => {
            for i in 0..len {
                let Some(item) = element(items, i) else { break };
                if invoke(interp, item, i)?.truthy() {
                    return Ok(Value::Bool(true));
                }
            }
            Ok(Value::Bool(false))
        }
        "every" => {
            for i in 0..len {
                let Some(item) = element(items, i) else { break };
                if !invoke(interp, item, i)?.truthy() {
                    return Ok(Value::Bool(false));
                }
            }
            Ok(Value::Bool(true))
        }
        "reduce" | "reduceRight" => {
            let order: Vec<usize> = if name == "reduce" {
                (0..len).collect()
            } else {
                (0..len).rev().collect()
            };
            let mut order = order.into_iter();
            let mut accumulator = match args.get(1) {
                Some(initial) => initial.clone(),
                None => match order.next() {
                    Some(first) => element(items, first).unwrap_or_default(),
                    None => {
                        return Err(interp.type_error("Reduce of empty array with no initial value"));
                    }
                },
            };
            for i in order {
                let Some(item) = element(items, i) else { continue };
                accumulator = interp.call(
                    &callback,
                    &Value::Undefined,
                    &[accumulator, item, Value::Number(i as f64), this.clone()],
                )?;
            }
            Ok(accumulator)
        }
        _ => Ok(Value::Undefined),
    }
}

fn flatten_into(items: &[Value], depth: f64, out: &mut Vec<Value>) {
    for item in items {
        match item {
            Value::Array(inner) if depth >= 1.0 => flatten_into(&inner.borrow(), depth - 1.0, out),
            other => out.push(other.clone()),
        }
    }
}

/// Stable sort with a script comparator; `undefined` sorts last.
fn sort_values(interp: &mut Interpreter, values: Vec<Value>, comparator: &Value) -> JsResult<Vec<Value>> {
    let (defined, undefined): (Vec<Value>, Vec<Value>) = values
        .into_iter()
        .partition(|v| !matches!(v, Value::Undefined));
    let mut compare = |a: &Value, b: &Value| -> JsResult<Ordering> {
        if comparator.is_callable() {
            let n = interp
                .call(comparator, &Value::Undefined, &[a.clone(), b.clone()])?
                .to_number();
            Ok(if n < 0.0 {
                Ordering::Less
            } else if n > 0.0 {
                Ordering::Greater
            } else {
                Ordering::Equal
            })
        } else {
            Ok(a.to_js_string().cmp(&b.to_js_string()))
        }
    };
    let mut sorted = merge_sort(defined, &mut compare)?;
    sorted.extend(undefined);
    Ok(sorted)
}

fn merge_sort(
    mut items: Vec<Value>,
    compare: &mut dyn FnMut(&Value, &Value) -> JsResult<Ordering>,
) -> JsResult<Vec<Value>> {
    if items.len() <= 1 {
        return Ok(items);
    }
    let right = items.split_off(items.len() / 2);
    let left = merge_sort(items, compare)?;
    let right = merge_sort(right, compare)?;

    let mut out = Vec::with_capacity(left.len() + right.len());
    let mut left = left.into_iter().peekable();
    let mut right = right.into_iter().peekable();
    loop {
        let take_right = match (left.peek(), right.peek()) {
            (Some(l), Some(r)) => compare(r, l)? == Ordering::Less,
            (Some(_), None) => false,
            (None, Some(_)) => true,
            (None, None) => break,
        };
        let next = if take_right { right.next() } else { left.next() };
        out.extend(next);
    }
    Ok(out)
}

fn char_index_of(haystack: &[char], needle: &[char], from: usize) -> Option<usize> {
    if needle.is_empty() {
        return Some(from.min(haystack.len()));
    }
    if needle.len() > haystack.len() {
        return None;
    }
    (from..=haystack.len() - needle.len()).find(|&i| haystack[i..i + needle.len()] == *needle)
}

fn string_method(interp: &mut Interpreter, s: &Rc<str>, name: &str, args: &[Value]) -> JsResult<Value> {
    let chars: Vec<char> = s.chars().collect();
    let len = chars.len();
    let text = |range: &[char]| Value::from(range.iter().collect::<String>());

    let value = match name {
        "toString" | "valueOf" => Value::Str(s.clone()),
        "charAt" => {
            let i = to_integer(num_arg(args, 0));
            match number_index(i).and_then(|i| chars.get(i)) {
                Some(c) => Value::from(c.to_string()),
                None => Value::from(""),
            }
        }
        "charCodeAt" | "codePointAt" => {
            let i = to_integer(num_arg(args, 0));
            match number_index(i).and_then(|i| chars.get(i)) {
                Some(c) => Value::Number(f64::from(u32::from(*c))),
                None if name == "charCodeAt" => Value::Number(f64::NAN),
                None => Value::Undefined,
            }
        }
        "at" => {
            let n = to_integer(num_arg(args, 0));
            let index = if n < 0.0 { len as f64 + n } else { n };
            match number_index(index).and_then(|i| chars.get(i)) {
                Some(c) => Value::from(c.to_string()),
                None => Value::Undefined,
            }
        }
        "indexOf" => {
            let needle: Vec<char> = arg(args, 0).to_js_string().chars().collect();
            let from = relative_index(args.get(1), len, 0);
            Value::Number(char_index_of(&chars, &needle, from).map_or(-1.0, |i| i as f64))
        }
        "lastIndexOf" => {
            let needle: Vec<char> = arg(args, 0).to_js_string().chars().collect();
            let found = if needle.len() > len {
                None
            } else {
                (0..=len - needle.len())
                    .rev()
                    .find(|&i| chars[i..i + needle.len()] == *needle)
            };
            Value::Number(found.map_or(-1.0, |i| i as f64))
        }
        "includes" => Value::Bool(s.contains(&*arg(args, 0).to_js_string())),
        "startsWith" => {
            let start = relative_index(args.get(1), len, 0);
            let needle = arg(args, 0).to_js_string();
            Value::Bool(chars[start..].iter().collect::<String>().starts_with(&*needle))
        }
        "endsWith" => {
            let end = relative_index(args.get(1), len, len);
            let needle = arg(args, 0).to_js_string();
            Value::Bool(chars[..end].iter().collect::<String>().ends_with(&*needle))
        }
        "slice" => {
            let start = relative_index(args.first(), len, 0);
            let end = relative_index(args.get(1), len, len).max(start);
            text(&chars[start..end])
        }
        "substring" => {
            let clamp = |v: Option<&Value>, default: usize| match v {
                None | Some(Value::Undefined) => default,
                Some(v) => to_integer(v.to_number()).clamp(0.0, len as f64) as usize,
            };
            let (a, b) = (clamp(args.first(), 0), clamp(args.get(1), len));
            text(&chars[a.min(b)..a.max(b)])
        }
        "substr" => {
            let start = relative_index(args.first(), len, 0);
            let count = match args.get(1) {
                None | Some(Value::Undefined) => len - start,
                Some(n) => (to_integer(n.to_number()).max(0.0) as usize).min(len - start),
            };
            text(&chars[start..start + count])
        }
        "split" => {
            let limit = match args.get(1) {
                None | Some(Value::Undefined) => usize::MAX,
                Some(n) => to_uint32(n.to_number()) as usize,
            };
            let parts: Vec<Value> = match args.first() {
                None | Some(Value::Undefined) => vec![Value::Str(s.clone())],
                Some(separator) => {
                    let separator = separator.to_js_string();
                    if separator.is_empty() {
                        chars.iter().map(|c| Value::from(c.to_string())).collect()
                    } else {
                        s.split(&*separator).map(Value::from).collect()
                    }
                }
            };
            Value::array(parts.into_iter().take(limit).collect())
        }
        "toUpperCase" => Value::from(s.to_uppercase()),
        "toLowerCase" => Value::from(s.to_lowercase()),
        "trim" => Value::from(s.trim()),
        "trimStart" => Value::from(s.trim_start()),
        "trimEnd" => Value::from(s.trim_end()),
        "repeat" => {
            let count = to_integer(num_arg(args, 0));
            if count < 0.0 || count.is_infinite() {
                return Err(interp.range_error(format!("Invalid count value: {}", number_to_string(count))));
            }
            if s.len() as f64 * count > MAX_STRING_LENGTH as f64 {
                return Err(interp.range_error("Invalid string length"));
            }
            Value::from(s.repeat(count as usize))
        }
        "padStart" | "padEnd" => {
            let target = to_integer(num_arg(args, 0)).max(0.0);
            if target > MAX_STRING_LENGTH as f64 {
                return Err(interp.range_error("Invalid string length"));
            }
            let filler: Vec<char> = match args.get(1) {
                None | Some(Value::Undefined) => vec![' '],
                Some(fill) => fill.to_js_string().chars().collect(),
            };
            let missing = (target as usize).saturating_sub(len);
            if missing == 0 || filler.is_empty() {
                Value::Str(s.clone())
            } else {
                let pad: String = filler.iter().cycle().take(missing).collect();
                if name == "padStart" {
                    Value::from(format!("{}{}", pad, s))
                } else {
                    Value::from(format!("{}{}", s, pad))
                }
            }
        }
        "concat" => {
            let mut out = s.to_string();
            for value in args {
                out.push_str(&value.to_js_string());
            }
            Value::from(out)
        }
        "localeCompare" => {
            let other = arg(args, 0).to_js_string();
            Value::Number(match (**s).cmp(&*other) {
                Ordering::Less => -1.0,
                Ordering::Equal => 0.0,
                Ordering::Greater => 1.0,
            })
        }
        "replace" | "replaceAll" => {
            let pattern = arg(args, 0).to_js_string();
            let replacement = arg(args, 1);
            let mut out = String::with_capacity(s.len());
            let mut last = 0;
            for (offset, matched) in s.match_indices(&*pattern) {
                out.push_str(&s[last..offset]);
                if replacement.is_callable() {
                    let position = s[..offset].chars().count() as f64;
                    let produced = interp.call(
                        &replacement,
                        &Value::Undefined,
                        &[Value::from(matched), Value::Number(position), Value::Str(s.clone())],
                    )?;
                    out.push_str(&produced.to_js_string());
                } else {
                    out.push_str(&replacement.to_js_string().replace("$&", matched));
                }
                last = offset + matched.len();
                if name == "replace" || pattern.is_empty() {
                    break;
                }
            }
            out.push_str(&s[last..]);
            Value::from(out)
        }
        _ => Value::Undefined,
    };
    Ok(value)
}

fn number_method(interp: &mut Interpreter, n: f64, name: &str, args: &[Value]) -> JsResult<Value> {
    match name {
        "toFixed" => {
            let digits = to_integer(args.first().map_or(0.0, Value::to_number));
            if !(0.0..=100.0).contains(&digits) {
                return Err(interp.range_error("toFixed() digits argument must be between 0 and 100"));
            }
            if !n.is_finite() || n.abs() >= 1e21 {
                return Ok(Value::from(number_to_string(n)));
            }
            Ok(Value::from(format!("{:.*}", digits as usize, n)))
        }
        "toString" => {
            let radix = match args.first() {
                None | Some(Value::Undefined) => 10.0,
                Some(radix) => to_integer(radix.to_number()),
            };
            if !(2.0..=36.0).contains(&radix) {
                return Err(interp.range_error("toString() radix must be between 2 and 36"));
            }
            Ok(Value::from(if radix == 10.0 {
                number_to_string(n)
            } else {
                number_to_radix(n, radix as u32)
            }))
        }
        _ => Ok(Value::Number(n)),
    }
}

fn number_to_radix(n: f64, radix: u32) -> String {
    if !n.is_finite() {
        return number_to_string(n);
    }
    let mut out = String::new();
    if n < 0.0 {
        out.push('-');
    }
    let n = n.abs();
    let mut integer = n.trunc();
    let mut digits = Vec::new();
    loop {
        let digit = (integer % radix as f64) as u32;
        digits.push(char::from_digit(digit, radix).unwrap_or('0'));
        integer = (integer / radix as f64).trunc();
        if integer < 1.0 {
            break;
        }
    }
    out.extend(digits.iter().rev());

    let mut fraction = n.fract();
    if fraction > 0.0 {
        out.push('.');
        for _ in 0..20 {
            fraction *= radix as f64;
            let digit = fraction.trunc() as u32;
            out.push(char::from_digit(digit, radix).unwrap_or('0'));
            fraction = fraction.fract();
            if fraction == 0.0 {
                break;
            }
        }
    }
    out
}

fn map_method(
    interp: &mut Interpreter,
    this: &Value,
    store: &Rc<RefCell<MapStore>>,
    name: &str,
    args: &[Value],
) -> JsResult<Value> {
    Ok(match name {
        "get" => store.borrow().get(&arg(args, 0)).unwrap_or_default(),
        "set" => {
            store.borrow_mut().set(arg(args, 0), arg(args, 1));
            this.clone()
        }
        "has" => Value::Bool(store.borrow().has(&arg(args, 0))),
        "delete" => Value::Bool(store.borrow_mut().delete(&arg(args, 0))),
        "clear" => {
            store.borrow_mut().clear();
            Value::Undefined
        }
        "keys" => Value::array(store.borrow().snapshot().into_iter().map(|(k, _)| k).collect()),
        "values" => Value::array(store.borrow().snapshot().into_iter().map(|(_, v)| v).collect()),
        "entries" => Value::array(
            store
                .borrow()
                .snapshot()
                .into_iter()
                .map(|(k, v)| Value::array(vec![k, v]))
                .collect(),
        ),
        "forEach" => {
            let callback = callback(interp, args)?;
            let entries = store.borrow().snapshot();
            for (key, value) in entries {
                interp.call(&callback, &arg(args, 1), &[value, key, this.clone()])?;
            }
            Value::Undefined
        }
        _ => Value::Undefined,
    })
}

fn set_method(
    interp: &mut Interpreter,
    this: &Value,
    store: &Rc<RefCell<MapStore>>,
    name: &str,
    args: &[Value],
) -> JsResult<Value> {
    Ok(match name {
        "add" => {
            store.borrow_mut().set(arg(args, 0), Value::Undefined);
            this.clone()
        }
        "has" => Value::Bool(store.borrow().has(&arg(args, 0))),
        "delete" => Value::Bool(store.borrow_mut().delete(&arg(args, 0))),
        "clear" => {
            store.borrow_mut().clear();
            Value::Undefined
        }
        "keys" | "values" => Value::array(store.borrow().snapshot().into_iter().map(|(k, _)| k).collect()),
        "entries" => Value::array(
            store
                .borrow()
                .snapshot()
                .into_iter()
                .map(|(k, _)| Value::array(vec![k.clone(), k]))
                .collect(),
        ),
        "forEach" => {
            let callback = callback(interp, args)?;
            let members = store.borrow().snapshot();
            for (member, _) in members {
                interp.call(&callback, &arg(args, 1), &[member.clone(), member, this.clone()])?;
            }
            Value::Undefined
        }
        _ => Value::Undefined,
    })
}

fn promise_method(interp: &mut Interpreter, promise: &PromiseRef, name: &str, args: &[Value]) -> JsResult<Value> {
    let derived = match name {
        "then" => interp.promise_then(promise, args.first().cloned(), args.get(1).cloned()),
        "catch" => interp.promise_then(promise, None, args.first().cloned()),
        _ => {
            let on_settled = arg(args, 0);
            if !on_settled.is_callable() {
                interp.promise_then(promise, None, None)
            } else {
                let fulfilled = {
                    let on_settled = on_settled.clone();
                    native("", move |interp, _, args| {
                        interp.call(&on_settled, &Value::Undefined, &[])?;
                        Ok(arg(args, 0))
                    })
                };
                let rejected = native("", move |interp, _, args| {
                    interp.call(&on_settled, &Value::Undefined, &[])?;
                    Err(arg(args, 0))
                });
                interp.promise_then(promise, Some(fulfilled), Some(rejected))
            }
        }
    };
    Ok(Value::Promise(derived))
}

fn function_method(interp: &mut Interpreter, target: &Value, name: &str, args: &[Value]) -> JsResult<Value> {
    match name {
        "call" => interp.call(target, &arg(args, 0), args.get(1..).unwrap_or(&[])),
        "apply" => {
            let list = match arg(args, 1) {
                Value::Undefined | Value::Null => Vec::new(),
                list => interp.iterate(&list)?,
            };
            interp.call(target, &arg(args, 0), &list)
        }
        "bind" => {
            let function = target.clone();
            let this = arg(args, 0);
            let bound: Vec<Value> = args.get(1..).map(<[Value]>::to_vec).unwrap_or_default();
            Ok(native("bound", move |interp, _, rest| {
                let mut all = bound.clone();
                all.extend_from_slice(rest);
                interp.call(&function, &this, &all)
            }))
        }
        _ => Ok(Value::from(to_display_string(target))),
    }
}

// ---- number parsing ----

fn parse_int(input: &str, radix: Option<f64>) -> f64 {
    let s = input.trim_start();
    let (sign, s) = match s.as_bytes().first() {
        Some(b'-') => (-1.0, &s[1..]),
        Some(b'+') => (1.0, &s[1..]),
        _ => (1.0, s),
    };
    let mut radix = radix.map_or(0, to_int32);
    let mut digits = s;
    let has_hex_prefix = digits.starts_with("0x") || digits.starts_with("0X");
    if radix == 0 {
        radix = 10;
        if has_hex_prefix {
            digits = &digits[2..];
            radix = 16;
        }
    } else if radix == 16 && has_hex_prefix {
        digits = &digits[2..];
    } else if !(2..=36).contains(&radix) {
        return f64::NAN;
    }

    let mut value = 0.0f64;
    let mut any = false;
    for c in digits.chars() {
        let Some(digit) = c.to_digit(radix as u32) else { break };
        value = value * radix as f64 + digit as f64;
        any = true;
    }
    if any {
        sign * value
    } else {
        f64::NAN
    }
}

fn parse_float(input: &str) -> f64 {
    let s = input.trim_start();
    let bytes = s.as_bytes();
    let mut end = 0;
    if matches!(bytes.first(), Some(b'+' | b'-')) {
        end = 1;
    }
    if s[end..].starts_with("Infinity") {
        return if s.starts_with('-') { f64::NEG_INFINITY } else { f64::INFINITY };
    }
    let digits_start = end;
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
    }
    if end < bytes.len() && bytes[end] == b'.' {
        end += 1;
        while end < bytes.len() && bytes[end].is_ascii_digit() {
            end += 1;
        }
    }
    if end == digits_start || &s[digits_start..end] == "." {
        return f64::NAN;
    }
    if end < bytes.len() && matches!(bytes[end], b'e' | b'E') {
        let mut exp_end = end + 1;
        if matches!(bytes.get(exp_end), Some(b'+' | b'-')) {
            exp_end += 1;
        }
        if bytes.get(exp_end).is_some_and(u8::is_ascii_digit) {
            while exp_end < bytes.len() && bytes[exp_end].is_ascii_digit() {
                exp_end += 1;
            }
            end = exp_end;
        }
    }
    s[..end].parse().unwrap_or(f64::NAN)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::ast::Goal;
    use crate::script::interp::thrown_message;
    use crate::script::parser::parse;

    fn eval(source: &str) -> String {
        let mut interp = Interpreter::new();
        let program = parse(source, Goal::FunctionBody { is_async: true }).unwrap();
        let scope = Scope::child(interp.global());
        let function = interp.make_function(program, true, &scope);
        let result = interp
            .call(&function, &Value::Undefined, &[])
            .and_then(|value| interp.await_value(value));
        match result {
            Ok(value) => to_display_string(&value),
            Err(error) => format!("threw {}", thrown_message(&error)),
        }
    }

    #[test]
    fn test_array_methods() {
        assert_eq!(eval("return [3, 1, 2].map(x => x * 2).join('-');"), "6-2-4");
        assert_eq!(eval("return [1, 2, 3, 4].filter(x => x % 2).length;"), "2");
        assert_eq!(eval("return [1, 2, 3].reduce((a, b) => a + b, 0);"), "6");
        assert_eq!(eval("return [[1], [2, [3]]].flat(Infinity).join();"), "1,2,3");
        assert_eq!(eval("return [10, 1, 5].sort().join();"), "1,10,5");
        assert_eq!(eval("return [10, 1, 5].sort((a, b) => a - b).join();"), "1,5,10");
        assert_eq!(eval("const a = [1, 2, 3, 4]; const r = a.splice(1, 2, 'x'); return a.join() + '|' + r.join();"), "1,x,4|2,3");
        assert_eq!(eval("return [1, NaN].includes(NaN) && [1, NaN].indexOf(NaN) === -1;"), "true");
        assert_eq!(eval("return [1, 2, 3].at(-1);"), "3");
        assert_eq!(eval("return [].reduce((a, b) => a);"), "threw Reduce of empty array with no initial value");
    }

    #[test]
    fn test_string_methods() {
        assert_eq!(eval("return 'a,b,,c'.split(',').length;"), "4");
        assert_eq!(eval("return 'hello'.slice(-3).toUpperCase();"), "LLO");
        assert_eq!(eval("return 'abc'.padStart(6, '12');"), "121abc");
        assert_eq!(eval("return 'x-y-z'.replaceAll('-', '+');"), "x+y+z");
        assert_eq!(eval("return 'x-y-z'.replace('-', (m, i) => i);"), "x1y-z");
        assert_eq!(eval("return 'abcabc'.lastIndexOf('bc');"), "4");
        assert_eq!(eval("return 'abc'.charCodeAt(1);"), "98");
    }

    #[test]
    fn test_number_formatting() {
        assert_eq!(eval("return (3.14159).toFixed(2);"), "3.14");
        assert_eq!(eval("return (255).toString(16);"), "ff");
        assert_eq!(eval("return (0.5).toString(2);"), "0.1");
        assert_eq!(eval("return parseInt('  42px');"), "42");
        assert_eq!(eval("return parseInt('0x1F');"), "31");
        assert_eq!(eval("return parseFloat('3.5e2abc');"), "350");
        assert_eq!(eval("return Number('') + Number('12');"), "12");
    }

    #[test]
    fn test_json_round_trip_keeps_key_order() {
        assert_eq!(
            eval("return JSON.stringify(JSON.parse('{\"b\":1,\"a\":[true,null,\"x\"]}'));"),
            "{\"b\":1,\"a\":[true,null,\"x\"]}"
        );
        assert_eq!(
            eval("return JSON.stringify({ a: [1, { b: 2 }] }, null, 2);"),
            "{\n  \"a\": [\n    1,\n    {\n      \"b\": 2\n    }\n  ]\n}"
        );
        assert_eq!(eval("return JSON.stringify({ f() {}, u: undefined, n: NaN });"), "{\"n\":null}");
        assert!(eval("return JSON.parse('{');").starts_with("threw"));
    }

    #[test]
    fn test_map_and_set() {
        let source = "
            const m = new Map([['a', 1]]);
            m.set('b', 2).set('a', 3);
            const s = new Set([1, 2, 2, 3]);
            s.delete(2);
            return [m.get('a'), m.size, [...m.keys()].join(''), s.size, [...s].join('')].join(',');
        ";
        assert_eq!(eval(source), "3,2,ab,2,13");
    }

    #[test]
    fn test_object_statics() {
        assert_eq!(eval("return Object.entries({ a: 1, b: 2 }).map(([k, v]) => k + v).join();"), "a1,b2");
        assert_eq!(eval("return Object.assign({ a: 1 }, { b: 2 }, { a: 3 }).a;"), "3");
        assert_eq!(eval("return Object.fromEntries([['x', 1]]).x;"), "1");
        assert_eq!(eval("return ({ a: 1 }).hasOwnProperty('a');"), "true");
    }

    #[test]
    fn test_promise_combinators() {
        assert_eq!(
            eval("const r = await Promise.allSettled([Promise.reject(1), 2]); return r.map(x => x.status).join();"),
            "rejected,fulfilled"
        );
        assert_eq!(
            eval("return await Promise.race([new Promise(r => setTimeout(() => r('slow'), 20)), Promise.resolve('fast')]);"),
            "fast"
        );
        assert_eq!(
            eval("let seen = ''; await Promise.reject(new Error('x')).catch(e => { seen = e.message; }).finally(() => { seen += '!'; }); return seen;"),
            "x!"
        );
    }

    #[test]
    fn test_function_call_apply_bind() {
        let source = "
            function add(a, b) { return this.base + a + b; }
            const ctx = { base: 10 };
            const bound = add.bind(ctx, 1);
            return [add.call(ctx, 1, 2), add.apply(ctx, [2, 3]), bound(5)].join();
        ";
        assert_eq!(eval(source), "13,15,16");
    }

    #[test]
    fn test_errors_and_instanceof() {
        assert_eq!(eval("return String(new TypeError('bad'));"), "TypeError: bad");
        assert_eq!(
            eval("try { null.x } catch (e) { return [e instanceof TypeError, e instanceof Error, e instanceof RangeError].join(); }"),
            "true,true,false"
        );
    }

    #[test]
    fn test_math_random_range() {
        assert_eq!(
            eval("for (let i = 0; i < 100; i++) { const r = Math.random(); if (r < 0 || r >= 1) return 'bad'; } return 'ok';"),
            "ok"
        );
        assert_eq!(eval("return Math.max(1, 5, 3) + Math.min() ;"), "Infinity");
        assert_eq!(eval("return Math.round(2.5) + Math.round(-2.5);"), "1");
    }
}
