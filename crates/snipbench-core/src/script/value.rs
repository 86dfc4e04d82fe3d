//! Runtime values, scopes and the conversions between them.

use std::cell::RefCell;
use std::fmt::Write as _;
use std::rc::Rc;

use rustc_hash::FxHashMap;

use super::ast::{FunctionDef, Name};
use super::interp::Interpreter;

/// Result of evaluating script code. `Err` carries the thrown value.
pub type JsResult<T> = Result<T, Value>;

/// Signature of a host-provided function: `(interpreter, this, args)`.
pub type NativeFn = dyn Fn(&mut Interpreter, &Value, &[Value]) -> JsResult<Value>;

pub type ObjectRef = Rc<RefCell<Object>>;
pub type PromiseRef = Rc<RefCell<PromiseCell>>;

#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    Str(Rc<str>),
    Array(Rc<RefCell<Vec<Value>>>),
    Object(ObjectRef),
    Function(Rc<Closure>),
    Native(Rc<NativeFunction>),
    Map(Rc<RefCell<MapStore>>),
    Set(Rc<RefCell<MapStore>>),
    Promise(PromiseRef),
}

impl std::fmt::Debug for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&inspect(self))
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.into())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s.into())
    }
}

impl Value {
    pub fn array(items: Vec<Value>) -> Value {
        Value::Array(Rc::new(RefCell::new(items)))
    }

    pub fn object(object: Object) -> Value {
        Value::Object(Rc::new(RefCell::new(object)))
    }

    pub fn is_nullish(&self) -> bool {
        matches!(self, Value::Undefined | Value::Null)
    }

    pub fn is_callable(&self) -> bool {
        matches!(self, Value::Function(_) | Value::Native(_))
    }

    pub fn truthy(&self) -> bool {
        match self {
            Value::Undefined | Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::Str(s) => !s.is_empty(),
            _ => true,
        }
    }

    pub fn type_of(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null => "object",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::Str(_) => "string",
            Value::Function(_) | Value::Native(_) => "function",
            _ => "object",
        }
    }

    pub fn to_number(&self) -> f64 {
        match self {
            Value::Undefined => f64::NAN,
            Value::Null => 0.0,
            Value::Bool(b) => f64::from(u8::from(*b)),
            Value::Number(n) => *n,
            Value::Str(s) => string_to_number(s),
            Value::Array(_) => string_to_number(&to_display_string(self)),
            _ => f64::NAN,
        }
    }

    pub fn to_js_string(&self) -> Rc<str> {
        match self {
            Value::Str(s) => s.clone(),
            other => to_display_string(other).into(),
        }
    }

    /// Key used for property access.
    pub fn to_property_key(&self) -> Rc<str> {
        self.to_js_string()
    }

    /// Pointer identity for reference values.
    fn ref_id(&self) -> Option<usize> {
        match self {
            Value::Array(a) => Some(Rc::as_ptr(a) as *const u8 as usize),
            Value::Object(o) => Some(Rc::as_ptr(o) as *const u8 as usize),
            Value::Function(f) => Some(Rc::as_ptr(f) as *const u8 as usize),
            Value::Native(f) => Some(Rc::as_ptr(f) as *const u8 as usize),
            Value::Map(m) | Value::Set(m) => Some(Rc::as_ptr(m) as *const u8 as usize),
            Value::Promise(p) => Some(Rc::as_ptr(p) as *const u8 as usize),
            _ => None,
        }
    }
}

/// `===`.
pub fn strict_equals(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Number(x), Value::Number(y)) => x == y,
        (Value::Str(x), Value::Str(y)) => x == y,
        _ => match (a.ref_id(), b.ref_id()) {
            (Some(x), Some(y)) => x == y,
            _ => false,
        },
    }
}

/// SameValueZero, used by `includes`, `Map` and `Set`.
pub fn same_value_zero(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) if x.is_nan() && y.is_nan() => true,
        _ => strict_equals(a, b),
    }
}

/// `==`.
pub fn loose_equals(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Undefined | Value::Null, Value::Undefined | Value::Null) => true,
        (Value::Undefined | Value::Null, _) | (_, Value::Undefined | Value::Null) => false,
        (Value::Number(_), Value::Str(_)) | (Value::Str(_), Value::Number(_)) => {
            a.to_number() == b.to_number()
        }
        (Value::Bool(_), _) => loose_equals(&Value::Number(a.to_number()), b),
        (_, Value::Bool(_)) => loose_equals(a, &Value::Number(b.to_number())),
        (Value::Number(_) | Value::Str(_), _) if b.ref_id().is_some() => {
            loose_equals(a, &Value::Str(b.to_js_string()))
        }
        (_, Value::Number(_) | Value::Str(_)) if a.ref_id().is_some() => {
            loose_equals(&Value::Str(a.to_js_string()), b)
        }
        _ => strict_equals(a, b),
    }
}

/// JavaScript `ToNumber` for strings.
pub fn string_to_number(s: &str) -> f64 {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return 0.0;
    }
    let (sign, unsigned) = match trimmed.as_bytes()[0] {
        b'-' => (-1.0, &trimmed[1..]),
        b'+' => (1.0, &trimmed[1..]),
        _ => (1.0, trimmed),
    };
    if unsigned == "Infinity" {
        return sign * f64::INFINITY;
    }
    if let Some(hex) = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
    {
        return parse_radix_digits(hex, 16).unwrap_or(f64::NAN);
    }
    let valid = unsigned
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, '.' | 'e' | 'E' | '+' | '-'));
    if !valid || unsigned.starts_with(['e', 'E']) {
        return f64::NAN;
    }
    unsigned.parse::<f64>().map(|n| sign * n).unwrap_or(f64::NAN)
}

fn parse_radix_digits(digits: &str, radix: u32) -> Option<f64> {
    if digits.is_empty() {
        return None;
    }
    digits.chars().try_fold(0.0f64, |acc, c| {
        c.to_digit(radix).map(|d| acc * radix as f64 + d as f64)
    })
}

/// JavaScript `Number.prototype.toString()` for radix 10.
pub fn number_to_string(n: f64) -> String {
    if n.is_nan() {
        return "NaN".into();
    }
    if n == 0.0 {
        return "0".into();
    }
    if n.is_infinite() {
        return if n > 0.0 { "Infinity" } else { "-Infinity" }.into();
    }

    let sign = if n < 0.0 { "-" } else { "" };
    // Shortest round-trip digits, then laid out per the ECMAScript rules.
    let sci = format!("{:e}", n.abs());
    let (mantissa, exp) = sci.split_once('e').unwrap_or((&sci, "0"));
    let exp: i32 = exp.parse().unwrap_or(0);
    let digits: String = mantissa.chars().filter(|c| *c != '.').collect();
    let k = digits.len() as i32;
    let point = exp + 1;

    let body = if k <= point && point <= 21 {
        format!("{}{}", digits, "0".repeat((point - k) as usize))
    } else if 0 < point && point <= 21 {
        let (int, frac) = digits.split_at(point as usize);
        format!("{}.{}", int, frac)
    } else if -6 < point && point <= 0 {
        format!("0.{}{}", "0".repeat((-point) as usize), digits)
    } else {
        let e = point - 1;
        let e_sign = if e < 0 { '-' } else { '+' };
        if k == 1 {
            format!("{}e{}{}", digits, e_sign, e.abs())
        } else {
            format!("{}.{}e{}{}", &digits[..1], &digits[1..], e_sign, e.abs())
        }
    };
    format!("{}{}", sign, body)
}

/// `String(value)`.
pub fn to_display_string(value: &Value) -> String {
    match value {
        Value::Undefined => "undefined".into(),
        Value::Null => "null".into(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => number_to_string(*n),
        Value::Str(s) => s.to_string(),
        Value::Array(items) => {
            let items = items.borrow();
            let mut out = String::new();
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                if !item.is_nullish() {
                    out.push_str(&to_display_string(item));
                }
            }
            out
        }
        Value::Object(obj) => {
            let obj = obj.borrow();
            if obj.class == ObjectClass::Error {
                let name = obj.get("name").map(|v| to_display_string(&v));
                let message = obj.get("message").map(|v| to_display_string(&v));
                match (name, message) {
                    (Some(name), Some(message)) if !message.is_empty() => {
                        format!("{}: {}", name, message)
                    }
                    (Some(name), _) => name,
                    (None, Some(message)) => message,
                    (None, None) => "Error".into(),
                }
            } else {
                "[object Object]".into()
            }
        }
        Value::Function(f) => format!(
            "function {}() {{ [code] }}",
            f.def.name.as_deref().unwrap_or("")
        ),
        Value::Native(f) => format!("function {}() {{ [native code] }}", f.name),
        Value::Map(_) => "[object Map]".into(),
        Value::Set(_) => "[object Set]".into(),
        Value::Promise(_) => "[object Promise]".into(),
    }
}

/// Developer-facing rendering used by `console.log`.
pub fn inspect(value: &Value) -> String {
    let mut out = String::new();
    inspect_into(value, 0, &mut out);
    out
}

fn inspect_into(value: &Value, depth: usize, out: &mut String) {
    const MAX_DEPTH: usize = 3;
    match value {
        Value::Str(s) if depth > 0 => {
            let _ = write!(out, "'{}'", s);
        }
        Value::Array(items) => {
            if depth >= MAX_DEPTH {
                out.push_str("[Array]");
                return;
            }
            let items = items.borrow();
            if items.is_empty() {
                out.push_str("[]");
                return;
            }
            out.push_str("[ ");
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                inspect_into(item, depth + 1, out);
            }
            out.push_str(" ]");
        }
        Value::Object(obj) if obj.borrow().class == ObjectClass::Plain => {
            if depth >= MAX_DEPTH {
                out.push_str("[Object]");
                return;
            }
            let obj = obj.borrow();
            if obj.is_empty() {
                out.push_str("{}");
                return;
            }
            out.push_str("{ ");
            for (i, (key, item)) in obj.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                let _ = write!(out, "{}: ", key);
                inspect_into(item, depth + 1, out);
            }
            out.push_str(" }");
        }
        Value::Map(map) => {
            let map = map.borrow();
            let _ = write!(out, "Map({}) {{", map.len());
            for (i, (key, item)) in map.entries().enumerate() {
                out.push_str(if i == 0 { " " } else { ", " });
                inspect_into(key, depth + 1, out);
                out.push_str(" => ");
                inspect_into(item, depth + 1, out);
            }
            out.push_str(if map.len() > 0 { " }" } else { "}" });
        }
        Value::Set(set) => {
            let set = set.borrow();
            let _ = write!(out, "Set({}) {{", set.len());
            for (i, (key, _)) in set.entries().enumerate() {
                out.push_str(if i == 0 { " " } else { ", " });
                inspect_into(key, depth + 1, out);
            }
            out.push_str(if set.len() > 0 { " }" } else { "}" });
        }
        Value::Promise(p) => {
            let label = match &p.borrow().state {
                PromiseState::Pending => "<pending>".to_string(),
                PromiseState::Fulfilled(v) => inspect(v),
                PromiseState::Rejected(v) => format!("<rejected> {}", inspect(v)),
            };
            let _ = write!(out, "Promise {{ {} }}", label);
        }
        Value::Function(_) | Value::Native(_) => {
            let name = match value {
                Value::Function(f) => f.def.name.as_deref().unwrap_or("(anonymous)").to_string(),
                Value::Native(f) => f.name.to_string(),
                _ => String::new(),
            };
            let _ = write!(out, "[Function: {}]", name);
        }
        other => out.push_str(&to_display_string(other)),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ObjectClass {
    #[default]
    Plain,
    Error,
}

/// Insertion-ordered property bag.
#[derive(Default)]
pub struct Object {
    props: Vec<(Name, Value)>,
    index: FxHashMap<Name, usize>,
    pub proto: Option<ObjectRef>,
    pub class: ObjectClass,
}

impl Object {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_proto(proto: Option<ObjectRef>) -> Self {
        Self {
            proto,
            ..Self::default()
        }
    }

    pub fn get_own(&self, key: &str) -> Option<&Value> {
        self.index.get(key).map(|&i| &self.props[i].1)
    }

    /// Own property, then the prototype chain.
    pub fn get(&self, key: &str) -> Option<Value> {
        if let Some(value) = self.get_own(key) {
            return Some(value.clone());
        }
        let mut proto = self.proto.clone();
        while let Some(current) = proto {
            let current = current.borrow();
            if let Some(value) = current.get_own(key) {
                return Some(value.clone());
            }
            proto = current.proto.clone();
        }
        None
    }

    pub fn has_own(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    pub fn set(&mut self, key: impl Into<Name>, value: Value) {
        let key = key.into();
        match self.index.get(&key) {
            Some(&i) => self.props[i].1 = value,
            None => {
                self.index.insert(key.clone(), self.props.len());
                self.props.push((key, value));
            }
        }
    }

    pub fn remove(&mut self, key: &str) -> bool {
        let Some(i) = self.index.remove(key) else {
            return false;
        };
        self.props.remove(i);
        for slot in self.index.values_mut() {
            if *slot > i {
                *slot -= 1;
            }
        }
        true
    }

    pub fn len(&self) -> usize {
        self.props.len()
    }

    pub fn is_empty(&self) -> bool {
        self.props.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Name, &Value)> {
        self.props.iter().map(|(k, v)| (k, v))
    }

    pub fn keys(&self) -> Vec<Name> {
        self.props.iter().map(|(k, _)| k.clone()).collect()
    }
}

/// A user-defined function with its captured scope.
pub struct Closure {
    pub def: Rc<FunctionDef>,
    pub env: Scope,
    pub props: RefCell<Object>,
}

impl Closure {
    /// Lazily created `prototype` object used by `new` and `instanceof`.
    pub fn prototype(&self) -> ObjectRef {
        if let Some(Value::Object(proto)) = self.props.borrow().get_own("prototype") {
            return proto.clone();
        }
        let proto = Rc::new(RefCell::new(Object::new()));
        self.props
            .borrow_mut()
            .set("prototype", Value::Object(proto.clone()));
        proto
    }
}

/// A host function, optionally constructible, with static properties.
pub struct NativeFunction {
    pub name: Name,
    pub call: Box<NativeFn>,
    pub construct: Option<Box<NativeFn>>,
    pub props: RefCell<Object>,
}

impl NativeFunction {
    pub fn new(
        name: &str,
        call: impl Fn(&mut Interpreter, &Value, &[Value]) -> JsResult<Value> + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            call: Box::new(call),
            construct: None,
            props: RefCell::new(Object::new()),
        }
    }

    pub fn with_constructor(
        mut self,
        construct: impl Fn(&mut Interpreter, &Value, &[Value]) -> JsResult<Value> + 'static,
    ) -> Self {
        self.construct = Some(Box::new(construct));
        self
    }

    pub fn into_value(self) -> Value {
        Value::Native(Rc::new(self))
    }
}

/// Hashable identity of a `Map` key or `Set` member.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum MapKey {
    Undefined,
    Null,
    Bool(bool),
    Number(u64),
    Str(Rc<str>),
    Ref(usize),
}

impl MapKey {
    fn of(value: &Value) -> Self {
        match value {
            Value::Undefined => MapKey::Undefined,
            Value::Null => MapKey::Null,
            Value::Bool(b) => MapKey::Bool(*b),
            Value::Number(n) if n.is_nan() => MapKey::Number(f64::NAN.to_bits()),
            Value::Number(n) if *n == 0.0 => MapKey::Number(0.0f64.to_bits()),
            Value::Number(n) => MapKey::Number(n.to_bits()),
            Value::Str(s) => MapKey::Str(s.clone()),
            other => MapKey::Ref(other.ref_id().unwrap_or(0)),
        }
    }
}

/// Insertion-ordered storage behind `Map` and `Set`.
#[derive(Default)]
pub struct MapStore {
    entries: Vec<Option<(Value, Value)>>,
    index: FxHashMap<MapKey, usize>,
    live: usize,
}

impl MapStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &Value) -> Option<Value> {
        let slot = *self.index.get(&MapKey::of(key))?;
        self.entries[slot].as_ref().map(|(_, v)| v.clone())
    }

    pub fn has(&self, key: &Value) -> bool {
        self.index.contains_key(&MapKey::of(key))
    }

    pub fn set(&mut self, key: Value, value: Value) {
        let map_key = MapKey::of(&key);
        match self.index.get(&map_key) {
            Some(&slot) => {
                if let Some(entry) = self.entries[slot].as_mut() {
                    entry.1 = value;
                }
            }
            None => {
                // -0 is stored as +0.
                let key = match key {
                    Value::Number(n) if n == 0.0 => Value::Number(0.0),
                    other => other,
                };
                self.index.insert(map_key, self.entries.len());
                self.entries.push(Some((key, value)));
                self.live += 1;
            }
        }
    }

    pub fn delete(&mut self, key: &Value) -> bool {
        let Some(slot) = self.index.remove(&MapKey::of(key)) else {
            return false;
        };
        self.entries[slot] = None;
        self.live -= 1;
        if self.entries.len() > 32 && self.live * 2 < self.entries.len() {
            self.compact();
        }
        true
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.index.clear();
        self.live = 0;
    }

    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    pub fn entries(&self) -> impl Iterator<Item = (&Value, &Value)> {
        self.entries.iter().flatten().map(|(k, v)| (k, v))
    }

    /// Cloned `(key, value)` pairs in insertion order.
    pub fn snapshot(&self) -> Vec<(Value, Value)> {
        self.entries().map(|(k, v)| (k.clone(), v.clone())).collect()
    }

    fn compact(&mut self) {
        self.entries.retain(Option::is_some);
        self.index.clear();
        for (slot, entry) in self.entries.iter().enumerate() {
            if let Some((key, _)) = entry {
                self.index.insert(MapKey::of(key), slot);
            }
        }
    }
}

pub enum PromiseState {
    Pending,
    Fulfilled(Value),
    Rejected(Value),
}

/// What happens when a promise settles.
pub enum Reaction {
    /// `then(on_fulfilled, on_rejected)` feeding a derived promise.
    Then {
        on_fulfilled: Option<Value>,
        on_rejected: Option<Value>,
        derived: PromiseRef,
    },
    /// Host continuation (combinators, thenable adoption).
    Native(Rc<dyn Fn(&mut Interpreter, Result<Value, Value>) -> JsResult<()>>),
}

pub struct PromiseCell {
    pub state: PromiseState,
    pub reactions: Vec<Reaction>,
}

impl PromiseCell {
    pub fn pending() -> PromiseRef {
        Rc::new(RefCell::new(PromiseCell {
            state: PromiseState::Pending,
            reactions: Vec::new(),
        }))
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.state, PromiseState::Pending)
    }
}

#[derive(Clone, Copy)]
struct Binding {
    mutable: bool,
}

struct ScopeData {
    vars: RefCell<FxHashMap<Name, (Value, Binding)>>,
    parent: Option<Scope>,
}

/// Lexical environment. Cheap to clone; clones share storage.
#[derive(Clone)]
pub struct Scope(Rc<ScopeData>);

/// Failure of a scope operation, mapped to a script error by the caller.
#[derive(Debug, PartialEq, Eq)]
pub enum ScopeError {
    NotDefined,
    ConstAssignment,
}

impl Scope {
    pub fn root() -> Self {
        Scope(Rc::new(ScopeData {
            vars: RefCell::new(FxHashMap::default()),
            parent: None,
        }))
    }

    pub fn child(parent: &Scope) -> Self {
        Scope(Rc::new(ScopeData {
            vars: RefCell::new(FxHashMap::default()),
            parent: Some(parent.clone()),
        }))
    }

    pub fn parent(&self) -> Option<&Scope> {
        self.0.parent.as_ref()
    }

    /// Create or replace a binding in this scope.
    pub fn declare(&self, name: impl Into<Name>, value: Value, mutable: bool) {
        self.0
            .vars
            .borrow_mut()
            .insert(name.into(), (value, Binding { mutable }));
    }

    /// Create a binding only if this scope does not already hold one.
    pub fn declare_if_absent(&self, name: &Name, value: Value) {
        let mut vars = self.0.vars.borrow_mut();
        if !vars.contains_key(name) {
            vars.insert(name.clone(), (value, Binding { mutable: true }));
        }
    }

    pub fn has_own(&self, name: &str) -> bool {
        self.0.vars.borrow().contains_key(name)
    }

    pub fn lookup(&self, name: &str) -> Option<Value> {
        let mut scope = self;
        loop {
            if let Some((value, _)) = scope.0.vars.borrow().get(name) {
                return Some(value.clone());
            }
            scope = scope.0.parent.as_ref()?;
        }
    }

    pub fn is_mutable(&self, name: &str) -> Option<bool> {
        let mut scope = self;
        loop {
            if let Some((_, binding)) = scope.0.vars.borrow().get(name) {
                return Some(binding.mutable);
            }
            scope = scope.0.parent.as_ref()?;
        }
    }

    /// Assign to the nearest existing binding.
    pub fn assign(&self, name: &str, value: Value) -> Result<(), ScopeError> {
        let mut scope = self;
        loop {
            {
                let mut vars = scope.0.vars.borrow_mut();
                if let Some((slot, binding)) = vars.get_mut(name) {
                    if !binding.mutable {
                        return Err(ScopeError::ConstAssignment);
                    }
                    *slot = value;
                    return Ok(());
                }
            }
            scope = scope.0.parent.as_ref().ok_or(ScopeError::NotDefined)?;
        }
    }

    /// The outermost scope of the chain.
    pub fn root_of(&self) -> Scope {
        let mut scope = self.clone();
        while let Some(parent) = scope.0.parent.clone() {
            scope = parent;
        }
        scope
    }
}
