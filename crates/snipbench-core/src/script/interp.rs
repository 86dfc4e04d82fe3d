//! Tree-walking evaluator and the realm it runs in.
//!
//! A realm owns the global scope, the global object, the microtask queue and
//! the timer heap. Values are `Rc` based, so an [`Interpreter`] never leaves
//! the thread that created it.

use std::cell::RefCell;
use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, VecDeque};
use std::rc::Rc;
use std::time::{Duration, Instant};

use rustc_hash::FxHashSet;

use super::ast::*;
use super::builtins;
use super::value::*;

/// Default limit on nested script calls.
pub const DEFAULT_MAX_CALL_DEPTH: usize = 1000;

/// Longest array the evaluator will materialize.
pub const MAX_ARRAY_LENGTH: usize = 1 << 26;

pub(crate) enum Flow {
    Normal,
    Return(Value),
    Break,
    Continue,
}

enum Job {
    Reaction {
        reaction: Reaction,
        outcome: Result<Value, Value>,
    },
    Callback {
        callback: Value,
        args: Vec<Value>,
    },
}

struct Timer {
    due: Instant,
    id: u64,
    callback: Value,
    args: Vec<Value>,
}

impl PartialEq for Timer {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.id == other.id
    }
}

impl Eq for Timer {}

impl PartialOrd for Timer {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Timer {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.due, self.id).cmp(&(other.due, other.id))
    }
}

enum ExportSource {
    Value(Value),
    Binding(Name),
}

#[derive(Clone, Copy)]
enum BindMode {
    Declare { mutable: bool },
    Var,
    Assign,
}

/// Resolved assignment target.
enum Reference {
    Name(Name),
    Index(Rc<RefCell<Vec<Value>>>, usize),
    Property(Value, Rc<str>),
}

pub struct Interpreter {
    global: Scope,
    global_object: ObjectRef,
    jobs: VecDeque<Job>,
    timers: BinaryHeap<Reverse<Timer>>,
    cancelled_timers: FxHashSet<u64>,
    next_timer_id: u64,
    depth: usize,
    max_depth: usize,
    started: Instant,
    exports: Option<Vec<(Name, ExportSource)>>,
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}

impl Interpreter {
    /// Create a realm with the built-in library installed.
    pub fn new() -> Self {
        let mut interp = Self {
            global: Scope::root(),
            global_object: Rc::new(RefCell::new(Object::new())),
            jobs: VecDeque::new(),
            timers: BinaryHeap::new(),
            cancelled_timers: FxHashSet::default(),
            next_timer_id: 1,
            depth: 0,
            max_depth: DEFAULT_MAX_CALL_DEPTH,
            started: Instant::now(),
            exports: None,
        };
        builtins::install(&mut interp);
        interp
    }

    pub fn with_max_call_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    pub fn global(&self) -> &Scope {
        &self.global
    }

    pub fn global_object(&self) -> &ObjectRef {
        &self.global_object
    }

    /// Milliseconds since the realm was created.
    pub fn elapsed_ms(&self) -> f64 {
        self.started.elapsed().as_secs_f64() * 1000.0
    }

    // ---- entry points ----

    /// Run a classic script directly in the global scope.
    pub fn run_script(&mut self, program: &Program) -> JsResult<()> {
        let scope = self.global.clone();
        hoist_vars(&program.var_names, &scope);
        self.exec_stmts(&program.body, &scope)?;
        Ok(())
    }

    /// Evaluate a module in its own scope and return its namespace object.
    pub fn run_module(&mut self, program: &Program) -> JsResult<Value> {
        let scope = Scope::child(&self.global);
        hoist_vars(&program.var_names, &scope);

        let saved = self.exports.replace(Vec::new());
        let result = self.exec_stmts(&program.body, &scope);
        let exports = std::mem::replace(&mut self.exports, saved).unwrap_or_default();
        result?;

        let mut namespace = Object::new();
        for (name, source) in exports {
            let value = match source {
                ExportSource::Value(value) => value,
                ExportSource::Binding(local) => scope.lookup(&local).unwrap_or_default(),
            };
            namespace.set(name, value);
        }
        Ok(Value::object(namespace))
    }

    /// Wrap a parsed function body as a callable closing over `scope`.
    pub fn make_function(&self, program: Program, is_async: bool, scope: &Scope) -> Value {
        let def = FunctionDef {
            name: None,
            params: Vec::new(),
            rest: None,
            body: FunctionBody::Block(program.body),
            is_arrow: false,
            is_async,
            var_names: program.var_names,
        };
        Value::Function(Rc::new(Closure {
            def: Rc::new(def),
            env: scope.clone(),
            props: RefCell::new(Object::new()),
        }))
    }

    pub fn call(&mut self, callee: &Value, this: &Value, args: &[Value]) -> JsResult<Value> {
        match callee {
            Value::Function(closure) => self.call_closure(closure, this, args),
            Value::Native(native) => (native.call)(self, this, args),
            other => Err(self.type_error(format!("{} is not a function", inspect(other)))),
        }
    }

    pub fn construct(&mut self, callee: &Value, args: &[Value], label: &str) -> JsResult<Value> {
        match callee {
            Value::Native(native) => match &native.construct {
                Some(construct) => construct(self, &Value::Undefined, args),
                None => Err(self.type_error(format!("{} is not a constructor", label))),
            },
            Value::Function(closure) if !closure.def.is_arrow && !closure.def.is_async => {
                let instance = Value::object(Object::with_proto(Some(closure.prototype())));
                let returned = self.call_closure(closure, &instance, args)?;
                Ok(match returned {
                    Value::Undefined
                    | Value::Null
                    | Value::Bool(_)
                    | Value::Number(_)
                    | Value::Str(_) => instance,
                    object => object,
                })
            }
            _ => Err(self.type_error(format!("{} is not a constructor", label))),
        }
    }

    // ---- errors ----

    pub fn make_error(&self, name: &str, message: impl Into<String>) -> Value {
        let mut object = Object::new();
        object.class = ObjectClass::Error;
        object.set("name", Value::from(name));
        object.set("message", Value::from(message.into()));
        Value::object(object)
    }

    pub fn type_error(&self, message: impl Into<String>) -> Value {
        self.make_error("TypeError", message)
    }

    pub fn range_error(&self, message: impl Into<String>) -> Value {
        self.make_error("RangeError", message)
    }

    pub fn reference_error(&self, message: impl Into<String>) -> Value {
        self.make_error("ReferenceError", message)
    }

    // ---- promises and the job queue ----

    /// Settle `promise` with `value`, adopting the state of a promise value.
    pub fn resolve_promise(&mut self, promise: &PromiseRef, value: Value) {
        if let Value::Promise(inner) = &value {
            if Rc::ptr_eq(inner, promise) {
                let error = self.type_error("Chaining cycle detected for promise");
                self.settle(promise, Err(error));
                return;
            }
            let target = promise.clone();
            self.subscribe(
                inner,
                Reaction::Native(Rc::new(move |interp: &mut Interpreter, outcome| {
                    interp.settle(&target, outcome);
                    Ok(())
                })),
            );
            return;
        }
        self.settle(promise, Ok(value));
    }

    pub fn reject_promise(&mut self, promise: &PromiseRef, reason: Value) {
        self.settle(promise, Err(reason));
    }

    pub fn resolved_promise(&mut self, value: Value) -> PromiseRef {
        if let Value::Promise(promise) = value {
            return promise;
        }
        let promise = PromiseCell::pending();
        self.settle(&promise, Ok(value));
        promise
    }

    fn settle(&mut self, promise: &PromiseRef, outcome: Result<Value, Value>) {
        let reactions = {
            let mut cell = promise.borrow_mut();
            if !cell.is_pending() {
                return;
            }
            cell.state = match &outcome {
                Ok(value) => PromiseState::Fulfilled(value.clone()),
                Err(reason) => PromiseState::Rejected(reason.clone()),
            };
            std::mem::take(&mut cell.reactions)
        };
        for reaction in reactions {
            self.jobs.push_back(Job::Reaction {
                reaction,
                outcome: outcome.clone(),
            });
        }
    }

    /// Run `reaction` once `promise` settles.
    pub fn subscribe(&mut self, promise: &PromiseRef, reaction: Reaction) {
        let outcome = {
            let mut cell = promise.borrow_mut();
            match &cell.state {
                PromiseState::Pending => {
                    cell.reactions.push(reaction);
                    return;
                }
                PromiseState::Fulfilled(value) => Ok(value.clone()),
                PromiseState::Rejected(reason) => Err(reason.clone()),
            }
        };
        self.jobs.push_back(Job::Reaction { reaction, outcome });
    }

    /// `promise.then(on_fulfilled, on_rejected)`.
    pub fn promise_then(
        &mut self,
        promise: &PromiseRef,
        on_fulfilled: Option<Value>,
        on_rejected: Option<Value>,
    ) -> PromiseRef {
        let derived = PromiseCell::pending();
        self.subscribe(
            promise,
            Reaction::Then {
                on_fulfilled: on_fulfilled.filter(Value::is_callable),
                on_rejected: on_rejected.filter(Value::is_callable),
                derived: derived.clone(),
            },
        );
        derived
    }

    pub fn enqueue_callback(&mut self, callback: Value, args: Vec<Value>) {
        self.jobs.push_back(Job::Callback { callback, args });
    }

    pub fn add_timer(&mut self, callback: Value, delay_ms: f64, args: Vec<Value>) -> u64 {
        let id = self.next_timer_id;
        self.next_timer_id += 1;
        let delay = if delay_ms.is_finite() && delay_ms > 0.0 {
            Duration::from_secs_f64(delay_ms / 1000.0)
        } else {
            Duration::ZERO
        };
        self.timers.push(Reverse(Timer {
            due: Instant::now() + delay,
            id,
            callback,
            args,
        }));
        id
    }

    pub fn clear_timer(&mut self, id: u64) {
        if self.timers.iter().any(|Reverse(timer)| timer.id == id) {
            self.cancelled_timers.insert(id);
        }
    }

    fn run_job(&mut self, job: Job) -> JsResult<()> {
        match job {
            Job::Callback { callback, args } => {
                self.call(&callback, &Value::Undefined, &args)?;
            }
            Job::Reaction {
                reaction: Reaction::Native(continuation),
                outcome,
            } => continuation(self, outcome)?,
            Job::Reaction {
                reaction:
                    Reaction::Then {
                        on_fulfilled,
                        on_rejected,
                        derived,
                    },
                outcome,
            } => {
                let (handler, argument, failed) = match outcome {
                    Ok(value) => (on_fulfilled, value, false),
                    Err(reason) => (on_rejected, reason, true),
                };
                match handler {
                    Some(handler) => match self.call(&handler, &Value::Undefined, &[argument]) {
                        Ok(value) => self.resolve_promise(&derived, value),
                        Err(reason) => self.reject_promise(&derived, reason),
                    },
                    None if failed => self.reject_promise(&derived, argument),
                    None => self.resolve_promise(&derived, argument),
                }
            }
        }
        Ok(())
    }

    /// Run one queued microtask, or else the earliest timer (sleeping until
    /// it is due). Returns `false` when there is nothing left to run.
    fn run_next_task(&mut self) -> JsResult<bool> {
        if let Some(job) = self.jobs.pop_front() {
            self.run_job(job)?;
            return Ok(true);
        }
        while let Some(Reverse(timer)) = self.timers.pop() {
            if self.cancelled_timers.remove(&timer.id) {
                continue;
            }
            let now = Instant::now();
            if timer.due > now {
                std::thread::sleep(timer.due - now);
            }
            self.call(&timer.callback, &Value::Undefined, &timer.args)?;
            return Ok(true);
        }
        Ok(false)
    }

    /// Drive the queue until `value` (if it is a promise) settles.
    pub fn await_value(&mut self, value: Value) -> JsResult<Value> {
        let Value::Promise(promise) = value else {
            return Ok(value);
        };
        loop {
            let outcome = match &promise.borrow().state {
                PromiseState::Pending => None,
                PromiseState::Fulfilled(value) => Some(Ok(value.clone())),
                PromiseState::Rejected(reason) => Some(Err(reason.clone())),
            };
            if let Some(outcome) = outcome {
                return outcome;
            }
            if !self.run_next_task()? {
                return Err(self.make_error(
                    "Error",
                    "Awaited promise can never settle: no pending jobs or timers remain",
                ));
            }
        }
    }

    /// Drain the microtask queue.
    pub fn run_microtasks(&mut self) -> JsResult<()> {
        while let Some(job) = self.jobs.pop_front() {
            self.run_job(job)?;
        }
        Ok(())
    }

    /// Run microtasks and timers until both are exhausted.
    pub fn run_until_idle(&mut self) -> JsResult<()> {
        while self.run_next_task()? {}
        Ok(())
    }

    /// Drop timers that nobody awaited.
    pub fn discard_timers(&mut self) {
        self.timers.clear();
        self.cancelled_timers.clear();
    }

    // ---- property access ----

    pub fn get_property(&mut self, target: &Value, key: &str) -> JsResult<Value> {
        match target {
            Value::Undefined | Value::Null => Err(self.type_error(format!(
                "Cannot read properties of {} (reading '{}')",
                to_display_string(target),
                key
            ))),
            Value::Object(object) => {
                if let Some(value) = object.borrow().get(key) {
                    return Ok(value);
                }
                Ok(builtins::bound_method(target, key).unwrap_or_default())
            }
            Value::Array(items) => {
                if let Some(index) = array_index(key) {
                    return Ok(items.borrow().get(index).cloned().unwrap_or_default());
                }
                if key == "length" {
                    return Ok(Value::Number(items.borrow().len() as f64));
                }
                Ok(builtins::bound_method(target, key).unwrap_or_default())
            }
            Value::Str(s) => {
                if let Some(index) = array_index(key) {
                    return Ok(s
                        .chars()
                        .nth(index)
                        .map(|c| Value::from(c.to_string()))
                        .unwrap_or_default());
                }
                if key == "length" {
                    return Ok(Value::Number(s.chars().count() as f64));
                }
                Ok(builtins::bound_method(target, key).unwrap_or_default())
            }
            Value::Function(closure) => {
                if let Some(value) = closure.props.borrow().get_own(key) {
                    return Ok(value.clone());
                }
                match key {
                    "name" => Ok(Value::from(closure.def.name.as_deref().unwrap_or(""))),
                    "length" => Ok(Value::Number(closure.def.params.len() as f64)),
                    "prototype" if !closure.def.is_arrow => Ok(Value::Object(closure.prototype())),
                    _ => Ok(builtins::bound_method(target, key).unwrap_or_default()),
                }
            }
            Value::Native(native) => {
                if let Some(value) = native.props.borrow().get_own(key) {
                    return Ok(value.clone());
                }
                match key {
                    "name" => Ok(Value::Str(native.name.clone())),
                    _ => Ok(builtins::bound_method(target, key).unwrap_or_default()),
                }
            }
            Value::Map(store) | Value::Set(store) if key == "size" => {
                Ok(Value::Number(store.borrow().len() as f64))
            }
            _ => Ok(builtins::bound_method(target, key).unwrap_or_default()),
        }
    }

    pub fn set_property(&mut self, target: &Value, key: &str, value: Value) -> JsResult<()> {
        match target {
            Value::Undefined | Value::Null => Err(self.type_error(format!(
                "Cannot set properties of {} (setting '{}')",
                to_display_string(target),
                key
            ))),
            Value::Object(object) => {
                object.borrow_mut().set(key, value);
                Ok(())
            }
            Value::Array(items) => {
                if let Some(index) = array_index(key) {
                    return self.set_index(items, index, value);
                }
                if key == "length" {
                    let length = value.to_number();
                    if length < 0.0 || length.fract() != 0.0 || length > MAX_ARRAY_LENGTH as f64 {
                        return Err(self.range_error("Invalid array length"));
                    }
                    items.borrow_mut().resize(length as usize, Value::Undefined);
                }
                Ok(())
            }
            Value::Function(closure) => {
                closure.props.borrow_mut().set(key, value);
                Ok(())
            }
            Value::Native(native) => {
                native.props.borrow_mut().set(key, value);
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn set_index(&self, items: &Rc<RefCell<Vec<Value>>>, index: usize, value: Value) -> JsResult<()> {
        let mut items = items.borrow_mut();
        if index >= items.len() {
            if index >= MAX_ARRAY_LENGTH {
                return Err(self.range_error("Invalid array length"));
            }
            items.resize(index + 1, Value::Undefined);
        }
        items[index] = value;
        Ok(())
    }

    fn get_index(&mut self, target: &Value, key: &Value) -> JsResult<Value> {
        if let Value::Number(n) = key {
            if let Some(index) = number_index(*n) {
                match target {
                    Value::Array(items) => {
                        return Ok(items.borrow().get(index).cloned().unwrap_or_default());
                    }
                    Value::Str(s) => {
                        return Ok(s
                            .chars()
                            .nth(index)
                            .map(|c| Value::from(c.to_string()))
                            .unwrap_or_default());
                    }
                    _ => {}
                }
            }
        }
        let key = key.to_property_key();
        self.get_property(target, &key)
    }

    /// Every value produced by iterating `value` with `for...of` semantics.
    pub fn iterate(&mut self, value: &Value) -> JsResult<Vec<Value>> {
        match value {
            Value::Array(items) => Ok(items.borrow().clone()),
            Value::Str(s) => Ok(s.chars().map(|c| Value::from(c.to_string())).collect()),
            Value::Map(store) => Ok(store
                .borrow()
                .snapshot()
                .into_iter()
                .map(|(k, v)| Value::array(vec![k, v]))
                .collect()),
            Value::Set(store) => Ok(store.borrow().entries().map(|(k, _)| k.clone()).collect()),
            other => Err(self.type_error(format!("{} is not iterable", to_display_string(other)))),
        }
    }

    fn has_property(&self, target: &Value, key: &Value) -> JsResult<bool> {
        let key = key.to_property_key();
        match target {
            Value::Object(object) => Ok(object.borrow().get(&key).is_some()),
            Value::Array(items) => Ok(key.as_ref() == "length"
                || array_index(&key).is_some_and(|i| i < items.borrow().len())),
            Value::Function(closure) => Ok(closure.props.borrow().has_own(&key)
                || matches!(key.as_ref(), "name" | "length" | "prototype")),
            Value::Native(native) => Ok(native.props.borrow().has_own(&key) || key.as_ref() == "name"),
            Value::Map(_) | Value::Set(_) | Value::Promise(_) => Ok(false),
            other => Err(self.type_error(format!(
                "Cannot use 'in' operator to search for '{}' in {}",
                key,
                to_display_string(other)
            ))),
        }
    }

    fn instance_of(&self, value: &Value, constructor: &Value) -> JsResult<bool> {
        match constructor {
            Value::Function(closure) => {
                let Value::Object(object) = value else {
                    return Ok(false);
                };
                let proto = closure.prototype();
                let mut current = object.borrow().proto.clone();
                while let Some(candidate) = current {
                    if Rc::ptr_eq(&candidate, &proto) {
                        return Ok(true);
                    }
                    current = candidate.borrow().proto.clone();
                }
                Ok(false)
            }
            Value::Native(native) => Ok(builtins::native_instance_of(&native.name, value)),
            _ => Err(self.type_error("Right-hand side of 'instanceof' is not callable")),
        }
    }

    // ---- statements ----

    pub(crate) fn exec_stmts(&mut self, stmts: &[Stmt], scope: &Scope) -> JsResult<Flow> {
        for stmt in stmts {
            match stmt {
                Stmt::Function(def) => self.declare_function(def, scope),
                Stmt::Export(inner) => {
                    if let Stmt::Function(def) = &**inner {
                        self.declare_function(def, scope);
                    }
                }
                _ => {}
            }
        }
        for stmt in stmts {
            let flow = self.exec(stmt, scope)?;
            if !matches!(flow, Flow::Normal) {
                return Ok(flow);
            }
        }
        Ok(Flow::Normal)
    }

    fn declare_function(&self, def: &Rc<FunctionDef>, scope: &Scope) {
        if let Some(name) = &def.name {
            scope.declare(name.clone(), self.closure(def, scope), true);
        }
    }

    fn closure(&self, def: &Rc<FunctionDef>, scope: &Scope) -> Value {
        Value::Function(Rc::new(Closure {
            def: def.clone(),
            env: scope.clone(),
            props: RefCell::new(Object::new()),
        }))
    }

    fn exec_block(&mut self, block: &Block, scope: &Scope) -> JsResult<Flow> {
        if block.scoped {
            let inner = Scope::child(scope);
            self.exec_stmts(&block.body, &inner)
        } else {
            self.exec_stmts(&block.body, scope)
        }
    }

    fn exec(&mut self, stmt: &Stmt, scope: &Scope) -> JsResult<Flow> {
        match stmt {
            Stmt::Expr(expr) => {
                self.eval(expr, scope)?;
                Ok(Flow::Normal)
            }
            Stmt::Decl(kind, decls) => {
                self.exec_declaration(*kind, decls, scope)?;
                Ok(Flow::Normal)
            }
            Stmt::Function(_) | Stmt::Empty => Ok(Flow::Normal),
            Stmt::Return(value) => Ok(Flow::Return(match value {
                Some(expr) => self.eval(expr, scope)?,
                None => Value::Undefined,
            })),
            Stmt::If(test, consequent, alternate) => {
                if self.eval(test, scope)?.truthy() {
                    self.exec(consequent, scope)
                } else if let Some(alternate) = alternate {
                    self.exec(alternate, scope)
                } else {
                    Ok(Flow::Normal)
                }
            }
            Stmt::For {
                init,
                test,
                update,
                body,
                per_iteration,
            } => self.exec_for(
                init.as_deref(),
                test.as_ref(),
                update.as_ref(),
                body,
                per_iteration,
                scope,
            ),
            Stmt::ForOf {
                binding,
                iterable,
                body,
            } => self.exec_for_of(binding, iterable, body, scope),
            Stmt::ForIn {
                binding,
                object,
                body,
            } => self.exec_for_in(binding, object, body, scope),
            Stmt::While(test, body) => {
                while self.eval(test, scope)?.truthy() {
                    match self.exec(body, scope)? {
                        Flow::Break => break,
                        Flow::Return(value) => return Ok(Flow::Return(value)),
                        Flow::Normal | Flow::Continue => {}
                    }
                }
                Ok(Flow::Normal)
            }
            Stmt::DoWhile(body, test) => {
                loop {
                    match self.exec(body, scope)? {
                        Flow::Break => break,
                        Flow::Return(value) => return Ok(Flow::Return(value)),
                        Flow::Normal | Flow::Continue => {}
                    }
                    if !self.eval(test, scope)?.truthy() {
                        break;
                    }
                }
                Ok(Flow::Normal)
            }
            Stmt::Block(block) => self.exec_block(block, scope),
            Stmt::Switch {
                discriminant,
                cases,
            } => self.exec_switch(discriminant, cases, scope),
            Stmt::Break => Ok(Flow::Break),
            Stmt::Continue => Ok(Flow::Continue),
            Stmt::Throw(expr) => Err(self.eval(expr, scope)?),
            Stmt::Try {
                block,
                param,
                handler,
                finalizer,
            } => {
                let result = match self.exec_block(block, scope) {
                    Err(thrown) => match handler {
                        Some(handler) => self.exec_catch(param.as_ref(), handler, thrown, scope),
                        None => Err(thrown),
                    },
                    other => other,
                };
                if let Some(finalizer) = finalizer {
                    match self.exec_block(finalizer, scope)? {
                        Flow::Normal => {}
                        flow => return Ok(flow),
                    }
                }
                result
            }
            Stmt::ExportDefault(expr) => {
                let value = self.eval(expr, scope)?;
                self.record_export("default".into(), ExportSource::Value(value));
                Ok(Flow::Normal)
            }
            Stmt::Export(inner) => {
                let flow = self.exec(inner, scope)?;
                let mut names = Vec::new();
                match &**inner {
                    Stmt::Decl(_, decls) => {
                        for decl in decls {
                            decl.target.bound_names(&mut names);
                        }
                    }
                    Stmt::Function(def) => names.extend(def.name.clone()),
                    _ => {}
                }
                for name in names {
                    self.record_export(name.clone(), ExportSource::Binding(name));
                }
                Ok(flow)
            }
            Stmt::ExportNames(list) => {
                for (local, exported) in list {
                    self.record_export(exported.clone(), ExportSource::Binding(local.clone()));
                }
                Ok(Flow::Normal)
            }
        }
    }

    fn record_export(&mut self, name: Name, source: ExportSource) {
        if let Some(exports) = self.exports.as_mut() {
            exports.push((name, source));
        }
    }

    fn exec_catch(
        &mut self,
        param: Option<&Pattern>,
        handler: &Block,
        thrown: Value,
        scope: &Scope,
    ) -> JsResult<Flow> {
        let catch_scope = Scope::child(scope);
        if let Some(param) = param {
            self.bind_pattern(param, thrown, &catch_scope, BindMode::Declare { mutable: true })?;
        }
        self.exec_stmts(&handler.body, &catch_scope)
    }

    fn exec_declaration(&mut self, kind: DeclKind, decls: &[Declarator], scope: &Scope) -> JsResult<()> {
        let mode = match kind {
            DeclKind::Var => BindMode::Var,
            DeclKind::Let => BindMode::Declare { mutable: true },
            DeclKind::Const => BindMode::Declare { mutable: false },
        };
        for decl in decls {
            let value = match &decl.init {
                Some(init) => self.eval(init, scope)?,
                None if kind == DeclKind::Var => continue,
                None => Value::Undefined,
            };
            self.bind_pattern(&decl.target, value, scope, mode)?;
        }
        Ok(())
    }

    fn exec_for(
        &mut self,
        init: Option<&Stmt>,
        test: Option<&Expr>,
        update: Option<&Expr>,
        body: &Stmt,
        per_iteration: &[Name],
        scope: &Scope,
    ) -> JsResult<Flow> {
        let lexical = init.is_some_and(Stmt::is_lexical_declaration);
        let loop_scope = if lexical { Scope::child(scope) } else { scope.clone() };
        if let Some(init) = init {
            self.exec(init, &loop_scope)?;
        }

        let mut current = if per_iteration.is_empty() {
            loop_scope
        } else {
            copy_bindings(&loop_scope, per_iteration, scope)
        };

        loop {
            if let Some(test) = test {
                if !self.eval(test, &current)?.truthy() {
                    break;
                }
            }
            match self.exec(body, &current)? {
                Flow::Break => break,
                Flow::Return(value) => return Ok(Flow::Return(value)),
                Flow::Normal | Flow::Continue => {}
            }
            if !per_iteration.is_empty() {
                current = copy_bindings(&current, per_iteration, scope);
            }
            if let Some(update) = update {
                self.eval(update, &current)?;
            }
        }
        Ok(Flow::Normal)
    }

    fn bind_loop_value(&mut self, binding: &ForBinding, item: Value, iter_scope: &Scope, scope: &Scope) -> JsResult<()> {
        match binding {
            ForBinding::Decl(kind, pattern) => {
                let mode = match kind {
                    DeclKind::Var => BindMode::Var,
                    DeclKind::Let => BindMode::Declare { mutable: true },
                    DeclKind::Const => BindMode::Declare { mutable: false },
                };
                self.bind_pattern(pattern, item, iter_scope, mode)
            }
            ForBinding::Assign(pattern) => self.bind_pattern(pattern, item, scope, BindMode::Assign),
        }
    }

    fn exec_for_of(&mut self, binding: &ForBinding, iterable: &Expr, body: &Stmt, scope: &Scope) -> JsResult<Flow> {
        let source = self.eval(iterable, scope)?;
        // Arrays are walked live so pushes during the loop are visited.
        let snapshot = match &source {
            Value::Array(_) => None,
            other => Some(self.iterate(other)?),
        };

        let mut index = 0;
        loop {
            let item = match (&source, &snapshot) {
                (_, Some(items)) => items.get(index).cloned(),
                (Value::Array(items), None) => items.borrow().get(index).cloned(),
                _ => None,
            };
            let Some(item) = item else {
                break;
            };
            index += 1;

            let iter_scope = Scope::child(scope);
            self.bind_loop_value(binding, item, &iter_scope, scope)?;
            match self.exec(body, &iter_scope)? {
                Flow::Break => break,
                Flow::Return(value) => return Ok(Flow::Return(value)),
                Flow::Normal | Flow::Continue => {}
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_for_in(&mut self, binding: &ForBinding, object: &Expr, body: &Stmt, scope: &Scope) -> JsResult<Flow> {
        let source = self.eval(object, scope)?;
        let keys: Vec<Value> = match &source {
            Value::Object(object) => object.borrow().keys().into_iter().map(Value::Str).collect(),
            Value::Array(items) => (0..items.borrow().len())
                .map(|i| Value::from(i.to_string()))
                .collect(),
            Value::Str(s) => (0..s.chars().count()).map(|i| Value::from(i.to_string())).collect(),
            Value::Function(closure) => closure.props.borrow().keys().into_iter().map(Value::Str).collect(),
            _ => Vec::new(),
        };

        for key in keys {
            let iter_scope = Scope::child(scope);
            self.bind_loop_value(binding, key, &iter_scope, scope)?;
            match self.exec(body, &iter_scope)? {
                Flow::Break => break,
                Flow::Return(value) => return Ok(Flow::Return(value)),
                Flow::Normal | Flow::Continue => {}
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_switch(&mut self, discriminant: &Expr, cases: &[SwitchCase], scope: &Scope) -> JsResult<Flow> {
        let value = self.eval(discriminant, scope)?;
        let inner = Scope::child(scope);

        let mut start = None;
        for (i, case) in cases.iter().enumerate() {
            if let Some(test) = &case.test {
                let candidate = self.eval(test, &inner)?;
                if strict_equals(&value, &candidate) {
                    start = Some(i);
                    break;
                }
            }
        }
        let Some(start) = start.or_else(|| cases.iter().position(|case| case.test.is_none())) else {
            return Ok(Flow::Normal);
        };

        for case in &cases[start..] {
            match self.exec_stmts(&case.body, &inner)? {
                Flow::Normal => {}
                Flow::Break => return Ok(Flow::Normal),
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Normal)
    }

    // ---- bindings ----

    fn bind_pattern(&mut self, pattern: &Pattern, value: Value, scope: &Scope, mode: BindMode) -> JsResult<()> {
        match pattern {
            Pattern::Ident(name) => self.bind_name(name, value, scope, mode),
            Pattern::Expr(target) => {
                let reference = self.resolve_reference(target, scope)?;
                self.put_reference(&reference, value, scope)
            }
            Pattern::Array { elements, rest } => {
                let items = self.iterate(&value)?;
                for (i, elem) in elements.iter().enumerate() {
                    let Some(elem) = elem else {
                        continue;
                    };
                    let mut item = items.get(i).cloned().unwrap_or_default();
                    if matches!(item, Value::Undefined) {
                        if let Some(default) = &elem.default {
                            item = self.eval(default, scope)?;
                        }
                    }
                    self.bind_pattern(&elem.target, item, scope, mode)?;
                }
                if let Some(rest) = rest {
                    let remaining = items.get(elements.len()..).map(<[Value]>::to_vec).unwrap_or_default();
                    self.bind_pattern(rest, Value::array(remaining), scope, mode)?;
                }
                Ok(())
            }
            Pattern::Object { props, rest } => {
                if value.is_nullish() {
                    return Err(self.type_error(format!(
                        "Cannot destructure '{}' as it is {}.",
                        to_display_string(&value),
                        to_display_string(&value)
                    )));
                }
                let mut used = Vec::with_capacity(props.len());
                for (key, elem) in props {
                    let key = self.prop_name(key, scope)?;
                    let mut item = self.get_property(&value, &key)?;
                    if matches!(item, Value::Undefined) {
                        if let Some(default) = &elem.default {
                            item = self.eval(default, scope)?;
                        }
                    }
                    self.bind_pattern(&elem.target, item, scope, mode)?;
                    used.push(key);
                }
                if let Some(rest) = rest {
                    let mut remaining = Object::new();
                    if let Value::Object(object) = &value {
                        for (key, item) in object.borrow().iter() {
                            if !used.contains(key) {
                                remaining.set(key.clone(), item.clone());
                            }
                        }
                    }
                    self.bind_name(rest, Value::object(remaining), scope, mode)?;
                }
                Ok(())
            }
        }
    }

    fn bind_name(&mut self, name: &Name, value: Value, scope: &Scope, mode: BindMode) -> JsResult<()> {
        match mode {
            BindMode::Declare { mutable } => {
                scope.declare(name.clone(), value, mutable);
                Ok(())
            }
            BindMode::Var => match scope.assign(name, value.clone()) {
                Ok(()) => Ok(()),
                Err(ScopeError::NotDefined) => {
                    scope.declare(name.clone(), value, true);
                    Ok(())
                }
                Err(ScopeError::ConstAssignment) => {
                    Err(self.type_error("Assignment to constant variable."))
                }
            },
            BindMode::Assign => self.assign_name(name, value, scope),
        }
    }

    fn assign_name(&mut self, name: &Name, value: Value, scope: &Scope) -> JsResult<()> {
        match scope.assign(name, value.clone()) {
            Ok(()) => Ok(()),
            Err(ScopeError::ConstAssignment) => Err(self.type_error("Assignment to constant variable.")),
            Err(ScopeError::NotDefined) => {
                // Undeclared targets become properties of the global object.
                self.global_object.borrow_mut().set(name.clone(), value);
                Ok(())
            }
        }
    }

    fn lookup(&self, name: &str, scope: &Scope) -> JsResult<Value> {
        if let Some(value) = scope.lookup(name) {
            return Ok(value);
        }
        if let Some(value) = self.global_object.borrow().get_own(name) {
            return Ok(value.clone());
        }
        Err(self.reference_error(format!("{} is not defined", name)))
    }

    fn resolve_reference(&mut self, target: &Expr, scope: &Scope) -> JsResult<Reference> {
        match target {
            Expr::Ident(name) => Ok(Reference::Name(name.clone())),
            Expr::Member { object, property, .. } => {
                let object = self.eval(object, scope)?;
                Ok(Reference::Property(object, property.clone()))
            }
            Expr::Index { object, index, .. } => {
                let object = self.eval(object, scope)?;
                let key = self.eval(index, scope)?;
                if let (Value::Array(items), Value::Number(n)) = (&object, &key) {
                    if let Some(i) = number_index(*n) {
                        return Ok(Reference::Index(items.clone(), i));
                    }
                }
                Ok(Reference::Property(object, key.to_property_key()))
            }
            _ => Err(self.make_error("SyntaxError", "Invalid assignment target")),
        }
    }

    fn pattern_reference(&mut self, target: &Pattern, scope: &Scope) -> JsResult<Reference> {
        match target {
            Pattern::Ident(name) => Ok(Reference::Name(name.clone())),
            Pattern::Expr(expr) => self.resolve_reference(expr, scope),
            _ => Err(self.make_error("SyntaxError", "Invalid left-hand side in assignment")),
        }
    }

    fn get_reference(&mut self, reference: &Reference, scope: &Scope) -> JsResult<Value> {
        match reference {
            Reference::Name(name) => self.lookup(name, scope),
            Reference::Index(items, i) => Ok(items.borrow().get(*i).cloned().unwrap_or_default()),
            Reference::Property(object, key) => self.get_property(object, key),
        }
    }

    fn put_reference(&mut self, reference: &Reference, value: Value, scope: &Scope) -> JsResult<()> {
        match reference {
            Reference::Name(name) => self.assign_name(name, value, scope),
            Reference::Index(items, i) => self.set_index(items, *i, value),
            Reference::Property(object, key) => self.set_property(object, key, value),
        }
    }

    fn prop_name(&mut self, key: &PropName, scope: &Scope) -> JsResult<Name> {
        match key {
            PropName::Static(name) => Ok(name.clone()),
            PropName::Computed(expr) => Ok(self.eval(expr, scope)?.to_property_key()),
        }
    }

    // ---- expressions ----

    pub(crate) fn eval(&mut self, expr: &Expr, scope: &Scope) -> JsResult<Value> {
        match expr {
            Expr::Num(n) => Ok(Value::Number(*n)),
            Expr::Str(s) => Ok(Value::Str(s.clone())),
            Expr::Bool(b) => Ok(Value::Bool(*b)),
            Expr::Null => Ok(Value::Null),
            Expr::Template(chunks) => {
                let mut out = String::new();
                for chunk in chunks {
                    match chunk {
                        TemplateChunk::Text(text) => out.push_str(text),
                        TemplateChunk::Expr(expr) => {
                            let value = self.eval(expr, scope)?;
                            out.push_str(&value.to_js_string());
                        }
                    }
                }
                Ok(Value::from(out))
            }
            Expr::Ident(name) => self.lookup(name, scope),
            Expr::This => Ok(scope.lookup("this").unwrap_or_default()),
            Expr::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    match item {
                        None => out.push(Value::Undefined),
                        Some(ArgExpr::Plain(expr)) => out.push(self.eval(expr, scope)?),
                        Some(ArgExpr::Spread(expr)) => {
                            let value = self.eval(expr, scope)?;
                            out.extend(self.iterate(&value)?);
                        }
                    }
                }
                Ok(Value::array(out))
            }
            Expr::Object(props) => {
                let mut object = Object::new();
                for prop in props {
                    match prop {
                        PropDef::KeyValue(key, value) => {
                            let key = self.prop_name(key, scope)?;
                            let value = self.eval(value, scope)?;
                            object.set(key, value);
                        }
                        PropDef::Spread(expr) => {
                            let value = self.eval(expr, scope)?;
                            spread_into(&mut object, &value);
                        }
                    }
                }
                Ok(Value::object(object))
            }
            Expr::Function(def) => Ok(self.closure(def, scope)),
            Expr::Unary(op, operand) => self.eval_unary(*op, operand, scope),
            Expr::Update { op, prefix, target } => {
                let reference = self.resolve_reference(target, scope)?;
                let old = self.get_reference(&reference, scope)?.to_number();
                let new = match op {
                    UpdateOp::Inc => old + 1.0,
                    UpdateOp::Dec => old - 1.0,
                };
                self.put_reference(&reference, Value::Number(new), scope)?;
                Ok(Value::Number(if *prefix { new } else { old }))
            }
            Expr::Binary(op, left, right) => {
                let a = self.eval(left, scope)?;
                let b = self.eval(right, scope)?;
                self.binary(*op, &a, &b)
            }
            Expr::Logical(op, left, right) => {
                let a = self.eval(left, scope)?;
                if short_circuits(*op, &a) {
                    Ok(a)
                } else {
                    self.eval(right, scope)
                }
            }
            Expr::Assign { op, target, value } => self.eval_assign(*op, target, value, scope),
            Expr::Conditional(test, consequent, alternate) => {
                if self.eval(test, scope)?.truthy() {
                    self.eval(consequent, scope)
                } else {
                    self.eval(alternate, scope)
                }
            }
            Expr::Member {
                object,
                property,
                optional,
            } => {
                let object = self.eval(object, scope)?;
                if *optional && object.is_nullish() {
                    return Ok(Value::Undefined);
                }
                self.get_property(&object, property)
            }
            Expr::Index {
                object,
                index,
                optional,
            } => {
                let object = self.eval(object, scope)?;
                if *optional && object.is_nullish() {
                    return Ok(Value::Undefined);
                }
                let key = self.eval(index, scope)?;
                self.get_index(&object, &key)
            }
            Expr::Call {
                callee,
                args,
                optional,
            } => self.eval_call(callee, args, *optional, scope),
            Expr::New { callee, args } => {
                let constructor = self.eval(callee, scope)?;
                let args = self.eval_args(args, scope)?;
                self.construct(&constructor, &args, &describe(callee))
            }
            Expr::Await(operand) => {
                let value = self.eval(operand, scope)?;
                self.await_value(value)
            }
            Expr::Sequence(exprs) => {
                let mut last = Value::Undefined;
                for expr in exprs {
                    last = self.eval(expr, scope)?;
                }
                Ok(last)
            }
        }
    }

    fn eval_args(&mut self, args: &[ArgExpr], scope: &Scope) -> JsResult<Vec<Value>> {
        let mut out = Vec::with_capacity(args.len());
        for arg in args {
            match arg {
                ArgExpr::Plain(expr) => out.push(self.eval(expr, scope)?),
                ArgExpr::Spread(expr) => {
                    let value = self.eval(expr, scope)?;
                    out.extend(self.iterate(&value)?);
                }
            }
        }
        Ok(out)
    }

    fn eval_call(&mut self, callee: &Expr, args: &[ArgExpr], optional: bool, scope: &Scope) -> JsResult<Value> {
        let (this, function) = match callee {
            Expr::Member {
                object,
                property,
                optional: member_optional,
            } => {
                let target = self.eval(object, scope)?;
                if *member_optional && target.is_nullish() {
                    return Ok(Value::Undefined);
                }
                if builtins::has_intrinsic_methods(&target) {
                    let args = self.eval_args(args, scope)?;
                    return match builtins::call_method(self, &target, property, &args) {
                        Some(result) => result,
                        None if optional => Ok(Value::Undefined),
                        None => Err(self.type_error(format!(
                            "{}.{} is not a function",
                            describe(object),
                            property
                        ))),
                    };
                }
                let function = self.get_property(&target, property)?;
                (target, function)
            }
            Expr::Index {
                object,
                index,
                optional: member_optional,
            } => {
                let target = self.eval(object, scope)?;
                if *member_optional && target.is_nullish() {
                    return Ok(Value::Undefined);
                }
                let key = self.eval(index, scope)?;
                let function = self.get_index(&target, &key)?;
                (target, function)
            }
            other => (Value::Undefined, self.eval(other, scope)?),
        };

        if optional && function.is_nullish() {
            return Ok(Value::Undefined);
        }
        if !function.is_callable() {
            return Err(self.type_error(format!("{} is not a function", describe(callee))));
        }
        let args = self.eval_args(args, scope)?;
        self.call(&function, &this, &args)
    }

    fn call_closure(&mut self, closure: &Rc<Closure>, this: &Value, args: &[Value]) -> JsResult<Value> {
        if self.depth >= self.max_depth {
            return Err(self.range_error("Maximum call stack size exceeded"));
        }
        self.depth += 1;
        let outcome = self.invoke(closure, this, args);
        self.depth -= 1;

        if closure.def.is_async {
            let promise = PromiseCell::pending();
            match outcome {
                Ok(value) => self.resolve_promise(&promise, value),
                Err(reason) => self.reject_promise(&promise, reason),
            }
            Ok(Value::Promise(promise))
        } else {
            outcome
        }
    }

    fn invoke(&mut self, closure: &Rc<Closure>, this: &Value, args: &[Value]) -> JsResult<Value> {
        let def = &closure.def;
        let scope = Scope::child(&closure.env);
        if !def.is_arrow {
            scope.declare("this", this.clone(), false);
            if let Some(name) = &def.name {
                scope.declare(name.clone(), Value::Function(closure.clone()), true);
            }
        }

        for (i, param) in def.params.iter().enumerate() {
            let mut value = args.get(i).cloned().unwrap_or_default();
            if matches!(value, Value::Undefined) {
                if let Some(default) = &param.default {
                    value = self.eval(default, &scope)?;
                }
            }
            self.bind_pattern(&param.target, value, &scope, BindMode::Declare { mutable: true })?;
        }
        if let Some(rest) = &def.rest {
            let extra = args.get(def.params.len()..).map(<[Value]>::to_vec).unwrap_or_default();
            self.bind_pattern(rest, Value::array(extra), &scope, BindMode::Declare { mutable: true })?;
        }
        hoist_vars(&def.var_names, &scope);

        match &def.body {
            FunctionBody::Expr(expr) => self.eval(expr, &scope),
            FunctionBody::Block(stmts) => match self.exec_stmts(stmts, &scope)? {
                Flow::Return(value) => Ok(value),
                _ => Ok(Value::Undefined),
            },
        }
    }

    fn eval_unary(&mut self, op: UnaryOp, operand: &Expr, scope: &Scope) -> JsResult<Value> {
        match op {
            UnaryOp::Typeof => {
                if let Expr::Ident(name) = operand {
                    if scope.lookup(name).is_none() && !self.global_object.borrow().has_own(name) {
                        return Ok(Value::from("undefined"));
                    }
                }
                let value = self.eval(operand, scope)?;
                Ok(Value::from(value.type_of()))
            }
            UnaryOp::Delete => {
                match operand {
                    Expr::Member { object, property, .. } => {
                        let target = self.eval(object, scope)?;
                        delete_property(&target, property);
                    }
                    Expr::Index { object, index, .. } => {
                        let target = self.eval(object, scope)?;
                        let key = self.eval(index, scope)?.to_property_key();
                        delete_property(&target, &key);
                    }
                    _ => {}
                }
                Ok(Value::Bool(true))
            }
            UnaryOp::Void => {
                self.eval(operand, scope)?;
                Ok(Value::Undefined)
            }
            UnaryOp::Not => Ok(Value::Bool(!self.eval(operand, scope)?.truthy())),
            UnaryOp::Neg => Ok(Value::Number(-self.eval(operand, scope)?.to_number())),
            UnaryOp::Plus => Ok(Value::Number(self.eval(operand, scope)?.to_number())),
            UnaryOp::BitNot => Ok(Value::Number(f64::from(!to_int32(
                self.eval(operand, scope)?.to_number(),
            )))),
        }
    }

    fn eval_assign(&mut self, op: AssignOp, target: &Pattern, value: &Expr, scope: &Scope) -> JsResult<Value> {
        match op {
            AssignOp::Assign => match target {
                Pattern::Ident(name) => {
                    let value = self.eval(value, scope)?;
                    self.assign_name(name, value.clone(), scope)?;
                    Ok(value)
                }
                Pattern::Expr(expr) => {
                    let reference = self.resolve_reference(expr, scope)?;
                    let value = self.eval(value, scope)?;
                    self.put_reference(&reference, value.clone(), scope)?;
                    Ok(value)
                }
                pattern => {
                    let value = self.eval(value, scope)?;
                    self.bind_pattern(pattern, value.clone(), scope, BindMode::Assign)?;
                    Ok(value)
                }
            },
            AssignOp::Op(binary) => {
                let reference = self.pattern_reference(target, scope)?;
                let old = self.get_reference(&reference, scope)?;
                let rhs = self.eval(value, scope)?;
                let new = self.binary(binary, &old, &rhs)?;
                self.put_reference(&reference, new.clone(), scope)?;
                Ok(new)
            }
            AssignOp::Logical(logical) => {
                let reference = self.pattern_reference(target, scope)?;
                let old = self.get_reference(&reference, scope)?;
                if short_circuits(logical, &old) {
                    return Ok(old);
                }
                let new = self.eval(value, scope)?;
                self.put_reference(&reference, new.clone(), scope)?;
                Ok(new)
            }
        }
    }

    pub(crate) fn binary(&mut self, op: BinaryOp, a: &Value, b: &Value) -> JsResult<Value> {
        use BinaryOp::*;

        if let (Value::Number(x), Value::Number(y)) = (a, b) {
            let (x, y) = (*x, *y);
            match op {
                Add => return Ok(Value::Number(x + y)),
                Sub => return Ok(Value::Number(x - y)),
                Mul => return Ok(Value::Number(x * y)),
                Div => return Ok(Value::Number(x / y)),
                Lt => return Ok(Value::Bool(x < y)),
                Gt => return Ok(Value::Bool(x > y)),
                LtEq => return Ok(Value::Bool(x <= y)),
                GtEq => return Ok(Value::Bool(x >= y)),
                StrictEq | Eq => return Ok(Value::Bool(x == y)),
                StrictNotEq | NotEq => return Ok(Value::Bool(x != y)),
                _ => {}
            }
        }

        let result = match op {
            Add => {
                if concatenates(a) || concatenates(b) {
                    let mut out = a.to_js_string().to_string();
                    out.push_str(&b.to_js_string());
                    Value::from(out)
                } else {
                    Value::Number(a.to_number() + b.to_number())
                }
            }
            Sub => Value::Number(a.to_number() - b.to_number()),
            Mul => Value::Number(a.to_number() * b.to_number()),
            Div => Value::Number(a.to_number() / b.to_number()),
            Rem => Value::Number(a.to_number() % b.to_number()),
            Pow => Value::Number(js_pow(a.to_number(), b.to_number())),
            Eq => Value::Bool(loose_equals(a, b)),
            NotEq => Value::Bool(!loose_equals(a, b)),
            StrictEq => Value::Bool(strict_equals(a, b)),
            StrictNotEq => Value::Bool(!strict_equals(a, b)),
            Lt => Value::Bool(compare(a, b) == Some(Ordering::Less)),
            Gt => Value::Bool(compare(a, b) == Some(Ordering::Greater)),
            LtEq => Value::Bool(matches!(compare(a, b), Some(Ordering::Less | Ordering::Equal))),
            GtEq => Value::Bool(matches!(
                compare(a, b),
                Some(Ordering::Greater | Ordering::Equal)
            )),
            BitAnd => Value::Number(f64::from(to_int32(a.to_number()) & to_int32(b.to_number()))),
            BitOr => Value::Number(f64::from(to_int32(a.to_number()) | to_int32(b.to_number()))),
            BitXor => Value::Number(f64::from(to_int32(a.to_number()) ^ to_int32(b.to_number()))),
            Shl => Value::Number(f64::from(
                to_int32(a.to_number()).wrapping_shl(to_uint32(b.to_number()) & 31),
            )),
            Shr => Value::Number(f64::from(
                to_int32(a.to_number()).wrapping_shr(to_uint32(b.to_number()) & 31),
            )),
            UShr => Value::Number(f64::from(
                to_uint32(a.to_number()).wrapping_shr(to_uint32(b.to_number()) & 31),
            )),
            In => Value::Bool(self.has_property(b, a)?),
            InstanceOf => Value::Bool(self.instance_of(a, b)?),
        };
        Ok(result)
    }
}

/// Message of a thrown value, as `error.message` would read for errors.
pub fn thrown_message(value: &Value) -> String {
    if let Value::Object(object) = value {
        if let Some(message) = object.borrow().get("message") {
            return to_display_string(&message);
        }
    }
    to_display_string(value)
}

fn hoist_vars(names: &[Name], scope: &Scope) {
    for name in names {
        scope.declare_if_absent(name, Value::Undefined);
    }
}

fn copy_bindings(from: &Scope, names: &[Name], parent: &Scope) -> Scope {
    let next = Scope::child(parent);
    for name in names {
        next.declare(name.clone(), from.lookup(name).unwrap_or_default(), true);
    }
    next
}

fn short_circuits(op: LogicalOp, value: &Value) -> bool {
    match op {
        LogicalOp::And => !value.truthy(),
        LogicalOp::Or => value.truthy(),
        LogicalOp::Nullish => !value.is_nullish(),
    }
}

fn concatenates(value: &Value) -> bool {
    !matches!(
        value,
        Value::Undefined | Value::Null | Value::Bool(_) | Value::Number(_)
    )
}

fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Str(x), Value::Str(y)) => Some(x.cmp(y)),
        _ => a.to_number().partial_cmp(&b.to_number()),
    }
}

pub(crate) fn js_pow(base: f64, exponent: f64) -> f64 {
    if exponent.is_nan() || (base.abs() == 1.0 && exponent.is_infinite()) {
        return f64::NAN;
    }
    base.powf(exponent)
}

pub(crate) fn to_int32(n: f64) -> i32 {
    to_uint32(n) as i32
}

pub(crate) fn to_uint32(n: f64) -> u32 {
    if !n.is_finite() {
        return 0;
    }
    n.trunc().rem_euclid(4_294_967_296.0) as u32
}

/// Canonical array index encoded in a property key.
pub(crate) fn array_index(key: &str) -> Option<usize> {
    let bytes = key.as_bytes();
    if bytes.is_empty() || bytes.len() > 10 || (bytes.len() > 1 && bytes[0] == b'0') {
        return None;
    }
    if !bytes.iter().all(u8::is_ascii_digit) {
        return None;
    }
    key.parse().ok()
}

pub(crate) fn number_index(n: f64) -> Option<usize> {
    if n >= 0.0 && n.fract() == 0.0 && n < 4_294_967_295.0 {
        Some(n as usize)
    } else {
        None
    }
}

fn spread_into(object: &mut Object, value: &Value) {
    match value {
        Value::Object(source) => {
            for (key, item) in source.borrow().iter() {
                object.set(key.clone(), item.clone());
            }
        }
        Value::Array(items) => {
            for (i, item) in items.borrow().iter().enumerate() {
                object.set(i.to_string(), item.clone());
            }
        }
        Value::Str(s) => {
            for (i, c) in s.chars().enumerate() {
                object.set(i.to_string(), Value::from(c.to_string()));
            }
        }
        _ => {}
    }
}

fn delete_property(target: &Value, key: &str) {
    match target {
        Value::Object(object) => {
            object.borrow_mut().remove(key);
        }
        Value::Array(items) => {
            if let Some(index) = array_index(key) {
                if let Some(slot) = items.borrow_mut().get_mut(index) {
                    *slot = Value::Undefined;
                }
            }
        }
        Value::Function(closure) => {
            closure.props.borrow_mut().remove(key);
        }
        _ => {}
    }
}

/// Short source-like label for an expression, used in error messages.
fn describe(expr: &Expr) -> String {
    match expr {
        Expr::Ident(name) => name.to_string(),
        Expr::This => "this".into(),
        Expr::Member {
            object, property, ..
        } => format!("{}.{}", describe(object), property),
        Expr::Index { object, .. } => format!("{}[...]", describe(object)),
        Expr::Call { callee, .. } => format!("{}(...)", describe(callee)),
        _ => "expression".into(),
    }
}
