//! Snippet compilation and invocation.
//!
//! A [`Realm`] is one interpreter instance shared by the setup code, the
//! dependency bindings and every snippet of a run. Snippets are compiled
//! into [`Callable`]s whose scope is a child of the realm's global scope
//! holding exactly two extra bindings: `GLOBAL` and `do_not_optimize`.
//!
//! Realms are `!Send`; everything here stays on the thread that created it.
//! Use [`spawn_script_thread`] to get a thread whose stack can absorb deep
//! recursion in user code.

use std::cell::RefCell;
use std::rc::Rc;
use std::thread::JoinHandle;

use crate::error::{Error, Result};
use crate::script::{self, Goal, Interpreter, JsResult, NativeFunction, Program, Scope, Value, thrown_message};

/// Stack size for threads that evaluate scripts.
pub const SCRIPT_STACK_SIZE: usize = 64 * 1024 * 1024;

/// Spawn a named thread with [`SCRIPT_STACK_SIZE`] bytes of stack.
pub fn spawn_script_thread<F, T>(name: &str, f: F) -> std::io::Result<JoinHandle<T>>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    std::thread::Builder::new()
        .name(name.to_string())
        .stack_size(SCRIPT_STACK_SIZE)
        .spawn(f)
}

/// The default instrumentation hook: marks its argument as observed.
pub fn do_not_optimize() -> Value {
    NativeFunction::new("do_not_optimize", |_, _, args| {
        std::hint::black_box(args.first());
        Ok(Value::Undefined)
    })
    .into_value()
}

/// A shared global realm.
#[derive(Clone, Default)]
pub struct Realm {
    interp: Rc<RefCell<Interpreter>>,
}

impl Realm {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `value` under `name` in the global scope, replacing any previous binding.
    pub fn bind(&self, name: &str, value: Value) {
        let interp = self.interp.borrow();
        interp.global().declare(name, value.clone(), true);
        interp.global_object().borrow_mut().set(name, value);
    }

    /// Look a name up in the global scope, then on the global object.
    pub fn lookup(&self, name: &str) -> Option<Value> {
        let interp = self.interp.borrow();
        if let Some(value) = interp.global().lookup(name)
            && !matches!(value, Value::Undefined)
        {
            return Some(value);
        }
        interp
            .global_object()
            .borrow()
            .get(name)
            .filter(|value| !matches!(value, Value::Undefined))
    }

    pub(crate) fn with_interpreter<R>(&self, f: impl FnOnce(&mut Interpreter) -> R) -> R {
        f(&mut self.interp.borrow_mut())
    }

    /// Evaluate setup source and return the value it produces.
    ///
    /// The source is a function body; its `return` value becomes `GLOBAL`.
    /// In async mode the body may `await` and its promise is driven to
    /// completion. Blank setup yields `undefined`.
    pub fn evaluate_setup(&self, setup_code: &str, is_async: bool) -> Result<Value> {
        if setup_code.trim().is_empty() {
            return Ok(Value::Undefined);
        }
        let program = parse_body(setup_code, is_async)?;

        let mut interp = self.interp.borrow_mut();
        let scope = Scope::child(interp.global());
        let function = interp.make_function(program, is_async, &scope);
        let outcome = invoke(&mut interp, &function, is_async);
        interp.discard_timers();
        outcome.map_err(|thrown| Error::Execution(thrown_message(&thrown)))
    }

    /// Compile a snippet against this realm.
    ///
    /// `global` is exposed as `GLOBAL` and `hook` as `do_not_optimize`.
    pub fn compile(&self, code: &str, global: Value, is_async: bool, hook: Value) -> Result<Callable> {
        let program = parse_body(code, is_async)?;

        let interp = self.interp.borrow();
        let scope = Scope::child(interp.global());
        scope.declare("GLOBAL", global, true);
        scope.declare("do_not_optimize", hook, true);
        let function = interp.make_function(program, is_async, &scope);

        Ok(Callable {
            realm: self.clone(),
            function,
            is_async,
        })
    }
}

/// A compiled snippet, ready to be invoked repeatedly.
#[derive(Clone)]
pub struct Callable {
    realm: Realm,
    function: Value,
    is_async: bool,
}

impl Callable {
    pub fn is_async(&self) -> bool {
        self.is_async
    }

    /// Run the snippet once.
    ///
    /// Async snippets are driven until their promise settles. Pending
    /// microtasks are drained afterwards and timers nobody awaited are
    /// dropped, so one invocation never leaks work into the next.
    pub fn invoke(&self) -> Result<()> {
        let mut interp = self.realm.interp.borrow_mut();
        let outcome = invoke(&mut interp, &self.function, self.is_async)
            .and_then(|_| interp.run_microtasks());
        interp.discard_timers();
        outcome.map_err(|thrown| Error::Execution(thrown_message(&thrown)))
    }
}

fn parse_body(source: &str, is_async: bool) -> Result<Program> {
    script::parse(source, Goal::FunctionBody { is_async }).map_err(Error::from)
}

fn invoke(interp: &mut Interpreter, function: &Value, is_async: bool) -> JsResult<Value> {
    let value = interp.call(function, &Value::Undefined, &[])?;
    if is_async {
        interp.await_value(value)
    } else {
        Ok(value)
    }
}
