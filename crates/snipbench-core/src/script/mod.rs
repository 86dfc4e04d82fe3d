//! Embedded interpreter for benchmark snippets.
//!
//! Snippets, setup code and dependency resources are written in a
//! JavaScript subset. Source is tokenized, parsed into an [`ast`] and run by
//! a tree-walking [`Interpreter`] that owns its own global realm, job queue
//! and timers. Everything here is single-threaded (`Rc` based); the sandbox
//! confines a realm to the thread that created it.

pub mod ast;
mod builtins;
mod error;
mod interp;
mod lexer;
mod parser;
mod value;

pub use ast::{Goal, Program};
pub use error::ScriptError;
pub use interp::{DEFAULT_MAX_CALL_DEPTH, Interpreter, thrown_message};
pub use parser::parse;
pub use value::{
    JsResult, NativeFunction, Object, ObjectRef, PromiseState, Scope, Value, inspect,
    number_to_string, to_display_string,
};
