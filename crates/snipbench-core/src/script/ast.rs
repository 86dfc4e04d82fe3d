//! Syntax tree for the snippet language.

use std::rc::Rc;

pub type Name = Rc<str>;

/// What kind of source text is being parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Goal {
    /// Body of a function: `return` is allowed, `await` only when async.
    FunctionBody { is_async: bool },
    /// Classic script evaluated at global scope.
    Script,
    /// Module source: may `export`, top-level `await` is allowed.
    Module,
}

/// A parsed source unit.
#[derive(Debug)]
pub struct Program {
    pub body: Vec<Stmt>,
    /// `var` names hoisted to the unit scope.
    pub var_names: Vec<Name>,
    pub goal: Goal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeclKind {
    Var,
    Let,
    Const,
}

#[derive(Debug)]
pub enum Stmt {
    Expr(Expr),
    Decl(DeclKind, Vec<Declarator>),
    Function(Rc<FunctionDef>),
    Return(Option<Expr>),
    If(Expr, Box<Stmt>, Option<Box<Stmt>>),
    For {
        init: Option<Box<Stmt>>,
        test: Option<Expr>,
        update: Option<Expr>,
        body: Box<Stmt>,
        /// `let` bindings copied into a fresh scope on every iteration.
        per_iteration: Vec<Name>,
    },
    ForOf {
        binding: ForBinding,
        iterable: Expr,
        body: Box<Stmt>,
    },
    ForIn {
        binding: ForBinding,
        object: Expr,
        body: Box<Stmt>,
    },
    While(Expr, Box<Stmt>),
    DoWhile(Box<Stmt>, Expr),
    Block(Block),
    Switch {
        discriminant: Expr,
        cases: Vec<SwitchCase>,
    },
    Break,
    Continue,
    Throw(Expr),
    Try {
        block: Block,
        param: Option<Pattern>,
        handler: Option<Block>,
        finalizer: Option<Block>,
    },
    ExportDefault(Expr),
    /// `export const ...`, `export function ...`.
    Export(Box<Stmt>),
    /// `export { local as exported }`.
    ExportNames(Vec<(Name, Name)>),
    Empty,
}

#[derive(Debug)]
pub struct Block {
    pub body: Vec<Stmt>,
    /// The block declares lexical bindings and needs its own scope.
    pub scoped: bool,
}

#[derive(Debug)]
pub struct SwitchCase {
    /// `None` for `default:`.
    pub test: Option<Expr>,
    pub body: Vec<Stmt>,
}

#[derive(Debug)]
pub struct Declarator {
    pub target: Pattern,
    pub init: Option<Expr>,
}

#[derive(Debug)]
pub enum ForBinding {
    Decl(DeclKind, Pattern),
    Assign(Pattern),
}

/// Binding or assignment target.
#[derive(Debug)]
pub enum Pattern {
    Ident(Name),
    Array {
        elements: Vec<Option<PatternElem>>,
        rest: Option<Box<Pattern>>,
    },
    Object {
        props: Vec<(PropName, PatternElem)>,
        rest: Option<Name>,
    },
    /// Member or index expression; only in assignment position.
    Expr(Expr),
}

#[derive(Debug)]
pub struct PatternElem {
    pub target: Pattern,
    pub default: Option<Expr>,
}

#[derive(Debug)]
pub enum PropName {
    Static(Name),
    Computed(Expr),
}

#[derive(Debug)]
pub struct FunctionDef {
    pub name: Option<Name>,
    pub params: Vec<PatternElem>,
    pub rest: Option<Pattern>,
    pub body: FunctionBody,
    pub is_arrow: bool,
    pub is_async: bool,
    pub var_names: Vec<Name>,
}

#[derive(Debug)]
pub enum FunctionBody {
    Block(Vec<Stmt>),
    Expr(Box<Expr>),
}

#[derive(Debug)]
pub enum Expr {
    Num(f64),
    Str(Name),
    Template(Vec<TemplateChunk>),
    Bool(bool),
    Null,
    Ident(Name),
    This,
    /// `None` entries are holes.
    Array(Vec<Option<ArgExpr>>),
    Object(Vec<PropDef>),
    Function(Rc<FunctionDef>),
    Unary(UnaryOp, Box<Expr>),
    Update {
        op: UpdateOp,
        prefix: bool,
        target: Box<Expr>,
    },
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Logical(LogicalOp, Box<Expr>, Box<Expr>),
    Assign {
        op: AssignOp,
        target: Box<Pattern>,
        value: Box<Expr>,
    },
    Conditional(Box<Expr>, Box<Expr>, Box<Expr>),
    Member {
        object: Box<Expr>,
        property: Name,
        optional: bool,
    },
    Index {
        object: Box<Expr>,
        index: Box<Expr>,
        optional: bool,
    },
    Call {
        callee: Box<Expr>,
        args: Vec<ArgExpr>,
        optional: bool,
    },
    New {
        callee: Box<Expr>,
        args: Vec<ArgExpr>,
    },
    Await(Box<Expr>),
    Sequence(Vec<Expr>),
}

#[derive(Debug)]
pub enum TemplateChunk {
    Text(Name),
    Expr(Expr),
}

#[derive(Debug)]
pub enum ArgExpr {
    Plain(Expr),
    Spread(Expr),
}

#[derive(Debug)]
pub enum PropDef {
    KeyValue(PropName, Expr),
    Spread(Expr),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
    Plus,
    BitNot,
    Typeof,
    Void,
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOp {
    Inc,
    Dec,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Pow,
    Eq,
    NotEq,
    StrictEq,
    StrictNotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
    UShr,
    In,
    InstanceOf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
    Nullish,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOp {
    Assign,
    Op(BinaryOp),
    Logical(LogicalOp),
}

impl Pattern {
    /// Every identifier this pattern binds.
    pub fn bound_names(&self, out: &mut Vec<Name>) {
        match self {
            Pattern::Ident(name) => out.push(name.clone()),
            Pattern::Array { elements, rest } => {
                for elem in elements.iter().flatten() {
                    elem.target.bound_names(out);
                }
                if let Some(rest) = rest {
                    rest.bound_names(out);
                }
            }
            Pattern::Object { props, rest } => {
                for (_, elem) in props {
                    elem.target.bound_names(out);
                }
                if let Some(rest) = rest {
                    out.push(rest.clone());
                }
            }
            Pattern::Expr(_) => {}
        }
    }
}

impl Stmt {
    /// Whether this statement introduces a block-scoped binding.
    pub fn is_lexical_declaration(&self) -> bool {
        matches!(
            self,
            Stmt::Decl(DeclKind::Let | DeclKind::Const, _) | Stmt::Function(_)
        )
    }
}
