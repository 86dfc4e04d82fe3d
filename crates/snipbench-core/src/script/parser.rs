//! Recursive-descent parser producing [`Program`] trees.
//!
//! Expressions use precedence climbing. Arrow functions are recognised by
//! scanning ahead to the matching `)` and checking for `=>`.

use std::rc::Rc;

use super::ast::*;
use super::error::ScriptError;
use super::lexer::{TemplatePart, Tok, Token, tokenize, tokenize_at};
use super::value::number_to_string;

type PResult<T> = Result<T, ScriptError>;

const RESERVED: &[&str] = &[
    "break", "case", "catch", "class", "const", "continue", "debugger", "default", "delete", "do",
    "else", "export", "extends", "finally", "for", "function", "if", "import", "in", "instanceof",
    "new", "return", "super", "switch", "this", "throw", "try", "typeof", "var", "void", "while",
    "with", "yield", "let", "true", "false", "null",
];

/// Parse `source` as the given goal.
pub fn parse(source: &str, goal: Goal) -> PResult<Program> {
    let tokens = tokenize(source)?;
    let is_async = match goal {
        Goal::FunctionBody { is_async } => is_async,
        Goal::Module => true,
        Goal::Script => false,
    };
    let mut parser = Parser::new(
        tokens,
        goal,
        FnCtx::new(is_async, matches!(goal, Goal::FunctionBody { .. })),
    );

    let mut body = Vec::new();
    while !parser.at_eof() {
        body.push(parser.statement()?);
    }

    let ctx = parser.fn_ctx.pop().unwrap_or_else(|| FnCtx::new(false, false));
    Ok(Program {
        body,
        var_names: ctx.var_names,
        goal,
    })
}

struct FnCtx {
    is_async: bool,
    allow_return: bool,
    var_names: Vec<Name>,
    loop_depth: usize,
    switch_depth: usize,
}

impl FnCtx {
    fn new(is_async: bool, allow_return: bool) -> Self {
        Self {
            is_async,
            allow_return,
            var_names: Vec::new(),
            loop_depth: 0,
            switch_depth: 0,
        }
    }
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    goal: Goal,
    fn_ctx: Vec<FnCtx>,
    block_depth: usize,
    /// Inside a `for (...;` head, where `in` starts a for-in loop.
    no_in: bool,
}

impl Parser {
    fn new(tokens: Vec<Token>, goal: Goal, ctx: FnCtx) -> Self {
        Self {
            tokens,
            pos: 0,
            goal,
            fn_ctx: vec![ctx],
            block_depth: 0,
            no_in: false,
        }
    }

    // ---- token helpers ----

    fn token(&self) -> &Token {
        let last = self.tokens.len().saturating_sub(1);
        &self.tokens[self.pos.min(last)]
    }

    fn peek(&self) -> &Tok {
        &self.token().tok
    }

    fn peek_at(&self, offset: usize) -> &Tok {
        let last = self.tokens.len().saturating_sub(1);
        &self.tokens[(self.pos + offset).min(last)].tok
    }

    fn newline_before_at(&self, offset: usize) -> bool {
        let last = self.tokens.len().saturating_sub(1);
        self.tokens[(self.pos + offset).min(last)].newline_before
    }

    fn at_eof(&self) -> bool {
        matches!(self.peek(), Tok::Eof)
    }

    fn advance(&mut self) -> Token {
        let token = self.token().clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        token
    }

    fn is_punct(&self, p: &str) -> bool {
        matches!(self.peek(), Tok::Punct(q) if *q == p)
    }

    fn eat_punct(&mut self, p: &str) -> bool {
        if self.is_punct(p) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_punct(&mut self, p: &str) -> PResult<()> {
        if self.eat_punct(p) {
            Ok(())
        } else {
            Err(self.unexpected())
        }
    }

    fn is_keyword(&self, word: &str) -> bool {
        matches!(self.peek(), Tok::Ident(name) if &**name == word)
    }

    fn keyword_at(&self, offset: usize, word: &str) -> bool {
        matches!(self.peek_at(offset), Tok::Ident(name) if &**name == word)
    }

    fn eat_keyword(&mut self, word: &str) -> bool {
        if self.is_keyword(word) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn error(&self, message: impl Into<String>) -> ScriptError {
        let token = self.token();
        ScriptError::syntax(message, token.line, token.column)
    }

    fn unexpected(&self) -> ScriptError {
        match self.peek() {
            Tok::Eof => self.error("Unexpected end of input"),
            Tok::Num(n) => self.error(format!("Unexpected number '{}'", number_to_string(*n))),
            Tok::Str(_) => self.error("Unexpected string"),
            Tok::Template(_) => self.error("Unexpected template string"),
            Tok::Ident(name) if RESERVED.contains(&&**name) => {
                self.error(format!("Unexpected token '{}'", name))
            }
            Tok::Ident(name) => self.error(format!("Unexpected identifier '{}'", name)),
            Tok::Punct(p) => self.error(format!("Unexpected token '{}'", p)),
        }
    }

    fn consume_semicolon(&mut self) -> PResult<()> {
        if self.eat_punct(";") || self.is_punct("}") || self.at_eof() || self.token().newline_before {
            Ok(())
        } else {
            Err(self.unexpected())
        }
    }

    fn ctx(&mut self) -> &mut FnCtx {
        let last = self.fn_ctx.len() - 1;
        &mut self.fn_ctx[last]
    }

    fn in_async(&self) -> bool {
        self.fn_ctx.last().is_some_and(|ctx| ctx.is_async)
    }

    fn ident_name(&mut self) -> PResult<Name> {
        match self.peek().clone() {
            Tok::Ident(name) if !RESERVED.contains(&&*name) => {
                if &*name == "await" && self.in_async() {
                    return Err(self.unexpected());
                }
                self.advance();
                Ok(name)
            }
            _ => Err(self.unexpected()),
        }
    }

    /// Name after `.`, where keywords are allowed.
    fn property_ident(&mut self) -> PResult<Name> {
        match self.peek().clone() {
            Tok::Ident(name) => {
                self.advance();
                Ok(name)
            }
            _ => Err(self.unexpected()),
        }
    }

    fn allow_in<T>(&mut self, f: impl FnOnce(&mut Self) -> PResult<T>) -> PResult<T> {
        let saved = std::mem::replace(&mut self.no_in, false);
        let result = f(self);
        self.no_in = saved;
        result
    }

    // ---- statements ----

    fn statement(&mut self) -> PResult<Stmt> {
        let word = match self.peek().clone() {
            Tok::Punct("{") => return Ok(Stmt::Block(self.block()?)),
            Tok::Punct(";") => {
                self.advance();
                return Ok(Stmt::Empty);
            }
            Tok::Ident(word) => word,
            _ => return self.expression_statement(),
        };

        match &*word {
            "var" | "let" | "const" => {
                let decl = self.declaration()?;
                self.consume_semicolon()?;
                Ok(decl)
            }
            "function" => self.function_declaration(false),
            "async" if self.keyword_at(1, "function") && !self.newline_before_at(1) => {
                self.advance();
                self.function_declaration(true)
            }
            "if" => self.if_statement(),
            "for" => self.for_statement(),
            "while" => {
                self.advance();
                let test = self.paren_expression()?;
                let body = self.loop_body()?;
                Ok(Stmt::While(test, Box::new(body)))
            }
            "do" => {
                self.advance();
                let body = self.loop_body()?;
                if !self.eat_keyword("while") {
                    return Err(self.unexpected());
                }
                let test = self.paren_expression()?;
                self.eat_punct(";");
                Ok(Stmt::DoWhile(Box::new(body), test))
            }
            "return" => {
                if !self.fn_ctx.last().is_some_and(|ctx| ctx.allow_return) {
                    return Err(self.error("Illegal return statement"));
                }
                self.advance();
                let value = if self.is_punct(";")
                    || self.is_punct("}")
                    || self.at_eof()
                    || self.token().newline_before
                {
                    None
                } else {
                    Some(self.expression()?)
                };
                self.consume_semicolon()?;
                Ok(Stmt::Return(value))
            }
            "break" | "continue" => {
                let is_break = &*word == "break";
                self.advance();
                if matches!(self.peek(), Tok::Ident(_)) && !self.token().newline_before {
                    return Err(self.error("Labeled statements are not supported"));
                }
                let ctx = self.fn_ctx.last();
                let legal = ctx.is_some_and(|ctx| {
                    ctx.loop_depth > 0 || (is_break && ctx.switch_depth > 0)
                });
                if !legal {
                    return Err(self.error(format!("Illegal {} statement", word)));
                }
                self.consume_semicolon()?;
                Ok(if is_break { Stmt::Break } else { Stmt::Continue })
            }
            "throw" => {
                self.advance();
                if self.token().newline_before {
                    return Err(self.error("Illegal newline after throw"));
                }
                let value = self.expression()?;
                self.consume_semicolon()?;
                Ok(Stmt::Throw(value))
            }
            "try" => self.try_statement(),
            "switch" => self.switch_statement(),
            "export" => self.export_statement(),
            "import" if !matches!(self.peek_at(1), Tok::Punct("(" | ".")) => Err(self.error(
                "Cannot use import statement in a snippet; declare a dependency instead",
            )),
            "class" => Err(self.error("Class declarations are not supported")),
            _ => self.expression_statement(),
        }
    }

    fn expression_statement(&mut self) -> PResult<Stmt> {
        let expr = self.expression()?;
        self.consume_semicolon()?;
        Ok(Stmt::Expr(expr))
    }

    fn block(&mut self) -> PResult<Block> {
        self.expect_punct("{")?;
        self.block_depth += 1;
        let mut body = Vec::new();
        while !self.is_punct("}") {
            if self.at_eof() {
                self.block_depth -= 1;
                return Err(self.unexpected());
            }
            match self.statement() {
                Ok(stmt) => body.push(stmt),
                Err(e) => {
                    self.block_depth -= 1;
                    return Err(e);
                }
            }
        }
        self.advance();
        self.block_depth -= 1;
        let scoped = body.iter().any(Stmt::is_lexical_declaration);
        Ok(Block { body, scoped })
    }

    fn declaration(&mut self) -> PResult<Stmt> {
        let kind = match self.advance().tok {
            Tok::Ident(word) if &*word == "var" => DeclKind::Var,
            Tok::Ident(word) if &*word == "let" => DeclKind::Let,
            _ => DeclKind::Const,
        };

        let mut decls = Vec::new();
        loop {
            let target = self.binding_pattern()?;
            let init = if self.eat_punct("=") {
                Some(self.assignment()?)
            } else {
                None
            };
            if init.is_none() {
                if kind == DeclKind::Const {
                    return Err(self.error("Missing initializer in const declaration"));
                }
                if !matches!(target, Pattern::Ident(_)) {
                    return Err(self.error("Missing initializer in destructuring declaration"));
                }
            }
            if kind == DeclKind::Var {
                let mut names = Vec::new();
                target.bound_names(&mut names);
                self.ctx().var_names.extend(names);
            }
            decls.push(Declarator { target, init });
            if !self.eat_punct(",") {
                break;
            }
        }
        Ok(Stmt::Decl(kind, decls))
    }

    fn binding_pattern(&mut self) -> PResult<Pattern> {
        if self.eat_punct("[") {
            let mut elements = Vec::new();
            let mut rest = None;
            loop {
                if self.eat_punct("]") {
                    break;
                }
                if self.eat_punct(",") {
                    elements.push(None);
                    continue;
                }
                if self.eat_punct("...") {
                    rest = Some(Box::new(self.binding_pattern()?));
                    self.expect_punct("]")?;
                    break;
                }
                elements.push(Some(self.binding_element()?));
                if !self.eat_punct(",") {
                    self.expect_punct("]")?;
                    break;
                }
            }
            return Ok(Pattern::Array { elements, rest });
        }

        if self.eat_punct("{") {
            let mut props = Vec::new();
            let mut rest = None;
            loop {
                if self.eat_punct("}") {
                    break;
                }
                if self.eat_punct("...") {
                    rest = Some(self.ident_name()?);
                    self.expect_punct("}")?;
                    break;
                }
                let shorthand = matches!(self.peek(), Tok::Ident(_))
                    && !matches!(self.peek_at(1), Tok::Punct(":"));
                let elem = if shorthand {
                    let name = self.ident_name()?;
                    let default = if self.eat_punct("=") {
                        Some(self.assignment()?)
                    } else {
                        None
                    };
                    props.push((
                        PropName::Static(name.clone()),
                        PatternElem {
                            target: Pattern::Ident(name),
                            default,
                        },
                    ));
                    None
                } else {
                    let key = self.property_key()?;
                    self.expect_punct(":")?;
                    Some((key, self.binding_element()?))
                };
                if let Some(prop) = elem {
                    props.push(prop);
                }
                if !self.eat_punct(",") {
                    self.expect_punct("}")?;
                    break;
                }
            }
            return Ok(Pattern::Object { props, rest });
        }

        Ok(Pattern::Ident(self.ident_name()?))
    }

    fn binding_element(&mut self) -> PResult<PatternElem> {
        let target = self.binding_pattern()?;
        let default = if self.eat_punct("=") {
            Some(self.allow_in(|p| p.assignment())?)
        } else {
            None
        };
        Ok(PatternElem { target, default })
    }

    fn property_key(&mut self) -> PResult<PropName> {
        let key = match self.peek().clone() {
            Tok::Ident(name) | Tok::Str(name) => PropName::Static(name),
            Tok::Num(n) => PropName::Static(number_to_string(n).into()),
            Tok::Punct("[") => {
                self.advance();
                let expr = self.allow_in(|p| p.assignment())?;
                self.expect_punct("]")?;
                return Ok(PropName::Computed(expr));
            }
            _ => return Err(self.unexpected()),
        };
        self.advance();
        Ok(key)
    }

    fn function_declaration(&mut self, is_async: bool) -> PResult<Stmt> {
        self.advance();
        if self.is_punct("*") {
            return Err(self.error("Generator functions are not supported"));
        }
        let name = self.ident_name()?;
        let def = self.function_rest(Some(name), is_async)?;
        Ok(Stmt::Function(Rc::new(def)))
    }

    /// Parameters and body of a non-arrow function.
    fn function_rest(&mut self, name: Option<Name>, is_async: bool) -> PResult<FunctionDef> {
        self.expect_punct("(")?;
        let (params, rest) = self.allow_in(|p| p.parameter_list())?;
        let (body, var_names) = self.function_block(is_async)?;
        Ok(FunctionDef {
            name,
            params,
            rest,
            body: FunctionBody::Block(body),
            is_arrow: false,
            is_async,
            var_names,
        })
    }

    /// Parameter list after the opening `(`, consuming the closing `)`.
    fn parameter_list(&mut self) -> PResult<(Vec<PatternElem>, Option<Pattern>)> {
        let mut params = Vec::new();
        let mut rest = None;
        loop {
            if self.eat_punct(")") {
                break;
            }
            if self.eat_punct("...") {
                rest = Some(self.binding_pattern()?);
                self.expect_punct(")")?;
                break;
            }
            params.push(self.binding_element()?);
            if !self.eat_punct(",") {
                self.expect_punct(")")?;
                break;
            }
        }
        Ok((params, rest))
    }

    fn function_block(&mut self, is_async: bool) -> PResult<(Vec<Stmt>, Vec<Name>)> {
        self.expect_punct("{")?;
        self.fn_ctx.push(FnCtx::new(is_async, true));
        let saved_no_in = std::mem::replace(&mut self.no_in, false);
        let saved_depth = std::mem::replace(&mut self.block_depth, 1);

        let mut body = Vec::new();
        let result = loop {
            if self.eat_punct("}") {
                break Ok(());
            }
            if self.at_eof() {
                break Err(self.unexpected());
            }
            match self.statement() {
                Ok(stmt) => body.push(stmt),
                Err(e) => break Err(e),
            }
        };

        self.no_in = saved_no_in;
        self.block_depth = saved_depth;
        let ctx = self.fn_ctx.pop().unwrap_or_else(|| FnCtx::new(false, false));
        result?;
        Ok((body, ctx.var_names))
    }

    fn if_statement(&mut self) -> PResult<Stmt> {
        self.advance();
        let test = self.paren_expression()?;
        let consequent = self.statement()?;
        let alternate = if self.eat_keyword("else") {
            Some(Box::new(self.statement()?))
        } else {
            None
        };
        Ok(Stmt::If(test, Box::new(consequent), alternate))
    }

    fn paren_expression(&mut self) -> PResult<Expr> {
        self.expect_punct("(")?;
        let expr = self.allow_in(|p| p.expression())?;
        self.expect_punct(")")?;
        Ok(expr)
    }

    fn loop_body(&mut self) -> PResult<Stmt> {
        self.ctx().loop_depth += 1;
        let body = self.statement();
        self.ctx().loop_depth -= 1;
        body
    }

    fn for_statement(&mut self) -> PResult<Stmt> {
        self.advance();
        if self.is_keyword("await") {
            return Err(self.error("for await loops are not supported"));
        }
        self.expect_punct("(")?;

        let mut init = None;
        let is_decl = self.is_keyword("var")
            || self.is_keyword("const")
            || (self.is_keyword("let")
                && matches!(self.peek_at(1), Tok::Ident(_) | Tok::Punct("[" | "{")));

        if is_decl {
            let start = self.pos;
            let kind = match self.advance().tok {
                Tok::Ident(word) if &*word == "var" => DeclKind::Var,
                Tok::Ident(word) if &*word == "let" => DeclKind::Let,
                _ => DeclKind::Const,
            };
            let pattern = self.binding_pattern()?;
            if self.is_keyword("of") || self.is_keyword("in") {
                if kind == DeclKind::Var {
                    let mut names = Vec::new();
                    pattern.bound_names(&mut names);
                    self.ctx().var_names.extend(names);
                }
                return self.for_each_rest(ForBinding::Decl(kind, pattern));
            }
            self.pos = start;
            self.no_in = true;
            let decl = self.declaration();
            self.no_in = false;
            init = Some(Box::new(decl?));
        } else if !self.is_punct(";") {
            if matches!(self.peek(), Tok::Ident(_))
                && (self.keyword_at(1, "of") || self.keyword_at(1, "in"))
            {
                let target = Pattern::Ident(self.ident_name()?);
                return self.for_each_rest(ForBinding::Assign(target));
            }
            self.no_in = true;
            let expr = self.expression();
            self.no_in = false;
            init = Some(Box::new(Stmt::Expr(expr?)));
        }

        self.expect_punct(";")?;
        let test = if self.is_punct(";") {
            None
        } else {
            Some(self.allow_in(|p| p.expression())?)
        };
        self.expect_punct(";")?;
        let update = if self.is_punct(")") {
            None
        } else {
            Some(self.allow_in(|p| p.expression())?)
        };
        self.expect_punct(")")?;
        let body = self.loop_body()?;

        let mut per_iteration = Vec::new();
        if let Some(Stmt::Decl(DeclKind::Let, decls)) = init.as_deref() {
            for decl in decls {
                decl.target.bound_names(&mut per_iteration);
            }
        }

        Ok(Stmt::For {
            init,
            test,
            update,
            body: Box::new(body),
            per_iteration,
        })
    }

    fn for_each_rest(&mut self, binding: ForBinding) -> PResult<Stmt> {
        let is_of = self.is_keyword("of");
        self.advance();
        let source = if is_of {
            self.allow_in(|p| p.assignment())?
        } else {
            self.allow_in(|p| p.expression())?
        };
        self.expect_punct(")")?;
        let body = Box::new(self.loop_body()?);
        Ok(if is_of {
            Stmt::ForOf {
                binding,
                iterable: source,
                body,
            }
        } else {
            Stmt::ForIn {
                binding,
                object: source,
                body,
            }
        })
    }

    fn try_statement(&mut self) -> PResult<Stmt> {
        self.advance();
        let block = self.block()?;
        let mut param = None;
        let mut handler = None;
        if self.eat_keyword("catch") {
            if self.eat_punct("(") {
                param = Some(self.binding_pattern()?);
                self.expect_punct(")")?;
            }
            handler = Some(self.block()?);
        }
        let finalizer = if self.eat_keyword("finally") {
            Some(self.block()?)
        } else {
            None
        };
        if handler.is_none() && finalizer.is_none() {
            return Err(self.error("Missing catch or finally after try"));
        }
        Ok(Stmt::Try {
            block,
            param,
            handler,
            finalizer,
        })
    }

    fn switch_statement(&mut self) -> PResult<Stmt> {
        self.advance();
        let discriminant = self.paren_expression()?;
        self.expect_punct("{")?;
        self.ctx().switch_depth += 1;
        let cases = self.switch_cases();
        self.ctx().switch_depth -= 1;
        Ok(Stmt::Switch {
            discriminant,
            cases: cases?,
        })
    }

    fn switch_cases(&mut self) -> PResult<Vec<SwitchCase>> {
        let mut cases: Vec<SwitchCase> = Vec::new();
        let mut seen_default = false;
        loop {
            if self.eat_punct("}") {
                return Ok(cases);
            }
            let test = if self.eat_keyword("case") {
                Some(self.allow_in(|p| p.expression())?)
            } else if self.eat_keyword("default") {
                if seen_default {
                    return Err(self.error("More than one default clause in switch statement"));
                }
                seen_default = true;
                None
            } else {
                return Err(self.unexpected());
            };
            self.expect_punct(":")?;
            let mut body = Vec::new();
            while !self.is_keyword("case") && !self.is_keyword("default") && !self.is_punct("}") {
                if self.at_eof() {
                    return Err(self.unexpected());
                }
                body.push(self.statement()?);
            }
            cases.push(SwitchCase { test, body });
        }
    }

    fn export_statement(&mut self) -> PResult<Stmt> {
        if self.goal != Goal::Module || self.fn_ctx.len() != 1 || self.block_depth != 0 {
            return Err(self.error("Unexpected token 'export'"));
        }
        self.advance();

        if self.eat_keyword("default") {
            let expr = self.assignment()?;
            self.consume_semicolon()?;
            return Ok(Stmt::ExportDefault(expr));
        }

        if self.eat_punct("{") {
            let mut names = Vec::new();
            loop {
                if self.eat_punct("}") {
                    break;
                }
                let local = self.ident_name()?;
                let exported = if self.eat_keyword("as") {
                    self.property_ident()?
                } else {
                    local.clone()
                };
                names.push((local, exported));
                if !self.eat_punct(",") {
                    self.expect_punct("}")?;
                    break;
                }
            }
            self.consume_semicolon()?;
            return Ok(Stmt::ExportNames(names));
        }

        let inner = match self.peek().clone() {
            Tok::Ident(word) if matches!(&*word, "var" | "let" | "const") => {
                let decl = self.declaration()?;
                self.consume_semicolon()?;
                decl
            }
            Tok::Ident(word) if &*word == "function" => self.function_declaration(false)?,
            Tok::Ident(word) if &*word == "async" && self.keyword_at(1, "function") => {
                self.advance();
                self.function_declaration(true)?
            }
            _ => return Err(self.unexpected()),
        };
        Ok(Stmt::Export(Box::new(inner)))
    }

    // ---- expressions ----

    fn expression(&mut self) -> PResult<Expr> {
        let first = self.assignment()?;
        if !self.is_punct(",") {
            return Ok(first);
        }
        let mut exprs = vec![first];
        while self.eat_punct(",") {
            exprs.push(self.assignment()?);
        }
        Ok(Expr::Sequence(exprs))
    }

    fn assignment(&mut self) -> PResult<Expr> {
        if let Some(arrow) = self.try_arrow()? {
            return Ok(arrow);
        }

        let lhs = self.conditional()?;
        let op = match self.peek() {
            Tok::Punct(p) => assign_op(p),
            _ => None,
        };
        let Some(op) = op else {
            return Ok(lhs);
        };
        self.advance();
        let target = self.assign_target(lhs, op)?;
        let value = self.assignment()?;
        Ok(Expr::Assign {
            op,
            target: Box::new(target),
            value: Box::new(value),
        })
    }

    fn assign_target(&self, expr: Expr, op: AssignOp) -> PResult<Pattern> {
        match expr {
            Expr::Ident(name) => Ok(Pattern::Ident(name)),
            Expr::Member { optional: false, .. } | Expr::Index { optional: false, .. } => {
                Ok(Pattern::Expr(expr))
            }
            Expr::Array(_) | Expr::Object(_) if op == AssignOp::Assign => self.expr_to_pattern(expr),
            _ => Err(self.error("Invalid left-hand side in assignment")),
        }
    }

    /// Reinterpret an array or object literal as a destructuring target.
    fn expr_to_pattern(&self, expr: Expr) -> PResult<Pattern> {
        match expr {
            Expr::Ident(name) => Ok(Pattern::Ident(name)),
            Expr::Member { optional: false, .. } | Expr::Index { optional: false, .. } => {
                Ok(Pattern::Expr(expr))
            }
            Expr::Array(items) => {
                let mut elements = Vec::new();
                let mut rest = None;
                let count = items.len();
                for (i, item) in items.into_iter().enumerate() {
                    match item {
                        None => elements.push(None),
                        Some(ArgExpr::Spread(inner)) if i + 1 == count => {
                            rest = Some(Box::new(self.expr_to_pattern(inner)?));
                        }
                        Some(ArgExpr::Spread(_)) => {
                            return Err(self.error("Rest element must be last element"));
                        }
                        Some(ArgExpr::Plain(inner)) => {
                            elements.push(Some(self.expr_to_element(inner)?));
                        }
                    }
                }
                Ok(Pattern::Array { elements, rest })
            }
            Expr::Object(defs) => {
                let mut props = Vec::new();
                let mut rest = None;
                for def in defs {
                    match def {
                        PropDef::KeyValue(key, value) => {
                            props.push((key, self.expr_to_element(value)?));
                        }
                        PropDef::Spread(Expr::Ident(name)) => rest = Some(name),
                        PropDef::Spread(_) => {
                            return Err(self.error("Invalid destructuring assignment target"));
                        }
                    }
                }
                Ok(Pattern::Object { props, rest })
            }
            _ => Err(self.error("Invalid destructuring assignment target")),
        }
    }

    fn expr_to_element(&self, expr: Expr) -> PResult<PatternElem> {
        match expr {
            Expr::Assign {
                op: AssignOp::Assign,
                target,
                value,
            } => Ok(PatternElem {
                target: *target,
                default: Some(*value),
            }),
            other => Ok(PatternElem {
                target: self.expr_to_pattern(other)?,
                default: None,
            }),
        }
    }

    fn try_arrow(&mut self) -> PResult<Option<Expr>> {
        let mut offset = 0;
        let mut is_async = false;
        if self.is_keyword("async") && !self.newline_before_at(1) {
            let single = matches!(self.peek_at(1), Tok::Ident(_))
                && matches!(self.peek_at(2), Tok::Punct("=>"));
            let parens = matches!(self.peek_at(1), Tok::Punct("("))
                && self.arrow_follows_parens(self.pos + 1);
            if single || parens {
                offset = 1;
                is_async = true;
            }
        }

        let single_param = matches!(self.peek_at(offset), Tok::Ident(name) if !RESERVED.contains(&&**name))
            && matches!(self.peek_at(offset + 1), Tok::Punct("=>"));
        let paren_params = matches!(self.peek_at(offset), Tok::Punct("("))
            && self.arrow_follows_parens(self.pos + offset);
        if !single_param && !paren_params {
            return Ok(None);
        }

        if is_async {
            self.advance();
        }
        let (params, rest) = if single_param {
            let name = self.ident_name()?;
            (
                vec![PatternElem {
                    target: Pattern::Ident(name),
                    default: None,
                }],
                None,
            )
        } else {
            self.advance();
            self.allow_in(|p| p.parameter_list())?
        };
        self.expect_punct("=>")?;

        let (body, var_names) = if self.is_punct("{") {
            let (body, var_names) = self.function_block(is_async)?;
            (FunctionBody::Block(body), var_names)
        } else {
            self.fn_ctx.push(FnCtx::new(is_async, false));
            let expr = self.assignment();
            let ctx = self.fn_ctx.pop().unwrap_or_else(|| FnCtx::new(false, false));
            (FunctionBody::Expr(Box::new(expr?)), ctx.var_names)
        };

        Ok(Some(Expr::Function(Rc::new(FunctionDef {
            name: None,
            params,
            rest,
            body,
            is_arrow: true,
            is_async,
            var_names,
        }))))
    }

    fn arrow_follows_parens(&self, open: usize) -> bool {
        let mut depth = 0i32;
        for i in open..self.tokens.len() {
            match &self.tokens[i].tok {
                Tok::Punct("(" | "[" | "{") => depth += 1,
                Tok::Punct(")" | "]" | "}") => {
                    depth -= 1;
                    if depth == 0 {
                        return matches!(
                            self.tokens.get(i + 1).map(|t| &t.tok),
                            Some(Tok::Punct("=>"))
                        );
                    }
                    if depth < 0 {
                        return false;
                    }
                }
                Tok::Eof => return false,
                _ => {}
            }
        }
        false
    }

    fn conditional(&mut self) -> PResult<Expr> {
        let test = self.binary(0)?;
        if !self.eat_punct("?") {
            return Ok(test);
        }
        let consequent = self.allow_in(|p| p.assignment())?;
        self.expect_punct(":")?;
        let alternate = self.assignment()?;
        Ok(Expr::Conditional(
            Box::new(test),
            Box::new(consequent),
            Box::new(alternate),
        ))
    }

    fn binary_op(&self) -> Option<(u8, BinOrLogical)> {
        use BinOrLogical::{Bin, Logic};
        let op = match self.peek() {
            Tok::Punct(p) => match *p {
                "??" => (1, Logic(LogicalOp::Nullish)),
                "||" => (2, Logic(LogicalOp::Or)),
                "&&" => (3, Logic(LogicalOp::And)),
                "|" => (4, Bin(BinaryOp::BitOr)),
                "^" => (5, Bin(BinaryOp::BitXor)),
                "&" => (6, Bin(BinaryOp::BitAnd)),
                "==" => (7, Bin(BinaryOp::Eq)),
                "!=" => (7, Bin(BinaryOp::NotEq)),
                "===" => (7, Bin(BinaryOp::StrictEq)),
                "!==" => (7, Bin(BinaryOp::StrictNotEq)),
                "<" => (8, Bin(BinaryOp::Lt)),
                "<=" => (8, Bin(BinaryOp::LtEq)),
                ">" => (8, Bin(BinaryOp::Gt)),
                ">=" => (8, Bin(BinaryOp::GtEq)),
                "<<" => (9, Bin(BinaryOp::Shl)),
                ">>" => (9, Bin(BinaryOp::Shr)),
                ">>>" => (9, Bin(BinaryOp::UShr)),
                "+" => (10, Bin(BinaryOp::Add)),
                "-" => (10, Bin(BinaryOp::Sub)),
                "*" => (11, Bin(BinaryOp::Mul)),
                "/" => (11, Bin(BinaryOp::Div)),
                "%" => (11, Bin(BinaryOp::Rem)),
                "**" => (12, Bin(BinaryOp::Pow)),
                _ => return None,
            },
            Tok::Ident(word) if &**word == "instanceof" => (8, Bin(BinaryOp::InstanceOf)),
            Tok::Ident(word) if &**word == "in" && !self.no_in => (8, Bin(BinaryOp::In)),
            _ => return None,
        };
        Some(op)
    }

    fn binary(&mut self, min_prec: u8) -> PResult<Expr> {
        let mut left = self.unary()?;
        while let Some((prec, op)) = self.binary_op() {
            if prec < min_prec {
                break;
            }
            self.advance();
            let right_assoc = matches!(op, BinOrLogical::Bin(BinaryOp::Pow));
            let right = self.binary(if right_assoc { prec } else { prec + 1 })?;
            left = match op {
                BinOrLogical::Bin(op) => Expr::Binary(op, Box::new(left), Box::new(right)),
                BinOrLogical::Logic(op) => Expr::Logical(op, Box::new(left), Box::new(right)),
            };
        }
        Ok(left)
    }

    fn unary(&mut self) -> PResult<Expr> {
        let op = match self.peek() {
            Tok::Punct("!") => Some(UnaryOp::Not),
            Tok::Punct("-") => Some(UnaryOp::Neg),
            Tok::Punct("+") => Some(UnaryOp::Plus),
            Tok::Punct("~") => Some(UnaryOp::BitNot),
            Tok::Ident(word) if &**word == "typeof" => Some(UnaryOp::Typeof),
            Tok::Ident(word) if &**word == "void" => Some(UnaryOp::Void),
            Tok::Ident(word) if &**word == "delete" => Some(UnaryOp::Delete),
            _ => None,
        };
        if let Some(op) = op {
            self.advance();
            let operand = self.unary()?;
            return Ok(Expr::Unary(op, Box::new(operand)));
        }

        if self.is_punct("++") || self.is_punct("--") {
            let op = if self.is_punct("++") { UpdateOp::Inc } else { UpdateOp::Dec };
            self.advance();
            let target = self.unary()?;
            self.check_update_target(&target)?;
            return Ok(Expr::Update {
                op,
                prefix: true,
                target: Box::new(target),
            });
        }

        if self.is_keyword("await") && self.in_async() {
            self.advance();
            let operand = self.unary()?;
            return Ok(Expr::Await(Box::new(operand)));
        }
        if self.is_keyword("await")
            && !matches!(self.peek_at(1), Tok::Punct(_) | Tok::Eof)
            && !self.newline_before_at(1)
        {
            return Err(self.error(
                "await is only valid in async functions and the top level bodies of modules",
            ));
        }

        self.postfix()
    }

    fn check_update_target(&self, target: &Expr) -> PResult<()> {
        match target {
            Expr::Ident(_)
            | Expr::Member { optional: false, .. }
            | Expr::Index { optional: false, .. } => Ok(()),
            _ => Err(self.error("Invalid left-hand side expression in prefix operation")),
        }
    }

    fn postfix(&mut self) -> PResult<Expr> {
        let expr = self.call_member()?;
        if (self.is_punct("++") || self.is_punct("--")) && !self.token().newline_before {
            let op = if self.is_punct("++") { UpdateOp::Inc } else { UpdateOp::Dec };
            if self.check_update_target(&expr).is_err() {
                return Err(self.error("Invalid left-hand side expression in postfix operation"));
            }
            self.advance();
            return Ok(Expr::Update {
                op,
                prefix: false,
                target: Box::new(expr),
            });
        }
        Ok(expr)
    }

    fn call_member(&mut self) -> PResult<Expr> {
        let mut expr = if self.is_keyword("new") {
            self.new_expression()?
        } else {
            self.primary()?
        };

        loop {
            if self.eat_punct(".") {
                let property = self.property_ident()?;
                expr = Expr::Member {
                    object: Box::new(expr),
                    property,
                    optional: false,
                };
            } else if self.eat_punct("?.") {
                if self.is_punct("(") {
                    let args = self.arguments()?;
                    expr = Expr::Call {
                        callee: Box::new(expr),
                        args,
                        optional: true,
                    };
                } else if self.eat_punct("[") {
                    let index = self.allow_in(|p| p.expression())?;
                    self.expect_punct("]")?;
                    expr = Expr::Index {
                        object: Box::new(expr),
                        index: Box::new(index),
                        optional: true,
                    };
                } else {
                    let property = self.property_ident()?;
                    expr = Expr::Member {
                        object: Box::new(expr),
                        property,
                        optional: true,
                    };
                }
            } else if self.eat_punct("[") {
                let index = self.allow_in(|p| p.expression())?;
                self.expect_punct("]")?;
                expr = Expr::Index {
                    object: Box::new(expr),
                    index: Box::new(index),
                    optional: false,
                };
            } else if self.is_punct("(") {
                let args = self.arguments()?;
                expr = Expr::Call {
                    callee: Box::new(expr),
                    args,
                    optional: false,
                };
            } else if matches!(self.peek(), Tok::Template(_)) && !self.token().newline_before {
                return Err(self.error("Tagged templates are not supported"));
            } else {
                return Ok(expr);
            }
        }
    }

    fn new_expression(&mut self) -> PResult<Expr> {
        self.advance();
        let mut callee = if self.is_keyword("new") {
            self.new_expression()?
        } else {
            self.primary()?
        };
        loop {
            if self.eat_punct(".") {
                let property = self.property_ident()?;
                callee = Expr::Member {
                    object: Box::new(callee),
                    property,
                    optional: false,
                };
            } else if self.eat_punct("[") {
                let index = self.allow_in(|p| p.expression())?;
                self.expect_punct("]")?;
                callee = Expr::Index {
                    object: Box::new(callee),
                    index: Box::new(index),
                    optional: false,
                };
            } else {
                break;
            }
        }
        let args = if self.is_punct("(") {
            self.arguments()?
        } else {
            Vec::new()
        };
        Ok(Expr::New {
            callee: Box::new(callee),
            args,
        })
    }

    fn arguments(&mut self) -> PResult<Vec<ArgExpr>> {
        self.expect_punct("(")?;
        self.allow_in(|p| {
            let mut args = Vec::new();
            loop {
                if p.eat_punct(")") {
                    return Ok(args);
                }
                if p.eat_punct("...") {
                    args.push(ArgExpr::Spread(p.assignment()?));
                } else {
                    args.push(ArgExpr::Plain(p.assignment()?));
                }
                if !p.eat_punct(",") {
                    p.expect_punct(")")?;
                    return Ok(args);
                }
            }
        })
    }

    fn primary(&mut self) -> PResult<Expr> {
        let token = self.advance();
        match token.tok {
            Tok::Num(n) => Ok(Expr::Num(n)),
            Tok::Str(s) => Ok(Expr::Str(s)),
            Tok::Template(parts) => self.template(parts),
            Tok::Punct("(") => {
                let expr = self.allow_in(|p| p.expression())?;
                self.expect_punct(")")?;
                Ok(expr)
            }
            Tok::Punct("[") => self.allow_in(|p| p.array_literal()),
            Tok::Punct("{") => self.allow_in(|p| p.object_literal()),
            Tok::Ident(word) => match &*word {
                "true" => Ok(Expr::Bool(true)),
                "false" => Ok(Expr::Bool(false)),
                "null" => Ok(Expr::Null),
                "this" => Ok(Expr::This),
                "function" => self.function_expression(false),
                "async" if self.is_keyword("function") && !self.token().newline_before => {
                    self.advance();
                    self.function_expression(true)
                }
                "class" => Err(ScriptError::syntax(
                    "Class expressions are not supported",
                    token.line,
                    token.column,
                )),
                "import" => Err(ScriptError::syntax(
                    "Dynamic import is not supported; declare a dependency instead",
                    token.line,
                    token.column,
                )),
                _ if RESERVED.contains(&&*word) => {
                    self.pos -= 1;
                    Err(self.unexpected())
                }
                _ => Ok(Expr::Ident(word)),
            },
            Tok::Eof => Err(self.unexpected()),
            _ => {
                self.pos -= 1;
                Err(self.unexpected())
            }
        }
    }

    fn function_expression(&mut self, is_async: bool) -> PResult<Expr> {
        if self.is_punct("*") {
            return Err(self.error("Generator functions are not supported"));
        }
        let name = if matches!(self.peek(), Tok::Ident(_)) {
            Some(self.ident_name()?)
        } else {
            None
        };
        let def = self.function_rest(name, is_async)?;
        Ok(Expr::Function(Rc::new(def)))
    }

    fn template(&mut self, parts: Vec<TemplatePart>) -> PResult<Expr> {
        let mut chunks = Vec::with_capacity(parts.len());
        for part in parts {
            match part {
                TemplatePart::Text(text) => chunks.push(TemplateChunk::Text(text)),
                TemplatePart::Expr {
                    source,
                    line,
                    column,
                } => {
                    let tokens = tokenize_at(&source, line, column)?;
                    let mut sub = Parser::new(
                        tokens,
                        self.goal,
                        FnCtx::new(self.in_async(), false),
                    );
                    let expr = sub.expression()?;
                    if !sub.at_eof() {
                        return Err(sub.unexpected());
                    }
                    chunks.push(TemplateChunk::Expr(expr));
                }
            }
        }
        Ok(Expr::Template(chunks))
    }

    fn array_literal(&mut self) -> PResult<Expr> {
        let mut items = Vec::new();
        loop {
            if self.eat_punct("]") {
                return Ok(Expr::Array(items));
            }
            if self.eat_punct(",") {
                items.push(None);
                continue;
            }
            let item = if self.eat_punct("...") {
                ArgExpr::Spread(self.assignment()?)
            } else {
                ArgExpr::Plain(self.assignment()?)
            };
            items.push(Some(item));
            if !self.eat_punct(",") {
                self.expect_punct("]")?;
                return Ok(Expr::Array(items));
            }
        }
    }

    fn object_literal(&mut self) -> PResult<Expr> {
        let mut props = Vec::new();
        loop {
            if self.eat_punct("}") {
                return Ok(Expr::Object(props));
            }
            if self.eat_punct("...") {
                props.push(PropDef::Spread(self.assignment()?));
            } else {
                let leading_word = match self.peek() {
                    Tok::Ident(word) => Some(word.clone()),
                    _ => None,
                };
                let followed_by_key = !matches!(
                    self.peek_at(1),
                    Tok::Punct(":" | "," | "(" | "}" | "=")
                );
                match leading_word.as_deref() {
                    Some("get" | "set") if followed_by_key => {
                        return Err(self.error("Accessor properties are not supported"));
                    }
                    Some("async") if followed_by_key => {
                        self.advance();
                        let key = self.property_key()?;
                        let name = static_name(&key);
                        let def = self.function_rest(name, true)?;
                        props.push(PropDef::KeyValue(key, Expr::Function(Rc::new(def))));
                    }
                    _ => {
                        let shorthand = leading_word.is_some()
                            && matches!(self.peek_at(1), Tok::Punct("," | "}"));
                        let key = self.property_key()?;
                        if shorthand {
                            let name = match &key {
                                PropName::Static(name) if !RESERVED.contains(&&**name) => {
                                    name.clone()
                                }
                                _ => return Err(self.unexpected()),
                            };
                            props.push(PropDef::KeyValue(key, Expr::Ident(name)));
                        } else if self.is_punct("(") {
                            let name = static_name(&key);
                            let def = self.function_rest(name, false)?;
                            props.push(PropDef::KeyValue(key, Expr::Function(Rc::new(def))));
                        } else {
                            self.expect_punct(":")?;
                            let value = self.assignment()?;
                            props.push(PropDef::KeyValue(key, value));
                        }
                    }
                }
            }
            if !self.eat_punct(",") {
                self.expect_punct("}")?;
                return Ok(Expr::Object(props));
            }
        }
    }
}

enum BinOrLogical {
    Bin(BinaryOp),
    Logic(LogicalOp),
}

fn static_name(key: &PropName) -> Option<Name> {
    match key {
        PropName::Static(name) => Some(name.clone()),
        PropName::Computed(_) => None,
    }
}

fn assign_op(p: &str) -> Option<AssignOp> {
    let op = match p {
        "=" => AssignOp::Assign,
        "+=" => AssignOp::Op(BinaryOp::Add),
        "-=" => AssignOp::Op(BinaryOp::Sub),
        "*=" => AssignOp::Op(BinaryOp::Mul),
        "/=" => AssignOp::Op(BinaryOp::Div),
        "%=" => AssignOp::Op(BinaryOp::Rem),
        "**=" => AssignOp::Op(BinaryOp::Pow),
        "<<=" => AssignOp::Op(BinaryOp::Shl),
        ">>=" => AssignOp::Op(BinaryOp::Shr),
        ">>>=" => AssignOp::Op(BinaryOp::UShr),
        "&=" => AssignOp::Op(BinaryOp::BitAnd),
        "|=" => AssignOp::Op(BinaryOp::BitOr),
        "^=" => AssignOp::Op(BinaryOp::BitXor),
        "&&=" => AssignOp::Logical(LogicalOp::And),
        "||=" => AssignOp::Logical(LogicalOp::Or),
        "??=" => AssignOp::Logical(LogicalOp::Nullish),
        _ => return None,
    };
    Some(op)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn script(source: &str) -> Program {
        parse(source, Goal::Script).unwrap()
    }

    fn body_err(source: &str) -> ScriptError {
        parse(source, Goal::FunctionBody { is_async: false }).unwrap_err()
    }

    #[test]
    fn test_precedence() {
        let program = script("1 + 2 * 3 ** 2 ** 2;");
        match &program.body[0] {
            Stmt::Expr(Expr::Binary(BinaryOp::Add, _, right)) => match &**right {
                Expr::Binary(BinaryOp::Mul, _, pow) => match &**pow {
                    Expr::Binary(BinaryOp::Pow, _, inner) => {
                        assert!(matches!(**inner, Expr::Binary(BinaryOp::Pow, _, _)));
                    }
                    other => panic!("expected pow, got {:?}", other),
                },
                other => panic!("expected mul, got {:?}", other),
            },
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_arrow_functions() {
        let program = script("const f = (a, {b = 1}, ...rest) => a + b; const g = x => x;");
        match &program.body[0] {
            Stmt::Decl(DeclKind::Const, decls) => match &decls[0].init {
                Some(Expr::Function(def)) => {
                    assert!(def.is_arrow);
                    assert_eq!(def.params.len(), 2);
                    assert!(def.rest.is_some());
                }
                other => panic!("expected arrow, got {:?}", other),
            },
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parenthesized_expression_is_not_arrow() {
        let program = script("(a + b) * c;");
        assert!(matches!(
            &program.body[0],
            Stmt::Expr(Expr::Binary(BinaryOp::Mul, _, _))
        ));
    }

    #[test]
    fn test_var_names_are_hoisted() {
        let program = script("for (var i = 0; i < 3; i++) { var x = i; }");
        let names: Vec<&str> = program.var_names.iter().map(|n| &**n).collect();
        assert_eq!(names, vec!["i", "x"]);
    }

    #[test]
    fn test_for_let_records_per_iteration_bindings() {
        let program = script("for (let i = 0, j = 1; i < 3; i++) {}");
        match &program.body[0] {
            Stmt::For { per_iteration, .. } => assert_eq!(per_iteration.len(), 2),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_for_of_and_in() {
        let program = script("for (const [k, v] of m) {} for (key in obj) {}");
        assert!(matches!(&program.body[0], Stmt::ForOf { .. }));
        assert!(matches!(&program.body[1], Stmt::ForIn { .. }));
    }

    #[test]
    fn test_destructuring_assignment() {
        let program = script("[a, b] = [b, a];");
        match &program.body[0] {
            Stmt::Expr(Expr::Assign { target, .. }) => {
                assert!(matches!(**target, Pattern::Array { .. }));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_automatic_semicolon_insertion() {
        let program = script("let a = 1\nlet b = a\nb++\n");
        assert_eq!(program.body.len(), 3);
    }

    #[test]
    fn test_return_only_in_function_body() {
        assert!(parse("return 1", Goal::Script).is_err());
        assert!(parse("return 1", Goal::FunctionBody { is_async: false }).is_ok());
    }

    #[test]
    fn test_await_requires_async_context() {
        let err = body_err("await foo();");
        assert!(err.to_string().contains("await is only valid"));
        assert!(parse("await foo();", Goal::FunctionBody { is_async: true }).is_ok());
        assert!(parse("const x = await foo();", Goal::Module).is_ok());
    }

    #[test]
    fn test_export_only_in_modules() {
        assert!(parse("export default 1;", Goal::Module).is_ok());
        assert!(parse("export default 1;", Goal::Script).is_err());
        assert!(parse("export const a = 1, b = 2; export { a as c };", Goal::Module).is_ok());
    }

    #[test]
    fn test_import_is_rejected() {
        let err = body_err("import x from 'y';");
        assert!(err.to_string().contains("declare a dependency"));
    }

    #[test]
    fn test_unbalanced_source_reports_position() {
        match body_err("for (let i = 0; i < 10; i++) {") {
            ScriptError::Syntax { message, line, .. } => {
                assert_eq!(message, "Unexpected end of input");
                assert_eq!(line, 1);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_break_outside_loop() {
        assert!(body_err("break;").to_string().contains("Illegal break"));
    }

    #[test]
    fn test_object_literal_forms() {
        let program = script("const o = { a, b: 1, [k]: 2, m() { return 1 }, async n() {}, ...rest, 'q': 3, 4: 5 };");
        match &program.body[0] {
            Stmt::Decl(_, decls) => match &decls[0].init {
                Some(Expr::Object(props)) => assert_eq!(props.len(), 8),
                other => panic!("unexpected {:?}", other),
            },
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_template_substitution_is_parsed() {
        let program = script("`sum: ${a + b}`;");
        match &program.body[0] {
            Stmt::Expr(Expr::Template(chunks)) => {
                assert!(matches!(chunks[1], TemplateChunk::Expr(Expr::Binary(BinaryOp::Add, _, _))));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_switch() {
        let program = script("switch (x) { case 1: y(); break; default: z(); }");
        match &program.body[0] {
            Stmt::Switch { cases, .. } => assert_eq!(cases.len(), 2),
            other => panic!("unexpected {:?}", other),
        }
    }
}
