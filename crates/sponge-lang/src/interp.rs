//! Tree-walking evaluator.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::rc::Rc;

use rand::SeedableRng;
use rand::rngs::SmallRng;

use crate::ast::{BinOp, CmpOp, Const, Expr, FPart, Stmt, StmtKind, Target, UnaryOp};
use crate::builtins;
use crate::error::{ErrorKind, ExecError, RuntimeError};
use crate::host::{BreakSnapshot, Host};
use crate::parser::{parse, parse_expr};
use crate::value::{FileMode, Function, Value, dict_insert, dict_lookup};

/// Deepest user-function nesting before `RecursionError`.
pub const RECURSION_LIMIT: usize = 400;

/// Names never shown in a breakpoint snapshot.
const HIDDEN_NAMES: &[&str] = &[
    "__name__",
    "__main__",
    "__package__",
    "__doc__",
    "__builtins__",
];

pub(crate) type RResult<T> = Result<T, RuntimeError>;

pub(crate) fn err<T>(kind: ErrorKind, message: impl Into<String>) -> RResult<T> {
    Err(RuntimeError::new(kind, message))
}

enum Flow {
    Normal,
    Break,
    Continue,
    Return(Value),
}

struct Frame {
    name: String,
    locals: HashMap<String, Value>,
    globals_decl: HashSet<String>,
}

pub struct Interpreter<'h> {
    pub(crate) host: &'h mut dyn Host,
    globals: HashMap<String, Value>,
    frames: Vec<Frame>,
    pub(crate) rng: SmallRng,
    pub(crate) next_turtle: u32,
}

impl<'h> Interpreter<'h> {
    pub fn new(host: &'h mut dyn Host) -> Self {
        Self::with_rng(host, SmallRng::from_os_rng())
    }

    /// Deterministic `random` module, for tests and reproducible runs.
    pub fn with_seed(host: &'h mut dyn Host, seed: u64) -> Self {
        Self::with_rng(host, SmallRng::seed_from_u64(seed))
    }

    fn with_rng(host: &'h mut dyn Host, rng: SmallRng) -> Self {
        let mut globals = HashMap::new();
        globals.insert("__name__".to_string(), Value::str("__main__"));
        Self {
            host,
            globals,
            frames: Vec::new(),
            rng,
            next_turtle: 1,
        }
    }

    pub fn host(&mut self) -> &mut dyn Host {
        &mut *self.host
    }

    /// Global binding by name.
    pub fn global(&self, name: &str) -> Option<&Value> {
        self.globals.get(name)
    }

    /// Execute a parsed program in the module namespace.
    pub fn run(&mut self, program: &[Stmt]) -> Result<(), RuntimeError> {
        self.exec_block(program).map(|_| ())
    }

    /// Parse and execute more code against the existing globals.
    pub fn exec_source(&mut self, source: &str) -> Result<(), ExecError> {
        let program = parse(source)?;
        self.run(&program)?;
        Ok(())
    }

    /// Evaluate one expression in the current scope.
    pub fn eval_source(&mut self, source: &str) -> Result<Value, ExecError> {
        let expr = parse_expr(source)?;
        Ok(self.eval(&expr)?)
    }

    pub(crate) fn check_interrupt(&self) -> RResult<()> {
        if self.host.interrupted() {
            Err(RuntimeError::interrupt())
        } else {
            Ok(())
        }
    }

    // ---- scoping -------------------------------------------------------

    fn lookup(&self, name: &str) -> RResult<Value> {
        if let Some(v) = self.frames.last().and_then(|f| f.locals.get(name)) {
            return Ok(v.clone());
        }
        if let Some(v) = self.globals.get(name) {
            return Ok(v.clone());
        }
        if builtins::is_builtin(name) {
            return Ok(Value::builtin(name));
        }
        err(
            ErrorKind::NameError,
            format!("name '{name}' is not defined"),
        )
    }

    fn bind(&mut self, name: &str, value: Value) {
        match self.frames.last_mut() {
            Some(frame) if !frame.globals_decl.contains(name) => {
                frame.locals.insert(name.to_string(), value);
            }
            _ => {
                self.globals.insert(name.to_string(), value);
            }
        }
    }

    /// Globals overlaid with the innermost frame's locals.
    fn visible_bindings(&self) -> BTreeMap<String, Value> {
        let mut vars: BTreeMap<String, Value> = self
            .globals
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        if let Some(frame) = self.frames.last() {
            for (k, v) in &frame.locals {
                vars.insert(k.clone(), v.clone());
            }
        }
        vars
    }

    fn snapshot(&mut self, line: u32) -> BreakSnapshot {
        let variables = self
            .visible_bindings()
            .into_iter()
            .filter(|(name, value)| {
                !HIDDEN_NAMES.contains(&name.as_str())
                    && !value.is_callable()
                    && !matches!(value, Value::Module(_))
            })
            .map(|(name, value)| (name, value.py_str()))
            .collect();
        let watches = self
            .host
            .watches()
            .into_iter()
            .map(|source| {
                let rendered = match self.eval_source(&source) {
                    Ok(v) => v.py_str(),
                    Err(ExecError::Compile(e)) => format!("<error: SyntaxError: {}>", e.message),
                    Err(ExecError::Runtime(e)) => format!("<error: {}: {}>", e.kind, e.message),
                };
                (source, rendered)
            })
            .collect();
        BreakSnapshot {
            line,
            variables,
            watches,
        }
    }

    // ---- statements ----------------------------------------------------

    fn exec_block(&mut self, block: &[Stmt]) -> RResult<Flow> {
        for stmt in block {
            self.check_interrupt()?;
            match self.exec_stmt(stmt).map_err(|e| e.at(stmt.line))? {
                Flow::Normal => {}
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_stmt(&mut self, stmt: &Stmt) -> RResult<Flow> {
        match &stmt.kind {
            StmtKind::Expr(expr) => {
                self.eval(expr)?;
            }
            StmtKind::Assign { targets, value } => {
                let value = self.eval(value)?;
                for target in targets {
                    self.assign(target, value.clone())?;
                }
            }
            StmtKind::AugAssign { target, op, value } => {
                let current = match target {
                    Target::Name(name) => self.lookup(name)?,
                    Target::Index { object, index } => {
                        let object = self.eval(object)?;
                        let index = self.eval(index)?;
                        self.get_index(&object, &index)?
                    }
                    Target::Tuple(_) => {
                        return err(
                            ErrorKind::TypeError,
                            "illegal expression for augmented assignment",
                        );
                    }
                };
                let rhs = self.eval(value)?;
                let updated = match (&current, op) {
                    (Value::List(items), BinOp::Add) => {
                        let extra = self.iterate(&rhs)?;
                        items.borrow_mut().extend(extra);
                        current.clone()
                    }
                    _ => binary_op(*op, &current, &rhs)?,
                };
                self.assign(target, updated)?;
            }
            StmtKind::If { test, body, orelse } => {
                let branch = if self.eval(test)?.truthy() {
                    body
                } else {
                    orelse
                };
                return self.exec_block(branch);
            }
            StmtKind::While { test, body } => loop {
                self.check_interrupt()?;
                if !self.eval(test)?.truthy() {
                    break;
                }
                match self.exec_block(body)? {
                    Flow::Break => break,
                    Flow::Return(v) => return Ok(Flow::Return(v)),
                    Flow::Normal | Flow::Continue => {}
                }
            },
            StmtKind::For { target, iter, body } => {
                let iterable = self.eval(iter)?;
                for item in self.iterate(&iterable)? {
                    self.check_interrupt()?;
                    self.assign(target, item)?;
                    match self.exec_block(body)? {
                        Flow::Break => break,
                        Flow::Return(v) => return Ok(Flow::Return(v)),
                        Flow::Normal | Flow::Continue => {}
                    }
                }
            }
            StmtKind::Def { name, params, body } => {
                let mut bound = Vec::with_capacity(params.len());
                for param in params {
                    let default = match &param.default {
                        Some(expr) => Some(self.eval(expr)?),
                        None => None,
                    };
                    bound.push((param.name.clone(), default));
                }
                let function = Function {
                    name: name.clone(),
                    params: bound,
                    body: Rc::new(body.clone()),
                };
                self.bind(name, Value::Function(Rc::new(function)));
            }
            StmtKind::Return(value) => {
                let value = match value {
                    Some(expr) => self.eval(expr)?,
                    None => Value::None,
                };
                return Ok(Flow::Return(value));
            }
            StmtKind::Break => return Ok(Flow::Break),
            StmtKind::Continue => return Ok(Flow::Continue),
            StmtKind::Pass => {}
            StmtKind::Import { module, alias } => {
                let value = self.import(module)?;
                self.bind(alias.as_deref().unwrap_or(module), value);
            }
            StmtKind::FromImport { module, names } => {
                let value = self.import(module)?;
                if names.iter().any(|n| n == "*") {
                    for member in builtins::module_members(module) {
                        let attr = self.get_attr(&value, member)?;
                        self.bind(member, attr);
                    }
                } else {
                    for name in names {
                        let attr = self.get_attr(&value, name).map_err(|_| {
                            RuntimeError::new(
                                ErrorKind::NameError,
                                format!("cannot import name '{name}' from '{module}'"),
                            )
                        })?;
                        self.bind(name, attr);
                    }
                }
            }
            StmtKind::With {
                context,
                name,
                body,
            } => {
                let ctx = self.eval(context)?;
                if let Some(name) = name {
                    self.bind(name, ctx.clone());
                }
                let result = self.exec_block(body);
                if let Value::File(handle) = &ctx {
                    handle.borrow_mut().closed = true;
                }
                return result;
            }
            StmtKind::Global(names) => {
                if let Some(frame) = self.frames.last_mut() {
                    frame.globals_decl.extend(names.iter().cloned());
                }
            }
            StmtKind::Breakpoint(line) => {
                if self.host.should_pause(*line) {
                    let snapshot = self.snapshot(*line);
                    tracing::trace!(target: "sponge.lang", line, "pausing at breakpoint");
                    self.host.pause(snapshot)?;
                    self.check_interrupt()?;
                }
            }
        }
        Ok(Flow::Normal)
    }

    fn import(&mut self, module: &str) -> RResult<Value> {
        if builtins::is_core_module(module) {
            return Ok(Value::Module(Rc::from(module)));
        }
        if builtins::is_package_module(module) && self.host.has_package(module) {
            return Ok(Value::Module(Rc::from(module)));
        }
        err(
            ErrorKind::ModuleNotFoundError,
            format!("No module named '{module}'"),
        )
    }

    fn assign(&mut self, target: &Target, value: Value) -> RResult<()> {
        match target {
            Target::Name(name) => {
                self.bind(name, value);
                Ok(())
            }
            Target::Index { object, index } => {
                let object = self.eval(object)?;
                let index = self.eval(index)?;
                self.set_index(&object, index, value)
            }
            Target::Tuple(targets) => {
                let items = self.iterate(&value)?;
                match items.len().cmp(&targets.len()) {
                    Ordering::Greater => err(
                        ErrorKind::ValueError,
                        format!("too many values to unpack (expected {})", targets.len()),
                    ),
                    Ordering::Less => err(
                        ErrorKind::ValueError,
                        format!(
                            "not enough values to unpack (expected {}, got {})",
                            targets.len(),
                            items.len()
                        ),
                    ),
                    Ordering::Equal => {
                        for (target, item) in targets.iter().zip(items) {
                            self.assign(target, item)?;
                        }
                        Ok(())
                    }
                }
            }
        }
    }

    // ---- expressions ---------------------------------------------------

    pub(crate) fn eval(&mut self, expr: &Expr) -> RResult<Value> {
        match expr {
            Expr::Const(c) => Ok(match c {
                Const::None => Value::None,
                Const::Bool(b) => Value::Bool(*b),
                Const::Int(i) => Value::Int(*i),
                Const::Float(f) => Value::Float(*f),
                Const::Str(s) => Value::str(s),
            }),
            Expr::Name(name) => self.lookup(name),
            Expr::List(items) => {
                let values = self.eval_all(items)?;
                Ok(Value::list(values))
            }
            Expr::Tuple(items) => {
                let values = self.eval_all(items)?;
                Ok(Value::tuple(values))
            }
            Expr::Dict(pairs) => {
                let mut out = Vec::with_capacity(pairs.len());
                for (k, v) in pairs {
                    let key = self.eval(k)?;
                    require_hashable(&key)?;
                    let value = self.eval(v)?;
                    dict_insert(&mut out, key, value);
                }
                Ok(Value::dict(out))
            }
            Expr::FString(parts) => {
                let mut out = String::new();
                for part in parts {
                    match part {
                        FPart::Lit(text) => out.push_str(text),
                        FPart::Hole { expr, spec } => {
                            let value = self.eval(expr)?;
                            match spec {
                                Some(spec) => out.push_str(&builtins::format_value(&value, spec)?),
                                None => out.push_str(&value.py_str()),
                            }
                        }
                    }
                }
                Ok(Value::str(out))
            }
            Expr::Unary { op, operand } => {
                let value = self.eval(operand)?;
                unary_op(*op, &value)
            }
            Expr::Binary { op, left, right } => {
                let l = self.eval(left)?;
                let r = self.eval(right)?;
                binary_op(*op, &l, &r)
            }
            Expr::Compare { first, rest } => {
                let mut left = self.eval(first)?;
                for (op, right) in rest {
                    let right = self.eval(right)?;
                    if !compare_op(*op, &left, &right)? {
                        return Ok(Value::Bool(false));
                    }
                    left = right;
                }
                Ok(Value::Bool(true))
            }
            Expr::And(l, r) => {
                let left = self.eval(l)?;
                if !left.truthy() {
                    return Ok(left);
                }
                self.eval(r)
            }
            Expr::Or(l, r) => {
                let left = self.eval(l)?;
                if left.truthy() {
                    return Ok(left);
                }
                self.eval(r)
            }
            Expr::IfElse { test, body, orelse } => {
                if self.eval(test)?.truthy() {
                    self.eval(body)
                } else {
                    self.eval(orelse)
                }
            }
            Expr::Call { func, args, kwargs } => {
                let callee = self.eval(func)?;
                let args = self.eval_all(args)?;
                let mut kw = Vec::with_capacity(kwargs.len());
                for (name, expr) in kwargs {
                    kw.push((name.clone(), self.eval(expr)?));
                }
                self.call(&callee, args, kw)
            }
            Expr::Attribute { object, name } => {
                let object = self.eval(object)?;
                self.get_attr(&object, name)
            }
            Expr::Index { object, index } => {
                let object = self.eval(object)?;
                let index = self.eval(index)?;
                self.get_index(&object, &index)
            }
            Expr::Slice {
                object,
                lower,
                upper,
                step,
            } => {
                let object = self.eval(object)?;
                let lower = self.eval_opt_int(lower.as_deref())?;
                let upper = self.eval_opt_int(upper.as_deref())?;
                let step = self.eval_opt_int(step.as_deref())?;
                slice(&object, lower, upper, step)
            }
        }
    }

    fn eval_all(&mut self, exprs: &[Expr]) -> RResult<Vec<Value>> {
        exprs.iter().map(|e| self.eval(e)).collect()
    }

    fn eval_opt_int(&mut self, expr: Option<&Expr>) -> RResult<Option<i64>> {
        let Some(expr) = expr else { return Ok(None) };
        match self.eval(expr)? {
            Value::None => Ok(None),
            v => v.as_int().map(Some).ok_or_else(|| {
                RuntimeError::new(
                    ErrorKind::TypeError,
                    "slice indices must be integers or None",
                )
            }),
        }
    }

    pub(crate) fn call(
        &mut self,
        callee: &Value,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> RResult<Value> {
        match callee {
            Value::Function(function) => self.call_function(function, args, kwargs),
            Value::Builtin(name) => builtins::call_builtin(self, name, args, kwargs),
            Value::BoundMethod { receiver, name } => {
                builtins::call_method(self, receiver, name, args, kwargs)
            }
            other => err(
                ErrorKind::TypeError,
                format!("'{}' object is not callable", other.type_name()),
            ),
        }
    }

    fn call_function(
        &mut self,
        function: &Rc<Function>,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> RResult<Value> {
        if self.frames.len() >= RECURSION_LIMIT {
            return err(
                ErrorKind::RecursionError,
                "maximum recursion depth exceeded",
            );
        }
        let name = &function.name;
        let params = &function.params;
        if args.len() > params.len() {
            return err(
                ErrorKind::TypeError,
                format!(
                    "{name}() takes {} positional arguments but {} were given",
                    params.len(),
                    args.len()
                ),
            );
        }
        let mut slots: Vec<Option<Value>> = args.into_iter().map(Some).collect();
        slots.resize(params.len(), None);
        for (key, value) in kwargs {
            let Some(idx) = params.iter().position(|(p, _)| *p == key) else {
                return err(
                    ErrorKind::TypeError,
                    format!("{name}() got an unexpected keyword argument '{key}'"),
                );
            };
            if slots[idx].is_some() {
                return err(
                    ErrorKind::TypeError,
                    format!("{name}() got multiple values for argument '{key}'"),
                );
            }
            slots[idx] = Some(value);
        }
        let mut locals = HashMap::with_capacity(params.len());
        for ((param, default), slot) in params.iter().zip(slots) {
            let Some(value) = slot.or_else(|| default.clone()) else {
                return err(
                    ErrorKind::TypeError,
                    format!("{name}() missing 1 required positional argument: '{param}'"),
                );
            };
            locals.insert(param.clone(), value);
        }
        self.frames.push(Frame {
            name: name.clone(),
            locals,
            globals_decl: HashSet::new(),
        });
        let body = Rc::clone(&function.body);
        let result = self.exec_block(&body);
        let frame = self.frames.pop();
        match result {
            Ok(Flow::Return(value)) => Ok(value),
            Ok(_) => Ok(Value::None),
            Err(mut e) => {
                if let Some(frame) = frame {
                    e.frames.insert(0, frame.name);
                }
                Err(e)
            }
        }
    }

    pub(crate) fn get_attr(&mut self, object: &Value, name: &str) -> RResult<Value> {
        if let Value::Module(module) = object {
            return builtins::module_attr(module, name).ok_or_else(|| {
                RuntimeError::new(
                    ErrorKind::AttributeError,
                    format!("module '{module}' has no attribute '{name}'"),
                )
            });
        }
        if builtins::has_method(object, name) {
            return Ok(Value::BoundMethod {
                receiver: Box::new(object.clone()),
                name: Rc::from(name),
            });
        }
        err(
            ErrorKind::AttributeError,
            format!("'{}' object has no attribute '{name}'", object.type_name()),
        )
    }

    pub(crate) fn get_index(&self, object: &Value, index: &Value) -> RResult<Value> {
        match object {
            Value::List(items) => {
                let items = items.borrow();
                let idx = seq_index(index, items.len(), "list")?;
                Ok(items[idx].clone())
            }
            Value::Tuple(items) => {
                let idx = seq_index(index, items.len(), "tuple")?;
                Ok(items[idx].clone())
            }
            Value::Str(s) => {
                let chars: Vec<char> = s.chars().collect();
                let idx = seq_index(index, chars.len(), "string")?;
                Ok(Value::str(chars[idx].to_string()))
            }
            Value::Dict(pairs) => {
                require_hashable(index)?;
                dict_lookup(&pairs.borrow(), index)
                    .ok_or_else(|| RuntimeError::new(ErrorKind::KeyError, index.repr()))
            }
            other => err(
                ErrorKind::TypeError,
                format!("'{}' object is not subscriptable", other.type_name()),
            ),
        }
    }

    fn set_index(&mut self, object: &Value, index: Value, value: Value) -> RResult<()> {
        match object {
            Value::List(items) => {
                let mut items = items.borrow_mut();
                let len = items.len();
                let idx = seq_index(&index, len, "list")?;
                items[idx] = value;
                Ok(())
            }
            Value::Dict(pairs) => {
                require_hashable(&index)?;
                dict_insert(&mut pairs.borrow_mut(), index, value);
                Ok(())
            }
            other => err(
                ErrorKind::TypeError,
                format!(
                    "'{}' object does not support item assignment",
                    other.type_name()
                ),
            ),
        }
    }

    /// Materialize an iterable into a vector of items.
    pub(crate) fn iterate(&mut self, value: &Value) -> RResult<Vec<Value>> {
        match value {
            Value::List(items) => Ok(items.borrow().clone()),
            Value::Tuple(items) => Ok(items.to_vec()),
            Value::Str(s) => Ok(s.chars().map(|c| Value::str(c.to_string())).collect()),
            Value::Dict(pairs) => Ok(pairs.borrow().iter().map(|(k, _)| k.clone()).collect()),
            Value::File(handle) => {
                let mut handle = handle.borrow_mut();
                if handle.closed {
                    return err(ErrorKind::ValueError, "I/O operation on closed file.");
                }
                if handle.mode != FileMode::Read {
                    return err(ErrorKind::ValueError, "not readable");
                }
                let rest = handle.snapshot[handle.pos..].to_string();
                handle.pos = handle.snapshot.len();
                Ok(rest
                    .split_inclusive('\n')
                    .map(Value::str)
                    .collect())
            }
            other => err(
                ErrorKind::TypeError,
                format!("'{}' object is not iterable", other.type_name()),
            ),
        }
    }
}

pub(crate) fn require_hashable(value: &Value) -> RResult<()> {
    if value.is_hashable() {
        Ok(())
    } else {
        err(
            ErrorKind::TypeError,
            format!("unhashable type: '{}'", value.type_name()),
        )
    }
}

fn seq_index(index: &Value, len: usize, what: &str) -> RResult<usize> {
    let Some(i) = index.as_int() else {
        return err(
            ErrorKind::TypeError,
            format!(
                "{what} indices must be integers, not {}",
                index.type_name()
            ),
        );
    };
    let len_i = i64::try_from(len).unwrap_or(i64::MAX);
    let resolved = if i < 0 { i + len_i } else { i };
    if (0..len_i).contains(&resolved) {
        Ok(resolved as usize)
    } else {
        err(ErrorKind::IndexError, format!("{what} index out of range"))
    }
}

fn slice_indices(len: usize, lower: Option<i64>, upper: Option<i64>, step: i64) -> Vec<usize> {
    let len = i64::try_from(len).unwrap_or(i64::MAX);
    let clamp = |v: i64, lo: i64, hi: i64| v.max(lo).min(hi);
    let norm = |v: i64| if v < 0 { v + len } else { v };
    let mut out = Vec::new();
    if step > 0 {
        let start = clamp(lower.map_or(0, norm), 0, len);
        let stop = clamp(upper.map_or(len, norm), 0, len);
        let mut i = start;
        while i < stop {
            out.push(i as usize);
            match i.checked_add(step) {
                Some(next) => i = next,
                None => break,
            }
        }
    } else {
        let start = clamp(lower.map_or(len - 1, norm), -1, len - 1);
        let stop = clamp(upper.map_or(-1, norm), -1, len - 1);
        let stop = if upper.is_none() { -1 } else { stop };
        let mut i = start;
        while i > stop {
            out.push(i as usize);
            match i.checked_add(step) {
                Some(next) => i = next,
                None => break,
            }
        }
    }
    out
}

fn slice(object: &Value, lower: Option<i64>, upper: Option<i64>, step: Option<i64>) -> RResult<Value> {
    let step = step.unwrap_or(1);
    if step == 0 {
        return err(ErrorKind::ValueError, "slice step cannot be zero");
    }
    match object {
        Value::List(items) => {
            let items = items.borrow();
            let picked = slice_indices(items.len(), lower, upper, step)
                .into_iter()
                .map(|i| items[i].clone())
                .collect();
            Ok(Value::list(picked))
        }
        Value::Tuple(items) => {
            let picked = slice_indices(items.len(), lower, upper, step)
                .into_iter()
                .map(|i| items[i].clone())
                .collect();
            Ok(Value::tuple(picked))
        }
        Value::Str(s) => {
            let chars: Vec<char> = s.chars().collect();
            let picked: String = slice_indices(chars.len(), lower, upper, step)
                .into_iter()
                .map(|i| chars[i])
                .collect();
            Ok(Value::str(picked))
        }
        other => err(
            ErrorKind::TypeError,
            format!("'{}' object is not subscriptable", other.type_name()),
        ),
    }
}

fn unary_op(op: UnaryOp, value: &Value) -> RResult<Value> {
    match (op, value) {
        (UnaryOp::Not, v) => Ok(Value::Bool(!v.truthy())),
        (UnaryOp::Neg, Value::Float(f)) => Ok(Value::Float(-f)),
        (UnaryOp::Pos, Value::Float(f)) => Ok(Value::Float(*f)),
        (UnaryOp::Neg, v) if v.as_int().is_some() => {
            let i = v.as_int().unwrap_or_default();
            i.checked_neg()
                .map(Value::Int)
                .ok_or_else(|| RuntimeError::new(ErrorKind::OverflowError, "integer overflow"))
        }
        (UnaryOp::Pos, v) if v.as_int().is_some() => Ok(Value::Int(v.as_int().unwrap_or_default())),
        (op, v) => {
            let sym = if op == UnaryOp::Neg { "-" } else { "+" };
            err(
                ErrorKind::TypeError,
                format!("bad operand type for unary {sym}: '{}'", v.type_name()),
            )
        }
    }
}

fn op_symbol(op: BinOp) -> &'static str {
    match op {
        BinOp::Add => "+",
        BinOp::Sub => "-",
        BinOp::Mul => "*",
        BinOp::Div => "/",
        BinOp::FloorDiv => "//",
        BinOp::Mod => "%",
        BinOp::Pow => "** or pow()",
    }
}

fn overflow() -> RuntimeError {
    RuntimeError::new(ErrorKind::OverflowError, "integer overflow")
}

/// Longest sequence `*` may build.
pub const MAX_REPEAT_LEN: usize = 10_000_000;

/// Repetition count for a sequence of `len` items, refused when the
/// result would exceed [`MAX_REPEAT_LEN`].
fn repeat(len: usize, times: i64) -> RResult<usize> {
    let times = usize::try_from(times.max(0)).unwrap_or(0);
    match len.checked_mul(times) {
        Some(total) if total <= MAX_REPEAT_LEN => Ok(times),
        _ => err(ErrorKind::MemoryError, "repeated sequence is too large"),
    }
}

pub(crate) fn binary_op(op: BinOp, l: &Value, r: &Value) -> RResult<Value> {
    match (op, l, r) {
        (BinOp::Add, Value::Str(a), Value::Str(b)) => Ok(Value::str(format!("{a}{b}"))),
        (BinOp::Add, Value::List(a), Value::List(b)) => {
            let mut out = a.borrow().clone();
            out.extend(b.borrow().iter().cloned());
            Ok(Value::list(out))
        }
        (BinOp::Add, Value::Tuple(a), Value::Tuple(b)) => {
            Ok(Value::tuple(a.iter().chain(b.iter()).cloned().collect()))
        }
        (BinOp::Mul, Value::Str(s), n) | (BinOp::Mul, n, Value::Str(s)) if n.as_int().is_some() => {
            let times = repeat(s.len(), n.as_int().unwrap_or_default())?;
            Ok(Value::str(s.repeat(times)))
        }
        (BinOp::Mul, Value::List(items), n) | (BinOp::Mul, n, Value::List(items))
            if n.as_int().is_some() =>
        {
            let items = items.borrow();
            let times = repeat(items.len(), n.as_int().unwrap_or_default())?;
            let mut out = Vec::with_capacity(items.len() * times);
            for _ in 0..times {
                out.extend(items.iter().cloned());
            }
            Ok(Value::list(out))
        }
        _ => numeric_op(op, l, r),
    }
}

fn numeric_op(op: BinOp, l: &Value, r: &Value) -> RResult<Value> {
    let unsupported = || {
        RuntimeError::new(
            ErrorKind::TypeError,
            format!(
                "unsupported operand type(s) for {}: '{}' and '{}'",
                op_symbol(op),
                l.type_name(),
                r.type_name()
            ),
        )
    };
    if let (Some(a), Some(b)) = (l.as_int(), r.as_int()) {
        return match op {
            BinOp::Add => a.checked_add(b).map(Value::Int).ok_or_else(overflow),
            BinOp::Sub => a.checked_sub(b).map(Value::Int).ok_or_else(overflow),
            BinOp::Mul => a.checked_mul(b).map(Value::Int).ok_or_else(overflow),
            BinOp::Div => {
                if b == 0 {
                    err(ErrorKind::ZeroDivisionError, "division by zero")
                } else {
                    Ok(Value::Float(a as f64 / b as f64))
                }
            }
            BinOp::FloorDiv | BinOp::Mod if b == 0 => err(
                ErrorKind::ZeroDivisionError,
                "integer division or modulo by zero",
            ),
            BinOp::FloorDiv => {
                let q = a.checked_div(b).ok_or_else(overflow)?;
                let adjust = a % b != 0 && ((a < 0) != (b < 0));
                Ok(Value::Int(if adjust { q - 1 } else { q }))
            }
            BinOp::Mod => {
                let rem = a.checked_rem(b).ok_or_else(overflow)?;
                let adjust = rem != 0 && ((rem < 0) != (b < 0));
                Ok(Value::Int(if adjust { rem + b } else { rem }))
            }
            BinOp::Pow => {
                if b < 0 {
                    Ok(Value::Float((a as f64).powf(b as f64)))
                } else {
                    let exp = u32::try_from(b).map_err(|_| overflow())?;
                    a.checked_pow(exp).map(Value::Int).ok_or_else(overflow)
                }
            }
        };
    }
    let (Some(a), Some(b)) = (l.as_f64(), r.as_f64()) else {
        return Err(unsupported());
    };
    let value = match op {
        BinOp::Add => a + b,
        BinOp::Sub => a - b,
        BinOp::Mul => a * b,
        BinOp::Div => {
            if b == 0.0 {
                return err(ErrorKind::ZeroDivisionError, "float division by zero");
            }
            a / b
        }
        BinOp::FloorDiv => {
            if b == 0.0 {
                return err(ErrorKind::ZeroDivisionError, "float floor division by zero");
            }
            (a / b).floor()
        }
        BinOp::Mod => {
            if b == 0.0 {
                return err(ErrorKind::ZeroDivisionError, "float modulo");
            }
            let rem = a % b;
            if rem != 0.0 && ((rem < 0.0) != (b < 0.0)) {
                rem + b
            } else {
                rem
            }
        }
        BinOp::Pow => a.powf(b),
    };
    Ok(Value::Float(value))
}

fn cmp_symbol(op: CmpOp) -> &'static str {
    match op {
        CmpOp::Lt => "<",
        CmpOp::LtEq => "<=",
        CmpOp::Gt => ">",
        CmpOp::GtEq => ">=",
        _ => "==",
    }
}

/// Python ordering for `<`-style comparisons and `sorted`.
pub(crate) fn compare_values(l: &Value, r: &Value) -> Option<Ordering> {
    match (l, r) {
        (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
        (Value::List(a), Value::List(b)) => compare_seq(&a.borrow(), &b.borrow()),
        (Value::Tuple(a), Value::Tuple(b)) => compare_seq(a, b),
        _ => {
            if let (Some(a), Some(b)) = (l.as_int(), r.as_int()) {
                return Some(a.cmp(&b));
            }
            let (a, b) = (l.as_f64()?, r.as_f64()?);
            a.partial_cmp(&b)
        }
    }
}

fn compare_seq(a: &[Value], b: &[Value]) -> Option<Ordering> {
    for (x, y) in a.iter().zip(b) {
        if !x.py_eq(y) {
            return compare_values(x, y);
        }
    }
    Some(a.len().cmp(&b.len()))
}

fn contains(container: &Value, item: &Value) -> RResult<bool> {
    match container {
        Value::Str(s) => match item {
            Value::Str(sub) => Ok(s.contains(sub.as_ref())),
            other => err(
                ErrorKind::TypeError,
                format!(
                    "'in <string>' requires string as left operand, not {}",
                    other.type_name()
                ),
            ),
        },
        Value::List(items) => Ok(items.borrow().iter().any(|v| v.py_eq(item))),
        Value::Tuple(items) => Ok(items.iter().any(|v| v.py_eq(item))),
        Value::Dict(pairs) => Ok(pairs.borrow().iter().any(|(k, _)| k.py_eq(item))),
        other => err(
            ErrorKind::TypeError,
            format!(
                "argument of type '{}' is not iterable",
                other.type_name()
            ),
        ),
    }
}

fn identical(l: &Value, r: &Value) -> bool {
    match (l, r) {
        (Value::List(a), Value::List(b)) => Rc::ptr_eq(a, b),
        (Value::Dict(a), Value::Dict(b)) => Rc::ptr_eq(a, b),
        (Value::Tuple(a), Value::Tuple(b)) => Rc::ptr_eq(a, b),
        (Value::Str(a), Value::Str(b)) => Rc::ptr_eq(a, b) || a == b,
        (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
        (Value::None, Value::None) => true,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::Int(a), Value::Int(b)) => a == b,
        (a, b) => std::mem::discriminant(a) == std::mem::discriminant(b) && a.py_eq(b),
    }
}

fn compare_op(op: CmpOp, l: &Value, r: &Value) -> RResult<bool> {
    let ordered = |want: fn(Ordering) -> bool| match compare_values(l, r) {
        Some(ord) => Ok(want(ord)),
        None if l.as_f64().is_some() && r.as_f64().is_some() => Ok(false),
        None => err(
            ErrorKind::TypeError,
            format!(
                "'{}' not supported between instances of '{}' and '{}'",
                cmp_symbol(op),
                l.type_name(),
                r.type_name()
            ),
        ),
    };
    match op {
        CmpOp::Eq => Ok(l.py_eq(r)),
        CmpOp::NotEq => Ok(!l.py_eq(r)),
        CmpOp::Lt => ordered(Ordering::is_lt),
        CmpOp::LtEq => ordered(Ordering::is_le),
        CmpOp::Gt => ordered(Ordering::is_gt),
        CmpOp::GtEq => ordered(Ordering::is_ge),
        CmpOp::In => contains(r, l),
        CmpOp::NotIn => contains(r, l).map(|b| !b),
        CmpOp::Is => Ok(identical(l, r)),
        CmpOp::IsNot => Ok(!identical(l, r)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::BufferHost;

    fn run(src: &str) -> (String, Result<(), ExecError>) {
        let mut host = BufferHost::new();
        let result = {
            let mut interp = Interpreter::with_seed(&mut host, 7);
            interp.exec_source(src)
        };
        (host.output, result)
    }

    fn output(src: &str) -> String {
        let (out, result) = run(src);
        if let Err(e) = result {
            panic!("unexpected error: {e}\noutput so far: {out}");
        }
        out
    }

    #[test]
    fn arithmetic_follows_python_semantics() {
        assert_eq!(
            output("print(7 // 2, -7 // 2, -7 % 3, 7 / 2, 2 ** 10, 2 ** -1)"),
            "3 -4 2 3.5 1024 0.5\n"
        );
    }

    #[test]
    fn functions_defaults_and_recursion() {
        let src = "def fact(n, acc=1):\n    if n <= 1:\n        return acc\n    return fact(n - 1, acc * n)\nprint(fact(5))\n";
        assert_eq!(output(src), "120\n");
    }

    #[test]
    fn loops_break_continue() {
        let src = "total = 0\nfor i in range(10):\n    if i == 7:\n        break\n    if i % 2:\n        continue\n    total += i\nprint(total)\n";
        assert_eq!(output(src), "12\n");
    }

    #[test]
    fn global_declaration_writes_module_scope() {
        let src = "n = 0\ndef bump():\n    global n\n    n += 1\nbump()\nbump()\nprint(n)\n";
        assert_eq!(output(src), "2\n");
    }

    #[test]
    fn locals_shadow_globals() {
        let src = "x = 1\ndef f():\n    x = 2\n    return x\nprint(f(), x)\n";
        assert_eq!(output(src), "2 1\n");
    }

    #[test]
    fn tuple_unpacking_and_dict_iteration() {
        let src = "d = {'a': 1, 'b': 2}\nfor k, v in d.items():\n    print(k, v)\na, b = 1, 2\nprint(b, a)\n";
        assert_eq!(output(src), "a 1\nb 2\n2 1\n");
    }

    #[test]
    fn slicing_and_negative_indices() {
        assert_eq!(
            output("s = 'hello'\nprint(s[1:3], s[-1], s[::-1], [1,2,3,4][::2])"),
            "el o olleh [1, 3]\n"
        );
    }

    #[test]
    fn chained_comparison_short_circuits() {
        assert_eq!(output("x = 5\nprint(1 < x < 10, 1 < x > 10, 0 or 'y')"), "True False y\n");
    }

    #[test]
    fn name_error_carries_line() {
        let (_, result) = run("x = 1\nprint(y)\n");
        let Err(ExecError::Runtime(e)) = result else {
            panic!("expected runtime error");
        };
        assert_eq!(e.kind, ErrorKind::NameError);
        assert_eq!(e.line, 2);
    }

    #[test]
    fn error_inside_function_reports_inner_line_and_frame() {
        let (_, result) = run("def f():\n    return 1 / 0\nf()\n");
        let Err(ExecError::Runtime(e)) = result else {
            panic!("expected runtime error");
        };
        assert_eq!(e.kind, ErrorKind::ZeroDivisionError);
        assert_eq!(e.line, 2);
        assert_eq!(e.frames, vec!["f".to_string()]);
        assert!(e.to_string().contains("line 2, in f"));
    }

    #[test]
    fn recursion_limit_raises() {
        let handle = std::thread::Builder::new()
            .stack_size(256 * 1024 * 1024)
            .spawn(|| run("def f(n):\n    return f(n + 1)\nf(0)\n").1)
            .unwrap();
        let result = handle.join().unwrap();
        let Err(ExecError::Runtime(e)) = result else {
            panic!("expected runtime error");
        };
        assert_eq!(e.kind, ErrorKind::RecursionError);
    }

    #[test]
    fn list_aliasing_is_shared() {
        assert_eq!(output("a = [1]\nb = a\nb.append(2)\nprint(a, a is b)"), "[1, 2] True\n");
    }

    #[test]
    fn augmented_list_add_extends_in_place() {
        assert_eq!(output("a = [1]\nb = a\na += [2]\nprint(b)"), "[1, 2]\n");
    }

    #[test]
    fn unhashable_key_is_type_error() {
        let (_, result) = run("d = {}\nd[[1]] = 2\n");
        assert!(matches!(result, Err(ExecError::Runtime(e)) if e.kind == ErrorKind::TypeError));
    }

    #[test]
    fn huge_slice_steps_stop_at_the_end() {
        let src = "x = [1, 2, 3, 4, 5, 6]\nprint(x[5::9223372036854775807], x[0::9223372036854775807])\nprint(x[0::-9223372036854775807])\n";
        assert_eq!(output(src), "[6] [1]\n[1]\n");
    }

    #[test]
    fn range_bounds_near_the_integer_limits() {
        assert_eq!(
            output("print(list(range(-9223372036854775807, 9223372036854775807, 9223372036854775807)))"),
            "[-9223372036854775807, 0]\n"
        );
        let (_, result) = run("range(-9223372036854775807, 9223372036854775807)\n");
        assert!(matches!(result, Err(ExecError::Runtime(e)) if e.kind == ErrorKind::OverflowError));
    }

    #[test]
    fn oversized_repetition_is_a_memory_error() {
        let (_, result) = run("s = [0] * 100000000000\n");
        assert!(matches!(result, Err(ExecError::Runtime(e)) if e.kind == ErrorKind::MemoryError));
        let (_, result) = run("s = 'ab' * 9223372036854775807\n");
        assert!(matches!(result, Err(ExecError::Runtime(e)) if e.kind == ErrorKind::MemoryError));
        assert_eq!(output("print(len([0] * 1000), 'ab' * 2, [1] * -3)"), "1000 abab []\n");
    }
}
