//! Tree-walking evaluator.
//!
//! The interpreter owns no I/O and no tool plumbing: printing, imports and
//! tool dispatch go through the [`HostEnv`] seam, which the sandbox runtime
//! implements with the real bindings and tests implement with fakes.
//! Everything fails soft — a [`ScriptError`] is reported in the exec
//! outcome, never a panic.

use std::cmp::Ordering;
use std::collections::HashMap;

use crate::ast::{BinOp, Expr, Lit, Stmt, Target, UnOp};
use crate::value::{ScriptError, Value};

/// A session namespace: variables surviving across execs.
pub type Scope = HashMap<String, Value>;

/// Host services the script can reach.
pub trait HostEnv {
    /// Emit one line of visible output.
    fn print_line(&mut self, text: &str);

    /// Whether `name` is a callable tool wrapper.
    fn is_tool(&self, name: &str) -> bool;

    /// Dispatch one tool call; the returned value is what the script sees.
    fn call_tool(
        &mut self,
        name: &str,
        positional: Option<serde_json::Value>,
        kwargs: serde_json::Map<String, serde_json::Value>,
    ) -> Result<Value, ScriptError>;

    /// Fan one tool out over a payload list with a bounded worker pool.
    fn parallel_map(
        &mut self,
        tool_name: &str,
        payloads: Vec<serde_json::Value>,
        max_workers: Option<usize>,
    ) -> Result<Value, ScriptError>;

    /// Resolve an `import`, applying the import policy.
    fn import_module(&mut self, module: &str) -> Result<Value, ScriptError>;
}

/// Names resolved before scope variables and tools.
const BUILTINS: &[&str] = &[
    "print", "len", "str", "range", "sum", "min", "max", "sorted", "type", "parallel_map",
];

/// Run a parsed program against a scope and host.
pub fn run(stmts: &[Stmt], scope: &mut Scope, host: &mut dyn HostEnv) -> Result<(), ScriptError> {
    let mut interp = Interpreter { scope, host };
    match interp.exec_block(stmts)? {
        Flow::Normal => Ok(()),
        Flow::Break => Err(ScriptError::syntax_error("'break' outside of a loop")),
        Flow::Continue => Err(ScriptError::syntax_error("'continue' outside of a loop")),
    }
}

enum Flow {
    Normal,
    Break,
    Continue,
}

struct Interpreter<'a> {
    scope: &'a mut Scope,
    host: &'a mut dyn HostEnv,
}

impl Interpreter<'_> {
    fn exec_block(&mut self, stmts: &[Stmt]) -> Result<Flow, ScriptError> {
        for stmt in stmts {
            match self.exec_stmt(stmt)? {
                Flow::Normal => {}
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_stmt(&mut self, stmt: &Stmt) -> Result<Flow, ScriptError> {
        match stmt {
            Stmt::Expr(expr) => {
                let _ = self.eval(expr)?;
                Ok(Flow::Normal)
            }
            Stmt::Assign { target, value } => {
                let value = self.eval(value)?;
                match target {
                    Target::Name(name) => {
                        let _ = self.scope.insert(name.clone(), value);
                    }
                    Target::Index { target, index } => {
                        self.assign_index(target, index, value)?;
                    }
                }
                Ok(Flow::Normal)
            }
            Stmt::If { branches, else_body } => {
                for (cond, body) in branches {
                    if self.eval(cond)?.truthy() {
                        return self.exec_block(body);
                    }
                }
                if let Some(body) = else_body {
                    return self.exec_block(body);
                }
                Ok(Flow::Normal)
            }
            Stmt::For { var, iter, body } => {
                let items = self.iterate(iter)?;
                for item in items {
                    let _ = self.scope.insert(var.clone(), item);
                    match self.exec_block(body)? {
                        Flow::Normal | Flow::Continue => {}
                        Flow::Break => break,
                    }
                }
                Ok(Flow::Normal)
            }
            Stmt::While { cond, body } => {
                while self.eval(cond)?.truthy() {
                    match self.exec_block(body)? {
                        Flow::Normal | Flow::Continue => {}
                        Flow::Break => break,
                    }
                }
                Ok(Flow::Normal)
            }
            Stmt::Import { module } => {
                let value = self.host.import_module(module)?;
                let root = module.split('.').next().unwrap_or(module);
                let _ = self.scope.insert(root.to_string(), value);
                Ok(Flow::Normal)
            }
            Stmt::Break => Ok(Flow::Break),
            Stmt::Continue => Ok(Flow::Continue),
        }
    }

    fn iterate(&mut self, iter: &Expr) -> Result<Vec<Value>, ScriptError> {
        match self.eval(iter)? {
            Value::List(items) => Ok(items),
            Value::Str(s) => Ok(s.chars().map(|c| Value::Str(c.to_string())).collect()),
            Value::Map(entries) => Ok(entries.keys().cloned().map(Value::Str).collect()),
            other => Err(ScriptError::type_error(format!(
                "'{}' is not iterable",
                other.type_name()
            ))),
        }
    }

    // ── assignment ──

    fn assign_index(
        &mut self,
        target: &Expr,
        index: &Expr,
        value: Value,
    ) -> Result<(), ScriptError> {
        // Evaluate the index path first; the mutable walk happens after.
        let mut path = vec![self.eval(index)?];
        let mut cursor = target;
        let name = loop {
            match cursor {
                Expr::Name(name) => break name.clone(),
                Expr::Index { target, index } => {
                    path.push(self.eval(index)?);
                    cursor = target;
                }
                other => {
                    return Err(ScriptError::type_error(format!(
                        "cannot assign into {other:?}"
                    )));
                }
            }
        };
        path.reverse();

        let mut slot = self
            .scope
            .get_mut(&name)
            .ok_or_else(|| ScriptError::name_error(&name))?;
        for step in &path[..path.len() - 1] {
            slot = index_mut(slot, step)?;
        }
        set_index(slot, &path[path.len() - 1], value)
    }

    // ── expressions ──

    fn eval(&mut self, expr: &Expr) -> Result<Value, ScriptError> {
        match expr {
            Expr::Literal(lit) => Ok(match lit {
                Lit::Null => Value::Null,
                Lit::Bool(b) => Value::Bool(*b),
                Lit::Int(n) => Value::Int(*n),
                Lit::Float(f) => Value::Float(*f),
                Lit::Str(s) => Value::Str(s.clone()),
            }),
            Expr::Name(name) => self
                .scope
                .get(name)
                .cloned()
                .ok_or_else(|| ScriptError::name_error(name)),
            Expr::List(items) => {
                let values = items
                    .iter()
                    .map(|item| self.eval(item))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Value::List(values))
            }
            Expr::Map(entries) => {
                let mut map = std::collections::BTreeMap::new();
                for (key, value) in entries {
                    let key = match self.eval(key)? {
                        Value::Str(s) => s,
                        other => {
                            return Err(ScriptError::type_error(format!(
                                "map keys must be strings, got {}",
                                other.type_name()
                            )));
                        }
                    };
                    let _ = map.insert(key, self.eval(value)?);
                }
                Ok(Value::Map(map))
            }
            Expr::Unary { op, expr } => {
                let value = self.eval(expr)?;
                match op {
                    UnOp::Not => Ok(Value::Bool(!value.truthy())),
                    UnOp::Neg => match value {
                        Value::Int(n) => n
                            .checked_neg()
                            .map(Value::Int)
                            .ok_or_else(|| ScriptError::value_error("integer overflow")),
                        Value::Float(f) => Ok(Value::Float(-f)),
                        other => Err(ScriptError::type_error(format!(
                            "cannot negate {}",
                            other.type_name()
                        ))),
                    },
                }
            }
            Expr::Binary { op: BinOp::And, lhs, rhs } => {
                let lhs = self.eval(lhs)?;
                if lhs.truthy() { self.eval(rhs) } else { Ok(lhs) }
            }
            Expr::Binary { op: BinOp::Or, lhs, rhs } => {
                let lhs = self.eval(lhs)?;
                if lhs.truthy() { Ok(lhs) } else { self.eval(rhs) }
            }
            Expr::Binary { op, lhs, rhs } => {
                let lhs = self.eval(lhs)?;
                let rhs = self.eval(rhs)?;
                binary(*op, lhs, rhs)
            }
            Expr::Index { target, index } => {
                let container = self.eval(target)?;
                let index = self.eval(index)?;
                index_value(&container, &index)
            }
            Expr::Attr { target, name } => {
                let object = self.eval(target)?;
                attr_value(&object, name)
            }
            Expr::Call { callee, args, kwargs } => self.eval_call(callee, args, kwargs),
        }
    }

    fn eval_call(
        &mut self,
        callee: &Expr,
        args: &[Expr],
        kwargs: &[(String, Expr)],
    ) -> Result<Value, ScriptError> {
        match callee {
            Expr::Name(name) => self.call_named(name, args, kwargs),
            Expr::Attr { target, name } => {
                let object = self.eval(target)?;
                match object {
                    Value::Module(module) => {
                        let args = self.eval_args(args)?;
                        call_module(module, name, &args)
                    }
                    other => Err(ScriptError::type_error(format!(
                        "'{}' object has no method '{name}'",
                        other.type_name()
                    ))),
                }
            }
            other => {
                let value = self.eval(other)?;
                Err(ScriptError::type_error(format!(
                    "'{}' is not callable",
                    value.type_name()
                )))
            }
        }
    }

    fn eval_args(&mut self, args: &[Expr]) -> Result<Vec<Value>, ScriptError> {
        args.iter().map(|arg| self.eval(arg)).collect()
    }

    fn call_named(
        &mut self,
        name: &str,
        args: &[Expr],
        kwargs: &[(String, Expr)],
    ) -> Result<Value, ScriptError> {
        if BUILTINS.contains(&name) {
            return self.call_builtin(name, args, kwargs);
        }
        if self.host.is_tool(name) {
            if args.len() > 1 {
                return Err(ScriptError::type_error(format!(
                    "tool '{name}' takes at most one positional argument, got {}",
                    args.len()
                )));
            }
            let positional = match args.first() {
                Some(arg) => Some(self.eval(arg)?.to_json()?),
                None => None,
            };
            let mut kw = serde_json::Map::new();
            for (key, expr) in kwargs {
                let _ = kw.insert(key.clone(), self.eval(expr)?.to_json()?);
            }
            return self.host.call_tool(name, positional, kw);
        }
        if let Some(value) = self.scope.get(name) {
            return Err(ScriptError::type_error(format!(
                "'{name}' ({}) is not callable",
                value.type_name()
            )));
        }
        Err(ScriptError::name_error(name))
    }

    fn call_builtin(
        &mut self,
        name: &str,
        args: &[Expr],
        kwargs: &[(String, Expr)],
    ) -> Result<Value, ScriptError> {
        if name == "parallel_map" {
            return self.call_parallel_map(args, kwargs);
        }
        if !kwargs.is_empty() {
            return Err(ScriptError::type_error(format!(
                "{name}() takes no keyword arguments"
            )));
        }
        let args = self.eval_args(args)?;
        match name {
            "print" => {
                let line = args
                    .iter()
                    .map(Value::display)
                    .collect::<Vec<_>>()
                    .join(" ");
                self.host.print_line(&line);
                Ok(Value::Null)
            }
            "len" => match args.as_slice() {
                [Value::Str(s)] => Ok(Value::Int(s.chars().count() as i64)),
                [Value::List(items)] => Ok(Value::Int(items.len() as i64)),
                [Value::Map(entries)] => Ok(Value::Int(entries.len() as i64)),
                [other] => Err(ScriptError::type_error(format!(
                    "len() does not support {}",
                    other.type_name()
                ))),
                _ => Err(ScriptError::type_error("len() takes exactly one argument")),
            },
            "str" => match args.as_slice() {
                [value] => Ok(Value::Str(value.display())),
                _ => Err(ScriptError::type_error("str() takes exactly one argument")),
            },
            "type" => match args.as_slice() {
                [value] => Ok(Value::Str(value.type_name().to_string())),
                _ => Err(ScriptError::type_error("type() takes exactly one argument")),
            },
            "range" => builtin_range(&args),
            "sum" => builtin_sum(&args),
            "min" => builtin_min_max(&args, true),
            "max" => builtin_min_max(&args, false),
            "sorted" => builtin_sorted(&args),
            _ => Err(ScriptError::name_error(name)),
        }
    }

    fn call_parallel_map(
        &mut self,
        args: &[Expr],
        kwargs: &[(String, Expr)],
    ) -> Result<Value, ScriptError> {
        let args = self.eval_args(args)?;
        let (tool_name, payloads) = match args.as_slice() {
            [Value::Str(tool), Value::List(items)] => (tool.clone(), items.clone()),
            _ => {
                return Err(ScriptError::type_error(
                    "parallel_map(tool_name, payloads) takes a tool name and a payload list",
                ));
            }
        };
        let mut max_workers = None;
        for (key, expr) in kwargs {
            match key.as_str() {
                "max_workers" => match self.eval(expr)? {
                    Value::Int(n) if n > 0 => max_workers = Some(n as usize),
                    other => {
                        return Err(ScriptError::type_error(format!(
                            "max_workers must be a positive int, got {}",
                            other.repr()
                        )));
                    }
                },
                other => {
                    return Err(ScriptError::type_error(format!(
                        "parallel_map() got an unexpected keyword argument '{other}'"
                    )));
                }
            }
        }
        let payloads = payloads
            .iter()
            .map(Value::to_json)
            .collect::<Result<Vec<_>, _>>()?;
        self.host.parallel_map(&tool_name, payloads, max_workers)
    }
}

// ── operators ──

fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Int(n) => Some(*n as f64),
        Value::Float(f) => Some(*f),
        _ => None,
    }
}

fn values_equal(lhs: &Value, rhs: &Value) -> bool {
    match (as_f64(lhs), as_f64(rhs)) {
        (Some(a), Some(b)) => a == b,
        _ => lhs == rhs,
    }
}

fn compare(lhs: &Value, rhs: &Value) -> Result<Ordering, ScriptError> {
    match (lhs, rhs) {
        (Value::Int(a), Value::Int(b)) => Ok(a.cmp(b)),
        (Value::Str(a), Value::Str(b)) => Ok(a.cmp(b)),
        _ => match (as_f64(lhs), as_f64(rhs)) {
            (Some(a), Some(b)) => a.partial_cmp(&b).ok_or_else(|| {
                ScriptError::value_error("cannot order NaN")
            }),
            _ => Err(ScriptError::type_error(format!(
                "cannot compare {} with {}",
                lhs.type_name(),
                rhs.type_name()
            ))),
        },
    }
}

fn arith_error(op: &str, lhs: &Value, rhs: &Value) -> ScriptError {
    ScriptError::type_error(format!(
        "unsupported operands for '{op}': {} and {}",
        lhs.type_name(),
        rhs.type_name()
    ))
}

fn binary(op: BinOp, lhs: Value, rhs: Value) -> Result<Value, ScriptError> {
    match op {
        BinOp::Add => match (&lhs, &rhs) {
            (Value::Int(a), Value::Int(b)) => a
                .checked_add(*b)
                .map(Value::Int)
                .ok_or_else(|| ScriptError::value_error("integer overflow")),
            (Value::Str(a), Value::Str(b)) => Ok(Value::Str(format!("{a}{b}"))),
            (Value::List(a), Value::List(b)) => {
                let mut out = a.clone();
                out.extend(b.iter().cloned());
                Ok(Value::List(out))
            }
            _ => match (as_f64(&lhs), as_f64(&rhs)) {
                (Some(a), Some(b)) => Ok(Value::Float(a + b)),
                _ => Err(arith_error("+", &lhs, &rhs)),
            },
        },
        BinOp::Sub => match (&lhs, &rhs) {
            (Value::Int(a), Value::Int(b)) => a
                .checked_sub(*b)
                .map(Value::Int)
                .ok_or_else(|| ScriptError::value_error("integer overflow")),
            _ => match (as_f64(&lhs), as_f64(&rhs)) {
                (Some(a), Some(b)) => Ok(Value::Float(a - b)),
                _ => Err(arith_error("-", &lhs, &rhs)),
            },
        },
        BinOp::Mul => match (&lhs, &rhs) {
            (Value::Int(a), Value::Int(b)) => a
                .checked_mul(*b)
                .map(Value::Int)
                .ok_or_else(|| ScriptError::value_error("integer overflow")),
            _ => match (as_f64(&lhs), as_f64(&rhs)) {
                (Some(a), Some(b)) => Ok(Value::Float(a * b)),
                _ => Err(arith_error("*", &lhs, &rhs)),
            },
        },
        BinOp::Div => match (as_f64(&lhs), as_f64(&rhs)) {
            (Some(_), Some(b)) if b == 0.0 => Err(ScriptError::value_error("division by zero")),
            (Some(a), Some(b)) => Ok(Value::Float(a / b)),
            _ => Err(arith_error("/", &lhs, &rhs)),
        },
        BinOp::Mod => match (&lhs, &rhs) {
            (Value::Int(_), Value::Int(0)) => Err(ScriptError::value_error("division by zero")),
            (Value::Int(a), Value::Int(b)) => Ok(Value::Int(a.rem_euclid(*b))),
            _ => match (as_f64(&lhs), as_f64(&rhs)) {
                (Some(_), Some(b)) if b == 0.0 => {
                    Err(ScriptError::value_error("division by zero"))
                }
                (Some(a), Some(b)) => Ok(Value::Float(a % b)),
                _ => Err(arith_error("%", &lhs, &rhs)),
            },
        },
        BinOp::Eq => Ok(Value::Bool(values_equal(&lhs, &rhs))),
        BinOp::Ne => Ok(Value::Bool(!values_equal(&lhs, &rhs))),
        BinOp::Lt => Ok(Value::Bool(compare(&lhs, &rhs)? == Ordering::Less)),
        BinOp::Le => Ok(Value::Bool(compare(&lhs, &rhs)? != Ordering::Greater)),
        BinOp::Gt => Ok(Value::Bool(compare(&lhs, &rhs)? == Ordering::Greater)),
        BinOp::Ge => Ok(Value::Bool(compare(&lhs, &rhs)? != Ordering::Less)),
        BinOp::In => match (&lhs, &rhs) {
            (Value::Str(needle), Value::Str(haystack)) => {
                Ok(Value::Bool(haystack.contains(needle.as_str())))
            }
            (needle, Value::List(items)) => {
                Ok(Value::Bool(items.iter().any(|item| values_equal(item, needle))))
            }
            (Value::Str(key), Value::Map(entries)) => {
                Ok(Value::Bool(entries.contains_key(key)))
            }
            _ => Err(arith_error("in", &lhs, &rhs)),
        },
        BinOp::And | BinOp::Or => Err(ScriptError::type_error(
            "short-circuit operator reached strict evaluation",
        )),
    }
}

// ── indexing and attributes ──

fn list_offset(len: usize, index: i64) -> Result<usize, ScriptError> {
    let adjusted = if index < 0 { index + len as i64 } else { index };
    if adjusted < 0 || adjusted as usize >= len {
        return Err(ScriptError::value_error(format!(
            "index {index} out of range for length {len}"
        )));
    }
    Ok(adjusted as usize)
}

fn index_value(container: &Value, index: &Value) -> Result<Value, ScriptError> {
    match (container, index) {
        (Value::List(items), Value::Int(i)) => {
            Ok(items[list_offset(items.len(), *i)?].clone())
        }
        (Value::Str(s), Value::Int(i)) => {
            let chars: Vec<char> = s.chars().collect();
            Ok(Value::Str(chars[list_offset(chars.len(), *i)?].to_string()))
        }
        (Value::Map(entries), Value::Str(key)) => entries
            .get(key)
            .cloned()
            .ok_or_else(|| ScriptError::value_error(format!("key not found: '{key}'"))),
        _ => Err(ScriptError::type_error(format!(
            "cannot index {} with {}",
            container.type_name(),
            index.type_name()
        ))),
    }
}

fn index_mut<'a>(container: &'a mut Value, index: &Value) -> Result<&'a mut Value, ScriptError> {
    match (container, index) {
        (Value::List(items), Value::Int(i)) => {
            let offset = list_offset(items.len(), *i)?;
            Ok(&mut items[offset])
        }
        (Value::Map(entries), Value::Str(key)) => entries
            .get_mut(key)
            .ok_or_else(|| ScriptError::value_error(format!("key not found: '{key}'"))),
        (container, index) => Err(ScriptError::type_error(format!(
            "cannot index {} with {}",
            container.type_name(),
            index.type_name()
        ))),
    }
}

fn set_index(container: &mut Value, index: &Value, value: Value) -> Result<(), ScriptError> {
    match (container, index) {
        (Value::List(items), Value::Int(i)) => {
            let offset = list_offset(items.len(), *i)?;
            items[offset] = value;
            Ok(())
        }
        (Value::Map(entries), Value::Str(key)) => {
            let _ = entries.insert(key.clone(), value);
            Ok(())
        }
        (container, index) => Err(ScriptError::type_error(format!(
            "cannot assign into {} with {}",
            container.type_name(),
            index.type_name()
        ))),
    }
}

fn attr_value(object: &Value, name: &str) -> Result<Value, ScriptError> {
    match object {
        Value::Module("math") => match name {
            "pi" => Ok(Value::Float(std::f64::consts::PI)),
            "e" => Ok(Value::Float(std::f64::consts::E)),
            _ => Err(ScriptError::type_error(format!(
                "module 'math' has no attribute '{name}'"
            ))),
        },
        Value::Module(module) => Err(ScriptError::type_error(format!(
            "module '{module}' has no attribute '{name}'"
        ))),
        // Result-value sugar: `r.status` reads like `r["status"]`.
        Value::Map(entries) => entries
            .get(name)
            .cloned()
            .ok_or_else(|| ScriptError::value_error(format!("key not found: '{name}'"))),
        other => Err(ScriptError::type_error(format!(
            "'{}' object has no attribute '{name}'",
            other.type_name()
        ))),
    }
}

// ── native modules ──

fn call_module(module: &str, function: &str, args: &[Value]) -> Result<Value, ScriptError> {
    match (module, function) {
        ("math", "sqrt") => match args {
            [value] => match as_f64(value) {
                Some(f) if f >= 0.0 => Ok(Value::Float(f.sqrt())),
                Some(_) => Err(ScriptError::value_error("sqrt of a negative number")),
                None => Err(ScriptError::type_error("sqrt() expects a number")),
            },
            _ => Err(ScriptError::type_error("sqrt() takes exactly one argument")),
        },
        ("math", "floor") => math_round(args, f64::floor),
        ("math", "ceil") => math_round(args, f64::ceil),
        ("math", "abs") => match args {
            [Value::Int(n)] => Ok(Value::Int(n.abs())),
            [Value::Float(f)] => Ok(Value::Float(f.abs())),
            _ => Err(ScriptError::type_error("abs() expects one number")),
        },
        ("json", "dumps") => match args {
            [value] => {
                let json = value.to_json()?;
                serde_json::to_string(&json)
                    .map(Value::Str)
                    .map_err(|e| ScriptError::value_error(format!("cannot serialize: {e}")))
            }
            _ => Err(ScriptError::type_error("dumps() takes exactly one argument")),
        },
        ("json", "loads") => match args {
            [Value::Str(text)] => serde_json::from_str::<serde_json::Value>(text)
                .map(Value::from_json)
                .map_err(|e| ScriptError::value_error(format!("invalid JSON: {e}"))),
            _ => Err(ScriptError::type_error("loads() takes one string argument")),
        },
        _ => Err(ScriptError::type_error(format!(
            "module '{module}' has no function '{function}'"
        ))),
    }
}

fn math_round(args: &[Value], round: fn(f64) -> f64) -> Result<Value, ScriptError> {
    match args {
        [value] => match as_f64(value) {
            Some(f) => Ok(Value::Int(round(f) as i64)),
            None => Err(ScriptError::type_error("expected a number")),
        },
        _ => Err(ScriptError::type_error("expected exactly one argument")),
    }
}

// ── builtins over evaluated args ──

fn builtin_range(args: &[Value]) -> Result<Value, ScriptError> {
    let ints: Vec<i64> = args
        .iter()
        .map(|value| match value {
            Value::Int(n) => Ok(*n),
            other => Err(ScriptError::type_error(format!(
                "range() expects ints, got {}",
                other.type_name()
            ))),
        })
        .collect::<Result<_, _>>()?;
    let (start, stop, step) = match ints.as_slice() {
        [stop] => (0, *stop, 1),
        [start, stop] => (*start, *stop, 1),
        [start, stop, step] => (*start, *stop, *step),
        _ => {
            return Err(ScriptError::type_error(
                "range() takes between one and three arguments",
            ));
        }
    };
    if step == 0 {
        return Err(ScriptError::value_error("range() step must not be zero"));
    }
    let mut items = Vec::new();
    let mut current = start;
    while (step > 0 && current < stop) || (step < 0 && current > stop) {
        items.push(Value::Int(current));
        current += step;
    }
    Ok(Value::List(items))
}

fn builtin_sum(args: &[Value]) -> Result<Value, ScriptError> {
    let [Value::List(items)] = args else {
        return Err(ScriptError::type_error("sum() takes one list argument"));
    };
    let mut int_total = 0i64;
    let mut float_total = 0f64;
    let mut saw_float = false;
    for item in items {
        match item {
            Value::Int(n) => {
                int_total = int_total
                    .checked_add(*n)
                    .ok_or_else(|| ScriptError::value_error("integer overflow"))?;
            }
            Value::Float(f) => {
                saw_float = true;
                float_total += f;
            }
            other => {
                return Err(ScriptError::type_error(format!(
                    "sum() expects numbers, got {}",
                    other.type_name()
                )));
            }
        }
    }
    if saw_float {
        Ok(Value::Float(float_total + int_total as f64))
    } else {
        Ok(Value::Int(int_total))
    }
}

fn builtin_min_max(args: &[Value], want_min: bool) -> Result<Value, ScriptError> {
    let name = if want_min { "min" } else { "max" };
    let items: Vec<Value> = match args {
        [Value::List(items)] => items.clone(),
        [] | [_] => {
            return Err(ScriptError::type_error(format!(
                "{name}() takes a list or several arguments"
            )));
        }
        many => many.to_vec(),
    };
    let Some(mut best) = items.first().cloned() else {
        return Err(ScriptError::value_error(format!("{name}() of an empty list")));
    };
    for item in &items[1..] {
        let ordering = compare(item, &best)?;
        let better = if want_min {
            ordering == Ordering::Less
        } else {
            ordering == Ordering::Greater
        };
        if better {
            best = item.clone();
        }
    }
    Ok(best)
}

fn builtin_sorted(args: &[Value]) -> Result<Value, ScriptError> {
    let [Value::List(items)] = args else {
        return Err(ScriptError::type_error("sorted() takes one list argument"));
    };
    let mut out = items.clone();
    let mut failure: Option<ScriptError> = None;
    out.sort_by(|a, b| match compare(a, b) {
        Ok(ordering) => ordering,
        Err(error) => {
            if failure.is_none() {
                failure = Some(error);
            }
            Ordering::Equal
        }
    });
    match failure {
        Some(error) => Err(error),
        None => Ok(Value::List(out)),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
