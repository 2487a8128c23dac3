//! Tree-walking evaluator and the fixed built-in function set
//!
//! Evaluation is pure and synchronous over a [`Scope`] snapshot: the engine
//! captures variables, context and node results once, then the evaluator
//! never touches shared state. This keeps expressions deterministic and free
//! of host-language evaluation.
//!
//! # Semantics
//!
//! - Numbers are IEEE-754 doubles; non-finite results and division by zero
//!   are evaluation errors.
//! - String comparison is lexicographic on Unicode code points.
//! - `&&` / `||` short-circuit; operands are coerced with truthiness rules
//!   (non-empty string / non-zero number / non-empty collection are true)
//!   that apply to logic operators only.
//! - `==` / `!=` attempt one numeric coercion (string↔number, bool↔number);
//!   `null` only equals `null`; remaining type mismatches compare unequal.
//! - Missing object fields and out-of-range indexes read as `null`; field
//!   access on a non-object is an error.
//!
//! Only the functions in [`BUILTIN_NAMES`] are callable; every other name
//! resolves through the scope as a value.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::{Map, Value};

use crate::error::{Result, WorkflowError};
use crate::expr::ast::{BinaryOp, Expr, ExprKind, Literal, UnaryOp};

/// Names of every callable built-in, used by validation and docs
pub const BUILTIN_NAMES: &[&str] = &[
    "len",
    "contains",
    "startsWith",
    "endsWith",
    "matches",
    "parseInt",
    "parseFloat",
    "toString",
    "upper",
    "lower",
    "trim",
    "pow",
    "sqrt",
    "abs",
    "floor",
    "ceil",
    "round",
    "min",
    "max",
    "sum",
    "avg",
    "map",
    "sort",
    "slice",
    "unique",
    "reverse",
    "flatten",
    "zip",
    "sample",
    "now",
];

/// Compile-size cap for `matches` patterns; the regex engine itself is
/// linear-time in the input, so bounding the compiled program bounds the call.
const REGEX_SIZE_LIMIT: usize = 1 << 20;

/// Default per-call evaluation budget for `matches`
const DEFAULT_REGEX_BUDGET: Duration = Duration::from_millis(100);

/// Shared compiled-pattern cache for the `matches` builtin
///
/// One instance lives per run (the execution context shares it across every
/// scope it builds), so each pattern compiles once no matter how many
/// elements an iteration node evaluates it against.
#[derive(Debug, Default)]
pub struct RegexCache {
    inner: Mutex<HashMap<String, Arc<regex::Regex>>>,
}

impl RegexCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch or compile `pattern`, reporting compile errors at `pos`
    fn get(&self, pattern: &str, pos: usize) -> Result<Arc<regex::Regex>> {
        if let Ok(cache) = self.inner.lock() {
            if let Some(hit) = cache.get(pattern) {
                return Ok(hit.clone());
            }
        }
        let compiled = regex::RegexBuilder::new(pattern)
            .size_limit(REGEX_SIZE_LIMIT)
            .build()
            .map_err(|e| WorkflowError::eval_at(format!("invalid pattern: {}", e), pos))?;
        let compiled = Arc::new(compiled);
        if let Ok(mut cache) = self.inner.lock() {
            cache
                .entry(pattern.to_string())
                .or_insert_with(|| compiled.clone());
        }
        Ok(compiled)
    }
}

/// Evaluation environment snapshot
///
/// Cheap to build per node execution; iteration nodes derive child scopes
/// with `item` / `index` / `items` rebound.
pub struct Scope {
    /// Direct bindings: `input`, `item`, `index`, `items`, `accumulator`
    bindings: HashMap<String, Value>,
    /// Snapshot of workflow variables (`variables.*`)
    variables: Map<String, Value>,
    /// Snapshot of context vars and constants (`context.*`)
    context: Map<String, Value>,
    /// Snapshot of node results (`node.<id>.*`)
    nodes: Map<String, Value>,
    /// Shared rng for `sample`; seeded when deterministic replay is wanted
    rng: Mutex<StdRng>,
    /// Compiled `matches` patterns, shared across the run
    regexes: Arc<RegexCache>,
    /// Per-call evaluation budget for `matches`
    regex_budget: Duration,
}

impl Scope {
    pub fn new() -> Self {
        Self {
            bindings: HashMap::new(),
            variables: Map::new(),
            context: Map::new(),
            nodes: Map::new(),
            rng: Mutex::new(StdRng::from_entropy()),
            regexes: Arc::new(RegexCache::new()),
            regex_budget: DEFAULT_REGEX_BUDGET,
        }
    }

    /// Scope with a fixed `sample` seed
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            ..Self::new()
        }
    }

    /// Cap the wall-clock cost of a single `matches` call
    pub fn with_regex_budget(mut self, budget: Duration) -> Self {
        self.regex_budget = budget;
        self
    }

    /// Share a compiled-pattern cache (per run) instead of a private one
    pub fn with_regex_cache(mut self, cache: Arc<RegexCache>) -> Self {
        self.regexes = cache;
        self
    }

    pub fn bind(mut self, name: &str, value: Value) -> Self {
        self.bindings.insert(name.to_string(), value);
        self
    }

    pub fn with_input(self, value: Value) -> Self {
        self.bind("input", value)
    }

    pub fn with_variables(mut self, variables: Map<String, Value>) -> Self {
        self.variables = variables;
        self
    }

    pub fn with_context(mut self, context: Map<String, Value>) -> Self {
        self.context = context;
        self
    }

    pub fn with_nodes(mut self, nodes: Map<String, Value>) -> Self {
        self.nodes = nodes;
        self
    }

    /// Rebind the iteration variables, keeping everything else shared
    pub fn iteration(&self, item: Value, index: usize, items: Value) -> Scope {
        let mut bindings = self.bindings.clone();
        bindings.insert("item".into(), item);
        bindings.insert("index".into(), Value::from(index as f64));
        bindings.insert("items".into(), items);
        Scope {
            bindings,
            variables: self.variables.clone(),
            context: self.context.clone(),
            nodes: self.nodes.clone(),
            rng: Mutex::new(match self.rng.lock() {
                Ok(mut rng) => StdRng::seed_from_u64(rng.gen()),
                Err(_) => StdRng::from_entropy(),
            }),
            regexes: self.regexes.clone(),
            regex_budget: self.regex_budget,
        }
    }

    /// Rebind the reduce accumulator
    pub fn with_accumulator(mut self, value: Value) -> Self {
        self.bindings.insert("accumulator".into(), value);
        self
    }

    fn resolve(&self, name: &str, pos: usize) -> Result<Value> {
        if let Some(v) = self.bindings.get(name) {
            return Ok(v.clone());
        }
        match name {
            "variables" => Ok(Value::Object(self.variables.clone())),
            "context" => Ok(Value::Object(self.context.clone())),
            "node" => Ok(Value::Object(self.nodes.clone())),
            _ => Err(WorkflowError::eval_at(
                format!("undefined identifier '{}'", name),
                pos,
            )),
        }
    }

    fn sample_index(&self, len: usize) -> usize {
        match self.rng.lock() {
            Ok(mut rng) => rng.gen_range(0..len),
            Err(_) => 0,
        }
    }
}

impl Default for Scope {
    fn default() -> Self {
        Self::new()
    }
}

/// Evaluate a parsed expression against a scope
pub fn evaluate(expr: &Expr, scope: &Scope) -> Result<Value> {
    match &expr.kind {
        ExprKind::Literal(lit) => Ok(match lit {
            Literal::Number(n) => number(*n, expr.pos)?,
            Literal::Str(s) => Value::String(s.clone()),
            Literal::Bool(b) => Value::Bool(*b),
            Literal::Null => Value::Null,
        }),

        ExprKind::Ident(name) => scope.resolve(name, expr.pos),

        ExprKind::Field { object, name } => {
            let target = evaluate(object, scope)?;
            match target {
                Value::Object(map) => Ok(map.get(name).cloned().unwrap_or(Value::Null)),
                other => Err(WorkflowError::eval_at(
                    format!("cannot read field '{}' of {}", name, type_name(&other)),
                    expr.pos,
                )),
            }
        }

        ExprKind::Index { object, index } => {
            let target = evaluate(object, scope)?;
            let key = evaluate(index, scope)?;
            index_value(&target, &key, expr.pos)
        }

        ExprKind::Unary { op, operand } => {
            let value = evaluate(operand, scope)?;
            match op {
                UnaryOp::Not => Ok(Value::Bool(!truthy(&value))),
                UnaryOp::Neg => match value.as_f64() {
                    Some(n) => number(-n, expr.pos),
                    None => Err(WorkflowError::eval_at(
                        format!("cannot negate {}", type_name(&value)),
                        expr.pos,
                    )),
                },
            }
        }

        ExprKind::Binary { op, left, right } => eval_binary(*op, left, right, scope, expr.pos),

        ExprKind::Call { function, args } => eval_call(function, args, scope, expr.pos),

        ExprKind::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(evaluate(item, scope)?);
            }
            Ok(Value::Array(out))
        }
    }
}

fn eval_binary(
    op: BinaryOp,
    left: &Expr,
    right: &Expr,
    scope: &Scope,
    pos: usize,
) -> Result<Value> {
    // Short-circuit forms first; their operands coerce with truthiness.
    match op {
        BinaryOp::And => {
            let l = evaluate(left, scope)?;
            if !truthy(&l) {
                return Ok(Value::Bool(false));
            }
            let r = evaluate(right, scope)?;
            return Ok(Value::Bool(truthy(&r)));
        }
        BinaryOp::Or => {
            let l = evaluate(left, scope)?;
            if truthy(&l) {
                return Ok(Value::Bool(true));
            }
            let r = evaluate(right, scope)?;
            return Ok(Value::Bool(truthy(&r)));
        }
        _ => {}
    }

    let l = evaluate(left, scope)?;
    let r = evaluate(right, scope)?;

    match op {
        BinaryOp::Eq => Ok(Value::Bool(loose_eq(&l, &r))),
        BinaryOp::Ne => Ok(Value::Bool(!loose_eq(&l, &r))),

        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let ordering = compare(&l, &r, pos)?;
            let verdict = match op {
                BinaryOp::Lt => ordering.is_lt(),
                BinaryOp::Le => ordering.is_le(),
                BinaryOp::Gt => ordering.is_gt(),
                _ => ordering.is_ge(),
            };
            Ok(Value::Bool(verdict))
        }

        BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => {
            let (a, b) = match (l.as_f64(), r.as_f64()) {
                (Some(a), Some(b)) => (a, b),
                _ => return Err(type_mismatch(op, &l, &r, pos)),
            };
            match op {
                BinaryOp::Add => number(a + b, pos),
                BinaryOp::Sub => number(a - b, pos),
                BinaryOp::Mul => number(a * b, pos),
                BinaryOp::Div => {
                    if b == 0.0 {
                        Err(WorkflowError::eval_at("division by zero", pos))
                    } else {
                        number(a / b, pos)
                    }
                }
                _ => {
                    if b == 0.0 {
                        Err(WorkflowError::eval_at("modulo by zero", pos))
                    } else {
                        number(a % b, pos)
                    }
                }
            }
        }

        BinaryOp::And | BinaryOp::Or => unreachable!("handled above"),
    }
}

fn eval_call(function: &str, args: &[Expr], scope: &Scope, pos: usize) -> Result<Value> {
    // `map` evaluates its second argument lazily, once per element.
    if function == "map" {
        if args.len() != 2 {
            return Err(WorkflowError::eval_at("map expects (array, expression)", pos));
        }
        let array = match evaluate(&args[0], scope)? {
            Value::Array(items) => items,
            other => {
                return Err(WorkflowError::eval_at(
                    format!("map expects an array, got {}", type_name(&other)),
                    pos,
                ))
            }
        };
        let items = Value::Array(array.clone());
        let mut out = Vec::with_capacity(array.len());
        for (i, item) in array.into_iter().enumerate() {
            let child = scope.iteration(item, i, items.clone());
            out.push(evaluate(&args[1], &child)?);
        }
        return Ok(Value::Array(out));
    }

    let mut values = Vec::with_capacity(args.len());
    for arg in args {
        values.push(evaluate(arg, scope)?);
    }
    call_builtin(function, values, scope, pos)
}

fn call_builtin(function: &str, args: Vec<Value>, scope: &Scope, pos: usize) -> Result<Value> {
    match function {
        "len" => {
            let v = one(function, &args, pos)?;
            let n = match v {
                Value::String(s) => s.chars().count(),
                Value::Array(a) => a.len(),
                Value::Object(o) => o.len(),
                other => {
                    return Err(WorkflowError::eval_at(
                        format!("len expects a string, array or object, got {}", type_name(other)),
                        pos,
                    ))
                }
            };
            number(n as f64, pos)
        }

        "contains" => {
            let (hay, needle) = two(function, &args, pos)?;
            let verdict = match (hay, needle) {
                (Value::String(s), Value::String(n)) => s.contains(n.as_str()),
                (Value::Array(a), n) => a.iter().any(|v| loose_eq(v, n)),
                (Value::Object(o), Value::String(k)) => o.contains_key(k),
                (h, _) => {
                    return Err(WorkflowError::eval_at(
                        format!("contains expects a string, array or object, got {}", type_name(h)),
                        pos,
                    ))
                }
            };
            Ok(Value::Bool(verdict))
        }

        "startsWith" => {
            let (s, p) = two_strings(function, &args, pos)?;
            Ok(Value::Bool(s.starts_with(p)))
        }

        "endsWith" => {
            let (s, p) = two_strings(function, &args, pos)?;
            Ok(Value::Bool(s.ends_with(p)))
        }

        "matches" => {
            let (s, pattern) = two_strings(function, &args, pos)?;
            let regex = scope.regexes.get(pattern, pos)?;
            // The engine is linear-time, so the budget is a backstop for
            // pathological pattern × input sizes; a call that blows it
            // fails rather than returning a late verdict.
            let started = Instant::now();
            let matched = regex.is_match(s);
            if started.elapsed() > scope.regex_budget {
                return Err(WorkflowError::eval_at(
                    format!(
                        "matches exceeded its {}ms evaluation budget",
                        scope.regex_budget.as_millis()
                    ),
                    pos,
                ));
            }
            Ok(Value::Bool(matched))
        }

        "parseInt" => {
            let v = one(function, &args, pos)?;
            let n = match v {
                Value::Number(n) => n.as_f64().unwrap_or(0.0),
                Value::String(s) => s
                    .trim()
                    .parse::<f64>()
                    .map_err(|_| WorkflowError::eval_at(format!("cannot parse '{}' as int", s), pos))?,
                other => {
                    return Err(WorkflowError::eval_at(
                        format!("parseInt expects a string or number, got {}", type_name(other)),
                        pos,
                    ))
                }
            };
            number(n.trunc(), pos)
        }

        "parseFloat" => {
            let v = one(function, &args, pos)?;
            match v {
                Value::Number(n) => number(n.as_f64().unwrap_or(0.0), pos),
                Value::String(s) => {
                    let n = s.trim().parse::<f64>().map_err(|_| {
                        WorkflowError::eval_at(format!("cannot parse '{}' as float", s), pos)
                    })?;
                    number(n, pos)
                }
                other => Err(WorkflowError::eval_at(
                    format!("parseFloat expects a string or number, got {}", type_name(other)),
                    pos,
                )),
            }
        }

        "toString" => {
            let v = one(function, &args, pos)?;
            Ok(Value::String(display(v)))
        }

        "upper" => Ok(Value::String(one_string(function, &args, pos)?.to_uppercase())),
        "lower" => Ok(Value::String(one_string(function, &args, pos)?.to_lowercase())),
        "trim" => Ok(Value::String(one_string(function, &args, pos)?.trim().to_string())),

        "pow" => {
            let (a, b) = two_numbers(function, &args, pos)?;
            number(a.powf(b), pos)
        }
        "sqrt" => {
            let a = one_number(function, &args, pos)?;
            if a < 0.0 {
                return Err(WorkflowError::eval_at("sqrt of a negative number", pos));
            }
            number(a.sqrt(), pos)
        }
        "abs" => number(one_number(function, &args, pos)?.abs(), pos),
        "floor" => number(one_number(function, &args, pos)?.floor(), pos),
        "ceil" => number(one_number(function, &args, pos)?.ceil(), pos),
        "round" => number(one_number(function, &args, pos)?.round(), pos),

        "min" | "max" => {
            let numbers = variadic_numbers(function, &args, pos)?;
            if numbers.is_empty() {
                return Err(WorkflowError::eval_at(format!("{} of nothing", function), pos));
            }
            let folded = numbers
                .into_iter()
                .reduce(|a, b| if function == "min" { a.min(b) } else { a.max(b) })
                .unwrap_or(0.0);
            number(folded, pos)
        }

        "sum" => {
            let numbers = variadic_numbers(function, &args, pos)?;
            number(numbers.iter().sum(), pos)
        }

        "avg" => {
            let numbers = variadic_numbers(function, &args, pos)?;
            if numbers.is_empty() {
                return Err(WorkflowError::eval_at("avg of an empty array", pos));
            }
            number(numbers.iter().sum::<f64>() / numbers.len() as f64, pos)
        }

        "sort" => {
            let arr = one_array(function, &args, pos)?;
            let mut out = arr.clone();
            if out.iter().all(Value::is_number) {
                out.sort_by(|a, b| {
                    a.as_f64()
                        .partial_cmp(&b.as_f64())
                        .unwrap_or(std::cmp::Ordering::Equal)
                });
            } else if out.iter().all(Value::is_string) {
                out.sort_by(|a, b| a.as_str().cmp(&b.as_str()));
            } else {
                return Err(WorkflowError::eval_at(
                    "sort expects all-numbers or all-strings",
                    pos,
                ));
            }
            Ok(Value::Array(out))
        }

        "slice" => {
            if args.len() < 2 || args.len() > 3 {
                return Err(WorkflowError::eval_at("slice expects (value, start[, end])", pos));
            }
            let start = args[1]
                .as_f64()
                .ok_or_else(|| WorkflowError::eval_at("slice start must be a number", pos))?;
            let end = match args.get(2) {
                Some(v) => Some(
                    v.as_f64()
                        .ok_or_else(|| WorkflowError::eval_at("slice end must be a number", pos))?,
                ),
                None => None,
            };
            match &args[0] {
                Value::Array(a) => {
                    let (s, e) = slice_bounds(a.len(), start, end);
                    Ok(Value::Array(a[s..e].to_vec()))
                }
                Value::String(s) => {
                    let chars: Vec<char> = s.chars().collect();
                    let (lo, hi) = slice_bounds(chars.len(), start, end);
                    Ok(Value::String(chars[lo..hi].iter().collect()))
                }
                other => Err(WorkflowError::eval_at(
                    format!("slice expects an array or string, got {}", type_name(other)),
                    pos,
                )),
            }
        }

        "unique" => {
            let arr = one_array(function, &args, pos)?;
            let mut seen = std::collections::HashSet::new();
            let mut out = Vec::new();
            for v in arr {
                let key = serde_json::to_string(v).unwrap_or_default();
                if seen.insert(key) {
                    out.push(v.clone());
                }
            }
            Ok(Value::Array(out))
        }

        "reverse" => match one(function, &args, pos)? {
            Value::Array(a) => Ok(Value::Array(a.iter().rev().cloned().collect())),
            Value::String(s) => Ok(Value::String(s.chars().rev().collect())),
            other => Err(WorkflowError::eval_at(
                format!("reverse expects an array or string, got {}", type_name(other)),
                pos,
            )),
        },

        "flatten" => {
            let arr = one_array(function, &args, pos)?;
            let mut out = Vec::new();
            for v in arr {
                match v {
                    Value::Array(inner) => out.extend(inner.iter().cloned()),
                    other => out.push(other.clone()),
                }
            }
            Ok(Value::Array(out))
        }

        "zip" => {
            let (a, b) = two(function, &args, pos)?;
            match (a, b) {
                (Value::Array(a), Value::Array(b)) => Ok(Value::Array(
                    a.iter()
                        .zip(b.iter())
                        .map(|(x, y)| Value::Array(vec![x.clone(), y.clone()]))
                        .collect(),
                )),
                _ => Err(WorkflowError::eval_at("zip expects two arrays", pos)),
            }
        }

        "sample" => {
            let arr = one_array(function, &args, pos)?;
            if arr.is_empty() {
                return Err(WorkflowError::eval_at("sample of an empty array", pos));
            }
            Ok(arr[scope.sample_index(arr.len())].clone())
        }

        "now" => {
            if !args.is_empty() {
                return Err(WorkflowError::eval_at("now takes no arguments", pos));
            }
            number(chrono::Utc::now().timestamp_millis() as f64, pos)
        }

        other => Err(WorkflowError::eval_at(
            format!("unknown function '{}'", other),
            pos,
        )),
    }
}

// ---- coercions and helpers ----

/// Truthiness for logic operators only
pub fn truthy(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|x| x != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// Equality with one numeric coercion attempt
pub fn loose_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Null, _) | (_, Value::Null) => false,
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        (Value::Number(x), Value::String(s)) | (Value::String(s), Value::Number(x)) => {
            s.trim().parse::<f64>().ok() == x.as_f64()
        }
        (Value::Number(x), Value::Bool(b)) | (Value::Bool(b), Value::Number(x)) => {
            x.as_f64() == Some(if *b { 1.0 } else { 0.0 })
        }
        (Value::String(x), Value::String(y)) => x == y,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y.iter()).all(|(l, r)| loose_eq(l, r))
        }
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len()
                && x.iter()
                    .all(|(k, v)| y.get(k).map(|w| loose_eq(v, w)).unwrap_or(false))
        }
        _ => false,
    }
}

fn compare(l: &Value, r: &Value, pos: usize) -> Result<std::cmp::Ordering> {
    match (l, r) {
        (Value::Number(a), Value::Number(b)) => {
            let (a, b) = (a.as_f64().unwrap_or(f64::NAN), b.as_f64().unwrap_or(f64::NAN));
            a.partial_cmp(&b)
                .ok_or_else(|| WorkflowError::eval_at("cannot order NaN", pos))
        }
        (Value::String(a), Value::String(b)) => Ok(a.as_str().cmp(b.as_str())),
        _ => Err(WorkflowError::eval_at(
            format!("cannot order {} against {}", type_name(l), type_name(r)),
            pos,
        )),
    }
}

fn index_value(target: &Value, key: &Value, pos: usize) -> Result<Value> {
    match (target, key) {
        (Value::Array(a), Value::Number(n)) => {
            let raw = n
                .as_f64()
                .ok_or_else(|| WorkflowError::eval_at("bad index", pos))?;
            if raw.fract() != 0.0 {
                return Err(WorkflowError::eval_at("array index must be an integer", pos));
            }
            let idx = if raw < 0.0 {
                a.len() as i64 + raw as i64
            } else {
                raw as i64
            };
            if idx < 0 || idx as usize >= a.len() {
                Ok(Value::Null)
            } else {
                Ok(a[idx as usize].clone())
            }
        }
        (Value::Object(o), Value::String(k)) => Ok(o.get(k).cloned().unwrap_or(Value::Null)),
        (Value::String(s), Value::Number(n)) => {
            let idx = n.as_f64().unwrap_or(-1.0);
            if idx < 0.0 || idx.fract() != 0.0 {
                return Ok(Value::Null);
            }
            Ok(s.chars()
                .nth(idx as usize)
                .map(|c| Value::String(c.to_string()))
                .unwrap_or(Value::Null))
        }
        _ => Err(WorkflowError::eval_at(
            format!("cannot index {} with {}", type_name(target), type_name(key)),
            pos,
        )),
    }
}

fn slice_bounds(len: usize, start: f64, end: Option<f64>) -> (usize, usize) {
    let clamp = |x: f64| -> usize {
        let v = if x < 0.0 { len as f64 + x } else { x };
        v.max(0.0).min(len as f64) as usize
    };
    let lo = clamp(start);
    let hi = end.map(clamp).unwrap_or(len);
    (lo, hi.max(lo))
}

/// Display form used by `toString` and string concatenation
pub fn display(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

pub fn type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Wrap a finite f64 as a JSON number; non-finite values are errors
fn number(n: f64, pos: usize) -> Result<Value> {
    serde_json::Number::from_f64(n)
        .map(Value::Number)
        .ok_or_else(|| WorkflowError::eval_at("arithmetic produced a non-finite number", pos))
}

fn type_mismatch(op: BinaryOp, l: &Value, r: &Value, pos: usize) -> WorkflowError {
    WorkflowError::eval_at(
        format!(
            "operator '{}' cannot combine {} and {}",
            op.describe(),
            type_name(l),
            type_name(r)
        ),
        pos,
    )
}

fn one<'a>(function: &str, args: &'a [Value], pos: usize) -> Result<&'a Value> {
    match args {
        [v] => Ok(v),
        _ => Err(WorkflowError::eval_at(
            format!("{} expects exactly one argument", function),
            pos,
        )),
    }
}

fn two<'a>(function: &str, args: &'a [Value], pos: usize) -> Result<(&'a Value, &'a Value)> {
    match args {
        [a, b] => Ok((a, b)),
        _ => Err(WorkflowError::eval_at(
            format!("{} expects exactly two arguments", function),
            pos,
        )),
    }
}

fn one_string<'a>(function: &str, args: &'a [Value], pos: usize) -> Result<&'a str> {
    one(function, args, pos)?.as_str().ok_or_else(|| {
        WorkflowError::eval_at(format!("{} expects a string", function), pos)
    })
}

fn two_strings<'a>(function: &str, args: &'a [Value], pos: usize) -> Result<(&'a str, &'a str)> {
    let (a, b) = two(function, args, pos)?;
    match (a.as_str(), b.as_str()) {
        (Some(a), Some(b)) => Ok((a, b)),
        _ => Err(WorkflowError::eval_at(
            format!("{} expects two strings", function),
            pos,
        )),
    }
}

fn one_number(function: &str, args: &[Value], pos: usize) -> Result<f64> {
    one(function, args, pos)?.as_f64().ok_or_else(|| {
        WorkflowError::eval_at(format!("{} expects a number", function), pos)
    })
}

fn two_numbers(function: &str, args: &[Value], pos: usize) -> Result<(f64, f64)> {
    let (a, b) = two(function, args, pos)?;
    match (a.as_f64(), b.as_f64()) {
        (Some(a), Some(b)) => Ok((a, b)),
        _ => Err(WorkflowError::eval_at(
            format!("{} expects two numbers", function),
            pos,
        )),
    }
}

fn one_array<'a>(function: &str, args: &'a [Value], pos: usize) -> Result<&'a Vec<Value>> {
    match one(function, args, pos)? {
        Value::Array(a) => Ok(a),
        other => Err(WorkflowError::eval_at(
            format!("{} expects an array, got {}", function, type_name(other)),
            pos,
        )),
    }
}

/// Either a single array argument or a variadic list of numbers
fn variadic_numbers(function: &str, args: &[Value], pos: usize) -> Result<Vec<f64>> {
    let items: Vec<&Value> = match args {
        [Value::Array(a)] => a.iter().collect(),
        list => list.iter().collect(),
    };
    items
        .into_iter()
        .map(|v| {
            v.as_f64().ok_or_else(|| {
                WorkflowError::eval_at(
                    format!("{} expects numbers, got {}", function, type_name(v)),
                    pos,
                )
            })
        })
        .collect()
}
