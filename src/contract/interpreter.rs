//! Tree-walking interpreter for contract programs.
//!
//! The interpreter never touches the contract store directly. Reads go through
//! a [`StateView`] of the committed state, writes are staged in the interpreter
//! and only handed back in the [`Outcome`] of a successful invocation, so a
//! fault anywhere in a call leaves no trace.

use super::ast::{BinaryOp, Expr, Function, Program, Stmt, UnaryOp};
use super::gas::{weight_cost, GasMeter, GAS_CALL, GAS_STATE_READ, GAS_STATE_WRITE, GAS_STEP};
use super::value::Value;
use super::ContractError;
use std::collections::{BTreeMap, HashMap};

pub const BUILTINS: &[&str] = &[
    "get_state",
    "set_state",
    "arg",
    "now",
    "str",
    "int",
    "len",
    "keys",
    "contains",
    "min",
    "max",
    "require",
    "fail",
];

pub const MAX_CALL_DEPTH: usize = 64;
/// Bound on nested expression evaluation across all active calls.
pub const MAX_EVAL_DEPTH: usize = 256;

/// Read access to the committed state partition of one contract.
pub trait StateView {
    fn read(&self, key: &str) -> Option<Value>;
}

impl StateView for BTreeMap<String, Value> {
    fn read(&self, key: &str) -> Option<Value> {
        self.get(key).cloned()
    }
}

/// Capabilities visible to contract code.
#[derive(Debug, Clone, Copy)]
pub struct Environment<'a> {
    pub contract_id: &'a str,
    pub caller: &'a str,
    pub args: &'a BTreeMap<String, Value>,
    /// Seconds, taken from the invoking transaction.
    pub now: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    pub output: Value,
    pub writes: BTreeMap<String, Value>,
    pub gas_used: u64,
}

enum Flow {
    Normal,
    Return(Value),
}

type Frame = HashMap<String, Value>;

fn fault(message: impl Into<String>) -> ContractError {
    ContractError::Execution(message.into())
}

pub struct Interpreter<'a> {
    program: &'a Program,
    env: Environment<'a>,
    state: &'a dyn StateView,
    writes: BTreeMap<String, Value>,
    gas: GasMeter,
    depth: usize,
    eval_depth: usize,
}

impl<'a> Interpreter<'a> {
    pub fn new(
        program: &'a Program,
        env: Environment<'a>,
        state: &'a dyn StateView,
        gas_limit: u64,
    ) -> Self {
        Self {
            program,
            env,
            state,
            writes: BTreeMap::new(),
            gas: GasMeter::new(gas_limit),
            depth: 0,
            eval_depth: 0,
        }
    }

    /// Run an exported function, binding its parameters from the call arguments by name.
    pub fn invoke(mut self, function: &str) -> Result<Outcome, ContractError> {
        let program = self.program;
        let function = program
            .function(function)
            .ok_or_else(|| ContractError::FunctionNotFound(function.to_string()))?;

        let mut frame = Frame::new();
        for param in &function.params {
            let value = self.env.args.get(param).cloned().unwrap_or_default();
            self.charge_copy(&value)?;
            frame.insert(param.clone(), value);
        }

        let output = self.run(function, frame)?;
        Ok(Outcome {
            output,
            writes: self.writes,
            gas_used: self.gas.used(),
        })
    }

    fn run(&mut self, function: &Function, mut frame: Frame) -> Result<Value, ContractError> {
        if self.depth >= MAX_CALL_DEPTH {
            return Err(fault("maximum call depth exceeded"));
        }
        self.depth += 1;
        let flow = self.exec_block(&function.body, &mut frame);
        self.depth -= 1;
        match flow? {
            Flow::Return(value) => Ok(value),
            Flow::Normal => Ok(Value::Null),
        }
    }

    fn exec_block(&mut self, statements: &[Stmt], frame: &mut Frame) -> Result<Flow, ContractError> {
        for statement in statements {
            if let Flow::Return(value) = self.exec(statement, frame)? {
                return Ok(Flow::Return(value));
            }
        }
        Ok(Flow::Normal)
    }

    fn exec(&mut self, statement: &Stmt, frame: &mut Frame) -> Result<Flow, ContractError> {
        self.gas.charge(GAS_STEP)?;
        match statement {
            Stmt::Let { name, value } => {
                let value = self.eval(value, frame)?;
                frame.insert(name.clone(), value);
            }
            Stmt::Assign { name, value } => {
                let value = self.eval(value, frame)?;
                match frame.get_mut(name) {
                    Some(slot) => *slot = value,
                    None => {
                        return Err(fault(format!(
                            "assignment to undeclared variable {}",
                            name
                        )))
                    }
                }
            }
            Stmt::If {
                branches,
                otherwise,
            } => {
                for (condition, body) in branches {
                    if self.eval(condition, frame)?.is_truthy() {
                        return self.exec_block(body, frame);
                    }
                }
                if let Some(body) = otherwise {
                    return self.exec_block(body, frame);
                }
            }
            Stmt::While { condition, body } => {
                while self.eval(condition, frame)?.is_truthy() {
                    self.gas.charge(GAS_STEP)?;
                    if let Flow::Return(value) = self.exec_block(body, frame)? {
                        return Ok(Flow::Return(value));
                    }
                }
            }
            Stmt::Return(value) => {
                let value = match value {
                    Some(expr) => self.eval(expr, frame)?,
                    None => Value::Null,
                };
                return Ok(Flow::Return(value));
            }
            Stmt::Expr(expr) => {
                self.eval(expr, frame)?;
            }
        }
        Ok(Flow::Normal)
    }

    /// Copying a value out of a variable or the state costs its weight.
    fn charge_copy(&mut self, value: &Value) -> Result<(), ContractError> {
        self.gas.charge(weight_cost(value.weight()))
    }

    fn eval(&mut self, expr: &Expr, frame: &Frame) -> Result<Value, ContractError> {
        if self.eval_depth >= MAX_EVAL_DEPTH {
            return Err(fault("expression nesting too deep"));
        }
        self.eval_depth += 1;
        let value = self.eval_inner(expr, frame);
        self.eval_depth -= 1;
        value
    }

    fn eval_inner(&mut self, expr: &Expr, frame: &Frame) -> Result<Value, ContractError> {
        self.gas.charge(GAS_STEP)?;
        match expr {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Ident(name) => self.lookup(name, frame),
            Expr::List(items) => {
                let items = items
                    .iter()
                    .map(|item| self.eval(item, frame))
                    .collect::<Result<Vec<_>, _>>()?;
                let value = Value::List(items);
                self.gas.charge(weight_cost(value.weight()))?;
                Ok(value)
            }
            Expr::Map(entries) => {
                let mut map = BTreeMap::new();
                for (key, value) in entries {
                    map.insert(key.clone(), self.eval(value, frame)?);
                }
                let value = Value::Map(map);
                self.gas.charge(weight_cost(value.weight()))?;
                Ok(value)
            }
            Expr::Unary { op, operand } => {
                let value = self.eval(operand, frame)?;
                match op {
                    UnaryOp::Not => Ok(Value::Bool(!value.is_truthy())),
                    UnaryOp::Neg => match value {
                        Value::Int(i) => i
                            .checked_neg()
                            .map(Value::Int)
                            .ok_or_else(|| fault("integer overflow")),
                        other => Err(fault(format!("cannot negate {}", other.type_name()))),
                    },
                }
            }
            Expr::Binary { op, lhs, rhs } => self.binary(*op, lhs, rhs, frame),
            Expr::Index { target, index } => {
                let target = self.eval(target, frame)?;
                let index = self.eval(index, frame)?;
                index_value(target, &index)
            }
            Expr::Field { target, name } => match self.eval(target, frame)? {
                Value::Map(mut entries) => Ok(entries.remove(name).unwrap_or_default()),
                other => Err(fault(format!(
                    "cannot read field {} of {}",
                    name,
                    other.type_name()
                ))),
            },
            Expr::Call { name, args, .. } => {
                self.gas.charge(GAS_CALL)?;
                let args = args
                    .iter()
                    .map(|arg| self.eval(arg, frame))
                    .collect::<Result<Vec<_>, _>>()?;
                if BUILTINS.contains(&name.as_str()) {
                    return self.builtin(name, args);
                }
                let program = self.program;
                let function = program
                    .function(name)
                    .ok_or_else(|| fault(format!("undefined function {}", name)))?;
                if function.params.len() != args.len() {
                    return Err(fault(format!(
                        "function {} expects {} arguments, got {}",
                        name,
                        function.params.len(),
                        args.len()
                    )));
                }
                let frame = function.params.iter().cloned().zip(args).collect();
                self.run(function, frame)
            }
        }
    }

    fn lookup(&mut self, name: &str, frame: &Frame) -> Result<Value, ContractError> {
        if let Some(value) = frame.get(name) {
            self.charge_copy(value)?;
            return Ok(value.clone());
        }
        match name {
            "caller" => Ok(Value::from(self.env.caller)),
            "contract_id" => Ok(Value::from(self.env.contract_id)),
            "args" => {
                let args = Value::Map(self.env.args.clone());
                self.charge_copy(&args)?;
                Ok(args)
            }
            _ => Err(fault(format!("undefined variable {}", name))),
        }
    }

    fn binary(
        &mut self,
        op: BinaryOp,
        lhs: &Expr,
        rhs: &Expr,
        frame: &Frame,
    ) -> Result<Value, ContractError> {
        let left = self.eval(lhs, frame)?;
        match op {
            BinaryOp::And => {
                if !left.is_truthy() {
                    return Ok(Value::Bool(false));
                }
                return Ok(Value::Bool(self.eval(rhs, frame)?.is_truthy()));
            }
            BinaryOp::Or => {
                if left.is_truthy() {
                    return Ok(Value::Bool(true));
                }
                return Ok(Value::Bool(self.eval(rhs, frame)?.is_truthy()));
            }
            BinaryOp::Coalesce => {
                if left != Value::Null {
                    return Ok(left);
                }
                return self.eval(rhs, frame);
            }
            _ => {}
        }

        let right = self.eval(rhs, frame)?;
        let result = match (op, left, right) {
            (BinaryOp::Eq, l, r) => Value::Bool(l == r),
            (BinaryOp::NotEq, l, r) => Value::Bool(l != r),
            (BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge, l, r) => {
                let ordering = l.compare(&r).ok_or_else(|| {
                    fault(format!("cannot compare {} and {}", l.type_name(), r.type_name()))
                })?;
                Value::Bool(match op {
                    BinaryOp::Lt => ordering.is_lt(),
                    BinaryOp::Le => ordering.is_le(),
                    BinaryOp::Gt => ordering.is_gt(),
                    _ => ordering.is_ge(),
                })
            }
            (BinaryOp::Add, Value::Int(a), Value::Int(b)) => checked(a.checked_add(b))?,
            (BinaryOp::Add, Value::List(mut a), Value::List(b)) => {
                a.extend(b);
                Value::List(a)
            }
            (BinaryOp::Add, l @ Value::Str(_), r) | (BinaryOp::Add, l, r @ Value::Str(_)) => {
                Value::Str(format!("{}{}", l, r))
            }
            (BinaryOp::Sub, Value::Int(a), Value::Int(b)) => checked(a.checked_sub(b))?,
            (BinaryOp::Mul, Value::Int(a), Value::Int(b)) => checked(a.checked_mul(b))?,
            (BinaryOp::Div | BinaryOp::Rem, Value::Int(_), Value::Int(0)) => {
                return Err(fault("division by zero"))
            }
            (BinaryOp::Div, Value::Int(a), Value::Int(b)) => checked(a.checked_div(b))?,
            (BinaryOp::Rem, Value::Int(a), Value::Int(b)) => checked(a.checked_rem(b))?,
            (op, l, r) => {
                return Err(fault(format!(
                    "unsupported operands for {:?}: {} and {}",
                    op,
                    l.type_name(),
                    r.type_name()
                )))
            }
        };
        self.gas.charge(weight_cost(result.weight()))?;
        Ok(result)
    }

    fn builtin(&mut self, name: &str, args: Vec<Value>) -> Result<Value, ContractError> {
        let arity = |min: usize, max: usize| -> Result<(), ContractError> {
            if args.len() < min || args.len() > max {
                Err(fault(format!(
                    "{} takes {} arguments, got {}",
                    name,
                    if min == max {
                        min.to_string()
                    } else {
                        format!("{} to {}", min, max)
                    },
                    args.len()
                )))
            } else {
                Ok(())
            }
        };

        match name {
            "get_state" => {
                arity(1, 1)?;
                self.gas.charge(GAS_STATE_READ)?;
                let key = state_key(&args[0])?;
                let value = self
                    .writes
                    .get(key)
                    .cloned()
                    .or_else(|| self.state.read(key))
                    .unwrap_or_default();
                self.charge_copy(&value)?;
                Ok(value)
            }
            "set_state" => {
                arity(2, 2)?;
                let mut args = args.into_iter();
                let (key, value) = match (args.next(), args.next()) {
                    (Some(key), Some(value)) => (key, value),
                    _ => return Err(fault("set_state takes 2 arguments")),
                };
                let key = state_key(&key)?.to_string();
                self.gas
                    .charge(GAS_STATE_WRITE + weight_cost(key.len() + value.weight()))?;
                self.writes.insert(key, value);
                Ok(Value::Null)
            }
            "arg" => {
                arity(1, 2)?;
                let key = args[0]
                    .as_str()
                    .ok_or_else(|| fault("arg name must be a string"))?;
                let value = self
                    .env
                    .args
                    .get(key)
                    .cloned()
                    .or_else(|| args.get(1).cloned())
                    .unwrap_or_default();
                self.charge_copy(&value)?;
                Ok(value)
            }
            "now" => {
                arity(0, 0)?;
                Ok(Value::Int(self.env.now))
            }
            "str" => {
                arity(1, 1)?;
                let text = args[0].to_string();
                self.gas.charge(weight_cost(text.len()))?;
                Ok(Value::Str(text))
            }
            "int" => {
                arity(1, 1)?;
                match &args[0] {
                    Value::Int(i) => Ok(Value::Int(*i)),
                    Value::Bool(b) => Ok(Value::Int(i64::from(*b))),
                    Value::Str(s) => s
                        .trim()
                        .parse()
                        .map(Value::Int)
                        .map_err(|_| fault(format!("cannot convert '{}' to int", s))),
                    other => Err(fault(format!("cannot convert {} to int", other.type_name()))),
                }
            }
            "len" => {
                arity(1, 1)?;
                let len = match &args[0] {
                    Value::Str(s) => s.chars().count(),
                    Value::List(items) => items.len(),
                    Value::Map(entries) => entries.len(),
                    other => return Err(fault(format!("{} has no length", other.type_name()))),
                };
                Ok(Value::Int(len as i64))
            }
            "keys" => {
                arity(1, 1)?;
                match &args[0] {
                    Value::Map(entries) => Ok(Value::List(
                        entries.keys().map(|k| Value::from(k.as_str())).collect(),
                    )),
                    other => Err(fault(format!("keys expects a map, got {}", other.type_name()))),
                }
            }
            "contains" => {
                arity(2, 2)?;
                let found = match (&args[0], &args[1]) {
                    (Value::List(items), item) => items.contains(item),
                    (Value::Map(entries), Value::Str(key)) => entries.contains_key(key),
                    (Value::Str(text), Value::Str(part)) => text.contains(part.as_str()),
                    (coll, item) => {
                        return Err(fault(format!(
                            "cannot search {} in {}",
                            item.type_name(),
                            coll.type_name()
                        )))
                    }
                };
                Ok(Value::Bool(found))
            }
            "min" | "max" => {
                arity(1, usize::MAX)?;
                let want_max = name == "max";
                let mut best = args[0].clone();
                for candidate in &args[1..] {
                    let ordering = candidate.compare(&best).ok_or_else(|| {
                        fault(format!(
                            "cannot compare {} and {}",
                            candidate.type_name(),
                            best.type_name()
                        ))
                    })?;
                    if (want_max && ordering.is_gt()) || (!want_max && ordering.is_lt()) {
                        best = candidate.clone();
                    }
                }
                Ok(best)
            }
            "require" => {
                arity(1, 2)?;
                if args[0].is_truthy() {
                    return Ok(Value::Null);
                }
                Err(fault(
                    args.get(1)
                        .map(Value::to_string)
                        .unwrap_or_else(|| "requirement failed".to_string()),
                ))
            }
            "fail" => {
                arity(1, 1)?;
                Err(fault(args[0].to_string()))
            }
            other => Err(fault(format!("undefined function {}", other))),
        }
    }
}

fn checked(result: Option<i64>) -> Result<Value, ContractError> {
    result.map(Value::Int).ok_or_else(|| fault("integer overflow"))
}

fn state_key(key: &Value) -> Result<&str, ContractError> {
    key.as_str()
        .ok_or_else(|| fault(format!("state key must be a string, got {}", key.type_name())))
}

fn index_value(target: Value, index: &Value) -> Result<Value, ContractError> {
    match (target, index) {
        (Value::List(mut items), Value::Int(i)) => {
            let len = items.len();
            usize::try_from(*i)
                .ok()
                .filter(|i| *i < len)
                .map(|i| items.swap_remove(i))
                .ok_or_else(|| fault(format!("index {} out of range for list of length {}", i, len)))
        }
        (Value::Map(mut entries), Value::Str(key)) => Ok(entries.remove(key).unwrap_or_default()),
        (Value::Str(text), Value::Int(i)) => usize::try_from(*i)
            .ok()
            .and_then(|i| text.chars().nth(i))
            .map(|c| Value::Str(c.to_string()))
            .ok_or_else(|| fault(format!("index {} out of range for string", i))),
        (target, index) => Err(fault(format!(
            "cannot index {} with {}",
            target.type_name(),
            index.type_name()
        ))),
    }
}
