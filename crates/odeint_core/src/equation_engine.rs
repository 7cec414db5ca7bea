use crate::traits::OdeSystem;
use std::cell::RefCell;
use std::collections::HashMap;
use thiserror::Error;

/// Name under which expressions read the current time.
pub const TIME_NAME: &str = "t";

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EquationError {
    #[error("unexpected character `{0}`")]
    UnexpectedChar(char),
    #[error("malformed number `{0}`")]
    BadNumber(String),
    #[error("unexpected end of expression")]
    UnexpectedEnd,
    #[error("unexpected {0}")]
    UnexpectedToken(String),
    #[error("unknown variable or parameter `{0}`")]
    UnknownIdentifier(String),
    #[error("unknown function `{0}`")]
    UnknownFunction(String),
    #[error("name `{0}` is declared more than once")]
    DuplicateName(String),
    #[error("`{0}` is reserved for the time variable")]
    ReservedName(String),
    #[error("{equations} equations for {variables} state variables")]
    EquationCount { equations: usize, variables: usize },
    #[error("{values} parameter values for {names} parameter names")]
    ParameterCount { values: usize, names: usize },
    #[error("in equation for `{name}`: {source}")]
    InEquation {
        name: String,
        #[source]
        source: Box<EquationError>,
    },
}

/// Built-in single-argument functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Function {
    Sin,
    Cos,
    Tan,
    Exp,
    Ln,
    Sqrt,
    Abs,
}

impl Function {
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "sin" => Function::Sin,
            "cos" => Function::Cos,
            "tan" => Function::Tan,
            "exp" => Function::Exp,
            "ln" => Function::Ln,
            "sqrt" => Function::Sqrt,
            "abs" => Function::Abs,
            _ => return None,
        })
    }

    fn apply(self, x: f64) -> f64 {
        match self {
            Function::Sin => x.sin(),
            Function::Cos => x.cos(),
            Function::Tan => x.tan(),
            Function::Exp => x.exp(),
            Function::Ln => x.ln(),
            Function::Sqrt => x.sqrt(),
            Function::Abs => x.abs(),
        }
    }
}

/// OpCodes for the stack-based virtual machine.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OpCode {
    LoadConst(f64),
    /// Pushes a state variable by index.
    LoadVar(usize),
    /// Pushes a parameter by index.
    LoadParam(usize),
    LoadTime,
    /// Pops b then a, pushes a + b. Likewise for the other binary ops.
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    Neg,
    Call(Function),
}

/// A compiled expression.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Bytecode {
    pub ops: Vec<OpCode>,
}

/// Stack-based virtual machine for evaluating compiled expressions.
pub struct VM;

impl VM {
    /// Runs `bytecode` against the given time, state and parameters.
    /// `stack` is scratch space reused across calls.
    pub fn execute(bytecode: &Bytecode, t: f64, vars: &[f64], params: &[f64], stack: &mut Vec<f64>) -> f64 {
        stack.clear();
        for op in &bytecode.ops {
            let value = match *op {
                OpCode::LoadConst(v) => v,
                OpCode::LoadVar(i) => vars[i],
                OpCode::LoadParam(i) => params[i],
                OpCode::LoadTime => t,
                OpCode::Neg => -pop(stack),
                OpCode::Call(f) => f.apply(pop(stack)),
                binary => {
                    let b = pop(stack);
                    let a = pop(stack);
                    match binary {
                        OpCode::Add => a + b,
                        OpCode::Sub => a - b,
                        OpCode::Mul => a * b,
                        OpCode::Div => a / b,
                        _ => a.powf(b),
                    }
                }
            };
            stack.push(value);
        }
        pop(stack)
    }
}

// Compiled code is balanced; a short stack would surface as NaN, which the
// solvers reject as a non-finite derivative.
fn pop(stack: &mut Vec<f64>) -> f64 {
    stack.pop().unwrap_or(f64::NAN)
}

// --- AST & Parser ---

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Variable(String),
    Binary(Box<Expr>, char, Box<Expr>),
    Negate(Box<Expr>),
    Call(String, Box<Expr>),
}

/// Resolves names to indices and emits bytecode.
#[derive(Debug)]
pub struct Compiler {
    var_map: HashMap<String, usize>,
    param_map: HashMap<String, usize>,
}

impl Compiler {
    pub fn new(var_names: &[String], param_names: &[String]) -> Result<Self, EquationError> {
        let mut var_map = HashMap::new();
        let mut param_map = HashMap::new();
        for (i, name) in var_names.iter().enumerate() {
            Self::declare(&mut var_map, &param_map, name, i)?;
        }
        for (i, name) in param_names.iter().enumerate() {
            Self::declare(&mut param_map, &var_map, name, i)?;
        }
        Ok(Self { var_map, param_map })
    }

    fn declare(
        map: &mut HashMap<String, usize>,
        other: &HashMap<String, usize>,
        name: &str,
        index: usize,
    ) -> Result<(), EquationError> {
        if name == TIME_NAME {
            return Err(EquationError::ReservedName(name.to_string()));
        }
        if other.contains_key(name) || map.insert(name.to_string(), index).is_some() {
            return Err(EquationError::DuplicateName(name.to_string()));
        }
        Ok(())
    }

    pub fn compile(&self, expr: &Expr) -> Result<Bytecode, EquationError> {
        let mut ops = Vec::new();
        self.emit(expr, &mut ops)?;
        Ok(Bytecode { ops })
    }

    fn emit(&self, expr: &Expr, ops: &mut Vec<OpCode>) -> Result<(), EquationError> {
        match expr {
            Expr::Number(n) => ops.push(OpCode::LoadConst(*n)),
            Expr::Variable(name) => {
                let op = if let Some(&idx) = self.var_map.get(name) {
                    OpCode::LoadVar(idx)
                } else if let Some(&idx) = self.param_map.get(name) {
                    OpCode::LoadParam(idx)
                } else if name == TIME_NAME {
                    OpCode::LoadTime
                } else {
                    return Err(EquationError::UnknownIdentifier(name.clone()));
                };
                ops.push(op);
            }
            Expr::Binary(left, op, right) => {
                self.emit(left, ops)?;
                self.emit(right, ops)?;
                ops.push(match op {
                    '+' => OpCode::Add,
                    '-' => OpCode::Sub,
                    '*' => OpCode::Mul,
                    '/' => OpCode::Div,
                    _ => OpCode::Pow,
                });
            }
            Expr::Negate(operand) => {
                self.emit(operand, ops)?;
                ops.push(OpCode::Neg);
            }
            Expr::Call(func, arg) => {
                let f = Function::from_name(func)
                    .ok_or_else(|| EquationError::UnknownFunction(func.clone()))?;
                self.emit(arg, ops)?;
                ops.push(OpCode::Call(f));
            }
        }
        Ok(())
    }
}

/// Parses a string expression into an AST.
///
/// Precedence from loosest: `+ -`, `* /`, unary minus, `^` (right
/// associative), so `-x^2` is `-(x^2)` and `2^-1` is accepted.
pub fn parse(input: &str) -> Result<Expr, EquationError> {
    let tokens = tokenize(input)?;
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.parse_expression()?;
    match parser.peek() {
        None => Ok(expr),
        Some(token) => Err(EquationError::UnexpectedToken(token.describe())),
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Identifier(String),
    Plus,
    Minus,
    Star,
    Slash,
    Caret,
    LParen,
    RParen,
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Token::Number(n) => format!("number {n}"),
            Token::Identifier(name) => format!("identifier `{name}`"),
            Token::Plus => "`+`".into(),
            Token::Minus => "`-`".into(),
            Token::Star => "`*`".into(),
            Token::Slash => "`/`".into(),
            Token::Caret => "`^`".into(),
            Token::LParen => "`(`".into(),
            Token::RParen => "`)`".into(),
        }
    }
}

fn tokenize(input: &str) -> Result<Vec<Token>, EquationError> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();

    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
        } else if c.is_ascii_digit() || c == '.' {
            let mut num_str = String::new();
            while let Some(&d) = chars.peek() {
                if d.is_ascii_digit() || d == '.' {
                    num_str.push(d);
                    chars.next();
                } else {
                    break;
                }
            }
            // exponent: 1e-3, 2.5E+4
            if let Some(&e) = chars.peek() {
                if e == 'e' || e == 'E' {
                    num_str.push(e);
                    chars.next();
                    if let Some(&sign) = chars.peek() {
                        if sign == '+' || sign == '-' {
                            num_str.push(sign);
                            chars.next();
                        }
                    }
                    while let Some(&d) = chars.peek() {
                        if d.is_ascii_digit() {
                            num_str.push(d);
                            chars.next();
                        } else {
                            break;
                        }
                    }
                }
            }
            let value = num_str
                .parse()
                .map_err(|_| EquationError::BadNumber(num_str.clone()))?;
            tokens.push(Token::Number(value));
        } else if c.is_alphabetic() || c == '_' {
            let mut ident = String::new();
            while let Some(&d) = chars.peek() {
                if d.is_alphanumeric() || d == '_' {
                    ident.push(d);
                    chars.next();
                } else {
                    break;
                }
            }
            tokens.push(Token::Identifier(ident));
        } else {
            tokens.push(match c {
                '+' => Token::Plus,
                '-' => Token::Minus,
                '*' => Token::Star,
                '/' => Token::Slash,
                '^' => Token::Caret,
                '(' => Token::LParen,
                ')' => Token::RParen,
                other => return Err(EquationError::UnexpectedChar(other)),
            });
            chars.next();
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn consume(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn expect_rparen(&mut self) -> Result<(), EquationError> {
        match self.consume() {
            Some(Token::RParen) => Ok(()),
            Some(other) => Err(EquationError::UnexpectedToken(other.describe())),
            None => Err(EquationError::UnexpectedEnd),
        }
    }

    fn parse_expression(&mut self) -> Result<Expr, EquationError> {
        let mut left = self.parse_term()?;
        while let Some(op) = match self.peek() {
            Some(Token::Plus) => Some('+'),
            Some(Token::Minus) => Some('-'),
            _ => None,
        } {
            self.consume();
            let right = self.parse_term()?;
            left = Expr::Binary(Box::new(left), op, Box::new(right));
        }
        Ok(left)
    }

    fn parse_term(&mut self) -> Result<Expr, EquationError> {
        let mut left = self.parse_unary()?;
        while let Some(op) = match self.peek() {
            Some(Token::Star) => Some('*'),
            Some(Token::Slash) => Some('/'),
            _ => None,
        } {
            self.consume();
            let right = self.parse_unary()?;
            left = Expr::Binary(Box::new(left), op, Box::new(right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, EquationError> {
        if let Some(Token::Minus) = self.peek() {
            self.consume();
            let operand = self.parse_unary()?;
            return Ok(Expr::Negate(Box::new(operand)));
        }
        self.parse_power()
    }

    fn parse_power(&mut self) -> Result<Expr, EquationError> {
        let base = self.parse_primary()?;
        if let Some(Token::Caret) = self.peek() {
            self.consume();
            let exponent = self.parse_unary()?;
            return Ok(Expr::Binary(Box::new(base), '^', Box::new(exponent)));
        }
        Ok(base)
    }

    fn parse_primary(&mut self) -> Result<Expr, EquationError> {
        match self.consume() {
            Some(Token::Number(n)) => Ok(Expr::Number(n)),
            Some(Token::Identifier(name)) => {
                if let Some(Token::LParen) = self.peek() {
                    self.consume();
                    let arg = self.parse_expression()?;
                    self.expect_rparen()?;
                    Ok(Expr::Call(name, Box::new(arg)))
                } else {
                    Ok(Expr::Variable(name))
                }
            }
            Some(Token::LParen) => {
                let expr = self.parse_expression()?;
                self.expect_rparen()?;
                Ok(expr)
            }
            Some(other) => Err(EquationError::UnexpectedToken(other.describe())),
            None => Err(EquationError::UnexpectedEnd),
        }
    }
}

// --- ExpressionSystem ---

/// An [`OdeSystem`] whose right-hand side is given as one expression per
/// state variable, e.g. `["y", "-k * x"]` over `x, y` with parameter `k`.
#[derive(Debug)]
pub struct ExpressionSystem {
    equations: Vec<Bytecode>,
    var_names: Vec<String>,
    param_names: Vec<String>,
    params: Vec<f64>,
    // Scratch stack so evaluation does not allocate.
    stack: RefCell<Vec<f64>>,
}

impl ExpressionSystem {
    pub fn new<S: AsRef<str>>(
        equations: &[S],
        var_names: Vec<String>,
        param_names: Vec<String>,
        params: Vec<f64>,
    ) -> Result<Self, EquationError> {
        if equations.len() != var_names.len() {
            return Err(EquationError::EquationCount {
                equations: equations.len(),
                variables: var_names.len(),
            });
        }
        if params.len() != param_names.len() {
            return Err(EquationError::ParameterCount {
                values: params.len(),
                names: param_names.len(),
            });
        }
        let compiler = Compiler::new(&var_names, &param_names)?;
        let equations = equations
            .iter()
            .zip(&var_names)
            .map(|(source, name)| {
                parse(source.as_ref())
                    .and_then(|expr| compiler.compile(&expr))
                    .map_err(|err| EquationError::InEquation {
                        name: name.clone(),
                        source: Box::new(err),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            equations,
            var_names,
            param_names,
            params,
            stack: RefCell::new(Vec::with_capacity(64)),
        })
    }

    pub fn var_names(&self) -> &[String] {
        &self.var_names
    }

    pub fn params(&self) -> &[f64] {
        &self.params
    }

    pub fn set_param(&mut self, name: &str, value: f64) -> Result<(), EquationError> {
        let index = self
            .param_names
            .iter()
            .position(|p| p == name)
            .ok_or_else(|| EquationError::UnknownIdentifier(name.to_string()))?;
        self.params[index] = value;
        Ok(())
    }
}

impl OdeSystem<f64> for ExpressionSystem {
    fn dimension(&self) -> usize {
        self.equations.len()
    }

    fn apply(&self, t: f64, y: &[f64], dydt: &mut [f64]) {
        let mut stack = self.stack.borrow_mut();
        for (out, eq) in dydt.iter_mut().zip(&self.equations) {
            *out = VM::execute(eq, t, y, &self.params, &mut stack);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn eval(source: &str, t: f64, vars: &[f64]) -> f64 {
        let compiler = Compiler::new(&names(&["x", "y"]), &names(&["k"])).expect("names");
        let code = compiler.compile(&parse(source).expect("parse")).expect("compile");
        VM::execute(&code, t, vars, &[2.0], &mut Vec::new())
    }

    fn assert_err_contains<T: std::fmt::Debug>(result: Result<T, EquationError>, needle: &str) {
        let err = result.expect_err("expected an error");
        let message = err.to_string();
        assert!(message.contains(needle), "`{message}` does not mention `{needle}`");
    }

    #[test]
    fn precedence_and_associativity() {
        assert_eq!(eval("1 + 2 * 3", 0.0, &[0.0, 0.0]), 7.0);
        assert_eq!(eval("2 ^ 3 ^ 2", 0.0, &[0.0, 0.0]), 512.0);
        assert_eq!(eval("-x ^ 2", 0.0, &[3.0, 0.0]), -9.0);
        assert_eq!(eval("2 ^ -1", 0.0, &[0.0, 0.0]), 0.5);
        assert_eq!(eval("(1 - 2) - 3", 0.0, &[0.0, 0.0]), -4.0);
        assert_eq!(eval("8 / 4 / 2", 0.0, &[0.0, 0.0]), 1.0);
    }

    #[test]
    fn names_time_and_functions_resolve() {
        assert_eq!(eval("k * x + y", 0.0, &[3.0, 1.0]), 7.0);
        assert_eq!(eval("t", 1.5, &[0.0, 0.0]), 1.5);
        assert!((eval("sin(t) + cos(0) + ln(exp(2)) + sqrt(abs(-4)) + tan(0)", 0.0, &[0.0, 0.0]) - 5.0).abs() < 1e-15);
    }

    #[test]
    fn exponent_literals_parse() {
        assert_eq!(eval("1e-3", 0.0, &[0.0, 0.0]), 1e-3);
        assert_eq!(eval("2.5E+2 - x", 0.0, &[50.0, 0.0]), 200.0);
    }

    #[test]
    fn malformed_input_is_an_error() {
        assert_err_contains(parse("1 + "), "end of expression");
        assert_err_contains(parse("(x"), "end of expression");
        assert_err_contains(parse("x y"), "identifier `y`");
        assert_err_contains(parse("x $ 1"), "`$`");
        assert_err_contains(parse("1..2"), "malformed number");
        let compiler = Compiler::new(&names(&["x"]), &[]).expect("names");
        assert_err_contains(compiler.compile(&parse("z").expect("parse")), "`z`");
        assert_err_contains(compiler.compile(&parse("erf(x)").expect("parse")), "unknown function");
    }

    #[test]
    fn declarations_are_checked() {
        assert_err_contains(Compiler::new(&names(&["x", "x"]), &[]), "more than once");
        assert_err_contains(Compiler::new(&names(&["x"]), &names(&["x"])), "more than once");
        assert_err_contains(Compiler::new(&names(&["t"]), &[]), "reserved");
    }

    #[test]
    fn expression_system_evaluates_and_updates_parameters() {
        let mut system = ExpressionSystem::new(&["y", "-k * x + t"], names(&["x", "y"]), names(&["k"]), vec![4.0])
            .expect("valid system");
        assert_eq!(OdeSystem::<f64>::dimension(&system), 2);
        let mut out = [0.0; 2];
        system.apply(1.0, &[1.0, 2.0], &mut out);
        assert_eq!(out, [2.0, -3.0]);

        system.set_param("k", 1.0).expect("known parameter");
        system.apply(0.0, &[1.0, 2.0], &mut out);
        assert_eq!(out, [2.0, -1.0]);
        assert_err_contains(system.set_param("q", 1.0), "`q`");
    }

    #[test]
    fn errors_name_the_offending_equation() {
        let err = ExpressionSystem::new(&["y", "x +"], names(&["x", "y"]), vec![], vec![]).expect_err("bad equation");
        assert_eq!(err.to_string(), "in equation for `y`: unexpected end of expression");
        assert_err_contains(
            ExpressionSystem::new(&["y"], names(&["x", "y"]), vec![], vec![]),
            "1 equations for 2",
        );
    }
}
