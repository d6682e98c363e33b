use crate::assemble::seed_point;
use crate::dual::DualValue;
use anyhow::{anyhow, bail, Context, Result};
use log::debug;
use std::collections::HashMap;

/// Elementary functions callable from an expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Function {
    Ln,
    Log2,
    Log10,
    Exp,
    Sqrt,
    Sin,
    Cos,
    Tan,
    Arcsin,
    Arccos,
    Arctan,
    Sinh,
    Cosh,
    Tanh,
    Logistic,
}

impl Function {
    pub fn from_name(name: &str) -> Option<Self> {
        let function = match name {
            "ln" | "log" => Function::Ln,
            "log2" => Function::Log2,
            "log10" => Function::Log10,
            "exp" => Function::Exp,
            "sqrt" => Function::Sqrt,
            "sin" => Function::Sin,
            "cos" => Function::Cos,
            "tan" => Function::Tan,
            "arcsin" | "asin" => Function::Arcsin,
            "arccos" | "acos" => Function::Arccos,
            "arctan" | "atan" => Function::Arctan,
            "sinh" => Function::Sinh,
            "cosh" => Function::Cosh,
            "tanh" => Function::Tanh,
            "logistic" => Function::Logistic,
            _ => return None,
        };
        Some(function)
    }

    fn apply(self, x: &DualValue) -> crate::Result<DualValue> {
        match self {
            Function::Ln => x.ln(),
            Function::Log2 => x.log2(),
            Function::Log10 => x.log10(),
            Function::Exp => x.exp(),
            Function::Sqrt => x.sqrt(),
            Function::Sin => x.sin(),
            Function::Cos => x.cos(),
            Function::Tan => x.tan(),
            Function::Arcsin => x.arcsin(),
            Function::Arccos => x.arccos(),
            Function::Arctan => x.arctan(),
            Function::Sinh => x.sinh(),
            Function::Cosh => x.cosh(),
            Function::Tanh => x.tanh(),
            Function::Logistic => x.logistic(),
        }
    }
}

/// OpCodes for the stack-based virtual machine.
/// The VM operates on a stack of dual values.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OpCode {
    /// Pushes a constant with zero derivative.
    LoadConst(f64),
    /// Pushes the seed of an independent variable (by index).
    LoadVar(usize),
    /// Pops top two values (b, a), pushes (a + b).
    Add,
    /// Pops top two values (b, a), pushes (a - b).
    Sub,
    /// Pops top two values (b, a), pushes (a * b).
    Mul,
    /// Pops top two values (b, a), pushes (a / b).
    Div,
    /// Pops top two values (b, a), pushes (a ^ b) with a variable exponent.
    Pow,
    /// Pops top value (a), pushes (a ^ p) for a literal exponent.
    PowConst(f64),
    /// Pops top value (a), pushes its logarithm in a literal base.
    LogBase(f64),
    /// Pops top value (a), pushes f(a).
    Call(Function),
    /// Pops top value (a), pushes -a.
    Neg,
}

/// Represents a compiled sequence of operations.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Bytecode {
    pub ops: Vec<OpCode>,
}

/// Stack-based virtual machine for evaluating compiled expressions.
///
/// The VM is stateless; `execute` takes all necessary context:
/// - `bytecode`: instructions to run.
/// - `vars`: seeded independent variables.
/// - `stack`: a buffer for intermediate values.
pub struct VM;

impl VM {
    pub fn execute(
        bytecode: &Bytecode,
        vars: &[DualValue],
        stack: &mut Vec<DualValue>,
    ) -> Result<DualValue> {
        stack.clear();
        let variables = vars.first().map_or(1, DualValue::variables);

        for op in &bytecode.ops {
            let result = match *op {
                OpCode::LoadConst(value) => DualValue::constant(value, variables),
                OpCode::LoadVar(idx) => {
                    let var = vars
                        .get(idx)
                        .ok_or_else(|| anyhow!("Variable index {} out of range", idx))?;
                    Ok(var.clone())
                }
                OpCode::Add | OpCode::Sub | OpCode::Mul | OpCode::Div | OpCode::Pow => {
                    let b = pop(stack)?;
                    let a = pop(stack)?;
                    match *op {
                        OpCode::Add => &a + &b,
                        OpCode::Sub => &a - &b,
                        OpCode::Mul => &a * &b,
                        OpCode::Div => &a / &b,
                        _ => a.powd(&b),
                    }
                }
                OpCode::PowConst(exponent) => pop(stack)?.powf(exponent),
                OpCode::LogBase(base) => pop(stack)?.log(base),
                OpCode::Call(function) => function.apply(&pop(stack)?),
                OpCode::Neg => Ok(-pop(stack)?),
            };
            let value = result.with_context(|| format!("Failed to evaluate {:?}", op))?;
            stack.push(value);
        }

        let result = pop(stack)?;
        if !stack.is_empty() {
            bail!("Malformed bytecode: {} value(s) left on the stack", stack.len());
        }
        Ok(result)
    }
}

fn pop(stack: &mut Vec<DualValue>) -> Result<DualValue> {
    stack.pop().ok_or_else(|| anyhow!("Stack underflow"))
}

// --- AST & Parser ---

/// Abstract syntax tree nodes for expressions.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Variable(String),
    Binary(Box<Expr>, char, Box<Expr>), // char is operator +, -, *, /, ^
    Unary(char, Box<Expr>),
    Call(String, Vec<Expr>),
}

/// Compiles an AST into `Bytecode`, resolving variable names to indices.
pub struct Compiler {
    pub var_map: HashMap<String, usize>,
}

impl Compiler {
    pub fn new<S: AsRef<str>>(var_names: &[S]) -> Self {
        let var_map = var_names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.as_ref().to_string(), i))
            .collect();
        Self { var_map }
    }

    pub fn compile(&self, expr: &Expr) -> Result<Bytecode> {
        let mut ops = Vec::new();
        self.compile_recursive(expr, &mut ops)?;
        Ok(Bytecode { ops })
    }

    fn compile_recursive(&self, expr: &Expr, ops: &mut Vec<OpCode>) -> Result<()> {
        match expr {
            Expr::Number(n) => ops.push(OpCode::LoadConst(*n)),
            Expr::Variable(name) => match self.var_map.get(name) {
                Some(&idx) => ops.push(OpCode::LoadVar(idx)),
                None => bail!("Unknown variable: {}", name),
            },
            Expr::Binary(left, '^', right) => {
                self.compile_recursive(left, ops)?;
                if let Some(p) = constant_value(right) {
                    ops.push(OpCode::PowConst(p));
                } else {
                    self.compile_recursive(right, ops)?;
                    ops.push(OpCode::Pow);
                }
            }
            Expr::Binary(left, op, right) => {
                self.compile_recursive(left, ops)?;
                self.compile_recursive(right, ops)?;
                match op {
                    '+' => ops.push(OpCode::Add),
                    '-' => ops.push(OpCode::Sub),
                    '*' => ops.push(OpCode::Mul),
                    '/' => ops.push(OpCode::Div),
                    _ => bail!("Unknown binary operator: {}", op),
                }
            }
            Expr::Unary(op, operand) => {
                self.compile_recursive(operand, ops)?;
                match op {
                    '-' => ops.push(OpCode::Neg),
                    _ => bail!("Unknown unary operator: {}", op),
                }
            }
            Expr::Call(name, args) => match (name.as_str(), args.as_slice()) {
                ("log", [arg, Expr::Number(base)]) => {
                    self.compile_recursive(arg, ops)?;
                    ops.push(OpCode::LogBase(*base));
                }
                ("log", [_, _]) => bail!("The base of log must be a number literal"),
                (_, [arg]) => {
                    let function = Function::from_name(name)
                        .ok_or_else(|| anyhow!("Unknown function: {}", name))?;
                    self.compile_recursive(arg, ops)?;
                    ops.push(OpCode::Call(function));
                }
                _ => bail!(
                    "Function {} called with {} argument(s)",
                    name,
                    args.len()
                ),
            },
        }
        Ok(())
    }
}

/// Folds a subtree built only from number literals, unary minus and
/// `+ - * /`. Returns `None` for anything else or a non-finite result.
fn constant_value(expr: &Expr) -> Option<f64> {
    let value = match expr {
        Expr::Number(n) => *n,
        Expr::Unary('-', operand) => -constant_value(operand)?,
        Expr::Binary(left, op, right) => {
            let (a, b) = (constant_value(left)?, constant_value(right)?);
            match op {
                '+' => a + b,
                '-' => a - b,
                '*' => a * b,
                '/' => a / b,
                _ => return None,
            }
        }
        _ => return None,
    };
    value.is_finite().then_some(value)
}

/// Maximum nesting of parentheses, calls and unary/power chains.
const MAX_NESTING: usize = 128;

/// Parses a string expression into an AST.
///
/// Number literals may carry an exponent part (`1e-3`, `2.5E+2`).
pub fn parse(input: &str) -> Result<Expr> {
    let tokens = tokenize(input)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
    };
    let expr = parser.parse_expression()?;
    if let Some(token) = parser.peek() {
        bail!("Unexpected trailing token {:?}", token);
    }
    Ok(expr)
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
    Comma,
    LParen,
    RParen,
}

fn tokenize(input: &str) -> Result<Vec<Token>> {
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
            if let Some('e' | 'E') = chars.peek() {
                let mut ahead = chars.clone();
                ahead.next();
                let mut exponent = String::from("e");
                if let Some(&sign @ ('+' | '-')) = ahead.peek() {
                    exponent.push(sign);
                    ahead.next();
                }
                if ahead.peek().is_some_and(|d| d.is_ascii_digit()) {
                    while let Some(&d) = ahead.peek() {
                        if !d.is_ascii_digit() {
                            break;
                        }
                        exponent.push(d);
                        ahead.next();
                    }
                    num_str.push_str(&exponent);
                    chars = ahead;
                }
            }
            let number = num_str
                .parse()
                .with_context(|| format!("Malformed number literal: {}", num_str))?;
            tokens.push(Token::Number(number));
        } else if c.is_alphabetic() {
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
            let token = match c {
                '+' => Token::Plus,
                '-' => Token::Minus,
                '*' => Token::Star,
                '/' => Token::Slash,
                '^' => Token::Caret,
                ',' => Token::Comma,
                '(' => Token::LParen,
                ')' => Token::RParen,
                _ => bail!("Unexpected character: {}", c),
            };
            tokens.push(token);
            chars.next();
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<Token> {
        self.tokens.get(self.pos).cloned()
    }

    fn consume(&mut self) -> Option<Token> {
        let token = self.peek();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn expect_rparen(&mut self) -> Result<()> {
        match self.consume() {
            Some(Token::RParen) => Ok(()),
            _ => bail!("Expected ')'"),
        }
    }

    fn parse_expression(&mut self) -> Result<Expr> {
        let mut left = self.parse_term()?;

        while let Some(token) = self.peek() {
            let op = match token {
                Token::Plus => '+',
                Token::Minus => '-',
                _ => break,
            };
            self.consume();
            let right = self.parse_term()?;
            left = Expr::Binary(Box::new(left), op, Box::new(right));
        }
        Ok(left)
    }

    fn parse_term(&mut self) -> Result<Expr> {
        let mut left = self.parse_unary()?;

        while let Some(token) = self.peek() {
            let op = match token {
                Token::Star => '*',
                Token::Slash => '/',
                _ => break,
            };
            self.consume();
            let right = self.parse_unary()?;
            left = Expr::Binary(Box::new(left), op, Box::new(right));
        }
        Ok(left)
    }

    // Every recursive path passes through here, so the depth is bounded.
    fn parse_unary(&mut self) -> Result<Expr> {
        if self.depth >= MAX_NESTING {
            bail!("Expression nested too deeply (limit {})", MAX_NESTING);
        }
        self.depth += 1;
        let expr = self.parse_prefixed();
        self.depth -= 1;
        expr
    }

    fn parse_prefixed(&mut self) -> Result<Expr> {
        if let Some(Token::Minus) = self.peek() {
            self.consume();
            let expr = self.parse_unary()?;
            return Ok(Expr::Unary('-', Box::new(expr)));
        }
        self.parse_power()
    }

    // Right-associative, and binds tighter than unary minus: -x^2 is -(x^2).
    fn parse_power(&mut self) -> Result<Expr> {
        let base = self.parse_primary()?;
        if let Some(Token::Caret) = self.peek() {
            self.consume();
            let exponent = self.parse_unary()?;
            return Ok(Expr::Binary(Box::new(base), '^', Box::new(exponent)));
        }
        Ok(base)
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        match self.consume() {
            Some(Token::Number(n)) => Ok(Expr::Number(n)),
            Some(Token::Identifier(name)) => {
                if let Some(Token::LParen) = self.peek() {
                    self.consume(); // eat '('
                    let mut args = vec![self.parse_expression()?];
                    while let Some(Token::Comma) = self.peek() {
                        self.consume();
                        args.push(self.parse_expression()?);
                    }
                    self.expect_rparen()?;
                    Ok(Expr::Call(name, args))
                } else {
                    Ok(Expr::Variable(name))
                }
            }
            Some(Token::LParen) => {
                let expr = self.parse_expression()?;
                self.expect_rparen()?;
                Ok(expr)
            }
            Some(token) => bail!("Unexpected token {:?}", token),
            None => bail!("Unexpected end of expression"),
        }
    }
}

// --- ExpressionSystem ---

/// One compiled expression per function output, over named variables.
#[derive(Debug, Clone)]
pub struct ExpressionSystem {
    pub var_names: Vec<String>,
    pub equations: Vec<Bytecode>,
}

impl ExpressionSystem {
    pub fn new<V: AsRef<str>, E: AsRef<str>>(var_names: &[V], equations: &[E]) -> Result<Self> {
        if var_names.is_empty() {
            bail!("System needs at least one variable.");
        }
        if equations.is_empty() {
            bail!("System needs at least one equation.");
        }
        let compiler = Compiler::new(var_names);
        let compiled = equations
            .iter()
            .enumerate()
            .map(|(i, source)| {
                let source = source.as_ref();
                parse(source)
                    .and_then(|expr| compiler.compile(&expr))
                    .with_context(|| format!("Failed to compile equation {} ({}).", i, source))
            })
            .collect::<Result<Vec<_>>>()?;
        debug!(
            "compiled {} equation(s) over {} variable(s)",
            compiled.len(),
            var_names.len()
        );
        Ok(Self {
            var_names: var_names.iter().map(|n| n.as_ref().to_string()).collect(),
            equations: compiled,
        })
    }

    /// Number of independent variables.
    pub fn dimension(&self) -> usize {
        self.var_names.len()
    }

    pub fn outputs(&self) -> usize {
        self.equations.len()
    }

    /// Evaluates every equation at `point`. A single equation yields its
    /// scalar-output value; several are assembled into a Jacobian.
    pub fn evaluate(&self, point: &[f64]) -> Result<DualValue> {
        if point.len() != self.dimension() {
            bail!(
                "Point dimension mismatch. Expected {}, got {}.",
                self.dimension(),
                point.len()
            );
        }
        let seeds = seed_point(point).context("Failed to seed evaluation point.")?;
        let mut stack = Vec::with_capacity(64);
        let mut outputs = Vec::with_capacity(self.outputs());
        for (i, eq) in self.equations.iter().enumerate() {
            match VM::execute(eq, &seeds, &mut stack) {
                Ok(value) => outputs.push(value),
                Err(err) => {
                    debug!("equation {} failed at {:?}: {:#}", i, point, err);
                    return Err(err.context(format!("Failed to evaluate equation {}.", i)));
                }
            }
        }
        if outputs.len() == 1 {
            return Ok(outputs.remove(0));
        }
        DualValue::assemble(&outputs).context("Failed to assemble equation outputs.")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AdError;
    use crate::shape::Derivative;

    fn assert_err_contains<T: std::fmt::Debug>(result: Result<T>, needle: &str) {
        let err = result.expect_err("expected error");
        let message = format!("{err:#}");
        assert!(
            message.contains(needle),
            "expected error to contain \"{needle}\", got \"{message}\""
        );
    }

    #[test_log::test]
    fn parses_with_conventional_precedence() {
        let expr = parse("-x^2 + 3*y").unwrap();
        let expected = Expr::Binary(
            Box::new(Expr::Unary(
                '-',
                Box::new(Expr::Binary(
                    Box::new(Expr::Variable("x".into())),
                    '^',
                    Box::new(Expr::Number(2.0)),
                )),
            )),
            '+',
            Box::new(Expr::Binary(
                Box::new(Expr::Number(3.0)),
                '*',
                Box::new(Expr::Variable("y".into())),
            )),
        );
        assert_eq!(expr, expected);
    }

    #[test_log::test]
    fn power_is_right_associative() {
        let expr = parse("2^3^x").unwrap();
        match expr {
            Expr::Binary(base, '^', exponent) => {
                assert_eq!(*base, Expr::Number(2.0));
                assert!(matches!(*exponent, Expr::Binary(_, '^', _)));
            }
            other => panic!("unexpected tree {other:?}"),
        }
    }

    #[test_log::test]
    fn literal_exponent_compiles_to_constant_power() {
        let compiler = Compiler::new(&["x"]);
        let bytecode = compiler.compile(&parse("x^2").unwrap()).unwrap();
        assert_eq!(bytecode.ops, vec![OpCode::LoadVar(0), OpCode::PowConst(2.0)]);
        let bytecode = compiler.compile(&parse("2^x").unwrap()).unwrap();
        assert_eq!(
            bytecode.ops,
            vec![OpCode::LoadConst(2.0), OpCode::LoadVar(0), OpCode::Pow]
        );
        let bytecode = compiler.compile(&parse("x^(1/2)").unwrap()).unwrap();
        assert_eq!(bytecode.ops, vec![OpCode::LoadVar(0), OpCode::PowConst(0.5)]);
        let bytecode = compiler.compile(&parse("x^(1/0)").unwrap()).unwrap();
        assert_eq!(bytecode.ops.last(), Some(&OpCode::Pow));
    }

    #[test_log::test]
    fn negative_literal_exponent_allows_negative_base() {
        let compiler = Compiler::new(&["x"]);
        let bytecode = compiler.compile(&parse("x^-2").unwrap()).unwrap();
        assert_eq!(bytecode.ops, vec![OpCode::LoadVar(0), OpCode::PowConst(-2.0)]);

        let system = ExpressionSystem::new(&["x"], &["x^-2"]).unwrap();
        let f = system.evaluate(&[-1.0]).unwrap();
        assert_eq!(f, 1.0);
        assert_eq!(f.derivative(), &Derivative::Scalar(2.0));
    }

    #[test_log::test]
    fn number_literals_accept_exponents() {
        assert_eq!(parse("1e-3").unwrap(), Expr::Number(0.001));
        assert_eq!(parse("2.5E+2").unwrap(), Expr::Number(250.0));
        assert_eq!(parse("4e2").unwrap(), Expr::Number(400.0));

        let system = ExpressionSystem::new(&["x"], &["1e2*x"]).unwrap();
        let f = system.evaluate(&[0.5]).unwrap();
        assert_eq!(f, 50.0);
        assert_eq!(f.derivative(), &Derivative::Scalar(100.0));

        // A bare `e` after a number is not an exponent.
        assert_err_contains(parse("2e"), "trailing token");
    }

    #[test_log::test]
    fn deep_nesting_is_an_error() {
        let shallow = format!("{}x{}", "(".repeat(20), ")".repeat(20));
        assert_eq!(parse(&shallow).unwrap(), Expr::Variable("x".into()));

        let deep = format!("{}x{}", "(".repeat(100_000), ")".repeat(100_000));
        assert_err_contains(parse(&deep), "nested too deeply");
        assert_err_contains(parse(&"-".repeat(100_000)), "nested too deeply");
    }

    #[test_log::test]
    fn rejects_malformed_input() {
        assert_err_contains(parse("x + "), "end of expression");
        assert_err_contains(parse("(x + 1"), "Expected ')'");
        assert_err_contains(parse("x $ 1"), "Unexpected character");
        assert_err_contains(parse("1.2.3"), "Malformed number");
        assert_err_contains(parse("x y"), "trailing token");

        let compiler = Compiler::new(&["x"]);
        assert_err_contains(compiler.compile(&parse("z + 1").unwrap()), "Unknown variable");
        assert_err_contains(compiler.compile(&parse("foo(x)").unwrap()), "Unknown function");
        assert_err_contains(compiler.compile(&parse("log(x, x)").unwrap()), "number literal");
        assert_err_contains(compiler.compile(&parse("sin(x, 2)").unwrap()), "2 argument");
    }

    #[test_log::test]
    fn evaluates_quadratic() {
        let system = ExpressionSystem::new(&["x"], &["x^2 + 2*x + 1"]).unwrap();
        let f = system.evaluate(&[1.5]).unwrap();
        assert_eq!(f, 6.25);
        assert_eq!(f.derivative(), &Derivative::Scalar(5.0));
    }

    #[test_log::test]
    fn evaluates_log_base_and_arctan() {
        let system = ExpressionSystem::new(&["x"], &["log(x, 2) + arctan(3*x + 5)"]).unwrap();
        let f = system.evaluate(&[10.0]).unwrap();
        let value = f.value().as_scalar().unwrap();
        let slope = f.derivative().as_scalar().unwrap();
        assert!((value - 4.864160763843499).abs() < 1e-12);
        assert!((slope - 0.14671648614436125).abs() < 1e-12);
    }

    #[test_log::test]
    fn evaluates_jacobian_of_two_equations() {
        let system = ExpressionSystem::new(&["x", "y"], &["x + y", "x * y"]).unwrap();
        assert_eq!(system.dimension(), 2);
        assert_eq!(system.outputs(), 2);
        let f = system.evaluate(&[3.0, 2.0]).unwrap();
        assert_eq!(f.value().to_vec(), vec![5.0, 6.0]);
        assert_eq!(f.derivative().to_vec(), vec![1.0, 1.0, 2.0, 3.0]);
    }

    #[test_log::test]
    fn domain_errors_keep_their_type() {
        let system = ExpressionSystem::new(&["x"], &["sqrt(x - 4)"]).unwrap();
        let err = system.evaluate(&[1.0]).expect_err("sqrt of negative");
        assert!(matches!(
            err.downcast_ref::<AdError>(),
            Some(AdError::Domain(_))
        ));
        assert_err_contains(system.evaluate(&[1.0, 2.0]), "dimension mismatch");
    }

    #[test_log::test]
    fn rejects_empty_systems() {
        assert_err_contains(
            ExpressionSystem::new::<&str, &str>(&[], &["1"]),
            "at least one variable",
        );
        assert_err_contains(
            ExpressionSystem::new::<&str, &str>(&["x"], &[]),
            "at least one equation",
        );
        assert_err_contains(ExpressionSystem::new(&["x"], &["x +"]), "equation 0");
    }
}
