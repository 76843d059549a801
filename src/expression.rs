//! Pass dimension expressions.
//!
//! `WIDTH`/`HEIGHT` values in a pass are arithmetic over number literals, `$WIDTH`, `$HEIGHT`
//! and `$<input>` references to numeric inputs. They are parsed once when the descriptor loads
//! and evaluated once per pass per frame, since inputs may change every frame.

use std::fmt;

use anyhow::{anyhow, bail, Result as AnyResult};

use crate::error::{EngineError, Result};
use crate::schema::{PassSpec, Size};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Variable {
    /// `$WIDTH`: the requested output width, not the evaluating pass's own width.
    Width,
    /// `$HEIGHT`: the requested output height.
    Height,
    Input(String),
}

impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Width => f.write_str("$WIDTH"),
            Self::Height => f.write_str("$HEIGHT"),
            Self::Input(name) => write!(f, "${name}"),
        }
    }
}

/// Values an expression can see while it is evaluated.
pub trait Scope {
    fn render_size(&self) -> Size;
    fn numeric_input(&self, name: &str) -> Option<f64>;
}

#[derive(Debug, Clone)]
pub struct Expression {
    source: String,
    ast: ExpressionNode,
}

impl Expression {
    pub fn parse(source: &str) -> AnyResult<Self> {
        let ast = ExpressionParser::new(source).parse()?;
        Ok(Self {
            source: source.to_owned(),
            ast,
        })
    }

    pub fn constant(value: f64) -> Self {
        Self {
            source: format_number(value),
            ast: ExpressionNode::Constant(value),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// The literal value when the expression is a bare number.
    pub fn as_constant(&self) -> Option<f64> {
        match self.ast {
            ExpressionNode::Constant(value) => Some(value),
            _ => None,
        }
    }

    pub fn variables(&self) -> Vec<&Variable> {
        let mut found = Vec::new();
        self.ast.collect_variables(&mut found);
        found
    }

    pub fn evaluate(&self, scope: &dyn Scope) -> Result<f64> {
        self.ast.evaluate(scope).map_err(|name| {
            EngineError::unknown_reference(name, format!("expression '{}'", self.source))
        })
    }
}

impl PartialEq for Expression {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

#[derive(Debug, Clone)]
enum ExpressionNode {
    Constant(f64),
    Variable(Variable),
    UnaryNeg(Box<ExpressionNode>),
    Add(Box<ExpressionNode>, Box<ExpressionNode>),
    Sub(Box<ExpressionNode>, Box<ExpressionNode>),
    Mul(Box<ExpressionNode>, Box<ExpressionNode>),
    Div(Box<ExpressionNode>, Box<ExpressionNode>),
    Mod(Box<ExpressionNode>, Box<ExpressionNode>),
    Pow(Box<ExpressionNode>, Box<ExpressionNode>),
    Call(Function, Vec<ExpressionNode>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Function {
    Floor,
    Ceil,
    Round,
    Abs,
    Sqrt,
    Min,
    Max,
    Pow,
}

impl Function {
    fn lookup(name: &str) -> Option<Self> {
        Some(match name {
            "floor" => Self::Floor,
            "ceil" => Self::Ceil,
            "round" => Self::Round,
            "abs" => Self::Abs,
            "sqrt" => Self::Sqrt,
            "min" => Self::Min,
            "max" => Self::Max,
            "pow" => Self::Pow,
            _ => return None,
        })
    }

    fn arity(self) -> usize {
        match self {
            Self::Floor | Self::Ceil | Self::Round | Self::Abs | Self::Sqrt => 1,
            Self::Min | Self::Max | Self::Pow => 2,
        }
    }

    fn apply(self, args: &[f64]) -> f64 {
        match self {
            Self::Floor => args[0].floor(),
            Self::Ceil => args[0].ceil(),
            Self::Round => args[0].round(),
            Self::Abs => args[0].abs(),
            Self::Sqrt => args[0].sqrt(),
            Self::Min => args[0].min(args[1]),
            Self::Max => args[0].max(args[1]),
            Self::Pow => args[0].powf(args[1]),
        }
    }
}

impl ExpressionNode {
    /// Division by zero follows IEEE rules; callers reject non-finite results.
    fn evaluate(&self, scope: &dyn Scope) -> std::result::Result<f64, String> {
        match self {
            Self::Constant(value) => Ok(*value),
            Self::Variable(Variable::Width) => Ok(f64::from(scope.render_size().width)),
            Self::Variable(Variable::Height) => Ok(f64::from(scope.render_size().height)),
            Self::Variable(Variable::Input(name)) => scope
                .numeric_input(name)
                .ok_or_else(|| format!("${name}")),
            Self::UnaryNeg(value) => Ok(-value.evaluate(scope)?),
            Self::Add(left, right) => Ok(left.evaluate(scope)? + right.evaluate(scope)?),
            Self::Sub(left, right) => Ok(left.evaluate(scope)? - right.evaluate(scope)?),
            Self::Mul(left, right) => Ok(left.evaluate(scope)? * right.evaluate(scope)?),
            Self::Div(left, right) => Ok(left.evaluate(scope)? / right.evaluate(scope)?),
            Self::Mod(left, right) => Ok(left.evaluate(scope)? % right.evaluate(scope)?),
            Self::Pow(left, right) => Ok(left.evaluate(scope)?.powf(right.evaluate(scope)?)),
            Self::Call(function, args) => {
                let values = args
                    .iter()
                    .map(|arg| arg.evaluate(scope))
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(function.apply(&values))
            }
        }
    }

    fn collect_variables<'a>(&'a self, found: &mut Vec<&'a Variable>) {
        match self {
            Self::Constant(_) => {}
            Self::Variable(variable) => found.push(variable),
            Self::UnaryNeg(value) => value.collect_variables(found),
            Self::Add(left, right)
            | Self::Sub(left, right)
            | Self::Mul(left, right)
            | Self::Div(left, right)
            | Self::Mod(left, right)
            | Self::Pow(left, right) => {
                left.collect_variables(found);
                right.collect_variables(found);
            }
            Self::Call(_, args) => {
                for arg in args {
                    arg.collect_variables(found);
                }
            }
        }
    }
}

struct ExpressionParser<'a> {
    source: &'a str,
    bytes: &'a [u8],
    index: usize,
}

impl<'a> ExpressionParser<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            source,
            bytes: source.as_bytes(),
            index: 0,
        }
    }

    fn parse(mut self) -> AnyResult<ExpressionNode> {
        let expression = self.parse_add_sub()?;
        self.skip_whitespace();
        if self.index != self.bytes.len() {
            bail!(
                "unexpected token '{}' at position {}",
                self.peek_char().unwrap_or('?'),
                self.index
            );
        }
        Ok(expression)
    }

    fn parse_add_sub(&mut self) -> AnyResult<ExpressionNode> {
        let mut node = self.parse_mul_div_mod()?;
        loop {
            self.skip_whitespace();
            match self.peek_char() {
                Some('+') => {
                    self.index += 1;
                    let right = self.parse_mul_div_mod()?;
                    node = ExpressionNode::Add(Box::new(node), Box::new(right));
                }
                Some('-') => {
                    self.index += 1;
                    let right = self.parse_mul_div_mod()?;
                    node = ExpressionNode::Sub(Box::new(node), Box::new(right));
                }
                _ => return Ok(node),
            }
        }
    }

    fn parse_mul_div_mod(&mut self) -> AnyResult<ExpressionNode> {
        let mut node = self.parse_power()?;
        loop {
            self.skip_whitespace();
            match self.peek_char() {
                Some('*') => {
                    self.index += 1;
                    let right = self.parse_power()?;
                    node = ExpressionNode::Mul(Box::new(node), Box::new(right));
                }
                Some('/') => {
                    self.index += 1;
                    let right = self.parse_power()?;
                    node = ExpressionNode::Div(Box::new(node), Box::new(right));
                }
                Some('%') => {
                    self.index += 1;
                    let right = self.parse_power()?;
                    node = ExpressionNode::Mod(Box::new(node), Box::new(right));
                }
                _ => return Ok(node),
            }
        }
    }

    fn parse_power(&mut self) -> AnyResult<ExpressionNode> {
        let left = self.parse_unary()?;
        self.skip_whitespace();
        if self.peek_char() == Some('^') {
            self.index += 1;
            let right = self.parse_power()?;
            Ok(ExpressionNode::Pow(Box::new(left), Box::new(right)))
        } else {
            Ok(left)
        }
    }

    fn parse_unary(&mut self) -> AnyResult<ExpressionNode> {
        self.skip_whitespace();
        match self.peek_char() {
            Some('+') => {
                self.index += 1;
                self.parse_unary()
            }
            Some('-') => {
                self.index += 1;
                Ok(ExpressionNode::UnaryNeg(Box::new(self.parse_unary()?)))
            }
            _ => self.parse_primary(),
        }
    }

    fn parse_primary(&mut self) -> AnyResult<ExpressionNode> {
        self.skip_whitespace();
        match self.peek_char() {
            Some('(') => {
                self.index += 1;
                let expression = self.parse_add_sub()?;
                self.expect(')')?;
                Ok(expression)
            }
            Some('0'..='9') | Some('.') => self.parse_number(),
            Some('$') => {
                self.index += 1;
                let name = self.read_identifier();
                if name.is_empty() {
                    bail!("expected a name after '$' at position {}", self.index);
                }
                Ok(ExpressionNode::Variable(match name {
                    "WIDTH" => Variable::Width,
                    "HEIGHT" => Variable::Height,
                    _ => Variable::Input(name.to_owned()),
                }))
            }
            Some('a'..='z') | Some('A'..='Z') | Some('_') => self.parse_call(),
            Some(token) => bail!("unexpected token '{token}' at position {}", self.index),
            None => bail!("unexpected end of expression"),
        }
    }

    fn parse_call(&mut self) -> AnyResult<ExpressionNode> {
        let start = self.index;
        let name = self.read_identifier();
        let function = Function::lookup(name).ok_or_else(|| {
            anyhow!("unknown function '{name}' at position {start}, variables need a '$' prefix")
        })?;
        self.skip_whitespace();
        self.expect('(')?;

        let mut args = Vec::with_capacity(function.arity());
        self.skip_whitespace();
        if self.peek_char() != Some(')') {
            loop {
                args.push(self.parse_add_sub()?);
                self.skip_whitespace();
                if self.peek_char() == Some(',') {
                    self.index += 1;
                } else {
                    break;
                }
            }
        }
        self.expect(')')?;

        if args.len() != function.arity() {
            bail!(
                "function '{name}' takes {} argument(s), got {}",
                function.arity(),
                args.len()
            );
        }
        Ok(ExpressionNode::Call(function, args))
    }

    fn parse_number(&mut self) -> AnyResult<ExpressionNode> {
        let start = self.index;

        while matches!(self.peek_char(), Some('0'..='9')) {
            self.index += 1;
        }

        if self.peek_char() == Some('.') {
            self.index += 1;
            while matches!(self.peek_char(), Some('0'..='9')) {
                self.index += 1;
            }
        }

        if matches!(self.peek_char(), Some('e') | Some('E')) {
            self.index += 1;
            if matches!(self.peek_char(), Some('+') | Some('-')) {
                self.index += 1;
            }
            let exponent_start = self.index;
            while matches!(self.peek_char(), Some('0'..='9')) {
                self.index += 1;
            }
            if exponent_start == self.index {
                bail!("invalid exponent at position {}", self.index);
            }
        }

        let token = &self.source[start..self.index];
        let value = token
            .parse::<f64>()
            .map_err(|error| anyhow!("invalid number '{token}': {error}"))?;
        Ok(ExpressionNode::Constant(value))
    }

    fn read_identifier(&mut self) -> &'a str {
        let start = self.index;
        while matches!(
            self.peek_char(),
            Some('a'..='z') | Some('A'..='Z') | Some('_') | Some('0'..='9')
        ) {
            self.index += 1;
        }
        &self.source[start..self.index]
    }

    fn expect(&mut self, token: char) -> AnyResult<()> {
        self.skip_whitespace();
        if self.peek_char() != Some(token) {
            bail!("expected '{token}' at position {}", self.index);
        }
        self.index += 1;
        Ok(())
    }

    fn skip_whitespace(&mut self) {
        while matches!(self.peek_char(), Some(' ' | '\t' | '\n' | '\r')) {
            self.index += 1;
        }
    }

    fn peek_char(&self) -> Option<char> {
        self.bytes.get(self.index).map(|byte| *byte as char)
    }
}

fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        value.to_string()
    }
}

/// Resolves the target size of one pass for the current frame.
///
/// Missing expressions inherit the requested render size exactly. Results are floored and
/// clamped to `[1, max_dimension]`; a non-finite result is an error for this frame.
pub fn evaluate_pass_size(
    pass_index: usize,
    pass: &PassSpec,
    scope: &dyn Scope,
    max_dimension: u32,
) -> Result<Size> {
    let render_size = scope.render_size();
    let width = match &pass.width {
        Some(expression) => to_dimension(pass_index, "WIDTH", expression, scope, max_dimension)?,
        None => render_size.width.clamp(1, max_dimension),
    };
    let height = match &pass.height {
        Some(expression) => {
            to_dimension(pass_index, "HEIGHT", expression, scope, max_dimension)?
        }
        None => render_size.height.clamp(1, max_dimension),
    };
    Ok(Size::new(width, height))
}

fn to_dimension(
    pass_index: usize,
    axis: &'static str,
    expression: &Expression,
    scope: &dyn Scope,
    max_dimension: u32,
) -> Result<u32> {
    let value = expression.evaluate(scope)?;
    if !value.is_finite() {
        return Err(EngineError::InvalidDimension {
            pass_index,
            axis,
            expression: expression.source().to_owned(),
            value,
        });
    }
    let floored = value.floor().max(1.0).min(f64::from(max_dimension));
    Ok(floored as u32)
}
