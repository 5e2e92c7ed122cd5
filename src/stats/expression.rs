//! Band-math expressions.
//!
//! Grammar (usual precedence, `^` binds tightest and is right-associative):
//!
//! ```text
//!   expr   := term (('+' | '-') term)*
//!   term   := unary (('*' | '/') unary)*
//!   unary  := '-' unary | power
//!   power  := atom ('^' unary)?
//!   atom   := number | band | name '(' expr (',' expr)* ')' | '(' expr ')'
//!   band   := 'b' digits | alias
//! ```
//!
//! Evaluation follows IEEE arithmetic: `x / 0` is ±inf and `0 / 0` is NaN.
//! NaN results are masked; infinite ones are left for the statistics engine,
//! which reports them only through min/max.

use std::collections::{BTreeSet, HashMap};

use crate::error::ExpressionError;
use crate::raster::RasterWindow;

/// Longest accepted expression text, in bytes.
pub const MAX_EXPRESSION_LEN: usize = 1024;

/// Deepest accepted nesting of parentheses, signs and function calls.
pub const MAX_EXPRESSION_DEPTH: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Function {
    Abs,
    Sqrt,
    Exp,
    Ln,
    Log10,
    Min,
    Max,
}

impl Function {
    fn lookup(name: &str) -> Option<Self> {
        Some(match name {
            "abs" => Function::Abs,
            "sqrt" => Function::Sqrt,
            "exp" => Function::Exp,
            "ln" | "log" => Function::Ln,
            "log10" => Function::Log10,
            "min" => Function::Min,
            "max" => Function::Max,
            _ => return None,
        })
    }

    fn is_variadic(self) -> bool {
        matches!(self, Function::Min | Function::Max)
    }

    fn apply(self, args: &[f64]) -> f64 {
        match self {
            Function::Abs => args[0].abs(),
            Function::Sqrt => args[0].sqrt(),
            Function::Exp => args[0].exp(),
            Function::Ln => args[0].ln(),
            Function::Log10 => args[0].log10(),
            // NaN-propagating, unlike f64::min/max
            Function::Min => args
                .iter()
                .copied()
                .fold(f64::INFINITY, |a, b| if !a.is_nan() && (b.is_nan() || b < a) { b } else { a }),
            Function::Max => args
                .iter()
                .copied()
                .fold(f64::NEG_INFINITY, |a, b| if !a.is_nan() && (b.is_nan() || b > a) { b } else { a }),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Number(f64),
    /// 1-based band index
    Band(usize),
    Neg(Box<Node>),
    Binary(char, Box<Node>, Box<Node>),
    Call(Function, Vec<Node>),
}

impl Node {
    fn eval(&self, pixel: &dyn Fn(usize) -> f64) -> f64 {
        match self {
            Node::Number(v) => *v,
            Node::Band(b) => pixel(*b),
            Node::Neg(inner) => -inner.eval(pixel),
            Node::Binary(op, l, r) => {
                let (l, r) = (l.eval(pixel), r.eval(pixel));
                match op {
                    '+' => l + r,
                    '-' => l - r,
                    '*' => l * r,
                    '/' => l / r,
                    _ => l.powf(r),
                }
            }
            Node::Call(f, args) => {
                let values: Vec<f64> = args.iter().map(|a| a.eval(pixel)).collect();
                f.apply(&values)
            }
        }
    }

    fn collect_bands(&self, out: &mut BTreeSet<usize>) {
        match self {
            Node::Number(_) => {}
            Node::Band(b) => {
                out.insert(*b);
            }
            Node::Neg(inner) => inner.collect_bands(out),
            Node::Binary(_, l, r) => {
                l.collect_bands(out);
                r.collect_bands(out);
            }
            Node::Call(_, args) => args.iter().for_each(|a| a.collect_bands(out)),
        }
    }
}

/// A parsed band-math expression.
#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    text: String,
    root: Node,
}

impl Expression {
    /// Parse an expression using `b1`, `b2`, ... band references.
    pub fn parse(text: &str) -> Result<Self, ExpressionError> {
        Self::parse_with_aliases(text, &HashMap::new())
    }

    /// Parse an expression that may also refer to bands by name
    /// (`"nir" -> 4`).
    pub fn parse_with_aliases(
        text: &str,
        aliases: &HashMap<String, usize>,
    ) -> Result<Self, ExpressionError> {
        let text = text.trim();
        if text.len() > MAX_EXPRESSION_LEN {
            return Err(ExpressionError::Parse {
                expression: text.chars().take(32).collect(),
                position: MAX_EXPRESSION_LEN,
                message: format!("expression longer than {} bytes", MAX_EXPRESSION_LEN),
            });
        }
        let mut parser = Parser {
            text,
            chars: text.char_indices().collect(),
            pos: 0,
            depth: 0,
            aliases,
        };
        let root = parser.expr()?;
        parser.skip_whitespace();
        if parser.pos < parser.chars.len() {
            return Err(parser.error("unexpected trailing input"));
        }
        Ok(Self {
            text: text.to_string(),
            root,
        })
    }

    /// Parse several expressions separated by `;`. Empty parts are skipped.
    pub fn parse_list(
        text: &str,
        aliases: &HashMap<String, usize>,
    ) -> Result<Vec<Self>, ExpressionError> {
        if text.len() > MAX_EXPRESSION_LEN {
            return Err(ExpressionError::Parse {
                expression: text.chars().take(32).collect(),
                position: MAX_EXPRESSION_LEN,
                message: format!("expression list longer than {} bytes", MAX_EXPRESSION_LEN),
            });
        }
        text.split(';')
            .filter(|part| !part.trim().is_empty())
            .map(|part| Self::parse_with_aliases(part, aliases))
            .collect()
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// 1-based indexes of the bands the expression reads.
    pub fn bands(&self) -> BTreeSet<usize> {
        let mut bands = BTreeSet::new();
        self.root.collect_bands(&mut bands);
        bands
    }

    /// Evaluate per pixel over `window`.
    ///
    /// Returns the values and a mask that is true where the window is valid
    /// and the result is not NaN.
    pub fn evaluate(&self, window: &RasterWindow) -> Result<(Vec<f64>, Vec<bool>), ExpressionError> {
        let mut planes: HashMap<usize, &[f64]> = HashMap::new();
        for band in self.bands() {
            let position = window
                .band_indexes
                .iter()
                .position(|&b| b == band)
                .ok_or(ExpressionError::UnknownBand {
                    band,
                    available: window.band_indexes.len(),
                })?;
            planes.insert(band, window.bands[position].as_slice());
        }

        let len = window.pixel_count();
        let mut values = Vec::with_capacity(len);
        let mut mask = Vec::with_capacity(len);
        for i in 0..len {
            let value = self.root.eval(&|band: usize| planes.get(&band).map_or(f64::NAN, |p| p[i]));
            mask.push(window.mask[i] && !value.is_nan());
            values.push(value);
        }
        Ok((values, mask))
    }
}

// =============================================================================
// Parser
// =============================================================================

struct Parser<'a> {
    text: &'a str,
    chars: Vec<(usize, char)>,
    pos: usize,
    depth: usize,
    aliases: &'a HashMap<String, usize>,
}

impl Parser<'_> {
    fn error(&self, message: impl Into<String>) -> ExpressionError {
        ExpressionError::Parse {
            expression: self.text.to_string(),
            position: self.offset(),
            message: message.into(),
        }
    }

    fn offset(&self) -> usize {
        self.chars
            .get(self.pos)
            .map(|(i, _)| *i)
            .unwrap_or(self.text.len())
    }

    fn skip_whitespace(&mut self) {
        while self.chars.get(self.pos).is_some_and(|(_, c)| c.is_whitespace()) {
            self.pos += 1;
        }
    }

    fn peek(&mut self) -> Option<char> {
        self.skip_whitespace();
        self.chars.get(self.pos).map(|(_, c)| *c)
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expr(&mut self) -> Result<Node, ExpressionError> {
        let mut node = self.term()?;
        while let Some(op @ ('+' | '-')) = self.peek() {
            self.pos += 1;
            node = Node::Binary(op, Box::new(node), Box::new(self.term()?));
        }
        Ok(node)
    }

    fn term(&mut self) -> Result<Node, ExpressionError> {
        let mut node = self.unary()?;
        while let Some(op @ ('*' | '/')) = self.peek() {
            self.pos += 1;
            node = Node::Binary(op, Box::new(node), Box::new(self.unary()?));
        }
        Ok(node)
    }

    // Parentheses, signs, exponents and call arguments all recurse through
    // here, so this is the one place nesting is counted.
    fn unary(&mut self) -> Result<Node, ExpressionError> {
        if self.depth >= MAX_EXPRESSION_DEPTH {
            return Err(self.error("expression nested too deeply"));
        }
        self.depth += 1;
        let node = self.signed();
        self.depth -= 1;
        node
    }

    fn signed(&mut self) -> Result<Node, ExpressionError> {
        if self.eat('-') {
            return Ok(Node::Neg(Box::new(self.unary()?)));
        }
        if self.eat('+') {
            return self.unary();
        }
        self.power()
    }

    fn power(&mut self) -> Result<Node, ExpressionError> {
        let base = self.atom()?;
        if self.eat('^') {
            return Ok(Node::Binary('^', Box::new(base), Box::new(self.unary()?)));
        }
        Ok(base)
    }

    fn atom(&mut self) -> Result<Node, ExpressionError> {
        match self.peek() {
            Some('(') => {
                self.pos += 1;
                let node = self.expr()?;
                if !self.eat(')') {
                    return Err(self.error("expected ')'"));
                }
                Ok(node)
            }
            Some(c) if c.is_ascii_digit() || c == '.' => self.number(),
            Some(c) if c.is_ascii_alphabetic() || c == '_' => self.name(),
            Some(c) => Err(self.error(format!("unexpected '{}'", c))),
            None => Err(self.error("unexpected end of expression")),
        }
    }

    fn take_while(&mut self, pred: impl Fn(char) -> bool) -> String {
        let mut out = String::new();
        while let Some(&(_, c)) = self.chars.get(self.pos) {
            if !pred(c) {
                break;
            }
            out.push(c);
            self.pos += 1;
        }
        out
    }

    fn number(&mut self) -> Result<Node, ExpressionError> {
        let start = self.pos;
        let mut literal = self.take_while(|c| c.is_ascii_digit() || c == '.');
        // Exponent: 1e-3, 2.5E6
        if let Some(&(_, 'e' | 'E')) = self.chars.get(self.pos) {
            let sign = matches!(self.chars.get(self.pos + 1), Some((_, '+' | '-')));
            let digit_at = self.pos + 1 + sign as usize;
            if self.chars.get(digit_at).is_some_and(|(_, c)| c.is_ascii_digit()) {
                for _ in 0..=sign as usize {
                    literal.push(self.chars[self.pos].1);
                    self.pos += 1;
                }
                literal.push_str(&self.take_while(|c| c.is_ascii_digit()));
            }
        }
        literal.parse::<f64>().map(Node::Number).map_err(|_| {
            self.pos = start;
            self.error(format!("invalid number '{}'", literal))
        })
    }

    fn name(&mut self) -> Result<Node, ExpressionError> {
        let start = self.pos;
        let name = self.take_while(|c| c.is_ascii_alphanumeric() || c == '_');

        if self.peek() == Some('(') {
            let function = Function::lookup(&name.to_ascii_lowercase())
                .ok_or_else(|| ExpressionError::Function(format!("unknown function '{}'", name)))?;
            self.pos += 1;
            let mut args = vec![self.expr()?];
            while self.eat(',') {
                args.push(self.expr()?);
            }
            if !self.eat(')') {
                return Err(self.error("expected ')' after arguments"));
            }
            let arity_ok = if function.is_variadic() {
                !args.is_empty()
            } else {
                args.len() == 1
            };
            if !arity_ok {
                return Err(ExpressionError::Function(format!(
                    "{} takes {} argument(s), got {}",
                    name,
                    if function.is_variadic() { "1 or more" } else { "1" },
                    args.len()
                )));
            }
            return Ok(Node::Call(function, args));
        }

        if let Some(&band) = self.aliases.get(&name) {
            return Ok(Node::Band(band));
        }
        let lower = name.to_ascii_lowercase();
        if let Some(index) = lower.strip_prefix('b').and_then(|d| d.parse::<usize>().ok()) {
            if index >= 1 {
                return Ok(Node::Band(index));
            }
        }
        self.pos = start;
        Err(self.error(format!("unknown band '{}'", name)))
    }
}
