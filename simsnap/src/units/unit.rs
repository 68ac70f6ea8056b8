use std::fmt;
use std::iter::Peekable;
use std::str::Chars;
use std::sync::Arc;

use crate::errors::{Error, Result};

use super::dimensions::{Dimensions, DIMENSIONLESS};
use super::registry::UnitRegistry;

/// A unit expression evaluated against a specific registry.
///
/// The registry is held by reference so that quantities can always be traced back to the
/// dataset whose unit system they were built from.
///
#[derive(Clone)]
pub struct Unit {
    expr: String,
    base_value: f64,
    dimensions: Dimensions,
    registry: Arc<UnitRegistry>,
}

impl Unit {
    pub fn new(expr: &str, registry: &Arc<UnitRegistry>) -> Result<Self> {
        let (base_value, dimensions) = parse_expression(expr, registry)?;

        Ok(Self {
            expr: expr.trim().to_string(),
            base_value,
            dimensions,
            registry: Arc::clone(registry),
        })
    }

    pub fn expr(&self) -> &str {
        &self.expr
    }

    /// Value of one of this unit in CGS base units
    pub fn base_value(&self) -> f64 {
        self.base_value
    }

    pub fn dimensions(&self) -> Dimensions {
        self.dimensions
    }

    pub fn registry(&self) -> &Arc<UnitRegistry> {
        &self.registry
    }

    /// Factor that converts a value in this unit into `other`.
    ///
    pub fn conversion_to(&self, other: &Unit) -> Result<f64> {
        if self.dimensions != other.dimensions {
            return Err(Error::DimensionMismatch {
                unit: other.expr.clone(),
                expected: self.dimensions.to_string(),
                found: other.dimensions.to_string(),
            });
        }

        Ok(self.base_value / other.base_value)
    }

    pub(crate) fn combine(&self, other: &Unit, divide: bool) -> Unit {
        let (op, base_value, dimensions) = if divide {
            (
                "/",
                self.base_value / other.base_value,
                self.dimensions / other.dimensions,
            )
        } else {
            (
                "*",
                self.base_value * other.base_value,
                self.dimensions * other.dimensions,
            )
        };

        Unit {
            expr: format!("({}){op}({})", self.expr, other.expr),
            base_value,
            dimensions,
            registry: Arc::clone(&self.registry),
        }
    }
}

impl PartialEq for Unit {
    fn eq(&self, other: &Self) -> bool {
        self.base_value == other.base_value && self.dimensions == other.dimensions
    }
}

impl fmt::Debug for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Unit")
            .field("expr", &self.expr)
            .field("base_value", &self.base_value)
            .field("dimensions", &self.dimensions)
            .finish()
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.expr)
    }
}

#[derive(Clone, Debug, PartialEq)]
enum Token {
    Symbol(String),
    Number(f64),
    Times,
    Divide,
    Power,
    Open,
    Close,
}

/// Evaluate a unit expression to `(scale, dimensions)`.
///
/// Grammar:
///
/// ```text
/// expr   := term (('*' | '/') term)*
/// term   := factor ('**' exponent)?
/// factor := symbol | number | '(' expr ')'
/// ```
///
/// `^` is accepted as a synonym for `**`. Exponents may be signed, parenthesized, or a ratio of
/// two numbers, e.g. `cm**(-1/2)`.
///
pub(crate) fn parse_expression(expr: &str, registry: &UnitRegistry) -> Result<(f64, Dimensions)> {
    let tokens = tokenize(expr)?;
    if tokens.is_empty() {
        return Ok((1.0, DIMENSIONLESS));
    }

    let mut parser = Parser {
        expr,
        tokens,
        pos: 0,
        registry,
    };
    let value = parser.expr()?;
    if parser.pos != parser.tokens.len() {
        return Err(parser.error("unexpected trailing input"));
    }

    Ok(value)
}

fn tokenize(expr: &str) -> Result<Vec<Token>> {
    let mut tokens = vec![];
    let mut chars = expr.chars().peekable();
    while let Some(&c) = chars.peek() {
        match c {
            ' ' | '\t' => {
                chars.next();
            }
            '*' => {
                chars.next();
                if chars.peek() == Some(&'*') {
                    chars.next();
                    tokens.push(Token::Power);
                } else {
                    tokens.push(Token::Times);
                }
            }
            '^' => {
                chars.next();
                tokens.push(Token::Power);
            }
            '/' => {
                chars.next();
                tokens.push(Token::Divide);
            }
            '(' => {
                chars.next();
                tokens.push(Token::Open);
            }
            ')' => {
                chars.next();
                tokens.push(Token::Close);
            }
            '-' | '0'..='9' | '.' => tokens.push(Token::Number(read_number(expr, &mut chars)?)),
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut symbol = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_ascii_alphanumeric() || c == '_' {
                        symbol.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Symbol(symbol));
            }
            _ => {
                return Err(Error::UnitParse {
                    expr: expr.to_string(),
                    reason: format!("unexpected character {c:?}"),
                })
            }
        }
    }

    Ok(tokens)
}

fn read_number(expr: &str, chars: &mut Peekable<Chars>) -> Result<f64> {
    let mut text = String::new();
    if chars.peek() == Some(&'-') {
        text.push('-');
        chars.next();
    }
    while let Some(&c) = chars.peek() {
        let exponent_sign = (c == '-' || c == '+') && text.ends_with(&['e', 'E'][..]);
        if c.is_ascii_digit() || c == '.' || c == 'e' || c == 'E' || exponent_sign {
            text.push(c);
            chars.next();
        } else {
            break;
        }
    }

    text.parse::<f64>().map_err(|_| Error::UnitParse {
        expr: expr.to_string(),
        reason: format!("bad number {text:?}"),
    })
}

struct Parser<'a> {
    expr: &'a str,
    tokens: Vec<Token>,
    pos: usize,
    registry: &'a UnitRegistry,
}

impl<'a> Parser<'a> {
    fn error(&self, reason: &str) -> Error {
        Error::UnitParse {
            expr: self.expr.to_string(),
            reason: reason.to_string(),
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;

        token
    }

    fn expr(&mut self) -> Result<(f64, Dimensions)> {
        let (mut scale, mut dimensions) = self.term()?;
        loop {
            match self.peek() {
                Some(Token::Times) => {
                    self.pos += 1;
                    let (s, d) = self.term()?;
                    scale *= s;
                    dimensions = dimensions * d;
                }
                Some(Token::Divide) => {
                    self.pos += 1;
                    let (s, d) = self.term()?;
                    scale /= s;
                    dimensions = dimensions / d;
                }
                _ => break,
            }
        }

        Ok((scale, dimensions))
    }

    fn term(&mut self) -> Result<(f64, Dimensions)> {
        let (scale, dimensions) = self.factor()?;
        if self.peek() == Some(&Token::Power) {
            self.pos += 1;
            let power = self.exponent()?;
            return Ok((scale.powf(power), dimensions.powf(power)));
        }

        Ok((scale, dimensions))
    }

    fn factor(&mut self) -> Result<(f64, Dimensions)> {
        match self.next() {
            Some(Token::Symbol(symbol)) => self.registry.lookup(&symbol),
            Some(Token::Number(n)) => Ok((n, DIMENSIONLESS)),
            Some(Token::Open) => {
                let value = self.expr()?;
                match self.next() {
                    Some(Token::Close) => Ok(value),
                    _ => Err(self.error("unbalanced parentheses")),
                }
            }
            _ => Err(self.error("expected a unit symbol or number")),
        }
    }

    fn exponent(&mut self) -> Result<f64> {
        match self.next() {
            Some(Token::Number(n)) => Ok(n),
            Some(Token::Open) => {
                let numerator = match self.next() {
                    Some(Token::Number(n)) => n,
                    _ => return Err(self.error("expected a numeric exponent")),
                };
                let power = match self.next() {
                    Some(Token::Close) => return Ok(numerator),
                    Some(Token::Divide) => match self.next() {
                        Some(Token::Number(d)) => numerator / d,
                        _ => return Err(self.error("expected a numeric exponent")),
                    },
                    _ => return Err(self.error("expected a numeric exponent")),
                };
                match self.next() {
                    Some(Token::Close) => Ok(power),
                    _ => Err(self.error("unbalanced parentheses")),
                }
            }
            _ => Err(self.error("expected a numeric exponent")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::units::dimensions::{DENSITY, LENGTH, MAGNETIC_FIELD, VELOCITY};
    use crate::units::registry::CM_PER_PC;

    #[test]
    fn test_parse_simple() -> Result<()> {
        let registry = UnitRegistry::new();
        assert_eq!(parse_expression("cm", &registry)?, (1.0, LENGTH));
        assert_eq!(parse_expression("  pc ", &registry)?, (CM_PER_PC, LENGTH));
        assert_eq!(parse_expression("", &registry)?, (1.0, DIMENSIONLESS));

        Ok(())
    }

    #[test]
    fn test_parse_compound() -> Result<()> {
        let registry = UnitRegistry::new();
        assert_eq!(parse_expression("g/cm**3", &registry)?, (1.0, DENSITY));
        assert_eq!(parse_expression("g*cm^-3", &registry)?, (1.0, DENSITY));
        assert_eq!(parse_expression("km/s", &registry)?, (1e5, VELOCITY));
        assert_eq!(parse_expression("(km)/(s)", &registry)?, (1e5, VELOCITY));
        assert_eq!(parse_expression("2*cm", &registry)?, (2.0, LENGTH));
        assert_eq!(parse_expression("1e3*cm", &registry)?, (1e3, LENGTH));

        let (scale, dimensions) = parse_expression("g**(1/2)*cm**(-1/2)/s", &registry)?;
        assert_eq!(scale, 1.0);
        assert_eq!(dimensions, MAGNETIC_FIELD);

        Ok(())
    }

    #[test]
    fn test_parse_errors() {
        let registry = UnitRegistry::new();
        assert!(matches!(
            parse_expression("cm**", &registry),
            Err(Error::UnitParse { .. })
        ));
        assert!(matches!(
            parse_expression("(cm", &registry),
            Err(Error::UnitParse { .. })
        ));
        assert!(matches!(
            parse_expression("cm $", &registry),
            Err(Error::UnitParse { .. })
        ));
        assert!(matches!(
            parse_expression("cm cm", &registry),
            Err(Error::UnitParse { .. })
        ));
        assert!(matches!(
            parse_expression("parsnip", &registry),
            Err(Error::UnitNotFound(_))
        ));
    }

    #[test]
    fn test_conversion() -> Result<()> {
        let registry = Arc::new(UnitRegistry::new());
        let km = Unit::new("km", &registry)?;
        let cm = Unit::new("cm", &registry)?;
        assert_eq!(km.conversion_to(&cm)?, 1e5);

        let s = Unit::new("s", &registry)?;
        assert!(matches!(
            km.conversion_to(&s),
            Err(Error::DimensionMismatch { .. })
        ));

        Ok(())
    }
}
