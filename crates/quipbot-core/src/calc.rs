//! Arithmetic evaluator for `/calc`.
//!
//! Grammar:
//!
//! ```text
//! expr   := term (('+' | '-') term)*
//! term   := unary (('*' | '/') unary)*
//! unary  := '-' unary | primary
//! primary:= number | '(' expr ')'
//! ```

use thiserror::Error;

const MAX_EXPRESSION_LEN: usize = 512;
const MAX_NESTING: usize = 64;

#[derive(Debug, Error, PartialEq)]
pub enum CalcError {
    #[error("expression is empty")]
    Empty,

    #[error("expression is too long")]
    TooLong,

    #[error("unexpected character '{ch}' at position {pos}")]
    UnexpectedChar { ch: char, pos: usize },

    #[error("invalid number '{0}'")]
    InvalidNumber(String),

    #[error("unexpected end of expression")]
    UnexpectedEnd,

    #[error("unexpected '{token}' at position {pos}")]
    UnexpectedToken { token: String, pos: usize },

    #[error("too many nested parentheses")]
    TooDeep,

    #[error("division by zero")]
    DivisionByZero,

    #[error("result is not a finite number")]
    NonFinite,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Token {
    Number(f64),
    Plus,
    Minus,
    Star,
    Slash,
    LParen,
    RParen,
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Token::Number(n) => format_number(*n),
            Token::Plus => "+".to_string(),
            Token::Minus => "-".to_string(),
            Token::Star => "*".to_string(),
            Token::Slash => "/".to_string(),
            Token::LParen => "(".to_string(),
            Token::RParen => ")".to_string(),
        }
    }
}

fn tokenize(input: &str) -> Result<Vec<(Token, usize)>, CalcError> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let ch = chars[i];
        let token = match ch {
            c if c.is_whitespace() => {
                i += 1;
                continue;
            }
            '+' => Token::Plus,
            '-' => Token::Minus,
            '*' => Token::Star,
            '/' => Token::Slash,
            '(' => Token::LParen,
            ')' => Token::RParen,
            c if c.is_ascii_digit() || c == '.' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let literal: String = chars[start..i].iter().collect();
                let value = literal
                    .parse::<f64>()
                    .map_err(|_| CalcError::InvalidNumber(literal.clone()))?;
                tokens.push((Token::Number(value), start));
                continue;
            }
            other => return Err(CalcError::UnexpectedChar { ch: other, pos: i }),
        };
        tokens.push((token, i));
        i += 1;
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<(Token, usize)>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<Token> {
        self.tokens.get(self.pos).map(|(token, _)| *token)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.peek();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn unexpected(&self) -> CalcError {
        match self.tokens.get(self.pos) {
            Some((token, pos)) => CalcError::UnexpectedToken {
                token: token.describe(),
                pos: *pos,
            },
            None => CalcError::UnexpectedEnd,
        }
    }

    fn expr(&mut self) -> Result<f64, CalcError> {
        let mut value = self.term()?;
        loop {
            match self.peek() {
                Some(Token::Plus) => {
                    self.advance();
                    value += self.term()?;
                }
                Some(Token::Minus) => {
                    self.advance();
                    value -= self.term()?;
                }
                _ => return Ok(value),
            }
        }
    }

    fn term(&mut self) -> Result<f64, CalcError> {
        let mut value = self.unary()?;
        loop {
            match self.peek() {
                Some(Token::Star) => {
                    self.advance();
                    value *= self.unary()?;
                }
                Some(Token::Slash) => {
                    self.advance();
                    let divisor = self.unary()?;
                    if divisor == 0.0 {
                        return Err(CalcError::DivisionByZero);
                    }
                    value /= divisor;
                }
                _ => return Ok(value),
            }
        }
    }

    fn unary(&mut self) -> Result<f64, CalcError> {
        if self.peek() == Some(Token::Minus) {
            self.advance();
            self.enter()?;
            let value = self.unary();
            self.depth -= 1;
            return value.map(|v| -v);
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<f64, CalcError> {
        match self.peek() {
            Some(Token::Number(value)) => {
                self.advance();
                Ok(value)
            }
            Some(Token::LParen) => {
                self.advance();
                self.enter()?;
                let value = self.expr()?;
                self.depth -= 1;
                if self.peek() != Some(Token::RParen) {
                    return Err(self.unexpected());
                }
                self.advance();
                Ok(value)
            }
            _ => Err(self.unexpected()),
        }
    }

    fn enter(&mut self) -> Result<(), CalcError> {
        self.depth += 1;
        if self.depth > MAX_NESTING {
            return Err(CalcError::TooDeep);
        }
        Ok(())
    }
}

pub fn evaluate(input: &str) -> Result<f64, CalcError> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CalcError::Empty);
    }
    if input.chars().count() > MAX_EXPRESSION_LEN {
        return Err(CalcError::TooLong);
    }

    let mut parser = Parser {
        tokens: tokenize(input)?,
        pos: 0,
        depth: 0,
    };
    let value = parser.expr()?;
    if parser.pos < parser.tokens.len() {
        return Err(parser.unexpected());
    }
    if !value.is_finite() {
        return Err(CalcError::NonFinite);
    }
    Ok(value)
}

/// Integers print without a fractional part; everything else is trimmed
/// to at most ten decimals.
pub fn format_number(value: f64) -> String {
    if value == value.trunc() && value.abs() < 1e15 {
        // Avoids "-0".
        return format!("{}", value as i64);
    }
    let formatted = format!("{:.10}", value);
    formatted
        .trim_end_matches('0')
        .trim_end_matches('.')
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval(input: &str) -> f64 {
        evaluate(input).expect("valid expression")
    }

    #[test]
    fn respects_precedence_and_parentheses() {
        assert_eq!(eval("2 + 3 * 4"), 14.0);
        assert_eq!(eval("(2 + 3) * 4"), 20.0);
        assert_eq!(eval("10 - 4 - 3"), 3.0);
        assert_eq!(eval("100 / 10 / 5"), 2.0);
    }

    #[test]
    fn supports_unary_minus_and_decimals() {
        assert_eq!(eval("-3 + 5"), 2.0);
        assert_eq!(eval("-(2 * 3)"), -6.0);
        assert_eq!(eval("2 * -3"), -6.0);
        assert_eq!(eval("--4"), 4.0);
        assert_eq!(eval("0.5 + .25"), 0.75);
    }

    #[test]
    fn rejects_anything_but_arithmetic() {
        assert!(matches!(
            evaluate("2 + x"),
            Err(CalcError::UnexpectedChar { ch: 'x', pos: 4 })
        ));
        assert!(matches!(
            evaluate("process.exit()"),
            Err(CalcError::UnexpectedChar { .. })
        ));
        assert!(matches!(evaluate("2 ^ 3"), Err(CalcError::UnexpectedChar { .. })));
        assert!(matches!(
            evaluate("6 × 7"),
            Err(CalcError::UnexpectedChar { ch: '×', pos: 2 })
        ));
        assert!(matches!(
            evaluate("8 ÷ 2"),
            Err(CalcError::UnexpectedChar { ch: '÷', .. })
        ));
    }

    #[test]
    fn reports_structural_errors() {
        assert_eq!(evaluate(""), Err(CalcError::Empty));
        assert_eq!(evaluate("2 +"), Err(CalcError::UnexpectedEnd));
        assert_eq!(evaluate("(1 + 2"), Err(CalcError::UnexpectedEnd));
        assert!(matches!(
            evaluate("1 2"),
            Err(CalcError::UnexpectedToken { pos: 2, .. })
        ));
        assert!(matches!(evaluate("1..2"), Err(CalcError::InvalidNumber(_))));
        assert!(matches!(evaluate("()"), Err(CalcError::UnexpectedToken { .. })));
    }

    #[test]
    fn division_by_zero_and_overflow_are_errors() {
        assert_eq!(evaluate("1 / 0"), Err(CalcError::DivisionByZero));
        assert_eq!(evaluate("1 / (2 - 2)"), Err(CalcError::DivisionByZero));
        let huge = format!("{0} * {0}", "9".repeat(160));
        assert_eq!(evaluate(&huge), Err(CalcError::NonFinite));
    }

    #[test]
    fn deep_nesting_is_rejected() {
        let deep = format!("{}1{}", "(".repeat(100), ")".repeat(100));
        assert_eq!(evaluate(&deep), Err(CalcError::TooDeep));
        let fine = format!("{}1{}", "(".repeat(10), ")".repeat(10));
        assert_eq!(evaluate(&fine), Ok(1.0));
    }

    #[test]
    fn format_number_trims_trailing_zeros() {
        assert_eq!(format_number(14.0), "14");
        assert_eq!(format_number(-6.0), "-6");
        assert_eq!(format_number(-0.0), "0");
        assert_eq!(format_number(0.75), "0.75");
        assert_eq!(format_number(1.0 / 3.0), "0.3333333333");
    }
}
