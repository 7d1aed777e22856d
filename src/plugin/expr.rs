//! skip 조건 등에 쓰이는 작은 표현식 언어
//!
//! 문자열(작은/큰따옴표), 숫자, `true`/`false` 리터럴과 비교, 논리, 산술,
//! 정규식 매칭(`=~`, `!~`), 삼항 연산자를 지원합니다. 오른쪽이 문자열 리터럴인
//! 정규식은 파싱할 때 한 번만 컴파일됩니다.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use regex_lite as regex;
use super::error::ExpressionError;

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Number(f64),
    Str(String),
}

impl Value {
    /// skip 판정에 쓰이는 참/거짓 해석
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0,
            Value::Str(s) => !s.is_empty() && s != "false",
        }
    }

    fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            Value::Str(s) => s.trim().parse().ok(),
            Value::Bool(_) => None,
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            Value::Bool(_) => "bool",
            Value::Number(_) => "number",
            Value::Str(_) => "string",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{}", b),
            Value::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => write!(f, "{}", *n as i64),
            Value::Number(n) => write!(f, "{}", n),
            Value::Str(s) => f.write_str(s),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum BinOp {
    Or,
    And,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Match,
    NotMatch,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

impl BinOp {
    fn precedence(self) -> u8 {
        match self {
            BinOp::Or => 1,
            BinOp::And => 2,
            BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge
            | BinOp::Match | BinOp::NotMatch => 3,
            BinOp::Add | BinOp::Sub => 4,
            BinOp::Mul | BinOp::Div | BinOp::Rem => 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Str(String),
    Bool(bool),
    Bin(BinOp),
    Not,
    LParen,
    RParen,
    Question,
    Colon,
}

#[derive(Debug, Clone)]
enum Expr {
    Literal(Value),
    Not(Box<Expr>),
    Neg(Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    /// 리터럴 패턴과의 매칭. `bool`은 `!~` 여부
    Match(bool, Box<Expr>, Arc<regex::Regex>),
    Ternary(Box<Expr>, Box<Expr>, Box<Expr>),
}

const REGEX_CACHE_LIMIT: usize = 64;

/// 패턴 문자열별 컴파일된 정규식
///
/// 치환 후 매번 다시 파싱되는 표현식이 같은 패턴을 반복해서 컴파일하지 않도록
/// 씁니다. 상한을 넘으면 비우고 다시 채웁니다.
#[derive(Debug, Default)]
pub struct RegexCache {
    patterns: Mutex<HashMap<String, Arc<regex::Regex>>>,
}

impl RegexCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.patterns.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn get_or_compile(&self, pattern: &str) -> Result<Arc<regex::Regex>, ExpressionError> {
        let mut patterns = self.patterns.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(re) = patterns.get(pattern) {
            return Ok(re.clone());
        }
        let re = Arc::new(compile_regex(pattern)?);
        if patterns.len() >= REGEX_CACHE_LIMIT {
            patterns.clear();
        }
        patterns.insert(pattern.to_string(), re.clone());
        Ok(re)
    }
}

fn compile_regex(pattern: &str) -> Result<regex::Regex, ExpressionError> {
    regex::Regex::new(pattern).map_err(|e| ExpressionError::Regex(e.to_string()))
}

/// 파싱된 표현식
#[derive(Debug, Clone)]
pub struct Compiled {
    root: Expr,
}

impl Compiled {
    pub fn parse(source: &str) -> Result<Self, ExpressionError> {
        Self::parse_inner(source, None)
    }

    /// 리터럴 정규식을 `cache`에서 찾거나 컴파일해 넣으며 파싱합니다.
    pub fn parse_with(source: &str, cache: &RegexCache) -> Result<Self, ExpressionError> {
        Self::parse_inner(source, Some(cache))
    }

    fn parse_inner(source: &str, regexes: Option<&RegexCache>) -> Result<Self, ExpressionError> {
        let tokens = tokenize(source)?;
        let mut parser = Parser { tokens, pos: 0, regexes };
        let root = parser.ternary()?;
        if let Some((pos, tok)) = parser.peek_with_pos() {
            return Err(ExpressionError::Syntax {
                position: pos,
                message: format!("예상치 못한 토큰 {:?}", tok),
            });
        }
        Ok(Self { root })
    }

    pub fn literal(value: Value) -> Self {
        Self {
            root: Expr::Literal(value),
        }
    }

    pub fn evaluate(&self) -> Result<Value, ExpressionError> {
        eval(&self.root)
    }
}

/// 파싱 후 바로 평가합니다.
pub fn evaluate(source: &str) -> Result<Value, ExpressionError> {
    Compiled::parse(source)?.evaluate()
}

fn tokenize(source: &str) -> Result<Vec<(usize, Token)>, ExpressionError> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let start = i;
        if c.is_whitespace() {
            i += 1;
            continue;
        }

        let token = match c {
            '0'..='9' | '.' => {
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let n = text.parse().map_err(|_| ExpressionError::Syntax {
                    position: start,
                    message: format!("잘못된 숫자 {}", text),
                })?;
                tokens.push((start, Token::Number(n)));
                continue;
            }
            '\'' | '"' => {
                let quote = c;
                let mut s = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        None => {
                            return Err(ExpressionError::Syntax {
                                position: start,
                                message: "닫히지 않은 문자열".into(),
                            })
                        }
                        Some('\\') => {
                            let escaped = chars.get(i + 1).ok_or_else(|| ExpressionError::Syntax {
                                position: i,
                                message: "잘못된 이스케이프".into(),
                            })?;
                            s.push(match escaped {
                                'n' => '\n',
                                't' => '\t',
                                other => *other,
                            });
                            i += 2;
                        }
                        Some(ch) if *ch == quote => {
                            i += 1;
                            break;
                        }
                        Some(ch) => {
                            s.push(*ch);
                            i += 1;
                        }
                    }
                }
                tokens.push((start, Token::Str(s)));
                continue;
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                let token = match word.as_str() {
                    "true" => Token::Bool(true),
                    "false" => Token::Bool(false),
                    _ => {
                        return Err(ExpressionError::Syntax {
                            position: start,
                            message: format!("알 수 없는 식별자 {}", word),
                        })
                    }
                };
                tokens.push((start, token));
                continue;
            }
            _ => {
                let next = chars.get(i + 1).copied();
                let (token, width) = match (c, next) {
                    ('=', Some('=')) => (Token::Bin(BinOp::Eq), 2),
                    ('=', Some('~')) => (Token::Bin(BinOp::Match), 2),
                    ('!', Some('=')) => (Token::Bin(BinOp::Ne), 2),
                    ('!', Some('~')) => (Token::Bin(BinOp::NotMatch), 2),
                    ('<', Some('=')) => (Token::Bin(BinOp::Le), 2),
                    ('>', Some('=')) => (Token::Bin(BinOp::Ge), 2),
                    ('&', Some('&')) => (Token::Bin(BinOp::And), 2),
                    ('|', Some('|')) => (Token::Bin(BinOp::Or), 2),
                    ('<', _) => (Token::Bin(BinOp::Lt), 1),
                    ('>', _) => (Token::Bin(BinOp::Gt), 1),
                    ('!', _) => (Token::Not, 1),
                    ('+', _) => (Token::Bin(BinOp::Add), 1),
                    ('-', _) => (Token::Bin(BinOp::Sub), 1),
                    ('*', _) => (Token::Bin(BinOp::Mul), 1),
                    ('/', _) => (Token::Bin(BinOp::Div), 1),
                    ('%', _) => (Token::Bin(BinOp::Rem), 1),
                    ('(', _) => (Token::LParen, 1),
                    (')', _) => (Token::RParen, 1),
                    ('?', _) => (Token::Question, 1),
                    (':', _) => (Token::Colon, 1),
                    _ => {
                        return Err(ExpressionError::Syntax {
                            position: start,
                            message: format!("알 수 없는 문자 {:?}", c),
                        })
                    }
                };
                i += width;
                token
            }
        };
        tokens.push((start, token));
    }

    Ok(tokens)
}

struct Parser<'a> {
    tokens: Vec<(usize, Token)>,
    pos: usize,
    regexes: Option<&'a RegexCache>,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(_, t)| t)
    }

    fn peek_with_pos(&self) -> Option<(usize, &Token)> {
        self.tokens.get(self.pos).map(|(p, t)| (*p, t))
    }

    fn position(&self) -> usize {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map(|(p, _)| *p)
            .unwrap_or(0)
    }

    fn next(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).map(|(_, t)| t.clone());
        self.pos += 1;
        tok
    }

    fn expect(&mut self, expected: Token) -> Result<(), ExpressionError> {
        let position = self.position();
        match self.next() {
            Some(tok) if tok == expected => Ok(()),
            other => Err(ExpressionError::Syntax {
                position,
                message: format!("{:?} 필요, {:?} 발견", expected, other),
            }),
        }
    }

    fn ternary(&mut self) -> Result<Expr, ExpressionError> {
        let cond = self.binary(1)?;
        if self.peek() == Some(&Token::Question) {
            self.next();
            let then = self.ternary()?;
            self.expect(Token::Colon)?;
            let otherwise = self.ternary()?;
            return Ok(Expr::Ternary(Box::new(cond), Box::new(then), Box::new(otherwise)));
        }
        Ok(cond)
    }

    fn binary(&mut self, min_prec: u8) -> Result<Expr, ExpressionError> {
        let mut lhs = self.unary()?;
        while let Some(Token::Bin(op)) = self.peek() {
            let op = *op;
            if op.precedence() < min_prec {
                break;
            }
            self.next();
            let rhs = self.binary(op.precedence() + 1)?;
            lhs = match (op, rhs) {
                (BinOp::Match | BinOp::NotMatch, Expr::Literal(Value::Str(pattern))) => {
                    let re = match self.regexes {
                        Some(cache) => cache.get_or_compile(&pattern)?,
                        None => Arc::new(compile_regex(&pattern)?),
                    };
                    Expr::Match(op == BinOp::NotMatch, Box::new(lhs), re)
                }
                (op, rhs) => Expr::Binary(op, Box::new(lhs), Box::new(rhs)),
            };
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Expr, ExpressionError> {
        match self.peek() {
            Some(Token::Not) => {
                self.next();
                Ok(Expr::Not(Box::new(self.unary()?)))
            }
            Some(Token::Bin(BinOp::Sub)) => {
                self.next();
                Ok(Expr::Neg(Box::new(self.unary()?)))
            }
            _ => self.primary(),
        }
    }

    fn primary(&mut self) -> Result<Expr, ExpressionError> {
        let position = self.position();
        match self.next() {
            Some(Token::Number(n)) => Ok(Expr::Literal(Value::Number(n))),
            Some(Token::Str(s)) => Ok(Expr::Literal(Value::Str(s))),
            Some(Token::Bool(b)) => Ok(Expr::Literal(Value::Bool(b))),
            Some(Token::LParen) => {
                let inner = self.ternary()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            other => Err(ExpressionError::Syntax {
                position,
                message: match other {
                    Some(tok) => format!("예상치 못한 토큰 {:?}", tok),
                    None => "표현식이 비어 있거나 끝이 잘림".into(),
                },
            }),
        }
    }
}

fn eval(expr: &Expr) -> Result<Value, ExpressionError> {
    match expr {
        Expr::Literal(v) => Ok(v.clone()),
        Expr::Not(inner) => Ok(Value::Bool(!expect_bool(&eval(inner)?, "!")?)),
        Expr::Neg(inner) => {
            let v = eval(inner)?;
            let n = v.as_number().ok_or_else(|| type_error("-", &v))?;
            Ok(Value::Number(-n))
        }
        Expr::Ternary(cond, then, otherwise) => {
            if expect_bool(&eval(cond)?, "?")? {
                eval(then)
            } else {
                eval(otherwise)
            }
        }
        Expr::Binary(BinOp::And, l, r) => {
            if !expect_bool(&eval(l)?, "&&")? {
                return Ok(Value::Bool(false));
            }
            Ok(Value::Bool(expect_bool(&eval(r)?, "&&")?))
        }
        Expr::Binary(BinOp::Or, l, r) => {
            if expect_bool(&eval(l)?, "||")? {
                return Ok(Value::Bool(true));
            }
            Ok(Value::Bool(expect_bool(&eval(r)?, "||")?))
        }
        Expr::Binary(op, l, r) => binary(*op, eval(l)?, eval(r)?),
        Expr::Match(negate, l, re) => match eval(l)? {
            Value::Str(text) => Ok(Value::Bool(re.is_match(&text) != *negate)),
            other => Err(ExpressionError::Type(format!(
                "정규식 매칭은 문자열만 가능: {} =~ string",
                other.type_name()
            ))),
        },
    }
}

fn binary(op: BinOp, l: Value, r: Value) -> Result<Value, ExpressionError> {
    match op {
        BinOp::Eq => Ok(Value::Bool(equals(&l, &r))),
        BinOp::Ne => Ok(Value::Bool(!equals(&l, &r))),
        BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
            let ordering = compare(&l, &r)?;
            Ok(Value::Bool(match op {
                BinOp::Lt => ordering.is_lt(),
                BinOp::Le => ordering.is_le(),
                BinOp::Gt => ordering.is_gt(),
                _ => ordering.is_ge(),
            }))
        }
        BinOp::Match | BinOp::NotMatch => {
            let (Value::Str(text), Value::Str(pattern)) = (&l, &r) else {
                return Err(ExpressionError::Type(format!(
                    "정규식 매칭은 문자열만 가능: {} =~ {}",
                    l.type_name(),
                    r.type_name()
                )));
            };
            let re = compile_regex(pattern)?;
            let matched = re.is_match(text);
            Ok(Value::Bool(if op == BinOp::Match { matched } else { !matched }))
        }
        BinOp::Add => match (&l, &r) {
            (Value::Number(a), Value::Number(b)) => Ok(Value::Number(a + b)),
            (Value::Str(_), _) | (_, Value::Str(_)) => Ok(Value::Str(format!("{}{}", l, r))),
            _ => Err(type_error("+", &l)),
        },
        BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Rem => {
            let a = l.as_number().ok_or_else(|| type_error("산술", &l))?;
            let b = r.as_number().ok_or_else(|| type_error("산술", &r))?;
            match op {
                BinOp::Sub => Ok(Value::Number(a - b)),
                BinOp::Mul => Ok(Value::Number(a * b)),
                _ if b == 0.0 => Err(ExpressionError::DivisionByZero),
                BinOp::Div => Ok(Value::Number(a / b)),
                _ => Ok(Value::Number(a % b)),
            }
        }
        BinOp::And | BinOp::Or => unreachable!("논리 연산자는 eval에서 단락 평가됨"),
    }
}

fn equals(l: &Value, r: &Value) -> bool {
    match (l, r) {
        (Value::Number(_), Value::Str(_)) | (Value::Str(_), Value::Number(_)) => {
            match (l.as_number(), r.as_number()) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            }
        }
        _ => l == r,
    }
}

fn compare(l: &Value, r: &Value) -> Result<std::cmp::Ordering, ExpressionError> {
    if let (Value::Str(a), Value::Str(b)) = (l, r) {
        if let (Ok(x), Ok(y)) = (a.trim().parse::<f64>(), b.trim().parse::<f64>()) {
            return x.partial_cmp(&y).ok_or_else(|| ExpressionError::Type("NaN 비교".into()));
        }
        return Ok(a.cmp(b));
    }
    let a = l.as_number().ok_or_else(|| type_error("비교", l))?;
    let b = r.as_number().ok_or_else(|| type_error("비교", r))?;
    a.partial_cmp(&b).ok_or_else(|| ExpressionError::Type("NaN 비교".into()))
}

fn expect_bool(v: &Value, op: &str) -> Result<bool, ExpressionError> {
    match v {
        Value::Bool(b) => Ok(*b),
        other => Err(type_error(op, other)),
    }
}

fn type_error(op: &str, v: &Value) -> ExpressionError {
    ExpressionError::Type(format!("{} 연산에 {} 값 사용 불가: {}", op, v.type_name(), v))
}
