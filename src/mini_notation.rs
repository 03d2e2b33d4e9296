//! Mini-notation parser: the compact textual DSL compiled into patterns
//!
//! `"bd [hh hh] sd"` tokenizes, parses into a small AST and lowers into a
//! pattern. Sequences divide the cycle into equal steps, `[ ]` groups nest,
//! `< >` alternates one element per cycle, `,` stacks, `~`/`-` rest, `_`
//! elongates, `*n` speeds up, `!n` replicates and `name(p,s[,r])` applies a
//! Euclidean rhythm.
//!
//! The lowering works per cycle index: each node knows how to produce its
//! events for cycle `n`, and `*n` re-keys those indices so one output cycle
//! concatenates the source's next `n` cycles. Alternations therefore advance
//! by the cycle the surrounding pattern actually runs at, which is what makes
//! `<a b c>*4` pull four consecutive elements into a single cycle.

use crate::control::ControlMap;
use crate::pattern::{Fraction, Hap, Pattern, TimeSpan};
use crate::pattern_ops::bjorklund;
use std::fmt;

/// A value produced by the mini-notation: a bare word, a number, or a
/// `name:n` sound atom already shaped as a control map.
#[derive(Debug, Clone, PartialEq)]
pub enum PatternValue {
    Str(String),
    Num(f64),
    Ctrl(ControlMap),
}

impl PatternValue {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            PatternValue::Num(n) => Some(*n),
            PatternValue::Str(s) => s.parse().ok(),
            PatternValue::Ctrl(map) => map.num("n"),
        }
    }

    pub fn as_string(&self) -> String {
        match self {
            PatternValue::Str(s) => s.clone(),
            PatternValue::Num(n) => n.to_string(),
            PatternValue::Ctrl(map) => map.str("s").unwrap_or_default().to_string(),
        }
    }
}

/// Error from tokenizing or parsing, pointing at the offending fragment.
#[derive(Debug, Clone)]
pub struct ParseError {
    pub message: String,
    pub position: usize,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (at position {})", self.message, self.position)
    }
}

impl std::error::Error for ParseError {}

// ============= Tokenizer =============

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Symbol(String),
    Number(f64),
    Rest,       // ~ or -
    Hold,       // _
    OpenBracket,
    CloseBracket,
    OpenAngle,
    CloseAngle,
    OpenParen,
    CloseParen,
    Comma,
    Star,
    Slash,
    Colon,
    Bang,
    Question,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Symbol(s) => write!(f, "'{}'", s),
            Token::Number(n) => write!(f, "'{}'", n),
            Token::Rest => write!(f, "'~'"),
            Token::Hold => write!(f, "'_'"),
            Token::OpenBracket => write!(f, "'['"),
            Token::CloseBracket => write!(f, "']'"),
            Token::OpenAngle => write!(f, "'<'"),
            Token::CloseAngle => write!(f, "'>'"),
            Token::OpenParen => write!(f, "'('"),
            Token::CloseParen => write!(f, "')'"),
            Token::Comma => write!(f, "','"),
            Token::Star => write!(f, "'*'"),
            Token::Slash => write!(f, "'/'"),
            Token::Colon => write!(f, "':'"),
            Token::Bang => write!(f, "'!'"),
            Token::Question => write!(f, "'?'"),
        }
    }
}

fn tokenize(input: &str) -> Result<Vec<(Token, usize)>, ParseError> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let pos = i;
        match c {
            c if c.is_whitespace() => {
                i += 1;
            }
            '[' => { tokens.push((Token::OpenBracket, pos)); i += 1; }
            ']' => { tokens.push((Token::CloseBracket, pos)); i += 1; }
            '<' => { tokens.push((Token::OpenAngle, pos)); i += 1; }
            '>' => { tokens.push((Token::CloseAngle, pos)); i += 1; }
            '(' => { tokens.push((Token::OpenParen, pos)); i += 1; }
            ')' => { tokens.push((Token::CloseParen, pos)); i += 1; }
            ',' => { tokens.push((Token::Comma, pos)); i += 1; }
            '*' => { tokens.push((Token::Star, pos)); i += 1; }
            '/' => { tokens.push((Token::Slash, pos)); i += 1; }
            ':' => { tokens.push((Token::Colon, pos)); i += 1; }
            '!' => { tokens.push((Token::Bang, pos)); i += 1; }
            '?' => { tokens.push((Token::Question, pos)); i += 1; }
            '~' => { tokens.push((Token::Rest, pos)); i += 1; }
            '-' => {
                // A '-' is a rest unless it starts a negative number.
                if i + 1 < chars.len() && chars[i + 1].is_ascii_digit() {
                    let (num, next) = read_number(&chars, i)?;
                    tokens.push((Token::Number(num), pos));
                    i = next;
                } else {
                    tokens.push((Token::Rest, pos));
                    i += 1;
                }
            }
            c if c.is_ascii_digit() => {
                let (num, next) = read_number(&chars, i)?;
                tokens.push((Token::Number(num), pos));
                i = next;
            }
            c if c.is_alphabetic() || c == '_' || c == '#' => {
                let mut name = String::new();
                while i < chars.len() {
                    let c = chars[i];
                    if c.is_alphanumeric() || c == '_' || c == '#' {
                        name.push(c);
                        i += 1;
                    } else {
                        break;
                    }
                }
                if name == "_" {
                    tokens.push((Token::Hold, pos));
                } else {
                    tokens.push((Token::Symbol(name), pos));
                }
            }
            other => {
                return Err(ParseError {
                    message: format!("unexpected character '{}'", other),
                    position: pos,
                });
            }
        }
    }
    Ok(tokens)
}

fn read_number(chars: &[char], start: usize) -> Result<(f64, usize), ParseError> {
    let mut i = start;
    let mut text = String::new();
    if chars[i] == '-' {
        text.push('-');
        i += 1;
    }
    let mut seen_dot = false;
    while i < chars.len() {
        let c = chars[i];
        if c.is_ascii_digit() {
            text.push(c);
            i += 1;
        } else if c == '.' && !seen_dot {
            seen_dot = true;
            text.push(c);
            i += 1;
        } else {
            break;
        }
    }
    text.parse()
        .map(|n| (n, i))
        .map_err(|_| ParseError {
            message: format!("malformed number '{}'", text),
            position: start,
        })
}

// ============= AST =============

#[derive(Debug, Clone)]
enum Node {
    Atom(PatternValue),
    Rest,
    /// `_` inside `<...>`: repeat the previous cycle's element.
    Hold,
    /// Weighted steps of a sequence; `_` elongation raises a step's weight.
    Seq(Vec<(Node, u32)>),
    Stack(Vec<Node>),
    Alt(Vec<Node>),
    Fast(Box<Node>, u32),
    Slow(Box<Node>, u32),
    Degrade(Box<Node>, f64),
    Euclid {
        subject: Box<Node>,
        pulses: Box<Node>,
        steps: Box<Node>,
        rotation: Option<Box<Node>>,
    },
}

// ============= Parser =============

struct Parser {
    tokens: Vec<(Token, usize)>,
    position: usize,
    len: usize,
}

impl Parser {
    fn new(tokens: Vec<(Token, usize)>, source_len: usize) -> Self {
        Self {
            tokens,
            position: 0,
            len: source_len,
        }
    }

    fn current(&self) -> Option<&Token> {
        self.tokens.get(self.position).map(|(t, _)| t)
    }

    fn pos(&self) -> usize {
        self.tokens
            .get(self.position)
            .map(|(_, p)| *p)
            .unwrap_or(self.len)
    }

    fn advance(&mut self) {
        self.position += 1;
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        ParseError {
            message: message.into(),
            position: self.pos(),
        }
    }

    fn expect(&mut self, token: Token) -> Result<(), ParseError> {
        match self.current() {
            Some(t) if *t == token => {
                self.advance();
                Ok(())
            }
            Some(t) => Err(self.error(format!("expected {}, found {}", token, t))),
            None => Err(self.error(format!("expected {}, found end of input", token))),
        }
    }

    /// pattern = sequence ("," sequence)*
    fn parse_pattern(&mut self, closer: Option<&Token>) -> Result<Node, ParseError> {
        let mut alternatives = vec![self.parse_sequence(closer)?];
        while self.current() == Some(&Token::Comma) {
            self.advance();
            alternatives.push(self.parse_sequence(closer)?);
        }
        if alternatives.len() == 1 {
            Ok(alternatives.pop().unwrap())
        } else {
            Ok(Node::Stack(alternatives))
        }
    }

    /// sequence = element+ with `_` elongation and `!n` replication folded in
    fn parse_sequence(&mut self, closer: Option<&Token>) -> Result<Node, ParseError> {
        let mut steps: Vec<(Node, u32)> = Vec::new();
        loop {
            match self.current() {
                None | Some(Token::Comma) => break,
                Some(t) if Some(t) == closer => break,
                Some(Token::CloseBracket) | Some(Token::CloseAngle) | Some(Token::CloseParen) => {
                    return Err(self.error(format!(
                        "unmatched {}",
                        self.current().unwrap()
                    )));
                }
                Some(Token::Hold) => {
                    self.advance();
                    match steps.last_mut() {
                        Some(step) => step.1 += 1,
                        None => return Err(self.error("'_' has no step to elongate")),
                    }
                }
                _ => {
                    let (node, replicate) = self.parse_element()?;
                    for _ in 0..replicate {
                        steps.push((node.clone(), 1));
                    }
                }
            }
        }
        match steps.len() {
            0 => Ok(Node::Rest),
            1 if steps[0].1 == 1 => Ok(steps.pop_node()),
            _ => Ok(Node::Seq(steps)),
        }
    }

    /// One element plus its trailing `*n` / `/n` / `?` modifiers. Returns the
    /// node and how many times `!n` replicates it into the sequence.
    fn parse_element(&mut self) -> Result<(Node, u32), ParseError> {
        let mut node = self.parse_primary()?;
        let mut replicate = 1;
        loop {
            match self.current() {
                Some(Token::Star) => {
                    self.advance();
                    let n = self.parse_count("'*'")?;
                    node = Node::Fast(Box::new(node), n);
                }
                Some(Token::Slash) => {
                    self.advance();
                    let n = self.parse_count("'/'")?;
                    node = Node::Slow(Box::new(node), n);
                }
                Some(Token::Bang) => {
                    self.advance();
                    replicate = self.parse_count("'!'")?;
                }
                Some(Token::Question) => {
                    self.advance();
                    let prob = match self.current() {
                        Some(Token::Number(n)) => {
                            let n = *n;
                            self.advance();
                            n
                        }
                        _ => 0.5,
                    };
                    node = Node::Degrade(Box::new(node), prob);
                }
                _ => break,
            }
        }
        Ok((node, replicate))
    }

    fn parse_count(&mut self, after: &str) -> Result<u32, ParseError> {
        match self.current() {
            Some(Token::Number(n)) => {
                let n = *n;
                if n.fract() != 0.0 || n < 1.0 {
                    return Err(self.error(format!(
                        "{} needs a positive whole number, found {}",
                        after, n
                    )));
                }
                self.advance();
                Ok(n as u32)
            }
            Some(t) => Err(self.error(format!("{} needs a number, found {}", after, t))),
            None => Err(self.error(format!("{} needs a number, found end of input", after))),
        }
    }

    fn parse_primary(&mut self) -> Result<Node, ParseError> {
        match self.current().cloned() {
            Some(Token::Symbol(name)) => {
                self.advance();
                // name:n selects a numbered sound from a bank
                if self.current() == Some(&Token::Colon) {
                    self.advance();
                    let index = match self.current() {
                        Some(Token::Number(n)) if n.fract() == 0.0 && *n >= 0.0 => {
                            let n = *n;
                            self.advance();
                            n
                        }
                        _ => return Err(self.error(format!("'{}:' needs a sample index", name))),
                    };
                    let mut map = ControlMap::single("s", name.as_str());
                    map.insert("n", index);
                    return self.maybe_euclid(Node::Atom(PatternValue::Ctrl(map)));
                }
                self.maybe_euclid(Node::Atom(PatternValue::Str(name)))
            }
            Some(Token::Number(n)) => {
                self.advance();
                Ok(Node::Atom(PatternValue::Num(n)))
            }
            Some(Token::Rest) => {
                self.advance();
                Ok(Node::Rest)
            }
            Some(Token::OpenBracket) => {
                self.advance();
                let node = self.parse_pattern(Some(&Token::CloseBracket))?;
                self.expect(Token::CloseBracket)?;
                Ok(node)
            }
            Some(Token::OpenAngle) => {
                self.advance();
                let node = self.parse_alternation()?;
                self.expect(Token::CloseAngle)?;
                Ok(node)
            }
            Some(t) => Err(self.error(format!("unexpected {}", t))),
            None => Err(self.error("unexpected end of input")),
        }
    }

    /// `< a b c >` — one element per cycle; `_` repeats the previous cycle.
    fn parse_alternation(&mut self) -> Result<Node, ParseError> {
        let mut elements = Vec::new();
        loop {
            match self.current() {
                None | Some(Token::CloseAngle) => break,
                Some(Token::Hold) => {
                    self.advance();
                    elements.push(Node::Hold);
                }
                _ => {
                    let (node, replicate) = self.parse_element()?;
                    for _ in 0..replicate {
                        elements.push(node.clone());
                    }
                }
            }
        }
        if elements.is_empty() {
            return Ok(Node::Rest);
        }
        Ok(Node::Alt(elements))
    }

    /// `name(pulses, steps [, rotation])` — Euclidean rhythm application.
    fn maybe_euclid(&mut self, subject: Node) -> Result<Node, ParseError> {
        if self.current() != Some(&Token::OpenParen) {
            return Ok(subject);
        }
        self.advance();
        let pulses = self.parse_euclid_arg()?;
        self.expect(Token::Comma)?;
        let steps = self.parse_euclid_arg()?;
        let rotation = if self.current() == Some(&Token::Comma) {
            self.advance();
            Some(Box::new(self.parse_euclid_arg()?))
        } else {
            None
        };
        self.expect(Token::CloseParen)?;
        Ok(Node::Euclid {
            subject: Box::new(subject),
            pulses: Box::new(pulses),
            steps: Box::new(steps),
            rotation,
        })
    }

    fn parse_euclid_arg(&mut self) -> Result<Node, ParseError> {
        match self.current().cloned() {
            Some(Token::Number(n)) => {
                self.advance();
                Ok(Node::Atom(PatternValue::Num(n)))
            }
            Some(Token::OpenAngle) => {
                self.advance();
                let node = self.parse_alternation()?;
                self.expect(Token::CloseAngle)?;
                Ok(node)
            }
            Some(t) => Err(self.error(format!("expected a number or '<...>', found {}", t))),
            None => Err(self.error("expected a number, found end of input")),
        }
    }
}

trait PopNode {
    fn pop_node(self) -> Node;
}

impl PopNode for Vec<(Node, u32)> {
    fn pop_node(mut self) -> Node {
        self.pop().map(|(n, _)| n).unwrap_or(Node::Rest)
    }
}

// ============= Lowering =============

/// One event inside a single cycle, in cycle-relative time. Slowed patterns
/// can produce wholes reaching outside `[0, 1)`; the final query clips the
/// part against the cycle.
#[derive(Debug, Clone)]
struct Ev {
    span: TimeSpan,
    value: PatternValue,
}

fn whole_cycle() -> TimeSpan {
    TimeSpan::new(Fraction::from_int(0), Fraction::from_int(1))
}

fn events(node: &Node, cycle: i64) -> Vec<Ev> {
    match node {
        Node::Atom(v) => vec![Ev {
            span: whole_cycle(),
            value: v.clone(),
        }],
        Node::Rest | Node::Hold => vec![],
        Node::Seq(steps) => {
            let total: u32 = steps.iter().map(|(_, w)| w).sum();
            let total = Fraction::from_int(total as i64);
            let mut out = Vec::new();
            let mut cum = 0i64;
            for (child, weight) in steps {
                let begin = Fraction::from_int(cum) / total;
                cum += *weight as i64;
                let width = Fraction::from_int(*weight as i64) / total;
                for ev in events(child, cycle) {
                    out.push(Ev {
                        span: ev.span.map_time(|t| begin + t * width),
                        value: ev.value,
                    });
                }
            }
            out
        }
        Node::Stack(children) => children
            .iter()
            .flat_map(|child| events(child, cycle))
            .collect(),
        Node::Alt(elements) => {
            let k = elements.len() as i64;
            // `_` repeats the previous cycle's element; walk back at most a
            // full rotation so an all-hold alternation stays silent.
            let mut at = cycle;
            for _ in 0..elements.len() {
                let idx = at.rem_euclid(k) as usize;
                if matches!(elements[idx], Node::Hold) {
                    at -= 1;
                } else {
                    return events(&elements[idx], at.div_euclid(k));
                }
            }
            vec![]
        }
        Node::Fast(child, n) => {
            let n = *n as i64;
            let width = Fraction::new(1, n);
            let mut out = Vec::new();
            for j in 0..n {
                let offset = Fraction::new(j, n);
                for ev in events(child, cycle * n + j) {
                    out.push(Ev {
                        span: ev.span.map_time(|t| offset + t * width),
                        value: ev.value,
                    });
                }
            }
            out
        }
        Node::Slow(child, m) => {
            let m = *m as i64;
            let scale = Fraction::from_int(m);
            let offset = Fraction::from_int(cycle.rem_euclid(m));
            events(child, cycle.div_euclid(m))
                .into_iter()
                .map(|ev| Ev {
                    span: ev.span.map_time(|t| t * scale - offset),
                    value: ev.value,
                })
                .collect()
        }
        Node::Degrade(child, prob) => {
            use rand::{rngs::StdRng, Rng, SeedableRng};
            events(child, cycle)
                .into_iter()
                .filter(|ev| {
                    let at = Fraction::from_int(cycle) + ev.span.begin;
                    let seed = (at.numerator as u64).wrapping_mul(0x9e3779b97f4a7c15)
                        ^ (at.denominator as u64).wrapping_mul(0x85ebca6b0b7e3a85);
                    let mut rng = StdRng::seed_from_u64(seed);
                    rng.gen::<f64>() >= *prob
                })
                .collect()
        }
        Node::Euclid {
            subject,
            pulses,
            steps,
            rotation,
        } => {
            // Arguments may alternate per cycle, so resolve them here.
            let p = resolve_number(pulses, cycle).unwrap_or(0.0).max(0.0) as usize;
            let s = resolve_number(steps, cycle).unwrap_or(0.0).max(0.0) as usize;
            let r = rotation
                .as_deref()
                .and_then(|n| resolve_number(n, cycle))
                .unwrap_or(0.0) as i32;
            if p == 0 || s == 0 {
                return vec![];
            }
            let mut slots = bjorklund(p, s);
            slots.rotate_left(r.rem_euclid(s as i32) as usize);
            let steps_f = Fraction::from_int(s as i64);
            let mut out = Vec::new();
            for (i, on) in slots.iter().enumerate() {
                if !on {
                    continue;
                }
                let begin = Fraction::from_int(i as i64) / steps_f;
                let width = Fraction::from_int(1) / steps_f;
                for ev in events(subject, cycle) {
                    out.push(Ev {
                        span: ev.span.map_time(|t| begin + t * width),
                        value: ev.value,
                    });
                }
            }
            out
        }
    }
}

fn resolve_number(node: &Node, cycle: i64) -> Option<f64> {
    events(node, cycle)
        .first()
        .and_then(|ev| ev.value.as_number())
}

fn to_pattern(node: Node) -> Pattern<PatternValue> {
    Pattern::new(move |state| {
        let mut haps = Vec::new();
        for sub in state.span.cycles() {
            let base = sub.begin.sam();
            let cycle = sub.begin.floor();
            for ev in events(&node, cycle) {
                let whole = ev.span.map_time(|t| base + t);
                if let Some(part) = whole.intersection(&sub) {
                    haps.push(Hap::new(Some(whole), part, ev.value));
                }
            }
        }
        haps.sort_by(|a, b| a.part.begin.cmp(&b.part.begin));
        haps
    })
}

/// Parse a mini-notation string into a pattern of values.
pub fn parse_mini_notation(input: &str) -> Result<Pattern<PatternValue>, ParseError> {
    let tokens = tokenize(input)?;
    let mut parser = Parser::new(tokens, input.len());
    let ast = parser.parse_pattern(None)?;
    if parser.current().is_some() {
        return Err(parser.error(format!(
            "trailing {} after pattern",
            parser.current().unwrap()
        )));
    }
    Ok(to_pattern(ast))
}
