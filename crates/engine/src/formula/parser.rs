// Formula parser - converts formula strings into AST
// Supports: numbers, string literals, cell refs (A1, $A$1), ranges (A1:A5), functions (SUM),
// arithmetic (+, -, *, /, ^), concatenation (&), comparisons (<, >, =, <=, >=, <>)

use crate::cell_id::CellId;

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Text(String),
    Boolean(bool),
    CellRef(CellId),
    Range(CellId, CellId),
    Function { name: String, args: Vec<Expr> },
    Neg(Box<Expr>),
    BinaryOp { op: Op, left: Box<Expr>, right: Box<Expr> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    Concat,
    Lt,
    Gt,
    Eq,
    LtEq,
    GtEq,
    NotEq,
}

/// Parse a formula (with or without the leading `=`).
pub fn parse(formula: &str) -> Result<Expr, String> {
    let body = formula.trim();
    let body = body.strip_prefix('=').unwrap_or(body);
    let tokens = tokenize(body)?;
    if tokens.is_empty() {
        return Err("Empty formula".to_string());
    }
    let (expr, pos) = parse_comparison(&tokens, 0)?;
    if pos != tokens.len() {
        return Err(format!("Unexpected token at position {}", pos));
    }
    Ok(expr)
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    StringLit(String),
    CellRef(CellId),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    Caret,
    Ampersand,
    LParen,
    RParen,
    Colon,
    Comma,
    Lt,
    Gt,
    Eq,
    LtEq,
    GtEq,
    NotEq,
}

fn tokenize(input: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            ' ' | '\t' | '\n' => { chars.next(); }
            '+' => { tokens.push(Token::Plus); chars.next(); }
            '-' => { tokens.push(Token::Minus); chars.next(); }
            '*' => { tokens.push(Token::Star); chars.next(); }
            '/' => { tokens.push(Token::Slash); chars.next(); }
            '^' => { tokens.push(Token::Caret); chars.next(); }
            '&' => { tokens.push(Token::Ampersand); chars.next(); }
            '(' => { tokens.push(Token::LParen); chars.next(); }
            ')' => { tokens.push(Token::RParen); chars.next(); }
            ':' => { tokens.push(Token::Colon); chars.next(); }
            ',' => { tokens.push(Token::Comma); chars.next(); }
            '=' => { tokens.push(Token::Eq); chars.next(); }
            '<' => {
                chars.next();
                match chars.peek() {
                    Some('=') => { tokens.push(Token::LtEq); chars.next(); }
                    Some('>') => { tokens.push(Token::NotEq); chars.next(); }
                    _ => tokens.push(Token::Lt),
                }
            }
            '>' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    tokens.push(Token::GtEq);
                    chars.next();
                } else {
                    tokens.push(Token::Gt);
                }
            }
            '"' => {
                chars.next();
                let mut s = String::new();
                loop {
                    match chars.next() {
                        // Doubled quote is an escaped quote
                        Some('"') if chars.peek() == Some(&'"') => {
                            chars.next();
                            s.push('"');
                        }
                        Some('"') => break,
                        Some(ch) => s.push(ch),
                        None => return Err("Unterminated string literal".to_string()),
                    }
                }
                tokens.push(Token::StringLit(s));
            }
            'A'..='Z' | 'a'..='z' | '$' | '_' => {
                let mut ident = String::new();
                while let Some(&ch) = chars.peek() {
                    if ch.is_ascii_alphanumeric() || ch == '_' || ch == '$' || ch == '.' {
                        ident.push(ch);
                        chars.next();
                    } else {
                        break;
                    }
                }
                if let Some(id) = CellId::parse(&ident) {
                    tokens.push(Token::CellRef(id));
                } else if ident.contains('$') {
                    return Err(format!("Invalid cell reference: {}", ident));
                } else {
                    tokens.push(Token::Ident(ident.to_uppercase()));
                }
            }
            '0'..='9' | '.' => {
                let mut num_str = String::new();
                while let Some(&d) = chars.peek() {
                    if d.is_ascii_digit() || d == '.' {
                        num_str.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                // Exponent part: 1E5, 2.5e-3
                if matches!(chars.peek(), Some('e') | Some('E')) {
                    let mut lookahead = chars.clone();
                    lookahead.next();
                    let mut exp = String::from("e");
                    if let Some(&sign) = lookahead.peek() {
                        if sign == '+' || sign == '-' {
                            exp.push(sign);
                            lookahead.next();
                        }
                    }
                    if lookahead.peek().is_some_and(|d| d.is_ascii_digit()) {
                        while let Some(&d) = lookahead.peek() {
                            if d.is_ascii_digit() {
                                exp.push(d);
                                lookahead.next();
                            } else {
                                break;
                            }
                        }
                        chars = lookahead;
                        num_str.push_str(&exp);
                    }
                }
                let num: f64 = num_str.parse().map_err(|_| format!("Invalid number: {}", num_str))?;
                tokens.push(Token::Number(num));
            }
            _ => return Err(format!("Unexpected character: {}", c)),
        }
    }

    Ok(tokens)
}

// Lowest precedence: comparison operators
fn parse_comparison(tokens: &[Token], pos: usize) -> Result<(Expr, usize), String> {
    let (mut left, mut pos) = parse_concat(tokens, pos)?;

    while pos < tokens.len() {
        let op = match &tokens[pos] {
            Token::Lt => Op::Lt,
            Token::Gt => Op::Gt,
            Token::Eq => Op::Eq,
            Token::LtEq => Op::LtEq,
            Token::GtEq => Op::GtEq,
            Token::NotEq => Op::NotEq,
            _ => break,
        };
        let (right, new_pos) = parse_concat(tokens, pos + 1)?;
        left = binary(op, left, right);
        pos = new_pos;
    }

    Ok((left, pos))
}

fn parse_concat(tokens: &[Token], pos: usize) -> Result<(Expr, usize), String> {
    let (mut left, mut pos) = parse_add_sub(tokens, pos)?;

    while pos < tokens.len() && tokens[pos] == Token::Ampersand {
        let (right, new_pos) = parse_add_sub(tokens, pos + 1)?;
        left = binary(Op::Concat, left, right);
        pos = new_pos;
    }

    Ok((left, pos))
}

fn parse_add_sub(tokens: &[Token], pos: usize) -> Result<(Expr, usize), String> {
    let (mut left, mut pos) = parse_mul_div(tokens, pos)?;

    while pos < tokens.len() {
        let op = match &tokens[pos] {
            Token::Plus => Op::Add,
            Token::Minus => Op::Sub,
            _ => break,
        };
        let (right, new_pos) = parse_mul_div(tokens, pos + 1)?;
        left = binary(op, left, right);
        pos = new_pos;
    }

    Ok((left, pos))
}

fn parse_mul_div(tokens: &[Token], pos: usize) -> Result<(Expr, usize), String> {
    let (mut left, mut pos) = parse_power(tokens, pos)?;

    while pos < tokens.len() {
        let op = match &tokens[pos] {
            Token::Star => Op::Mul,
            Token::Slash => Op::Div,
            _ => break,
        };
        let (right, new_pos) = parse_power(tokens, pos + 1)?;
        left = binary(op, left, right);
        pos = new_pos;
    }

    Ok((left, pos))
}

// Exponentiation (^) - right-associative
fn parse_power(tokens: &[Token], pos: usize) -> Result<(Expr, usize), String> {
    let (base, pos) = parse_unary(tokens, pos)?;

    if pos < tokens.len() && tokens[pos] == Token::Caret {
        let (exponent, new_pos) = parse_power(tokens, pos + 1)?;
        return Ok((binary(Op::Pow, base, exponent), new_pos));
    }

    Ok((base, pos))
}

fn parse_unary(tokens: &[Token], pos: usize) -> Result<(Expr, usize), String> {
    match tokens.get(pos) {
        Some(Token::Minus) => {
            let (expr, pos) = parse_unary(tokens, pos + 1)?;
            Ok((Expr::Neg(Box::new(expr)), pos))
        }
        Some(Token::Plus) => parse_unary(tokens, pos + 1),
        _ => parse_primary(tokens, pos),
    }
}

fn parse_primary(tokens: &[Token], pos: usize) -> Result<(Expr, usize), String> {
    let Some(token) = tokens.get(pos) else {
        return Err("Unexpected end of expression".to_string());
    };

    match token {
        Token::Number(n) => Ok((Expr::Number(*n), pos + 1)),
        Token::StringLit(s) => Ok((Expr::Text(s.clone()), pos + 1)),
        Token::CellRef(start) => {
            if let (Some(Token::Colon), Some(Token::CellRef(end))) = (tokens.get(pos + 1), tokens.get(pos + 2)) {
                return Ok((Expr::Range(*start, *end), pos + 3));
            }
            Ok((Expr::CellRef(*start), pos + 1))
        }
        Token::Ident(name) => {
            if tokens.get(pos + 1) == Some(&Token::LParen) {
                let (args, new_pos) = parse_function_args(tokens, pos + 2)?;
                return Ok((Expr::Function { name: name.clone(), args }, new_pos));
            }
            match name.as_str() {
                "TRUE" => Ok((Expr::Boolean(true), pos + 1)),
                "FALSE" => Ok((Expr::Boolean(false), pos + 1)),
                _ => Err(format!("Unknown name: {}", name)),
            }
        }
        Token::LParen => {
            let (expr, pos) = parse_comparison(tokens, pos + 1)?;
            match tokens.get(pos) {
                Some(Token::RParen) => Ok((expr, pos + 1)),
                _ => Err("Missing closing parenthesis".to_string()),
            }
        }
        _ => Err(format!("Unexpected token at position {}", pos)),
    }
}

fn parse_function_args(tokens: &[Token], pos: usize) -> Result<(Vec<Expr>, usize), String> {
    let mut args = Vec::new();
    let mut pos = pos;

    if tokens.get(pos) == Some(&Token::RParen) {
        return Ok((args, pos + 1));
    }

    loop {
        let (arg, new_pos) = parse_comparison(tokens, pos)?;
        args.push(arg);
        pos = new_pos;

        match tokens.get(pos) {
            Some(Token::RParen) => return Ok((args, pos + 1)),
            Some(Token::Comma) => pos += 1,
            Some(_) => return Err("Expected comma or closing parenthesis".to_string()),
            None => return Err("Missing closing parenthesis in function call".to_string()),
        }
    }
}

fn binary(op: Op, left: Expr, right: Expr) -> Expr {
    Expr::BinaryOp {
        op,
        left: Box::new(left),
        right: Box::new(right),
    }
}
