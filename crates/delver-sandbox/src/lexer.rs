//! Tokenizer for the sandbox script language.
//!
//! Line-oriented: `Newline` tokens separate statements, but newlines inside
//! brackets are suppressed so literals and call argument lists can span
//! lines. `#` starts a comment that runs to end of line.

use crate::value::ScriptError;

/// One lexical token.
#[derive(Clone, Debug, PartialEq)]
pub enum Token {
    /// Identifier or tool/builtin name.
    Ident(String),
    /// Integer literal.
    Int(i64),
    /// Float literal.
    Float(f64),
    /// String literal (escapes resolved).
    Str(String),

    /// `if`
    If,
    /// `elif`
    Elif,
    /// `else`
    Else,
    /// `for`
    For,
    /// `while`
    While,
    /// `in`
    In,
    /// `import`
    Import,
    /// `and`
    And,
    /// `or`
    Or,
    /// `not`
    Not,
    /// `break`
    Break,
    /// `continue`
    Continue,
    /// `true`
    True,
    /// `false`
    False,
    /// `null`
    Null,

    /// `=`
    Assign,
    /// `==`
    Eq,
    /// `!=`
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
    /// `+`
    Plus,
    /// `-`
    Minus,
    /// `*`
    Star,
    /// `/`
    Slash,
    /// `%`
    Percent,
    /// `(`
    LParen,
    /// `)`
    RParen,
    /// `[`
    LBracket,
    /// `]`
    RBracket,
    /// `{`
    LBrace,
    /// `}`
    RBrace,
    /// `,`
    Comma,
    /// `:`
    Colon,
    /// `.`
    Dot,

    /// Statement separator (newline or `;`).
    Newline,
}

fn keyword(ident: &str) -> Option<Token> {
    let token = match ident {
        "if" => Token::If,
        "elif" => Token::Elif,
        "else" => Token::Else,
        "for" => Token::For,
        "while" => Token::While,
        "in" => Token::In,
        "import" => Token::Import,
        "and" => Token::And,
        "or" => Token::Or,
        "not" => Token::Not,
        "break" => Token::Break,
        "continue" => Token::Continue,
        "true" => Token::True,
        "false" => Token::False,
        "null" => Token::Null,
        _ => return None,
    };
    Some(token)
}

/// Tokenize `source`, or fail with a `SyntaxError` naming the line.
pub fn tokenize(source: &str) -> Result<Vec<Token>, ScriptError> {
    let mut tokens = Vec::new();
    let mut chars = source.chars().peekable();
    let mut line = 1usize;
    // Paren/bracket depth; newlines inside brackets do not end statements.
    // Braces are block delimiters, so they do not suppress newlines.
    let mut depth = 0usize;

    while let Some(&c) = chars.peek() {
        match c {
            '\n' => {
                let _ = chars.next();
                line += 1;
                if depth == 0 && !matches!(tokens.last(), None | Some(Token::Newline)) {
                    tokens.push(Token::Newline);
                }
            }
            ';' => {
                let _ = chars.next();
                if !matches!(tokens.last(), None | Some(Token::Newline)) {
                    tokens.push(Token::Newline);
                }
            }
            c if c.is_whitespace() => {
                let _ = chars.next();
            }
            '#' => {
                while let Some(&c) = chars.peek() {
                    if c == '\n' {
                        break;
                    }
                    let _ = chars.next();
                }
            }
            '"' | '\'' => {
                let quote = c;
                let _ = chars.next();
                let mut text = String::new();
                loop {
                    match chars.next() {
                        None | Some('\n') => {
                            return Err(ScriptError::syntax_error(format!(
                                "unterminated string on line {line}"
                            )));
                        }
                        Some(c) if c == quote => break,
                        Some('\\') => match chars.next() {
                            Some('n') => text.push('\n'),
                            Some('t') => text.push('\t'),
                            Some('\\') => text.push('\\'),
                            Some(c) if c == quote => text.push(c),
                            Some(c) => {
                                return Err(ScriptError::syntax_error(format!(
                                    "unknown escape '\\{c}' on line {line}"
                                )));
                            }
                            None => {
                                return Err(ScriptError::syntax_error(format!(
                                    "unterminated string on line {line}"
                                )));
                            }
                        },
                        Some(c) => text.push(c),
                    }
                }
                tokens.push(Token::Str(text));
            }
            c if c.is_ascii_digit() => {
                let mut text = String::new();
                let mut is_float = false;
                while let Some(&c) = chars.peek() {
                    if c.is_ascii_digit() {
                        text.push(c);
                        let _ = chars.next();
                    } else if c == '.' && !is_float {
                        // A digit must follow; `1.method()` is not supported.
                        let mut ahead = chars.clone();
                        let _ = ahead.next();
                        if ahead.peek().is_some_and(char::is_ascii_digit) {
                            is_float = true;
                            text.push(c);
                            let _ = chars.next();
                        } else {
                            break;
                        }
                    } else {
                        break;
                    }
                }
                let token = if is_float {
                    text.parse::<f64>().map(Token::Float).map_err(|_| {
                        ScriptError::syntax_error(format!("bad float literal on line {line}"))
                    })?
                } else {
                    text.parse::<i64>().map(Token::Int).map_err(|_| {
                        ScriptError::syntax_error(format!(
                            "integer literal out of range on line {line}"
                        ))
                    })?
                };
                tokens.push(token);
            }
            c if c.is_alphabetic() || c == '_' => {
                let mut ident = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_alphanumeric() || c == '_' {
                        ident.push(c);
                        let _ = chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(keyword(&ident).unwrap_or(Token::Ident(ident)));
            }
            _ => {
                let _ = chars.next();
                let token = match c {
                    '=' => {
                        if chars.peek() == Some(&'=') {
                            let _ = chars.next();
                            Token::Eq
                        } else {
                            Token::Assign
                        }
                    }
                    '!' => {
                        if chars.peek() == Some(&'=') {
                            let _ = chars.next();
                            Token::Ne
                        } else {
                            return Err(ScriptError::syntax_error(format!(
                                "unexpected '!' on line {line}"
                            )));
                        }
                    }
                    '<' => {
                        if chars.peek() == Some(&'=') {
                            let _ = chars.next();
                            Token::Le
                        } else {
                            Token::Lt
                        }
                    }
                    '>' => {
                        if chars.peek() == Some(&'=') {
                            let _ = chars.next();
                            Token::Ge
                        } else {
                            Token::Gt
                        }
                    }
                    '+' => Token::Plus,
                    '-' => Token::Minus,
                    '*' => Token::Star,
                    '/' => Token::Slash,
                    '%' => Token::Percent,
                    '(' => {
                        depth += 1;
                        Token::LParen
                    }
                    ')' => {
                        depth = depth.saturating_sub(1);
                        Token::RParen
                    }
                    '[' => {
                        depth += 1;
                        Token::LBracket
                    }
                    ']' => {
                        depth = depth.saturating_sub(1);
                        Token::RBracket
                    }
                    '{' => Token::LBrace,
                    '}' => Token::RBrace,
                    ',' => Token::Comma,
                    ':' => Token::Colon,
                    '.' => Token::Dot,
                    other => {
                        return Err(ScriptError::syntax_error(format!(
                            "unexpected character '{other}' on line {line}"
                        )));
                    }
                };
                tokens.push(token);
            }
        }
    }

    if !matches!(tokens.last(), None | Some(Token::Newline)) {
        tokens.push(Token::Newline);
    }
    Ok(tokens)
}
