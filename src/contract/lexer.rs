//! Tokenizer for contract source.

use super::ContractError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Ident(String),
    Int(i64),
    Str(String),

    // Keywords
    Fn,
    Let,
    If,
    Else,
    While,
    Return,
    True,
    False,
    Null,

    // Punctuation
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Comma,
    Semicolon,
    Colon,
    Dot,

    // Operators
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Assign,
    EqEq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    AndAnd,
    OrOr,
    Bang,
    Coalesce,

    Eof,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Spanned {
    pub token: Token,
    pub line: usize,
}

fn keyword(word: &str) -> Option<Token> {
    Some(match word {
        "fn" => Token::Fn,
        "let" => Token::Let,
        "if" => Token::If,
        "else" => Token::Else,
        "while" => Token::While,
        "return" => Token::Return,
        "true" => Token::True,
        "false" => Token::False,
        "null" => Token::Null,
        _ => return None,
    })
}

fn compile_error(line: usize, message: impl Into<String>) -> ContractError {
    ContractError::Compile {
        line,
        message: message.into(),
    }
}

pub fn tokenize(source: &str) -> Result<Vec<Spanned>, ContractError> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut line = 1;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();

        if c == '\n' {
            line += 1;
            i += 1;
            continue;
        }
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        if c == '#' || (c == '/' && next == Some('/')) {
            while i < chars.len() && chars[i] != '\n' {
                i += 1;
            }
            continue;
        }

        if c.is_ascii_digit() {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '_') {
                i += 1;
            }
            let digits: String = chars[start..i].iter().filter(|c| **c != '_').collect();
            let value = digits
                .parse::<i64>()
                .map_err(|_| compile_error(line, format!("integer literal {} is too large", digits)))?;
            tokens.push(Spanned {
                token: Token::Int(value),
                line,
            });
            continue;
        }

        if c.is_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            let word: String = chars[start..i].iter().collect();
            let token = keyword(&word).unwrap_or(Token::Ident(word));
            tokens.push(Spanned { token, line });
            continue;
        }

        if c == '"' || c == '\'' {
            let quote = c;
            let start_line = line;
            let mut text = String::new();
            i += 1;
            loop {
                let Some(&ch) = chars.get(i) else {
                    return Err(compile_error(start_line, "unterminated string literal"));
                };
                i += 1;
                match ch {
                    ch if ch == quote => break,
                    '\\' => {
                        let escaped = chars
                            .get(i)
                            .copied()
                            .ok_or_else(|| compile_error(line, "unterminated string literal"))?;
                        i += 1;
                        text.push(match escaped {
                            'n' => '\n',
                            't' => '\t',
                            '\\' | '"' | '\'' => escaped,
                            other => {
                                return Err(compile_error(
                                    line,
                                    format!("unknown escape sequence \\{}", other),
                                ))
                            }
                        });
                    }
                    '\n' => {
                        line += 1;
                        text.push('\n');
                    }
                    other => text.push(other),
                }
            }
            tokens.push(Spanned {
                token: Token::Str(text),
                line: start_line,
            });
            continue;
        }

        let (token, width) = match (c, next) {
            ('=', Some('=')) => (Token::EqEq, 2),
            ('!', Some('=')) => (Token::NotEq, 2),
            ('<', Some('=')) => (Token::Le, 2),
            ('>', Some('=')) => (Token::Ge, 2),
            ('&', Some('&')) => (Token::AndAnd, 2),
            ('|', Some('|')) => (Token::OrOr, 2),
            ('?', Some('?')) => (Token::Coalesce, 2),
            ('(', _) => (Token::LParen, 1),
            (')', _) => (Token::RParen, 1),
            ('{', _) => (Token::LBrace, 1),
            ('}', _) => (Token::RBrace, 1),
            ('[', _) => (Token::LBracket, 1),
            (']', _) => (Token::RBracket, 1),
            (',', _) => (Token::Comma, 1),
            (';', _) => (Token::Semicolon, 1),
            (':', _) => (Token::Colon, 1),
            ('.', _) => (Token::Dot, 1),
            ('+', _) => (Token::Plus, 1),
            ('-', _) => (Token::Minus, 1),
            ('*', _) => (Token::Star, 1),
            ('/', _) => (Token::Slash, 1),
            ('%', _) => (Token::Percent, 1),
            ('=', _) => (Token::Assign, 1),
            ('<', _) => (Token::Lt, 1),
            ('>', _) => (Token::Gt, 1),
            ('!', _) => (Token::Bang, 1),
            (other, _) => {
                return Err(compile_error(line, format!("unexpected character '{}'", other)))
            }
        };
        tokens.push(Spanned { token, line });
        i += width;
    }

    tokens.push(Spanned {
        token: Token::Eof,
        line,
    });
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<Token> {
        tokenize(source)
            .unwrap()
            .into_iter()
            .map(|s| s.token)
            .collect()
    }

    #[test]
    fn test_tokenize_function_header() {
        assert_eq!(
            kinds("fn deposit(amount) {"),
            vec![
                Token::Fn,
                Token::Ident("deposit".into()),
                Token::LParen,
                Token::Ident("amount".into()),
                Token::RParen,
                Token::LBrace,
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_comments_and_lines() {
        let tokens = tokenize("# header\nlet x = 1; // trailing\n\"two\nlines\" ?? 3").unwrap();
        assert_eq!(tokens[0].token, Token::Let);
        assert_eq!(tokens[0].line, 2);
        assert_eq!(tokens[5].token, Token::Str("two\nlines".into()));
        assert_eq!(tokens[5].line, 3);
        assert_eq!(tokens[6].token, Token::Coalesce);
        assert_eq!(tokens[6].line, 4);
    }

    #[test]
    fn test_escapes_and_single_quotes() {
        let tokens = kinds(r#"'it\'s' "a\tb""#);
        assert_eq!(tokens[0], Token::Str("it's".into()));
        assert_eq!(tokens[1], Token::Str("a\tb".into()));
    }

    #[test]
    fn test_errors_carry_line() {
        assert_eq!(
            tokenize("let a = 1;\nlet b = @;").unwrap_err(),
            ContractError::Compile {
                line: 2,
                message: "unexpected character '@'".into()
            }
        );
        assert!(matches!(
            tokenize("\"open").unwrap_err(),
            ContractError::Compile { line: 1, .. }
        ));
        assert!(tokenize("99999999999999999999").is_err());
    }
}
