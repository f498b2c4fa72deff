//! Query Translator
//!
//! Turns query text such as
//! `| readfile data.csv | join type=left [ otstats count by host ]`
//! into a pipeline of `Command`s. Commands are separated by `|`, arguments by
//! commas or whitespace. `key=value` makes a named argument and `[ ... ]` a
//! subsearch, translated recursively.

use super::command::{ArgValue, Argument, Command};
use super::error::TranslationError;

use regex::Regex;
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TokenKind {
    Word,
    Quoted,
    Open,
    Close,
    Pipe,
    Comma,
    Equals,
}

#[derive(Debug, Clone)]
struct Token {
    kind: TokenKind,
    text: String,
    position: usize,
}

fn token_regex() -> &'static Regex {
    static TOKEN: OnceLock<Regex> = OnceLock::new();
    TOKEN.get_or_init(|| {
        Regex::new(r#""(?:[^"\\]|\\.)*"|[\[\]|,=]|[^\s\[\]|,="]+|""#)
            .expect("token pattern is valid")
    })
}

fn tokenize(query: &str) -> Result<Vec<Token>, TranslationError> {
    let mut tokens = Vec::new();

    for found in token_regex().find_iter(query) {
        let text = found.as_str();
        let kind = match text {
            "[" => TokenKind::Open,
            "]" => TokenKind::Close,
            "|" => TokenKind::Pipe,
            "," => TokenKind::Comma,
            "=" => TokenKind::Equals,
            "\"" => return Err(TranslationError::UnterminatedString(found.start())),
            quoted if quoted.starts_with('"') => TokenKind::Quoted,
            _ => TokenKind::Word,
        };

        tokens.push(Token {
            kind,
            text: text.to_string(),
            position: found.start(),
        });
    }

    Ok(tokens)
}

/// Translates query text into a command pipeline.
pub fn translate(query: &str) -> Result<Vec<Command>, TranslationError> {
    let tokens = tokenize(query)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        end: query.len(),
    };
    parser.parse_pipeline(None)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    end: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_kind(&self) -> Option<TokenKind> {
        self.peek().map(|token| token.kind)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn position(&self) -> usize {
        self.peek().map(|token| token.position).unwrap_or(self.end)
    }

    fn unexpected(&self) -> TranslationError {
        match self.peek() {
            Some(token) => TranslationError::UnexpectedToken {
                token: token.text.clone(),
                position: token.position,
            },
            None => TranslationError::UnexpectedToken {
                token: "end of query".to_string(),
                position: self.end,
            },
        }
    }

    /// `opened_at` is the position of the `[` for a subsearch, `None` at top level.
    fn parse_pipeline(&mut self, opened_at: Option<usize>) -> Result<Vec<Command>, TranslationError> {
        let mut commands = Vec::new();

        if self.peek_kind() == Some(TokenKind::Pipe) {
            self.advance();
        }

        loop {
            match (self.peek_kind(), opened_at) {
                (None, Some(open)) => return Err(TranslationError::UnterminatedSubsearch(open)),
                (None, None) => break,
                (Some(TokenKind::Close), Some(_)) => {
                    self.advance();
                    break;
                }
                (Some(TokenKind::Close), None) => return Err(self.unexpected()),
                _ => {}
            }

            commands.push(self.parse_command()?);

            if self.peek_kind() == Some(TokenKind::Pipe) {
                self.advance();
                if matches!(self.peek_kind(), None | Some(TokenKind::Close) | Some(TokenKind::Pipe)) {
                    return Err(TranslationError::EmptyCommand(self.position()));
                }
            }
        }

        Ok(commands)
    }

    fn parse_command(&mut self) -> Result<Command, TranslationError> {
        let name = match self.peek_kind() {
            Some(TokenKind::Word) => self.advance().map(|token| token.text).unwrap_or_default(),
            None | Some(TokenKind::Pipe) | Some(TokenKind::Close) => {
                return Err(TranslationError::EmptyCommand(self.position()));
            }
            _ => return Err(self.unexpected()),
        };

        let mut command = Command::new(name);

        loop {
            match self.peek_kind() {
                None | Some(TokenKind::Pipe) | Some(TokenKind::Close) => break,
                Some(TokenKind::Comma) => {
                    self.advance();
                }
                Some(TokenKind::Open) => {
                    let value = self.parse_value()?;
                    command.args.push(Argument::positional(value));
                }
                Some(TokenKind::Word) | Some(TokenKind::Quoted) => {
                    let is_named = self.tokens.get(self.pos + 1).map(|token| token.kind)
                        == Some(TokenKind::Equals);

                    if is_named {
                        let key = self.advance().map(|token| unquote(&token)).unwrap_or_default();
                        self.advance();
                        let value = self.parse_value()?;
                        command.args.push(Argument::named(key, value));
                    } else {
                        let value = self.parse_value()?;
                        command.args.push(Argument::positional(value));
                    }
                }
                Some(TokenKind::Equals) => return Err(self.unexpected()),
            }
        }

        Ok(command)
    }

    fn parse_value(&mut self) -> Result<ArgValue, TranslationError> {
        match self.peek_kind() {
            Some(TokenKind::Open) => {
                let opened_at = self.position();
                self.advance();
                Ok(ArgValue::Subsearch(self.parse_pipeline(Some(opened_at))?))
            }
            Some(TokenKind::Quoted) => {
                let token = self.advance().ok_or_else(|| self.unexpected())?;
                Ok(ArgValue::Term(unquote(&token)))
            }
            Some(TokenKind::Word) => {
                let token = self.advance().ok_or_else(|| self.unexpected())?;
                Ok(scalar(&token.text))
            }
            _ => Err(self.unexpected()),
        }
    }
}

fn unquote(token: &Token) -> String {
    if token.kind != TokenKind::Quoted {
        return token.text.clone();
    }
    let inner = &token.text[1..token.text.len() - 1];
    inner.replace("\\\"", "\"").replace("\\\\", "\\")
}

fn scalar(text: &str) -> ArgValue {
    match text {
        "true" => ArgValue::Boolean(true),
        "false" => ArgValue::Boolean(false),
        _ => match text.parse::<i64>() {
            Ok(value) => ArgValue::Integer(value),
            Err(_) => ArgValue::Term(text.to_string()),
        },
    }
}
