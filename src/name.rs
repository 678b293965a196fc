//! Hierarchical names.
//!
//! A [`Name`] is a dot separated list of tokens like `token1.token2.token3`.
//! Each token may carry an index in square brackets (`item[3]`). Dots,
//! brackets and backslashes inside a token body are escaped with `\`.

use std::fmt::{self, Display, Write};
use std::str::FromStr;

use crate::error::NameError;

pub const NAME_SEPARATOR: char = '.';

/// A single name token. The body is never empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NameToken {
    body: String,
    index: String,
}

impl NameToken {
    pub fn new(body: impl Into<String>) -> Result<Self, NameError> {
        Self::with_index(body, "")
    }

    pub fn with_index(body: impl Into<String>, index: impl Into<String>) -> Result<Self, NameError> {
        let body = body.into();
        if body.is_empty() {
            return Err(NameError::EmptyToken);
        }

        Ok(Self {
            body,
            index: index.into(),
        })
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn index(&self) -> Option<&str> {
        self.has_index().then_some(self.index.as_str())
    }

    pub fn has_index(&self) -> bool {
        !self.index.is_empty()
    }
}

fn write_escaped(f: &mut fmt::Formatter<'_>, text: &str, special: &[char]) -> fmt::Result {
    for c in text.chars() {
        if special.contains(&c) {
            f.write_char('\\')?;
        }
        f.write_char(c)?;
    }
    Ok(())
}

impl Display for NameToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_escaped(f, &self.body, &['\\', '.', '[', ']'])?;

        if self.has_index() {
            // Dots are literal inside brackets.
            f.write_char('[')?;
            write_escaped(f, &self.index, &['\\', '[', ']'])?;
            f.write_char(']')?;
        }

        Ok(())
    }
}

/// A path in a hierarchy of data or configuration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Name {
    tokens: Vec<NameToken>,
}

impl Name {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Parses a name from its textual form. A blank string is the empty name.
    pub fn parse(text: &str) -> Result<Self, NameError> {
        text.parse()
    }

    /// Wraps the whole string in a single token without interpreting dots,
    /// brackets or escapes.
    pub fn atom(body: impl Into<String>) -> Result<Self, NameError> {
        Ok(NameToken::new(body)?.into())
    }

    pub fn tokens(&self) -> &[NameToken] {
        &self.tokens
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn first(&self) -> Option<&NameToken> {
        self.tokens.first()
    }

    pub fn last(&self) -> Option<&NameToken> {
        self.tokens.last()
    }

    /// The first token and everything after it.
    pub fn split_first(&self) -> Option<(&NameToken, Name)> {
        let (first, rest) = self.tokens.split_first()?;
        Some((first, Name::from(rest.to_vec())))
    }

    /// The remainder of the name after the first token is cut.
    pub fn cut_first(&self) -> Name {
        Name::from(self.tokens.iter().skip(1).cloned().collect::<Vec<_>>())
    }

    /// The name without its last token.
    pub fn cut_last(&self) -> Name {
        let end = self.tokens.len().saturating_sub(1);
        Name::from(self.tokens[..end].to_vec())
    }

    pub fn starts_with(&self, prefix: &Name) -> bool {
        self.tokens.starts_with(&prefix.tokens)
    }

    pub fn ends_with(&self, suffix: &Name) -> bool {
        self.tokens.ends_with(&suffix.tokens)
    }

    /// Concatenates two names.
    pub fn join(&self, other: &Name) -> Name {
        let mut tokens = Vec::with_capacity(self.len() + other.len());
        tokens.extend_from_slice(&self.tokens);
        tokens.extend_from_slice(&other.tokens);
        Name::from(tokens)
    }

    /// Appends a single token.
    pub fn child(&self, token: NameToken) -> Name {
        let mut tokens = self.tokens.clone();
        tokens.push(token);
        Name::from(tokens)
    }

    /// Sets or replaces the index of the last token.
    pub fn with_index(&self, index: impl Into<String>) -> Result<Name, NameError> {
        let Some((last, init)) = self.tokens.split_last() else {
            return Err(NameError::EmptyToken);
        };

        let mut tokens = init.to_vec();
        tokens.push(NameToken::with_index(last.body.clone(), index)?);
        Ok(Name::from(tokens))
    }
}

impl From<Vec<NameToken>> for Name {
    fn from(tokens: Vec<NameToken>) -> Self {
        Self { tokens }
    }
}

impl From<NameToken> for Name {
    fn from(token: NameToken) -> Self {
        Self {
            tokens: vec![token],
        }
    }
}

impl Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, token) in self.tokens.iter().enumerate() {
            if i > 0 {
                f.write_char(NAME_SEPARATOR)?;
            }
            Display::fmt(token, f)?;
        }
        Ok(())
    }
}

impl FromStr for Name {
    type Err = NameError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        if text.trim().is_empty() {
            return Ok(Name::empty());
        }

        let mut tokens = Vec::new();
        let mut body = String::new();
        let mut index = String::new();
        let mut depth = 0usize;
        let mut escape = false;

        for c in text.chars() {
            if escape {
                if depth > 0 {
                    index.push(c);
                } else {
                    body.push(c);
                }
                escape = false;
                continue;
            }

            if c == '\\' {
                escape = true;
                continue;
            }

            if depth > 0 {
                match c {
                    '[' => depth += 1,
                    ']' => depth -= 1,
                    _ => {}
                }
                if depth > 0 {
                    index.push(c);
                }
                continue;
            }

            match c {
                NAME_SEPARATOR => {
                    tokens.push(NameToken::with_index(
                        std::mem::take(&mut body),
                        std::mem::take(&mut index),
                    )?);
                }
                '[' => depth += 1,
                ']' => return Err(NameError::UnmatchedBracket(text.to_string())),
                _ => {
                    if !index.is_empty() {
                        return Err(NameError::TrailingIndex(text.to_string()));
                    }
                    body.push(c);
                }
            }
        }

        if depth > 0 {
            return Err(NameError::UnclosedIndex(text.to_string()));
        }

        tokens.push(NameToken::with_index(body, index)?);
        Ok(Name { tokens })
    }
}

impl TryFrom<&str> for Name {
    type Error = NameError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        value.parse()
    }
}
