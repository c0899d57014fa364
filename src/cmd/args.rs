/*!
Argument vector handed to command handlers.

`CommandArgs` is a borrowed view over the tokens of one console line with
the suite and command names already stripped. `drop(n)` produces a
sub-view sharing the same backing storage.

Parsing helpers for numeric arguments (`parse_int`) live here as well;
they accept decimal and `0x` prefixed hexadecimal notation.
*/

use std::ops::Index;

/// Borrowed, immutable view over command arguments.
#[derive(Clone, Copy, Debug, Default)]
pub struct CommandArgs<'a> {
    tokens: &'a [String],
}

impl<'a> CommandArgs<'a> {
    pub fn new(tokens: &'a [String]) -> Self {
        Self { tokens }
    }

    pub fn count(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&'a str> {
        self.tokens.get(index).map(String::as_str)
    }

    /// View without the first `n` tokens (empty when `n >= count()`).
    pub fn drop(&self, n: usize) -> CommandArgs<'a> {
        match self.tokens.get(n..) {
            Some(rest) => CommandArgs { tokens: rest },
            None => CommandArgs { tokens: &[] },
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &'a str> + use<'a> {
        self.tokens.iter().map(String::as_str)
    }

    pub fn to_vec(&self) -> Vec<String> {
        self.tokens.to_vec()
    }
}

impl Index<usize> for CommandArgs<'_> {
    type Output = str;

    fn index(&self, index: usize) -> &str {
        &self.tokens[index]
    }
}

/// Parse an integer argument in decimal or `0x` hexadecimal notation.
///
/// Returns `None` when the text is not a number or does not fit in `T`.
pub fn parse_int<T: TryFrom<i64>>(raw: &str) -> Option<T> {
    let s = raw.trim();
    let (negative, body) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s),
    };
    let magnitude = match body
        .strip_prefix("0x")
        .or_else(|| body.strip_prefix("0X"))
    {
        Some(hex) if !hex.is_empty() => i64::from_str_radix(hex, 16).ok()?,
        Some(_) => return None,
        None if body.bytes().all(|b| b.is_ascii_digit()) && !body.is_empty() => {
            body.parse::<i64>().ok()?
        }
        None => return None,
    };
    let value = if negative { -magnitude } else { magnitude };
    T::try_from(value).ok()
}

/* --------------------------------- Tests ---------------------------------- */
