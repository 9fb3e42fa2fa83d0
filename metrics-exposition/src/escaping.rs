//! Escaping of metric and label names.
//!
//! Metric and label names may contain arbitrary Unicode. Older scrapers only understand the
//! [legacy character set][data model], so names are rewritten according to an
//! [`EscapingScheme`] negotiated with the client.
//!
//! [data model]: https://prometheus.io/docs/concepts/data_model/#metric-names-and-labels
use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;

/// A rule set for converting arbitrary identifiers into a wire-compatible form.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub enum EscapingScheme {
    /// Names are emitted as-is, quoted when they fall outside of the legacy character set.
    AllowUtf8,
    /// Every invalid character is replaced with a single underscore.
    #[default]
    Underscores,
    /// Dots become `_dot_`, underscores are doubled, and other invalid characters become `__`.
    Dots,
    /// A reversible encoding: `U__` prefix, doubled underscores and `_<hex code point>_`.
    Values,
}

impl EscapingScheme {
    /// Gets the token used for this scheme in the `escaping` content-type parameter.
    pub fn as_str(&self) -> &'static str {
        match self {
            EscapingScheme::AllowUtf8 => "allow-utf-8",
            EscapingScheme::Underscores => "underscores",
            EscapingScheme::Dots => "dots",
            EscapingScheme::Values => "values",
        }
    }
}

impl fmt::Display for EscapingScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown escaping scheme token.
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
#[error("unknown escaping scheme: {0:?}")]
pub struct UnknownSchemeError(pub String);

impl FromStr for EscapingScheme {
    type Err = UnknownSchemeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "allow-utf-8" => Ok(EscapingScheme::AllowUtf8),
            "underscores" => Ok(EscapingScheme::Underscores),
            "dots" => Ok(EscapingScheme::Dots),
            "values" => Ok(EscapingScheme::Values),
            other => Err(UnknownSchemeError(other.to_string())),
        }
    }
}

/// Whether the name matches `[a-zA-Z_:][a-zA-Z0-9_:]*`.
pub fn is_valid_legacy_metric_name(name: &str) -> bool {
    !name.is_empty() && name.chars().enumerate().all(|(i, c)| valid_legacy_char(c, i, false))
}

/// Whether the name matches `[a-zA-Z_][a-zA-Z0-9_]*`.
pub fn is_valid_legacy_label_name(name: &str) -> bool {
    !name.is_empty() && name.chars().enumerate().all(|(i, c)| valid_legacy_char(c, i, true))
}

/// Escapes a metric name under the given scheme.
///
/// Under [`EscapingScheme::AllowUtf8`], names outside of the legacy character set are wrapped in
/// double quotes, which is how they must appear on the wire.
pub fn escape_metric_name(name: &str, scheme: EscapingScheme) -> Cow<'_, str> {
    escape_name(name, scheme, false)
}

/// Escapes a label name under the given scheme.
///
/// Identical to [`escape_metric_name`] except that colons are never valid in label names.
pub fn escape_label_name(name: &str, scheme: EscapingScheme) -> Cow<'_, str> {
    escape_name(name, scheme, true)
}

fn escape_name(name: &str, scheme: EscapingScheme, is_label: bool) -> Cow<'_, str> {
    if name.is_empty() {
        return Cow::Borrowed(name);
    }

    let legacy_valid = if is_label {
        is_valid_legacy_label_name(name)
    } else {
        is_valid_legacy_metric_name(name)
    };

    match scheme {
        EscapingScheme::AllowUtf8 if legacy_valid => Cow::Borrowed(name),
        EscapingScheme::AllowUtf8 => {
            let mut quoted = String::with_capacity(name.len() + 2);
            quoted.push('"');
            push_quoted_escaped(&mut quoted, name);
            quoted.push('"');
            Cow::Owned(quoted)
        }
        EscapingScheme::Underscores | EscapingScheme::Values if legacy_valid => {
            Cow::Borrowed(name)
        }
        EscapingScheme::Underscores => Cow::Owned(
            name.chars()
                .enumerate()
                .map(|(i, c)| if valid_legacy_char(c, i, is_label) { c } else { '_' })
                .collect(),
        ),
        EscapingScheme::Dots => {
            let mut escaped = String::with_capacity(name.len() * 2);
            for (i, c) in name.chars().enumerate() {
                match c {
                    '_' => escaped.push_str("__"),
                    '.' => escaped.push_str("_dot_"),
                    c if valid_legacy_char(c, i, is_label) => escaped.push(c),
                    _ => escaped.push_str("__"),
                }
            }
            Cow::Owned(escaped)
        }
        EscapingScheme::Values => {
            let mut escaped = String::with_capacity(name.len() * 2 + 3);
            escaped.push_str("U__");
            for (i, c) in name.chars().enumerate() {
                match c {
                    '_' => escaped.push_str("__"),
                    c if valid_legacy_char(c, i, is_label) => escaped.push(c),
                    c => {
                        escaped.push('_');
                        escaped.push_str(&format!("{:x}", u32::from(c)));
                        escaped.push('_');
                    }
                }
            }
            Cow::Owned(escaped)
        }
    }
}

/// Reverses the escaping applied by [`escape_metric_name`] or [`escape_label_name`].
///
/// Only [`EscapingScheme::Dots`] and [`EscapingScheme::Values`] are reversible. Underscores
/// escaping loses information and is returned unchanged, as is any value-encoded name that is
/// malformed.
pub fn unescape_name(name: &str, scheme: EscapingScheme) -> Cow<'_, str> {
    match scheme {
        EscapingScheme::AllowUtf8 | EscapingScheme::Underscores => Cow::Borrowed(name),
        EscapingScheme::Dots => Cow::Owned(name.replace("_dot_", ".").replace("__", "_")),
        EscapingScheme::Values => match decode_values(name) {
            Some(decoded) => Cow::Owned(decoded),
            None => Cow::Borrowed(name),
        },
    }
}

fn decode_values(name: &str) -> Option<String> {
    let encoded = name.strip_prefix("U__")?;
    let mut decoded = String::with_capacity(encoded.len());
    let mut chars = encoded.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '_' {
            decoded.push(c);
            continue;
        }

        if chars.peek() == Some(&'_') {
            chars.next();
            decoded.push('_');
            continue;
        }

        let mut hex = String::new();
        loop {
            match chars.next() {
                Some('_') => break,
                Some(h) if h.is_ascii_hexdigit() && hex.len() < 6 => hex.push(h),
                _ => return None,
            }
        }
        let code_point = u32::from_str_radix(&hex, 16).ok()?;
        decoded.push(char::from_u32(code_point)?);
    }

    Some(decoded)
}

/// Escapes backslashes, double quotes and line feeds for use inside a quoted string.
pub(crate) fn push_quoted_escaped(buffer: &mut String, value: &str) {
    for c in value.chars() {
        match c {
            '\\' => buffer.push_str("\\\\"),
            '"' => buffer.push_str("\\\""),
            '\n' => buffer.push_str("\\n"),
            c => buffer.push(c),
        }
    }
}

#[inline]
fn valid_legacy_char(c: char, position: usize, is_label: bool) -> bool {
    c.is_ascii_alphabetic()
        || c == '_'
        || (position > 0 && c.is_ascii_digit())
        || (!is_label && c == ':')
}
