// Placeholder Scanner
// Finds `?` and `:name` placeholders in SQL text and rewrites them for a driver

use std::collections::HashMap;
use std::ops::Range;

/// A placeholder found in query text
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placeholder {
    Positional { span: Range<usize> },
    Named { name: String, span: Range<usize> },
}

impl Placeholder {
    pub fn span(&self) -> Range<usize> {
        match self {
            Placeholder::Positional { span } | Placeholder::Named { span, .. } => span.clone(),
        }
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            Placeholder::Named { name, .. } => Some(name),
            Placeholder::Positional { .. } => None,
        }
    }
}

/// Every placeholder of a query, in source order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlaceholderScan {
    placeholders: Vec<Placeholder>,
}

impl PlaceholderScan {
    pub fn placeholders(&self) -> &[Placeholder] {
        &self.placeholders
    }

    pub fn is_empty(&self) -> bool {
        self.placeholders.is_empty()
    }

    pub fn positional_count(&self) -> usize {
        self.placeholders
            .iter()
            .filter(|p| matches!(p, Placeholder::Positional { .. }))
            .count()
    }

    pub fn has_positional(&self) -> bool {
        self.positional_count() > 0
    }

    pub fn has_named(&self) -> bool {
        self.placeholders
            .iter()
            .any(|p| matches!(p, Placeholder::Named { .. }))
    }

    /// Distinct placeholder names in order of first appearance
    pub fn unique_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for name in self.placeholders.iter().filter_map(Placeholder::name) {
            if !names.contains(&name) {
                names.push(name);
            }
        }
        names
    }

    /// Number of values a statement needs: one per `?` plus one per distinct name
    pub fn expected_values(&self) -> usize {
        self.positional_count() + self.unique_names().len()
    }
}

/// Scan query text for placeholders.
///
/// Quoted literals and identifiers, `E'..'` escape strings, `$tag$` bodies,
/// `--` and `/* */` comments and `::` casts are skipped. Names are made of
/// ASCII letters, digits and underscores.
pub fn scan(query: &str) -> PlaceholderScan {
    let bytes = query.as_bytes();
    let len = bytes.len();
    let mut placeholders = Vec::new();
    let mut i = 0;

    while i < len {
        match bytes[i] {
            quote @ (b'\'' | b'"') => {
                i += 1;
                while i < len {
                    if bytes[i] == quote {
                        // doubled quote is an escaped quote
                        if i + 1 < len && bytes[i + 1] == quote {
                            i += 2;
                            continue;
                        }
                        break;
                    }
                    i += 1;
                }
                i += 1;
            }
            b'E' | b'e'
                if bytes.get(i + 1) == Some(&b'\'') && (i == 0 || !is_word(bytes[i - 1])) =>
            {
                // backslash escapes are allowed in E'..'
                i += 2;
                while i < len {
                    match bytes[i] {
                        b'\\' => i += 2,
                        b'\'' if bytes.get(i + 1) == Some(&b'\'') => i += 2,
                        b'\'' => break,
                        _ => i += 1,
                    }
                }
                i += 1;
            }
            b'$' => match dollar_tag(bytes, i) {
                Some(tag_len) => {
                    let tag = &bytes[i..i + tag_len];
                    i += tag_len;
                    while i < len && !bytes[i..].starts_with(tag) {
                        i += 1;
                    }
                    i += tag_len;
                }
                None => i += 1,
            },
            b'-' if bytes.get(i + 1) == Some(&b'-') => {
                while i < len && bytes[i] != b'\n' {
                    i += 1;
                }
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                i += 2;
                while i < len && !(bytes[i] == b'*' && bytes.get(i + 1) == Some(&b'/')) {
                    i += 1;
                }
                i += 2;
            }
            b'?' => {
                placeholders.push(Placeholder::Positional { span: i..i + 1 });
                i += 1;
            }
            b':' if bytes.get(i + 1) == Some(&b':') => {
                i += 2;
            }
            b':' => {
                let start = i;
                let mut end = i + 1;
                while end < len && (bytes[end].is_ascii_alphanumeric() || bytes[end] == b'_') {
                    end += 1;
                }
                if end > start + 1 {
                    placeholders.push(Placeholder::Named {
                        name: query[start + 1..end].to_string(),
                        span: start..end,
                    });
                }
                i = end;
            }
            _ => i += 1,
        }
    }

    PlaceholderScan { placeholders }
}

fn is_word(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || byte == b'_'
}

/// Length of the `$tag$` delimiter opening a dollar-quoted body at `start`
fn dollar_tag(bytes: &[u8], start: usize) -> Option<usize> {
    // `$` inside an identifier, as in `a$b`
    if start > 0 && (is_word(bytes[start - 1]) || bytes[start - 1] == b'$') {
        return None;
    }
    let mut end = start + 1;
    while end < bytes.len() && is_word(bytes[end]) {
        end += 1;
    }
    if bytes.get(end) != Some(&b'$') {
        return None;
    }
    // `$1` is a numbered parameter, never a tag
    if bytes.get(start + 1).is_some_and(u8::is_ascii_digit) {
        return None;
    }
    Some(end + 1 - start)
}

/// Replace every placeholder with the text produced by `render`.
///
/// `render` receives the placeholder's index in source order.
pub fn substitute<F>(query: &str, placeholders: &[Placeholder], mut render: F) -> String
where
    F: FnMut(usize, &Placeholder) -> String,
{
    let mut out = String::with_capacity(query.len() + placeholders.len() * 4);
    let mut last = 0;
    for (index, placeholder) in placeholders.iter().enumerate() {
        let span = placeholder.span();
        out.push_str(&query[last..span.start]);
        out.push_str(&render(index, placeholder));
        last = span.end;
    }
    out.push_str(&query[last..]);
    out
}

/// Native positional placeholder form of a driver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceholderStyle {
    /// `?`, one value per occurrence
    QuestionMark,
    /// `$1..$n`, a repeated name reuses its number
    Numbered,
}

/// Query text with named placeholders turned positional
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rewrite {
    pub sql: String,
    /// Name bound to each positional slot
    pub order: Vec<String>,
}

/// Rewrite `:name` placeholders into the driver's positional form
pub fn rewrite_named(query: &str, scan: &PlaceholderScan, style: PlaceholderStyle) -> Rewrite {
    match style {
        PlaceholderStyle::QuestionMark => {
            let mut order = Vec::new();
            let sql = substitute(query, scan.placeholders(), |_, placeholder| {
                if let Some(name) = placeholder.name() {
                    order.push(name.to_string());
                }
                "?".to_string()
            });
            Rewrite { sql, order }
        }
        PlaceholderStyle::Numbered => {
            let order: Vec<String> = scan.unique_names().into_iter().map(String::from).collect();
            let numbers: HashMap<&str, usize> = order
                .iter()
                .enumerate()
                .map(|(index, name)| (name.as_str(), index + 1))
                .collect();
            let sql = substitute(query, scan.placeholders(), |_, placeholder| {
                match placeholder.name().and_then(|name| numbers.get(name)) {
                    Some(number) => format!("${}", number),
                    None => "?".to_string(),
                }
            });
            Rewrite { sql, order }
        }
    }
}

/// Rewrite every `?` into `$1..$n`
pub fn number_positional(query: &str, scan: &PlaceholderScan) -> String {
    let mut next = 0;
    substitute(query, scan.placeholders(), |_, placeholder| match placeholder {
        Placeholder::Positional { .. } => {
            next += 1;
            format!("${}", next)
        }
        Placeholder::Named { name, .. } => format!(":{}", name),
    })
}
