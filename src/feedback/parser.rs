use crate::Payload;

/// Turns one received line into a payload.
///
/// A line holding all of `[`, `]` and `,` is read as a numeric list: the text
/// between the first `[` and the following `]` is split on commas and every
/// element must be a finite number literal. Anything else, including a
/// bracketed line with a non-numeric element, is kept verbatim (trimmed) as
/// text. Nothing is ever evaluated.
pub fn parse_line(line: &str) -> Payload {
    let line = line.trim();
    if !is_list_like(line) {
        return Payload::text(line);
    }
    match parse_numbers(line) {
        Some(values) => Payload::numbers(&values),
        None => {
            log::warn!(target: "feedback_parser",
                "Malformed numeric list '{}', keeping it as text.", line);
            Payload::text(line)
        }
    }
}

fn is_list_like(line: &str) -> bool {
    ['[', ']', ','].iter().all(|c| line.contains(*c))
}

/// Parses the bracketed part of `line`. Returns `None` if the brackets are
/// out of order or any element is not a number.
pub fn parse_numbers(line: &str) -> Option<Vec<f64>> {
    let (_, after_open) = line.split_once('[')?;
    let (inner, _) = after_open.split_once(']')?;
    inner
        .split(',')
        .map(|element| parse_number(element.trim()))
        .collect()
}

fn parse_number(element: &str) -> Option<f64> {
    if element.is_empty() {
        return None;
    }
    // f64::from_str also accepts "inf" and "NaN", which are not literals here.
    if !element
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, '.' | '-' | '+' | 'e' | 'E'))
    {
        return None;
    }
    element.parse::<f64>().ok().filter(|v| v.is_finite())
}
