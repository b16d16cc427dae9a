//! JSON repair for malformed model output.
//!
//! Models frequently return JSON that is almost-but-not-quite valid:
//! wrapped in markdown fences or prose, trailing commas, or truncated
//! output missing its closing brackets. The premium enhancer is allowed a
//! single repair pass before declaring the response unparseable, and this
//! module is that pass. It is not a JSON parser; it fixes the common
//! failure modes and hands the result to `serde_json`.

/// Attempt to repair malformed JSON from model output.
///
/// Applies, in order: fence/prose stripping, trailing-comma removal, and
/// closing of truncated structures. Valid input passes through unchanged
/// apart from the trimming.
pub fn repair_json(input: &str) -> String {
    let stripped = extract_json_block(input);
    let no_trailing = fix_trailing_commas(&stripped);
    close_truncated(&no_trailing)
}

/// Try to parse JSON, falling back to one repair pass.
///
/// The recommended entry point: the repair overhead is skipped when the
/// payload is already valid.
pub fn parse_with_repair(input: &str) -> Result<serde_json::Value, serde_json::Error> {
    if let Ok(value) = serde_json::from_str(input) {
        return Ok(value);
    }
    serde_json::from_str(&repair_json(input))
}

/// Strip markdown fences and surrounding prose, keeping the outermost
/// JSON object or array.
fn extract_json_block(input: &str) -> String {
    let trimmed = input.trim();

    // Fenced block first: ```json ... ``` or ``` ... ```
    let unfenced = if let Some(rest) = trimmed.strip_prefix("```json") {
        rest.trim_start_matches('\n')
            .trim_end()
            .strip_suffix("```")
            .unwrap_or(rest)
            .trim()
    } else if let Some(rest) = trimmed.strip_prefix("```") {
        rest.trim_start_matches('\n')
            .trim_end()
            .strip_suffix("```")
            .unwrap_or(rest)
            .trim()
    } else {
        trimmed
    };

    // Prose wrapper: keep from the first `{`/`[` to the last `}`/`]`.
    let start = unfenced.find(['{', '[']);
    let end = unfenced.rfind(['}', ']']);
    match (start, end) {
        (Some(s), Some(e)) if e >= s => unfenced[s..=e].to_string(),
        // No closing bracket at all: truncated output, keep the tail for
        // close_truncated to finish.
        (Some(s), _) => unfenced[s..].to_string(),
        _ => unfenced.to_string(),
    }
}

/// Remove commas that directly precede `]` or `}`, outside strings.
fn fix_trailing_commas(input: &str) -> String {
    let chars: Vec<char> = input.chars().collect();
    let len = chars.len();
    let mut result = String::with_capacity(len);
    let mut in_string = false;
    let mut escape_next = false;

    for (i, &c) in chars.iter().enumerate() {
        if escape_next {
            result.push(c);
            escape_next = false;
            continue;
        }
        if c == '\\' && in_string {
            result.push(c);
            escape_next = true;
            continue;
        }
        if c == '"' {
            in_string = !in_string;
            result.push(c);
            continue;
        }
        if in_string {
            result.push(c);
            continue;
        }
        if c == ',' {
            let mut j = i + 1;
            while j < len && chars[j].is_whitespace() {
                j += 1;
            }
            if j < len && (chars[j] == ']' || chars[j] == '}') {
                continue; // drop the trailing comma
            }
        }
        result.push(c);
    }
    result
}

/// Append missing `]`/`}` to balance brackets in truncated output.
fn close_truncated(input: &str) -> String {
    let mut stack: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut escape_next = false;

    for c in input.chars() {
        if escape_next {
            escape_next = false;
            continue;
        }
        match c {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            '{' if !in_string => stack.push('}'),
            '[' if !in_string => stack.push(']'),
            '}' | ']' if !in_string => {
                if stack.last() == Some(&c) {
                    stack.pop();
                }
            }
            _ => {}
        }
    }

    let mut result = input.to_string();
    // A string cut off mid-value needs its quote closed first.
    if in_string {
        result.push('"');
    }
    while let Some(close) = stack.pop() {
        result.push(close);
    }
    result
}
