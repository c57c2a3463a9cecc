//! Built-in globals and default extension members.
//!
//! Globals (skipped when `install_builtins` is off):
//!
//! | Name        | Members                                             |
//! |-------------|-----------------------------------------------------|
//! | `print`     | `print(text)` appends a line to the log             |
//! | `today`     | `today()` is the current UTC instant                |
//! | `convert`   | `toString`, `toNumber`, `toBoolean`, `toDateTime`   |
//! | `string`    | `getDigits(text)`, `format(fmt, args...)`           |
//!
//! Extension members are always installed: strings get `length`,
//! `substring` and `lastIndexOf`; date-times get `addDays`.

use chrono::{DateTime, TimeDelta, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};

use super::error::{Result, ScriptError};
use super::interp::Interpreter;
use super::proxy::{build_value, CallContext, ValueReader};
use super::value::{Extensions, Value, ValueKind};

// ── Globals ───────────────────────────────────────────────────────────────────

pub fn install_globals(interp: &Interpreter) {
    interp.register("today").sync_function(|call| {
        call.ret().datetime(Utc::now());
        Ok(())
    });

    let log = interp.log();
    // Text, numbers and dates print as they display; anything else as "".
    interp.register("print").sync_function(move |call| {
        let text = call.arg(0).value().to_display_string().unwrap_or_default();
        log.print_line(&text);
        Ok(())
    });

    interp.register("convert").object(|o| {
        o.add("toString").sync_function(|call| {
            if let Some(s) = call.arg(0).convert_to_string() {
                call.ret().string(s);
            }
            Ok(())
        });
        o.add("toNumber").sync_function(|call| {
            if let Some(n) = call.arg(0).convert_to_number()? {
                call.ret().number(n);
            }
            Ok(())
        });
        o.add("toBoolean").sync_function(|call| {
            if let Some(b) = call.arg(0).convert_to_boolean()? {
                call.ret().boolean(b);
            }
            Ok(())
        });
        o.add("toDateTime").sync_function(|call| {
            if let Some(d) = call.arg(0).convert_to_datetime()? {
                call.ret().datetime(d);
            }
            Ok(())
        });
        o.freeze();
    });

    interp.register("string").object(|o| {
        o.add("getDigits").sync_function(|call| {
            if let Some(s) = call.arg(0).as_str() {
                call.ret().string(get_digits(s));
            }
            Ok(())
        });
        o.add("format").sync_function(|call| {
            if let Some((fmt, args)) = call.args().split_first() {
                if let Some(fmt) = fmt.as_str() {
                    call.ret().string(format(fmt, args)?);
                }
            }
            Ok(())
        });
        o.freeze();
    });
}

// ── Extension members ─────────────────────────────────────────────────────────

pub fn install_extensions(extensions: &Extensions) {
    extensions.register(ValueKind::String, "length", |this| {
        Ok(Value::from(text_of(this).chars().count() as i64))
    });

    extensions.register(ValueKind::String, "substring", |this| {
        let text = text_of(this).to_owned();
        Ok(build_value(|w| {
            w.sync_function(move |call| {
                call.ret().string(substring(&text, call)?);
                Ok(())
            });
        }))
    });

    extensions.register(ValueKind::String, "lastIndexOf", |this| {
        let text = text_of(this).to_owned();
        Ok(build_value(|w| {
            w.sync_function(move |call| {
                if let Some(needle) = call.arg(0).as_str() {
                    call.ret().number(last_index_of(&text, needle));
                }
                Ok(())
            });
        }))
    });

    extensions.register(ValueKind::DateTime, "addDays", |this| {
        let Value::DateTime(at) = this else {
            return Ok(Value::Null);
        };
        let at = *at;
        Ok(build_value(|w| {
            w.sync_function(move |call| {
                let moved = match call.arg(0).as_number() {
                    Some(days) => add_days(at, days)?,
                    None => at,
                };
                call.ret().datetime(moved);
                Ok(())
            });
        }))
    });
}

fn text_of(value: &Value) -> &str {
    match value {
        Value::String(s) => s,
        _ => "",
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn get_digits(s: &str) -> String {
    s.chars().filter(char::is_ascii_digit).collect()
}

/// Round half to even, as an index.
fn index_arg(n: Decimal) -> Option<usize> {
    n.round().to_usize()
}

fn substring(text: &str, call: &CallContext) -> Result<String> {
    let out_of_range =
        || ScriptError::runtime("Index and length must refer to a location within the string.");
    let start = call
        .arg(0)
        .as_number()
        .ok_or_else(|| ScriptError::runtime("substring requires a start index as a number."))?;
    let start = index_arg(start).ok_or_else(out_of_range)?;
    let chars: Vec<char> = text.chars().collect();
    if start > chars.len() {
        return Err(out_of_range());
    }
    let end = match call.arg(1).as_number() {
        Some(len) => {
            let len = index_arg(len).ok_or_else(out_of_range)?;
            start
                .checked_add(len)
                .filter(|&end| end <= chars.len())
                .ok_or_else(out_of_range)?
        }
        None => chars.len(),
    };
    Ok(chars[start..end].iter().collect())
}

/// Character index of the last occurrence of `needle`, or -1.
fn last_index_of(text: &str, needle: &str) -> i64 {
    match text.rfind(needle) {
        Some(byte) => text[..byte].chars().count() as i64,
        None => -1,
    }
}

fn add_days(at: DateTime<Utc>, days: Decimal) -> Result<DateTime<Utc>> {
    let overflow = || ScriptError::runtime(format!("Cannot add {days} days to {at}."));
    let millis = days
        .checked_mul(Decimal::from(86_400_000))
        .and_then(|ms| ms.round().to_i64())
        .ok_or_else(overflow)?;
    let delta = TimeDelta::try_milliseconds(millis).ok_or_else(overflow)?;
    at.checked_add_signed(delta).ok_or_else(overflow)
}

// ── string.format ─────────────────────────────────────────────────────────────

fn bad_format() -> ScriptError {
    ScriptError::runtime("Input string was not in a correct format.")
}

/// Composite formatting: `{n}` and `{n:spec}` placeholders, `{{`/`}}` escapes.
fn format(fmt: &str, args: &[ValueReader]) -> Result<String> {
    let mut out = String::with_capacity(fmt.len());
    let mut chars = fmt.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            }
            '{' => {
                let mut item = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some(ch) => item.push(ch),
                        None => return Err(bad_format()),
                    }
                }
                let (index, spec) = match item.split_once(':') {
                    Some((index, spec)) => (index, Some(spec)),
                    None => (item.as_str(), None),
                };
                let index: usize = index.trim().parse().map_err(|_| bad_format())?;
                let arg = args.get(index).ok_or_else(|| {
                    ScriptError::runtime(
                        "Index (zero based) must be greater than or equal to zero and less than the size of the argument list.",
                    )
                })?;
                out.push_str(&format_item(arg, spec)?);
            }
            '}' => return Err(bad_format()),
            c => out.push(c),
        }
    }
    Ok(out)
}

fn format_item(arg: &ValueReader, spec: Option<&str>) -> Result<String> {
    let spec = spec.filter(|s| !s.is_empty());
    match (arg.value(), spec) {
        (Value::Number(n), Some(spec)) => format_number(*n, spec),
        (Value::DateTime(d), Some(spec)) => Ok(d.format(&date_pattern(spec)).to_string()),
        _ => Ok(arg.convert_to_string().unwrap_or_default()),
    }
}

/// Largest precision accepted by the `F`, `N` and `D` formats.
const MAX_PRECISION: usize = 99;

fn format_number(n: Decimal, spec: &str) -> Result<String> {
    let unsupported = || ScriptError::runtime(format!("Unsupported number format \"{spec}\"."));
    let mut letters = spec.chars();
    let mask = match letters.next().map(|c| c.to_ascii_uppercase()) {
        Some(kind @ ('F' | 'N' | 'D')) => {
            let rest = letters.as_str();
            let precision = if rest.is_empty() {
                None
            } else {
                let digits = rest.parse::<usize>().map_err(|_| unsupported())?;
                if digits > MAX_PRECISION {
                    return Err(bad_format());
                }
                Some(digits)
            };
            match kind {
                'F' => fixed_mask("0", precision.unwrap_or(2)),
                'N' => fixed_mask("#,##0", precision.unwrap_or(2)),
                _ => "0".repeat(precision.unwrap_or(1).max(1)),
            }
        }
        _ => spec.to_owned(),
    };
    number_mask(n, &mask).ok_or_else(unsupported)
}

fn fixed_mask(int_part: &str, decimals: usize) -> String {
    if decimals == 0 {
        int_part.to_owned()
    } else {
        format!("{int_part}.{}", "0".repeat(decimals))
    }
}

/// Custom numeric masks built from `0` (required digit), `#` (optional
/// digit), `.` and `,` (thousands grouping).
fn number_mask(n: Decimal, mask: &str) -> Option<String> {
    if mask.is_empty() || !mask.chars().all(|c| matches!(c, '0' | '#' | '.' | ',')) {
        return None;
    }
    let (int_mask, frac_mask) = mask.split_once('.').unwrap_or((mask, ""));
    let min_int = int_mask.chars().filter(|&c| c == '0').count();
    let min_frac = frac_mask.chars().filter(|&c| c == '0').count();
    let max_frac = frac_mask.chars().filter(|&c| c == '0' || c == '#').count();

    let rounded = n.round_dp_with_strategy(max_frac as u32, RoundingStrategy::MidpointAwayFromZero);
    let negative = rounded.is_sign_negative() && !rounded.is_zero();
    let text = rounded.abs().to_string();
    let (int_digits, frac_digits) = text.split_once('.').unwrap_or((&text, ""));

    let mut frac = frac_digits.to_owned();
    while frac.len() < min_frac {
        frac.push('0');
    }
    while frac.len() > min_frac && frac.ends_with('0') {
        frac.pop();
    }

    let mut int = if int_digits == "0" && min_int == 0 {
        String::new()
    } else {
        int_digits.to_owned()
    };
    if int.len() < min_int {
        int.insert_str(0, &"0".repeat(min_int - int.len()));
    }
    if int_mask.contains(',') {
        int = group_thousands(&int);
    }

    let mut out = String::new();
    if negative {
        out.push('-');
    }
    out.push_str(&int);
    if !frac.is_empty() {
        out.push('.');
        out.push_str(&frac);
    }
    Some(out)
}

fn group_thousands(digits: &str) -> String {
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

/// Translate a `dd/MM/yyyy HH:mm:ss` style mask into a chrono pattern.
fn date_pattern(spec: &str) -> String {
    const TOKENS: &[(&str, &str)] = &[
        ("yyyy", "%Y"),
        ("yy", "%y"),
        ("MMMM", "%B"),
        ("MMM", "%b"),
        ("MM", "%m"),
        ("M", "%-m"),
        ("dddd", "%A"),
        ("ddd", "%a"),
        ("dd", "%d"),
        ("d", "%-d"),
        ("HH", "%H"),
        ("H", "%-H"),
        ("hh", "%I"),
        ("h", "%-I"),
        ("mm", "%M"),
        ("m", "%-M"),
        ("ss", "%S"),
        ("s", "%-S"),
        ("fff", "%3f"),
        ("tt", "%p"),
    ];
    let mut out = String::new();
    let mut rest = spec;
    'scan: while let Some(c) = rest.chars().next() {
        for (token, pattern) in TOKENS {
            if let Some(tail) = rest.strip_prefix(token) {
                out.push_str(pattern);
                rest = tail;
                continue 'scan;
            }
        }
        if c == '%' {
            out.push_str("%%");
        } else {
            out.push(c);
        }
        rest = &rest[c.len_utf8()..];
    }
    out
}

// ── Tests ─────────────────────────────────────────────────────────────────────
