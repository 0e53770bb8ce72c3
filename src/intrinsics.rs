//! Byte-level JSON scanners and emitters.
//!
//! Everything here operates on a [`DeserContext`] whose buffer ends in a
//! NUL sentinel: scanners probe for the sentinel instead of bounds-checking,
//! and call the streaming refill hook when they hit it. After a successful
//! refill the current byte is re-evaluated, so tokens may be split at any
//! point by the underlying reader.

use crate::context::{DeserContext, NUL};
use crate::{Error, ErrorKind};

/// Bytes that may legally extend a numeric token. `-` is included so that
/// exponent signs scan as part of the token; whether the token is actually
/// valid is the number parser's call.
const fn num_ext_table() -> [bool; 256] {
    let mut t = [false; 256];
    let mut c = b'0';
    while c <= b'9' {
        t[c as usize] = true;
        c += 1;
    }
    t[b'.' as usize] = true;
    t[b'e' as usize] = true;
    t[b'E' as usize] = true;
    t[b'+' as usize] = true;
    t[b'-' as usize] = true;
    t
}

static NUM_EXT: [bool; 256] = num_ext_table();

// ── Whitespace and single-byte expectations ──────────────────────────

pub(crate) fn skip_ws(ctx: &mut DeserContext) -> Result<(), Error> {
    loop {
        match ctx.char() {
            b' ' | b'\n' | b'\t' | b'\r' => ctx.cursor += 1,
            NUL if ctx.at_sentinel() => {
                if !ctx.refill()? {
                    return Ok(());
                }
            }
            _ => return Ok(()),
        }
    }
}

/// Skip whitespace and return the next byte without consuming it.
/// Returns the NUL sentinel at end of input.
pub(crate) fn peek(ctx: &mut DeserContext) -> Result<u8, Error> {
    skip_ws(ctx)?;
    Ok(ctx.char())
}

/// Skip whitespace, then require and consume `want`.
pub(crate) fn expect(ctx: &mut DeserContext, want: u8, label: &'static str) -> Result<(), Error> {
    skip_ws(ctx)?;
    let c = ctx.char();
    if c == NUL && ctx.at_sentinel() {
        return Err(ctx.err(ErrorKind::UnexpectedEof));
    }
    if c != want {
        return Err(ctx.err(ErrorKind::UnexpectedToken {
            expected: label,
            found: c,
        }));
    }
    ctx.cursor += 1;
    Ok(())
}

/// Consume an exact byte sequence (e.g. `true`), refilling as needed.
pub(crate) fn expect_literal(
    ctx: &mut DeserContext,
    lit: &'static [u8],
    label: &'static str,
) -> Result<(), Error> {
    for &want in lit {
        loop {
            let c = ctx.char();
            if c == want {
                ctx.cursor += 1;
                break;
            }
            if c == NUL && ctx.at_sentinel() {
                if ctx.refill()? {
                    continue;
                }
                return Err(ctx.err(ErrorKind::UnexpectedEof));
            }
            return Err(ctx.err(ErrorKind::UnexpectedToken {
                expected: label,
                found: c,
            }));
        }
    }
    Ok(())
}

/// Skip whitespace, then consume either `,` (returns false) or the given
/// closer (returns true).
pub(crate) fn comma_or_close(ctx: &mut DeserContext, close: u8) -> Result<bool, Error> {
    skip_ws(ctx)?;
    let c = ctx.char();
    if c == NUL && ctx.at_sentinel() {
        return Err(ctx.err(ErrorKind::UnexpectedEof));
    }
    ctx.cursor += 1;
    match c {
        b',' => Ok(false),
        c if c == close => Ok(true),
        c => Err(Error::at(
            ErrorKind::UnexpectedToken {
                expected: "`,` or closing delimiter",
                found: c,
            },
            ctx.cursor - 1,
        )),
    }
}

/// If the next value is `null`, consume it.
pub(crate) fn try_null(ctx: &mut DeserContext) -> Result<bool, Error> {
    skip_ws(ctx)?;
    if ctx.char() == b'n' {
        expect_literal(ctx, b"null", "null")?;
        return Ok(true);
    }
    Ok(false)
}

// ── Numbers ──────────────────────────────────────────────────────────

/// Scan one numeric token, returning its half-open byte range. The first
/// character must be `-` or a digit; the token extends while the table
/// holds. On the sentinel, the refill hook runs and the current position
/// is re-evaluated, so a number split across reads reassembles.
pub(crate) fn number_token(ctx: &mut DeserContext) -> Result<(usize, usize), Error> {
    skip_ws(ctx)?;
    loop {
        let c = ctx.char();
        if c == b'-' || c.is_ascii_digit() {
            break;
        }
        if c == NUL && ctx.at_sentinel() {
            if ctx.refill()? {
                continue;
            }
            return Err(ctx.err(ErrorKind::UnexpectedEof));
        }
        return Err(ctx.err(ErrorKind::UnexpectedToken {
            expected: "number",
            found: c,
        }));
    }
    let start = ctx.cursor;
    ctx.cursor += 1;
    loop {
        let c = ctx.char();
        if NUM_EXT[c as usize] {
            ctx.cursor += 1;
            continue;
        }
        if c == NUL && ctx.at_sentinel() && ctx.refill()? {
            continue;
        }
        break;
    }
    Ok((start, ctx.cursor))
}

/// Parse a scanned token with the decimal integer grammar and return its
/// 64-bit two's-complement bit pattern. Accumulation wraps and narrowing
/// later truncates; integer decoding never reports overflow. A fraction
/// or exponent in the token is a syntax error for integer targets.
pub(crate) fn int_bits(ctx: &DeserContext, start: usize, end: usize) -> Result<u64, Error> {
    let (mag, neg) = int_magnitude::<u64>(ctx, start, end, |m, d| {
        m.wrapping_mul(10).wrapping_add(d as u64)
    })?;
    Ok(if neg { 0u64.wrapping_sub(mag) } else { mag })
}

/// 128-bit variant of [`int_bits`].
pub(crate) fn int128_bits(ctx: &DeserContext, start: usize, end: usize) -> Result<u128, Error> {
    let (mag, neg) = int_magnitude::<u128>(ctx, start, end, |m, d| {
        m.wrapping_mul(10).wrapping_add(d as u128)
    })?;
    Ok(if neg { 0u128.wrapping_sub(mag) } else { mag })
}

fn int_magnitude<T: Copy + Default>(
    ctx: &DeserContext,
    start: usize,
    end: usize,
    fold: impl Fn(T, u8) -> T,
) -> Result<(T, bool), Error> {
    let mut pos = start;
    let neg = ctx.byte_at(pos) == b'-';
    if neg {
        pos += 1;
    }
    if pos == end {
        return Err(Error::at(ErrorKind::NumberSyntax, start));
    }
    let mut mag = T::default();
    while pos < end {
        let c = ctx.byte_at(pos);
        if !c.is_ascii_digit() {
            return Err(Error::at(ErrorKind::NumberSyntax, pos));
        }
        mag = fold(mag, c - b'0');
        pos += 1;
    }
    Ok((mag, neg))
}

/// Convert a scanned token to `f64` with the standard library's IEEE-754
/// decimal converter.
pub(crate) fn float_value(ctx: &DeserContext, start: usize, end: usize) -> Result<f64, Error> {
    let bytes = ctx.slice(start, end);
    let s =
        std::str::from_utf8(bytes).map_err(|_| Error::at(ErrorKind::NumberSyntax, start))?;
    s.parse::<f64>()
        .map_err(|_| Error::at(ErrorKind::NumberSyntax, start))
}

// ── Booleans ─────────────────────────────────────────────────────────

pub(crate) fn read_bool(ctx: &mut DeserContext) -> Result<bool, Error> {
    skip_ws(ctx)?;
    loop {
        return match ctx.char() {
            b't' => {
                expect_literal(ctx, b"true", "true")?;
                Ok(true)
            }
            b'f' => {
                expect_literal(ctx, b"false", "false")?;
                Ok(false)
            }
            NUL if ctx.at_sentinel() => {
                if ctx.refill()? {
                    continue;
                }
                Err(ctx.err(ErrorKind::UnexpectedEof))
            }
            c => Err(ctx.err(ErrorKind::UnexpectedToken {
                expected: "boolean",
                found: c,
            })),
        };
    }
}

// ── Strings ──────────────────────────────────────────────────────────

/// A decoded string: either a borrowed range of the input buffer (no
/// escapes occurred) or an owned buffer (escapes were processed).
pub(crate) enum Text {
    Range(usize, usize),
    Owned(String),
}

impl Text {
    pub(crate) fn into_string(self, ctx: &DeserContext) -> String {
        match self {
            Text::Range(s, e) => {
                // Range was UTF-8 validated when it was scanned.
                unsafe { std::str::from_utf8_unchecked(ctx.slice(s, e)) }.to_owned()
            }
            Text::Owned(s) => s,
        }
    }
}

/// Read a JSON string, applying the full escape grammar.
pub(crate) fn read_string(ctx: &mut DeserContext) -> Result<Text, Error> {
    skip_ws(ctx)?;
    loop {
        match ctx.char() {
            b'"' => break,
            NUL if ctx.at_sentinel() => {
                if ctx.refill()? {
                    continue;
                }
                return Err(ctx.err(ErrorKind::UnexpectedEof));
            }
            c => {
                return Err(ctx.err(ErrorKind::UnexpectedToken {
                    expected: "string",
                    found: c,
                }))
            }
        }
    }
    ctx.cursor += 1;
    let start = ctx.cursor;
    loop {
        match ctx.char() {
            b'"' => {
                let end = ctx.cursor;
                ctx.cursor += 1;
                if std::str::from_utf8(ctx.slice(start, end)).is_err() {
                    return Err(Error::at(ErrorKind::StringSyntax, start));
                }
                return Ok(Text::Range(start, end));
            }
            b'\\' => return read_string_escaped(ctx, start),
            NUL if ctx.at_sentinel() => {
                if !ctx.refill()? {
                    return Err(ctx.err(ErrorKind::StringSyntax));
                }
            }
            _ => ctx.cursor += 1,
        }
    }
}

/// Slow path: the scanner found a backslash at `ctx.cursor`; the clean
/// prefix starts at `start`.
fn read_string_escaped(ctx: &mut DeserContext, start: usize) -> Result<Text, Error> {
    let mut out: Vec<u8> = Vec::with_capacity(ctx.cursor - start + 16);
    out.extend_from_slice(ctx.slice(start, ctx.cursor));
    loop {
        match ctx.char() {
            b'"' => {
                ctx.cursor += 1;
                let s = String::from_utf8(out)
                    .map_err(|_| Error::at(ErrorKind::StringSyntax, start))?;
                return Ok(Text::Owned(s));
            }
            b'\\' => {
                ctx.cursor += 1;
                decode_escape(ctx, &mut out)?;
            }
            NUL if ctx.at_sentinel() => {
                if !ctx.refill()? {
                    return Err(ctx.err(ErrorKind::StringSyntax));
                }
            }
            c => {
                out.push(c);
                ctx.cursor += 1;
            }
        }
    }
}

/// One escape sequence, cursor sitting just past the backslash.
fn decode_escape(ctx: &mut DeserContext, out: &mut Vec<u8>) -> Result<(), Error> {
    let c = required_char(ctx)?;
    ctx.cursor += 1;
    match c {
        b'"' => out.push(b'"'),
        b'\\' => out.push(b'\\'),
        b'/' => out.push(b'/'),
        b'b' => out.push(0x08),
        b'f' => out.push(0x0C),
        b'n' => out.push(b'\n'),
        b'r' => out.push(b'\r'),
        b't' => out.push(b'\t'),
        b'u' => {
            let unit = read_hex4(ctx)?;
            push_unit(ctx, unit, out)?;
        }
        _ => return Err(Error::at(ErrorKind::StringSyntax, ctx.cursor - 1)),
    }
    Ok(())
}

/// Resolve one UTF-16 unit, recombining surrogate pairs. Unpaired
/// surrogates become U+FFFD rather than failing the whole document.
fn push_unit(ctx: &mut DeserContext, unit: u16, out: &mut Vec<u8>) -> Result<(), Error> {
    const REPLACEMENT: char = '\u{FFFD}';
    match unit {
        0xD800..=0xDBFF => {
            // High surrogate: a `\uXXXX` low surrogate must follow.
            if required_char(ctx)? == b'\\' {
                let mark = ctx.cursor;
                ctx.cursor += 1;
                if required_char(ctx)? == b'u' {
                    ctx.cursor += 1;
                    let low = read_hex4(ctx)?;
                    if (0xDC00..=0xDFFF).contains(&low) {
                        let cp = 0x10000
                            + (((unit as u32) - 0xD800) << 10)
                            + ((low as u32) - 0xDC00);
                        push_char(char::from_u32(cp).unwrap_or(REPLACEMENT), out);
                    } else {
                        push_char(REPLACEMENT, out);
                        // The second unit stands on its own.
                        return push_unit(ctx, low, out);
                    }
                    return Ok(());
                }
                // Some other escape follows; rewind so the main loop
                // handles it, and emit a replacement for the lone high.
                ctx.cursor = mark;
            }
            push_char(REPLACEMENT, out);
            Ok(())
        }
        0xDC00..=0xDFFF => {
            push_char(REPLACEMENT, out);
            Ok(())
        }
        _ => {
            push_char(char::from_u32(unit as u32).unwrap_or(REPLACEMENT), out);
            Ok(())
        }
    }
}

fn push_char(c: char, out: &mut Vec<u8>) {
    let mut tmp = [0u8; 4];
    out.extend_from_slice(c.encode_utf8(&mut tmp).as_bytes());
}

/// Four hex digits, refill-aware.
fn read_hex4(ctx: &mut DeserContext) -> Result<u16, Error> {
    let mut v: u16 = 0;
    for _ in 0..4 {
        let c = required_char(ctx)?;
        let d = match c {
            b'0'..=b'9' => c - b'0',
            b'a'..=b'f' => c - b'a' + 10,
            b'A'..=b'F' => c - b'A' + 10,
            _ => return Err(ctx.err(ErrorKind::StringSyntax)),
        };
        v = v << 4 | d as u16;
        ctx.cursor += 1;
    }
    Ok(v)
}

/// The byte under the cursor, refilling through the sentinel; EOF inside
/// a string is a syntax error.
fn required_char(ctx: &mut DeserContext) -> Result<u8, Error> {
    loop {
        let c = ctx.char();
        if c == NUL && ctx.at_sentinel() {
            if ctx.refill()? {
                continue;
            }
            return Err(ctx.err(ErrorKind::StringSyntax));
        }
        return Ok(c);
    }
}

// ── Value skipping ───────────────────────────────────────────────────

/// Scan past one arbitrary JSON value, tracking brace/bracket depth and
/// string escapes without materializing anything.
pub(crate) fn skip_value(ctx: &mut DeserContext) -> Result<(), Error> {
    skip_ws(ctx)?;
    loop {
        return match ctx.char() {
            b'{' | b'[' => skip_container(ctx),
            b'"' => skip_string(ctx),
            b't' => expect_literal(ctx, b"true", "true"),
            b'f' => expect_literal(ctx, b"false", "false"),
            b'n' => expect_literal(ctx, b"null", "null"),
            b'-' | b'0'..=b'9' => number_token(ctx).map(|_| ()),
            NUL if ctx.at_sentinel() => {
                if ctx.refill()? {
                    continue;
                }
                Err(ctx.err(ErrorKind::UnexpectedEof))
            }
            c => Err(ctx.err(ErrorKind::UnexpectedToken {
                expected: "value",
                found: c,
            })),
        };
    }
}

fn skip_container(ctx: &mut DeserContext) -> Result<(), Error> {
    let mut depth = 0usize;
    loop {
        match ctx.char() {
            b'{' | b'[' => {
                depth += 1;
                ctx.cursor += 1;
            }
            b'}' | b']' => {
                depth -= 1;
                ctx.cursor += 1;
                if depth == 0 {
                    return Ok(());
                }
            }
            b'"' => skip_string(ctx)?,
            NUL if ctx.at_sentinel() => {
                if !ctx.refill()? {
                    return Err(ctx.err(ErrorKind::UnexpectedEof));
                }
            }
            _ => ctx.cursor += 1,
        }
    }
}

fn skip_string(ctx: &mut DeserContext) -> Result<(), Error> {
    ctx.cursor += 1; // opening quote
    loop {
        match ctx.char() {
            b'"' => {
                ctx.cursor += 1;
                return Ok(());
            }
            b'\\' => {
                ctx.cursor += 1;
                required_char(ctx)?;
                ctx.cursor += 1;
            }
            NUL if ctx.at_sentinel() => {
                if !ctx.refill()? {
                    return Err(ctx.err(ErrorKind::StringSyntax));
                }
            }
            _ => ctx.cursor += 1,
        }
    }
}

// ── String emission ──────────────────────────────────────────────────

const HEX: &[u8; 16] = b"0123456789abcdef";

const fn escape_table(html: bool) -> [bool; 256] {
    let mut t = [false; 256];
    let mut c = 0usize;
    while c < 0x20 {
        t[c] = true;
        c += 1;
    }
    t[b'"' as usize] = true;
    t[b'\\' as usize] = true;
    if html {
        t[b'&' as usize] = true;
        t[b'<' as usize] = true;
        t[b'>' as usize] = true;
    }
    t
}

static ESCAPE: [bool; 256] = escape_table(false);
static ESCAPE_HTML: [bool; 256] = escape_table(true);

/// Append `s` as a quoted JSON string. With `html` set, `&`, `<` and `>`
/// are rewritten to `&`, `<` and `>` on top of the
/// standard escapes.
pub(crate) fn write_escaped(buf: &mut Vec<u8>, s: &str, html: bool) {
    let table = if html { &ESCAPE_HTML } else { &ESCAPE };
    buf.push(b'"');
    let bytes = s.as_bytes();
    let mut clean = 0;
    for (i, &c) in bytes.iter().enumerate() {
        if !table[c as usize] {
            continue;
        }
        buf.extend_from_slice(&bytes[clean..i]);
        clean = i + 1;
        match c {
            b'"' => buf.extend_from_slice(b"\\\""),
            b'\\' => buf.extend_from_slice(b"\\\\"),
            b'\n' => buf.extend_from_slice(b"\\n"),
            b'\r' => buf.extend_from_slice(b"\\r"),
            b'\t' => buf.extend_from_slice(b"\\t"),
            0x08 => buf.extend_from_slice(b"\\b"),
            0x0C => buf.extend_from_slice(b"\\f"),
            c => {
                buf.extend_from_slice(b"\\u00");
                buf.push(HEX[(c >> 4) as usize]);
                buf.push(HEX[(c & 0xF) as usize]);
            }
        }
    }
    buf.extend_from_slice(&bytes[clean..]);
    buf.push(b'"');
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::DeserContext;

    fn ctx_of(input: &str) -> DeserContext {
        let mut ctx = DeserContext::new();
        ctx.set_input(input.as_bytes());
        ctx
    }

    #[test]
    fn number_token_scans_through_table() {
        let mut ctx = ctx_of("  -12.5e+3 ,");
        let (s, e) = number_token(&mut ctx).unwrap();
        assert_eq!(ctx.slice(s, e), b"-12.5e+3");
    }

    #[test]
    fn int_bits_wraps_and_truncates() {
        let mut ctx = ctx_of("300");
        let (s, e) = number_token(&mut ctx).unwrap();
        let bits = int_bits(&ctx, s, e).unwrap();
        assert_eq!(bits as u8, 44);
    }

    #[test]
    fn int_bits_rejects_fractions() {
        let mut ctx = ctx_of("1.5");
        let (s, e) = number_token(&mut ctx).unwrap();
        assert!(int_bits(&ctx, s, e).is_err());
    }

    #[test]
    fn negative_int_two_complement() {
        let mut ctx = ctx_of("-1");
        let (s, e) = number_token(&mut ctx).unwrap();
        let bits = int_bits(&ctx, s, e).unwrap();
        assert_eq!(bits as i64, -1);
        assert_eq!(bits as u8, 0xFF);
    }

    #[test]
    fn string_escapes_decode() {
        let mut ctx = ctx_of(r#""a\nb\t\"c\"A\\""#);
        let text = read_string(&mut ctx).unwrap();
        assert_eq!(text.into_string(&ctx), "a\nb\t\"c\"A\\");
    }

    #[test]
    fn surrogate_pair_recombines() {
        let mut ctx = ctx_of(r#""😀""#);
        let text = read_string(&mut ctx).unwrap();
        assert_eq!(text.into_string(&ctx), "\u{1F600}");
    }

    #[test]
    fn lone_surrogate_replaced() {
        let mut ctx = ctx_of(r#""x\ud800y""#);
        let text = read_string(&mut ctx).unwrap();
        assert_eq!(text.into_string(&ctx), "x\u{FFFD}y");
    }

    #[test]
    fn skip_value_handles_nesting() {
        let mut ctx = ctx_of(r#"{"a":[1,{"b":"}]"}],"c":null} ,"#);
        skip_value(&mut ctx).unwrap();
        skip_ws(&mut ctx).unwrap();
        assert_eq!(ctx.char(), b',');
    }

    #[test]
    fn escape_tables_differ_on_html() {
        let mut plain = Vec::new();
        write_escaped(&mut plain, "<b>&", false);
        assert_eq!(plain, br#""<b>&""#);
        let mut html = Vec::new();
        write_escaped(&mut html, "<b>&", true);
        assert_eq!(html, br#""\u003cb\u003e\u0026""#);
    }
}
