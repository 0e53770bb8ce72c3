//! jato, a shape-driven JSON codec.
//!
//! One reflection pass per type compiles a cached program: a tree of
//! decoder nodes for reads, a flat opcode recipe for writes. The hot path
//! interprets that program against raw memory; type introspection never
//! happens during a decode or encode call.
//!
//! ```
//! use facet::Facet;
//!
//! #[derive(Facet, Debug, PartialEq)]
//! struct Friend {
//!     age: u32,
//!     name: String,
//! }
//!
//! let friend: Friend = jato::from_str(r#"{"age": 42, "name": "Alice"}"#).unwrap();
//! assert_eq!(friend, Friend { age: 42, name: "Alice".into() });
//! let out = jato::to_string(&friend).unwrap();
//! assert_eq!(out, r#"{"age":42,"name":"Alice"}"#);
//! ```

mod compiler;
mod context;
mod decode;
mod intrinsics;
mod malum;
mod recipe;
mod value;

pub use value::{Number, Value};

use std::fmt;
use std::io::{Read, Write};
use std::mem::MaybeUninit;

use facet::Facet;

use context::{DeserContext, NUL};

// ── Errors ───────────────────────────────────────────────────────────

/// Why a codec operation failed.
#[derive(Debug)]
pub enum ErrorKind {
    /// The compiler met a type kind the engine does not handle.
    UnsupportedType(&'static str),
    /// Syntactic mismatch between expected and actual input.
    UnexpectedToken { expected: &'static str, found: u8 },
    /// Input ended inside a token.
    UnexpectedEof,
    NumberSyntax,
    StringSyntax,
    /// Only with `disallow_unknown_fields` (or `deny_unknown_fields`).
    UnknownField(String),
    /// An absent field whose type has no derivable default.
    MissingField(&'static str),
    /// A value JSON cannot represent (non-finite floats).
    UnsupportedValue(&'static str),
    /// Reader/writer failure, identity preserved.
    Transport(std::io::Error),
}

/// A codec error, with the input byte offset where it was detected when
/// one exists (decode-side errors have one, compile/encode errors don't).
#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    offset: Option<u64>,
}

impl Error {
    pub(crate) fn new(kind: ErrorKind) -> Self {
        Error { kind, offset: None }
    }

    pub(crate) fn at(kind: ErrorKind, offset: usize) -> Self {
        Error {
            kind,
            offset: Some(offset as u64),
        }
    }

    pub(crate) fn unsupported(type_identifier: &'static str) -> Self {
        Error::new(ErrorKind::UnsupportedType(type_identifier))
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    /// Byte offset into the input stream, for decode-side errors.
    pub fn offset(&self) -> Option<u64> {
        self.offset
    }

    /// The underlying I/O error for [`ErrorKind::Transport`].
    pub fn io_error(&self) -> Option<&std::io::Error> {
        match &self.kind {
            ErrorKind::Transport(e) => Some(e),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ErrorKind::UnsupportedType(t) => write!(f, "unsupported type: {t}")?,
            ErrorKind::UnexpectedToken { expected, found } => {
                write!(f, "expected {expected}, found {:?}", *found as char)?
            }
            ErrorKind::UnexpectedEof => write!(f, "unexpected end of JSON input")?,
            ErrorKind::NumberSyntax => write!(f, "invalid number literal")?,
            ErrorKind::StringSyntax => write!(f, "invalid string literal")?,
            ErrorKind::UnknownField(name) => write!(f, "unknown field {name:?}")?,
            ErrorKind::MissingField(name) => {
                write!(f, "missing field {name:?} has no default")?
            }
            ErrorKind::UnsupportedValue(what) => write!(f, "unsupported value: {what}")?,
            ErrorKind::Transport(e) => write!(f, "transport: {e}")?,
        }
        if let Some(offset) = self.offset {
            write!(f, " at offset {offset}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self.kind {
            ErrorKind::Transport(e) => Some(e),
            _ => None,
        }
    }
}

// ── One-shot entry points ────────────────────────────────────────────

/// Decode a complete JSON document from a byte slice. Trailing
/// non-whitespace input is an error.
pub fn from_slice<T: Facet<'static>>(input: &[u8]) -> Result<T, Error> {
    let mut ctx = context::acquire_deser();
    ctx.set_input(input);
    let result = decode_with_ctx::<T>(&mut ctx).and_then(|v| {
        intrinsics::skip_ws(&mut ctx)?;
        if ctx.at_sentinel() {
            Ok(v)
        } else {
            Err(ctx.err(ErrorKind::UnexpectedToken {
                expected: "end of input",
                found: ctx.char(),
            }))
        }
    });
    context::release_deser(ctx);
    result
}

/// Decode a complete JSON document from text.
pub fn from_str<T: Facet<'static>>(input: &str) -> Result<T, Error> {
    from_slice(input.as_bytes())
}

/// Encode to a byte buffer. HTML-problematic characters are escaped, as
/// they are by [`Encoder`] unless toggled off.
pub fn to_vec<T: Facet<'static>>(value: &T) -> Result<Vec<u8>, Error> {
    encode_to_buf(value, true, None)
}

/// Encode to a `String`.
pub fn to_string<T: Facet<'static>>(value: &T) -> Result<String, Error> {
    to_vec(value).map(|buf| String::from_utf8(buf).expect("codec emits UTF-8"))
}

/// Encode with indentation, [`Encoder::set_indent`] style.
pub fn to_vec_pretty<T: Facet<'static>>(
    value: &T,
    prefix: &str,
    indent: &str,
) -> Result<Vec<u8>, Error> {
    encode_to_buf(value, true, Some((prefix, indent)))
}

/// Encode straight into a writer (one value, no trailing newline).
pub fn to_writer<T: Facet<'static>, W: Write>(writer: &mut W, value: &T) -> Result<(), Error> {
    let buf = to_vec(value)?;
    writer
        .write_all(&buf)
        .map_err(|e| Error::new(ErrorKind::Transport(e)))
}

fn decode_with_ctx<T: Facet<'static>>(ctx: &mut DeserContext) -> Result<T, Error> {
    let node = compiler::decoder_for(T::SHAPE)?;
    let mut out = MaybeUninit::<T>::uninit();
    node.decode(ctx, out.as_mut_ptr() as *mut u8)?;
    Ok(unsafe { out.assume_init() })
}

fn encode_to_buf<T: Facet<'static>>(
    value: &T,
    escape_html: bool,
    indent: Option<(&str, &str)>,
) -> Result<Vec<u8>, Error> {
    let recipe = compiler::encoder_for(T::SHAPE, indent.is_some())?;
    let mut ctx = context::acquire_encode();
    ctx.html_escape = escape_html;
    if let Some((prefix, unit)) = indent {
        ctx.prefix.extend_from_slice(prefix.as_bytes());
        ctx.unit.extend_from_slice(unit.as_bytes());
    }
    ctx.bases.push(value as *const T as *const u8);
    let result = recipe.run(&mut ctx);
    ctx.bases.pop();
    let out = std::mem::take(&mut ctx.buf);
    context::release_encode(ctx);
    result.map(|()| out)
}

// ── Streaming decoder ────────────────────────────────────────────────

/// One lexical element of a JSON stream, [`Decoder::token`]'s currency.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// One of `{` `}` `[` `]`.
    Delim(u8),
    Bool(bool),
    Num(f64),
    /// Numbers after [`Decoder::use_number`].
    NumberLit(Number),
    Str(String),
    Null,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum TokState {
    /// At a value position.
    Value,
    /// Inside an object, at a key (or `}`) position.
    ObjKey,
    /// Inside an object, between a key and its `:`.
    ObjColon,
    /// Just past a value: a separator or closer comes next.
    AfterValue,
}

/// A streaming JSON reader.
///
/// The decoder owns one deserialization context for its whole life, so
/// buffered input carries across [`decode`](Decoder::decode) calls and
/// [`buffered`](Decoder::buffered) can hand back what was read but not
/// consumed. Refills are driven by the scanners: whenever a token runs
/// into the end of the buffer, more input is pulled from the reader, so
/// values may be split across reads at any byte.
pub struct Decoder<R: Read> {
    reader: R,
    ctx: Option<DeserContext>,
    stack: Vec<u8>,
    state: TokState,
}

impl<R: Read> Decoder<R> {
    pub fn new(reader: R) -> Decoder<R> {
        Decoder {
            reader,
            ctx: Some(context::acquire_deser()),
            stack: Vec::new(),
            state: TokState::Value,
        }
    }

    /// Decode numbers aimed at dynamic [`Value`] targets as
    /// decimal-preserving [`Number`]s instead of `f64`.
    pub fn use_number(&mut self) {
        self.ctx.as_mut().expect("decoder context released").use_number = true;
    }

    /// Error on object keys that match no record field instead of
    /// skipping their values.
    pub fn disallow_unknown_fields(&mut self) {
        self.ctx
            .as_mut()
            .expect("decoder context released")
            .disallow_unknown = true;
    }

    /// Total stream offset of the read cursor.
    pub fn input_offset(&self) -> u64 {
        self.ctx.as_ref().expect("decoder context released").cursor as u64
    }

    /// The bytes read from the underlying reader but not yet consumed.
    /// Valid until the next decode/token call.
    pub fn buffered(&self) -> impl Read + '_ {
        let ctx = self.ctx.as_ref().expect("decoder context released");
        ctx.slice(ctx.cursor, ctx.data_end())
    }

    /// Decode the next value in the stream into `T`.
    pub fn decode<T: Facet<'static>>(&mut self) -> Result<T, Error> {
        let node = compiler::decoder_for(T::SHAPE)?;
        let at_key = self.prepare_value()?;
        let result = self.with_ctx(|ctx| {
            let mut out = MaybeUninit::<T>::uninit();
            node.decode(ctx, out.as_mut_ptr() as *mut u8)?;
            Ok(unsafe { out.assume_init() })
        });
        if result.is_ok() {
            self.state = if at_key {
                TokState::ObjColon
            } else {
                TokState::AfterValue
            };
        }
        result
    }

    /// Whether another element follows in the current array or object
    /// (or another value in the stream, at the top level).
    pub fn more(&mut self) -> bool {
        self.with_ctx(|ctx| {
            if intrinsics::skip_ws(ctx).is_err() {
                return false;
            }
            let c = ctx.char();
            if c == NUL && ctx.at_sentinel() {
                return false;
            }
            c != b']' && c != b'}'
        })
    }

    /// The next lexical token: delimiters, keys, and atoms, with commas
    /// and colons consumed silently.
    pub fn token(&mut self) -> Result<Token, Error> {
        loop {
            match self.state {
                TokState::ObjColon => {
                    self.with_ctx(|ctx| intrinsics::expect(ctx, b':', "`:` after object key"))?;
                    self.state = TokState::Value;
                }
                TokState::AfterValue => {
                    let c = self.with_ctx(intrinsics::peek)?;
                    match c {
                        b',' if !self.stack.is_empty() => {
                            self.with_ctx(|ctx| ctx.cursor += 1);
                            self.state = if self.stack.last() == Some(&b'{') {
                                TokState::ObjKey
                            } else {
                                TokState::Value
                            };
                        }
                        b'}' | b']' => return self.close_delim(c),
                        _ if self.stack.is_empty() => self.state = TokState::Value,
                        _ => {
                            return Err(Error::new(ErrorKind::UnexpectedToken {
                                expected: "`,` or closing delimiter",
                                found: c,
                            }))
                        }
                    }
                }
                TokState::ObjKey => {
                    let c = self.with_ctx(intrinsics::peek)?;
                    if c == b'}' {
                        return self.close_delim(b'}');
                    }
                    let key = self.with_ctx(|ctx| {
                        intrinsics::read_string(ctx).map(|t| t.into_string(ctx))
                    })?;
                    self.state = TokState::ObjColon;
                    return Ok(Token::Str(key));
                }
                TokState::Value => {
                    let c = self.with_ctx(intrinsics::peek)?;
                    return match c {
                        b'{' => {
                            self.with_ctx(|ctx| ctx.cursor += 1);
                            self.stack.push(b'{');
                            self.state = TokState::ObjKey;
                            Ok(Token::Delim(b'{'))
                        }
                        b'[' => {
                            self.with_ctx(|ctx| ctx.cursor += 1);
                            self.stack.push(b'[');
                            self.state = TokState::Value;
                            Ok(Token::Delim(b'['))
                        }
                        b']' => self.close_delim(b']'),
                        b'"' => {
                            let s = self.with_ctx(|ctx| {
                                intrinsics::read_string(ctx).map(|t| t.into_string(ctx))
                            })?;
                            self.state = TokState::AfterValue;
                            Ok(Token::Str(s))
                        }
                        b't' | b'f' => {
                            let v = self.with_ctx(intrinsics::read_bool)?;
                            self.state = TokState::AfterValue;
                            Ok(Token::Bool(v))
                        }
                        b'n' => {
                            self.with_ctx(|ctx| {
                                intrinsics::expect_literal(ctx, b"null", "null")
                            })?;
                            self.state = TokState::AfterValue;
                            Ok(Token::Null)
                        }
                        b'-' | b'0'..=b'9' => {
                            let tok = self.with_ctx(|ctx| {
                                let (s, e) = intrinsics::number_token(ctx)?;
                                if ctx.use_number {
                                    let lit = String::from_utf8(ctx.slice(s, e).to_vec())
                                        .map_err(|_| Error::at(ErrorKind::NumberSyntax, s))?;
                                    Ok(Token::NumberLit(Number::from_literal(lit)))
                                } else {
                                    Ok(Token::Num(intrinsics::float_value(ctx, s, e)?))
                                }
                            })?;
                            self.state = TokState::AfterValue;
                            Ok(tok)
                        }
                        c if c == NUL => Err(Error::new(ErrorKind::UnexpectedEof)),
                        c => Err(Error::new(ErrorKind::UnexpectedToken {
                            expected: "value",
                            found: c,
                        })),
                    };
                }
            }
        }
    }

    /// Consume a `:` or `,` owed by the token state, leaving the cursor
    /// at a value. Returns whether that value sits at an object-key
    /// position.
    fn prepare_value(&mut self) -> Result<bool, Error> {
        match self.state {
            TokState::Value => Ok(false),
            TokState::ObjKey => Ok(true),
            TokState::ObjColon => {
                self.with_ctx(|ctx| intrinsics::expect(ctx, b':', "`:` after object key"))?;
                self.state = TokState::Value;
                Ok(false)
            }
            TokState::AfterValue => {
                if self.stack.is_empty() {
                    self.state = TokState::Value;
                    return Ok(false);
                }
                self.with_ctx(|ctx| intrinsics::expect(ctx, b',', "`,` between elements"))?;
                if self.stack.last() == Some(&b'{') {
                    self.state = TokState::ObjKey;
                    Ok(true)
                } else {
                    self.state = TokState::Value;
                    Ok(false)
                }
            }
        }
    }

    fn close_delim(&mut self, c: u8) -> Result<Token, Error> {
        let open = self.stack.pop().ok_or(Error::new(ErrorKind::UnexpectedToken {
            expected: "value",
            found: c,
        }))?;
        if (c == b'}') != (open == b'{') {
            return Err(Error::new(ErrorKind::UnexpectedToken {
                expected: "matching delimiter",
                found: c,
            }));
        }
        self.with_ctx(|ctx| ctx.cursor += 1);
        self.state = TokState::AfterValue;
        Ok(Token::Delim(c))
    }

    /// Run `f` with the context wired to this decoder's reader. The hook
    /// is installed per call and cleared before returning, so the raw
    /// pointer never outlives the borrow it was made from.
    fn with_ctx<T>(&mut self, f: impl FnOnce(&mut DeserContext) -> T) -> T {
        let reader: &mut (dyn Read + '_) = &mut self.reader;
        let reader: *mut (dyn Read + '_) = reader;
        // The pointer is used only inside `f`, strictly within the
        // lifetime of the borrow above.
        let reader: *mut (dyn Read + 'static) = unsafe { std::mem::transmute(reader) };
        let ctx = self.ctx.as_mut().expect("decoder context released");
        ctx.set_reader(reader);
        let out = f(ctx);
        ctx.clear_reader();
        out
    }
}

impl<R: Read> Drop for Decoder<R> {
    fn drop(&mut self) {
        if let Some(ctx) = self.ctx.take() {
            context::release_deser(ctx);
        }
    }
}

// ── Streaming encoder ────────────────────────────────────────────────

/// A JSON writer: serializes values to the underlying writer, one value
/// per [`encode`](Encoder::encode) call, each followed by a newline.
pub struct Encoder<W: Write> {
    writer: W,
    escape_html: bool,
    prefix: String,
    indent: String,
}

impl<W: Write> Encoder<W> {
    pub fn new(writer: W) -> Encoder<W> {
        Encoder {
            writer,
            escape_html: true,
            prefix: String::new(),
            indent: String::new(),
        }
    }

    /// Escape `&`, `<` and `>` inside strings. On by default.
    pub fn set_escape_html(&mut self, on: bool) {
        self.escape_html = on;
    }

    /// Indent output like the pretty entry point would; both parts empty
    /// disables indentation.
    pub fn set_indent(&mut self, prefix: &str, indent: &str) {
        self.prefix = prefix.to_owned();
        self.indent = indent.to_owned();
    }

    /// Serialize `value` and flush it with a trailing newline.
    pub fn encode<T: Facet<'static>>(&mut self, value: &T) -> Result<(), Error> {
        let indented = !(self.prefix.is_empty() && self.indent.is_empty());
        let recipe = compiler::encoder_for(T::SHAPE, indented)?;
        let mut ctx = context::acquire_encode();
        ctx.html_escape = self.escape_html;
        ctx.prefix.extend_from_slice(self.prefix.as_bytes());
        ctx.unit.extend_from_slice(self.indent.as_bytes());
        ctx.bases.push(value as *const T as *const u8);
        let result = recipe.run(&mut ctx);
        ctx.bases.pop();
        let result = result.and_then(|()| {
            ctx.buf.push(b'\n');
            self.writer
                .write_all(&ctx.buf)
                .map_err(|e| Error::new(ErrorKind::Transport(e)))
        });
        context::release_encode(ctx);
        result
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, HashMap};
    use std::io::Read;

    use super::*;
    use facet::Facet;

    #[derive(Facet, Debug, PartialEq)]
    struct Friend {
        age: u32,
        name: String,
    }

    #[test]
    fn flat_struct() {
        let friend: Friend = from_str(r#"{"age": 42, "name": "Alice"}"#).unwrap();
        assert_eq!(
            friend,
            Friend {
                age: 42,
                name: "Alice".into()
            }
        );
    }

    #[test]
    fn reversed_key_order() {
        let friend: Friend = from_str(r#"{"name": "Alice", "age": 42}"#).unwrap();
        assert_eq!(friend.age, 42);
        assert_eq!(friend.name, "Alice");
    }

    #[test]
    fn unknown_keys_skipped() {
        let friend: Friend =
            from_str(r#"{"age": 42, "extra": {"deep": [1, "x"]}, "name": "Alice"}"#).unwrap();
        assert_eq!(friend.age, 42);
        assert_eq!(friend.name, "Alice");
    }

    #[test]
    fn unknown_keys_rejected_when_disallowed() {
        let mut dec = Decoder::new(&br#"{"x": 1, "y": 2}"#[..]);
        dec.disallow_unknown_fields();
        #[derive(Facet, Debug, PartialEq)]
        struct OnlyX {
            x: i64,
        }
        let err = dec.decode::<OnlyX>().unwrap_err();
        match err.kind() {
            ErrorKind::UnknownField(name) => assert_eq!(name, "y"),
            other => panic!("wrong error: {other:?}"),
        }
    }

    #[test]
    fn deny_unknown_fields_attribute() {
        #[derive(Facet, Debug)]
        #[facet(deny_unknown_fields)]
        struct Strict {
            x: i64,
        }
        let err = from_str::<Strict>(r#"{"x": 1, "y": 2}"#).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::UnknownField(_)));
    }

    #[test]
    fn missing_fields_default() {
        let friend: Friend = from_str("{}").unwrap();
        assert_eq!(friend.age, 0);
        assert_eq!(friend.name, "");
    }

    #[test]
    fn null_values_default() {
        #[derive(Facet, Debug, PartialEq)]
        struct Mixed {
            n: i32,
            s: String,
            v: Vec<u8>,
            o: Option<u8>,
        }
        let m: Mixed = from_str(r#"{"n":null,"s":null,"v":null,"o":null}"#).unwrap();
        assert_eq!(
            m,
            Mixed {
                n: 0,
                s: String::new(),
                v: vec![],
                o: None
            }
        );
    }

    #[test]
    fn duplicate_keys_last_wins() {
        let friend: Friend = from_str(r#"{"age":1,"age":2,"name":"a","name":"b"}"#).unwrap();
        assert_eq!(friend.age, 2);
        assert_eq!(friend.name, "b");
    }

    // ── Numbers ──────────────────────────────────────────────────────

    #[derive(Facet, Debug, PartialEq)]
    struct Narrow {
        a: u8,
    }

    #[test]
    fn integer_narrowing_truncates() {
        let n: Narrow = from_str(r#"{"a":300}"#).unwrap();
        assert_eq!(n.a, 44);
    }

    #[test]
    fn negative_into_unsigned_wraps() {
        let n: Narrow = from_str(r#"{"a":-1}"#).unwrap();
        assert_eq!(n.a, 0xFF);
    }

    #[test]
    fn signed_widths() {
        #[derive(Facet, Debug, PartialEq)]
        struct Ints {
            a: i8,
            b: i16,
            c: i32,
            d: i64,
            e: isize,
        }
        let v: Ints = from_str(r#"{"a":-5,"b":-300,"c":70000,"d":-9007199254740993,"e":12}"#)
            .unwrap();
        assert_eq!(v.a, -5);
        assert_eq!(v.b, -300);
        assert_eq!(v.c, 70000);
        assert_eq!(v.d, -9007199254740993);
        assert_eq!(v.e, 12);
    }

    #[test]
    fn fraction_into_integer_is_number_syntax() {
        let err = from_str::<Narrow>(r#"{"a":1.5}"#).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::NumberSyntax));
    }

    #[test]
    fn floats_decode_and_downcast() {
        #[derive(Facet, Debug, PartialEq)]
        struct Floats {
            f: f32,
            g: f64,
        }
        let v: Floats = from_str(r#"{"f":1.5,"g":2.5e3}"#).unwrap();
        assert_eq!(v.f, 1.5f32);
        assert_eq!(v.g, 2500.0);
    }

    #[test]
    fn u128_round_trip() {
        #[derive(Facet, Debug, PartialEq)]
        struct Big {
            big: u128,
        }
        let v: Big = from_str(r#"{"big":340282366920938463463374607431768211455}"#).unwrap();
        assert_eq!(v.big, u128::MAX);
        assert_eq!(
            to_string(&v).unwrap(),
            r#"{"big":340282366920938463463374607431768211455}"#
        );
    }

    #[test]
    fn number_field_preserves_literal() {
        #[derive(Facet, Debug, PartialEq)]
        struct Pay {
            amount: Number,
        }
        let v: Pay = from_str(r#"{"amount":10.50}"#).unwrap();
        assert_eq!(v.amount.as_str(), "10.50");
        assert_eq!(v.amount.as_f64(), Some(10.5));
        assert_eq!(to_string(&v).unwrap(), r#"{"amount":10.50}"#);
    }

    // ── Strings ──────────────────────────────────────────────────────

    #[test]
    fn escape_sequences_decode() {
        #[derive(Facet, Debug, PartialEq)]
        struct S {
            s: String,
        }
        let v: S = from_str(r#"{"s":"a\nb\t\"c\"\\ \/ A 😀"}"#).unwrap();
        assert_eq!(v.s, "a\nb\t\"c\"\\ / A \u{1F600}");
    }

    #[test]
    fn char_fields() {
        #[derive(Facet, Debug, PartialEq)]
        struct C {
            c: char,
        }
        let v: C = from_str(r#"{"c":"ß"}"#).unwrap();
        assert_eq!(v.c, 'ß');
        assert_eq!(to_string(&v).unwrap(), r#"{"c":"ß"}"#);
        assert!(from_str::<C>(r#"{"c":"ab"}"#).is_err());
    }

    #[test]
    fn unterminated_string_is_syntax_error() {
        let err = from_str::<Friend>(r#"{"name":"abc"#).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::StringSyntax));
    }

    #[test]
    fn invalid_escape_is_syntax_error() {
        let err = from_str::<Friend>(r#"{"name":"a\qb"}"#).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::StringSyntax));
    }

    // ── Tags: rename, alias, case folding ────────────────────────────

    #[derive(Facet, Debug, PartialEq)]
    struct Named {
        #[facet(rename = "Name")]
        name: String,
    }

    #[test]
    fn rename_exact_match() {
        let v: Named = from_str(r#"{"Name":"x"}"#).unwrap();
        assert_eq!(v.name, "x");
        assert_eq!(to_string(&v).unwrap(), r#"{"Name":"x"}"#);
    }

    #[test]
    fn case_folded_match() {
        let upper: Named = from_str(r#"{"NAME":"x"}"#).unwrap();
        assert_eq!(upper.name, "x");
        let lower: Named = from_str(r#"{"name":"x"}"#).unwrap();
        assert_eq!(lower.name, "x");
    }

    #[test]
    fn exact_collision_resolves_to_declaration_order() {
        #[derive(Facet, Debug, PartialEq)]
        struct Clash {
            #[facet(rename = "X")]
            first: i64,
            #[facet(rename = "x")]
            second: i64,
        }
        // Both keys fold to "x"; the first declared field owns the entry.
        let v: Clash = from_str(r#"{"x":7}"#).unwrap();
        assert_eq!(v.first, 7);
        assert_eq!(v.second, 0);
        // The exact-cased "X" also reaches the first field.
        let v: Clash = from_str(r#"{"X":9}"#).unwrap();
        assert_eq!(v.first, 9);
    }

    #[test]
    fn alias_accepted_on_decode() {
        #[derive(Facet, Debug, PartialEq)]
        struct Aliased {
            #[facet(alias = "old_name")]
            name: String,
        }
        let v: Aliased = from_str(r#"{"old_name":"x"}"#).unwrap();
        assert_eq!(v.name, "x");
        assert_eq!(to_string(&v).unwrap(), r#"{"name":"x"}"#);
    }

    #[test]
    fn skipped_field_ignored_both_ways() {
        #[derive(Facet, Debug, PartialEq)]
        struct WithSkip {
            x: i64,
            #[facet(skip)]
            scratch: i64,
        }
        let v: WithSkip = from_str(r#"{"x":1,"scratch":9}"#).unwrap();
        assert_eq!(v.x, 1);
        assert_eq!(v.scratch, 0);
        assert_eq!(to_string(&v).unwrap(), r#"{"x":1}"#);
    }

    #[test]
    fn field_default_expression() {
        #[derive(Facet, Debug, PartialEq)]
        struct Conf {
            host: String,
            #[facet(default = 8080)]
            port: u16,
        }
        let v: Conf = from_str(r#"{"host":"db"}"#).unwrap();
        assert_eq!(v.port, 8080);
        let v: Conf = from_str(r#"{"host":"db","port":90}"#).unwrap();
        assert_eq!(v.port, 90);
    }

    #[test]
    fn string_coerced_primitives() {
        #[derive(Facet, Debug, PartialEq)]
        struct Ids {
            #[facet(json::string)]
            id: u64,
            #[facet(json::string)]
            score: f64,
            #[facet(json::string)]
            on: bool,
        }
        let v: Ids = from_str(r#"{"id":"18446744073709551615","score":"1.5","on":"true"}"#)
            .unwrap();
        assert_eq!(v.id, u64::MAX);
        assert_eq!(v.score, 1.5);
        assert!(v.on);
        assert_eq!(
            to_string(&v).unwrap(),
            r#"{"id":"18446744073709551615","score":"1.5","on":"true"}"#
        );
    }

    #[test]
    fn omit_empty_fields() {
        #[derive(Facet, Debug, PartialEq, Default)]
        struct Omit {
            #[facet(json::omit_empty)]
            n: i64,
            #[facet(json::omit_empty)]
            s: String,
            #[facet(json::omit_empty)]
            v: Vec<i64>,
            #[facet(json::omit_empty)]
            o: Option<i64>,
            keep: bool,
        }
        assert_eq!(to_string(&Omit::default()).unwrap(), r#"{"keep":false}"#);
        let full = Omit {
            n: 1,
            s: "x".into(),
            v: vec![2],
            o: Some(3),
            keep: true,
        };
        assert_eq!(
            to_string(&full).unwrap(),
            r#"{"n":1,"s":"x","v":[2],"o":3,"keep":true}"#
        );
    }

    #[test]
    fn skip_serializing_if_predicate() {
        fn under_ten(n: &u32) -> bool {
            *n < 10
        }
        #[derive(Facet, Debug)]
        struct Scored {
            #[facet(skip_serializing_if = under_ten)]
            score: u32,
            name: String,
        }
        let low = Scored {
            score: 3,
            name: "a".into(),
        };
        assert_eq!(to_string(&low).unwrap(), r#"{"name":"a"}"#);
        let high = Scored {
            score: 30,
            name: "a".into(),
        };
        assert_eq!(to_string(&high).unwrap(), r#"{"score":30,"name":"a"}"#);
    }

    // ── Sequences ────────────────────────────────────────────────────

    #[test]
    fn vec_of_scalars() {
        #[derive(Facet, Debug, PartialEq)]
        struct Nums {
            xs: Vec<u32>,
        }
        let v: Nums = from_str(r#"{"xs":[1,2,3,4,5,6,7,8,9]}"#).unwrap();
        assert_eq!(v.xs, (1..=9).collect::<Vec<u32>>());
        assert_eq!(to_string(&v).unwrap(), r#"{"xs":[1,2,3,4,5,6,7,8,9]}"#);
    }

    #[test]
    fn vec_of_structs_and_empties() {
        #[derive(Facet, Debug, PartialEq)]
        struct Team {
            members: Vec<Friend>,
            tags: Vec<String>,
        }
        let v: Team = from_str(
            r#"{"members":[{"age":1,"name":"a"},{"age":2,"name":"b"}],"tags":[]}"#,
        )
        .unwrap();
        assert_eq!(v.members.len(), 2);
        assert_eq!(v.members[1].name, "b");
        assert!(v.tags.is_empty());
        assert_eq!(
            to_string(&v).unwrap(),
            r#"{"members":[{"age":1,"name":"a"},{"age":2,"name":"b"}],"tags":[]}"#
        );
    }

    #[test]
    fn nested_vecs() {
        let grid: Vec<Vec<u8>> = from_str("[[1,2],[],[3]]").unwrap();
        assert_eq!(grid, vec![vec![1, 2], vec![], vec![3]]);
        assert_eq!(to_string(&grid).unwrap(), "[[1,2],[],[3]]");
    }

    #[test]
    fn fixed_array_pads_and_truncates() {
        #[derive(Facet, Debug, PartialEq)]
        struct Fixed {
            xs: [u8; 4],
        }
        let exact: Fixed = from_str(r#"{"xs":[1,2,3,4]}"#).unwrap();
        assert_eq!(exact.xs, [1, 2, 3, 4]);
        let short: Fixed = from_str(r#"{"xs":[1,2]}"#).unwrap();
        assert_eq!(short.xs, [1, 2, 0, 0]);
        let long: Fixed = from_str(r#"{"xs":[1,2,3,4,9,9]}"#).unwrap();
        assert_eq!(long.xs, [1, 2, 3, 4]);
        assert_eq!(to_string(&exact).unwrap(), r#"{"xs":[1,2,3,4]}"#);
    }

    #[test]
    fn slice_error_rolls_back_cleanly() {
        // Strings force element drops on the error path.
        let err = from_str::<Vec<String>>(r#"["a","b",3]"#).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::UnexpectedToken { .. }));
    }

    // ── Options ──────────────────────────────────────────────────────

    #[test]
    fn options_full_and_null() {
        #[derive(Facet, Debug, PartialEq)]
        struct Opt {
            a: Option<u32>,
            b: Option<String>,
            c: Option<u32>,
        }
        let v: Opt = from_str(r#"{"a":5,"b":null}"#).unwrap();
        assert_eq!(v.a, Some(5));
        assert_eq!(v.b, None);
        assert_eq!(v.c, None);
        assert_eq!(to_string(&v).unwrap(), r#"{"a":5,"b":null,"c":null}"#);
    }

    #[test]
    fn option_of_struct() {
        #[derive(Facet, Debug, PartialEq)]
        struct Wrap {
            inner: Option<Friend>,
        }
        let v: Wrap = from_str(r#"{"inner":{"age":3,"name":"n"}}"#).unwrap();
        assert_eq!(
            v.inner,
            Some(Friend {
                age: 3,
                name: "n".into()
            })
        );
    }

    // ── Maps ─────────────────────────────────────────────────────────

    #[test]
    fn hash_map_decodes_and_encodes_sorted() {
        #[derive(Facet, Debug, PartialEq)]
        struct Counts {
            by_name: HashMap<String, u32>,
        }
        let v: Counts = from_str(r#"{"by_name":{"zeta":26,"alpha":1}}"#).unwrap();
        assert_eq!(v.by_name["zeta"], 26);
        assert_eq!(v.by_name["alpha"], 1);
        assert_eq!(
            to_string(&v).unwrap(),
            r#"{"by_name":{"alpha":1,"zeta":26}}"#
        );
    }

    #[test]
    fn btree_map_round_trip() {
        let m: BTreeMap<String, Vec<i64>> = from_str(r#"{"a":[1],"b":[]}"#).unwrap();
        assert_eq!(m["a"], vec![1]);
        assert_eq!(to_string(&m).unwrap(), r#"{"a":[1],"b":[]}"#);
    }

    #[test]
    fn non_string_map_keys_unsupported() {
        let err = from_str::<HashMap<u32, u32>>(r#"{"1":2}"#).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::UnsupportedType(_)));
    }

    // ── Recursive types ──────────────────────────────────────────────

    #[derive(Facet, Debug, PartialEq)]
    struct TreeNode {
        label: String,
        children: Vec<TreeNode>,
    }

    #[test]
    fn recursive_type_round_trips() {
        let doc = r#"{"label":"root","children":[{"label":"a","children":[]},{"label":"b","children":[{"label":"b1","children":[]}]}]}"#;
        let tree: TreeNode = from_str(doc).unwrap();
        assert_eq!(tree.children.len(), 2);
        assert_eq!(tree.children[1].children[0].label, "b1");
        assert_eq!(to_string(&tree).unwrap(), doc);
    }

    // ── Transparent wrappers ─────────────────────────────────────────

    #[test]
    fn transparent_wrapper_passes_through() {
        #[derive(Facet, Debug, PartialEq)]
        #[facet(transparent)]
        struct UserId(u64);

        #[derive(Facet, Debug, PartialEq)]
        struct Row {
            id: UserId,
        }
        let v: Row = from_str(r#"{"id":77}"#).unwrap();
        assert_eq!(v.id, UserId(77));
        assert_eq!(to_string(&v).unwrap(), r#"{"id":77}"#);
    }

    // ── Dynamic values ───────────────────────────────────────────────

    #[test]
    fn dynamic_value_decodes_any_shape() {
        let v: Value = from_str(r#"{"a":[1,"x",true,null],"b":{"c":2.5}}"#).unwrap();
        let a = v.get("a").unwrap();
        match a {
            Value::Array(items) => {
                assert_eq!(items[0], Value::Num(1.0));
                assert_eq!(items[1], Value::Str("x".into()));
                assert_eq!(items[2], Value::Bool(true));
                assert_eq!(items[3], Value::Null);
            }
            other => panic!("not an array: {other:?}"),
        }
        assert_eq!(v.get("b").unwrap().get("c").unwrap().as_f64(), Some(2.5));
    }

    #[test]
    fn dynamic_value_as_record_field() {
        #[derive(Facet, Debug, PartialEq)]
        struct Envelope {
            kind: String,
            payload: Value,
        }
        let v: Envelope = from_str(r#"{"kind":"k","payload":{"n":1}}"#).unwrap();
        assert_eq!(v.payload.get("n").unwrap().as_f64(), Some(1.0));
        assert_eq!(
            to_string(&v).unwrap(),
            r#"{"kind":"k","payload":{"n":1.0}}"#
        );
    }

    #[test]
    fn use_number_keeps_literals() {
        let mut dec = Decoder::new(&br#"{"n":1e2}"#[..]);
        dec.use_number();
        let v: Value = dec.decode().unwrap();
        match v.get("n").unwrap() {
            Value::NumberLit(n) => {
                assert_eq!(n.as_str(), "1e2");
                assert_eq!(n.as_f64(), Some(100.0));
            }
            other => panic!("expected literal, got {other:?}"),
        }
    }

    #[test]
    fn value_reencode_is_stable() {
        let doc = r#"{"z":1.0,"a":[true,"s"],"m":{"k":null}}"#;
        let v: Value = from_str(doc).unwrap();
        let once = to_string(&v).unwrap();
        let again: Value = from_str(&once).unwrap();
        assert_eq!(to_string(&again).unwrap(), once);
    }

    // ── Encoding details ─────────────────────────────────────────────

    #[test]
    fn html_escape_toggle() {
        let mut enc = Encoder::new(Vec::new());
        enc.encode(&String::from("<b>&")).unwrap();
        let escaped = enc.into_inner();
        assert_eq!(escaped, b"\"\\u003cb\\u003e\\u0026\"\n");

        let mut enc = Encoder::new(Vec::new());
        enc.set_escape_html(false);
        enc.encode(&String::from("<b>&")).unwrap();
        assert_eq!(enc.into_inner(), b"\"<b>&\"\n");
    }

    #[test]
    fn control_characters_escape() {
        let s = String::from("a\nb\"c\\d\u{8}");
        assert_eq!(to_string(&s).unwrap(), r#""a\nb\"c\\d\b""#);
    }

    #[test]
    fn indentation() {
        #[derive(Facet)]
        struct Doc {
            a: i64,
            b: Vec<i64>,
        }
        let mut enc = Encoder::new(Vec::new());
        enc.set_indent("", "  ");
        enc.encode(&Doc { a: 1, b: vec![2, 3] }).unwrap();
        let out = String::from_utf8(enc.into_inner()).unwrap();
        assert_eq!(out, "{\n  \"a\": 1,\n  \"b\": [\n    2,\n    3\n  ]\n}\n");
    }

    #[test]
    fn indent_prefix() {
        #[derive(Facet)]
        struct P {
            a: bool,
        }
        let out = to_vec_pretty(&P { a: true }, ">", "\t").unwrap();
        assert_eq!(out, b"{\n>\t\"a\": true\n>}");
    }

    #[test]
    fn encoder_appends_newline_per_value() {
        let mut enc = Encoder::new(Vec::new());
        enc.encode(&1u8).unwrap();
        enc.encode(&2u8).unwrap();
        assert_eq!(enc.into_inner(), b"1\n2\n");
    }

    #[test]
    fn non_finite_floats_refused() {
        let err = to_string(&f64::NAN).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::UnsupportedValue(_)));
    }

    #[test]
    fn transport_errors_surface_on_flush() {
        struct FailWriter;
        impl std::io::Write for FailWriter {
            fn write(&mut self, _: &[u8]) -> std::io::Result<usize> {
                Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone"))
            }
            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }
        let mut enc = Encoder::new(FailWriter);
        let err = enc.encode(&1u8).unwrap_err();
        assert_eq!(
            err.io_error().map(|e| e.kind()),
            Some(std::io::ErrorKind::BrokenPipe)
        );
    }

    // ── Round trips ──────────────────────────────────────────────────

    #[derive(Facet, Debug, PartialEq)]
    struct Everything {
        flag: bool,
        count: i32,
        big: u64,
        ratio: f64,
        title: String,
        tags: Vec<String>,
        fixed: [u8; 3],
        maybe: Option<f32>,
        lookup: BTreeMap<String, i64>,
        extra: Value,
    }

    fn everything() -> Everything {
        let mut lookup = BTreeMap::new();
        lookup.insert("k".to_string(), -4);
        Everything {
            flag: true,
            count: -7,
            big: 1 << 60,
            ratio: 0.25,
            title: "hello \"world\"".into(),
            tags: vec!["x".into(), "y".into()],
            fixed: [9, 8, 7],
            maybe: Some(1.5),
            lookup,
            extra: Value::Array(vec![Value::Num(1.0), Value::Str("s".into())]),
        }
    }

    #[test]
    fn round_trip_structural_equality() {
        let v = everything();
        let encoded = to_string(&v).unwrap();
        let back: Everything = from_str(&encoded).unwrap();
        assert_eq!(back, v);
    }

    #[test]
    fn reencode_is_byte_identical() {
        let v = everything();
        let first = to_string(&v).unwrap();
        let back: Everything = from_str(&first).unwrap();
        let second = to_string(&back).unwrap();
        assert_eq!(first, second);

        let pretty = to_vec_pretty(&v, "", "    ").unwrap();
        let back: Everything = from_slice(&pretty).unwrap();
        assert_eq!(to_vec_pretty(&back, "", "    ").unwrap(), pretty);
    }

    #[test]
    fn compile_once_decode_many() {
        for i in 0..50 {
            let doc = format!(r#"{{"age":{i},"name":"n{i}"}}"#);
            let f: Friend = from_str(&doc).unwrap();
            assert_eq!(f.age, i);
            assert_eq!(f.name, format!("n{i}"));
        }
    }

    #[test]
    fn concurrent_first_compile_is_safe() {
        #[derive(Facet, Debug, PartialEq)]
        struct Raced {
            a: i64,
            b: Vec<String>,
        }
        std::thread::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|| {
                    for _ in 0..20 {
                        let v: Raced = from_str(r#"{"a":1,"b":["x"]}"#).unwrap();
                        assert_eq!(v.a, 1);
                        assert_eq!(to_string(&v).unwrap(), r#"{"a":1,"b":["x"]}"#);
                    }
                });
            }
        });
    }

    #[test]
    fn pooled_contexts_do_not_leak_input() {
        // A big decode followed by small ones: stale buffered bytes from
        // the first call must never bleed into later results.
        let big: Vec<u64> = from_str(&format!(
            "[{}]",
            (0..512).map(|i| i.to_string()).collect::<Vec<_>>().join(",")
        ))
        .unwrap();
        assert_eq!(big.len(), 512);
        for _ in 0..8 {
            let small: u8 = from_str("7").unwrap();
            assert_eq!(small, 7);
        }
    }

    #[test]
    fn trailing_garbage_rejected() {
        let err = from_str::<u32>("1 x").unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::UnexpectedToken { .. }));
    }

    #[test]
    fn eof_inside_token() {
        let err = from_str::<Vec<u8>>("[1,2").unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::UnexpectedEof));
    }

    #[test]
    fn tuple_structs_unsupported() {
        #[derive(Facet, Debug)]
        struct Pair(u8, u8);
        let err = from_str::<Pair>("[1,2]").unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::UnsupportedType(_)));
    }

    // ── Streaming ────────────────────────────────────────────────────

    /// Hands out one preset chunk per read call.
    struct ChunkReader {
        chunks: std::vec::IntoIter<Vec<u8>>,
    }

    fn chunked(parts: &[&str]) -> ChunkReader {
        ChunkReader {
            chunks: parts
                .iter()
                .map(|p| p.as_bytes().to_vec())
                .collect::<Vec<_>>()
                .into_iter(),
        }
    }

    impl Read for ChunkReader {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            match self.chunks.next() {
                Some(chunk) => {
                    buf[..chunk.len()].copy_from_slice(&chunk);
                    Ok(chunk.len())
                }
                None => Ok(0),
            }
        }
    }

    #[test]
    fn refill_reassembles_split_string() {
        let mut dec = Decoder::new(chunked(&[r#""123"#, r#"45""#]));
        let s: String = dec.decode().unwrap();
        assert_eq!(s, "12345");
    }

    #[test]
    fn refill_reassembles_split_tokens() {
        let mut dec = Decoder::new(chunked(&[
            r#"{"age": 1"#,
            r#"7, "na"#,
            r#"me": "spl"#,
            r#"it", "ok": tr"#,
            r#"ue}"#,
        ]));
        #[derive(Facet, Debug, PartialEq)]
        struct Rec {
            age: i64,
            name: String,
            ok: bool,
        }
        let v: Rec = dec.decode().unwrap();
        assert_eq!(
            v,
            Rec {
                age: 17,
                name: "split".into(),
                ok: true
            }
        );
    }

    #[test]
    fn byte_at_a_time_matches_one_shot() {
        let doc = r#"{"label":"root","children":[{"label":"a","children":[]}]}"#;
        let parts: Vec<String> = doc.chars().map(|c| c.to_string()).collect();
        let parts: Vec<&str> = parts.iter().map(|s| s.as_str()).collect();
        let mut dec = Decoder::new(chunked(&parts));
        let streamed: TreeNode = dec.decode().unwrap();
        let oneshot: TreeNode = from_str(doc).unwrap();
        assert_eq!(streamed, oneshot);
    }

    #[test]
    fn sequential_values_from_one_stream() {
        let mut dec = Decoder::new(&b" 1 2 3 "[..]);
        assert_eq!(dec.decode::<i64>().unwrap(), 1);
        assert!(dec.more());
        assert_eq!(dec.decode::<i64>().unwrap(), 2);
        assert_eq!(dec.decode::<i64>().unwrap(), 3);
        assert!(!dec.more());
    }

    #[test]
    fn input_offset_tracks_consumption() {
        let mut dec = Decoder::new(&b"[1,22]"[..]);
        assert_eq!(dec.input_offset(), 0);
        let _: Vec<i64> = dec.decode().unwrap();
        assert_eq!(dec.input_offset(), 6);
    }

    #[test]
    fn buffered_returns_unconsumed_input() {
        let mut dec = Decoder::new(&b"[1] tail"[..]);
        let _: Vec<i64> = dec.decode().unwrap();
        let mut rest = String::new();
        dec.buffered().read_to_string(&mut rest).unwrap();
        assert_eq!(rest, " tail");
    }

    #[test]
    fn token_walk() {
        let mut dec = Decoder::new(&br#"{"a":[1,2],"ok":true,"n":null}"#[..]);
        assert_eq!(dec.token().unwrap(), Token::Delim(b'{'));
        assert_eq!(dec.token().unwrap(), Token::Str("a".into()));
        assert_eq!(dec.token().unwrap(), Token::Delim(b'['));
        assert_eq!(dec.token().unwrap(), Token::Num(1.0));
        assert_eq!(dec.token().unwrap(), Token::Num(2.0));
        assert_eq!(dec.token().unwrap(), Token::Delim(b']'));
        assert_eq!(dec.token().unwrap(), Token::Str("ok".into()));
        assert_eq!(dec.token().unwrap(), Token::Bool(true));
        assert_eq!(dec.token().unwrap(), Token::Str("n".into()));
        assert_eq!(dec.token().unwrap(), Token::Null);
        assert_eq!(dec.token().unwrap(), Token::Delim(b'}'));
    }

    #[test]
    fn token_then_decode_elements() {
        let doc = br#"[{"age":1,"name":"a"},{"age":2,"name":"b"}]"#;
        let mut dec = Decoder::new(&doc[..]);
        assert_eq!(dec.token().unwrap(), Token::Delim(b'['));
        let mut friends = Vec::new();
        while dec.more() {
            friends.push(dec.decode::<Friend>().unwrap());
        }
        assert_eq!(dec.token().unwrap(), Token::Delim(b']'));
        assert_eq!(friends.len(), 2);
        assert_eq!(friends[0].age, 1);
        assert_eq!(friends[1].name, "b");
    }

    #[test]
    fn transport_error_identity_preserved() {
        struct FailReader;
        impl Read for FailReader {
            fn read(&mut self, _: &mut [u8]) -> std::io::Result<usize> {
                Err(std::io::Error::new(
                    std::io::ErrorKind::ConnectionReset,
                    "dropped",
                ))
            }
        }
        let mut dec = Decoder::new(FailReader);
        let err = dec.decode::<u32>().unwrap_err();
        assert_eq!(
            err.io_error().map(|e| e.kind()),
            Some(std::io::ErrorKind::ConnectionReset)
        );
    }
}
