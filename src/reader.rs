//! Decoding: tag grammar → Rust values, with cross-type coercion.
//!
//! Every typed `read_*` method is one row of the coercion matrix: a total
//! match over the value-starting tags, mapping each to the conversion rule
//! for that destination or to a typed error. The reader mirrors the writer's
//! reference-table index assignment exactly; entries are either a byte span
//! (re-decoded on resolution, so a back-reference can coerce to a different
//! destination than the original read) or a materialized [`Value`] node
//! (shared, which is what reconstructs cycles).

use std::any::TypeId;
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;
use std::rc::Rc;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use bytes::Bytes;

use crate::tags::*;
use crate::value::{fmt_f64, str_to_bool, Complex128, Complex64, ObjectValue, Timestamp, Value};
use crate::{Decodable, Record, Registry, Result, WireError};

enum RefEntry {
    /// Byte offset of the referent's tag; resolution re-decodes from here.
    Span(usize),
    /// Materialized node from a dynamic read; resolution clones the handle.
    Node(Value),
}

enum Resolved {
    Span(usize),
    Node(Value),
}

#[derive(Clone)]
struct ClassDef {
    name: String,
    fields: Vec<String>,
}

/// Decodes values from a byte buffer.
///
/// `unserialize` (or the typed `read_*` methods) may be called repeatedly to
/// unpack a stream of values; the reference and class tables persist across
/// calls. In simple mode no reference entries are recorded and any
/// back-reference tag in the input fails.
pub struct Reader {
    data: Bytes,
    pos: usize,
    simple: bool,
    refs: Vec<RefEntry>,
    classes: Vec<ClassDef>,
    registry: Option<Arc<Registry>>,
    /// Offsets of spans currently being re-decoded. Non-empty suppresses
    /// new reference entries so indexes stay aligned with the writer's; a
    /// span re-entering itself is a circular reference that no typed
    /// destination can hold.
    resolving: Vec<usize>,
}

impl Reader {
    pub fn new(data: Bytes, simple: bool) -> Self {
        Self {
            data,
            pos: 0,
            simple,
            refs: Vec::new(),
            classes: Vec::new(),
            registry: None,
            resolving: Vec::new(),
        }
    }

    /// A reader that accepts registered aliases as record class names.
    pub fn with_registry(data: Bytes, simple: bool, registry: Arc<Registry>) -> Self {
        Self {
            registry: Some(registry),
            ..Self::new(data, simple)
        }
    }

    /// Decodes the next value into `T`, applying `T`'s coercion rules.
    pub fn unserialize<T: Decodable>(&mut self) -> Result<T> {
        T::decode(self)
    }

    /// Decodes the next value in place. On error `dest` is left untouched.
    pub fn unserialize_into<T: Decodable>(&mut self, dest: &mut T) -> Result<()> {
        *dest = T::decode(self)?;
        Ok(())
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// Caps a wire-declared element count for preallocation. Every element
    /// occupies at least one input byte, so a count beyond the remaining
    /// input cannot be honest.
    fn alloc_hint(&self, count: usize) -> usize {
        count.min(self.remaining())
    }

    // -- cursor --

    fn peek(&self) -> Result<u8> {
        self.data
            .get(self.pos)
            .copied()
            .ok_or(WireError::InsufficientData)
    }

    fn next_byte(&mut self) -> Result<u8> {
        let b = self.peek()?;
        self.pos += 1;
        Ok(b)
    }

    fn expect_byte(&mut self, want: u8) -> Result<()> {
        let got = self.next_byte()?;
        if got != want {
            return Err(WireError::Format(format!(
                "expected {:?}, found 0x{got:02x}",
                want as char
            )));
        }
        Ok(())
    }

    /// Reads an unsigned decimal length up to the terminator byte. Zero
    /// digits is a valid zero (omitted counts); overflow is a format error.
    fn read_len_until(&mut self, term: u8) -> Result<usize> {
        let mut v: usize = 0;
        loop {
            let b = self.next_byte()?;
            if b == term {
                return Ok(v);
            }
            if !b.is_ascii_digit() {
                return Err(WireError::Format(format!(
                    "expected digit or {:?}, found 0x{b:02x}",
                    term as char
                )));
            }
            v = v
                .checked_mul(10)
                .and_then(|n| n.checked_add((b - b'0') as usize))
                .ok_or_else(|| WireError::Format("length prefix overflows usize".into()))?;
        }
    }

    /// Consumes a signed decimal run and its `';'` terminator, reducing the
    /// digits modulo 2^64. Narrower destinations truncate further with `as`,
    /// giving two's-complement wrapping for any magnitude.
    fn read_int_run(&mut self) -> Result<u64> {
        let mut neg = false;
        match self.peek()? {
            TAG_POS => self.pos += 1,
            TAG_NEG => {
                self.pos += 1;
                neg = true;
            }
            _ => {}
        }
        let mut v: u64 = 0;
        let mut any = false;
        loop {
            let b = self.next_byte()?;
            match b {
                b'0'..=b'9' => {
                    v = v.wrapping_mul(10).wrapping_add((b - b'0') as u64);
                    any = true;
                }
                TAG_SEMICOLON => break,
                _ => {
                    return Err(WireError::Format(format!(
                        "expected digit or ';', found 0x{b:02x}"
                    )))
                }
            }
        }
        if !any {
            return Err(WireError::Format("empty integer literal".into()));
        }
        Ok(if neg { v.wrapping_neg() } else { v })
    }

    /// The raw text of a decimal run, sign included, for destinations that
    /// keep full precision (floats, strings).
    fn read_run_text(&mut self) -> Result<String> {
        let start = self.pos;
        while self.peek()? != TAG_SEMICOLON {
            self.pos += 1;
        }
        let s = std::str::from_utf8(&self.data[start..self.pos])
            .map_err(|_| WireError::Format("non-ascii byte in integer literal".into()))?
            .to_string();
        self.pos += 1;
        Ok(s)
    }

    fn read_f64_payload(&mut self) -> Result<f64> {
        if self.remaining() < 8 {
            return Err(WireError::InsufficientData);
        }
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&self.data[self.pos..self.pos + 8]);
        self.pos += 8;
        Ok(f64::from_be_bytes(raw))
    }

    fn read_infinity(&mut self) -> Result<f64> {
        match self.next_byte()? {
            TAG_POS => Ok(f64::INFINITY),
            TAG_NEG => Ok(f64::NEG_INFINITY),
            b => Err(WireError::Format(format!(
                "expected infinity sign, found 0x{b:02x}"
            ))),
        }
    }

    /// Consumes UTF-8 text whose length is given in UTF-16 code units
    /// (astral scalars count as two).
    fn read_utf8_by_units(&mut self, units: usize) -> Result<String> {
        let start = self.pos;
        let mut remaining = units;
        while remaining > 0 {
            let lead = *self.data.get(self.pos).ok_or(WireError::InsufficientData)?;
            let width = utf8_width(lead)?;
            if self.pos + width > self.data.len() {
                return Err(WireError::InsufficientData);
            }
            let cost = if width == 4 { 2 } else { 1 };
            if cost > remaining {
                return Err(WireError::Format(
                    "string length prefix does not cover a whole scalar".into(),
                ));
            }
            self.pos += width;
            remaining -= cost;
        }
        let s = std::str::from_utf8(&self.data[start..self.pos])
            .map_err(|_| WireError::Format("invalid utf-8 in string payload".into()))?;
        Ok(s.to_string())
    }

    /// Quoted string payload after its tag: unit count, quote, text, quote.
    fn read_raw_string(&mut self) -> Result<String> {
        let units = self.read_len_until(TAG_QUOTE)?;
        let s = self.read_utf8_by_units(units)?;
        self.expect_byte(TAG_QUOTE)?;
        Ok(s)
    }

    fn read_bytes_payload(&mut self) -> Result<Vec<u8>> {
        let len = self.read_len_until(TAG_QUOTE)?;
        // Payload plus closing quote; `<=` keeps huge prefixes from
        // overflowing the arithmetic.
        if self.remaining() <= len {
            return Err(WireError::InsufficientData);
        }
        let out = self.data[self.pos..self.pos + len].to_vec();
        self.pos += len;
        self.expect_byte(TAG_QUOTE)?;
        Ok(out)
    }

    fn read_char_payload(&mut self) -> Result<char> {
        let lead = self.peek()?;
        let width = utf8_width(lead)?;
        if self.pos + width > self.data.len() {
            return Err(WireError::InsufficientData);
        }
        let s = std::str::from_utf8(&self.data[self.pos..self.pos + width])
            .map_err(|_| WireError::Format("invalid utf-8 in char payload".into()))?;
        let c = s
            .chars()
            .next()
            .ok_or_else(|| WireError::Format("empty char payload".into()))?;
        self.pos += width;
        Ok(c)
    }

    /// Seconds and nanoseconds runs shared by the timestamp and duration
    /// payloads.
    fn read_clock_parts(&mut self) -> Result<(i64, u32)> {
        let secs = self.read_int_run()? as i64;
        let nanos = self.read_len_until(TAG_SEMICOLON)?;
        if nanos >= 1_000_000_000 {
            return Err(WireError::Format("nanosecond part out of range".into()));
        }
        Ok((secs, nanos as u32))
    }

    // -- reference and class tables --

    fn register_span(&mut self, tag_pos: usize) {
        if !self.simple && self.resolving.is_empty() {
            self.refs.push(RefEntry::Span(tag_pos));
        }
    }

    fn register_node(&mut self, v: Value) {
        if !self.simple && self.resolving.is_empty() {
            self.refs.push(RefEntry::Node(v));
        }
    }

    fn resolved(&self, index: usize) -> Result<Resolved> {
        match self.refs.get(index) {
            Some(RefEntry::Span(off)) => Ok(Resolved::Span(*off)),
            Some(RefEntry::Node(v)) => Ok(Resolved::Node(v.clone())),
            None => Err(WireError::InvalidRef(index)),
        }
    }

    /// Runs `f` with the cursor moved to a referenced span, restoring it
    /// afterwards. Registration is suppressed for the duration so the
    /// re-decode does not shift subsequent indexes. A span that refers back
    /// to itself, directly or through other spans, is reported instead of
    /// recursing without bound.
    fn with_span<T>(&mut self, off: usize, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        if self.resolving.contains(&off) {
            return Err(WireError::Format(
                "circular reference cannot resolve into this destination".into(),
            ));
        }
        self.resolving.push(off);
        let saved_pos = std::mem::replace(&mut self.pos, off);
        let out = f(self);
        self.pos = saved_pos;
        self.resolving.pop();
        out
    }

    fn read_class_def(&mut self) -> Result<()> {
        let name = self.read_raw_string()?;
        let count = self.read_len_until(TAG_OPEN)?;
        let mut fields = Vec::with_capacity(self.alloc_hint(count));
        for _ in 0..count {
            fields.push(self.read_raw_string()?);
        }
        self.expect_byte(TAG_CLOSE)?;
        self.classes.push(ClassDef { name, fields });
        Ok(())
    }

    fn no_conversion(&self, tag: u8, to: &'static str) -> WireError {
        if is_known(tag) {
            WireError::TypeConversion {
                from: type_name(tag).to_string(),
                to,
            }
        } else {
            WireError::Format(format!("unexpected byte 0x{tag:02x} in stream"))
        }
    }

    // -- typed reads (coercion matrix rows) --

    pub fn read_bool(&mut self) -> Result<bool> {
        let tag = self.next_byte()?;
        match tag {
            TAG_TRUE => Ok(true),
            TAG_FALSE | TAG_NULL | TAG_EMPTY => Ok(false),
            b'0'..=b'9' => Ok(tag != b'0'),
            TAG_INTEGER | TAG_LONG => Ok(self.read_int_run()? != 0),
            TAG_DOUBLE => Ok(self.read_f64_payload()? != 0.0),
            TAG_NAN => Ok(true),
            TAG_INFINITY => {
                self.read_infinity()?;
                Ok(true)
            }
            TAG_UTF8_CHAR => Ok(str_to_bool(&self.read_char_payload()?.to_string())),
            TAG_STRING => {
                self.register_span(self.pos - 1);
                let s = self.read_raw_string()?;
                Ok(str_to_bool(&s))
            }
            TAG_REF => {
                let idx = self.read_len_until(TAG_SEMICOLON)?;
                match self.resolved(idx)? {
                    Resolved::Span(off) => self.with_span(off, Reader::read_bool),
                    Resolved::Node(v) => v.to_bool(),
                }
            }
            _ => Err(self.no_conversion(tag, "bool")),
        }
    }

    pub fn read_i64(&mut self) -> Result<i64> {
        let tag = self.next_byte()?;
        match tag {
            b'0'..=b'9' => Ok((tag - b'0') as i64),
            TAG_INTEGER | TAG_LONG => Ok(self.read_int_run()? as i64),
            TAG_DOUBLE => Ok(self.read_f64_payload()? as i64),
            TAG_NULL | TAG_EMPTY | TAG_FALSE => Ok(0),
            TAG_TRUE => Ok(1),
            TAG_UTF8_CHAR => parse_num(&self.read_char_payload()?.to_string(), "int64"),
            TAG_STRING => {
                self.register_span(self.pos - 1);
                let s = self.read_raw_string()?;
                parse_num(&s, "int64")
            }
            TAG_TIMESTAMP => {
                let (secs, nanos) = self.read_clock_parts()?;
                Ok(Timestamp::new(secs, nanos).total_nanos())
            }
            TAG_DURATION => {
                let (secs, nanos) = self.read_clock_parts()?;
                Ok(Timestamp::new(secs, nanos).total_nanos())
            }
            TAG_REF => {
                let idx = self.read_len_until(TAG_SEMICOLON)?;
                match self.resolved(idx)? {
                    Resolved::Span(off) => self.with_span(off, Reader::read_i64),
                    Resolved::Node(v) => v.to_i64(),
                }
            }
            _ => Err(self.no_conversion(tag, "int64")),
        }
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        let tag = self.next_byte()?;
        match tag {
            b'0'..=b'9' => Ok((tag - b'0') as u64),
            TAG_INTEGER | TAG_LONG => Ok(self.read_int_run()?),
            TAG_DOUBLE => Ok(self.read_f64_payload()? as u64),
            TAG_NULL | TAG_EMPTY | TAG_FALSE => Ok(0),
            TAG_TRUE => Ok(1),
            TAG_UTF8_CHAR => parse_num(&self.read_char_payload()?.to_string(), "uint64"),
            TAG_STRING => {
                self.register_span(self.pos - 1);
                let s = self.read_raw_string()?;
                parse_num(&s, "uint64")
            }
            TAG_TIMESTAMP | TAG_DURATION => {
                let (secs, nanos) = self.read_clock_parts()?;
                Ok(Timestamp::new(secs, nanos).total_nanos() as u64)
            }
            TAG_REF => {
                let idx = self.read_len_until(TAG_SEMICOLON)?;
                match self.resolved(idx)? {
                    Resolved::Span(off) => self.with_span(off, Reader::read_u64),
                    Resolved::Node(v) => v.to_u64(),
                }
            }
            _ => Err(self.no_conversion(tag, "uint64")),
        }
    }

    pub fn read_f64(&mut self) -> Result<f64> {
        let tag = self.next_byte()?;
        match tag {
            b'0'..=b'9' => Ok((tag - b'0') as f64),
            TAG_INTEGER | TAG_LONG => {
                // Full-precision text parse; runs wider than 64 bits round
                // instead of wrapping.
                let s = self.read_run_text()?;
                parse_num(&s, "float64")
            }
            TAG_DOUBLE => self.read_f64_payload(),
            TAG_NAN => Ok(f64::NAN),
            TAG_INFINITY => self.read_infinity(),
            TAG_NULL | TAG_EMPTY | TAG_FALSE => Ok(0.0),
            TAG_TRUE => Ok(1.0),
            TAG_UTF8_CHAR => parse_num(&self.read_char_payload()?.to_string(), "float64"),
            TAG_STRING => {
                self.register_span(self.pos - 1);
                let s = self.read_raw_string()?;
                parse_num(&s, "float64")
            }
            TAG_TIMESTAMP | TAG_DURATION => {
                let (secs, nanos) = self.read_clock_parts()?;
                Ok(Timestamp::new(secs, nanos).as_secs_f64())
            }
            TAG_REF => {
                let idx = self.read_len_until(TAG_SEMICOLON)?;
                match self.resolved(idx)? {
                    Resolved::Span(off) => self.with_span(off, Reader::read_f64),
                    Resolved::Node(v) => v.to_f64(),
                }
            }
            _ => Err(self.no_conversion(tag, "float64")),
        }
    }

    /// Text payloads parse at f32 precision directly rather than rounding
    /// through f64 twice.
    pub fn read_f32(&mut self) -> Result<f32> {
        let start = self.pos;
        match self.peek()? {
            TAG_UTF8_CHAR => {
                self.pos += 1;
                parse_num(&self.read_char_payload()?.to_string(), "float32")
            }
            TAG_STRING => {
                self.pos += 1;
                self.register_span(start);
                let s = self.read_raw_string()?;
                parse_num(&s, "float32")
            }
            TAG_REF => {
                self.pos += 1;
                let idx = self.read_len_until(TAG_SEMICOLON)?;
                match self.resolved(idx)? {
                    Resolved::Span(off) => self.with_span(off, Reader::read_f32),
                    Resolved::Node(v) => v.to_f32(),
                }
            }
            _ => Ok(self.read_f64()? as f32),
        }
    }

    pub fn read_string(&mut self) -> Result<String> {
        let tag = self.next_byte()?;
        match tag {
            TAG_NULL | TAG_EMPTY => Ok(String::new()),
            TAG_TRUE => Ok("true".to_string()),
            TAG_FALSE => Ok("false".to_string()),
            b'0'..=b'9' => Ok((tag as char).to_string()),
            TAG_INTEGER | TAG_LONG => self.read_run_text(),
            TAG_DOUBLE => Ok(fmt_f64(self.read_f64_payload()?)),
            TAG_NAN => Ok("NaN".to_string()),
            TAG_INFINITY => Ok(fmt_f64(self.read_infinity()?)),
            TAG_UTF8_CHAR => Ok(self.read_char_payload()?.to_string()),
            TAG_STRING => {
                self.register_span(self.pos - 1);
                self.read_raw_string()
            }
            TAG_BYTES => {
                self.register_span(self.pos - 1);
                let raw = self.read_bytes_payload()?;
                String::from_utf8(raw)
                    .map_err(|_| WireError::Format("bytes payload is not valid utf-8".into()))
            }
            TAG_REF => {
                let idx = self.read_len_until(TAG_SEMICOLON)?;
                match self.resolved(idx)? {
                    Resolved::Span(off) => self.with_span(off, Reader::read_string),
                    Resolved::Node(v) => v.to_text(),
                }
            }
            _ => Err(self.no_conversion(tag, "string")),
        }
    }

    pub fn read_bytes(&mut self) -> Result<Vec<u8>> {
        let start = self.pos;
        let tag = self.next_byte()?;
        match tag {
            TAG_NULL | TAG_EMPTY => Ok(Vec::new()),
            TAG_BYTES => {
                self.register_span(start);
                self.read_bytes_payload()
            }
            TAG_STRING => {
                self.register_span(start);
                Ok(self.read_raw_string()?.into_bytes())
            }
            TAG_LIST => {
                self.register_span(start);
                let count = self.read_len_until(TAG_OPEN)?;
                let mut out = Vec::with_capacity(self.alloc_hint(count));
                for _ in 0..count {
                    out.push(self.read_u64()? as u8);
                }
                self.expect_byte(TAG_CLOSE)?;
                Ok(out)
            }
            TAG_REF => {
                let idx = self.read_len_until(TAG_SEMICOLON)?;
                match self.resolved(idx)? {
                    Resolved::Span(off) => self.with_span(off, Reader::read_bytes),
                    Resolved::Node(v) => match v {
                        Value::Bytes(b) => Ok(b.to_vec()),
                        Value::Str(s) => Ok(s.as_bytes().to_vec()),
                        other => Err(WireError::TypeConversion {
                            from: other.type_name().to_string(),
                            to: "bytes",
                        }),
                    },
                }
            }
            _ => Err(self.no_conversion(tag, "bytes")),
        }
    }

    pub fn read_complex64(&mut self) -> Result<Complex64> {
        let start = self.pos;
        let tag = self.next_byte()?;
        match tag {
            b'0'..=b'9' => Ok(Complex64::new((tag - b'0') as f32, 0.0)),
            TAG_INTEGER | TAG_LONG => Ok(Complex64::new((self.read_int_run()? as i64) as f32, 0.0)),
            TAG_DOUBLE => Ok(Complex64::new(self.read_f64_payload()? as f32, 0.0)),
            TAG_NAN => Ok(Complex64::new(f32::NAN, 0.0)),
            TAG_INFINITY => Ok(Complex64::new(self.read_infinity()? as f32, 0.0)),
            TAG_NULL | TAG_EMPTY | TAG_FALSE => Ok(Complex64::default()),
            TAG_TRUE => Ok(Complex64::new(1.0, 0.0)),
            TAG_LIST => {
                self.register_span(start);
                let count = self.read_len_until(TAG_OPEN)?;
                if count != 2 {
                    return Err(WireError::TypeConversion {
                        from: format!("{count}-element list"),
                        to: "complex64",
                    });
                }
                let re = self.read_f32()?;
                let im = self.read_f32()?;
                self.expect_byte(TAG_CLOSE)?;
                Ok(Complex64::new(re, im))
            }
            TAG_REF => {
                let idx = self.read_len_until(TAG_SEMICOLON)?;
                match self.resolved(idx)? {
                    Resolved::Span(off) => self.with_span(off, Reader::read_complex64),
                    Resolved::Node(v) => v.to_complex64(),
                }
            }
            _ => Err(self.no_conversion(tag, "complex64")),
        }
    }

    pub fn read_complex128(&mut self) -> Result<Complex128> {
        let start = self.pos;
        let tag = self.next_byte()?;
        match tag {
            b'0'..=b'9' => Ok(Complex128::new((tag - b'0') as f64, 0.0)),
            TAG_INTEGER | TAG_LONG => {
                let s = self.read_run_text()?;
                Ok(Complex128::new(parse_num(&s, "float64")?, 0.0))
            }
            TAG_DOUBLE => Ok(Complex128::new(self.read_f64_payload()?, 0.0)),
            TAG_NAN => Ok(Complex128::new(f64::NAN, 0.0)),
            TAG_INFINITY => Ok(Complex128::new(self.read_infinity()?, 0.0)),
            TAG_NULL | TAG_EMPTY | TAG_FALSE => Ok(Complex128::default()),
            TAG_TRUE => Ok(Complex128::new(1.0, 0.0)),
            TAG_LIST => {
                self.register_span(start);
                let count = self.read_len_until(TAG_OPEN)?;
                if count != 2 {
                    return Err(WireError::TypeConversion {
                        from: format!("{count}-element list"),
                        to: "complex128",
                    });
                }
                let re = self.read_f64()?;
                let im = self.read_f64()?;
                self.expect_byte(TAG_CLOSE)?;
                Ok(Complex128::new(re, im))
            }
            TAG_REF => {
                let idx = self.read_len_until(TAG_SEMICOLON)?;
                match self.resolved(idx)? {
                    Resolved::Span(off) => self.with_span(off, Reader::read_complex128),
                    Resolved::Node(v) => v.to_complex128(),
                }
            }
            _ => Err(self.no_conversion(tag, "complex128")),
        }
    }

    pub fn read_timestamp(&mut self) -> Result<Timestamp> {
        let tag = self.next_byte()?;
        match tag {
            TAG_NULL => Ok(Timestamp::default()),
            TAG_TIMESTAMP | TAG_DURATION => {
                let (secs, nanos) = self.read_clock_parts()?;
                Ok(Timestamp::new(secs, nanos))
            }
            TAG_REF => {
                let idx = self.read_len_until(TAG_SEMICOLON)?;
                match self.resolved(idx)? {
                    Resolved::Span(off) => self.with_span(off, Reader::read_timestamp),
                    Resolved::Node(Value::Time(t)) => Ok(t),
                    Resolved::Node(v) => Err(WireError::TypeConversion {
                        from: v.type_name().to_string(),
                        to: "timestamp",
                    }),
                }
            }
            _ => Err(self.no_conversion(tag, "timestamp")),
        }
    }

    pub fn read_duration(&mut self) -> Result<Duration> {
        let tag = self.next_byte()?;
        match tag {
            TAG_NULL => Ok(Duration::ZERO),
            b'0'..=b'9' => Ok(Duration::from_nanos((tag - b'0') as u64)),
            TAG_INTEGER | TAG_LONG => {
                let v = self.read_int_run()? as i64;
                if v < 0 {
                    return Err(WireError::Format("negative duration".into()));
                }
                Ok(Duration::from_nanos(v as u64))
            }
            TAG_DURATION | TAG_TIMESTAMP => {
                let (secs, nanos) = self.read_clock_parts()?;
                if secs < 0 {
                    return Err(WireError::Format("negative duration".into()));
                }
                Ok(Duration::new(secs as u64, nanos))
            }
            TAG_REF => {
                let idx = self.read_len_until(TAG_SEMICOLON)?;
                match self.resolved(idx)? {
                    Resolved::Span(off) => self.with_span(off, Reader::read_duration),
                    Resolved::Node(Value::Elapsed(d)) => Ok(d),
                    Resolved::Node(v) => Err(WireError::TypeConversion {
                        from: v.type_name().to_string(),
                        to: "duration",
                    }),
                }
            }
            _ => Err(self.no_conversion(tag, "duration")),
        }
    }

    // -- dynamic reads --

    /// Decodes the next value into a [`Value`] graph. Containers are
    /// registered before their members, so back-references inside a
    /// container can resolve to the container itself and reproduce the
    /// original cycle.
    pub fn read_value(&mut self) -> Result<Value> {
        let tag = self.next_byte()?;
        match tag {
            b'0'..=b'9' => Ok(Value::Int((tag - b'0') as i64)),
            TAG_INTEGER | TAG_LONG => Ok(Value::Int(self.read_int_run()? as i64)),
            TAG_DOUBLE => Ok(Value::Double(self.read_f64_payload()?)),
            TAG_NAN => Ok(Value::Double(f64::NAN)),
            TAG_INFINITY => Ok(Value::Double(self.read_infinity()?)),
            TAG_NULL => Ok(Value::Null),
            TAG_EMPTY => Ok(Value::string("")),
            TAG_TRUE => Ok(Value::Bool(true)),
            TAG_FALSE => Ok(Value::Bool(false)),
            TAG_UTF8_CHAR => Ok(Value::string(self.read_char_payload()?.to_string())),
            TAG_STRING => {
                let s = self.read_raw_string()?;
                let v = Value::string(&s);
                self.register_node(v.clone());
                Ok(v)
            }
            TAG_BYTES => {
                let raw = self.read_bytes_payload()?;
                let v = Value::Bytes(Rc::from(raw.as_slice()));
                self.register_node(v.clone());
                Ok(v)
            }
            TAG_LIST => {
                let count = self.read_len_until(TAG_OPEN)?;
                let node = Rc::new(RefCell::new(Vec::with_capacity(self.alloc_hint(count))));
                self.register_node(Value::List(node.clone()));
                for _ in 0..count {
                    let item = self.read_value()?;
                    node.borrow_mut().push(item);
                }
                self.expect_byte(TAG_CLOSE)?;
                Ok(Value::List(node))
            }
            TAG_MAP => {
                let count = self.read_len_until(TAG_OPEN)?;
                let node = Rc::new(RefCell::new(Vec::with_capacity(self.alloc_hint(count))));
                self.register_node(Value::Map(node.clone()));
                for _ in 0..count {
                    let k = self.read_value()?;
                    let v = self.read_value()?;
                    node.borrow_mut().push((k, v));
                }
                self.expect_byte(TAG_CLOSE)?;
                Ok(Value::Map(node))
            }
            TAG_CLASS => {
                self.read_class_def()?;
                self.read_value()
            }
            TAG_OBJECT => {
                let idx = self.read_len_until(TAG_OPEN)?;
                let class = self
                    .classes
                    .get(idx)
                    .cloned()
                    .ok_or(WireError::UnknownClass(idx))?;
                let node = Rc::new(RefCell::new(ObjectValue {
                    class: class.name,
                    fields: Vec::with_capacity(class.fields.len()),
                }));
                self.register_node(Value::Object(node.clone()));
                for name in class.fields {
                    let v = self.read_value()?;
                    node.borrow_mut().fields.push((name, v));
                }
                self.expect_byte(TAG_CLOSE)?;
                Ok(Value::Object(node))
            }
            TAG_TIMESTAMP => {
                let (secs, nanos) = self.read_clock_parts()?;
                Ok(Value::Time(Timestamp::new(secs, nanos)))
            }
            TAG_DURATION => {
                let (secs, nanos) = self.read_clock_parts()?;
                if secs < 0 {
                    return Err(WireError::Format("negative duration".into()));
                }
                Ok(Value::Elapsed(Duration::new(secs as u64, nanos)))
            }
            TAG_REF => {
                let idx = self.read_len_until(TAG_SEMICOLON)?;
                match self.resolved(idx)? {
                    Resolved::Span(off) => self.with_span(off, Reader::read_value),
                    Resolved::Node(v) => Ok(v),
                }
            }
            _ => Err(WireError::Format(format!(
                "unexpected byte 0x{tag:02x} in stream"
            ))),
        }
    }

    // -- records --

    /// Decodes a class/field-tagged object into a record type. Leading class
    /// definitions are absorbed; wire fields with no counterpart in `T` are
    /// decoded and discarded, keeping the reference table aligned.
    pub fn read_record<T: Record + 'static>(&mut self) -> Result<T> {
        loop {
            let start = self.pos;
            let tag = self.next_byte()?;
            match tag {
                TAG_CLASS => self.read_class_def()?,
                TAG_NULL => return Ok(T::default()),
                TAG_OBJECT => {
                    self.register_span(start);
                    let idx = self.read_len_until(TAG_OPEN)?;
                    let class = self
                        .classes
                        .get(idx)
                        .cloned()
                        .ok_or(WireError::UnknownClass(idx))?;
                    let accepted = class.name == T::class_name()
                        || self
                            .registry
                            .as_ref()
                            .map_or(false, |r| r.accepts::<T>(&class.name));
                    if !accepted {
                        return Err(WireError::ClassMismatch {
                            wire: class.name,
                            expected: T::class_name(),
                        });
                    }
                    let mut out = T::default();
                    for wire_name in &class.fields {
                        match T::field_names().iter().position(|n| *n == wire_name.as_str()) {
                            Some(fi) => out.decode_field(fi, self)?,
                            None => {
                                self.read_value()?;
                            }
                        }
                    }
                    self.expect_byte(TAG_CLOSE)?;
                    return Ok(out);
                }
                TAG_REF => {
                    let idx = self.read_len_until(TAG_SEMICOLON)?;
                    return match self.resolved(idx)? {
                        Resolved::Span(off) => self.with_span(off, Reader::read_record),
                        Resolved::Node(v) => Err(WireError::TypeConversion {
                            from: v.type_name().to_string(),
                            to: T::class_name(),
                        }),
                    };
                }
                _ => return Err(self.no_conversion(tag, T::class_name())),
            }
        }
    }
}

fn utf8_width(lead: u8) -> Result<usize> {
    match lead {
        0x00..=0x7f => Ok(1),
        0xc0..=0xdf => Ok(2),
        0xe0..=0xef => Ok(3),
        0xf0..=0xf7 => Ok(4),
        _ => Err(WireError::Format(format!(
            "invalid utf-8 lead byte 0x{lead:02x}"
        ))),
    }
}

fn parse_num<T: std::str::FromStr>(s: &str, target: &'static str) -> Result<T> {
    s.parse().map_err(|_| WireError::Parse {
        text: s.to_string(),
        target,
    })
}

// -- Decodable implementations --

impl Decodable for bool {
    fn decode(r: &mut Reader) -> Result<Self> {
        r.read_bool()
    }
}

macro_rules! impl_decode_int {
    ($($t:ty),+) => {$(
        impl Decodable for $t {
            fn decode(r: &mut Reader) -> Result<Self> {
                Ok(r.read_i64()? as $t)
            }
        }
    )+};
}

impl_decode_int!(i8, i16, i32, i64, isize);

macro_rules! impl_decode_uint {
    ($($t:ty),+) => {$(
        impl Decodable for $t {
            fn decode(r: &mut Reader) -> Result<Self> {
                Ok(r.read_u64()? as $t)
            }
        }
    )+};
}

impl_decode_uint!(u8, u16, u32, u64, usize);

impl Decodable for f32 {
    fn decode(r: &mut Reader) -> Result<Self> {
        r.read_f32()
    }
}

impl Decodable for f64 {
    fn decode(r: &mut Reader) -> Result<Self> {
        r.read_f64()
    }
}

impl Decodable for char {
    fn decode(r: &mut Reader) -> Result<Self> {
        let s = r.read_string()?;
        let mut chars = s.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => Ok(c),
            _ => Err(WireError::TypeConversion {
                from: "string".to_string(),
                to: "char",
            }),
        }
    }
}

impl Decodable for String {
    fn decode(r: &mut Reader) -> Result<Self> {
        r.read_string()
    }
}

impl Decodable for Complex64 {
    fn decode(r: &mut Reader) -> Result<Self> {
        r.read_complex64()
    }
}

impl Decodable for Complex128 {
    fn decode(r: &mut Reader) -> Result<Self> {
        r.read_complex128()
    }
}

impl Decodable for Timestamp {
    fn decode(r: &mut Reader) -> Result<Self> {
        r.read_timestamp()
    }
}

impl Decodable for SystemTime {
    fn decode(r: &mut Reader) -> Result<Self> {
        Ok(r.read_timestamp()?.to_system_time())
    }
}

impl Decodable for Duration {
    fn decode(r: &mut Reader) -> Result<Self> {
        r.read_duration()
    }
}

impl Decodable for Value {
    fn decode(r: &mut Reader) -> Result<Self> {
        r.read_value()
    }
}

impl<T: Decodable> Decodable for Option<T> {
    fn decode(r: &mut Reader) -> Result<Self> {
        if r.peek()? == TAG_NULL {
            r.pos += 1;
            return Ok(None);
        }
        T::decode(r).map(Some)
    }
}

impl<T: Decodable> Decodable for Box<T> {
    fn decode(r: &mut Reader) -> Result<Self> {
        T::decode(r).map(Box::new)
    }
}

impl<T: Decodable + 'static> Decodable for Vec<T> {
    fn decode(r: &mut Reader) -> Result<Self> {
        let start = r.pos;
        let tag = r.next_byte()?;
        match tag {
            TAG_NULL | TAG_EMPTY => Ok(Vec::new()),
            TAG_BYTES => {
                if TypeId::of::<T>() != TypeId::of::<u8>() {
                    return Err(WireError::TypeConversion {
                        from: "bytes".to_string(),
                        to: "list",
                    });
                }
                r.register_span(start);
                let raw = r.read_bytes_payload()?;
                let mut raw = std::mem::ManuallyDrop::new(raw);
                // Safety: T is u8, checked above; the layouts are identical.
                Ok(unsafe {
                    Vec::from_raw_parts(raw.as_mut_ptr() as *mut T, raw.len(), raw.capacity())
                })
            }
            TAG_LIST => {
                r.register_span(start);
                let count = r.read_len_until(TAG_OPEN)?;
                let mut out = Vec::with_capacity(r.alloc_hint(count));
                for _ in 0..count {
                    out.push(T::decode(r)?);
                }
                r.expect_byte(TAG_CLOSE)?;
                Ok(out)
            }
            TAG_REF => {
                let idx = r.read_len_until(TAG_SEMICOLON)?;
                match r.resolved(idx)? {
                    Resolved::Span(off) => r.with_span(off, Self::decode),
                    Resolved::Node(v) => Err(WireError::TypeConversion {
                        from: v.type_name().to_string(),
                        to: "list",
                    }),
                }
            }
            _ => Err(r.no_conversion(tag, "list")),
        }
    }
}

impl<T: Decodable + Default + 'static, const N: usize> Decodable for [T; N] {
    fn decode(r: &mut Reader) -> Result<Self> {
        let start = r.pos;
        let tag = r.next_byte()?;
        match tag {
            TAG_NULL | TAG_EMPTY => Ok(std::array::from_fn(|_| T::default())),
            TAG_BYTES => {
                if TypeId::of::<T>() != TypeId::of::<u8>() {
                    return Err(WireError::TypeConversion {
                        from: "bytes".to_string(),
                        to: "array",
                    });
                }
                r.register_span(start);
                let raw = r.read_bytes_payload()?;
                let mut out: [T; N] = std::array::from_fn(|_| T::default());
                let n = raw.len().min(N);
                // Safety: T is u8, checked above.
                unsafe {
                    std::ptr::copy_nonoverlapping(raw.as_ptr(), out.as_mut_ptr() as *mut u8, n)
                };
                Ok(out)
            }
            TAG_LIST => {
                r.register_span(start);
                let count = r.read_len_until(TAG_OPEN)?;
                let mut out: [T; N] = std::array::from_fn(|_| T::default());
                for i in 0..count {
                    if i < N {
                        out[i] = T::decode(r)?;
                    } else {
                        // Surplus elements are consumed and dropped so the
                        // cursor and reference table stay consistent.
                        r.read_value()?;
                    }
                }
                r.expect_byte(TAG_CLOSE)?;
                Ok(out)
            }
            TAG_REF => {
                let idx = r.read_len_until(TAG_SEMICOLON)?;
                match r.resolved(idx)? {
                    Resolved::Span(off) => r.with_span(off, Self::decode),
                    Resolved::Node(v) => Err(WireError::TypeConversion {
                        from: v.type_name().to_string(),
                        to: "array",
                    }),
                }
            }
            _ => Err(r.no_conversion(tag, "array")),
        }
    }
}

impl<K: Decodable + Eq + Hash, V: Decodable> Decodable for HashMap<K, V> {
    fn decode(r: &mut Reader) -> Result<Self> {
        let start = r.pos;
        let tag = r.next_byte()?;
        match tag {
            TAG_NULL | TAG_EMPTY => Ok(HashMap::new()),
            TAG_MAP => {
                r.register_span(start);
                let count = r.read_len_until(TAG_OPEN)?;
                let mut out = HashMap::with_capacity(r.alloc_hint(count));
                for _ in 0..count {
                    let k = K::decode(r)?;
                    let v = V::decode(r)?;
                    out.insert(k, v);
                }
                r.expect_byte(TAG_CLOSE)?;
                Ok(out)
            }
            TAG_REF => {
                let idx = r.read_len_until(TAG_SEMICOLON)?;
                match r.resolved(idx)? {
                    Resolved::Span(off) => r.with_span(off, Self::decode),
                    Resolved::Node(v) => Err(WireError::TypeConversion {
                        from: v.type_name().to_string(),
                        to: "map",
                    }),
                }
            }
            _ => Err(r.no_conversion(tag, "map")),
        }
    }
}

impl<K: Decodable + Ord, V: Decodable> Decodable for BTreeMap<K, V> {
    fn decode(r: &mut Reader) -> Result<Self> {
        let start = r.pos;
        let tag = r.next_byte()?;
        match tag {
            TAG_NULL | TAG_EMPTY => Ok(BTreeMap::new()),
            TAG_MAP => {
                r.register_span(start);
                let count = r.read_len_until(TAG_OPEN)?;
                let mut out = BTreeMap::new();
                for _ in 0..count {
                    let k = K::decode(r)?;
                    let v = V::decode(r)?;
                    out.insert(k, v);
                }
                r.expect_byte(TAG_CLOSE)?;
                Ok(out)
            }
            TAG_REF => {
                let idx = r.read_len_until(TAG_SEMICOLON)?;
                match r.resolved(idx)? {
                    Resolved::Span(off) => r.with_span(off, Self::decode),
                    Resolved::Node(v) => Err(WireError::TypeConversion {
                        from: v.type_name().to_string(),
                        to: "map",
                    }),
                }
            }
            _ => Err(r.no_conversion(tag, "map")),
        }
    }
}

macro_rules! impl_tuple_decode {
    ($len:expr; $($T:ident),+) => {
        impl<$($T: Decodable),+> Decodable for ($($T,)+) {
            fn decode(r: &mut Reader) -> Result<Self> {
                let start = r.pos;
                let tag = r.next_byte()?;
                match tag {
                    TAG_LIST => {
                        r.register_span(start);
                        let count = r.read_len_until(TAG_OPEN)?;
                        if count != $len {
                            return Err(WireError::TypeConversion {
                                from: format!("{count}-element list"),
                                to: "tuple",
                            });
                        }
                        let out = ($( $T::decode(r)?, )+);
                        r.expect_byte(TAG_CLOSE)?;
                        Ok(out)
                    }
                    TAG_REF => {
                        let idx = r.read_len_until(TAG_SEMICOLON)?;
                        match r.resolved(idx)? {
                            Resolved::Span(off) => r.with_span(off, Self::decode),
                            Resolved::Node(v) => Err(WireError::TypeConversion {
                                from: v.type_name().to_string(),
                                to: "tuple",
                            }),
                        }
                    }
                    _ => Err(r.no_conversion(tag, "tuple")),
                }
            }
        }
    };
}

impl_tuple_decode!(1; T0);
impl_tuple_decode!(2; T0, T1);
impl_tuple_decode!(3; T0, T1, T2);
impl_tuple_decode!(4; T0, T1, T2, T3);
impl_tuple_decode!(5; T0, T1, T2, T3, T4);
impl_tuple_decode!(6; T0, T1, T2, T3, T4, T5);
impl_tuple_decode!(7; T0, T1, T2, T3, T4, T5, T6);
impl_tuple_decode!(8; T0, T1, T2, T3, T4, T5, T6, T7);
