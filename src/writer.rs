//! Encoding: Rust values → tag grammar.
//!
//! The [`Writer`] owns the output buffer and the encode-side reference
//! table. Serializing a reference-eligible compound value first consults the
//! table: on a hit only a back-reference tag is emitted, otherwise the value
//! is assigned the next index *before* its members are written, which is
//! what lets a cyclic graph terminate. Strings are deduplicated by content,
//! containers by identity.

use std::any::TypeId;
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use bytes::{BufMut, Bytes, BytesMut};

use crate::tags::*;
use crate::value::{Complex128, Complex64, Timestamp, Value};
use crate::{Encodable, Record, Registry, Result};

/// Serializes values into an internal byte buffer.
///
/// `serialize` may be called repeatedly to pack multiple values into one
/// stream; the reference table persists across calls until [`Writer::reset`].
/// Container deduplication keys on addresses, so values packed into one
/// stream must outlive the stream: a dropped value's address can be reused
/// by a later value, which would then alias the earlier entry.
/// In simple mode no reference bookkeeping happens at all: output for
/// repeated values is larger, back-references are never emitted, and cyclic
/// graphs must not be passed.
pub struct Writer {
    buf: BytesMut,
    simple: bool,
    refs: RefTable,
    classes: HashMap<String, usize>,
    registry: Option<Arc<Registry>>,
}

#[derive(Default)]
struct RefTable {
    strings: HashMap<String, usize>,
    addrs: HashMap<usize, usize>,
    next: usize,
}

impl RefTable {
    fn lookup_str(&self, s: &str) -> Option<usize> {
        self.strings.get(s).copied()
    }

    fn insert_str(&mut self, s: &str) {
        self.strings.insert(s.to_owned(), self.next);
        self.next += 1;
    }

    fn lookup_addr(&self, key: usize) -> Option<usize> {
        self.addrs.get(&key).copied()
    }

    fn insert_addr(&mut self, key: usize) {
        self.addrs.insert(key, self.next);
        self.next += 1;
    }

    /// Consumes an index for a value that has no usable identity key
    /// (for example an empty slice). Keeps encode and decode index
    /// assignment in lockstep.
    fn reserve(&mut self) {
        self.next += 1;
    }

    fn clear(&mut self) {
        self.strings.clear();
        self.addrs.clear();
        self.next = 0;
    }
}

impl Writer {
    pub fn new(simple: bool) -> Self {
        Self {
            buf: BytesMut::new(),
            simple,
            refs: RefTable::default(),
            classes: HashMap::new(),
            registry: None,
        }
    }

    /// A writer that resolves record class names through a shared registry.
    pub fn with_registry(simple: bool, registry: Arc<Registry>) -> Self {
        Self {
            registry: Some(registry),
            ..Self::new(simple)
        }
    }

    /// Appends the encoding of `value` to the internal buffer.
    pub fn serialize<T: Encodable + ?Sized>(&mut self, value: &T) -> Result<()> {
        value.encode(self)
    }

    /// Snapshot of everything written so far. Not destructive; the writer
    /// keeps accumulating afterwards.
    pub fn bytes(&self) -> Bytes {
        Bytes::copy_from_slice(&self.buf)
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Discards the buffer, the reference table, and the class table,
    /// starting a fresh stream.
    pub fn reset(&mut self) {
        self.buf.clear();
        self.refs.clear();
        self.classes.clear();
    }

    // -- framing primitives --

    fn put_decimal(&mut self, mut v: u64) {
        let mut tmp = [0u8; 20];
        let mut i = tmp.len();
        loop {
            i -= 1;
            tmp[i] = b'0' + (v % 10) as u8;
            v /= 10;
            if v == 0 {
                break;
            }
        }
        self.buf.put_slice(&tmp[i..]);
    }

    fn put_signed_run(&mut self, v: i64) {
        if v < 0 {
            self.buf.put_u8(TAG_NEG);
        }
        self.put_decimal(v.unsigned_abs());
        self.buf.put_u8(TAG_SEMICOLON);
    }

    fn put_string_payload(&mut self, units: usize, s: &str) {
        self.buf.put_u8(TAG_STRING);
        self.put_decimal(units as u64);
        self.buf.put_u8(TAG_QUOTE);
        self.buf.put_slice(s.as_bytes());
        self.buf.put_u8(TAG_QUOTE);
    }

    fn write_ref(&mut self, index: usize) {
        self.buf.put_u8(TAG_REF);
        self.put_decimal(index as u64);
        self.buf.put_u8(TAG_SEMICOLON);
    }

    // -- scalar writers --

    pub fn write_null(&mut self) {
        self.buf.put_u8(TAG_NULL);
    }

    pub fn write_bool(&mut self, b: bool) {
        self.buf.put_u8(if b { TAG_TRUE } else { TAG_FALSE });
    }

    /// Most compact applicable tag: digit shortcut for 0–9, Integer when the
    /// magnitude fits i32, Long otherwise.
    pub fn write_int(&mut self, v: i64) {
        if (0..=9).contains(&v) {
            self.buf.put_u8(b'0' + v as u8);
        } else if i32::try_from(v).is_ok() {
            self.buf.put_u8(TAG_INTEGER);
            self.put_signed_run(v);
        } else {
            self.buf.put_u8(TAG_LONG);
            self.put_signed_run(v);
        }
    }

    pub fn write_uint(&mut self, v: u64) {
        if v <= 9 {
            self.buf.put_u8(b'0' + v as u8);
        } else {
            self.buf
                .put_u8(if v <= i32::MAX as u64 { TAG_INTEGER } else { TAG_LONG });
            self.put_decimal(v);
            self.buf.put_u8(TAG_SEMICOLON);
        }
    }

    pub fn write_f64(&mut self, v: f64) {
        if v.is_nan() {
            self.buf.put_u8(TAG_NAN);
        } else if v.is_infinite() {
            self.buf.put_u8(TAG_INFINITY);
            self.buf.put_u8(if v > 0.0 { TAG_POS } else { TAG_NEG });
        } else {
            self.buf.put_u8(TAG_DOUBLE);
            self.buf.put_f64(v);
        }
    }

    pub fn write_f32(&mut self, v: f32) {
        self.write_f64(v as f64);
    }

    pub fn write_char(&mut self, c: char) {
        let mut utf8 = [0u8; 4];
        self.buf.put_u8(TAG_UTF8_CHAR);
        self.buf.put_slice(c.encode_utf8(&mut utf8).as_bytes());
    }

    /// Empty strings collapse to the Empty tag, single UTF-16-unit strings
    /// to an inline char; everything longer is deduplicated by content.
    pub fn write_str(&mut self, s: &str) {
        let units = utf16_len(s);
        match units {
            0 => self.buf.put_u8(TAG_EMPTY),
            1 => {
                self.buf.put_u8(TAG_UTF8_CHAR);
                self.buf.put_slice(s.as_bytes());
            }
            _ => {
                if !self.simple {
                    if let Some(idx) = self.refs.lookup_str(s) {
                        return self.write_ref(idx);
                    }
                    self.refs.insert_str(s);
                }
                self.put_string_payload(units, s);
            }
        }
    }

    pub fn write_bytes(&mut self, b: &[u8]) {
        if !self.simple {
            if b.is_empty() {
                self.refs.reserve();
            } else {
                let key = b.as_ptr() as usize;
                if let Some(idx) = self.refs.lookup_addr(key) {
                    return self.write_ref(idx);
                }
                self.refs.insert_addr(key);
            }
        }
        self.buf.put_u8(TAG_BYTES);
        if !b.is_empty() {
            self.put_decimal(b.len() as u64);
        }
        self.buf.put_u8(TAG_QUOTE);
        self.buf.put_slice(b);
        self.buf.put_u8(TAG_QUOTE);
    }

    pub fn write_timestamp(&mut self, t: Timestamp) {
        self.buf.put_u8(TAG_TIMESTAMP);
        self.put_signed_run(t.secs);
        self.put_decimal(t.nanos as u64);
        self.buf.put_u8(TAG_SEMICOLON);
    }

    pub fn write_duration(&mut self, d: Duration) {
        self.buf.put_u8(TAG_DURATION);
        self.put_decimal(d.as_secs());
        self.buf.put_u8(TAG_SEMICOLON);
        self.put_decimal(d.subsec_nanos() as u64);
        self.buf.put_u8(TAG_SEMICOLON);
    }

    // -- containers --

    /// Opens a list, or emits a back-reference and returns `true` if `key`
    /// was already registered. `key` is the value's identity; `None`
    /// consumes an index without keying it.
    pub(crate) fn begin_list(&mut self, key: Option<usize>, len: usize) -> bool {
        if self.check_ref(key) {
            return true;
        }
        self.buf.put_u8(TAG_LIST);
        if len > 0 {
            self.put_decimal(len as u64);
        }
        self.buf.put_u8(TAG_OPEN);
        false
    }

    pub(crate) fn begin_map(&mut self, key: Option<usize>, len: usize) -> bool {
        if self.check_ref(key) {
            return true;
        }
        self.buf.put_u8(TAG_MAP);
        if len > 0 {
            self.put_decimal(len as u64);
        }
        self.buf.put_u8(TAG_OPEN);
        false
    }

    pub(crate) fn end_container(&mut self) {
        self.buf.put_u8(TAG_CLOSE);
    }

    fn check_ref(&mut self, key: Option<usize>) -> bool {
        if self.simple {
            return false;
        }
        match key {
            Some(k) => {
                if let Some(idx) = self.refs.lookup_addr(k) {
                    self.write_ref(idx);
                    return true;
                }
                self.refs.insert_addr(k);
            }
            None => self.refs.reserve(),
        }
        false
    }

    // -- records --

    fn put_raw_string(&mut self, s: &str) {
        self.put_decimal(utf16_len(s) as u64);
        self.buf.put_u8(TAG_QUOTE);
        self.buf.put_slice(s.as_bytes());
        self.buf.put_u8(TAG_QUOTE);
    }

    /// Emits a class definition and returns its index. Definitions are
    /// written once per stream; field names are raw string payloads outside
    /// the reference table.
    fn class_index(&mut self, name: &str, fields: &[&str]) -> usize {
        if let Some(&idx) = self.classes.get(name) {
            return idx;
        }
        self.buf.put_u8(TAG_CLASS);
        self.put_raw_string(name);
        self.put_decimal(fields.len() as u64);
        self.buf.put_u8(TAG_OPEN);
        for f in fields {
            self.put_raw_string(f);
        }
        self.buf.put_u8(TAG_CLOSE);
        let idx = self.classes.len();
        self.classes.insert(name.to_owned(), idx);
        idx
    }

    /// Serializes a record as a class/field-tagged object, emitting the
    /// class definition on first encounter.
    pub fn write_record<T: Record + 'static>(&mut self, rec: &T) -> Result<()> {
        let key = rec as *const T as usize;
        if !self.simple {
            if let Some(idx) = self.refs.lookup_addr(key) {
                self.write_ref(idx);
                return Ok(());
            }
        }
        let name = self
            .registry
            .as_ref()
            .and_then(|r| r.alias_of::<T>())
            .unwrap_or_else(|| T::class_name().to_string());
        let class_idx = self.class_index(&name, T::field_names());
        if !self.simple {
            self.refs.insert_addr(key);
        }
        self.buf.put_u8(TAG_OBJECT);
        self.put_decimal(class_idx as u64);
        self.buf.put_u8(TAG_OPEN);
        for i in 0..T::field_names().len() {
            rec.encode_field(i, self)?;
        }
        self.buf.put_u8(TAG_CLOSE);
        Ok(())
    }

    // -- dynamic values --

    /// Serializes a [`Value`] graph. Container nodes are registered by
    /// identity before their members, so shared nodes encode as
    /// back-references and cycles terminate.
    pub fn write_value(&mut self, v: &Value) -> Result<()> {
        match v {
            Value::Null => self.write_null(),
            Value::Bool(b) => self.write_bool(*b),
            Value::Int(i) => self.write_int(*i),
            Value::Double(f) => self.write_f64(*f),
            Value::Str(s) => self.write_str(s),
            Value::Bytes(b) => self.write_bytes(b),
            Value::Time(t) => self.write_timestamp(*t),
            Value::Elapsed(d) => self.write_duration(*d),
            Value::List(rc) => {
                let key = Rc::as_ptr(rc) as *const u8 as usize;
                let items = rc.borrow();
                if !self.begin_list(Some(key), items.len()) {
                    for item in items.iter() {
                        self.write_value(item)?;
                    }
                    self.end_container();
                }
            }
            Value::Map(rc) => {
                let key = Rc::as_ptr(rc) as *const u8 as usize;
                let pairs = rc.borrow();
                if !self.begin_map(Some(key), pairs.len()) {
                    for (k, val) in pairs.iter() {
                        self.write_value(k)?;
                        self.write_value(val)?;
                    }
                    self.end_container();
                }
            }
            Value::Object(rc) => {
                let key = Rc::as_ptr(rc) as *const u8 as usize;
                if !self.simple {
                    if let Some(idx) = self.refs.lookup_addr(key) {
                        self.write_ref(idx);
                        return Ok(());
                    }
                }
                let obj = rc.borrow();
                let names: Vec<&str> = obj.fields.iter().map(|(n, _)| n.as_str()).collect();
                let class_idx = self.class_index(&obj.class, &names);
                if !self.simple {
                    self.refs.insert_addr(key);
                }
                self.buf.put_u8(TAG_OBJECT);
                self.put_decimal(class_idx as u64);
                self.buf.put_u8(TAG_OPEN);
                for (_, field) in obj.fields.iter() {
                    self.write_value(field)?;
                }
                self.buf.put_u8(TAG_CLOSE);
            }
        }
        Ok(())
    }
}

/// Length of a string counted in UTF-16 code units (astral scalars count
/// as two).
pub(crate) fn utf16_len(s: &str) -> usize {
    s.chars()
        .map(|c| if (c as u32) >= 0x10000 { 2 } else { 1 })
        .sum()
}

// -- Encodable implementations --

impl Encodable for bool {
    fn encode(&self, w: &mut Writer) -> Result<()> {
        w.write_bool(*self);
        Ok(())
    }
}

macro_rules! impl_encode_int {
    ($($t:ty),+) => {$(
        impl Encodable for $t {
            fn encode(&self, w: &mut Writer) -> Result<()> {
                w.write_int(*self as i64);
                Ok(())
            }
        }
    )+};
}

impl_encode_int!(i8, i16, i32, i64, isize);

macro_rules! impl_encode_uint {
    ($($t:ty),+) => {$(
        impl Encodable for $t {
            fn encode(&self, w: &mut Writer) -> Result<()> {
                w.write_uint(*self as u64);
                Ok(())
            }
        }
    )+};
}

impl_encode_uint!(u8, u16, u32, u64, usize);

impl Encodable for f32 {
    fn encode(&self, w: &mut Writer) -> Result<()> {
        w.write_f32(*self);
        Ok(())
    }
}

impl Encodable for f64 {
    fn encode(&self, w: &mut Writer) -> Result<()> {
        w.write_f64(*self);
        Ok(())
    }
}

impl Encodable for char {
    fn encode(&self, w: &mut Writer) -> Result<()> {
        w.write_char(*self);
        Ok(())
    }
}

impl Encodable for str {
    fn encode(&self, w: &mut Writer) -> Result<()> {
        w.write_str(self);
        Ok(())
    }
}

impl Encodable for String {
    fn encode(&self, w: &mut Writer) -> Result<()> {
        w.write_str(self);
        Ok(())
    }
}

impl Encodable for Complex64 {
    fn encode(&self, w: &mut Writer) -> Result<()> {
        if self.im == 0.0 {
            w.write_f64(self.re as f64);
            return Ok(());
        }
        let key = self as *const Self as usize;
        if !w.begin_list(Some(key), 2) {
            w.write_f64(self.re as f64);
            w.write_f64(self.im as f64);
            w.end_container();
        }
        Ok(())
    }
}

impl Encodable for Complex128 {
    fn encode(&self, w: &mut Writer) -> Result<()> {
        if self.im == 0.0 {
            w.write_f64(self.re);
            return Ok(());
        }
        let key = self as *const Self as usize;
        if !w.begin_list(Some(key), 2) {
            w.write_f64(self.re);
            w.write_f64(self.im);
            w.end_container();
        }
        Ok(())
    }
}

impl Encodable for Timestamp {
    fn encode(&self, w: &mut Writer) -> Result<()> {
        w.write_timestamp(*self);
        Ok(())
    }
}

impl Encodable for SystemTime {
    fn encode(&self, w: &mut Writer) -> Result<()> {
        w.write_timestamp(Timestamp::from(*self));
        Ok(())
    }
}

impl Encodable for Duration {
    fn encode(&self, w: &mut Writer) -> Result<()> {
        w.write_duration(*self);
        Ok(())
    }
}

impl Encodable for Value {
    fn encode(&self, w: &mut Writer) -> Result<()> {
        w.write_value(self)
    }
}

impl<T: Encodable> Encodable for Option<T> {
    fn encode(&self, w: &mut Writer) -> Result<()> {
        match self {
            Some(v) => v.encode(w),
            None => {
                w.write_null();
                Ok(())
            }
        }
    }
}

impl<T: Encodable + 'static> Encodable for [T] {
    fn encode(&self, w: &mut Writer) -> Result<()> {
        if TypeId::of::<T>() == TypeId::of::<u8>() {
            // Safety: T is u8, so the slice layouts are identical.
            let bytes = unsafe { &*(self as *const [T] as *const [u8]) };
            w.write_bytes(bytes);
            return Ok(());
        }
        let key = (!self.is_empty()).then(|| self.as_ptr() as usize);
        if !w.begin_list(key, self.len()) {
            for item in self {
                item.encode(w)?;
            }
            w.end_container();
        }
        Ok(())
    }
}

impl<T: Encodable + 'static> Encodable for Vec<T> {
    fn encode(&self, w: &mut Writer) -> Result<()> {
        self.as_slice().encode(w)
    }
}

impl<T: Encodable + 'static, const N: usize> Encodable for [T; N] {
    fn encode(&self, w: &mut Writer) -> Result<()> {
        self.as_slice().encode(w)
    }
}

impl<K: Encodable, V: Encodable> Encodable for HashMap<K, V> {
    fn encode(&self, w: &mut Writer) -> Result<()> {
        let key = self as *const Self as usize;
        if !w.begin_map(Some(key), self.len()) {
            for (k, v) in self {
                k.encode(w)?;
                v.encode(w)?;
            }
            w.end_container();
        }
        Ok(())
    }
}

impl<K: Encodable, V: Encodable> Encodable for BTreeMap<K, V> {
    fn encode(&self, w: &mut Writer) -> Result<()> {
        let key = self as *const Self as usize;
        if !w.begin_map(Some(key), self.len()) {
            for (k, v) in self {
                k.encode(w)?;
                v.encode(w)?;
            }
            w.end_container();
        }
        Ok(())
    }
}

impl<T: Encodable + ?Sized> Encodable for &T {
    fn encode(&self, w: &mut Writer) -> Result<()> {
        (**self).encode(w)
    }
}

impl<T: Encodable + ?Sized> Encodable for Box<T> {
    fn encode(&self, w: &mut Writer) -> Result<()> {
        (**self).encode(w)
    }
}

impl<T: Encodable + ?Sized> Encodable for Rc<T> {
    fn encode(&self, w: &mut Writer) -> Result<()> {
        (**self).encode(w)
    }
}

impl<T: Encodable + ?Sized> Encodable for Arc<T> {
    fn encode(&self, w: &mut Writer) -> Result<()> {
        (**self).encode(w)
    }
}

macro_rules! count_args {
    () => { 0usize };
    ($head:ident $(, $tail:ident)*) => { 1usize + count_args!($($tail),*) };
}

macro_rules! impl_tuple_encode {
    ($($T:ident : $idx:tt),+) => {
        impl<$($T: Encodable),+> Encodable for ($($T,)+) {
            fn encode(&self, w: &mut Writer) -> Result<()> {
                let key = self as *const Self as *const u8 as usize;
                if !w.begin_list(Some(key), count_args!($($T),+)) {
                    $( self.$idx.encode(w)?; )+
                    w.end_container();
                }
                Ok(())
            }
        }
    };
}

impl_tuple_encode!(T0: 0);
impl_tuple_encode!(T0: 0, T1: 1);
impl_tuple_encode!(T0: 0, T1: 1, T2: 2);
impl_tuple_encode!(T0: 0, T1: 1, T2: 2, T3: 3);
impl_tuple_encode!(T0: 0, T1: 1, T2: 2, T3: 3, T4: 4);
impl_tuple_encode!(T0: 0, T1: 1, T2: 2, T3: 3, T4: 4, T5: 5);
impl_tuple_encode!(T0: 0, T1: 1, T2: 2, T3: 3, T4: 4, T5: 5, T6: 6);
impl_tuple_encode!(T0: 0, T1: 1, T2: 2, T3: 3, T4: 4, T5: 5, T6: 6, T7: 7);
