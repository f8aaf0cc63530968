//! Dynamic value graphs and the small semantic types of the wire model.
//!
//! [`Value`] is the tagged union over every shape the stream can carry. Its
//! containers are `Rc<RefCell<_>>` so decoded back-references resolve to the
//! *same* node, which is what makes shared and cyclic graphs representable.
//! The reference table stores these directly; resolving a back-reference
//! into a typed destination goes through the `to_*` coercion methods below,
//! so an incompatible referent fails with a typed conversion error instead
//! of a dynamic downcast.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::{Result, WireError};

/// Single-precision complex pair.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Complex64 {
    pub re: f32,
    pub im: f32,
}

impl Complex64 {
    pub const fn new(re: f32, im: f32) -> Self {
        Self { re, im }
    }
}

/// Double-precision complex pair.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Complex128 {
    pub re: f64,
    pub im: f64,
}

impl Complex128 {
    pub const fn new(re: f64, im: f64) -> Self {
        Self { re, im }
    }
}

/// A point in time, recorded on the wire as whole seconds past the Unix
/// epoch plus a sub-second nanosecond part.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Timestamp {
    pub secs: i64,
    pub nanos: u32,
}

impl Timestamp {
    pub const fn new(secs: i64, nanos: u32) -> Self {
        Self { secs, nanos }
    }

    /// Total elapsed nanoseconds since the epoch, combining both parts.
    /// Wraps on overflow, matching integer narrowing elsewhere.
    pub fn total_nanos(&self) -> i64 {
        self.secs
            .wrapping_mul(1_000_000_000)
            .wrapping_add(self.nanos as i64)
    }

    /// Fractional seconds since the epoch.
    pub fn as_secs_f64(&self) -> f64 {
        self.secs as f64 + self.nanos as f64 / 1e9
    }

    /// Splits a total nanosecond count back into parts.
    pub fn from_total_nanos(nanos: i64) -> Self {
        Self {
            secs: nanos.div_euclid(1_000_000_000),
            nanos: nanos.rem_euclid(1_000_000_000) as u32,
        }
    }

    pub fn to_system_time(&self) -> SystemTime {
        let sub = Duration::from_nanos(self.nanos as u64);
        if self.secs >= 0 {
            UNIX_EPOCH + Duration::from_secs(self.secs as u64) + sub
        } else {
            UNIX_EPOCH - Duration::from_secs(self.secs.unsigned_abs()) + sub
        }
    }
}

impl From<SystemTime> for Timestamp {
    fn from(t: SystemTime) -> Self {
        match t.duration_since(UNIX_EPOCH) {
            Ok(d) => Self {
                secs: d.as_secs() as i64,
                nanos: d.subsec_nanos(),
            },
            Err(e) => {
                let d = e.duration();
                let mut secs = -(d.as_secs() as i64);
                let mut nanos = d.subsec_nanos();
                if nanos > 0 {
                    secs -= 1;
                    nanos = 1_000_000_000 - nanos;
                }
                Self { secs, nanos }
            }
        }
    }
}

/// A decoded object: wire class name plus named field values.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ObjectValue {
    pub class: String,
    pub fields: Vec<(String, Value)>,
}

/// Tagged union over the reference-eligible and scalar shapes of the wire.
///
/// Cloning is cheap: container variants share their backing node. Equality
/// is structural and recurses through containers, so comparing a cyclic
/// graph with `==` does not terminate; compare node identity with
/// [`Rc::ptr_eq`] instead.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    /// Integers of any width; magnitudes beyond i64 wrap modulo 2^64, which
    /// the unsigned coercions undo.
    Int(i64),
    Double(f64),
    Str(Rc<str>),
    Bytes(Rc<[u8]>),
    List(Rc<RefCell<Vec<Value>>>),
    Map(Rc<RefCell<Vec<(Value, Value)>>>),
    Object(Rc<RefCell<ObjectValue>>),
    Time(Timestamp),
    Elapsed(Duration),
}

impl Value {
    /// Builds a list node from owned values.
    pub fn list(items: Vec<Value>) -> Self {
        Value::List(Rc::new(RefCell::new(items)))
    }

    /// Builds a map node from owned pairs.
    pub fn map(pairs: Vec<(Value, Value)>) -> Self {
        Value::Map(Rc::new(RefCell::new(pairs)))
    }

    pub fn string(s: impl AsRef<str>) -> Self {
        Value::Str(Rc::from(s.as_ref()))
    }

    /// Name of the materialized type, used in conversion errors.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Double(_) => "double",
            Value::Str(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::List(_) => "list",
            Value::Map(_) => "map",
            Value::Object(_) => "object",
            Value::Time(_) => "timestamp",
            Value::Elapsed(_) => "duration",
        }
    }

    fn conversion(&self, to: &'static str) -> WireError {
        WireError::TypeConversion {
            from: self.type_name().to_string(),
            to,
        }
    }

    pub fn to_bool(&self) -> Result<bool> {
        match self {
            Value::Null => Ok(false),
            Value::Bool(b) => Ok(*b),
            Value::Int(i) => Ok(*i != 0),
            Value::Double(f) => Ok(*f != 0.0),
            Value::Str(s) => Ok(str_to_bool(s)),
            _ => Err(self.conversion("bool")),
        }
    }

    pub fn to_i64(&self) -> Result<i64> {
        match self {
            Value::Null => Ok(0),
            Value::Bool(b) => Ok(*b as i64),
            Value::Int(i) => Ok(*i),
            Value::Double(f) => Ok(*f as i64),
            Value::Str(s) => s.parse().map_err(|_| WireError::Parse {
                text: s.to_string(),
                target: "int64",
            }),
            Value::Time(t) => Ok(t.total_nanos()),
            Value::Elapsed(d) => Ok(d.as_nanos() as i64),
            _ => Err(self.conversion("int64")),
        }
    }

    pub fn to_u64(&self) -> Result<u64> {
        match self {
            Value::Str(s) => s.parse().map_err(|_| WireError::Parse {
                text: s.to_string(),
                target: "uint64",
            }),
            _ => self.to_i64().map(|i| i as u64).map_err(|e| match e {
                WireError::TypeConversion { from, .. } => {
                    WireError::TypeConversion { from, to: "uint64" }
                }
                other => other,
            }),
        }
    }

    pub fn to_f64(&self) -> Result<f64> {
        match self {
            Value::Null => Ok(0.0),
            Value::Bool(b) => Ok(*b as u8 as f64),
            Value::Int(i) => Ok(*i as f64),
            Value::Double(f) => Ok(*f),
            Value::Str(s) => s.parse().map_err(|_| WireError::Parse {
                text: s.to_string(),
                target: "float64",
            }),
            Value::Time(t) => Ok(t.as_secs_f64()),
            Value::Elapsed(d) => Ok(d.as_secs_f64()),
            _ => Err(self.conversion("float64")),
        }
    }

    pub fn to_f32(&self) -> Result<f32> {
        // Strings parse at f32 precision directly so the result matches a
        // typed read of the same payload.
        if let Value::Str(s) = self {
            return s.parse().map_err(|_| WireError::Parse {
                text: s.to_string(),
                target: "float32",
            });
        }
        self.to_f64().map(|f| f as f32).map_err(|e| match e {
            WireError::TypeConversion { from, .. } => WireError::TypeConversion {
                from,
                to: "float32",
            },
            other => other,
        })
    }

    pub fn to_text(&self) -> Result<String> {
        match self {
            Value::Null => Ok(String::new()),
            Value::Bool(b) => Ok(if *b { "true" } else { "false" }.to_string()),
            Value::Int(i) => Ok(i.to_string()),
            Value::Double(f) => Ok(fmt_f64(*f)),
            Value::Str(s) => Ok(s.to_string()),
            _ => Err(self.conversion("string")),
        }
    }

    /// Complex destinations only accept pair-shaped referents; in
    /// particular a string referent is a conversion error, not a parse.
    pub fn to_complex64(&self) -> Result<Complex64> {
        match self {
            Value::Null => Ok(Complex64::default()),
            Value::Bool(b) => Ok(Complex64::new(*b as u8 as f32, 0.0)),
            Value::Int(i) => Ok(Complex64::new(*i as f32, 0.0)),
            Value::Double(f) => Ok(Complex64::new(*f as f32, 0.0)),
            Value::List(items) => {
                let items = items.borrow();
                if items.len() != 2 {
                    return Err(WireError::TypeConversion {
                        from: format!("{}-element list", items.len()),
                        to: "complex64",
                    });
                }
                Ok(Complex64::new(items[0].to_f32()?, items[1].to_f32()?))
            }
            _ => Err(self.conversion("complex64")),
        }
    }

    pub fn to_complex128(&self) -> Result<Complex128> {
        match self {
            Value::Null => Ok(Complex128::default()),
            Value::Bool(b) => Ok(Complex128::new(*b as u8 as f64, 0.0)),
            Value::Int(i) => Ok(Complex128::new(*i as f64, 0.0)),
            Value::Double(f) => Ok(Complex128::new(*f, 0.0)),
            Value::List(items) => {
                let items = items.borrow();
                if items.len() != 2 {
                    return Err(WireError::TypeConversion {
                        from: format!("{}-element list", items.len()),
                        to: "complex128",
                    });
                }
                Ok(Complex128::new(items[0].to_f64()?, items[1].to_f64()?))
            }
            _ => Err(self.conversion("complex128")),
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::Null
    }
}

/// The boolean coercion rule for text: false only for the empty string and
/// the literals `"f"` and `"false"`.
pub(crate) fn str_to_bool(s: &str) -> bool {
    !(s.is_empty() || s == "f" || s == "false")
}

/// Text form of a double for string destinations.
pub(crate) fn fmt_f64(f: f64) -> String {
    if f.is_nan() {
        "NaN".to_string()
    } else if f.is_infinite() {
        if f > 0.0 { "+Inf" } else { "-Inf" }.to_string()
    } else {
        f.to_string()
    }
}
