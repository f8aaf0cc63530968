//! Tag vocabulary of the wire format.
//!
//! Every encoded value begins with one of these bytes. The tag alone
//! determines how many following bytes belong to the payload and whether a
//! reference-table entry is created for the value. Tags are stable and part
//! of the wire format.
//!
//! The ASCII digits `'0'..='9'` double as both tag and value (the digit
//! shortcut); they are not listed as named constants.

/// Variable-length decimal run terminated by [`TAG_SEMICOLON`].
pub const TAG_INTEGER: u8 = b'i';
/// Same lexical form as [`TAG_INTEGER`], but forces 64-bit-exact interpretation.
pub const TAG_LONG: u8 = b'l';
/// 8 bytes big-endian IEEE-754 f64.
pub const TAG_DOUBLE: u8 = b'd';
pub const TAG_NULL: u8 = b'n';
/// Empty string.
pub const TAG_EMPTY: u8 = b'e';
pub const TAG_TRUE: u8 = b't';
pub const TAG_FALSE: u8 = b'f';
pub const TAG_NAN: u8 = b'N';
/// Followed by one sign byte, [`TAG_POS`] or [`TAG_NEG`].
pub const TAG_INFINITY: u8 = b'I';
/// Exactly one Unicode scalar value, UTF-8 encoded.
pub const TAG_UTF8_CHAR: u8 = b'u';
/// Length in UTF-16 code units, then quoted UTF-8 bytes.
pub const TAG_STRING: u8 = b's';
/// Length in bytes, then quoted raw bytes.
pub const TAG_BYTES: u8 = b'b';
/// Element count (omitted when zero), then braced elements.
pub const TAG_LIST: u8 = b'a';
/// Pair count (omitted when zero), then braced key/value pairs.
pub const TAG_MAP: u8 = b'm';
/// Class definition: name, field count, braced field names.
pub const TAG_CLASS: u8 = b'c';
/// Class index, then braced field values.
pub const TAG_OBJECT: u8 = b'o';
/// Decimal reference-table index terminated by [`TAG_SEMICOLON`].
pub const TAG_REF: u8 = b'r';
/// Signed decimal seconds and decimal nanoseconds, each `';'`-terminated.
pub const TAG_TIMESTAMP: u8 = b'D';
/// Same payload form as [`TAG_TIMESTAMP`], interpreted as an elapsed span.
pub const TAG_DURATION: u8 = b'T';

// Reserved delimiter bytes. These never begin a value.
pub const TAG_SEMICOLON: u8 = b';';
pub const TAG_QUOTE: u8 = b'"';
pub const TAG_OPEN: u8 = b'{';
pub const TAG_CLOSE: u8 = b'}';
pub const TAG_POS: u8 = b'+';
pub const TAG_NEG: u8 = b'-';

/// Returns true for the digit-shortcut tags `'0'..='9'`.
#[inline]
pub fn is_digit(tag: u8) -> bool {
    tag.is_ascii_digit()
}

/// Returns true if the byte is a value-starting tag of the vocabulary.
pub fn is_known(tag: u8) -> bool {
    is_digit(tag)
        || matches!(
            tag,
            TAG_INTEGER
                | TAG_LONG
                | TAG_DOUBLE
                | TAG_NULL
                | TAG_EMPTY
                | TAG_TRUE
                | TAG_FALSE
                | TAG_NAN
                | TAG_INFINITY
                | TAG_UTF8_CHAR
                | TAG_STRING
                | TAG_BYTES
                | TAG_LIST
                | TAG_MAP
                | TAG_CLASS
                | TAG_OBJECT
                | TAG_REF
                | TAG_TIMESTAMP
                | TAG_DURATION
        )
}

/// Human-readable name of the semantic category a tag denotes, used in
/// conversion error messages.
pub fn type_name(tag: u8) -> &'static str {
    if is_digit(tag) {
        return "int";
    }
    match tag {
        TAG_INTEGER => "int",
        TAG_LONG => "long",
        TAG_DOUBLE => "double",
        TAG_NULL => "null",
        TAG_EMPTY => "empty",
        TAG_TRUE | TAG_FALSE => "bool",
        TAG_NAN => "nan",
        TAG_INFINITY => "infinity",
        TAG_UTF8_CHAR => "char",
        TAG_STRING => "string",
        TAG_BYTES => "bytes",
        TAG_LIST => "list",
        TAG_MAP => "map",
        TAG_CLASS => "class",
        TAG_OBJECT => "object",
        TAG_REF => "ref",
        TAG_TIMESTAMP => "timestamp",
        TAG_DURATION => "duration",
        _ => "unknown",
    }
}
