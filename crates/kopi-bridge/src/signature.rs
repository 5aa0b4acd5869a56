//! Signature codec
//!
//! Type descriptors in the VM's canonical text form. Encoding is total and
//! deterministic; parsing accepts exactly the strings encoding produces.
//!
//! ```text
//! void V   boolean Z   byte B   char C   short S
//! int I    long J      float F  double D
//! class    L<slash/separated/name>;
//! array    [<element>
//! function (<arg><arg>...)<ret>
//! ```

use std::fmt;
use std::str::FromStr;

use kopi_sdk::ValueKind;

/// Internal name of the structured-error class
pub const ERROR_CLASS: &str = "dev/kopi/BridgeException";

/// Internal name of `java.lang.String`
pub const STRING_CLASS: &str = "java/lang/String";

/// Internal name of `java.lang.Object`
pub const OBJECT_CLASS: &str = "java/lang/Object";

/// Type descriptor
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Signature {
    /// `V`
    Void,
    /// `Z`
    Boolean,
    /// `B`
    Byte,
    /// `C`
    Char,
    /// `S`
    Short,
    /// `I`
    Int,
    /// `J`
    Long,
    /// `F`
    Float,
    /// `D`
    Double,
    /// Reference type, by internal (slash-separated) name
    Class(String),
    /// Array of the element type
    Array(Box<Signature>),
    /// Method type
    Function {
        /// Parameter types, in order
        args: Vec<Signature>,
        /// Return type
        ret: Box<Signature>,
    },
    /// The structured-error class, which converts to and from [`StructuredError`]
    ///
    /// [`StructuredError`]: crate::codec::StructuredError
    Error,
}

/// Malformed signature text
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid signature {input:?} at byte {position}: {reason}")]
pub struct SignatureError {
    /// The text being parsed
    pub input: String,
    /// Byte offset of the problem
    pub position: usize,
    /// What was wrong
    pub reason: &'static str,
}

impl Signature {
    /// Reference type from a dotted or slashed class name
    pub fn class(name: impl AsRef<str>) -> Self {
        let name = name.as_ref().replace('.', "/");
        if name == ERROR_CLASS {
            Signature::Error
        } else {
            Signature::Class(name)
        }
    }

    /// Array of `element`
    pub fn array(element: Signature) -> Self {
        Signature::Array(Box::new(element))
    }

    /// Method type
    pub fn function(args: impl IntoIterator<Item = Signature>, ret: Signature) -> Self {
        Signature::Function {
            args: args.into_iter().collect(),
            ret: Box::new(ret),
        }
    }

    /// `java.lang.String`
    pub fn string() -> Self {
        Signature::Class(STRING_CLASS.to_string())
    }

    /// `java.lang.Object`
    pub fn object() -> Self {
        Signature::Class(OBJECT_CLASS.to_string())
    }

    /// `byte[]`
    pub fn bytes() -> Self {
        Signature::array(Signature::Byte)
    }

    /// `String[]`
    pub fn strings() -> Self {
        Signature::array(Signature::string())
    }

    /// The structured-error marker
    pub fn error() -> Self {
        Signature::Error
    }

    /// VM value kind used to pass or receive this type.
    /// Function types have none.
    pub fn kind(&self) -> Option<ValueKind> {
        Some(match self {
            Signature::Void => ValueKind::Void,
            Signature::Boolean => ValueKind::Boolean,
            Signature::Byte => ValueKind::Byte,
            Signature::Char => ValueKind::Char,
            Signature::Short => ValueKind::Short,
            Signature::Int => ValueKind::Int,
            Signature::Long => ValueKind::Long,
            Signature::Float => ValueKind::Float,
            Signature::Double => ValueKind::Double,
            Signature::Class(_) | Signature::Array(_) | Signature::Error => ValueKind::Object,
            Signature::Function { .. } => return None,
        })
    }

    /// True for the eight primitive types
    pub fn is_primitive(&self) -> bool {
        self.kind().is_some_and(ValueKind::is_primitive)
    }

    /// True for class, array, and error types
    pub fn is_object_like(&self) -> bool {
        matches!(self, Signature::Class(_) | Signature::Array(_) | Signature::Error)
    }

    /// True for `java.lang.String`
    pub fn is_string(&self) -> bool {
        matches!(self, Signature::Class(name) if name == STRING_CLASS)
    }

    /// Name to resolve the type with: the internal name for classes, the
    /// descriptor for arrays
    pub fn class_name(&self) -> Option<String> {
        match self {
            Signature::Class(name) => Some(name.clone()),
            Signature::Error => Some(ERROR_CLASS.to_string()),
            Signature::Array(_) => Some(self.to_string()),
            _ => None,
        }
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Signature::Void => f.write_str("V"),
            Signature::Boolean => f.write_str("Z"),
            Signature::Byte => f.write_str("B"),
            Signature::Char => f.write_str("C"),
            Signature::Short => f.write_str("S"),
            Signature::Int => f.write_str("I"),
            Signature::Long => f.write_str("J"),
            Signature::Float => f.write_str("F"),
            Signature::Double => f.write_str("D"),
            Signature::Class(name) => write!(f, "L{};", name),
            Signature::Error => write!(f, "L{};", ERROR_CLASS),
            Signature::Array(element) => write!(f, "[{}", element),
            Signature::Function { args, ret } => {
                f.write_str("(")?;
                for arg in args {
                    write!(f, "{}", arg)?;
                }
                write!(f, "){}", ret)
            }
        }
    }
}

// ============================================================================
// Parsing
// ============================================================================

struct Parser<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn error(&self, reason: &'static str) -> SignatureError {
        SignatureError {
            input: self.input.to_string(),
            position: self.pos,
            reason,
        }
    }

    fn peek(&self) -> Option<u8> {
        self.input.as_bytes().get(self.pos).copied()
    }

    fn next(&mut self) -> Option<u8> {
        let b = self.peek()?;
        self.pos += 1;
        Some(b)
    }

    fn field(&mut self) -> Result<Signature, SignatureError> {
        let start = self.pos;
        let sig = match self.next().ok_or_else(|| self.error("unexpected end"))? {
            b'Z' => Signature::Boolean,
            b'B' => Signature::Byte,
            b'C' => Signature::Char,
            b'S' => Signature::Short,
            b'I' => Signature::Int,
            b'J' => Signature::Long,
            b'F' => Signature::Float,
            b'D' => Signature::Double,
            b'L' => {
                let rest = &self.input[self.pos..];
                let end = rest.find(';').ok_or_else(|| self.error("unterminated class name"))?;
                let name = &rest[..end];
                if name.is_empty() || name.contains(['.', '(', ')', '[']) {
                    return Err(self.error("invalid class name"));
                }
                self.pos += end + 1;
                Signature::class(name)
            }
            b'[' => Signature::array(self.field()?),
            b'V' => {
                self.pos = start;
                return Err(self.error("void is only valid as a return type"));
            }
            _ => {
                self.pos = start;
                return Err(self.error("unknown type descriptor"));
            }
        };
        Ok(sig)
    }

    fn signature(&mut self) -> Result<Signature, SignatureError> {
        match self.peek() {
            Some(b'V') => {
                self.pos += 1;
                Ok(Signature::Void)
            }
            Some(b'(') => {
                self.pos += 1;
                let mut args = Vec::new();
                while self.peek() != Some(b')') {
                    if self.peek().is_none() {
                        return Err(self.error("unterminated parameter list"));
                    }
                    args.push(self.field()?);
                }
                self.pos += 1;
                let ret = match self.peek() {
                    Some(b'V') => {
                        self.pos += 1;
                        Signature::Void
                    }
                    Some(b'(') => return Err(self.error("function types cannot be returned")),
                    _ => self.field()?,
                };
                Ok(Signature::function(args, ret))
            }
            _ => self.field(),
        }
    }
}

impl FromStr for Signature {
    type Err = SignatureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parser = Parser { input: s, pos: 0 };
        let sig = parser.signature()?;
        if parser.pos != s.len() {
            return Err(parser.error("trailing characters"));
        }
        Ok(sig)
    }
}
