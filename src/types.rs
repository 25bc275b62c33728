use std::fmt;
use std::str::FromStr;

use util::{EnumFromStr, ParseEnumError};

/// The type universe of the source language.
///
/// `Char` is 8-bit signed in the language but widened to 32 bits in the IR,
/// so it shares the integer lowering paths. The pointer kinds are what array
/// declarations decay to; they keep the element kind so the backends can pick
/// the float lowering for float arrays.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum VarType {
    Void,
    Int,
    Char,
    Float,
    IntPtr,
    FloatPtr,
}

impl VarType {
    /// True for the kinds that lower through the floating-point unit.
    pub fn is_float(self) -> bool {
        match self {
            VarType::Float | VarType::FloatPtr => true,
            _ => false,
        }
    }

    /// Element kind of an array type; scalars are their own element kind.
    pub fn element(self) -> VarType {
        match self {
            VarType::IntPtr => VarType::Int,
            VarType::FloatPtr => VarType::Float,
            other => other,
        }
    }

    /// The array kind holding elements of this type.
    pub fn pointer(self) -> VarType {
        match self {
            VarType::Float => VarType::FloatPtr,
            _ => VarType::IntPtr,
        }
    }

    /// Numeric promotion: `float` > `int` > `char`.
    pub fn higher(a: VarType, b: VarType) -> VarType {
        if a == VarType::Float || b == VarType::Float {
            VarType::Float
        } else if a == VarType::Int || b == VarType::Int {
            VarType::Int
        } else {
            VarType::Char
        }
    }

    pub fn keyword(self) -> &'static str {
        match self {
            VarType::Void => "void",
            VarType::Int => "int",
            VarType::Char => "char",
            VarType::Float => "float",
            VarType::IntPtr => "int[]",
            VarType::FloatPtr => "float[]",
        }
    }
}

impl fmt::Display for VarType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.keyword())
    }
}

impl EnumFromStr for VarType {
    fn from_str(s: &str) -> Result<VarType, ParseEnumError> {
        match s {
            "void" => Ok(VarType::Void),
            "int" => Ok(VarType::Int),
            "char" => Ok(VarType::Char),
            "float" => Ok(VarType::Float),
            _ => Err(ParseEnumError {
                value: s.to_string(),
                enum_name: "VarType",
            }),
        }
    }
}

impl FromStr for VarType {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<VarType, ParseEnumError> {
        EnumFromStr::from_str(s)
    }
}

#[cfg(test)]
mod test {
    use super::VarType;

    #[test]
    fn promotion_prefers_float() {
        assert_eq!(VarType::higher(VarType::Int, VarType::Float), VarType::Float);
        assert_eq!(VarType::higher(VarType::Float, VarType::Char), VarType::Float);
        assert_eq!(VarType::higher(VarType::Char, VarType::Int), VarType::Int);
        assert_eq!(VarType::higher(VarType::Char, VarType::Char), VarType::Char);
    }

    #[test]
    fn array_kinds_round_trip_their_element() {
        assert_eq!(VarType::Float.pointer(), VarType::FloatPtr);
        assert_eq!(VarType::FloatPtr.element(), VarType::Float);
        assert_eq!(VarType::Int.pointer(), VarType::IntPtr);
        assert_eq!(VarType::Char.pointer().element(), VarType::Int);
    }

    #[test]
    fn keywords_parse() {
        assert_eq!("int".parse::<VarType>(), Ok(VarType::Int));
        assert_eq!("float".parse::<VarType>(), Ok(VarType::Float));
        assert!("double".parse::<VarType>().is_err());
    }
}
