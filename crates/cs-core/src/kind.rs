/// Kind code for methods in the fixed symbol-kind table.
pub const KIND_METHOD: i32 = 6;
/// Kind code for constructors.
pub const KIND_CONSTRUCTOR: i32 = 9;
/// Kind code for free functions.
pub const KIND_FUNCTION: i32 = 12;

/// Map an integer kind code from the index artifact to its name.
///
/// Unknown codes map to "unknown".
pub fn symbol_kind_name(code: i32) -> &'static str {
    match code {
        1 => "file",
        2 => "module",
        3 => "namespace",
        4 => "package",
        5 => "class",
        6 => "method",
        7 => "property",
        8 => "field",
        9 => "constructor",
        10 => "enum",
        11 => "interface",
        12 => "function",
        13 => "variable",
        14 => "constant",
        15 => "string",
        16 => "number",
        17 => "boolean",
        18 => "array",
        19 => "object",
        20 => "key",
        21 => "null",
        22 => "enum_member",
        23 => "struct",
        24 => "event",
        25 => "operator",
        26 => "type_parameter",
        _ => "unknown",
    }
}

/// Whether a kind code names something that can appear as a call target.
pub fn is_callable_kind(code: i32) -> bool {
    matches!(code, KIND_METHOD | KIND_CONSTRUCTOR | KIND_FUNCTION)
}
