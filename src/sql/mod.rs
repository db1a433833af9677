/// Identifier quoting, column-reference validation and sanitization.
pub mod ident;
/// Structured statement builder: fragments, placeholders and rendered statements.
pub mod statement;
/// Bind values and the generic row representation.
pub mod value;
