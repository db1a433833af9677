/// Filter predicates and operators.
pub mod filter;
/// Paging, sorting and search directives.
pub mod params;
/// Rendering of parameters into SQL fragments.
pub mod translator;
