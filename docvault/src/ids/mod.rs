//! Sequential identifier allocation across collections.

pub mod allocator;
pub mod namespace;
pub mod parser;

pub use allocator::SequenceAllocator;
pub use namespace::{Identifier, Namespace, NamespaceRegistry, SourceField};
pub use parser::{parse_digits, parse_identifier};
