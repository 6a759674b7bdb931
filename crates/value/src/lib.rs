//! Schema-typed values: the provider-facing representation of resource
//! state, its schema, and conversion to generic attribute trees.

#![forbid(unsafe_code)]

pub mod convert;
pub mod number;
pub mod path;
pub mod propose;
pub mod schema;
pub mod value;
pub mod wire;

pub use convert::{
    from_generic, is_unknown_marker, map_to_typed, to_generic, to_generic_marking_unknown, typed_to_map, UNKNOWN_MARKER,
};
pub use number::BigNumber;
pub use path::{AttributePath, PathStep};
pub use propose::proposed_new_state;
pub use schema::{Attribute, Block, NestedBlock, NestingMode, ResourceSchema, SchemaType};
pub use value::TypedValue;
pub use wire::{implied_type, DynamicValue, ProviderState};
