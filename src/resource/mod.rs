//! Resource layer: declared schemas and the request pipeline that turns HTTP
//! input into `Orm` calls.

pub mod adapter;
pub mod schema;

pub use adapter::{RawRequest, Reply, ResourceAdapter};
pub use schema::{Field, FieldError, FieldType, IndexSpec, ResourceSchema, SchemaError, ValidationError};
