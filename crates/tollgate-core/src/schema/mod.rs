mod parser;
pub mod types;
pub mod validation;

pub use parser::{ParseError, parse_schema};
pub use types::{EntityDefinition, Expression, Reference, Schema};
pub use validation::{SchemaLimits, ValidationError, validate_schema, validate_schema_limits};
