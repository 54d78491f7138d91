pub mod executor;
pub mod registry;
pub mod result;
pub mod schema;

pub use executor::FunctionSandbox;
pub use registry::{FunctionDescriptor, FunctionRegistry};
pub use result::{FunctionError, FunctionErrorKind, FunctionResult};
pub use schema::{input_schema_for, TypedFunction};
