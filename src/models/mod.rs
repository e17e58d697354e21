pub mod api;
pub mod environment;
pub mod execution;
pub mod request;
pub mod result;
pub mod test_case;
pub mod variable;

pub use api::*;
pub use environment::*;
pub use execution::*;
pub use request::*;
pub use result::*;
pub use test_case::*;
pub use variable::*;
