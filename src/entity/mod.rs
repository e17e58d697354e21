pub mod api_definition;
pub mod environment;
pub mod execution;
pub mod test_case;
pub mod test_result;
pub mod variable;
