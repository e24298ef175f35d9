pub mod pseudonymize;
pub mod reverse;
pub mod sanitize;
pub mod validate;
