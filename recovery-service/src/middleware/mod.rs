pub mod permission;

pub use permission::{permission_middleware, AuthorizedUser};
