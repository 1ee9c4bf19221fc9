pub mod password;
pub mod token;

pub use password::{hash_password, verify_password, Password, PasswordError, PasswordHashString};
pub use token::{generate_code, generate_token, hash_token, tokens_match};
