// ABOUTME: Shared configuration primitives for the Hostbox workspace
// ABOUTME: Environment variable names and the parsing helpers every crate uses to read them

pub mod constants;
pub mod env;

pub use env::{
    parse_env_flag, parse_env_or_default, parse_env_or_default_with_validation,
    parse_env_string, parse_env_with_fallback, parse_env_words,
};
