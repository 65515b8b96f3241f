pub mod consumer;
pub mod fallback;
pub mod key;
pub mod normalize;
pub mod resolver;
pub mod types;
pub mod validator;

#[cfg(test)]
pub(crate) mod testing;
