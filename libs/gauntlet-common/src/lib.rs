pub mod languages;
pub mod redis;
pub mod stats;
pub mod storage;
pub mod types;
pub mod validator;
