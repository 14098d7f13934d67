pub mod chain;
pub mod errors;
pub mod log;
pub mod types;
pub mod utils;
pub mod xdr;

pub fn timestamp() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
