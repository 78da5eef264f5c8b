pub mod review;

pub use review::{Fingerprint, ReviewRecord, SentimentCategory};

#[cfg(test)]
mod tests;
