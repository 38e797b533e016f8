// Data models for the gateway wire format and benchmark results

pub mod benchmark;
pub mod openai;
