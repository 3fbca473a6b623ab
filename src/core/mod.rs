// Native core: domain logic and process-wide state below the C ABI.
pub mod accept;
pub mod digest;
pub mod error;
pub mod runtime;
