//! Utilities used across the forwarding and scanning core.

pub mod address;
pub mod constants;
pub mod conversions;
pub mod copy_config;
pub mod header_word;
pub mod logger;
pub mod memory;
pub mod object_forwarding;
pub mod object_scanner;

pub use self::address::Address;
pub use self::address::ObjectReference;
