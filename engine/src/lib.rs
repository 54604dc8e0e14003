pub mod clock;
pub mod countdown;
pub mod kv;
pub mod layout;
