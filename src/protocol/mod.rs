//! Sans-IO protocol building blocks: crypto, TLV8, HDS values and HTTP framing

pub mod crypto;
pub mod hds;
pub mod http;
pub mod tlv;
