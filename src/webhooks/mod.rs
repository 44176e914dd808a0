/// Inbound carrier webhooks: signature schemes and payload shapes
pub mod payload;
pub mod signature;

pub use payload::{parse, InboundTrackingUpdate};
pub use signature::{sign, verify, SignatureError, SIGNATURE_HEADER};
