//! GAP side of the peripheral: advertising and security.
//!
//! - [`advertising`] - parameters, payloads and the advertising controller
//! - [`handler`] - GAP event handling

mod advertising;
mod handler;

pub use advertising::{
    AdvParams, AdvPayload, AdvType, Advertiser, AdvertisingState, FilterPolicy, OwnAddressType,
    PayloadKind, CHANNEL_MAP_ALL, FLAG_BREDR_NOT_SUPPORTED, FLAG_GENERAL_DISCOVERABLE,
};
pub use handler::GapHandler;
