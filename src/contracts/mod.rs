pub mod erc20;

pub use erc20::{encode_transfer, POLYGON_USDC_ADDRESS, TRANSFER_SELECTOR};
