use ethers::{
    abi::AbiEncode,
    prelude::*,
    types::{Address, Bytes, U256},
};

// Only the method the payout path calls.
abigen!(
    IERC20,
    r#"[
        function transfer(address recipient, uint256 amount) external returns (bool)
    ]"#
);

/// Polygon PoS USDC (bridged).
pub const POLYGON_USDC_ADDRESS: &str = "0x2791Bca1f2de4661ED88A30C99A7a9449Aa84174";

/// `transfer(address,uint256)` selector.
pub const TRANSFER_SELECTOR: [u8; 4] = [0xa9, 0x05, 0x9c, 0xbb];

pub fn encode_transfer(recipient: Address, amount: U256) -> Bytes {
    TransferCall { recipient, amount }.encode().into()
}
