use std::str::FromStr;

use ethers::{types::Address, utils::to_checksum};
use serde_json::Value;

use crate::{
    error::PayoutError,
    models::{PayoutRequest, RawPayoutRequest},
};

const MAX_IDEMPOTENCY_KEY_LEN: usize = 255;

/// Normalizes a raw payout request. Pure: no I/O, no logging of the payload.
pub fn validate_payout_request(raw: &RawPayoutRequest) -> Result<PayoutRequest, PayoutError> {
    let recipient_address = parse_recipient(raw.recipient_address.as_deref())?;
    let amount_minor_units = parse_amount(raw.amount_minor_units.as_ref())?;

    Ok(PayoutRequest {
        recipient_address,
        amount_minor_units,
    })
}

fn parse_recipient(value: Option<&str>) -> Result<Address, PayoutError> {
    let value = value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| PayoutError::InvalidRequest("recipientAddress is required".into()))?;

    let digits = value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .ok_or_else(|| PayoutError::InvalidRequest("recipientAddress must start with 0x".into()))?;

    if digits.len() != 40 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(PayoutError::InvalidRequest(
            "recipientAddress must be 20 bytes of hex".into(),
        ));
    }

    let address = Address::from_str(digits)
        .map_err(|_| PayoutError::InvalidRequest("recipientAddress is not a valid address".into()))?;

    // Mixed case means the sender supplied an EIP-55 checksum; hold them to it.
    let has_lower = digits.chars().any(|c| c.is_ascii_lowercase());
    let has_upper = digits.chars().any(|c| c.is_ascii_uppercase());
    if has_lower && has_upper && to_checksum(&address, None)[2..] != *digits {
        return Err(PayoutError::InvalidRequest(
            "recipientAddress fails its EIP-55 checksum".into(),
        ));
    }

    if address.is_zero() {
        return Err(PayoutError::InvalidRequest(
            "recipientAddress must not be the zero address".into(),
        ));
    }

    Ok(address)
}

fn parse_amount(value: Option<&Value>) -> Result<u64, PayoutError> {
    let value = match value {
        None | Some(Value::Null) => {
            return Err(PayoutError::InvalidRequest("amountMinorUnits is required".into()))
        }
        Some(value) => value,
    };

    let number = match value {
        Value::Number(number) => number,
        _ => {
            return Err(PayoutError::InvalidRequest(
                "amountMinorUnits must be a number".into(),
            ))
        }
    };

    if let Some(amount) = number.as_u64() {
        if amount == 0 {
            return Err(PayoutError::InvalidRequest(
                "amountMinorUnits must be positive".into(),
            ));
        }
        return Ok(amount);
    }

    if number.as_i64().is_some() {
        return Err(PayoutError::InvalidRequest(
            "amountMinorUnits must be positive".into(),
        ));
    }

    // Integral values may still arrive float-encoded (`1000.0`, `1e3`).
    match number.as_f64() {
        Some(f) if !f.is_finite() => Err(PayoutError::InvalidRequest(
            "amountMinorUnits must be a finite number".into(),
        )),
        Some(f) if f <= 0.0 => Err(PayoutError::InvalidRequest(
            "amountMinorUnits must be positive".into(),
        )),
        Some(f) if f.fract() != 0.0 => Err(PayoutError::InvalidRequest(
            "amountMinorUnits must be an integer number of minor units".into(),
        )),
        // 2^64 is the first float past u64::MAX.
        Some(f) if f < 18_446_744_073_709_551_616.0 => Ok(f as u64),
        _ => Err(PayoutError::InvalidRequest(format!(
            "amountMinorUnits must not exceed {}",
            u64::MAX
        ))),
    }
}

/// Caller-supplied idempotency keys: 1-255 visible ASCII characters.
pub fn validate_idempotency_key(key: &str) -> Result<String, PayoutError> {
    let key = key.trim();
    if key.is_empty() || key.len() > MAX_IDEMPOTENCY_KEY_LEN {
        return Err(PayoutError::InvalidRequest(format!(
            "Idempotency-Key must be 1-{} characters",
            MAX_IDEMPOTENCY_KEY_LEN
        )));
    }
    if !key.chars().all(|c| c.is_ascii_graphic()) {
        return Err(PayoutError::InvalidRequest(
            "Idempotency-Key must be printable ASCII".into(),
        ));
    }
    Ok(key.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio_test::{assert_err, assert_ok};

    fn raw(recipient: Option<&str>, amount: Option<Value>) -> RawPayoutRequest {
        RawPayoutRequest {
            recipient_address: recipient.map(str::to_string),
            amount_minor_units: amount,
        }
    }

    const RECIPIENT: &str = "0xABCDEFABCDEFABCDEFABCDEFABCDEFABCDEFABCD";

    #[test]
    fn accepts_well_formed_request() {
        let request = validate_payout_request(&raw(Some(RECIPIENT), Some(json!(1000)))).unwrap();
        assert_eq!(request.amount_minor_units, 1000);
        assert_eq!(request.recipient_address, RECIPIENT.parse::<Address>().unwrap());
    }

    #[test]
    fn rejects_non_positive_amounts() {
        for amount in [json!(0), json!(-5), json!(-0.5)] {
            let err = validate_payout_request(&raw(Some(RECIPIENT), Some(amount.clone()))).unwrap_err();
            assert!(
                matches!(err, PayoutError::InvalidRequest(ref m) if m.contains("positive")),
                "amount {} gave {:?}",
                amount,
                err
            );
        }
    }

    #[test]
    fn rejects_non_integral_or_non_numeric_amounts() {
        for amount in [json!(10.5), json!("1000"), json!(true), json!(null)] {
            assert!(validate_payout_request(&raw(Some(RECIPIENT), Some(amount))).is_err());
        }
        assert!(validate_payout_request(&raw(Some(RECIPIENT), None)).is_err());
    }

    #[test]
    fn accepts_float_encoded_integers() {
        for amount in [json!(1000.0), serde_json::from_str::<Value>("1e3").unwrap()] {
            let request = validate_payout_request(&raw(Some(RECIPIENT), Some(amount))).unwrap();
            assert_eq!(request.amount_minor_units, 1000);
        }
    }

    #[test]
    fn oversized_amounts_are_reported_as_too_large() {
        let huge: Value = serde_json::from_str("18446744073709551616").unwrap();
        let err = validate_payout_request(&raw(Some(RECIPIENT), Some(huge))).unwrap_err();
        assert!(
            matches!(err, PayoutError::InvalidRequest(ref m) if m.contains("exceed")),
            "{:?}",
            err
        );

        let err = validate_payout_request(&raw(Some(RECIPIENT), Some(json!(1e30)))).unwrap_err();
        assert!(matches!(err, PayoutError::InvalidRequest(ref m) if m.contains("exceed")));
    }

    #[test]
    fn rejects_malformed_recipients() {
        let bad = [
            None,
            Some(""),
            Some("ABCDEFABCDEFABCDEFABCDEFABCDEFABCDEFABCD"),
            Some("0xABCDEF"),
            Some("0xZZCDEFABCDEFABCDEFABCDEFABCDEFABCDEFABCD"),
            Some("0x0000000000000000000000000000000000000000"),
        ];
        for recipient in bad {
            assert!(
                validate_payout_request(&raw(recipient, Some(json!(1000)))).is_err(),
                "{:?} should be rejected",
                recipient
            );
        }
    }

    #[test]
    fn enforces_checksum_only_for_mixed_case() {
        let checksummed = "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed";
        let broken = "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAeD";

        assert_ok!(validate_payout_request(&raw(Some(checksummed), Some(json!(1)))));
        assert_ok!(validate_payout_request(&raw(Some(&checksummed.to_lowercase()), Some(json!(1)))));
        assert_err!(validate_payout_request(&raw(Some(broken), Some(json!(1)))));
    }

    #[test]
    fn idempotency_keys_must_be_printable() {
        assert_eq!(validate_idempotency_key(" abc-123 ").unwrap(), "abc-123");
        assert_err!(validate_idempotency_key(""));
        assert_err!(validate_idempotency_key("has space"));
        assert_err!(validate_idempotency_key(&"k".repeat(256)));
    }
}
