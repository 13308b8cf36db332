pub mod flutterwave;
pub mod paystack;

pub use flutterwave::{FlutterwaveConfig, FlutterwaveProvider, FlutterwaveTransaction};
pub use paystack::{PaystackConfig, PaystackProvider, PaystackTransaction};

use crate::payments::types::{ProviderName, VerificationResult};
use rust_decimal::Decimal;
use serde_json::Value as JsonValue;
use std::str::FromStr;

/// Provider-specific verification payloads. Every variant is mapped into the
/// same [`VerificationResult`] so nothing downstream branches on provider shape.
#[derive(Debug, Clone)]
pub enum ProviderTransaction {
    Paystack(PaystackTransaction),
    Flutterwave(FlutterwaveTransaction),
}

impl ProviderTransaction {
    pub fn provider(&self) -> ProviderName {
        match self {
            ProviderTransaction::Paystack(_) => ProviderName::Paystack,
            ProviderTransaction::Flutterwave(_) => ProviderName::Flutterwave,
        }
    }

    pub fn into_verification(self, raw: JsonValue) -> VerificationResult {
        match self {
            ProviderTransaction::Paystack(tx) => tx.normalize(raw),
            ProviderTransaction::Flutterwave(tx) => tx.normalize(raw),
        }
    }
}

/// Reads a decimal that a provider may send as a JSON number or string.
pub(crate) fn decimal_from_json(value: &JsonValue) -> Option<Decimal> {
    match value {
        JsonValue::Number(n) => Decimal::from_str(&n.to_string()).ok(),
        JsonValue::String(s) => Decimal::from_str(s.trim()).ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payments::types::ProviderOutcome;

    #[test]
    fn both_shapes_normalize_to_the_same_result() {
        let paystack_raw = serde_json::json!({
            "id": 4099260516u64,
            "reference": "5f1c3c1e-1111-4b4b-9999-000000000001",
            "status": "success",
            "amount": 10000,
            "currency": "NGN",
            "gateway_response": "Successful"
        });
        let flutterwave_raw = serde_json::json!({
            "id": 288200108,
            "tx_ref": "5f1c3c1e-1111-4b4b-9999-000000000001",
            "flw_ref": "FLW-MOCK-1",
            "status": "successful",
            "amount": 100,
            "currency": "NGN",
            "processor_response": "Approved"
        });

        let paystack: PaystackTransaction =
            serde_json::from_value(paystack_raw.clone()).expect("paystack shape");
        let flutterwave: FlutterwaveTransaction =
            serde_json::from_value(flutterwave_raw.clone()).expect("flutterwave shape");

        let a = ProviderTransaction::Paystack(paystack).into_verification(paystack_raw);
        let b = ProviderTransaction::Flutterwave(flutterwave).into_verification(flutterwave_raw);

        assert_eq!(a.reference, b.reference);
        assert_eq!(a.outcome, ProviderOutcome::Success);
        assert_eq!(b.outcome, ProviderOutcome::Success);
        assert_eq!(a.amount, Some(Decimal::new(10000, 2)));
        assert_eq!(a.amount, b.amount);
        assert_eq!(a.transaction_id.as_deref(), Some("4099260516"));
        assert_eq!(b.transaction_id.as_deref(), Some("288200108"));
    }

    #[test]
    fn decimal_from_json_accepts_numbers_and_strings() {
        assert_eq!(
            decimal_from_json(&serde_json::json!(100.5)),
            Some(Decimal::new(1005, 1))
        );
        assert_eq!(
            decimal_from_json(&serde_json::json!("12.30")),
            Some(Decimal::new(1230, 2))
        );
        assert_eq!(decimal_from_json(&serde_json::json!(null)), None);
    }
}
