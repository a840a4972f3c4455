use crate::domain::emv3ds::Emv3ds;
use crate::error::{PaymentError, Result};
use rand::Rng;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Largest amount the gateway accepts, in minor units.
pub const MAX_AMOUNT: u64 = 999_999_999_999;

const ORDER_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

fn invalid(field: &'static str, reason: impl Into<String>) -> PaymentError {
    PaymentError::Validation {
        field,
        reason: reason.into(),
    }
}

/// Trims `value` and checks it is made of `min..=max` ASCII digits.
fn digits(field: &'static str, value: &str, min: usize, max: usize) -> Result<String> {
    let value = value.trim();
    if value.len() < min || value.len() > max {
        return Err(invalid(
            field,
            format!("expected {min} to {max} digits, got {} characters", value.len()),
        ));
    }
    if !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid(field, "only digits are allowed"));
    }
    Ok(value.to_string())
}

/// Transaction amount in minor currency units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Amount(u64);

impl Amount {
    pub fn from_minor(value: u64) -> Result<Self> {
        if value == 0 || value > MAX_AMOUNT {
            return Err(invalid(
                "amount",
                format!("must be between 1 and {MAX_AMOUNT} minor units"),
            ));
        }
        Ok(Self(value))
    }

    /// Converts a major-unit amount (e.g. euros) to minor units, rounding half up.
    pub fn from_major(value: Decimal) -> Result<Self> {
        let cents = (value * Decimal::ONE_HUNDRED)
            .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);
        let cents = cents
            .to_u64()
            .ok_or_else(|| invalid("amount", format!("{value} is not a positive amount")))?;
        Self::from_minor(cents)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// ISO-4217 numeric currency code. Always rendered with three digits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Currency(u16);

impl Currency {
    pub const EUR: Self = Self(978);

    pub fn new(code: u16) -> Result<Self> {
        if !(1..=999).contains(&code) {
            return Err(invalid("currency", "must be between 1 and 999"));
        }
        Ok(Self(code))
    }

    pub fn code(&self) -> u16 {
        self.0
    }
}

impl Default for Currency {
    fn default() -> Self {
        Self::EUR
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:03}", self.0)
    }
}

macro_rules! string_value {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = PaymentError;

            fn from_str(s: &str) -> Result<Self> {
                Self::new(s)
            }
        }
    };
}

string_value!(
    /// Merchant code (FUC), 1 to 9 digits. Leading zeros are significant.
    MerchantCode
);
string_value!(
    /// Order identifier, 4 to 12 alphanumeric characters.
    OrderId
);
string_value!(
    /// Terminal number, exactly 3 digits.
    Terminal
);
string_value!(
    /// One-digit transaction type (`0` = authorization).
    TransactionType
);

impl MerchantCode {
    pub fn new(value: &str) -> Result<Self> {
        digits("merchant_code", value, 1, 9).map(Self)
    }
}

impl Terminal {
    pub fn new(value: &str) -> Result<Self> {
        digits("terminal", value, 3, 3).map(Self)
    }
}

impl TransactionType {
    pub const AUTHORIZATION: &'static str = "0";

    pub fn new(value: &str) -> Result<Self> {
        digits("transaction_type", value, 1, 1).map(Self)
    }

    pub fn authorization() -> Self {
        Self(Self::AUTHORIZATION.to_string())
    }
}

impl OrderId {
    pub fn new(value: &str) -> Result<Self> {
        let value = value.trim();
        if !(4..=12).contains(&value.len()) {
            return Err(invalid("order", "expected 4 to 12 characters"));
        }
        if !value.bytes().all(|b| b.is_ascii_alphanumeric()) {
            return Err(invalid("order", "only letters and digits are allowed"));
        }
        Ok(Self(value.to_string()))
    }

    /// Generates an order id: four digits from the millisecond clock, then a
    /// random uppercase alphanumeric tail up to `length`.
    pub fn generate(length: usize) -> Result<Self> {
        if !(4..=12).contains(&length) {
            return Err(invalid("order", "length must be between 4 and 12"));
        }
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        let mut rng = rand::thread_rng();
        let tail: String = (4..length)
            .map(|_| ORDER_ALPHABET[rng.gen_range(0..ORDER_ALPHABET.len())] as char)
            .collect();
        Ok(Self(format!("{:04}{tail}", millis % 10_000)))
    }
}

/// Card number, expiry and CVV. The number and CVV never show up in `Debug`.
#[derive(Clone)]
pub struct CardData {
    pan: SecretString,
    expiry_date: String,
    cvv2: SecretString,
}

impl CardData {
    /// `expiry_date` is `MMYY`, the format the gateway expects.
    pub fn new(pan: &str, expiry_date: &str, cvv2: &str) -> Result<Self> {
        let pan = digits("card_number", pan, 12, 19)?;
        let expiry_date = digits("expiry_date", expiry_date, 4, 4)?;
        let month: u8 = expiry_date[..2]
            .parse()
            .map_err(|_| invalid("expiry_date", "month is not a number"))?;
        if !(1..=12).contains(&month) {
            return Err(invalid("expiry_date", "month must be between 01 and 12"));
        }
        let cvv2 = digits("cvv2", cvv2, 3, 4)?;
        Ok(Self {
            pan: SecretString::from(pan),
            expiry_date,
            cvv2: SecretString::from(cvv2),
        })
    }

    pub fn pan(&self) -> &str {
        self.pan.expose_secret()
    }

    pub fn expiry_date(&self) -> &str {
        &self.expiry_date
    }

    pub fn cvv2(&self) -> &str {
        self.cvv2.expose_secret()
    }

    /// Last four digits, safe to log.
    pub fn last4(&self) -> &str {
        let pan = self.pan.expose_secret();
        &pan[pan.len() - 4..]
    }
}

impl fmt::Debug for CardData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CardData")
            .field("pan", &format_args!("****{}", self.last4()))
            .field("expiry_date", &self.expiry_date)
            .field("cvv2", &"***")
            .finish()
    }
}

/// Card and 3DS data attached to a request.
#[derive(Debug, Clone)]
pub struct CardBlock {
    pub card: CardData,
    pub emv3ds: Option<Emv3ds>,
    /// Asks the gateway to report which SCA exemptions apply.
    pub exception_sca: bool,
}

/// The merchant parameters signed into every gateway request.
#[derive(Debug, Clone)]
pub struct MerchantParameters {
    pub amount: Amount,
    pub currency: Currency,
    pub merchant_code: MerchantCode,
    pub order: OrderId,
    pub terminal: Terminal,
    pub transaction_type: TransactionType,
    pub card: Option<CardBlock>,
}

impl MerchantParameters {
    pub fn new(
        amount: Amount,
        currency: Currency,
        merchant_code: MerchantCode,
        order: OrderId,
        terminal: Terminal,
        transaction_type: TransactionType,
    ) -> Self {
        Self {
            amount,
            currency,
            merchant_code,
            order,
            terminal,
            transaction_type,
            card: None,
        }
    }

    pub fn with_card(mut self, card: CardBlock) -> Self {
        self.card = Some(card);
        self
    }
}
