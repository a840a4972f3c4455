use crate::interfaces::rest::client::TransportError;
use std::fmt;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, PaymentError>;

/// The protocol step an error was raised in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    IniciaPeticion,
    ThreeDsMethod,
    Authentication,
    ChallengeResponse,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Step::IniciaPeticion => "iniciaPeticion",
            Step::ThreeDsMethod => "threeDSMethod",
            Step::Authentication => "authentication",
            Step::ChallengeResponse => "challengeResponse",
        })
    }
}

#[derive(Error, Debug)]
pub enum PaymentError {
    #[error("invalid {field}: {reason}")]
    Validation { field: &'static str, reason: String },
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("transport failure during {step} for order {order}")]
    Transport {
        step: Step,
        order: String,
        #[source]
        source: TransportError,
    },
    #[error("could not encode {step} request for order {order}: {reason}")]
    Encoding {
        step: Step,
        order: String,
        reason: String,
    },
    #[error("unexpected gateway response during {step} for order {order}: {reason}")]
    Decoding {
        step: Step,
        order: String,
        reason: String,
    },
    #[error("gateway response signature mismatch during {step} for order {order}")]
    InvalidSignature { step: Step, order: String },
    #[error("{step} cannot run from state {state}")]
    InvalidState { step: Step, state: &'static str },
    #[error("no challenge response received yet for order {order} (transaction {trans_id})")]
    ChallengePending { order: String, trans_id: String },
    #[error("notification store error: {0}")]
    Store(String),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}
