use thiserror::Error;

/// Protocol error taxonomy.
///
/// Input-validation and state-conflict variants are rejected synchronously with
/// state unchanged; arithmetic variants always fail hard and must be bounded by
/// callers; collaborator variants abort the whole action.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    // --- input validation ---
    #[error("leverage {0} below the configured minimum")]
    LeverageTooLow(u128),
    #[error("leverage {0} above the configured maximum")]
    LeverageTooHigh(u128),
    #[error("position notional below the configured minimum")]
    PositionTooSmall,
    #[error("close amount exceeds the position amount")]
    CloseAmountTooLarge,
    #[error("liquidation price {liq_price} is not below the current price {current_price}")]
    InvalidLiquidationPrice { liq_price: u128, current_price: u128 },
    #[error("imbalance limit reached ({0} bps)")]
    ImbalanceLimitReached(i128),
    #[error("price timestamp {provided} outside the accepted window (target {target})")]
    PriceTimestampInvalid { provided: u64, target: u64 },
    #[error("zero amount")]
    ZeroAmount,

    // --- state conflicts ---
    #[error("validator already has a pending action")]
    AlreadyPending,
    #[error("no pending action for this validator")]
    NoPendingAction,
    #[error("pending action kind does not match the requested validation")]
    PendingActionMismatch,
    #[error("pending queue is full")]
    QueueFull,
    #[error("position not found")]
    PositionNotFound,
    #[error("position already validated")]
    AlreadyValidated,
    #[error("position not yet validated")]
    PositionNotValidated,
    #[error("caller does not own this position")]
    Unauthorized,
    #[error("protocol not initialized")]
    NotInitialized,
    #[error("protocol already initialized")]
    AlreadyInitialized,

    // --- arithmetic ---
    #[error("arithmetic overflow")]
    ArithmeticOverflow,
    #[error("arithmetic underflow")]
    ArithmeticUnderflow,
    #[error("division by zero")]
    DivisionByZero,
    #[error("quotient does not fit in 256 bits")]
    QuotientOverflow,

    // --- external collaborators ---
    #[error("oracle rejected the request: {0}")]
    OracleFailure(String),
    #[error("insufficient oracle fee: need {needed}, got {provided}")]
    InsufficientFee { needed: u128, provided: u128 },
    #[error("security deposit too low: need {0}")]
    InsufficientSecurityDeposit(u128),
    #[error("insufficient token shares")]
    InsufficientShares,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ProtocolError::InvalidLiquidationPrice {
            liq_price: 2_100,
            current_price: 2_000,
        };
        assert!(err.to_string().contains("2100"));
        assert!(err.to_string().contains("2000"));
    }

    #[test]
    fn test_error_equality() {
        assert_eq!(
            ProtocolError::ArithmeticOverflow,
            ProtocolError::ArithmeticOverflow
        );
        assert_ne!(
            ProtocolError::ArithmeticOverflow,
            ProtocolError::ArithmeticUnderflow
        );
    }
}
