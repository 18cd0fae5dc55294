use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

use sacco_types::models::{ApprovalStage, GuaranteeStatus, LoanStatus, MemberRole};

pub type EngineResult<T> = Result<T, EngineError>;

/// Engine error taxonomy.
///
/// Validation variants are user-correctable and always leave the database
/// untouched (the surrounding transaction rolls back). `Integrity` marks
/// data inconsistencies flagged for operator review; `Storage` wraps
/// everything below the domain layer.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("amount {amount} outside {min}..={max} for loan type '{loan_type}'")]
    AmountOutOfRange {
        amount: Decimal,
        min: Decimal,
        max: Decimal,
        loan_type: String,
    },

    #[error("term of {term_months} months exceeds maximum {max_term_months} for loan type '{loan_type}'")]
    TermOutOfRange {
        term_months: u32,
        max_term_months: u32,
        loan_type: String,
    },

    #[error("credit limit exceeded: requested {requested}, available {available}")]
    CreditLimitExceeded {
        requested: Decimal,
        available: Decimal,
    },

    #[error("insufficient guarantor capacity: requested {requested}, available {available}")]
    InsufficientGuarantorCapacity {
        requested: Decimal,
        available: Decimal,
    },

    #[error("borrower {0} is suspended")]
    BorrowerSuspended(Uuid),

    #[error("a loan needs exactly one borrower: a member or a named guest")]
    MissingBorrower,

    #[error("member {member_id} ({role}) may not perform this approval")]
    UnauthorizedApprover { member_id: Uuid, role: MemberRole },

    #[error("loan {loan_id} is at stage '{stage}', expected '{expected}'")]
    WrongStage {
        loan_id: String,
        stage: ApprovalStage,
        expected: ApprovalStage,
    },

    #[error("loan {loan_id} has status '{status}', expected '{expected}'")]
    WrongStatus {
        loan_id: String,
        status: LoanStatus,
        expected: LoanStatus,
    },

    #[error("guarantee {guarantee_id} is '{status}', only pending guarantees can be answered")]
    GuaranteeNotPending {
        guarantee_id: Uuid,
        status: GuaranteeStatus,
    },

    #[error("insufficient unlocked shares: need {needed} units, {available} available")]
    InsufficientUnlockedShares { needed: i64, available: i64 },

    #[error("pool '{pool}' is full or locked")]
    PoolFull { pool: String },

    #[error("duplicate payment transaction '{0}'")]
    DuplicateTransaction(String),

    #[error("payment reference '{0}' matches no loan or member")]
    UnmatchedPayment(String),

    #[error("payment amount {received} does not match installment amount {expected}")]
    InstallmentAmountMismatch {
        expected: Decimal,
        received: Decimal,
    },

    #[error("loan '{0}' not found")]
    LoanNotFound(String),

    #[error("loan type {0} not found")]
    LoanTypeNotFound(Uuid),

    #[error("member {0} not found")]
    MemberNotFound(Uuid),

    #[error("guarantee {0} not found")]
    GuaranteeNotFound(Uuid),

    #[error("pool {0} not found")]
    PoolNotFound(Uuid),

    #[error("data integrity anomaly: {0}")]
    Integrity(String),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl EngineError {
    /// Validation errors are safe to show to the submitting user verbatim.
    pub fn is_validation(&self) -> bool {
        !matches!(self, EngineError::Integrity(_) | EngineError::Storage(_))
    }
}
