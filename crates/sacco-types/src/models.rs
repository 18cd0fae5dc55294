use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberRole {
    Member,
    Manager,
    Director,
    Admin,
    Founder,
}

impl MemberRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemberRole::Member => "member",
            MemberRole::Manager => "manager",
            MemberRole::Director => "director",
            MemberRole::Admin => "admin",
            MemberRole::Founder => "founder",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "member" => Some(MemberRole::Member),
            "manager" => Some(MemberRole::Manager),
            "director" => Some(MemberRole::Director),
            "admin" => Some(MemberRole::Admin),
            "founder" => Some(MemberRole::Founder),
            _ => None,
        }
    }

    /// Directors, admins and founders receive default/liquidation notices.
    pub fn is_governance(&self) -> bool {
        matches!(
            self,
            MemberRole::Director | MemberRole::Admin | MemberRole::Founder
        )
    }
}

impl fmt::Display for MemberRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoanStatus {
    Pending,
    ApprovedManager,
    Approved,
    Rejected,
    Disbursed,
    Active,
    Completed,
    Defaulted,
}

impl LoanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoanStatus::Pending => "pending",
            LoanStatus::ApprovedManager => "approved_manager",
            LoanStatus::Approved => "approved",
            LoanStatus::Rejected => "rejected",
            LoanStatus::Disbursed => "disbursed",
            LoanStatus::Active => "active",
            LoanStatus::Completed => "completed",
            LoanStatus::Defaulted => "defaulted",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(LoanStatus::Pending),
            "approved_manager" => Some(LoanStatus::ApprovedManager),
            "approved" => Some(LoanStatus::Approved),
            "rejected" => Some(LoanStatus::Rejected),
            "disbursed" => Some(LoanStatus::Disbursed),
            "active" => Some(LoanStatus::Active),
            "completed" => Some(LoanStatus::Completed),
            "defaulted" => Some(LoanStatus::Defaulted),
            _ => None,
        }
    }

    /// Statuses that still carry an outstanding principal against the
    /// borrower's credit limit.
    pub fn counts_against_credit(&self) -> bool {
        matches!(
            self,
            LoanStatus::Disbursed | LoanStatus::Active | LoanStatus::Defaulted
        )
    }
}

impl fmt::Display for LoanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStage {
    PendingManager,
    PendingDirector,
    Approved,
    Rejected,
}

impl ApprovalStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalStage::PendingManager => "pending_manager",
            ApprovalStage::PendingDirector => "pending_director",
            ApprovalStage::Approved => "approved",
            ApprovalStage::Rejected => "rejected",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending_manager" => Some(ApprovalStage::PendingManager),
            "pending_director" => Some(ApprovalStage::PendingDirector),
            "approved" => Some(ApprovalStage::Approved),
            "rejected" => Some(ApprovalStage::Rejected),
            _ => None,
        }
    }
}

impl fmt::Display for ApprovalStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepaymentStatus {
    Due,
    Paid,
    Overdue,
}

impl RepaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RepaymentStatus::Due => "due",
            RepaymentStatus::Paid => "paid",
            RepaymentStatus::Overdue => "overdue",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "due" => Some(RepaymentStatus::Due),
            "paid" => Some(RepaymentStatus::Paid),
            "overdue" => Some(RepaymentStatus::Overdue),
            _ => None,
        }
    }
}

impl fmt::Display for RepaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuaranteeStatus {
    Pending,
    Active,
    Released,
    Called,
    Rejected,
}

impl GuaranteeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            GuaranteeStatus::Pending => "pending",
            GuaranteeStatus::Active => "active",
            GuaranteeStatus::Released => "released",
            GuaranteeStatus::Called => "called",
            GuaranteeStatus::Rejected => "rejected",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(GuaranteeStatus::Pending),
            "active" => Some(GuaranteeStatus::Active),
            "released" => Some(GuaranteeStatus::Released),
            "called" => Some(GuaranteeStatus::Called),
            "rejected" => Some(GuaranteeStatus::Rejected),
            _ => None,
        }
    }
}

impl fmt::Display for GuaranteeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalAction {
    Approved,
    Rejected,
    Forwarded,
    Commented,
}

impl ApprovalAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalAction::Approved => "approved",
            ApprovalAction::Rejected => "rejected",
            ApprovalAction::Forwarded => "forwarded",
            ApprovalAction::Commented => "commented",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "approved" => Some(ApprovalAction::Approved),
            "rejected" => Some(ApprovalAction::Rejected),
            "forwarded" => Some(ApprovalAction::Forwarded),
            "commented" => Some(ApprovalAction::Commented),
            _ => None,
        }
    }
}

impl fmt::Display for ApprovalAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationCategory {
    Info,
    LoanApproved,
    LoanRejected,
    LoanDefaulted,
    GuaranteeRequest,
    GuaranteeCalled,
    PaymentDue,
}

impl NotificationCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationCategory::Info => "info",
            NotificationCategory::LoanApproved => "loan_approved",
            NotificationCategory::LoanRejected => "loan_rejected",
            NotificationCategory::LoanDefaulted => "loan_defaulted",
            NotificationCategory::GuaranteeRequest => "guarantee_request",
            NotificationCategory::GuaranteeCalled => "guarantee_called",
            NotificationCategory::PaymentDue => "payment_due",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "info" => Some(NotificationCategory::Info),
            "loan_approved" => Some(NotificationCategory::LoanApproved),
            "loan_rejected" => Some(NotificationCategory::LoanRejected),
            "loan_defaulted" => Some(NotificationCategory::LoanDefaulted),
            "guarantee_request" => Some(NotificationCategory::GuaranteeRequest),
            "guarantee_called" => Some(NotificationCategory::GuaranteeCalled),
            "payment_due" => Some(NotificationCategory::PaymentDue),
            _ => None,
        }
    }
}

impl fmt::Display for NotificationCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContributionFrequency {
    Daily,
    Monthly,
}

impl ContributionFrequency {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContributionFrequency::Daily => "daily",
            ContributionFrequency::Monthly => "monthly",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "daily" => Some(ContributionFrequency::Daily),
            "monthly" => Some(ContributionFrequency::Monthly),
            _ => None,
        }
    }
}

impl fmt::Display for ContributionFrequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WalletTxKind {
    LoanDisbursement,
    LoanRepayment,
    InterestCredit,
    GuarantorInterest,
    ContributionDeposit,
}

impl WalletTxKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            WalletTxKind::LoanDisbursement => "loan_disbursement",
            WalletTxKind::LoanRepayment => "loan_repayment",
            WalletTxKind::InterestCredit => "interest_credit",
            WalletTxKind::GuarantorInterest => "guarantor_interest",
            WalletTxKind::ContributionDeposit => "contribution_deposit",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "loan_disbursement" => Some(WalletTxKind::LoanDisbursement),
            "loan_repayment" => Some(WalletTxKind::LoanRepayment),
            "interest_credit" => Some(WalletTxKind::InterestCredit),
            "guarantor_interest" => Some(WalletTxKind::GuarantorInterest),
            "contribution_deposit" => Some(WalletTxKind::ContributionDeposit),
            _ => None,
        }
    }
}

impl fmt::Display for WalletTxKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A loan belongs to exactly one borrower: either a registered member or a
/// named guest (non-member). Guest loans may carry a sponsoring member who
/// earns the guarantor interest share.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Borrower {
    Member(Uuid),
    Guest {
        name: String,
        sponsor: Option<Uuid>,
    },
}

impl Borrower {
    pub fn member_id(&self) -> Option<Uuid> {
        match self {
            Borrower::Member(id) => Some(*id),
            Borrower::Guest { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Member {
    pub id: Uuid,
    pub name: String,
    pub role: MemberRole,
    pub pool_id: Option<Uuid>,
    pub is_suspended: bool,
    pub joined_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pool {
    pub id: Uuid,
    pub name: String,
    pub contribution_amount: Decimal,
    pub frequency: ContributionFrequency,
    pub member_limit: u32,
    pub is_locked: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShareAccount {
    pub member_id: Uuid,
    pub units: i64,
    pub unit_price: Decimal,
}

impl ShareAccount {
    /// Derived, never stored: `units × unit_price`.
    pub fn total_value(&self) -> Decimal {
        Decimal::from(self.units) * self.unit_price
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShareLock {
    pub id: Uuid,
    pub member_id: Uuid,
    pub guarantee_id: Uuid,
    pub locked_units: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoanType {
    pub id: Uuid,
    pub name: String,
    /// Annual rate as a percentage, e.g. `10` for 10% p.a.
    pub interest_rate: Decimal,
    pub min_amount: Decimal,
    pub max_amount: Decimal,
    pub max_term_months: u32,
    pub is_for_non_member: bool,
    pub institution_share: Decimal,
    pub guarantor_share: Decimal,
    pub member_share: Decimal,
}

impl LoanType {
    /// For guest loan types the three-way split must cover the whole rate.
    pub fn split_is_consistent(&self) -> bool {
        if !self.is_for_non_member {
            return true;
        }
        self.institution_share + self.guarantor_share + self.member_share == self.interest_rate
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Loan {
    pub id: Uuid,
    /// Human-facing identifier, unique, e.g. `LN-17096412345678`.
    pub loan_id: String,
    pub borrower: Borrower,
    pub loan_type_id: Uuid,
    pub amount_applied: Decimal,
    pub amount_approved: Option<Decimal>,
    pub term_months: u32,
    pub status: LoanStatus,
    pub approval_stage: ApprovalStage,
    pub outstanding_principal: Option<Decimal>,
    pub monthly_payment: Option<Decimal>,
    pub application_date: DateTime<Utc>,
    pub approval_deadline: DateTime<Utc>,
    pub disbursement_date: Option<DateTime<Utc>>,
    pub next_repayment_date: Option<NaiveDate>,
    pub last_repayment_date: Option<NaiveDate>,
    pub is_defaulted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoanRepayment {
    pub id: Uuid,
    pub loan_id: Uuid,
    /// 1-based position in the schedule.
    pub seq: u32,
    pub principal: Decimal,
    pub interest: Decimal,
    pub amount: Decimal,
    pub due_date: NaiveDate,
    pub status: RepaymentStatus,
    pub transaction_id: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
}

/// One line of a generated schedule, before persistence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Installment {
    pub seq: u32,
    pub due_date: NaiveDate,
    pub principal: Decimal,
    pub interest: Decimal,
    pub amount: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Guarantee {
    pub id: Uuid,
    pub loan_id: Uuid,
    pub guarantor_id: Uuid,
    pub amount_guaranteed: Decimal,
    pub status: GuaranteeStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoanApprovalLog {
    pub id: Uuid,
    pub loan_id: Uuid,
    pub approver_id: Option<Uuid>,
    pub action: ApprovalAction,
    pub comments: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub user_id: Uuid,
    pub title: String,
    pub message: String,
    pub category: NotificationCategory,
    pub related_entity: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Wallet {
    pub id: Uuid,
    /// `None` marks the institution's own wallet.
    pub member_id: Option<Uuid>,
    pub balance: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletTransaction {
    pub id: Uuid,
    pub wallet_id: Uuid,
    pub kind: WalletTxKind,
    pub amount: Decimal,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterestDistribution {
    pub id: Uuid,
    pub repayment_id: Uuid,
    /// `None` for the institution's share.
    pub member_id: Option<Uuid>,
    pub is_institution_share: bool,
    pub amount: Decimal,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contribution {
    pub id: Uuid,
    pub member_id: Uuid,
    pub amount: Decimal,
    pub date: NaiveDate,
}
