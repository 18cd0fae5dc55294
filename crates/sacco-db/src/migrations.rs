use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

/// Fixed id of the institution's own wallet, seeded at migration time.
pub const INSTITUTION_WALLET_ID: &str = "00000000-0000-0000-0000-000000000001";

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS pools (
            id                   TEXT PRIMARY KEY,
            name                 TEXT NOT NULL UNIQUE,
            contribution_amount  TEXT NOT NULL,
            frequency            TEXT NOT NULL,
            member_limit         INTEGER NOT NULL,
            is_locked            INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS members (
            id            TEXT PRIMARY KEY,
            name          TEXT NOT NULL,
            role          TEXT NOT NULL DEFAULT 'member',
            pool_id       TEXT REFERENCES pools(id),
            is_suspended  INTEGER NOT NULL DEFAULT 0,
            joined_at     TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS share_accounts (
            member_id   TEXT PRIMARY KEY REFERENCES members(id),
            units       INTEGER NOT NULL DEFAULT 0,
            unit_price  TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS loan_types (
            id                 TEXT PRIMARY KEY,
            name               TEXT NOT NULL UNIQUE,
            interest_rate      TEXT NOT NULL,
            min_amount         TEXT NOT NULL,
            max_amount         TEXT NOT NULL,
            max_term_months    INTEGER NOT NULL,
            is_for_non_member  INTEGER NOT NULL DEFAULT 0,
            institution_share  TEXT NOT NULL DEFAULT '0',
            guarantor_share    TEXT NOT NULL DEFAULT '0',
            member_share       TEXT NOT NULL DEFAULT '0'
        );

        CREATE TABLE IF NOT EXISTS loans (
            id                     TEXT PRIMARY KEY,
            loan_id                TEXT NOT NULL UNIQUE,
            member_id              TEXT REFERENCES members(id),
            guest_name             TEXT,
            sponsor_id             TEXT REFERENCES members(id),
            loan_type_id           TEXT NOT NULL REFERENCES loan_types(id),
            amount_applied         TEXT NOT NULL,
            amount_approved        TEXT,
            term_months            INTEGER NOT NULL,
            status                 TEXT NOT NULL,
            approval_stage         TEXT NOT NULL,
            outstanding_principal  TEXT,
            monthly_payment        TEXT,
            application_date       TEXT NOT NULL,
            approval_deadline      TEXT NOT NULL,
            disbursement_date      TEXT,
            next_repayment_date    TEXT,
            last_repayment_date    TEXT,
            is_defaulted           INTEGER NOT NULL DEFAULT 0,
            -- exactly one borrower: member or named guest
            CHECK ((member_id IS NULL) != (guest_name IS NULL))
        );

        CREATE INDEX IF NOT EXISTS idx_loans_status
            ON loans(status);
        CREATE INDEX IF NOT EXISTS idx_loans_member
            ON loans(member_id);

        CREATE TABLE IF NOT EXISTS loan_repayments (
            id              TEXT PRIMARY KEY,
            loan_id         TEXT NOT NULL REFERENCES loans(id),
            seq             INTEGER NOT NULL,
            principal       TEXT NOT NULL,
            interest        TEXT NOT NULL,
            amount          TEXT NOT NULL,
            due_date        TEXT NOT NULL,
            status          TEXT NOT NULL,
            transaction_id  TEXT UNIQUE,
            paid_at         TEXT,
            UNIQUE(loan_id, seq)
        );

        CREATE INDEX IF NOT EXISTS idx_repayments_loan_due
            ON loan_repayments(loan_id, due_date);

        CREATE TABLE IF NOT EXISTS guarantees (
            id                 TEXT PRIMARY KEY,
            loan_id            TEXT NOT NULL REFERENCES loans(id),
            guarantor_id       TEXT NOT NULL REFERENCES members(id),
            amount_guaranteed  TEXT NOT NULL,
            status             TEXT NOT NULL,
            created_at         TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_guarantees_loan
            ON guarantees(loan_id);
        CREATE INDEX IF NOT EXISTS idx_guarantees_guarantor
            ON guarantees(guarantor_id);

        CREATE TABLE IF NOT EXISTS share_locks (
            id            TEXT PRIMARY KEY,
            member_id     TEXT NOT NULL REFERENCES members(id),
            guarantee_id  TEXT NOT NULL UNIQUE REFERENCES guarantees(id),
            locked_units  INTEGER NOT NULL,
            created_at    TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_share_locks_member
            ON share_locks(member_id);

        -- append-only audit trail
        CREATE TABLE IF NOT EXISTS loan_approval_logs (
            id           TEXT PRIMARY KEY,
            loan_id      TEXT NOT NULL REFERENCES loans(id),
            approver_id  TEXT REFERENCES members(id),
            action       TEXT NOT NULL,
            comments     TEXT NOT NULL DEFAULT '',
            timestamp    TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS notifications (
            id              TEXT PRIMARY KEY,
            user_id         TEXT NOT NULL REFERENCES members(id),
            title           TEXT NOT NULL,
            message         TEXT NOT NULL,
            category        TEXT NOT NULL,
            related_entity  TEXT,
            created_at      TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_notifications_user
            ON notifications(user_id, created_at);

        CREATE TABLE IF NOT EXISTS wallets (
            id         TEXT PRIMARY KEY,
            member_id  TEXT UNIQUE REFERENCES members(id),
            balance    TEXT NOT NULL DEFAULT '0'
        );

        CREATE TABLE IF NOT EXISTS wallet_transactions (
            id           TEXT PRIMARY KEY,
            wallet_id    TEXT NOT NULL REFERENCES wallets(id),
            kind         TEXT NOT NULL,
            amount       TEXT NOT NULL,
            description  TEXT NOT NULL,
            created_at   TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_wallet_tx_wallet
            ON wallet_transactions(wallet_id, created_at);

        CREATE TABLE IF NOT EXISTS interest_distributions (
            id                    TEXT PRIMARY KEY,
            repayment_id          TEXT NOT NULL REFERENCES loan_repayments(id),
            member_id             TEXT REFERENCES members(id),
            is_institution_share  INTEGER NOT NULL DEFAULT 0,
            amount                TEXT NOT NULL,
            created_at            TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS contributions (
            id         TEXT PRIMARY KEY,
            member_id  TEXT NOT NULL REFERENCES members(id),
            amount     TEXT NOT NULL,
            date       TEXT NOT NULL
        );

        -- inbound mobile-money confirmations; unique transaction id makes
        -- webhook replays a clean duplicate rejection
        CREATE TABLE IF NOT EXISTS payment_confirmations (
            id               TEXT PRIMARY KEY,
            transaction_id   TEXT NOT NULL UNIQUE,
            amount           TEXT NOT NULL,
            payer_reference  TEXT NOT NULL,
            received_at      TEXT NOT NULL
        );

        -- Seed the institution wallet
        INSERT OR IGNORE INTO wallets (id, member_id, balance)
            VALUES ('00000000-0000-0000-0000-000000000001', NULL, '0');
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
