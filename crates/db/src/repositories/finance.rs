use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::SqliteRow;
use tracing::info;

use gestflow_core::domain::catalog::validate_name;
use gestflow_core::domain::finance::{
    ensure_positive_amount, CancelPolicy, OriginType, Payable, PayableId, Payment,
    PaymentDirection, PaymentId, PaymentMethod, PaymentOrigin, PaymentRequest, Receivable,
    ReceivableId, Settlement, SettlementStatus,
};
use gestflow_core::domain::sale::{SaleId, SaleStatus};
use gestflow_core::domain::tenancy::{CompanyId, UserId};
use gestflow_core::errors::{ApplicationError, DomainError};

use super::{
    column, date_column, decimal_column, enum_column, format_date, timestamp_column,
    RepositoryError,
};
use crate::gateway::{Gateway, TxHandle};
use crate::repositories::sale::{load_sale, set_sale_status};
use crate::repositories::tenancy::{ensure_company, ensure_member};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewPayable {
    pub supplier_name: String,
    pub description: Option<String>,
    pub due_date: NaiveDate,
    pub total: Decimal,
}

/// Receivables, payables and the payments applied to them.
#[derive(Clone)]
pub struct FinancialLedger {
    gateway: Gateway,
}

#[derive(Clone, Copy)]
enum TitleKind {
    Receivable,
    Payable,
}

impl TitleKind {
    fn table(self) -> &'static str {
        match self {
            Self::Receivable => "accounts_receivable",
            Self::Payable => "accounts_payable",
        }
    }

    fn entity(self) -> &'static str {
        match self {
            Self::Receivable => "receivable",
            Self::Payable => "payable",
        }
    }
}

impl FinancialLedger {
    pub fn new(gateway: Gateway) -> Self {
        Self { gateway }
    }

    /// Opens a receivable for a sale. A sale carries at most one live receivable.
    pub async fn open_receivable(
        &self,
        company_id: CompanyId,
        sale_id: SaleId,
        due_date: NaiveDate,
        total: Decimal,
    ) -> Result<Receivable, ApplicationError> {
        Settlement::open(total)?;
        let receivable = self
            .gateway
            .with_transaction(move |tx| {
                Box::pin(async move {
                    let sale = load_sale(tx, company_id, sale_id).await?;
                    if sale.status != SaleStatus::Open {
                        return Err(DomainError::InvalidState(format!(
                            "sale {} is {}; only open sales take a receivable",
                            sale.code,
                            sale.status.as_str()
                        ))
                        .into());
                    }
                    if sale_direct_paid(tx, company_id, sale_id).await? > Decimal::ZERO {
                        return Err(DomainError::InvalidState(format!(
                            "sale {} is already being paid directly",
                            sale.code
                        ))
                        .into());
                    }
                    if live_receivable_for_sale(tx, company_id, sale_id).await?.is_some() {
                        return Err(DomainError::Conflict(format!(
                            "sale {} already has an open receivable",
                            sale.code
                        ))
                        .into());
                    }
                    insert_receivable(tx, company_id, sale_id, due_date, total, Utc::now()).await
                })
            })
            .await?;

        info!(
            event_name = "finance.receivable_opened",
            company_id = company_id.0,
            receivable_id = receivable.id.0,
            sale_id = sale_id.0,
            total = %total,
            "receivable opened"
        );
        Ok(receivable)
    }

    pub async fn open_payable(
        &self,
        company_id: CompanyId,
        new_payable: NewPayable,
    ) -> Result<Payable, ApplicationError> {
        let settlement = Settlement::open(new_payable.total)?;
        let supplier_name = validate_name(&new_payable.supplier_name)?;
        let description = new_payable
            .description
            .map(|description| description.trim().to_string())
            .filter(|description| !description.is_empty());
        let due_date = new_payable.due_date;

        let payable = self
            .gateway
            .with_transaction(move |tx| {
                Box::pin(async move {
                    ensure_company(tx, company_id).await?;
                    let created_at = Utc::now();
                    let result = tx
                        .execute(
                            sqlx::query(
                                "INSERT INTO accounts_payable
                                    (company_id, supplier_name, description, status, due_date,
                                     total, paid_total, created_at)
                                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
                            )
                            .bind(company_id.0)
                            .bind(&supplier_name)
                            .bind(&description)
                            .bind(settlement.status.as_str())
                            .bind(format_date(due_date))
                            .bind(settlement.total.to_string())
                            .bind(settlement.paid_total.to_string())
                            .bind(created_at.to_rfc3339()),
                        )
                        .await?;
                    Ok(Payable {
                        id: PayableId(result.last_insert_rowid()),
                        company_id,
                        supplier_name,
                        description,
                        settlement,
                        due_date,
                        created_at,
                    })
                })
            })
            .await?;

        info!(
            event_name = "finance.payable_opened",
            company_id = company_id.0,
            payable_id = payable.id.0,
            total = %payable.settlement.total,
            "payable opened"
        );
        Ok(payable)
    }

    /// Records a payment and applies it to its origin. Overpayments are rejected and leave the
    /// origin untouched.
    pub async fn apply_payment(
        &self,
        company_id: CompanyId,
        request: PaymentRequest,
    ) -> Result<Payment, ApplicationError> {
        ensure_positive_amount(request.amount)?;
        let payment = self
            .gateway
            .with_transaction(move |tx| {
                Box::pin(async move {
                    ensure_company(tx, company_id).await?;
                    ensure_member(tx, company_id, request.created_by).await?;
                    match request.origin {
                        PaymentOrigin::Receivable { id } => {
                            settle_title(tx, company_id, TitleKind::Receivable, id.0, request.amount)
                                .await?;
                        }
                        PaymentOrigin::Payable { id } => {
                            settle_title(tx, company_id, TitleKind::Payable, id.0, request.amount)
                                .await?;
                        }
                        PaymentOrigin::SaleDirect { id } => {
                            settle_sale_directly(tx, company_id, id, request.amount).await?;
                        }
                        PaymentOrigin::Manual { .. } => {}
                    }
                    insert_payment(tx, company_id, &request).await
                })
            })
            .await?;

        info!(
            event_name = "finance.payment_applied",
            company_id = company_id.0,
            payment_id = payment.id.0,
            origin_type = payment.origin_type.as_str(),
            origin_id = payment.origin_id,
            direction = payment.direction.as_str(),
            amount = %payment.amount,
            "payment applied"
        );
        Ok(payment)
    }

    pub async fn cancel_receivable(
        &self,
        company_id: CompanyId,
        receivable_id: ReceivableId,
        policy: CancelPolicy,
    ) -> Result<Receivable, ApplicationError> {
        let receivable = self
            .gateway
            .with_transaction(move |tx| {
                Box::pin(async move {
                    let mut receivable = load_receivable(tx, company_id, receivable_id).await?;
                    let cancelled = receivable.settlement.cancel(policy)?;
                    write_settlement(
                        tx,
                        company_id,
                        TitleKind::Receivable,
                        receivable_id.0,
                        &receivable.settlement,
                        &cancelled,
                    )
                    .await?;
                    receivable.settlement = cancelled;
                    Ok(receivable)
                })
            })
            .await?;

        info!(
            event_name = "finance.receivable_cancelled",
            company_id = company_id.0,
            receivable_id = receivable_id.0,
            paid_total = %receivable.settlement.paid_total,
            "receivable cancelled"
        );
        Ok(receivable)
    }

    pub async fn cancel_payable(
        &self,
        company_id: CompanyId,
        payable_id: PayableId,
        policy: CancelPolicy,
    ) -> Result<Payable, ApplicationError> {
        let payable = self
            .gateway
            .with_transaction(move |tx| {
                Box::pin(async move {
                    let mut payable = load_payable(tx, company_id, payable_id).await?;
                    let cancelled = payable.settlement.cancel(policy)?;
                    write_settlement(
                        tx,
                        company_id,
                        TitleKind::Payable,
                        payable_id.0,
                        &payable.settlement,
                        &cancelled,
                    )
                    .await?;
                    payable.settlement = cancelled;
                    Ok(payable)
                })
            })
            .await?;

        info!(
            event_name = "finance.payable_cancelled",
            company_id = company_id.0,
            payable_id = payable_id.0,
            paid_total = %payable.settlement.paid_total,
            "payable cancelled"
        );
        Ok(payable)
    }

    pub async fn get_receivable(
        &self,
        company_id: CompanyId,
        receivable_id: ReceivableId,
    ) -> Result<Receivable, ApplicationError> {
        self.gateway
            .with_read(move |tx| Box::pin(load_receivable(tx, company_id, receivable_id)))
            .await
    }

    pub async fn get_payable(
        &self,
        company_id: CompanyId,
        payable_id: PayableId,
    ) -> Result<Payable, ApplicationError> {
        self.gateway.with_read(move |tx| Box::pin(load_payable(tx, company_id, payable_id))).await
    }

    /// Open and partially paid receivables, earliest due first.
    pub async fn list_open_receivables(
        &self,
        company_id: CompanyId,
    ) -> Result<Vec<Receivable>, ApplicationError> {
        self.gateway
            .with_read(move |tx| {
                Box::pin(async move {
                    let rows = tx
                        .query_all(
                            sqlx::query(
                                "SELECT id, company_id, sale_id, status, due_date, total, paid_total,
                                        created_at
                                 FROM accounts_receivable
                                 WHERE company_id = ? AND status IN ('open', 'partial')
                                 ORDER BY due_date, id",
                            )
                            .bind(company_id.0),
                        )
                        .await?;
                    Ok(rows.iter().map(row_to_receivable).collect::<Result<Vec<_>, _>>()?)
                })
            })
            .await
    }

    /// Open and partially paid payables, earliest due first.
    pub async fn list_open_payables(
        &self,
        company_id: CompanyId,
    ) -> Result<Vec<Payable>, ApplicationError> {
        self.gateway
            .with_read(move |tx| {
                Box::pin(async move {
                    let rows = tx
                        .query_all(
                            sqlx::query(
                                "SELECT id, company_id, supplier_name, description, status, due_date,
                                        total, paid_total, created_at
                                 FROM accounts_payable
                                 WHERE company_id = ? AND status IN ('open', 'partial')
                                 ORDER BY due_date, id",
                            )
                            .bind(company_id.0),
                        )
                        .await?;
                    Ok(rows.iter().map(row_to_payable).collect::<Result<Vec<_>, _>>()?)
                })
            })
            .await
    }

    pub async fn list_payments(
        &self,
        company_id: CompanyId,
        origin_type: Option<OriginType>,
    ) -> Result<Vec<Payment>, ApplicationError> {
        self.gateway
            .with_read(move |tx| {
                Box::pin(async move {
                    let rows = tx
                        .query_all(
                            sqlx::query(
                                "SELECT id, company_id, direction, origin_type, origin_id, method,
                                        amount, paid_at, created_by, note
                                 FROM payments
                                 WHERE company_id = ? AND (? IS NULL OR origin_type = ?)
                                 ORDER BY paid_at, id",
                            )
                            .bind(company_id.0)
                            .bind(origin_type.map(|origin| origin.as_str()))
                            .bind(origin_type.map(|origin| origin.as_str())),
                        )
                        .await?;
                    Ok(rows.iter().map(row_to_payment).collect::<Result<Vec<_>, _>>()?)
                })
            })
            .await
    }
}

pub(crate) async fn insert_receivable(
    tx: &mut TxHandle,
    company_id: CompanyId,
    sale_id: SaleId,
    due_date: NaiveDate,
    total: Decimal,
    now: DateTime<Utc>,
) -> Result<Receivable, ApplicationError> {
    let settlement = Settlement::open(total)?;
    let result = tx
        .execute(
            sqlx::query(
                "INSERT INTO accounts_receivable
                    (company_id, sale_id, status, due_date, total, paid_total, created_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(company_id.0)
            .bind(sale_id.0)
            .bind(settlement.status.as_str())
            .bind(format_date(due_date))
            .bind(settlement.total.to_string())
            .bind(settlement.paid_total.to_string())
            .bind(now.to_rfc3339()),
        )
        .await?;
    Ok(Receivable {
        id: ReceivableId(result.last_insert_rowid()),
        company_id,
        sale_id,
        settlement,
        due_date,
        created_at: now,
    })
}

pub(crate) async fn live_receivable_for_sale(
    tx: &mut TxHandle,
    company_id: CompanyId,
    sale_id: SaleId,
) -> Result<Option<Receivable>, RepositoryError> {
    let row = tx
        .query_optional(
            sqlx::query(
                "SELECT id, company_id, sale_id, status, due_date, total, paid_total, created_at
                 FROM accounts_receivable
                 WHERE company_id = ? AND sale_id = ? AND status <> 'cancelled'",
            )
            .bind(company_id.0)
            .bind(sale_id.0),
        )
        .await?;
    row.as_ref().map(row_to_receivable).transpose()
}

/// Sum of `sale_direct` payments already recorded against a sale.
pub(crate) async fn sale_direct_paid(
    tx: &mut TxHandle,
    company_id: CompanyId,
    sale_id: SaleId,
) -> Result<Decimal, RepositoryError> {
    let rows = tx
        .query_all(
            sqlx::query(
                "SELECT amount FROM payments
                 WHERE company_id = ? AND origin_type = 'sale_direct' AND origin_id = ?",
            )
            .bind(company_id.0)
            .bind(sale_id.0),
        )
        .await?;
    rows.iter().map(|row| decimal_column(row, "amount")).sum()
}

async fn load_receivable(
    tx: &mut TxHandle,
    company_id: CompanyId,
    receivable_id: ReceivableId,
) -> Result<Receivable, ApplicationError> {
    let row = tx
        .query_optional(
            sqlx::query(
                "SELECT id, company_id, sale_id, status, due_date, total, paid_total, created_at
                 FROM accounts_receivable WHERE id = ? AND company_id = ?",
            )
            .bind(receivable_id.0)
            .bind(company_id.0),
        )
        .await?;
    match row {
        Some(row) => Ok(row_to_receivable(&row)?),
        None => Err(DomainError::not_found("receivable", receivable_id.0).into()),
    }
}

async fn load_payable(
    tx: &mut TxHandle,
    company_id: CompanyId,
    payable_id: PayableId,
) -> Result<Payable, ApplicationError> {
    let row = tx
        .query_optional(
            sqlx::query(
                "SELECT id, company_id, supplier_name, description, status, due_date, total,
                        paid_total, created_at
                 FROM accounts_payable WHERE id = ? AND company_id = ?",
            )
            .bind(payable_id.0)
            .bind(company_id.0),
        )
        .await?;
    match row {
        Some(row) => Ok(row_to_payable(&row)?),
        None => Err(DomainError::not_found("payable", payable_id.0).into()),
    }
}

async fn load_settlement(
    tx: &mut TxHandle,
    company_id: CompanyId,
    kind: TitleKind,
    title_id: i64,
) -> Result<Settlement, ApplicationError> {
    let sql = format!(
        "SELECT status, total, paid_total FROM {} WHERE id = ? AND company_id = ?",
        kind.table()
    );
    let row = tx.query_optional(sqlx::query(&sql).bind(title_id).bind(company_id.0)).await?;
    match row {
        Some(row) => Ok(row_to_settlement(&row)?),
        None => Err(DomainError::not_found(kind.entity(), title_id).into()),
    }
}

async fn settle_title(
    tx: &mut TxHandle,
    company_id: CompanyId,
    kind: TitleKind,
    title_id: i64,
    amount: Decimal,
) -> Result<Settlement, ApplicationError> {
    let current = load_settlement(tx, company_id, kind, title_id).await?;
    let next = current.apply(amount)?;
    write_settlement(tx, company_id, kind, title_id, &current, &next).await?;
    Ok(next)
}

/// Compare-and-set on `paid_total` and `status` so a stale read can never overwrite a newer
/// balance.
async fn write_settlement(
    tx: &mut TxHandle,
    company_id: CompanyId,
    kind: TitleKind,
    title_id: i64,
    current: &Settlement,
    next: &Settlement,
) -> Result<(), ApplicationError> {
    let sql = format!(
        "UPDATE {} SET status = ?, paid_total = ?
         WHERE id = ? AND company_id = ? AND status = ? AND paid_total = ?",
        kind.table()
    );
    let result = tx
        .execute(
            sqlx::query(&sql)
                .bind(next.status.as_str())
                .bind(next.paid_total.to_string())
                .bind(title_id)
                .bind(company_id.0)
                .bind(current.status.as_str())
                .bind(current.paid_total.to_string()),
        )
        .await?;
    if result.rows_affected() == 0 {
        return Err(DomainError::Conflict(format!(
            "{} {title_id} changed while it was being settled",
            kind.entity()
        ))
        .into());
    }
    Ok(())
}

/// Direct payments against an open sale without a live receivable, capped at the sale total.
/// The sale is marked paid once the direct payments cover it.
async fn settle_sale_directly(
    tx: &mut TxHandle,
    company_id: CompanyId,
    sale_id: SaleId,
    amount: Decimal,
) -> Result<(), ApplicationError> {
    let sale = load_sale(tx, company_id, sale_id).await?;
    sale.ensure_open("pay")?;
    if live_receivable_for_sale(tx, company_id, sale_id).await?.is_some() {
        return Err(DomainError::InvalidState(format!(
            "sale {} is collected through its receivable",
            sale.code
        ))
        .into());
    }
    let paid = sale_direct_paid(tx, company_id, sale_id).await?;
    let outstanding = sale.total - paid;
    if amount > outstanding {
        return Err(DomainError::Validation(format!(
            "payment {amount} exceeds outstanding balance {outstanding} of sale {}",
            sale.code
        ))
        .into());
    }
    if paid + amount == sale.total {
        set_sale_status(tx, company_id, sale_id, SaleStatus::Open, SaleStatus::Paid).await?;
    }
    Ok(())
}

async fn insert_payment(
    tx: &mut TxHandle,
    company_id: CompanyId,
    request: &PaymentRequest,
) -> Result<Payment, ApplicationError> {
    let origin_type = request.origin.origin_type();
    let origin_id = request.origin.origin_id();
    let direction = request.origin.direction();
    let note = request
        .note
        .as_deref()
        .map(str::trim)
        .filter(|note| !note.is_empty())
        .map(str::to_string);

    let result = tx
        .execute(
            sqlx::query(
                "INSERT INTO payments
                    (company_id, direction, origin_type, origin_id, method, amount, paid_at,
                     created_by, note)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(company_id.0)
            .bind(direction.as_str())
            .bind(origin_type.as_str())
            .bind(origin_id)
            .bind(request.method.as_str())
            .bind(request.amount.to_string())
            .bind(request.paid_at.to_rfc3339())
            .bind(request.created_by.map(|user| user.0))
            .bind(&note),
        )
        .await?;

    Ok(Payment {
        id: PaymentId(result.last_insert_rowid()),
        company_id,
        direction,
        origin_type,
        origin_id,
        method: request.method,
        amount: request.amount,
        paid_at: request.paid_at,
        created_by: request.created_by,
        note,
    })
}

fn row_to_settlement(row: &SqliteRow) -> Result<Settlement, RepositoryError> {
    Ok(Settlement {
        status: enum_column(row, "status", SettlementStatus::parse)?,
        total: decimal_column(row, "total")?,
        paid_total: decimal_column(row, "paid_total")?,
    })
}

fn row_to_receivable(row: &SqliteRow) -> Result<Receivable, RepositoryError> {
    Ok(Receivable {
        id: ReceivableId(column(row, "id")?),
        company_id: CompanyId(column(row, "company_id")?),
        sale_id: SaleId(column(row, "sale_id")?),
        settlement: row_to_settlement(row)?,
        due_date: date_column(row, "due_date")?,
        created_at: timestamp_column(row, "created_at")?,
    })
}

fn row_to_payable(row: &SqliteRow) -> Result<Payable, RepositoryError> {
    Ok(Payable {
        id: PayableId(column(row, "id")?),
        company_id: CompanyId(column(row, "company_id")?),
        supplier_name: column(row, "supplier_name")?,
        description: column(row, "description")?,
        settlement: row_to_settlement(row)?,
        due_date: date_column(row, "due_date")?,
        created_at: timestamp_column(row, "created_at")?,
    })
}

fn row_to_payment(row: &SqliteRow) -> Result<Payment, RepositoryError> {
    Ok(Payment {
        id: PaymentId(column(row, "id")?),
        company_id: CompanyId(column(row, "company_id")?),
        direction: enum_column(row, "direction", PaymentDirection::parse)?,
        origin_type: enum_column(row, "origin_type", OriginType::parse)?,
        origin_id: column(row, "origin_id")?,
        method: enum_column(row, "method", PaymentMethod::parse)?,
        amount: decimal_column(row, "amount")?,
        paid_at: timestamp_column(row, "paid_at")?,
        created_by: column::<Option<i64>>(row, "created_by")?.map(UserId),
        note: column(row, "note")?,
    })
}
