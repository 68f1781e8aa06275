//! Transaction history handler.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;

use agent_ledger_core::{CreditDebit, OwnerId, Page, TransactionType};
use agent_ledger_store::TransactionWithEvent;

use crate::auth::AdminAuth;
use crate::error::ApiError;
use crate::handlers::{parse_id, PageQuery};
use crate::state::AppState;

/// Query of the transaction listing.
#[derive(Debug, Deserialize)]
pub struct TransactionsQuery {
    /// User whose postings are listed.
    pub user_id: String,
    /// Comma separated transaction types, e.g. `receive_fee_agent,reward`.
    pub tx_type: Option<String>,
    /// Only credits or only debits.
    pub credit_debit: Option<CreditDebit>,
    /// Id of the last item seen.
    pub cursor: Option<String>,
    /// Maximum number of items.
    pub limit: Option<usize>,
}

fn parse_tx_types(raw: Option<&str>) -> Result<Vec<TransactionType>, ApiError> {
    raw.map(|raw| {
        raw.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| s.parse::<TransactionType>().map_err(ApiError::from))
            .collect()
    })
    .transpose()
    .map(Option::unwrap_or_default)
}

/// A user's postings, newest first, each with its event attached.
pub async fn list_transactions(
    State(state): State<Arc<AppState>>,
    _admin: AdminAuth,
    Query(query): Query<TransactionsQuery>,
) -> Result<Json<Page<TransactionWithEvent>>, ApiError> {
    let user_id: OwnerId = parse_id(&query.user_id)?;
    let tx_types = parse_tx_types(query.tx_type.as_deref())?;
    let credit_debit = query.credit_debit;
    let page = PageQuery {
        cursor: query.cursor,
        limit: query.limit,
    }
    .into_request();

    let transactions = state
        .run(move |ledger| ledger.list_transactions(&user_id, &tx_types, credit_debit, &page))
        .await?;
    Ok(Json(transactions))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_comma_separated_types() {
        let types = parse_tx_types(Some("receive_fee_agent, reward,")).unwrap();
        assert_eq!(
            types,
            vec![TransactionType::ReceiveFeeAgent, TransactionType::Reward]
        );
        assert!(parse_tx_types(None).unwrap().is_empty());
        assert!(parse_tx_types(Some("bogus")).is_err());
    }
}
