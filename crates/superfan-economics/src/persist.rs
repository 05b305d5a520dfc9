/// Conflict-safe purchase persistence.
///
/// The unique constraint on `external_id` is the only guard. A losing
/// insert reads back the winner's row and reports it as idempotent.

use serde::{Deserialize, Serialize};
use superfan_core::{NewPurchase, PurchaseRecord};
use superfan_store::{Store, StoreError};
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Persisted {
    pub record: PurchaseRecord,
    /// The row already existed; no side effects may run for it again
    pub idempotent: bool,
}

pub async fn persist_purchase(store: &dyn Store, purchase: NewPurchase) -> Result<Persisted, StoreError> {
    let external_id = purchase.external_id.clone();
    match store.insert_purchase(purchase).await {
        Ok(record) => {
            info!(purchase_id = %record.id, %external_id, method = record.payment_method.name(), "purchase recorded");
            Ok(Persisted {
                record,
                idempotent: false,
            })
        }
        Err(err) if err.is_unique_violation() => {
            debug!(%external_id, "purchase already recorded");
            match store.find_purchase_by_external_id(&external_id).await? {
                Some(record) => Ok(Persisted {
                    record,
                    idempotent: true,
                }),
                // Violation on another constraint
                None => Err(err),
            }
        }
        Err(err) => Err(err),
    }
}
