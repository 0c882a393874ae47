use std::sync::Arc;

use alloy::primitives::B256;
use tokio::time::Instant;

use crate::config::SignerConfig;
use crate::domain::{keys, ReceiptSummary, SignerHandoff, SignerResult, TxRequest};
use crate::error::ErrorCode;
use crate::handoff::wait_for_record;
use crate::ports::{store_json, BroadcastPort, PortError, StoragePort};
use crate::revert::{decode_revert_reason, decode_revert_value, revert_message};

pub const ALL_ENDPOINTS_FAILED_MESSAGE: &str = "All RPC endpoints failed to send transaction";

/// Body of the hidden signer window: consumes one handoff record, broadcasts
/// it and writes exactly one result record.
pub struct SignerHandoffWorker<S: ?Sized, B: ?Sized> {
    storage: Arc<S>,
    broadcaster: Arc<B>,
    config: SignerConfig,
}

impl<S, B> SignerHandoffWorker<S, B>
where
    S: StoragePort + ?Sized,
    B: BroadcastPort + ?Sized,
{
    pub fn new(storage: Arc<S>, broadcaster: Arc<B>, config: SignerConfig) -> Self {
        Self {
            storage,
            broadcaster,
            config,
        }
    }

    /// Returns `None` when no handoff arrived before the poll window closed.
    pub async fn run(&self, request_id: &str) -> Result<Option<SignerResult>, PortError> {
        let report_by = Instant::now() + self.config.result_deadline;
        let handoff_key = keys::signer_handoff(request_id);
        let handoff: Option<SignerHandoff> = wait_for_record(
            &*self.storage,
            &handoff_key,
            self.config.poll_interval,
            self.config.handoff_timeout,
        )
        .await?;
        let Some(handoff) = handoff else {
            tracing::info!(request_id, "no handoff arrived, signer closing");
            return Ok(None);
        };
        self.storage.remove(&handoff_key).await?;
        if handoff.request_id != request_id {
            tracing::warn!(
                request_id,
                record = %handoff.request_id,
                "handoff record names a different request"
            );
        }

        let result = self.execute(&handoff, report_by).await;
        store_json(&*self.storage, &keys::signer_result(request_id), &result).await?;
        tracing::info!(request_id, success = result.success, pending = ?result.pending, "signer result stored");
        Ok(Some(result))
    }

    /// Broadcast through the first endpoint that accepts the transaction, then
    /// wait for its receipt until `report_by` at the latest.
    pub async fn execute(&self, handoff: &SignerHandoff, report_by: Instant) -> SignerResult {
        for endpoint in &self.config.endpoints {
            match self
                .broadcaster
                .send_transaction(endpoint, &handoff.transaction, &handoff.private_key)
                .await
            {
                Ok(hash) => {
                    tracing::info!(%endpoint, %hash, "transaction broadcast");
                    return self
                        .settle(endpoint, &handoff.transaction, hash, report_by)
                        .await;
                }
                Err(e) => tracing::warn!(%endpoint, error = %e, "broadcast failed"),
            }
        }
        SignerResult::failed(None, ErrorCode::AllEndpointsFailed, ALL_ENDPOINTS_FAILED_MESSAGE)
    }

    async fn settle(
        &self,
        endpoint: &str,
        tx: &TxRequest,
        hash: B256,
        report_by: Instant,
    ) -> SignerResult {
        let deadline = (Instant::now() + self.config.inclusion_timeout).min(report_by);
        loop {
            match self.broadcaster.receipt(endpoint, hash).await {
                Ok(Some(receipt)) if receipt.status => return SignerResult::confirmed(hash),
                Ok(Some(receipt)) => return self.reverted(endpoint, tx, hash, receipt).await,
                Ok(None) => {}
                Err(e) => tracing::debug!(%hash, error = %e, "receipt lookup failed"),
            }
            let now = Instant::now();
            if now >= deadline {
                tracing::info!(%hash, "transaction not yet included");
                return SignerResult::pending(hash);
            }
            tokio::time::sleep(self.config.receipt_poll_interval.min(deadline - now)).await;
        }
    }

    async fn reverted(
        &self,
        endpoint: &str,
        tx: &TxRequest,
        hash: B256,
        receipt: ReceiptSummary,
    ) -> SignerResult {
        let reason = match self
            .broadcaster
            .replay_call(endpoint, tx, receipt.from, receipt.block_number)
            .await
        {
            Ok(output) => decode_revert_reason(&output),
            Err(PortError::Rpc {
                data: Some(data), ..
            }) => decode_revert_value(&data),
            Err(e) => {
                tracing::debug!(%hash, error = %e, "revert replay failed");
                None
            }
        };
        let message = revert_message(reason);
        tracing::warn!(%hash, %message, "transaction reverted");
        SignerResult::failed(Some(hash), ErrorCode::TransactionReverted, message)
    }
}
