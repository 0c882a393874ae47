//! Headless stand-in for the approval popups.

use std::sync::Arc;

use tokio::sync::mpsc::UnboundedReceiver;

use devnet_wallet_adapters::{InProcessWallet, UiEvent};
use devnet_wallet_core::{CoreMessage, Popup};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Approve,
    Reject,
}

fn answer(popup: &Popup, decision: Decision) -> Option<CoreMessage> {
    let approve = decision == Decision::Approve;
    Some(match popup {
        Popup::ConnectionApproval { tab_id, .. } if approve => CoreMessage::ApproveConnection {
            tab_id: *tab_id,
            accounts: Vec::new(),
        },
        Popup::ConnectionApproval { tab_id, .. } => CoreMessage::RejectConnection { tab_id: *tab_id },
        Popup::TransactionApproval { tab_id, .. } if approve => CoreMessage::ApproveTransaction {
            tab_id: *tab_id,
            transaction: None,
        },
        Popup::TransactionApproval { tab_id, .. } => {
            CoreMessage::RejectTransaction { tab_id: *tab_id }
        }
        Popup::SignatureApproval { tab_id, .. } if approve => {
            CoreMessage::ApproveSignature { tab_id: *tab_id }
        }
        Popup::SignatureApproval { tab_id, .. } => CoreMessage::RejectSignature { tab_id: *tab_id },
        Popup::Signer { .. } => return None,
    })
}

/// Answer every approval popup with `decision` until the wallet goes away.
pub async fn drive(
    wallet: Arc<InProcessWallet>,
    mut events: UnboundedReceiver<UiEvent>,
    decision: Decision,
) {
    while let Some(event) = events.recv().await {
        let UiEvent::Opened { window, popup } = event else {
            continue;
        };
        let Some(message) = answer(&popup, decision) else {
            tracing::debug!(?window, "signer window opened");
            continue;
        };
        tracing::info!(?window, ?popup, ?decision, "answering approval popup");
        let ack = wallet.ui(message).await;
        if !ack.success {
            tracing::warn!(error = ?ack.error, code = ?ack.code, "approval was refused");
        }
    }
}
